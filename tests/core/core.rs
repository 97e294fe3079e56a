use prospectus::core::broker::{self, BrokerEvent, DbBroker};
use prospectus::core::config::{self, ProspectusConfig};
use prospectus::core::db;
use prospectus::core::error::ProspectusError;
use prospectus::core::schemas;
use prospectus::core::store::{self, Store};
use prospectus::core::time;
use prospectus::plugins::versions;
use rusqlite::params;
use std::fs;
use tempfile::tempdir;

#[test]
fn db_and_broker_round_trip_and_audit() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path();

    db::initialize_meta_db(root).expect("meta init");
    let db_path = db::prospectus_db_path(root);
    assert!(db_path.exists());

    let conn = db::db_connect(&db_path.to_string_lossy()).expect("db connect");
    let fk_on: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .expect("pragma foreign_keys");
    assert_eq!(fk_on, 1);
    let mode: String = conn
        .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .expect("pragma journal_mode");
    assert_eq!(mode.to_lowercase(), "wal");
    drop(conn);

    let broker = DbBroker::new(root);
    broker
        .with_conn(&db_path, "tester", "meta.write", |conn| {
            conn.execute(
                "INSERT INTO meta(key, value) VALUES(?1, ?2)",
                params!["note", "hello"],
            )?;
            Ok(())
        })
        .expect("broker success path");

    let result: Result<(), ProspectusError> = broker.with_conn(&db_path, "tester", "meta.fail", |_| {
        Err(ProspectusError::ValidationError("intentional".to_string()))
    });
    assert!(result.is_err());

    let audit_path = root.join(schemas::BROKER_EVENTS_NAME);
    let events: Vec<BrokerEvent> = fs::read_to_string(&audit_path)
        .expect("read audit")
        .lines()
        .map(|line| serde_json::from_str(line).expect("valid broker event json"))
        .collect();
    assert!(events.iter().any(|ev| ev.op == "meta.write" && ev.status == "success"));
    assert!(events.iter().any(|ev| ev.op == "meta.fail" && ev.status == "error"));
    assert!(events.iter().all(|ev| ev.db_id == schemas::PROSPECTUS_DB_NAME));
    assert!(events.iter().all(|ev| time::parse_epoch_z(&ev.ts).is_some()));

    let filtered = broker::read_audit_log(root, Some("meta.f"), None).expect("read filtered");
    assert_eq!(filtered.len(), 1);
    let last = broker::read_audit_log(root, None, Some(1)).expect("read limited");
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].op, "meta.fail");

    let schema = broker::schema();
    assert_eq!(schema["name"], "broker");
}

#[test]
fn schema_version_mismatch_is_refused() {
    let tmp = tempdir().expect("tempdir");
    let root = tmp.path();
    db::initialize_meta_db(root).expect("first init");
    db::initialize_meta_db(root).expect("second init is idempotent");

    let conn = db::db_connect(&db::prospectus_db_path(root).to_string_lossy()).expect("connect");
    conn.execute("UPDATE meta SET value = '999' WHERE key = 'schema_version'", [])
        .expect("tamper");
    drop(conn);

    let err = db::initialize_meta_db(root).unwrap_err();
    assert!(matches!(err, ProspectusError::DatabaseInitializationError(_)));
}

#[test]
fn operations_are_audited_with_store_actor() {
    let tmp = tempdir().expect("tempdir");
    let store = Store::new(tmp.path()).with_actor("analyst");
    let v = versions::create_version(&store, "ipo", "a.docx", b"x").expect("create");
    versions::lock(&store, &v.id).expect("lock");
    let _ = versions::lock(&store, &v.id);

    let events = broker::read_audit_log(&store.root, Some("versions."), None).expect("audit");
    let ops: Vec<(&str, &str)> = events.iter().map(|e| (e.op.as_str(), e.status.as_str())).collect();
    assert_eq!(
        ops,
        vec![
            ("versions.create", "success"),
            ("versions.lock", "success"),
            ("versions.lock", "error")
        ]
    );
    assert!(events.iter().all(|e| e.actor == "analyst"));
}

#[test]
fn config_defaults_and_overrides() {
    let tmp = tempdir().expect("tempdir");
    assert_eq!(config::load_config(tmp.path()).unwrap(), ProspectusConfig::default());

    config::write_default_config(tmp.path()).expect("write default");
    let path = tmp.path().join(store::PROJECT_DIR_NAME).join(config::CONFIG_FILE_NAME);
    assert!(path.exists());
    assert_eq!(config::load_config(tmp.path()).unwrap(), ProspectusConfig::default());

    fs::write(&path, "currency = \"USD\"\nrequire_approved_templates = true\n").expect("write");
    let cfg = config::load_config(tmp.path()).unwrap();
    assert_eq!(cfg.currency, "USD");
    assert!(cfg.require_approved_templates);
    assert_eq!(cfg.actor, "prospectus");

    fs::write(&path, "currency = 5").expect("write");
    let err = config::load_config(tmp.path()).unwrap_err();
    assert!(matches!(err, ProspectusError::ConfigError(_)));
    assert_eq!(err.kind(), "config");
}

#[test]
fn project_root_is_found_from_nested_dir() {
    let tmp = tempdir().expect("tempdir");
    let nested = tmp.path().join("a/b/c");
    fs::create_dir_all(&nested).expect("mkdir");
    assert!(matches!(
        store::find_project_root(&nested),
        Err(ProspectusError::NotFound(_))
    ));

    fs::create_dir_all(tmp.path().join(store::PROJECT_DIR_NAME)).expect("mkdir");
    let found = store::find_project_root(&nested).expect("found");
    assert_eq!(found, tmp.path());
}

#[test]
fn error_envelope_carries_stable_kind() {
    let err = ProspectusError::NotLocked("v1".to_string());
    let env = time::error_envelope("generate", &err);
    assert_eq!(env["status"], "error");
    assert_eq!(env["cmd"], "generate");
    assert_eq!(env["error"]["kind"], "not_locked");
}
