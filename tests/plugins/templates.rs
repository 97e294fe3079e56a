use prospectus::core::error::ProspectusError;
use prospectus::core::store::Store;
use prospectus::plugins::generation::{ValidatedInput, generate};
use prospectus::plugins::templates::{
    Section, TemplateStatus, TemplateUpdate, archive_template, create_template, delete_template,
    extract_placeholders, get_template, get_template_version, list_template_versions, list_templates,
    update_template,
};
use prospectus::plugins::versions::{create_version, lock};
use tempfile::tempdir;

fn sections() -> Vec<Section> {
    vec![
        Section::fact("IssuerName"),
        Section::free_text("Offer", "The offer comprises {{offer.size}} shares."),
    ]
}

#[test]
fn create_and_read_back() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());

    let t = create_template(&store, "Offer summary", TemplateStatus::Draft, sections()).unwrap();
    assert_eq!(t.version, 1);
    assert!(!t.archived);
    assert_eq!(t.schema_hash.len(), 64);

    let fetched = get_template(&store, &t.id).unwrap().unwrap();
    assert_eq!(fetched, t);
    assert_eq!(extract_placeholders(&fetched.sections), vec!["IssuerName", "offer.size"]);
    assert!(get_template(&store, "unknown").unwrap().is_none());

    let err = create_template(&store, " ", TemplateStatus::Draft, sections()).unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));
}

#[test]
fn updates_append_versions() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v1 = create_template(&store, "Offer summary", TemplateStatus::Draft, sections()).unwrap();

    let v2 = update_template(
        &store,
        &v1.id,
        TemplateUpdate {
            status: Some(TemplateStatus::Approved),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(v2.version, 2);
    assert_eq!(v2.status, TemplateStatus::Approved);
    assert_eq!(v2.schema_hash, v1.schema_hash);

    let v3 = update_template(
        &store,
        &v1.id,
        TemplateUpdate {
            sections: Some(vec![Section::fact("IssuerName")]),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(v3.version, 3);
    assert_ne!(v3.schema_hash, v1.schema_hash);

    // Earlier versions are untouched.
    let old = get_template_version(&store, &v1.id, 1).unwrap().unwrap();
    assert_eq!(old.sections, v1.sections);
    assert_eq!(old.status, TemplateStatus::Draft);

    let history = list_template_versions(&store, &v1.id).unwrap();
    assert_eq!(history.iter().map(|t| t.version).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(list_templates(&store, false).unwrap().len(), 1);
    assert_eq!(list_templates(&store, false).unwrap()[0].version, 3);

    let err = update_template(&store, &v1.id, TemplateUpdate::default()).unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));
    let err = update_template(
        &store,
        "missing",
        TemplateUpdate {
            name: Some("x".to_string()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
}

#[test]
fn archive_hides_and_blocks_edits() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let t = create_template(&store, "Offer summary", TemplateStatus::Draft, sections()).unwrap();
    let keep = create_template(&store, "Risk", TemplateStatus::Approved, sections()).unwrap();

    let archived = archive_template(&store, &t.id).unwrap();
    assert!(archived.archived);

    let visible = list_templates(&store, false).unwrap();
    assert_eq!(visible.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(), vec![keep.id.as_str()]);
    assert_eq!(list_templates(&store, true).unwrap().len(), 2);

    let err = update_template(
        &store,
        &t.id,
        TemplateUpdate {
            name: Some("Renamed".to_string()),
            ..Default::default()
        },
    )
    .unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));
}

#[test]
fn delete_in_use_requires_archive() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let t = create_template(&store, "Offer summary", TemplateStatus::Draft, sections()).unwrap();
    let unused = create_template(&store, "Unused", TemplateStatus::Draft, sections()).unwrap();

    let v = create_version(&store, "ipo", "a.docx", b"x").unwrap();
    lock(&store, &v.id).unwrap();
    let run = generate(&store, Some(v.id.as_str()), &t.id, &ValidatedInput::new()).unwrap();

    let err = delete_template(&store, &t.id).unwrap_err();
    assert!(matches!(err, ProspectusError::InUse(_)));

    archive_template(&store, &t.id).unwrap();
    delete_template(&store, &t.id).unwrap();
    assert!(get_template(&store, &t.id).unwrap().is_none());

    // The run keeps its own snapshot.
    let kept = prospectus::plugins::generation::get_run(&store, &run.id).unwrap().unwrap();
    assert_eq!(kept.template_snapshot.id, t.id);

    delete_template(&store, &unused.id).unwrap();
    let err = delete_template(&store, &unused.id).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
}
