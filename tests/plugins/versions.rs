use prospectus::core::error::ProspectusError;
use prospectus::core::store::Store;
use prospectus::plugins::generation::{ValidatedInput, generate};
use prospectus::plugins::templates::{Section, TemplateStatus, create_template};
use prospectus::plugins::versions::{
    DocType, LockState, create_version, discard_version, get_latest, get_version, list_documents,
    list_versions, lock, normalize_document_type, read_content, reopen, verify_blobs,
};
use std::fs;
use tempfile::tempdir;

fn store_in(tmp: &tempfile::TempDir) -> Store {
    Store::new(tmp.path().join("data"))
}

#[test]
fn versions_are_sequenced_per_document() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);

    let v1 = create_version(&store, "ipo-2026", "Draft.DOCX", b"first draft").unwrap();
    let v2 = create_version(&store, "ipo-2026", "draft.pdf", b"second draft").unwrap();
    let other = create_version(&store, "bond-2026", "notes.txt", b"other").unwrap();

    assert_eq!(v1.sequence, 1);
    assert_eq!(v2.sequence, 2);
    assert_eq!(other.sequence, 1);
    assert_eq!(v1.doc_type, DocType::Docx);
    assert_eq!(v2.doc_type, DocType::Pdf);
    assert_eq!(other.doc_type, DocType::Unknown);
    assert_eq!(v1.lock_state, LockState::Unlocked);
    assert_eq!(v1.size_bytes, 11);

    let latest = get_latest(&store, "ipo-2026").unwrap().unwrap();
    assert_eq!(latest.id, v2.id);
    assert!(get_latest(&store, "missing").unwrap().is_none());

    let all = list_versions(&store, "ipo-2026").unwrap();
    assert_eq!(all.iter().map(|v| v.sequence).collect::<Vec<_>>(), vec![1, 2]);

    let docs = list_documents(&store).unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(docs[1].document_id, "ipo-2026");
    assert_eq!(docs[1].latest_sequence, 2);
    assert_eq!(docs[1].locked_count, 0);
}

#[test]
fn empty_document_id_is_rejected() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let err = create_version(&store, "  ", "a.docx", b"x").unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));
}

#[test]
fn second_lock_fails() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let v = create_version(&store, "ipo", "a.docx", b"x").unwrap();

    let locked = lock(&store, &v.id).unwrap();
    assert!(locked.is_locked());
    assert!(locked.locked_at.is_some());

    for _ in 0..3 {
        let err = lock(&store, &v.id).unwrap_err();
        assert!(matches!(err, ProspectusError::AlreadyLocked(_)), "got {:?}", err);
    }
    let err = lock(&store, "nope").unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));

    // The lock timestamp is not rewritten by the failed attempts.
    let again = get_version(&store, &v.id).unwrap().unwrap();
    assert_eq!(again.locked_at, locked.locked_at);
}

#[test]
fn concurrent_locks_have_one_winner() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let v = create_version(&store, "ipo", "a.docx", b"x").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let store = store.clone();
            let id = v.id.clone();
            std::thread::spawn(move || lock(&store, &id))
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, ProspectusError::AlreadyLocked(_)))
    );
}

#[test]
fn content_round_trips_and_is_verified() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let v = create_version(&store, "ipo", "a.docx", b"prospectus body").unwrap();
    assert_eq!(read_content(&store, &v.id).unwrap(), b"prospectus body");
    assert!(verify_blobs(&store).unwrap().is_empty());

    fs::write(store.blobs_dir().join(&v.content_ref), b"tampered").unwrap();
    let err = read_content(&store, &v.id).unwrap_err();
    assert!(matches!(err, ProspectusError::Integrity(_)));
    assert_eq!(verify_blobs(&store).unwrap().len(), 1);

    fs::remove_file(store.blobs_dir().join(&v.content_ref)).unwrap();
    let err = read_content(&store, &v.id).unwrap_err();
    assert!(matches!(err, ProspectusError::Integrity(_)));
}

#[test]
fn reopen_supersedes_without_touching_locked_version() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let v1 = create_version(&store, "ipo", "a.docx", b"final").unwrap();

    let err = reopen(&store, &v1.id).unwrap_err();
    assert!(matches!(err, ProspectusError::NotLocked(_)));

    let locked = lock(&store, &v1.id).unwrap();
    let v2 = reopen(&store, &v1.id).unwrap();
    assert_eq!(v2.sequence, 2);
    assert_eq!(v2.supersedes.as_deref(), Some(v1.id.as_str()));
    assert_eq!(v2.content_ref, v1.content_ref);
    assert!(!v2.is_locked());

    assert_eq!(get_version(&store, &v1.id).unwrap().unwrap(), locked);
    assert_eq!(read_content(&store, &v2.id).unwrap(), b"final");
}

#[test]
fn discard_respects_lock() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let keep = create_version(&store, "ipo", "a.docx", b"shared").unwrap();
    let dup = create_version(&store, "ipo", "b.docx", b"shared").unwrap();
    let solo = create_version(&store, "ipo", "c.docx", b"solo").unwrap();

    lock(&store, &keep.id).unwrap();
    let err = discard_version(&store, &keep.id).unwrap_err();
    assert!(matches!(err, ProspectusError::AlreadyLocked(_)));

    // Blob shared with a surviving version stays on disk.
    discard_version(&store, &dup.id).unwrap();
    assert!(get_version(&store, &dup.id).unwrap().is_none());
    assert!(store.blobs_dir().join(&keep.content_ref).exists());

    discard_version(&store, &solo.id).unwrap();
    assert!(!store.blobs_dir().join(&solo.content_ref).exists());

    let err = discard_version(&store, &solo.id).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
}

#[test]
fn document_type_is_case_insensitive() {
    assert_eq!(normalize_document_type("Offer.PDF"), DocType::Pdf);
    assert_eq!(normalize_document_type("offer.docx"), DocType::Docx);
    assert_eq!(normalize_document_type("offer.doc"), DocType::Unknown);
    assert_eq!(normalize_document_type("offer"), DocType::Unknown);
}

#[test]
fn discard_of_version_used_by_a_run_is_in_use() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let v = create_version(&store, "ipo", "source.docx", b"locked source").unwrap();
    lock(&store, &v.id).unwrap();
    let t = create_template(&store, "Cover", TemplateStatus::Approved, vec![Section::fact("IssuerName")]).unwrap();
    generate(&store, Some(v.id.as_str()), &t.id, &ValidatedInput::new().known("IssuerName", "Acme")).unwrap();

    let err = discard_version(&store, &v.id).unwrap_err();
    assert!(matches!(err, ProspectusError::InUse(_)));
    assert!(get_version(&store, &v.id).unwrap().is_some());
    assert_eq!(read_content(&store, &v.id).unwrap(), b"locked source");
}

#[test]
fn reupload_after_discard_restores_shared_blob() {
    let tmp = tempdir().unwrap();
    let store = store_in(&tmp);
    let first = create_version(&store, "ipo", "a.docx", b"same bytes").unwrap();
    discard_version(&store, &first.id).unwrap();
    assert!(!store.blobs_dir().join(&first.content_ref).exists());

    let again = create_version(&store, "ipo", "a.docx", b"same bytes").unwrap();
    assert_eq!(again.content_ref, first.content_ref);
    assert_eq!(read_content(&store, &again.id).unwrap(), b"same bytes");

    // A damaged blob is rewritten by the next upload of the same content.
    fs::write(store.blobs_dir().join(&again.content_ref), b"corrupt").unwrap();
    let third = create_version(&store, "ipo", "b.docx", b"same bytes").unwrap();
    assert_eq!(read_content(&store, &again.id).unwrap(), b"same bytes");
    assert_eq!(read_content(&store, &third.id).unwrap(), b"same bytes");
    assert!(verify_blobs(&store).unwrap().is_empty());
}
