use prospectus::core::error::ProspectusError;
use prospectus::core::store::Store;
use prospectus::plugins::generation::{
    GenerateOptions, MissingFieldWarning, ValidatedInput, export_run, generate, generate_with_options,
    get_run, list_runs, render_missing_report,
};
use prospectus::plugins::normalize::{NormalizeConfig, normalize_inputs};
use prospectus::plugins::placeholders::extract_missing_markers;
use prospectus::plugins::templates::{
    Section, TemplateStatus, TemplateUpdate, archive_template, create_template, update_template,
};
use prospectus::plugins::versions::{DocumentVersion, create_version, lock};
use std::fs;
use tempfile::tempdir;

fn locked_version(store: &Store) -> DocumentVersion {
    let v = create_version(store, "ipo-2026", "draft.docx", b"source document").unwrap();
    lock(store, &v.id).unwrap()
}

fn offer_sections() -> Vec<Section> {
    vec![
        Section::fact_field("Issuer", "issuer.name"),
        Section::free_text("Offer", "{{issuer.name}} offers {{offer.size}} shares at {{offer.price_range}}."),
        Section::conditional("Lockup", "offer.lockup", "Shares are locked up for {{offer.lockup_days}} days."),
    ]
}

#[test]
fn issuer_missing_example() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let t = create_template(
        &store,
        "Front matter",
        TemplateStatus::Approved,
        vec![Section::fact("IssuerName"), Section::free_text("RiskFactors", "<risk text>")],
    )
    .unwrap();

    let inputs = ValidatedInput::new().missing("IssuerName");
    let run = generate(&store, Some(v.id.as_str()), &t.id, &inputs).unwrap();

    let texts: Vec<&str> = run.artifact.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts, vec!["[[MISSING: IssuerName]]", "<risk text>"]);
    assert_eq!(run.unresolved, vec!["IssuerName"]);
    assert_eq!(
        run.warnings(),
        vec![MissingFieldWarning {
            field: "IssuerName".to_string(),
            section: "IssuerName".to_string()
        }]
    );
}

#[test]
fn complete_inputs_leave_no_placeholder() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let t = create_template(&store, "Offer", TemplateStatus::Approved, offer_sections()).unwrap();

    let inputs = ValidatedInput::new()
        .known("issuer.name", "Acme Holdings")
        .known("offer.size", "1,000,000")
        .known("offer.price_range", "AED 1.30 – AED 1.50")
        .known("offer.lockup", "true")
        .known("offer.lockup_days", "180");
    let run = generate(&store, Some(v.id.as_str()), &t.id, &inputs).unwrap();

    assert!(!run.artifact_text().contains("[[MISSING:"));
    assert!(run.unresolved.is_empty());
    assert!(run.warnings().is_empty());
    assert_eq!(render_missing_report(&run), "");
    assert_eq!(run.artifact[1].text, "Acme Holdings offers 1,000,000 shares at AED 1.30 – AED 1.50.");
    assert_eq!(run.version_id.as_deref(), Some(v.id.as_str()));
    assert_eq!(run.template_version, 1);
}

#[test]
fn each_missing_field_gets_exactly_one_placeholder() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let t = create_template(
        &store,
        "Offer",
        TemplateStatus::Draft,
        vec![
            Section::fact("IssuerName"),
            Section::free_text("Offer", "Size {{offer.size}}; price {{offer.price}}"),
        ],
    )
    .unwrap();

    let inputs = ValidatedInput::new().known("offer.price", "AED 1.40");
    let run = generate(&store, Some(v.id.as_str()), &t.id, &inputs).unwrap();
    let text = run.artifact_text();

    for field in ["IssuerName", "offer.size"] {
        let marker = format!("[[MISSING: {}]]", field);
        assert_eq!(text.matches(&marker).count(), 1, "{}", field);
    }
    assert_eq!(run.unresolved, vec!["IssuerName", "offer.size"]);
    assert_eq!(extract_missing_markers(&text), run.unresolved);
    assert!(text.contains("price AED 1.40"));

    let report = render_missing_report(&run);
    assert!(report.starts_with("Missing Information"));
    assert!(report.contains("- offer.size"));
    assert!(!report.contains("[[MISSING:"));
}

#[test]
fn unlocked_version_is_rejected_without_side_effects() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = create_version(&store, "ipo", "draft.docx", b"x").unwrap();
    let t = create_template(&store, "Offer", TemplateStatus::Draft, offer_sections()).unwrap();

    let err = generate(&store, Some(v.id.as_str()), &t.id, &ValidatedInput::new()).unwrap_err();
    assert!(matches!(err, ProspectusError::NotLocked(_)), "got {:?}", err);
    assert!(list_runs(&store, None).unwrap().is_empty());

    let err = generate(&store, Some("missing"), &t.id, &ValidatedInput::new()).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
    let err = generate(&store, None, "missing", &ValidatedInput::new()).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
    assert!(list_runs(&store, None).unwrap().is_empty());
}

#[test]
fn template_edits_do_not_change_existing_runs() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let t = create_template(&store, "Offer", TemplateStatus::Draft, offer_sections()).unwrap();
    let inputs = ValidatedInput::new().known("issuer.name", "Acme Holdings");

    let first = generate(&store, Some(v.id.as_str()), &t.id, &inputs).unwrap();
    let before = get_run(&store, &first.id).unwrap().unwrap();

    update_template(
        &store,
        &t.id,
        TemplateUpdate {
            sections: Some(vec![Section::free_text("Only", "Rewritten for {{issuer.name}}")]),
            ..Default::default()
        },
    )
    .unwrap();

    let after = get_run(&store, &first.id).unwrap().unwrap();
    assert_eq!(after, before);
    assert_eq!(after.template_version, 1);
    assert_eq!(after.template_snapshot.sections, offer_sections());

    let second = generate(&store, Some(v.id.as_str()), &t.id, &inputs).unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.template_version, 2);
    assert_eq!(second.artifact_text(), "Rewritten for Acme Holdings");
    assert_eq!(list_runs(&store, Some(t.id.as_str())).unwrap().len(), 2);
}

#[test]
fn conditional_block_needs_its_flag() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let t = create_template(&store, "Offer", TemplateStatus::Draft, offer_sections()).unwrap();

    let off = ValidatedInput::new().known("offer.lockup", "no");
    let run = generate(&store, None, &t.id, &off).unwrap();
    assert!(run.artifact.iter().all(|s| s.name != "Lockup"));
    assert!(!run.unresolved.contains(&"offer.lockup".to_string()));

    let unknown = generate(&store, None, &t.id, &ValidatedInput::new()).unwrap();
    let lockup = unknown.artifact.iter().find(|s| s.name == "Lockup").unwrap();
    assert_eq!(lockup.text, "[[MISSING: offer.lockup]]");
}

#[test]
fn archived_and_draft_templates_are_gated() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let draft = create_template(&store, "Draft", TemplateStatus::Draft, offer_sections()).unwrap();

    let strict = GenerateOptions { require_approved: true };
    let err = generate_with_options(&store, Some(v.id.as_str()), &draft.id, &ValidatedInput::new(), &strict).unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));

    update_template(
        &store,
        &draft.id,
        TemplateUpdate {
            status: Some(TemplateStatus::Approved),
            ..Default::default()
        },
    )
    .unwrap();
    generate_with_options(&store, Some(v.id.as_str()), &draft.id, &ValidatedInput::new(), &strict).unwrap();

    archive_template(&store, &draft.id).unwrap();
    let err = generate(&store, Some(v.id.as_str()), &draft.id, &ValidatedInput::new()).unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));
}

#[test]
fn normalized_inputs_feed_generation_and_export() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let t = create_template(&store, "Offer", TemplateStatus::Approved, offer_sections()).unwrap();

    let raw = serde_json::json!({
        "issuer": { "name": "Acme Holdings" },
        "offer": { "offer_shares": 1000000, "price_range_low": 1.3, "price_range_high": 1.5, "lockup": false }
    });
    let normalized = normalize_inputs(&raw, &NormalizeConfig::default()).unwrap();
    let run = generate(&store, Some(v.id.as_str()), &t.id, &normalized.input).unwrap();
    assert_eq!(run.artifact[1].text, "Acme Holdings offers 1,000,000 shares at AED 1.30 – AED 1.50.");
    assert!(run.unresolved.is_empty());

    let path = export_run(&store, &run.id, None).unwrap();
    assert!(path.starts_with(store.generated_dir()));
    let body = fs::read_to_string(&path).unwrap();
    assert_eq!(body, run.artifact_text());

    let target = tmp.path().join("out/run.txt");
    export_run(&store, &run.id, Some(target.as_path())).unwrap();
    assert!(target.exists());

    let err = export_run(&store, "missing", None).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
}

#[test]
fn marker_inputs_and_template_markers_are_listed_as_unresolved() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = locked_version(&store);
    let t = create_template(
        &store,
        "Dates",
        TemplateStatus::Approved,
        vec![
            Section::fact_field("Size", "offer.size"),
            Section::free_text("Dates", "Dates: [[MISSING: key_dates]]"),
        ],
    )
    .unwrap();

    let inputs = ValidatedInput::from_json(&serde_json::json!({
        "offer": { "size": "[[MISSING: offer.size]]" }
    }))
    .unwrap();
    let run = generate(&store, Some(v.id.as_str()), &t.id, &inputs).unwrap();
    let text = run.artifact_text();

    assert_eq!(run.unresolved, vec!["key_dates", "offer.size"]);
    assert_eq!(extract_missing_markers(&text), run.unresolved);
    assert_eq!(text.matches("[[MISSING: offer.size]]").count(), 1);
    assert_eq!(text.matches("[[MISSING: key_dates]]").count(), 1);
    let warned: Vec<(String, String)> = run.warnings().into_iter().map(|w| (w.field, w.section)).collect();
    assert_eq!(
        warned,
        vec![
            ("offer.size".to_string(), "Size".to_string()),
            ("key_dates".to_string(), "Dates".to_string()),
        ]
    );
    assert!(render_missing_report(&run).contains("key_dates"));
}
