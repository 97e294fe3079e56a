use prospectus::core::error::ProspectusError;
use prospectus::core::store::Store;
use prospectus::plugins::form::{
    InputSchema, build_raw_inputs, find_unresolved_placeholders, template_form_spec, validate_required_paths,
};
use prospectus::plugins::generation::{ValidatedInput, generate};
use prospectus::plugins::normalize::{NormalizeConfig, normalize_inputs};
use prospectus::plugins::templates::{Section, TemplateStatus, create_template};
use tempfile::tempdir;

fn offer_template(store: &Store) -> String {
    create_template(
        store,
        "Offer",
        TemplateStatus::Approved,
        vec![
            Section::fact_field("Issuer", "issuer.name"),
            Section::free_text("Offer", "{{offer.size}} shares at {{offer.price_range}}; {{key_dates}}"),
            Section::free_text("Country", "Incorporated in {{issuer.country}}."),
        ],
    )
    .unwrap()
    .id
}

#[test]
fn form_spec_follows_template_placeholders() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let template_id = offer_template(&store);

    let spec = template_form_spec(&store, &template_id, &InputSchema::builtin()).unwrap();
    assert_eq!(
        spec.requested_paths,
        vec![
            "issuer.name",
            "key_dates",
            "offer.offer_shares",
            "offer.price_range_high",
            "offer.price_range_low"
        ]
    );
    assert_eq!(
        spec.required_paths,
        vec!["issuer.name", "offer.offer_shares", "offer.price_range_high", "offer.price_range_low"]
    );
    assert!(spec.placeholders.contains(&"issuer.country".to_string()));

    let err = template_form_spec(&store, "no-such-template", &InputSchema::builtin()).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
}

#[test]
fn filled_form_validates_and_matches_generation() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let template_id = offer_template(&store);
    let schema = InputSchema::builtin();
    let spec = template_form_spec(&store, &template_id, &schema).unwrap();

    let values = serde_json::json!({
        "issuer.name": "Acme Holdings",
        "offer.offer_shares": "1,000,000",
        "offer.price_range_low": "1.30"
    });
    let raw = build_raw_inputs(&schema, values.as_object().unwrap()).unwrap();
    let normalized = normalize_inputs(&raw, &NormalizeConfig::default()).unwrap();

    let errors = validate_required_paths(&spec.required_paths, &raw, &normalized.input);
    assert_eq!(errors, vec!["offer.price_range_high is required."]);

    let unresolved = find_unresolved_placeholders(&spec.placeholders, &normalized.input);
    assert_eq!(unresolved, vec!["issuer.country", "key_dates", "offer.price_range"]);

    let run = generate(&store, None, &template_id, &normalized.input).unwrap();
    assert_eq!(run.unresolved, unresolved);
}

#[test]
fn marker_values_do_not_satisfy_required_fields() {
    let raw = serde_json::json!({ "issuer": { "name": "[[MISSING: issuer.name]]" } });
    let input = ValidatedInput::from_json(&raw).unwrap();
    let errors = validate_required_paths(&["issuer.name".to_string()], &raw, &input);
    assert_eq!(errors, vec!["issuer.name is required."]);
}
