use prospectus::core::error::ProspectusError;
use prospectus::core::store::Store;
use prospectus::plugins::analysis::{AnalysisOptions, Classification, analyze_version, get_latest_analysis};
use prospectus::plugins::versions::{create_version, lock};
use tempfile::tempdir;

const SOURCE: &str = "# General information\n\n\
Acme Holdings is offering 3,493,160,000 shares at an offer price range of AED 1.30 to AED 1.50.\n\n\
| Tranche | Minimum subscription |\n|---|---|\n| Tranche 1 | AED 5,000 |\n";

fn options() -> AnalysisOptions {
    AnalysisOptions {
        issuer_name: Some("Acme Holdings".to_string()),
        offer_shares: Some(3_493_160_000),
        currency: "AED".to_string(),
    }
}

#[test]
fn analysis_of_a_version_is_stored_and_latest_wins() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = create_version(&store, "ipo", "source.md", SOURCE.as_bytes()).unwrap();
    lock(&store, &v.id).unwrap();

    let first = analyze_version(&store, &v.id, &AnalysisOptions { issuer_name: None, ..options() }).unwrap();
    let second = analyze_version(&store, &v.id, &options()).unwrap();
    assert_eq!(second.total_blocks, 6);
    assert_eq!(second.blocks[0].classification, Classification::Boilerplate);
    assert_eq!(second.blocks[0].heading_level_guess, Some(1));
    assert_eq!(second.blocks[1].classification, Classification::DealSpecific);
    assert!(second.blocks[1].signals.deal_indicators.contains(&"issuer_name_exact".to_string()));
    let amount_cell = second.blocks.iter().find(|b| b.text == "AED 5,000").unwrap();
    assert_eq!(amount_cell.classification, Classification::DealSpecific);
    assert_eq!(amount_cell.block_id, "c-5");

    let latest = get_latest_analysis(&store, &v.id).unwrap().unwrap();
    assert_ne!(latest.id, first.id);
    assert_eq!(latest.id, second.id);
    assert_eq!(latest.counts, second.counts);
    assert_eq!(latest.blocks.len(), second.blocks.len());
    assert!(get_latest_analysis(&store, "other").unwrap().is_none());
}

#[test]
fn binary_or_unknown_versions_are_rejected() {
    let tmp = tempdir().unwrap();
    let store = Store::new(tmp.path());
    let v = create_version(&store, "ipo", "source.docx", &[0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe]).unwrap();

    let err = analyze_version(&store, &v.id, &options()).unwrap_err();
    assert!(matches!(err, ProspectusError::ValidationError(_)));
    assert!(get_latest_analysis(&store, &v.id).unwrap().is_none());

    let err = analyze_version(&store, "missing", &options()).unwrap_err();
    assert!(matches!(err, ProspectusError::NotFound(_)));
}
