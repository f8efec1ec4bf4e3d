//! Golden snapshot tests: each extractor run against a captured page shape,
//! compared field-for-field with the expected draft.

use std::fs;
use std::path::{Path, PathBuf};

use relmon_adapters::{extractor_for, SourceExtractor};
use relmon_core::{ListingDraft, Source};

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn read_fixture(name: &str) -> String {
    fs::read_to_string(fixture_path(name)).expect("read fixture")
}

fn read_snapshot(name: &str) -> ListingDraft {
    let text = read_fixture(name);
    serde_json::from_str(&text).expect("parse snapshot")
}

#[test]
fn utah_report_matches_golden_snapshot() {
    let html = read_fixture("utah_report.html");
    let draft = extractor_for(Source::UtahRealEstate)
        .extract(&html)
        .expect("extraction succeeds");
    assert_eq!(draft, read_snapshot("utah_report_snapshot.json"));
}

#[test]
fn zillow_homedetails_matches_golden_snapshot() {
    let html = read_fixture("zillow_homedetails.html");
    let draft = extractor_for(Source::Zillow)
        .extract(&html)
        .expect("extraction succeeds");
    assert_eq!(draft, read_snapshot("zillow_homedetails_snapshot.json"));
}

#[test]
fn extractors_never_fail_on_unrelated_markup() {
    let html = "<html><head><title>Totally unrelated</title></head><body><p>hi</p></body></html>";
    for source in [Source::UtahRealEstate, Source::Zillow] {
        let draft = extractor_for(source).extract(html).expect("extraction succeeds");
        assert_eq!(draft.status, None, "source {source}");
    }
}
