use std::path::{Path, PathBuf};

use wrank_adapters::{parse_profile_document, parse_roster_document, resolve_profile};
use wrank_storage::FetchError;

fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures/wrestlestat")
        .join(name)
}

fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).expect("fixture exists")
}

#[test]
fn starters_page_yields_one_entry_per_wrestler() {
    let html = read_fixture("starters_125.html");
    let entries = parse_roster_document(&html, "fixture://starters/125").unwrap();

    let summary = entries
        .iter()
        .map(|e| (e.external_id, e.name.as_str(), e.school.as_str()))
        .collect::<Vec<_>>();
    assert_eq!(
        summary,
        vec![
            (78062, "Vincent Robinson", "NC State"),
            (81234, "John Smith", "Ohio State"),
            (80555, "Drake Ayala", "Iowa"),
            (77001, "Jon Smith", "Penn State"),
            (90001, "Doe", ""),
        ]
    );
}

#[test]
fn page_without_wrestler_links_is_a_parse_failure() {
    let html = read_fixture("profile_unrecognized.html");
    let err = parse_roster_document(&html, "fixture://starters/999").unwrap_err();
    match err {
        FetchError::Parse { url, .. } => assert_eq!(url, "fixture://starters/999"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn profile_page_summary() {
    let html = read_fixture("profile_78062.html");
    let summary = parse_profile_document(&html);
    assert_eq!(summary.name.as_deref(), Some("Vincent Robinson"));
    assert_eq!(summary.team.as_deref(), Some("NC State"));
    assert_eq!(summary.class_year.as_deref(), Some("SR"));
    assert_eq!((summary.wins, summary.losses), (24, 3));

    let profile = resolve_profile(
        78062,
        summary,
        "https://www.wrestlestat.com/wrestler/78062/profile",
        "Vincent Robinson",
        "NC State",
    )
    .unwrap();
    assert_eq!(profile.profile_url, "https://www.wrestlestat.com/wrestler/78062/profile");
}

#[test]
fn error_page_is_not_a_profile() {
    let html = read_fixture("profile_unrecognized.html");
    let summary = parse_profile_document(&html);
    assert!(!summary.is_recognizable());
}
