//! Retrieval integration tests against a scripted browser.

mod common;

use common::*;

use rankscrape::config::ScraperConfig;
use rankscrape::orchestrator::{Orchestrator, RunMode};
use rankscrape::resolver::EntityDirectory;
use rankscrape::retriever::PageRetriever;
use rankscrape::store::{content_digest, DocumentStore};
use rankscrape::types::*;

// ─────────────────────── helpers ───────────────────────

fn directory() -> EntityDirectory {
    EntityDirectory::from_json(DATASET).unwrap()
}

fn entity(name: &str) -> Entity {
    directory().resolve(name).unwrap()
}

fn config_in(dir: &tempfile::TempDir) -> ScraperConfig {
    let mut config = test_config();
    config.retriever.downloads_dir = dir.path().join("downloads");
    config
}

fn retriever(config: &ScraperConfig) -> PageRetriever {
    PageRetriever::new(
        DocumentStore::new(&config.retriever.downloads_dir),
        config.retriever.clone(),
        config.session.clone(),
    )
}

fn orchestrator(browser: &FakeBrowser, config: &ScraperConfig) -> Orchestrator {
    Orchestrator::new(
        browser.controller(config),
        retriever(config),
        config.orchestrator.clone(),
    )
}

fn url(segment: &str, page_type: PageType) -> String {
    match page_type {
        PageType::Main => format!("{BASE}/{segment}"),
        other => format!("{BASE}/{segment}/{}", other.suffix()),
    }
}

fn outcomes(report: &RunReport, name: &str) -> Vec<Outcome> {
    report.for_entity(name).map(|r| r.outcome).collect()
}

// ─────────────────────── resolver ───────────────────────

#[test]
fn test_every_dataset_name_resolves_to_itself() {
    let dir = directory();
    for e in dir.list_all() {
        assert_eq!(&dir.resolve(&e.name).unwrap(), e);
    }
}

#[test]
fn test_partial_name_and_not_found() {
    let dir = directory();
    let harvard = dir.resolve("harvard").unwrap();
    assert_eq!(harvard.canonical_slug, "harvard-university");
    assert_eq!(harvard.numeric_id, "2155");

    assert!(matches!(
        dir.resolve("Nonexistent College"),
        Err(ScrapeError::NotFound(_))
    ));
}

// ─────────────────────── retriever ───────────────────────

#[tokio::test]
async fn test_unchanged_content_is_duplicate_and_changed_content_is_saved() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let princeton = entity("Princeton University");
    let applying = url("princeton-university-2627", PageType::Applying);

    let browser = FakeBrowser::new().with_page(&applying, FakePage::ok(profile_html("v1")));
    let mut controller = browser.controller(&config);
    tokio_test::assert_ok!(controller.launch().await);
    let retriever = retriever(&config);

    let first = retriever
        .retrieve(&mut controller, &princeton, PageType::Applying, None)
        .await
        .unwrap();
    assert_eq!(first.outcome, Outcome::Saved);
    assert_eq!(first.byte_count, profile_html("v1").len());

    let path = retriever.store().document_path(&princeton, PageType::Applying);
    let before = std::fs::read_to_string(&path).unwrap();

    let second = retriever
        .retrieve(&mut controller, &princeton, PageType::Applying, None)
        .await
        .unwrap();
    assert_eq!(second.outcome, Outcome::SkippedDuplicate);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), before);

    browser.set_page(&applying, FakePage::ok(profile_html("v2")));
    let third = retriever
        .retrieve(&mut controller, &princeton, PageType::Applying, None)
        .await
        .unwrap();
    assert_eq!(third.outcome, Outcome::Saved);
    let stored = std::fs::read_to_string(&path).unwrap();
    assert!(stored.contains("<title>v2</title>"));
    assert_eq!(
        retriever
            .store()
            .lookup_digest(&princeton, PageType::Applying)
            .unwrap(),
        Some(content_digest(&stored))
    );
}

#[tokio::test]
async fn test_widget_markup_is_truncated_before_saving() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let yale = entity("Yale University");
    let main = url("yale-university-1426", PageType::Main);

    let html = format!(
        "{}<div id=\"blueshift-recommendations-widget\">recommended</div>",
        profile_html("Yale")
    );
    let browser = FakeBrowser::new().with_page(&main, FakePage::ok(html));
    let mut controller = browser.controller(&config);
    controller.launch().await.unwrap();

    let result = retriever(&config)
        .retrieve(&mut controller, &yale, PageType::Main, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Saved);

    let stored = DocumentStore::new(&config.retriever.downloads_dir)
        .read_document(&yale, PageType::Main)
        .unwrap();
    assert!(!stored.contains("recommended"));
    assert!(stored.ends_with(rankscrape::retriever::TRUNCATION_NOTE));
}

#[tokio::test]
async fn test_markup_cut_short_by_early_widget_marker_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let yale = entity("Yale University");
    let main = url("yale-university-1426", PageType::Main);

    // The marker string sits in a head script, so truncation keeps only
    // the first few dozen bytes of an otherwise full page.
    let html = format!(
        "<html><head><script>var w = 'blueshift-recommendations-widget';</script></head>{}",
        profile_html("Yale")
    );
    assert!(html.len() > config.retriever.min_document_len);
    let browser = FakeBrowser::new().with_page(&main, FakePage::ok(html));
    let mut controller = browser.controller(&config);
    controller.launch().await.unwrap();
    let retriever = retriever(&config);

    let result = retriever
        .retrieve(&mut controller, &yale, PageType::Main, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert!(result.error_detail.unwrap().contains("too short"));
    assert_eq!(browser.navigation_count(&main), 2);
    assert!(!retriever.store().has_document(&yale, PageType::Main));
}

#[tokio::test]
async fn test_sub_page_serving_main_markup_is_not_saved_twice() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let harvard = entity("Harvard University");
    let main = url("harvard-university-2155", PageType::Main);
    let academics = url("harvard-university-2155", PageType::Academics);

    let same = profile_html("Harvard");
    let browser = FakeBrowser::new()
        .with_page(&main, FakePage::ok(same.clone()))
        .with_page(&academics, FakePage::ok(same));
    let mut controller = browser.controller(&config);
    controller.launch().await.unwrap();
    let retriever = retriever(&config);

    let first = retriever
        .retrieve(&mut controller, &harvard, PageType::Main, None)
        .await
        .unwrap();
    assert_eq!(first.outcome, Outcome::Saved);

    let second = retriever
        .retrieve(&mut controller, &harvard, PageType::Academics, None)
        .await
        .unwrap();
    assert_eq!(second.outcome, Outcome::SkippedDuplicate);
    assert_eq!(second.error_detail.as_deref(), Some("same as main"));
    assert!(!retriever.store().has_document(&harvard, PageType::Academics));
}

#[tokio::test]
async fn test_redirect_to_main_is_retried_then_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let harvard = entity("Harvard University");
    let main = url("harvard-university-2155", PageType::Main);
    let applying = url("harvard-university-2155", PageType::Applying);

    let browser =
        FakeBrowser::new().with_page(&applying, FakePage::redirect(profile_html("main"), &main));
    let mut controller = browser.controller(&config);
    controller.launch().await.unwrap();
    let retriever = retriever(&config);

    let result = retriever
        .retrieve(&mut controller, &harvard, PageType::Applying, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::SkippedDuplicate);
    assert_eq!(result.error_detail.as_deref(), Some("redirected"));
    assert_eq!(browser.navigation_count(&applying), 2);
    assert!(!retriever.store().has_document(&harvard, PageType::Applying));
}

#[tokio::test]
async fn test_page_errors_fail_without_aborting() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let harvard = entity("Harvard University");
    let missing = url("harvard-university-2155", PageType::Paying);
    let flaky = url("harvard-university-2155", PageType::Academics);
    let short = url("harvard-university-2155", PageType::CampusInfo);

    let browser = FakeBrowser::new()
        .with_page(&missing, FakePage::status(profile_html("gone"), 404))
        .with_page(&flaky, FakePage::status(profile_html("busy"), 503))
        .with_page(&short, FakePage::ok("<html><body>tiny</body></html>".to_string()));
    let mut controller = browser.controller(&config);
    controller.launch().await.unwrap();
    let retriever = retriever(&config);

    let result = retriever
        .retrieve(&mut controller, &harvard, PageType::Paying, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(browser.navigation_count(&missing), 1);

    let result = retriever
        .retrieve(&mut controller, &harvard, PageType::Academics, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert!(result.error_detail.unwrap().contains("retries exhausted"));
    assert_eq!(
        browser.navigation_count(&flaky),
        config.browser.navigate_retry_count as usize + 1
    );

    let result = retriever
        .retrieve(&mut controller, &harvard, PageType::CampusInfo, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert!(result.error_detail.unwrap().contains("too short"));
    assert_eq!(browser.navigation_count(&short), 2);
}

#[tokio::test]
async fn test_per_page_override_changes_retry_budget() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config_in(&tmp);
    config.retriever.page_overrides.insert(
        PageType::Academics,
        rankscrape::config::PageOverride {
            timeout_ms: Some(60_000),
            retries: Some(3),
        },
    );
    let harvard = entity("Harvard University");
    let flaky = url("harvard-university-2155", PageType::Academics);

    let browser = FakeBrowser::new().with_page(&flaky, FakePage::status(profile_html("x"), 502));
    let mut controller = browser.controller(&config);
    controller.launch().await.unwrap();

    let result = retriever(&config)
        .retrieve(&mut controller, &harvard, PageType::Academics, None)
        .await
        .unwrap();
    assert_eq!(result.outcome, Outcome::Failed);
    assert_eq!(browser.navigation_count(&flaky), 4);
}

// ─────────────────────── orchestrator ───────────────────────

#[tokio::test]
async fn test_harvard_applying_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let dataset = tmp.path().join("universities.json");
    std::fs::write(&dataset, DATASET).unwrap();
    let harvard = EntityDirectory::load(&dataset)
        .unwrap()
        .resolve("Harvard")
        .unwrap();

    let config = config_in(&tmp);
    let target = "https://premium.usnews.com/best-colleges/harvard-university-2155/applying";
    let browser = FakeBrowser::new().with_page(target, FakePage::ok(profile_html("Applying")));

    let mut orch = orchestrator(&browser, &config);
    let report = orch
        .run(&[harvard.clone()], &[PageType::Applying], RunMode::Single)
        .await;
    orch.shutdown().await;

    assert_eq!(browser.navigations(), vec![target.to_string()]);
    assert_eq!(report.saved, 1);
    assert!(tmp
        .path()
        .join("downloads/Harvard_University/applying.html")
        .exists());

    // A second run finds the entity complete and never touches the browser.
    let browser = FakeBrowser::new();
    let mut orch = orchestrator(&browser, &config);
    let report = orch.run(&[harvard], &[PageType::Applying], RunMode::All).await;
    assert_eq!(report.skipped_already_complete, 1);
    assert!(browser.navigations().is_empty());
    assert_eq!(browser.launches(), 0);
}

#[tokio::test]
async fn test_complete_entity_is_skipped_without_navigation() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let yale = entity("Yale University");
    let store = DocumentStore::new(&config.retriever.downloads_dir);
    for page_type in PageType::ALL {
        let markup = profile_html(&page_type.to_string());
        store
            .save(
                &yale,
                &CapturedDocument {
                    entity_id: yale.numeric_id.clone(),
                    page_type,
                    content_digest: content_digest(&markup),
                    raw_markup: markup,
                    captured_at: chrono::Utc::now(),
                },
            )
            .unwrap();
    }

    let browser = FakeBrowser::new();
    let mut orch = orchestrator(&browser, &config);
    let report = orch.run(&[yale], &PageType::ALL, RunMode::All).await;

    assert_eq!(report.skipped_already_complete, PageType::ALL.len());
    assert_eq!(report.saved + report.failed, 0);
    assert!(browser.navigations().is_empty());
}

#[tokio::test]
async fn test_lost_browser_fails_rest_of_entity_and_next_entity_recovers() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let dir = directory();
    let princeton = dir.resolve("Princeton").unwrap();
    let harvard = dir.resolve("Harvard").unwrap();
    let pages = [PageType::Main, PageType::Applying, PageType::Paying];

    let browser = FakeBrowser::new();
    for (segment, e) in [
        ("princeton-university-2627", &princeton),
        ("harvard-university-2155", &harvard),
    ] {
        for page_type in pages {
            browser.set_page(
                &url(segment, page_type),
                FakePage::ok(profile_html(&format!("{} {page_type}", e.name))),
            );
        }
    }
    {
        let mut state = browser.state.lock().unwrap();
        state.disconnect_on = Some(url("princeton-university-2627", PageType::Applying));
        state.failures_after_disconnect = 1;
    }

    let mut orch = orchestrator(&browser, &config);
    let report = orch
        .run(&[princeton, harvard], &pages, RunMode::All)
        .await;

    assert_eq!(
        outcomes(&report, "Princeton University"),
        vec![Outcome::Saved, Outcome::Failed, Outcome::Failed]
    );
    assert_eq!(
        outcomes(&report, "Harvard University"),
        vec![Outcome::Saved, Outcome::Saved, Outcome::Saved]
    );
    assert_eq!(report.entities_attempted, 2);
    assert_eq!(report.saved, 4);
    assert_eq!(report.failed, 2);
    assert_eq!(browser.launches(), 2);
    assert!(!report.interrupted);
}

#[tokio::test]
async fn test_launch_failure_marks_entity_failed() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let browser = FakeBrowser::new();
    browser.state.lock().unwrap().failing_launches = 1;

    let mut orch = orchestrator(&browser, &config);
    let report = orch
        .run(&[entity("Yale")], &[PageType::Main, PageType::Paying], RunMode::All)
        .await;

    assert_eq!(report.failed, 2);
    assert!(report
        .results
        .iter()
        .all(|r| r.error_detail.as_deref() == Some("browser unavailable")));
}

#[tokio::test]
async fn test_single_mode_and_canonical_order() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let dir = directory();
    let browser = FakeBrowser::new();
    for page_type in [PageType::Main, PageType::CampusInfo] {
        browser.set_page(
            &url("princeton-university-2627", page_type),
            FakePage::ok(profile_html(&page_type.to_string())),
        );
    }

    let mut orch = orchestrator(&browser, &config);
    let report = orch
        .run(
            dir.list_all(),
            &[PageType::CampusInfo, PageType::Main],
            RunMode::Single,
        )
        .await;

    assert_eq!(report.entities_attempted, 1);
    assert_eq!(
        browser.navigations(),
        vec![
            url("princeton-university-2627", PageType::Main),
            url("princeton-university-2627", PageType::CampusInfo),
        ]
    );
}

#[tokio::test]
async fn test_cancelled_run_stops_before_next_entity() {
    let tmp = tempfile::tempdir().unwrap();
    let config = config_in(&tmp);
    let browser = FakeBrowser::new();

    let mut orch = orchestrator(&browser, &config);
    orch.cancellation_token().cancel();
    let report = orch
        .run(directory().list_all(), &PageType::ALL, RunMode::All)
        .await;

    assert!(report.interrupted);
    assert_eq!(report.entities_attempted, 0);
    assert!(report.results.is_empty());
    assert_eq!(browser.launches(), 0);
}
