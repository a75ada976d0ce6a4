//! End-to-end batch runs against in-memory collaborators
//!
//! Pages are served by a `StaticPageFetcher`, records live in a recording
//! store, and the accessibility check is scripted per URL.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};

use cafe_watch_lib::application::orchestrator::INACCESSIBLE_REASON;
use cafe_watch_lib::application::{RecordOutcome, RunOrchestrator};
use cafe_watch_lib::domain::{
    AccessibilityCheck, Blocklist, FieldMapping, FieldUpdates, FieldValue, RecordStore,
    SkipReason, StoredRecord,
};
use cafe_watch_lib::infrastructure::config::{
    BrowserConfig, CollectionConfig, ExtractionConfig, RunConfig,
};
use cafe_watch_lib::infrastructure::{
    BrowserDriver, Dialog, DriverError, DriverResult, ElementHandle, HtmlPageDriver,
    PostExtractor, StaticPageFetcher,
};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingStore {
    collections: Mutex<HashMap<String, Vec<StoredRecord>>>,
    updates: Mutex<Vec<(String, FieldUpdates)>>,
    failing_records: Mutex<HashSet<String>>,
}

impl RecordingStore {
    fn with_collection(self, database_id: &str, records: Vec<StoredRecord>) -> Self {
        self.collections
            .lock()
            .unwrap()
            .insert(database_id.to_string(), records);
        self
    }

    fn fail_writes_for(&self, record_id: &str) {
        self.failing_records
            .lock()
            .unwrap()
            .insert(record_id.to_string());
    }

    fn updates(&self) -> Vec<(String, FieldUpdates)> {
        self.updates.lock().unwrap().clone()
    }

    fn updates_for(&self, record_id: &str) -> Vec<FieldUpdates> {
        self.updates()
            .into_iter()
            .filter(|(id, _)| id == record_id)
            .map(|(_, fields)| fields)
            .collect()
    }
}

#[async_trait]
impl RecordStore for RecordingStore {
    async fn fetch_records(&self, collection_id: &str) -> Result<Vec<StoredRecord>> {
        self.collections
            .lock()
            .unwrap()
            .get(collection_id)
            .cloned()
            .ok_or_else(|| anyhow!("database {collection_id} not found"))
    }

    async fn update_record(&self, record_id: &str, fields: &FieldUpdates) -> Result<()> {
        if self.failing_records.lock().unwrap().contains(record_id) {
            bail!("simulated write failure for {record_id}");
        }
        self.updates
            .lock()
            .unwrap()
            .push((record_id.to_string(), fields.clone()));
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Verdict {
    Inaccessible,
    Fails,
    Panics,
}

#[derive(Default)]
struct ScriptedAccessibility {
    verdicts: HashMap<String, Verdict>,
}

impl ScriptedAccessibility {
    fn with(mut self, url: &str, verdict: Verdict) -> Self {
        self.verdicts.insert(url.to_string(), verdict);
        self
    }
}

#[async_trait]
impl AccessibilityCheck for ScriptedAccessibility {
    async fn is_post_accessible(&self, url: &str) -> Result<bool> {
        match self.verdicts.get(url) {
            None => Ok(true),
            Some(Verdict::Inaccessible) => Ok(false),
            Some(Verdict::Fails) => bail!("connection reset"),
            Some(Verdict::Panics) => panic!("accessibility check exploded for {url}"),
        }
    }
}

/// Panics on the first page text read and logs every context change
struct PanicsInFrame {
    driver: HtmlPageDriver<StaticPageFetcher>,
    panicked: bool,
    calls: Arc<Mutex<Vec<String>>>,
}

impl PanicsInFrame {
    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BrowserDriver for PanicsInFrame {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> DriverResult<()> {
        self.log(format!("navigate {url}"));
        self.driver.navigate(url, timeout).await
    }
    async fn current_dialog(&mut self) -> DriverResult<Option<Dialog>> {
        self.driver.current_dialog().await
    }
    async fn accept_dialog(&mut self) -> DriverResult<()> {
        self.driver.accept_dialog().await
    }
    async fn switch_to_frame(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        self.log("switch_to_frame".to_string());
        self.driver.switch_to_frame(selector, timeout).await
    }
    async fn switch_to_top(&mut self) -> DriverResult<()> {
        self.driver.switch_to_top().await?;
        let frame_elements = self.driver.query_elements("li.CommentItem").await?.len();
        self.log(format!("switch_to_top ({frame_elements} frame elements visible)"));
        Ok(())
    }
    async fn query_elements(&mut self, selector: &str) -> DriverResult<Vec<ElementHandle>> {
        self.driver.query_elements(selector).await
    }
    async fn query_within(
        &mut self,
        element: &ElementHandle,
        selector: &str,
    ) -> DriverResult<Vec<ElementHandle>> {
        self.driver.query_within(element, selector).await
    }
    async fn element_text(&mut self, element: &ElementHandle) -> DriverResult<String> {
        self.driver.element_text(element).await
    }
    async fn element_attribute(
        &mut self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>> {
        self.driver.element_attribute(element, name).await
    }
    async fn page_text(&mut self) -> DriverResult<String> {
        if !self.panicked {
            self.panicked = true;
            self.log("page_text panicked".to_string());
            panic!("renderer crashed inside frame");
        }
        self.driver.page_text().await
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn post_url(n: u32) -> String {
    format!("https://cafe.naver.com/feko/{n}")
}

fn frame_url(n: u32) -> String {
    format!("https://cafe.naver.com/ArticleRead.nhn?articleid={n}")
}

fn top_html(n: u32) -> String {
    format!(
        r#"<html><body><iframe id="cafe_main" src="/ArticleRead.nhn?articleid={n}"></iframe></body></html>"#
    )
}

/// Article with `external` visitor comments and `author` replies
fn article_html(title: &str, views: u32, external: usize, author: usize) -> String {
    let mut comments = String::new();
    for i in 0..external {
        comments.push_str(&format!(
            r#"<li class="CommentItem"><span class="comment_nickname">방문자{i}</span> 정보 부탁드려요</li>"#
        ));
    }
    for _ in 0..author {
        comments.push_str(
            r#"<li class="CommentItem"><span class="comment_nickname">글쓴이</span><em class="comment_writer_badge"></em> 쪽지 드렸습니다</li>"#,
        );
    }
    format!(
        r#"<html><body>
            <h3 class="title_text">{title}</h3>
            <span class="count">조회 {views}</span>
            <ul class="comment_list">{comments}</ul>
        </body></html>"#
    )
}

async fn serve_article(fetcher: &StaticPageFetcher, n: u32, article: &str) {
    fetcher.insert(post_url(n), top_html(n)).await;
    fetcher.insert(frame_url(n), article.to_string()).await;
}

fn mapping() -> FieldMapping {
    FieldMapping {
        refresh_flag: Some("새로고침".to_string()),
        block_reason: Some("불가 사유".to_string()),
        ..FieldMapping::default()
    }
}

fn recent() -> NaiveDate {
    Utc::now().date_naive() - chrono::Duration::days(3)
}

fn stored(id: &str, url: &str, status: &str, total: u64, external: u64) -> StoredRecord {
    StoredRecord::new(id)
        .with("URL", FieldValue::Text(url.to_string()))
        .with("상태", FieldValue::Status(status.to_string()))
        .with("댓글", FieldValue::Number(total))
        .with("외부 댓글 수", FieldValue::Number(external))
        .with(
            "날짜",
            FieldValue::Date(recent().and_hms_opt(0, 0, 0).unwrap().and_utc()),
        )
}

fn extractor() -> PostExtractor {
    let browser = BrowserConfig {
        settle_delay_ms: 0,
        page_load_timeout_secs: 1,
        frame_timeout_secs: 1,
        ..BrowserConfig::default()
    };
    PostExtractor::new(&browser, &ExtractionConfig::default()).unwrap()
}

struct Harness {
    fetcher: StaticPageFetcher,
    store: Arc<RecordingStore>,
    orchestrator: RunOrchestrator,
}

fn harness_with(
    store: RecordingStore,
    accessibility: ScriptedAccessibility,
    inter_record_delay_ms: u64,
) -> Harness {
    let fetcher = StaticPageFetcher::new();
    let store = Arc::new(store);
    let run = RunConfig {
        inter_record_delay_ms,
        ..RunConfig::default()
    };
    let orchestrator = RunOrchestrator::new(
        Box::new(HtmlPageDriver::new(fetcher.clone()).unwrap()),
        store.clone(),
        Arc::new(accessibility),
        extractor(),
        Blocklist::default(),
        &run,
    );
    Harness {
        fetcher,
        store,
        orchestrator,
    }
}

fn harness() -> Harness {
    harness_with(RecordingStore::default(), ScriptedAccessibility::default(), 0)
}

// ---------------------------------------------------------------------------
// Batch behaviour
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_external_comments_confirm_and_raise_flag() {
    let mut h = harness();
    serve_article(&h.fetcher, 1, &article_html("리프팅 후기", 1204, 3, 2)).await;
    let records = vec![stored("page-1", &post_url(1), "대기", 2, 1)];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.confirmed, 1);
    assert_eq!(report.new_activity, 1);
    let updates = h.store.updates_for("page-1");
    assert_eq!(updates.len(), 1);
    let fields = &updates[0];
    assert_eq!(fields["상태"], FieldValue::Status("확인완료".into()));
    assert_eq!(fields["댓글"], FieldValue::Number(5));
    assert_eq!(fields["외부 댓글 수"], FieldValue::Number(3));
    assert_eq!(fields["조회수"], FieldValue::Number(1204));
    assert_eq!(fields["글 제목"], FieldValue::Text("리프팅 후기".into()));
    assert_eq!(fields["NEW"], FieldValue::Checkbox(true));
    assert!(fields.contains_key("마지막 수집"));
}

#[tokio::test]
async fn author_replies_alone_never_raise_flag() {
    let mut h = harness();
    serve_article(&h.fetcher, 2, &article_html("후기", 10, 3, 4)).await;
    let records = vec![stored("page-2", &post_url(2), "대기", 4, 3)];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.confirmed, 1);
    assert_eq!(report.new_activity, 0);
    let fields = &h.store.updates_for("page-2")[0];
    assert_eq!(fields["댓글"], FieldValue::Number(7));
    assert!(!fields.contains_key("NEW"));
}

#[tokio::test]
async fn deletion_dialog_writes_status_only() {
    let mut h = harness();
    h.fetcher
        .insert(
            post_url(3),
            r#"<html><head><script>alert("이미 삭제된 게시글입니다");</script></head></html>"#,
        )
        .await;
    let records = vec![stored("page-3", &post_url(3), "대기", 4, 2)];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.deleted, 1);
    let fields = &h.store.updates_for("page-3")[0];
    assert_eq!(fields.len(), 2);
    assert_eq!(fields["상태"], FieldValue::Status("삭제".into()));
    assert!(fields.contains_key("마지막 수집"));
}

#[tokio::test(start_paused = true)]
async fn navigation_timeout_persists_nothing() {
    let mut h = harness();
    h.fetcher
        .insert_delayed(post_url(4), top_html(4), Duration::from_secs(30))
        .await;
    let records = vec![stored("page-4", &post_url(4), "대기", 1, 1)];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.deferred, 1);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn network_fault_persists_nothing() {
    let mut h = harness();
    h.fetcher
        .insert_failure(post_url(5), DriverError::Network("connection refused".into()))
        .await;
    let records = vec![stored("page-5", &post_url(5), "대기", 1, 1)];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.deferred, 1);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn blocklisted_url_is_unavailable_without_extraction() {
    let mut h = harness();
    let url = "https://gnun.link/abc123";
    let records = vec![stored("page-6", url, "대기", 0, 0)];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.unavailable, 1);
    let fields = &h.store.updates_for("page-6")[0];
    assert_eq!(fields["상태"], FieldValue::Status("불가".into()));
    assert_eq!(
        fields["불가 사유"],
        FieldValue::Text("단축 URL (리다이렉트 차단)".into())
    );
    assert!(!fields.contains_key("댓글"));
    assert!(h.fetcher.requests().await.is_empty());
}

#[tokio::test]
async fn text_fallback_sets_external_equal_to_total() {
    let mut h = harness();
    let article = r#"<html><body>
        <h3 class="title_text">모바일 레이아웃 글</h3>
        <div class="info">조회 56 댓글 7</div>
    </body></html>"#;
    serve_article(&h.fetcher, 7, article).await;
    let records = vec![stored("page-7", &post_url(7), "대기", 2, 2)];

    h.orchestrator.run_batch(&records, &mapping(), false).await;

    let fields = &h.store.updates_for("page-7")[0];
    assert_eq!(fields["댓글"], FieldValue::Number(7));
    assert_eq!(fields["외부 댓글 수"], FieldValue::Number(7));
    assert_eq!(fields["NEW"], FieldValue::Checkbox(true));
}

#[tokio::test]
async fn terminal_records_need_force() {
    let mut h = harness();
    serve_article(&h.fetcher, 8, &article_html("a", 1, 1, 0)).await;
    serve_article(&h.fetcher, 9, &article_html("b", 1, 1, 0)).await;
    let records = vec![
        stored("page-8", &post_url(8), "삭제", 0, 0),
        stored("page-9", &post_url(9), "불가", 0, 0),
    ];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;
    assert_eq!(report.skipped, 2);
    assert!(h.store.updates().is_empty());
    assert!(h.fetcher.requests().await.is_empty());

    let report = h.orchestrator.run_batch(&records, &mapping(), true).await;
    assert_eq!(report.confirmed, 2);
}

#[tokio::test]
async fn unknown_status_label_is_only_observed_under_force() {
    let mut h = harness();
    serve_article(&h.fetcher, 10, &article_html("a", 1, 0, 0)).await;
    let records = vec![stored("page-10", &post_url(10), "보류", 0, 0)];

    let outcome = h
        .orchestrator
        .process_record(&mapping().decode(&records[0]), &mapping(), false)
        .await
        .unwrap();
    assert_eq!(outcome, RecordOutcome::Skipped(SkipReason::NotWaiting(None)));

    let report = h.orchestrator.run_batch(&records, &mapping(), true).await;
    assert_eq!(report.confirmed, 1);
}

#[tokio::test]
async fn stale_posts_get_zero_writes_even_under_force() {
    let mut h = harness();
    serve_article(&h.fetcher, 11, &article_html("old", 1, 9, 0)).await;
    let old = Utc::now().date_naive() - chrono::Duration::days(120);
    let records = vec![stored("page-11", &post_url(11), "대기", 0, 0).with(
        "날짜",
        FieldValue::Date(old.and_hms_opt(0, 0, 0).unwrap().and_utc()),
    )];

    let report = h.orchestrator.run_batch(&records, &mapping(), true).await;

    assert_eq!(report.skipped, 1);
    assert!(h.store.updates().is_empty());
    assert!(h.fetcher.requests().await.is_empty());
}

#[tokio::test]
async fn missing_url_is_skipped_even_under_force() {
    let mut h = harness();
    let records =
        vec![StoredRecord::new("page-12").with("상태", FieldValue::Status("대기".into()))];

    let report = h.orchestrator.run_batch(&records, &mapping(), true).await;

    assert_eq!(report.skipped, 1);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn accessibility_gate() {
    let accessibility = ScriptedAccessibility::default()
        .with(&post_url(13), Verdict::Inaccessible)
        .with(&post_url(14), Verdict::Fails);
    let mut h = harness_with(RecordingStore::default(), accessibility, 0);
    let records = vec![
        stored("page-13", &post_url(13), "대기", 0, 0),
        stored("page-14", &post_url(14), "대기", 0, 0),
    ];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.unavailable, 1);
    assert_eq!(report.deferred, 1);
    let fields = &h.store.updates_for("page-13")[0];
    assert_eq!(fields["상태"], FieldValue::Status("불가".into()));
    assert_eq!(fields["불가 사유"], FieldValue::Text(INACCESSIBLE_REASON.into()));
    assert!(h.store.updates_for("page-14").is_empty());
    assert!(h.fetcher.requests().await.is_empty());
}

#[tokio::test]
async fn panicking_record_does_not_stop_the_batch() {
    let accessibility = ScriptedAccessibility::default().with(&post_url(15), Verdict::Panics);
    let mut h = harness_with(RecordingStore::default(), accessibility, 0);
    serve_article(&h.fetcher, 16, &article_html("다음 글", 3, 1, 0)).await;
    let records = vec![
        stored("page-15", &post_url(15), "대기", 0, 0),
        stored("page-16", &post_url(16), "대기", 0, 0),
    ];

    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.store.updates_for("page-16").len(), 1);
}

#[tokio::test]
async fn panic_inside_frame_resets_context_before_next_record() {
    let fetcher = StaticPageFetcher::new();
    serve_article(&fetcher, 30, &article_html("첫 글", 5, 2, 0)).await;
    serve_article(&fetcher, 31, &article_html("둘째 글", 7, 1, 1)).await;
    let calls = Arc::new(Mutex::new(Vec::new()));
    let driver = PanicsInFrame {
        driver: HtmlPageDriver::new(fetcher).unwrap(),
        panicked: false,
        calls: calls.clone(),
    };
    let store = Arc::new(RecordingStore::default());
    let mut orchestrator = RunOrchestrator::new(
        Box::new(driver),
        store.clone(),
        Arc::new(ScriptedAccessibility::default()),
        extractor(),
        Blocklist::default(),
        &RunConfig {
            inter_record_delay_ms: 0,
            ..RunConfig::default()
        },
    );
    let records = vec![
        stored("page-30", &post_url(30), "대기", 0, 0),
        stored("page-31", &post_url(31), "대기", 0, 0),
    ];

    let report = orchestrator.run_batch(&records, &mapping(), false).await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.confirmed, 1);
    assert!(store.updates_for("page-30").is_empty());
    let fields = &store.updates_for("page-31")[0];
    assert_eq!(fields.get("댓글"), Some(&FieldValue::Number(2)));
    assert_eq!(fields.get("외부 댓글 수"), Some(&FieldValue::Number(1)));

    let calls = calls.lock().unwrap().clone();
    assert_eq!(
        calls[..5].to_vec(),
        vec![
            format!("navigate {}", post_url(30)),
            "switch_to_frame".to_string(),
            "page_text panicked".to_string(),
            "switch_to_top (0 frame elements visible)".to_string(),
            format!("navigate {}", post_url(31)),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_write_skips_delay_and_batch_continues() {
    let store = RecordingStore::default();
    store.fail_writes_for("page-17");
    let mut h = harness_with(store, ScriptedAccessibility::default(), 600);
    serve_article(&h.fetcher, 17, &article_html("a", 1, 1, 0)).await;
    serve_article(&h.fetcher, 18, &article_html("b", 1, 1, 0)).await;
    let records = vec![
        stored("page-17", &post_url(17), "대기", 0, 0),
        stored("page-18", &post_url(18), "대기", 0, 0),
    ];

    let started = tokio::time::Instant::now();
    let report = h.orchestrator.run_batch(&records, &mapping(), false).await;
    let elapsed = started.elapsed();

    assert_eq!(report.failed, 1);
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.store.updates_for("page-18").len(), 1);
    // only the successful write is followed by the delay
    assert!(elapsed >= Duration::from_millis(600));
    assert!(elapsed < Duration::from_millis(1200));
}

// ---------------------------------------------------------------------------
// Collections
// ---------------------------------------------------------------------------

fn collection(name: &str, database_id: &str) -> CollectionConfig {
    CollectionConfig {
        name: name.to_string(),
        database_id: database_id.to_string(),
        fields: mapping(),
    }
}

#[tokio::test]
async fn refresh_checkbox_forces_batch_and_is_cleared() {
    let records = vec![
        stored("page-20", &post_url(20), "확인완료", 1, 1)
            .with("새로고침", FieldValue::Checkbox(true)),
        stored("page-21", &post_url(21), "확인완료", 1, 1),
    ];
    let store = RecordingStore::default().with_collection("db-main", records);
    let mut h = harness_with(store, ScriptedAccessibility::default(), 0);
    serve_article(&h.fetcher, 20, &article_html("a", 5, 2, 0)).await;
    serve_article(&h.fetcher, 21, &article_html("b", 5, 1, 0)).await;

    let report = h
        .orchestrator
        .run_collection(&collection("main", "db-main"), false)
        .await
        .unwrap();

    assert_eq!(report.confirmed, 2);
    assert_eq!(report.new_activity, 1);
    for id in ["page-20", "page-21"] {
        let cleared = h
            .store
            .updates_for(id)
            .into_iter()
            .filter(|fields| fields.get("새로고침") == Some(&FieldValue::Checkbox(false)))
            .count();
        assert_eq!(cleared, 1, "refresh flag not cleared on {id}");
    }
}

#[tokio::test]
async fn without_refresh_checkbox_confirmed_records_are_left_alone() {
    let records = vec![stored("page-22", &post_url(22), "확인완료", 1, 1)];
    let store = RecordingStore::default().with_collection("db-main", records);
    let mut h = harness_with(store, ScriptedAccessibility::default(), 0);

    let report = h
        .orchestrator
        .run_collection(&collection("main", "db-main"), false)
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert!(h.store.updates().is_empty());
}

#[tokio::test]
async fn unreadable_collection_does_not_stop_the_others() {
    let records = vec![stored("page-23", &post_url(23), "대기", 0, 0)];
    let store = RecordingStore::default().with_collection("db-ok", records);
    let mut h = harness_with(store, ScriptedAccessibility::default(), 0);
    serve_article(&h.fetcher, 23, &article_html("a", 1, 1, 0)).await;

    let reports = h
        .orchestrator
        .run_collections(
            &[collection("broken", "db-missing"), collection("ok", "db-ok")],
            false,
        )
        .await;

    assert_eq!(reports.len(), 2);
    assert!(reports[0].1.is_none());
    assert_eq!(reports[1].1.map(|r| r.confirmed), Some(1));
}
