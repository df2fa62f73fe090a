use super::*;

use std::collections::VecDeque;

use axum::{
    extract::{RawQuery, State},
    http::StatusCode,
    response::Html,
    routing::get,
    Router,
};
use binder_core::{BinderConfig, Document, Runtime};
use serde_json::json;
use tokio::{net::TcpListener, sync::oneshot};

use crate::fetcher::HttpFetcher;

struct RecordingFetcher {
    urls: Mutex<Vec<String>>,
    body: String,
    fail: bool,
}

impl RecordingFetcher {
    fn ok(body: &str) -> Self {
        Self {
            urls: Mutex::new(Vec::new()),
            body: body.to_string(),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::ok("")
        }
    }

    fn urls(&self) -> Vec<String> {
        self.urls.lock().expect("urls").clone()
    }
}

#[async_trait]
impl ContentFetcher for RecordingFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, BinderError> {
        self.urls.lock().expect("urls").push(url.to_string());
        if self.fail {
            return Err(BinderError::network(url.as_str(), "connection refused"));
        }
        Ok(self.body.clone())
    }
}

/// A controller that fetched markup may contain.
struct Child;

#[async_trait]
impl Behavior for Child {
    fn actions() -> &'static ActionTable<Self> {
        static TABLE: OnceLock<ActionTable<Child>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ActionTable::new().action("save", |child: Controller<Child>, _event| async move {
                child.set_data("saved", json!(true));
                Ok(())
            })
        })
    }
}

/// Each fetch waits for the next gate to be opened with a body.
struct GatedFetcher {
    gates: Mutex<VecDeque<oneshot::Receiver<String>>>,
}

impl GatedFetcher {
    fn new(gates: impl IntoIterator<Item = oneshot::Receiver<String>>) -> Self {
        Self {
            gates: Mutex::new(gates.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ContentFetcher for GatedFetcher {
    async fn fetch(&self, url: &Url) -> Result<String, BinderError> {
        let gate = self.gates.lock().expect("gates").pop_front();
        match gate {
            Some(gate) => gate
                .await
                .map_err(|_| BinderError::network(url.as_str(), "gate dropped")),
            None => Err(BinderError::network(url.as_str(), "no gate left")),
        }
    }
}

async fn mount(
    markup: &str,
    config: BinderConfig,
    fetcher: Arc<dyn ContentFetcher>,
) -> (Arc<ElementRegistry>, Controller<DynamicFrame>) {
    let document = Document::parse(markup).expect("parse");
    let registry = ElementRegistry::new(Runtime::new(document, config));
    define(&registry, fetcher);
    registry.upgrade(registry.document().root()).await;
    let node = registry
        .document()
        .query_selector(registry.document().root(), FRAME_TAG)
        .expect("selector")
        .expect("frame node");
    let frame = registry.controller::<DynamicFrame>(node).expect("frame");
    (registry, frame)
}

fn pairs(expected: &[(&str, &str)]) -> Vec<(String, String)> {
    expected
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

type Queries = Arc<Mutex<Vec<String>>>;

async fn items(State(queries): State<Queries>, RawQuery(query): RawQuery) -> Html<&'static str> {
    queries
        .lock()
        .expect("queries")
        .push(query.unwrap_or_default());
    Html("<div>X</div>")
}

async fn spawn_server() -> anyhow::Result<(String, Queries)> {
    let queries: Queries = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .route("/items", get(items))
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, Html("<p>gone</p>")) }),
        )
        .with_state(Arc::clone(&queries));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), queries))
}

#[tokio::test]
async fn loads_relative_url_with_params_end_to_end() -> anyhow::Result<()> {
    let (origin, queries) = spawn_server().await?;
    let config = BinderConfig {
        origin: Some(origin),
        ..BinderConfig::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="/items" :param-page="2"></dynamic-frame>"#,
        config,
        fetcher,
    )
    .await;

    assert_eq!(*queries.lock().expect("queries"), ["page=2"]);
    assert_eq!(frame.behavior().last_load_succeeded(), Some(true));
    assert_eq!(frame.mount_point(), frame.node());
    assert_eq!(
        registry.document().inner_html(frame.mount_point()),
        "<div>X</div>"
    );
    Ok(())
}

#[tokio::test]
async fn error_status_bodies_are_still_spliced() -> anyhow::Result<()> {
    let (origin, _queries) = spawn_server().await?;
    let config = BinderConfig {
        origin: Some(origin),
        ..BinderConfig::default()
    };
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="/missing"></dynamic-frame>"#,
        config,
        fetcher,
    )
    .await;

    assert_eq!(
        registry.document().inner_html(frame.mount_point()),
        "<p>gone</p>"
    );
    Ok(())
}

#[tokio::test]
async fn only_the_latest_load_reaches_the_mount_point() {
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    let fetcher = Arc::new(GatedFetcher::new([first_rx, second_rx]));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/items" :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher,
    )
    .await;

    let first = tokio::spawn({
        let frame = frame.clone();
        async move { frame.load_content(&Value::Null, SpliceMode::Replace).await }
    });
    settle().await;
    assert_eq!(frame.behavior().pending_loads(), 1);

    let second = tokio::spawn({
        let frame = frame.clone();
        async move { frame.load_content(&Value::Null, SpliceMode::Replace).await }
    });
    settle().await;

    second_tx
        .send("<p>second</p>".to_string())
        .expect("second gate open");
    assert!(second.await.expect("join second"));

    let _ = first_tx.send("<p>first</p>".to_string());
    assert!(!first.await.expect("join first"));

    assert_eq!(
        registry.document().inner_html(frame.mount_point()),
        "<p>second</p>"
    );
    assert_eq!(frame.behavior().pending_loads(), 0);
}

#[tokio::test]
async fn array_values_repeat_their_key() {
    let fetcher = Arc::new(RecordingFetcher::ok("<i>ok</i>"));
    let (_registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/items" :param-page="2" :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    let values = json!({"tag": ["a", "b"]});

    assert_eq!(
        frame.params(&values),
        pairs(&[("tag", "a"), ("tag", "b"), ("page", "2")])
    );
    assert!(frame.load_content(&values, SpliceMode::Replace).await);
    assert_eq!(
        fetcher.urls(),
        ["http://frames.test/items?tag=a&tag=b&page=2"]
    );
}

#[tokio::test]
async fn missing_or_unresolvable_url_issues_no_request() {
    let fetcher = Arc::new(RecordingFetcher::ok("<i>ok</i>"));
    let (_registry, frame) = mount(
        r#"<dynamic-frame :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    assert!(frame.endpoint().is_err());
    assert!(!frame.load_content(&Value::Null, SpliceMode::Replace).await);

    let (_registry, relative) = mount(
        r#"<dynamic-frame :url="/items" :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    assert!(!relative.load_content(&Value::Null, SpliceMode::Replace).await);
    assert!(fetcher.urls().is_empty());
}

#[tokio::test]
async fn append_mode_targets_the_mount_point_selector() {
    let fetcher = Arc::new(RecordingFetcher::ok("<li>n</li>"));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/list" :mount-point="ul" :render-on-init="false"><h1>title</h1><ul></ul></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher,
    )
    .await;
    let list = registry
        .document()
        .query_selector(frame.node(), "ul")
        .expect("selector")
        .expect("ul");
    assert_eq!(frame.mount_point(), list);

    assert!(frame.load_content(&Value::Null, SpliceMode::Append).await);
    assert!(frame.load_content(&Value::Null, SpliceMode::Append).await);

    assert_eq!(registry.document().inner_html(list), "<li>n</li><li>n</li>");
    assert_eq!(
        registry.document().inner_html(frame.node()),
        "<h1>title</h1><ul><li>n</li><li>n</li></ul>"
    );
}

#[tokio::test]
async fn explicit_mount_point_survives_rebinds() {
    let fetcher = Arc::new(RecordingFetcher::ok("<b>in</b>"));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x" :render-on-init="false"></dynamic-frame><aside></aside>"#,
        BinderConfig::default(),
        fetcher,
    )
    .await;
    let document = registry.document();
    let aside = document
        .query_selector(document.root(), "aside")
        .expect("selector")
        .expect("aside");

    frame.set_mount_point(aside);
    frame.bind();
    assert!(frame.load_content(&Value::Null, SpliceMode::Replace).await);
    assert_eq!(document.inner_html(aside), "<b>in</b>");
    assert_eq!(document.inner_html(frame.node()), "");
}

#[tokio::test(start_paused = true)]
async fn delay_sets_a_minimum_load_time() {
    let fetcher = Arc::new(RecordingFetcher::ok("<i>ok</i>"));
    let (_registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x" :delay="200ms" :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher,
    )
    .await;
    assert_eq!(frame.behavior().delay(), Duration::from_millis(200));

    let started = tokio::time::Instant::now();
    assert!(frame.load_content(&Value::Null, SpliceMode::Replace).await);
    assert!(started.elapsed() >= Duration::from_millis(200));
}

fn recreated_scripts(registry: &ElementRegistry, frame: &Controller<DynamicFrame>) -> usize {
    let document = registry.document();
    document
        .children(frame.node())
        .into_iter()
        .filter(|node| document.get_attribute(*node, "type").as_deref() == Some("text/javascript"))
        .count()
}

#[tokio::test]
async fn spliced_scripts_are_recreated_when_enabled() {
    let body = r#"<p>hi</p><script src="/a.js"></script><script>run()</script>"#;

    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x" :execute-scripts></dynamic-frame>"#,
        BinderConfig::default(),
        Arc::new(RecordingFetcher::ok(body)),
    )
    .await;
    assert!(frame.behavior().executes_scripts());
    assert_eq!(recreated_scripts(&registry, &frame), 2);

    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x"></dynamic-frame>"#,
        BinderConfig::default(),
        Arc::new(RecordingFetcher::ok(body)),
    )
    .await;
    assert_eq!(recreated_scripts(&registry, &frame), 0);
}

#[tokio::test]
async fn spliced_markup_is_bound() {
    let fetcher = Arc::new(RecordingFetcher::ok(
        r#"<button @click="refresh">again</button><span :render>{this.tag}</span>"#,
    ));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    let document = registry.document();
    let button = document
        .query_selector(frame.node(), "button")
        .expect("selector")
        .expect("button");
    let span = document
        .query_selector(frame.node(), "span")
        .expect("selector")
        .expect("span");

    assert_eq!(document.listener_count(button, "click"), 1);
    assert_eq!(document.inner_html(span), FRAME_TAG);

    document.dispatch_event(button, Event::new("click"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(fetcher.urls().len(), 2);
}

#[tokio::test]
async fn append_action_uses_event_detail_as_params() {
    let fetcher = Arc::new(RecordingFetcher::ok("<i>more</i>"));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/feed" :render-on-init="false"><button @click="appendContent">more</button></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    let document = registry.document();
    let button = document
        .query_selector(frame.node(), "button")
        .expect("selector")
        .expect("button");

    document.dispatch_event(button, Event::new("click").with_detail(json!({"after": 10})));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(fetcher.urls(), ["http://frames.test/feed?after=10"]);
    assert_eq!(
        document.inner_html(frame.node()),
        r#"<button @click="appendContent">more</button><i>more</i>"#
    );
}

#[tokio::test]
async fn failed_loads_leave_content_untouched() {
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x" :render-on-init="false"><em>keep</em></dynamic-frame>"#,
        BinderConfig::default(),
        Arc::new(RecordingFetcher::failing()),
    )
    .await;
    assert_eq!(frame.behavior().last_load_succeeded(), None);

    assert!(!frame.load_content(&Value::Null, SpliceMode::Replace).await);
    assert_eq!(frame.behavior().last_load_succeeded(), Some(false));
    assert_eq!(
        registry.document().inner_html(frame.node()),
        "<em>keep</em>"
    );
}

#[tokio::test]
async fn removal_cancels_outstanding_loads() {
    let (_gate, gate_rx) = oneshot::channel::<String>();
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x" :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        Arc::new(GatedFetcher::new([gate_rx])),
    )
    .await;

    let load = tokio::spawn({
        let frame = frame.clone();
        async move { frame.load_content(&Value::Null, SpliceMode::Replace).await }
    });
    settle().await;

    registry.remove(frame.node());
    assert!(!load.await.expect("join"));
}

#[tokio::test(start_paused = true)]
async fn auto_refresh_reloads_until_removed() {
    let fetcher = Arc::new(RecordingFetcher::ok("<i>tick</i>"));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/x" :auto-refresh="1s" :render-on-init="false"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    assert!(frame.behavior().has_auto_refresh());

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(fetcher.urls().len(), 3);

    registry.remove(frame.node());
    assert!(!frame.behavior().has_auto_refresh());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fetcher.urls().len(), 3);
}

#[tokio::test]
async fn spliced_controllers_own_their_nodes() {
    let fetcher: Arc<dyn ContentFetcher> = Arc::new(RecordingFetcher::ok(
        r#"<x-child><button @click="save" :bind="btn"></button></x-child>"#,
    ));
    let document = Document::parse(r#"<dynamic-frame :url="http://frames.test/child"></dynamic-frame>"#)
        .expect("parse");
    let registry = ElementRegistry::new(Runtime::new(document, BinderConfig::default()));
    define(&registry, fetcher);
    registry.define("x-child", || Child);
    registry.upgrade(registry.document().root()).await;

    let document = registry.document();
    let first = |selector: &str| {
        document
            .query_selector(document.root(), selector)
            .expect("selector")
            .expect("node present")
    };
    let frame = registry
        .controller::<DynamicFrame>(first(FRAME_TAG))
        .expect("frame");
    let child = registry
        .controller::<Child>(first("x-child"))
        .expect("spliced child is upgraded");
    let button = first("button");

    assert!(frame.bound_nodes("btn").is_empty());
    assert!(frame.event_registrations().is_empty());
    assert_eq!(child.bound_nodes("btn"), [button]);
    assert_eq!(document.listener_count(button, "click"), 1);

    document.dispatch_event(button, Event::new("click"));
    settle().await;
    assert_eq!(child.data()["saved"], json!(true));

    // a reload replaces the child instead of stacking a second one
    frame.refresh().await;
    assert_eq!(registry.instance_count(), 2);
    let replaced = registry
        .controller::<Child>(first("x-child"))
        .expect("reloaded child is upgraded");
    assert!(replaced.data()["saved"].is_null());
    assert_eq!(document.listener_count(first("button"), "click"), 1);
    assert!(frame.bound_nodes("btn").is_empty());
}

#[tokio::test]
async fn repeated_reloads_do_not_grow_the_document() {
    let fetcher = Arc::new(RecordingFetcher::ok(
        r#"<ul><li @click="refresh">a</li><li>b</li></ul>"#,
    ));
    let (registry, frame) = mount(
        r#"<dynamic-frame :url="http://frames.test/list"></dynamic-frame>"#,
        BinderConfig::default(),
        fetcher.clone(),
    )
    .await;
    let baseline = registry.document().node_count();

    for _ in 0..50 {
        assert!(frame.load_content(&Value::Null, SpliceMode::Replace).await);
    }
    assert_eq!(registry.document().node_count(), baseline);
    assert_eq!(fetcher.urls().len(), 51);
}
