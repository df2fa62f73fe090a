use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use binder_core::{
    controller::{ActionTable, Args, Behavior, Controller, RepeatingTask},
    dom::Event,
    path,
    registry::ElementRegistry,
    util::{parse_boolean, parse_duration},
};
use serde_json::{Map, Value};
use shared::{
    domain::{NodeId, SpliceMode},
    error::BinderError,
};
use tracing::{debug, error, warn};
use url::Url;

use crate::{
    cancel::CancelToken,
    fetcher::ContentFetcher,
    scripts::{find_scripts, ReinsertScripts, ScriptHost},
};

pub const FRAME_TAG: &str = "dynamic-frame";
pub const PARAM_PREFIX: &str = ":param-";

#[derive(Default)]
struct FrameState {
    pending: Vec<CancelToken>,
    mount_point: Option<NodeId>,
    mount_override: Option<NodeId>,
    execute_scripts: bool,
    delay: Duration,
    auto_refresh: Option<RepeatingTask>,
    last_load: Option<bool>,
}

pub struct DynamicFrame {
    fetcher: Arc<dyn ContentFetcher>,
    scripts: Arc<dyn ScriptHost>,
    state: Mutex<FrameState>,
}

impl DynamicFrame {
    pub fn new(fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            fetcher,
            scripts: Arc::new(ReinsertScripts),
            state: Mutex::new(FrameState::default()),
        }
    }

    pub fn with_script_host(mut self, scripts: Arc<dyn ScriptHost>) -> Self {
        self.scripts = scripts;
        self
    }

    fn state(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn executes_scripts(&self) -> bool {
        self.state().execute_scripts
    }

    pub fn delay(&self) -> Duration {
        self.state().delay
    }

    pub fn pending_loads(&self) -> usize {
        self.state()
            .pending
            .iter()
            .filter(|token| !token.is_cancelled())
            .count()
    }

    pub fn has_auto_refresh(&self) -> bool {
        self.state().auto_refresh.is_some()
    }

    /// Outcome of the last load that was not cancelled, if any ran.
    pub fn last_load_succeeded(&self) -> Option<bool> {
        self.state().last_load
    }

    fn record_outcome(&self, ok: bool) {
        self.state().last_load = Some(ok);
    }

    /// Cancels every outstanding load and issues the token of a new one.
    fn issue_token(&self) -> CancelToken {
        let mut state = self.state();
        for token in state.pending.drain(..) {
            token.cancel();
        }
        let token = CancelToken::new();
        state.pending.push(token.clone());
        token
    }

    fn retire(&self, token: &CancelToken) {
        self.state().pending.retain(|pending| !pending.same_as(token));
    }

    fn resolve_mount_point(&self, ctl: &Controller<Self>) -> NodeId {
        if let Some(node) = self.state().mount_override {
            return node;
        }
        if let Some(selector) = ctl.arg("mountPoint").filter(|s| !s.is_empty()) {
            match ctl.document().query_selector(ctl.node(), &selector) {
                Ok(Some(node)) => return node,
                Ok(None) => warn!(
                    controller = ctl.tag(),
                    selector = %selector,
                    "mount point not found, splicing into the frame root"
                ),
                Err(err) => warn!(controller = ctl.tag(), error = %err, "invalid mount point selector"),
            }
        }
        ctl.root()
    }

    fn run_scripts(&self, ctl: &Controller<Self>, inserted: &[NodeId]) {
        if !self.executes_scripts() {
            return;
        }
        let scripts = find_scripts(ctl.document(), inserted);
        if !scripts.is_empty() {
            ctl.debug(&format!("re-executing {} spliced scripts", scripts.len()));
            self.scripts.execute(ctl.document(), ctl.node(), &scripts);
        }
    }
}

fn event_values(event: Option<Event>) -> Value {
    event
        .map(|event| event.detail().clone())
        .filter(Value::is_object)
        .unwrap_or(Value::Null)
}

#[async_trait]
impl Behavior for DynamicFrame {
    fn actions() -> &'static ActionTable<Self> {
        static TABLE: OnceLock<ActionTable<DynamicFrame>> = OnceLock::new();
        TABLE.get_or_init(|| {
            ActionTable::new()
                .action("refresh", |frame: Controller<DynamicFrame>, _event| async move {
                    frame.refresh().await;
                    Ok(())
                })
                .action("loadContent", |frame: Controller<DynamicFrame>, event| async move {
                    frame
                        .load_content(&event_values(event), SpliceMode::Replace)
                        .await;
                    Ok(())
                })
                .action("appendContent", |frame: Controller<DynamicFrame>, event| async move {
                    frame
                        .load_content(&event_values(event), SpliceMode::Append)
                        .await;
                    Ok(())
                })
        })
    }

    fn expose(&self, _ctl: &Controller<Self>) -> Map<String, Value> {
        let mut extra = Map::new();
        extra.insert("loading".into(), Value::Bool(self.pending_loads() > 0));
        extra
    }

    async fn init(&self, ctl: &Controller<Self>, args: &Args) -> anyhow::Result<()> {
        {
            let mut state = self.state();
            state.execute_scripts = args
                .get("executeScripts")
                .is_some_and(|raw| parse_boolean(raw));
            state.delay = args
                .get("delay")
                .and_then(|raw| parse_duration(raw))
                .unwrap_or_default();
        }
        if let Some(raw) = args.get("autoRefresh") {
            ctl.set_auto_refresh(parse_duration(raw));
        }
        Ok(())
    }

    fn bound(&self, ctl: &Controller<Self>) {
        let mount = self.resolve_mount_point(ctl);
        self.state().mount_point = Some(mount);
    }

    async fn render(&self, ctl: &Controller<Self>) -> anyhow::Result<()> {
        ctl.load_content(&Value::Null, SpliceMode::Replace).await;
        ctl.render_templates(None);
        Ok(())
    }

    fn disconnected(&self, _ctl: &Controller<Self>) {
        let (timer, pending) = {
            let mut state = self.state();
            (state.auto_refresh.take(), std::mem::take(&mut state.pending))
        };
        drop(timer);
        for token in pending {
            token.cancel();
        }
    }
}

#[async_trait]
pub trait FrameControl {
    fn mount_point(&self) -> NodeId;

    /// Pins the splice target to `node`, overriding `:mount-point`.
    fn set_mount_point(&self, node: NodeId);

    fn endpoint(&self) -> Result<Url, BinderError>;

    /// Supplied pairs first (arrays repeat their key), then `:param-*` attributes.
    fn params(&self, values: &Value) -> Vec<(String, String)>;

    /// Fetches and splices content. Returns whether content was spliced.
    async fn load_content(&self, values: &Value, mode: SpliceMode) -> bool;

    async fn refresh(&self);

    fn set_auto_refresh(&self, interval: Option<Duration>);
}

#[async_trait]
impl FrameControl for Controller<DynamicFrame> {
    fn mount_point(&self) -> NodeId {
        self.behavior()
            .state()
            .mount_point
            .unwrap_or_else(|| self.root())
    }

    fn set_mount_point(&self, node: NodeId) {
        let mut state = self.behavior().state();
        state.mount_override = Some(node);
        state.mount_point = Some(node);
    }

    fn endpoint(&self) -> Result<Url, BinderError> {
        let raw = self
            .arg("url")
            .filter(|url| !url.is_empty())
            .ok_or_else(|| {
                BinderError::configuration("DynamicFrame", self.tag(), "no :url attribute specified")
            })?;
        let invalid = |err: url::ParseError| {
            BinderError::configuration(
                "DynamicFrame",
                self.tag(),
                format!("invalid url '{raw}': {err}"),
            )
        };
        if raw.starts_with("http") {
            return Url::parse(&raw).map_err(invalid);
        }
        let origin = self.runtime().config().origin.clone().ok_or_else(|| {
            BinderError::configuration(
                "DynamicFrame",
                self.tag(),
                format!("relative url '{raw}' needs a configured origin"),
            )
        })?;
        Url::parse(&origin)
            .and_then(|base| base.join(&raw))
            .map_err(invalid)
    }

    fn params(&self, values: &Value) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Value::Object(map) = values {
            for (key, value) in map {
                match value {
                    Value::Array(items) => params.extend(
                        items
                            .iter()
                            .map(|item| (key.clone(), path::stringify(item))),
                    ),
                    other => params.push((key.clone(), path::stringify(other))),
                }
            }
        }
        for (name, value) in self.document().attributes(self.node()) {
            if let Some(key) = name.strip_prefix(PARAM_PREFIX) {
                params.push((key.to_string(), value));
            }
        }
        params
    }

    async fn load_content(&self, values: &Value, mode: SpliceMode) -> bool {
        let mut url = match self.endpoint() {
            Ok(url) => url,
            Err(err) => {
                error!(controller = self.tag(), "{err}");
                self.behavior().record_outcome(false);
                return false;
            }
        };
        let params = self.params(values);
        if params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(params.iter());
        }

        let frame = self.behavior();
        let token = frame.issue_token();
        let delay = frame.delay();
        self.debug(&format!("loading {url}"));

        let load = async {
            let body = tokio::select! {
                result = frame.fetcher.fetch(&url) => result?,
                _ = token.cancelled() => return Err(BinderError::Cancelled { url: url.to_string() }),
            };
            if token.is_cancelled() {
                return Err(BinderError::Cancelled {
                    url: url.to_string(),
                });
            }
            let mount = self.mount_point();
            let host = self.runtime().element_host();
            let inserted = match mode {
                SpliceMode::Replace => {
                    if let Some(host) = &host {
                        host.release_children(mount);
                    }
                    self.document().set_inner_html(mount, &body)?
                }
                SpliceMode::Append => self.document().insert_html_before_end(mount, &body)?,
            };
            // spliced controllers must carry their marker before the frame binds
            let pending = host
                .as_ref()
                .map(|host| host.construct(&inserted))
                .unwrap_or_default();
            self.bind();
            frame.run_scripts(self, &inserted);
            if let Some(host) = &host {
                host.connect(pending).await;
            }
            debug!(
                controller = self.tag(),
                nodes = self.document().node_count(),
                "content spliced"
            );
            Ok(())
        };
        let (_, outcome) = tokio::join!(tokio::time::sleep(delay), load);
        frame.retire(&token);

        match outcome {
            Ok(()) => {
                frame.record_outcome(true);
                true
            }
            Err(err) if err.is_cancelled() => {
                debug!(controller = self.tag(), url = %url, "superseded load ignored");
                false
            }
            Err(err) => {
                error!(controller = self.tag(), url = %url, "{err}");
                frame.record_outcome(false);
                false
            }
        }
    }

    async fn refresh(&self) {
        self.render().await;
    }

    fn set_auto_refresh(&self, interval: Option<Duration>) {
        let Some(interval) = interval else {
            let err = BinderError::configuration(
                "set_auto_refresh",
                self.tag(),
                "undefined interval passed to set_auto_refresh",
            );
            error!("{err}");
            return;
        };
        let weak = self.downgrade();
        let task = RepeatingTask::spawn(interval, move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(frame) => {
                        frame.refresh().await;
                        true
                    }
                    None => false,
                }
            }
        });
        match task {
            Some(task) => {
                let previous = self.behavior().state().auto_refresh.replace(task);
                drop(previous);
            }
            None => error!(controller = self.tag(), ?interval, "could not schedule auto refresh"),
        }
    }
}

pub fn define(registry: &ElementRegistry, fetcher: Arc<dyn ContentFetcher>) {
    registry.define(FRAME_TAG, move || DynamicFrame::new(Arc::clone(&fetcher)));
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
