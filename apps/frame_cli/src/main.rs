use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, bail, Context, Result};
use binder_core::{load_config, BinderConfig, Controller, Document, ElementRegistry, Runtime};
use clap::{Parser, ValueEnum};
use dynamic_frame::{ContentFetcher, DynamicFrame, FrameControl, HttpFetcher, FRAME_TAG};
use serde_json::{json, Value};
use shared::domain::SpliceMode;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Replace,
    Append,
}

impl From<Mode> for SpliceMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Replace => SpliceMode::Replace,
            Mode::Append => SpliceMode::Append,
        }
    }
}

/// Loads remote markup through a dynamic frame and prints what was spliced.
#[derive(Parser, Debug)]
struct Args {
    /// Content address; relative addresses need an origin.
    #[arg(long, required_unless_present = "page")]
    url: Option<String>,
    /// Overrides the configured origin.
    #[arg(long)]
    origin: Option<String>,
    /// Extra query parameter, repeatable.
    #[arg(long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
    params: Vec<(String, String)>,
    #[arg(long, value_enum, default_value_t = Mode::Replace)]
    mode: Mode,
    /// Minimum load duration, e.g. `250ms`.
    #[arg(long)]
    delay: Option<String>,
    #[arg(long)]
    mount_point: Option<String>,
    #[arg(long)]
    execute_scripts: bool,
    /// Upgrade every frame of an HTML page instead of a single `--url`.
    #[arg(long, conflicts_with = "url")]
    page: Option<PathBuf>,
    #[arg(long)]
    json: bool,
}

fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    if key.is_empty() {
        return Err(format!("empty parameter name in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

fn report(args: &Args, url: &str, ok: bool, html: &str) -> Result<()> {
    if args.json {
        println!(
            "{}",
            serde_json::to_string(&json!({ "url": url, "ok": ok, "html": html }))?
        );
    } else {
        println!("{html}");
    }
    Ok(())
}

fn registry(
    config: BinderConfig,
    document: Document,
    fetcher: Arc<dyn ContentFetcher>,
) -> Arc<ElementRegistry> {
    let registry = ElementRegistry::new(Runtime::new(document, config));
    dynamic_frame::define(&registry, fetcher);
    registry
}

async fn run_single(
    args: &Args,
    config: BinderConfig,
    fetcher: Arc<dyn ContentFetcher>,
) -> Result<()> {
    let url = args.url.clone().ok_or_else(|| anyhow!("--url is required"))?;
    let document = Document::new();
    let node = document.create_element(FRAME_TAG);
    document.set_attribute(node, ":url", &url);
    document.set_attribute(node, ":render-on-init", "false");
    for (key, value) in &args.params {
        document.set_attribute(node, &format!(":param-{key}"), value);
    }
    if let Some(delay) = &args.delay {
        document.set_attribute(node, ":delay", delay);
    }
    if args.execute_scripts {
        document.set_attribute(node, ":execute-scripts", "");
    }
    if let Some(mount_point) = &args.mount_point {
        document.set_attribute(node, ":mount-point", mount_point);
    }

    let registry = registry(config, document.clone(), fetcher);
    registry.append(document.root(), node).await;
    let frame: Controller<DynamicFrame> = registry
        .controller(node)
        .ok_or_else(|| anyhow!("frame did not upgrade"))?;

    let ok = frame.load_content(&Value::Null, args.mode.into()).await;
    let endpoint = frame.endpoint().map(|u| u.to_string()).unwrap_or(url);
    report(args, &endpoint, ok, &document.inner_html(frame.mount_point()))?;
    if !ok {
        bail!("loading {endpoint} failed");
    }
    Ok(())
}

async fn run_page(
    args: &Args,
    path: &Path,
    config: BinderConfig,
    fetcher: Arc<dyn ContentFetcher>,
) -> Result<()> {
    let markup = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let document = Document::parse(&markup)?;
    let registry = registry(config, document.clone(), fetcher);
    let connected = registry.upgrade(document.root()).await;
    info!(connected, page = %path.display(), "upgraded page");

    let mut failed = 0;
    for node in document.query_selector_all(document.root(), FRAME_TAG)? {
        let Some(frame) = registry.controller::<DynamicFrame>(node) else {
            continue;
        };
        let endpoint = frame
            .endpoint()
            .map(|u| u.to_string())
            .unwrap_or_default();
        let ok = frame.behavior().last_load_succeeded().unwrap_or(false);
        if !ok {
            failed += 1;
        }
        report(args, &endpoint, ok, &document.inner_html(frame.mount_point()))?;
    }
    if failed > 0 {
        bail!("{failed} frame(s) in {} failed to load", path.display());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut config = load_config();
    if let Some(origin) = &args.origin {
        config.origin = Some(origin.clone());
    }
    let fetcher: Arc<dyn ContentFetcher> = Arc::new(HttpFetcher::new(&config)?);

    match &args.page {
        Some(path) => run_page(&args, path, config, fetcher).await,
        None => run_single(&args, config, fetcher).await,
    }
}
