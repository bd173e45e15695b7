//! hookd entry point.
//!
//! This binary is the composition root for the entire system. Responsibilities:
//!
//! 1. **Parse arguments**: listen address, configuration directory, replay
//!    protection and response mode.
//! 2. **Wire observability**: `tracing-subscriber` with a text or JSON layer
//!    and, when configured, an OpenTelemetry OTLP exporter.
//! 3. **Build the registry**: read every `*.yml` file in the configuration
//!    directory and resolve it against the built-in plugin table and the
//!    cached GitHub hook ranges. No usable endpoint is fatal.
//! 4. **Serve**: hand the [`pipeline::DeliveryPipeline`] to the listener.

mod config;
mod observability;

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use github::{GitHubMeta, DEFAULT_META_URL};
use listener::ListenerConfig;
use nodes::{BuiltinAction, PluginTable};
use pipeline::{DeliveryPipeline, EndpointRegistry, ReplayGuard, DEFAULT_REPLAY_CAPACITY};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Receive GitHub webhook deliveries and run configured actions.
#[derive(Debug, Parser)]
#[command(name = "hookd", version, about)]
struct Args {
    /// Directory holding one `*.yml` file per endpoint.
    #[arg(default_value = "config-active/")]
    config_dir: PathBuf,

    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    ip: IpAddr,

    /// Port to listen on.
    #[arg(short, long, default_value_t = 19891)]
    port: u16,

    /// Return rejection reasons to callers instead of a generic 500.
    #[arg(long)]
    debug: bool,

    /// Ignore `X-Forwarded-For` and use the socket peer address.
    #[arg(long)]
    no_proxyfix: bool,

    /// Reject deliveries whose identifier was seen recently.
    #[arg(long)]
    guid: bool,

    /// Number of delivery identifiers remembered with `--guid`.
    #[arg(long, default_value_t = DEFAULT_REPLAY_CAPACITY)]
    guid_capacity: NonZeroUsize,

    /// Seconds a delivery identifier is remembered with `--guid`.
    #[arg(long, default_value_t = 3600, value_parser = clap::value_parser!(u64).range(1..))]
    guid_max_age: u64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,

    /// GitHub meta API URL publishing the webhook source ranges.
    #[arg(long, env = "HOOKD_GITHUB_META_URL", default_value = DEFAULT_META_URL)]
    github_meta_url: String,
}

impl Args {
    fn listener_config(&self) -> ListenerConfig {
        ListenerConfig {
            debug: self.debug,
            trust_forwarded: !self.no_proxyfix,
        }
    }

    fn replay_guard(&self) -> anyhow::Result<ReplayGuard> {
        if !self.guid {
            return Ok(ReplayGuard::disabled());
        }
        let max_age = Duration::from_secs(self.guid_max_age);
        Ok(ReplayGuard::new(self.guid_capacity, max_age)?)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let _telemetry = observability::init(args.log_json)?;
    run(args).await
}

async fn run(args: Args) -> anyhow::Result<()> {
    let loaded = config::load_sources(&args.config_dir)?;

    let upstream = GitHubMeta::new(&args.github_meta_url)
        .context("failed to create GitHub meta client")?;
    let built = EndpointRegistry::<BuiltinAction>::build(
        loaded.sources,
        &PluginTable::builtin(),
        &upstream,
    )
    .await
    .with_context(|| format!("no endpoints loaded from {}", args.config_dir.display()))?;

    let skipped = loaded.errors.len() + built.skipped.len();
    if skipped > 0 {
        warn!(skipped, "some configuration sources were skipped");
    }
    let mut endpoints: Vec<_> = built.registry.names().map(|n| n.as_str()).collect();
    endpoints.sort_unstable();
    info!(
        endpoints = ?endpoints,
        replay_protection = args.guid,
        debug = args.debug,
        "registry ready"
    );

    let pipeline = Arc::new(DeliveryPipeline::new(built.registry, args.replay_guard()?));
    let router = listener::router(pipeline, args.listener_config());

    let addr = SocketAddr::new(args.ip, args.port);
    let socket = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "listening");

    listener::serve(socket, router).await.context("server failed")
}
