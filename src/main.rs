//! ColorProxy CLI - Tag-based request routing in front of an axum app
//!
//! Serves a small host application with the proxy attached: requests carrying
//! the routing header go to the backend registered under that tag.

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use colorproxy_lib::{attach, ColorProxy, ColorProxyBuilder, SelfRegistration};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// ColorProxy - Route requests to registered backends by a tag header
#[derive(Parser, Debug)]
#[command(name = "colorproxy")]
#[command(about = "ColorProxy - Route requests to registered backends by a tag header")]
#[command(version, long_version = LONG_VERSION)]
#[command(long_about = r#"
Serve an HTTP app with ColorProxy attached. Backends register themselves
under a tag via POST /colorproxy/register and renew their lease with
POST /colorproxy/heartbeat. Requests whose routing header names a
registered tag are forwarded to that backend; everything else is
answered locally.

EXAMPLES:
  # In-memory routes, default header "color"
  colorproxy --bind 0.0.0.0:8080

  # Register this instance as "blue" on port 8080
  colorproxy --self-color blue --self-token s3cret

  # Share routes between instances (requires the `redis` feature)
  colorproxy --redis-url redis://127.0.0.1:6379
"#)]
struct Cli {
    /// Address to serve on
    #[arg(long, env = "COLORPROXY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Redis URL for a shared route store
    #[arg(long, env = "COLORPROXY_REDIS_URL")]
    redis_url: Option<String>,

    /// Route lease in seconds
    #[arg(long, env = "COLORPROXY_TTL_SECS", default_value = "120")]
    ttl_secs: u64,

    /// Self-heartbeat period in seconds
    #[arg(long, env = "COLORPROXY_HEARTBEAT_SECS", default_value = "30")]
    heartbeat_secs: u64,

    /// Expired-route sweep period in seconds
    #[arg(long, env = "COLORPROXY_CLEANUP_SECS", default_value = "60")]
    cleanup_secs: u64,

    /// Bound on registry calls and upstream responses, in seconds
    #[arg(long, env = "COLORPROXY_REQUEST_TIMEOUT_SECS", default_value = "30")]
    request_timeout_secs: u64,

    /// Header carrying the routing tag
    #[arg(long, env = "COLORPROXY_ROUTING_HEADER", default_value = "color")]
    routing_header: String,

    /// Register this instance under this tag
    #[arg(long, env = "COLORPROXY_SELF_COLOR")]
    self_color: Option<String>,

    /// Address to register for this instance: full URL or port (defaults to the bind port)
    #[arg(long, env = "COLORPROXY_SELF_ADDRESS")]
    self_address: Option<String>,

    /// Token guarding this instance's route
    #[arg(long, env = "COLORPROXY_SELF_TOKEN")]
    self_token: Option<String>,

    /// Owner recorded on this instance's route
    #[arg(long, env = "COLORPROXY_SELF_OWNER", default_value = "")]
    self_owner: String,

    /// Grace period for background tasks on shutdown, in seconds
    #[arg(long, env = "COLORPROXY_SHUTDOWN_TIMEOUT_SECS", default_value = "10")]
    shutdown_timeout_secs: u64,

    /// Enable verbose logging
    #[arg(short, long, env = "COLORPROXY_VERBOSE")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    info!("ColorProxy {}", LONG_VERSION);

    let builder = builder_from_cli(&cli)?;
    let proxy = builder.start().await.context("Failed to start proxy")?;

    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("Received Ctrl+C, shutting down...");
    };
    run(&cli, proxy, ctrl_c).await?;

    info!("Stopped");
    Ok(())
}

/// Serve until `signal` fires, then shut the proxy down. The proxy is shut
/// down on every exit path, including a failed bind.
async fn run(
    cli: &Cli,
    proxy: Arc<ColorProxy>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let served = serve(cli, proxy.clone(), signal).await;

    let shutdown = proxy
        .shutdown(Duration::from_secs(cli.shutdown_timeout_secs))
        .await;

    served?;
    shutdown.context("Proxy shutdown failed")?;
    Ok(())
}

async fn serve(
    cli: &Cli,
    proxy: Arc<ColorProxy>,
    signal: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = attach(host_routes(&cli.routing_header), proxy);

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Failed to bind {}", cli.bind))?;
    info!("Listening on {}", cli.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .context("Server error")
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn builder_from_cli(cli: &Cli) -> Result<ColorProxyBuilder> {
    let mut builder = ColorProxyBuilder::new()
        .ttl(Duration::from_secs(cli.ttl_secs))
        .heartbeat_interval(Duration::from_secs(cli.heartbeat_secs))
        .cleanup_interval(Duration::from_secs(cli.cleanup_secs))
        .request_timeout(Duration::from_secs(cli.request_timeout_secs))
        .routing_header(&cli.routing_header);

    if let Some(url) = &cli.redis_url {
        builder = with_redis(builder, url);
    }

    if let Some(color) = &cli.self_color {
        let token = cli
            .self_token
            .as_deref()
            .context("--self-token is required with --self-color")?;
        let address = cli
            .self_address
            .clone()
            .unwrap_or_else(|| format!(":{}", cli.bind.port()));

        builder = builder.self_registration(
            SelfRegistration::new(color, address, token).with_owner(&cli.self_owner),
        );
    }

    Ok(builder)
}

#[cfg(feature = "redis")]
fn with_redis(builder: ColorProxyBuilder, url: &str) -> ColorProxyBuilder {
    info!("Using Redis route store");
    builder.redis(url)
}

#[cfg(not(feature = "redis"))]
fn with_redis(builder: ColorProxyBuilder, _url: &str) -> ColorProxyBuilder {
    warn!("Built without the `redis` feature; ignoring --redis-url and keeping routes in memory");
    builder
}

fn host_routes(routing_header: &str) -> Router {
    let usage = format!(
        "ColorProxy is running. Send a `{}: <tag>` header to reach a registered backend; \
         manage routes under /colorproxy.\n",
        routing_header
    );

    Router::new()
        .route("/", get(move || std::future::ready(usage.clone())))
        .route("/ping", get(|| async { "pong" }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::parse_from(["colorproxy"]);

        assert_eq!(cli.bind.port(), 8080);
        assert_eq!(cli.ttl_secs, 120);
        assert_eq!(cli.routing_header, "color");
        assert!(cli.self_color.is_none());
    }

    #[test]
    fn test_self_color_requires_token() {
        let cli = Cli::parse_from(["colorproxy", "--self-color", "blue"]);
        assert!(builder_from_cli(&cli).is_err());

        let cli = Cli::parse_from(["colorproxy", "--self-color", "blue", "--self-token", "t"]);
        assert!(builder_from_cli(&cli).is_ok());
    }

    #[tokio::test]
    async fn test_failed_bind_still_shuts_down() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let cli = Cli::parse_from([
            "colorproxy",
            "--bind",
            addr.as_str(),
            "--self-color",
            "blue",
            "--self-address",
            "http://127.0.0.1:1",
            "--self-token",
            "t",
        ]);
        let proxy = builder_from_cli(&cli).unwrap().start().await.unwrap();
        assert!(proxy.get_route("blue").await.is_ok());

        let result = run(&cli, proxy.clone(), std::future::pending()).await;

        assert!(result.is_err());
        assert_eq!(proxy.state(), colorproxy_lib::ProxyState::Closed);
    }
}
