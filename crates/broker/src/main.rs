use broker::pipeline::Broker;
use broker::rate_limited::RateLimitedUpstream;
use broker_core::{BrokerConfig, Whitelist};
use clap::Parser;
use enrich::{Enricher, NullMediaFetcher, UpstreamCaller};
use onebot::{RateLimiter, UpstreamClient};
use render::Renderer;
use std::sync::Arc;
use stream::StreamServer;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to TOML config file
    #[arg(short, long, default_value = "broker.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BROKER_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(log_level: &str, log_json: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let mut config = BrokerConfig::load_or_default(&args.config);
    if args.log_level != "info" {
        config.log.level = args.log_level.clone();
    }
    if args.log_json {
        config.log.json = true;
    }
    init_tracing(&config.log.level, config.log.json);

    info!("Initializing stream broker...");

    let upstream_config = onebot::client::UpstreamConfig {
        url: config.upstream.ws_url.clone(),
        access_token: config.upstream.access_token.clone(),
        reconnect: config.upstream.reconnect,
        reconnect_min_ms: config.upstream.reconnect_min_ms,
        reconnect_max_ms: config.upstream.reconnect_max_ms,
        request_timeout_ms: config.upstream.request_timeout_ms,
        auto_wait_open: config.upstream.auto_wait_open,
    };
    info!("Connecting to upstream at {}", config.upstream.ws_url);
    let (upstream_client, mut event_rx) = UpstreamClient::new(upstream_config);

    let limiter = Arc::new(RateLimiter::new(
        config.rate_limit.max_concurrency,
        config.rate_limit.min_interval_ms,
    ));
    let limited: Arc<dyn UpstreamCaller> = Arc::new(RateLimitedUpstream::new(upstream_client, limiter));

    let enricher = Enricher::new(limited.clone(), Arc::new(NullMediaFetcher));
    let renderer = Renderer::new(limited.clone());

    let stream_whitelist = Whitelist::new(
        config.policy.whitelist_groups.clone(),
        config.policy.whitelist_users.clone(),
    );
    let stream_server = StreamServer::new(
        limited,
        stream_whitelist,
        config.rpc_retry.clone(),
        &config.stream_server.host,
        config.stream_server.port,
    );
    let stream_for_broker = Arc::new(stream_server.clone());
    stream_server.start();
    info!(
        "Stream server listening on {}:{}",
        config.stream_server.host, config.stream_server.port
    );

    let event_whitelist = Arc::new(Whitelist::new(
        config.policy.whitelist_groups.clone(),
        config.policy.whitelist_users.clone(),
    ));
    let broker = Broker::new(
        enricher,
        renderer,
        stream_for_broker.clone(),
        event_whitelist,
        config.policy.clone(),
    );

    info!("Stream broker running, awaiting upstream events");
    loop {
        tokio::select! {
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(event) => broker.handle_event(event).await,
                    None => {
                        info!("upstream event channel closed, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down gracefully");
                break;
            }
        }
    }

    stream_for_broker.shutdown("server shutting down").await;
    Ok(())
}
