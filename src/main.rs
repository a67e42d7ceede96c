//! hanaru-mirror: HTTP mirror/proxy for a beatmap archive service.

use hanaru_mirror::api::{self, AppState};
use hanaru_mirror::cache::LruStore;
use hanaru_mirror::db::Database;
use hanaru_mirror::metadata::MetadataFetcher;
use hanaru_mirror::pipeline::Pipeline;
use hanaru_mirror::ratelimit::TokenBucket;
use hanaru_mirror::singleflight::SingleFlight;
use hanaru_mirror::storage::DiskStore;
use hanaru_mirror::upstream::UpstreamSession;
use hanaru_mirror::Config;
use std::panic;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A known-stable beatmapset, used as the weekly heartbeat probe.
const HEARTBEAT_PROBE_ID: i64 = 1;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);
const HEARTBEAT_RETRY_BACKOFF: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic::set_hook(Box::new(|panic_info| {
        eprintln!("hanaru-mirror fatal error:");
        eprintln!("{panic_info}");
        if let Some(location) = panic_info.location() {
            eprintln!(
                "location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
    }));

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    let config = Config::from_file(&config_path).unwrap_or_else(|err| {
        eprintln!("could not load {config_path} ({err}), using defaults");
        Config::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_level)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        name = hanaru_mirror::NAME,
        version = hanaru_mirror::VERSION,
        "starting up"
    );

    let db = Database::connect(&config.database_url).await?;
    let disk = DiskStore::open(&config.beatmaps_path, config.required_free_space)?;
    let lru = LruStore::new(config.maximum_cache_size);
    let limiter = TokenBucket::default();
    let single_flight = SingleFlight::new();

    let upstream = if config.upstream_enabled() {
        let session = Arc::new(UpstreamSession::new(
            config.osu_username.clone(),
            config.osu_password.clone(),
        ));
        if let Err(err) = session.authorize().await {
            tracing::warn!(error = %err, "initial upstream authorization failed");
        }
        tokio::spawn(heartbeat_loop(Arc::clone(&session)));
        Some(session)
    } else {
        tracing::info!("no upstream credentials configured, download pipeline runs cache/disk-only");
        None
    };

    let metadata = MetadataFetcher::new(config.osu_api_key.clone());

    let pipeline = Pipeline {
        limiter,
        lru,
        disk,
        single_flight,
        upstream,
        db,
    };

    let state = Arc::new(AppState {
        pipeline,
        metadata,
        config,
        started_at: Instant::now(),
    });

    api::serve(state).await
}

/// Issues a benign fetch once a week to keep upstream tokens live.
/// Tolerates 429/404/200; any other status is retried after one minute.
async fn heartbeat_loop(session: Arc<UpstreamSession>) {
    loop {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        loop {
            match session.heartbeat(HEARTBEAT_PROBE_ID).await {
                Ok(()) => break,
                Err(err) => {
                    tracing::warn!(error = %err, "heartbeat probe failed, retrying in 1 minute");
                    tokio::time::sleep(HEARTBEAT_RETRY_BACKOFF).await;
                }
            }
        }
    }
}
