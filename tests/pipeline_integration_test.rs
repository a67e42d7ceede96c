//! End-to-end exercises of the download ladder against the cache and disk
//! tiers directly (no upstream dependency, so these run without network
//! access).

use hanaru_mirror::cache::{CachedArchive, Lookup, LruStore};
use hanaru_mirror::db::Database;
use hanaru_mirror::pipeline::Pipeline;
use hanaru_mirror::ratelimit::TokenBucket;
use hanaru_mirror::singleflight::SingleFlight;
use hanaru_mirror::storage::DiskStore;

async fn test_pipeline(dir: &std::path::Path) -> Pipeline {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let disk = DiskStore::open(dir, 0).unwrap();
    Pipeline {
        limiter: TokenBucket::new(60, 1), // generous budget for deterministic tests
        lru: LruStore::new(16),
        disk,
        single_flight: SingleFlight::new(),
        upstream: None,
        db,
    }
}

fn scratch_dir(name: &str) -> std::path::PathBuf {
    let mut dir = std::env::temp_dir();
    dir.push(format!("hanaru-mirror-itest-{name}-{}", std::process::id()));
    dir
}

#[tokio::test]
async fn warm_cache_hit_returns_without_touching_disk() {
    let dir = scratch_dir("warm-hit");
    let pipeline = test_pipeline(&dir).await;
    pipeline
        .lru
        .insert(42, CachedArchive::hit("My Song.osz", vec![0x50, 0x4B, 0x03, 0x04]));

    let result = pipeline.download(42).await.unwrap();
    assert_eq!(result.filename, "My Song.osz");
    assert_eq!(result.payload, vec![0x50, 0x4B, 0x03, 0x04]);
}

#[tokio::test]
async fn persistent_disk_tombstone_yields_not_found_without_upstream() {
    let dir = scratch_dir("disk-tombstone");
    let pipeline = test_pipeline(&dir).await;
    pipeline.disk.write(99, &[]).await.unwrap();

    let err = pipeline.download(99).await.unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::NOT_FOUND);
    assert!(matches!(pipeline.lru.find(99), Lookup::PersistentMiss));
}

#[tokio::test]
async fn disk_hit_populates_lru_and_falls_back_filename() {
    let dir = scratch_dir("disk-hit");
    let pipeline = test_pipeline(&dir).await;
    pipeline
        .disk
        .write(7, &[0x50, 0x4B, 0x03, 0x04, 1, 2, 3])
        .await
        .unwrap();

    let result = pipeline.download(7).await.unwrap();
    assert_eq!(result.filename, "7.osz");
    match pipeline.lru.find(7) {
        Lookup::Hit(archive) => assert_eq!(archive.payload.len(), 7),
        other => panic!("expected lru hit after disk read, got {other:?}"),
    }
}

#[tokio::test]
async fn upstream_disabled_returns_locked() {
    let dir = scratch_dir("locked");
    let pipeline = test_pipeline(&dir).await;

    let err = pipeline.download(12345).await.unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::LOCKED);
}

#[tokio::test]
async fn rate_limiter_rejects_past_budget() {
    let dir = scratch_dir("rate-limited");
    let mut pipeline = test_pipeline(&dir).await;
    pipeline.limiter = TokenBucket::new(0, 1_000_000_000);

    let err = pipeline.download(1).await.unwrap_err();
    assert_eq!(err.status(), axum::http::StatusCode::TOO_MANY_REQUESTS);
}
