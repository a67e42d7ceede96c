//! The download orchestrator: walks the cache/disk/upstream ladder,
//! enforces rate limits, and publishes results to single-flight followers.

use crate::cache::{CachedArchive, Lookup, LruStore};
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::ratelimit::TokenBucket;
use crate::singleflight::{Joined, SingleFlight};
use crate::storage::DiskStore;
use crate::upstream::{FetchOutcome, UpstreamSession};
use once_cell::sync::Lazy;
use regex::Regex;

const ADMISSION_COST: u64 = 1;
const DISK_PROBE_COST: u64 = 20;
const UPSTREAM_FETCH_COST: u64 = 40;

/// The ZIP local-file-header magic every valid archive must start with.
const ZIP_MAGIC: [u8; 4] = [0x50, 0x4B, 0x03, 0x04];

/// A successful download result handed back to the HTTP layer.
pub struct Downloaded {
    pub filename: String,
    pub payload: Vec<u8>,
}

/// Everything the pipeline needs, owned by the top-level orchestrator and
/// passed by reference rather than rediscovered via static lookup.
pub struct Pipeline {
    pub limiter: TokenBucket,
    pub lru: LruStore,
    pub disk: DiskStore,
    pub single_flight: SingleFlight,
    pub upstream: Option<std::sync::Arc<UpstreamSession>>,
    pub db: Database,
}

impl Pipeline {
    /// Runs the full `download(id)` ladder described by the archive-mirror
    /// download protocol.
    pub async fn download(&self, id: i64) -> AppResult<Downloaded> {
        // 1. Admission.
        if !self.limiter.consume(ADMISSION_COST) {
            return Err(AppError::RateLimited { retry_after_secs: 1 });
        }

        // 2. Memory cache probe.
        match self.lru.find(id) {
            Lookup::Hit(archive) => return Ok(to_downloaded(&archive)),
            Lookup::PersistentMiss | Lookup::RetryableMiss => return Err(AppError::NotFound),
            Lookup::Absent => {}
        }

        // 3. Disk probe admission.
        if !self.limiter.consume(DISK_PROBE_COST) {
            return Err(AppError::RateLimited { retry_after_secs: 1 });
        }

        // 4. Disk probe. A read error is treated as a cache miss and falls
        // through to upstream rather than surfacing to the caller.
        match self.disk.read(id).await {
            Ok(Some(bytes)) if bytes.is_empty() => {
                self.lru.insert(id, CachedArchive::tombstone());
                return Err(AppError::NotFound);
            }
            Ok(Some(bytes)) => {
                let name = self
                    .db
                    .lookup_name(id)
                    .await?
                    .unwrap_or_else(|| format!("{id}.osz"));
                let archive = self.lru.insert(id, CachedArchive::hit(name, bytes));
                return Ok(to_downloaded(&archive));
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, id, "disk read failed, falling through to upstream");
            }
        }

        // 5. Upstream disabled.
        let Some(upstream) = &self.upstream else {
            return Err(AppError::Locked);
        };

        // 6. Upstream fetch admission.
        if !self.limiter.consume(UPSTREAM_FETCH_COST) {
            return Err(AppError::RateLimited { retry_after_secs: 1 });
        }

        // 7. Single-flight join.
        let joined = self.single_flight.join(id);
        if matches!(joined, Joined::Follower(_)) {
            joined.wait().await;
            return match self.lru.find(id) {
                Lookup::Hit(archive) => Ok(to_downloaded(&archive)),
                _ => Err(AppError::NotFound),
            };
        }

        // 8. Upstream fetch, dispatched by status.
        let result = self.fetch_and_cache(id, upstream).await;
        self.single_flight.publish(id).await;
        result
    }

    async fn fetch_and_cache(
        &self,
        id: i64,
        upstream: &UpstreamSession,
    ) -> AppResult<Downloaded> {
        let outcome = upstream.fetch(id).await?;
        match outcome {
            FetchOutcome::Ok { body, location } => {
                if !starts_with_zip_magic(&body) {
                    self.lru.insert(id, CachedArchive::retry_tombstone());
                    return Err(AppError::Unprocessable);
                }
                let name = filename_from_location(location.as_deref())
                    .unwrap_or_else(|| format!("{id}.osz"));
                let archive = self
                    .lru
                    .insert(id, CachedArchive::hit(name.clone(), body.clone()));
                if self.disk.can_write() {
                    if let Err(err) = self.disk.write(id, &body).await {
                        tracing::warn!(error = %err, id, "disk write failed, serving from memory only");
                    } else if let Err(err) = self.db.remember_name(id, &name).await {
                        tracing::warn!(error = %err, id, "name registry insert failed");
                    }
                }
                Ok(to_downloaded(&archive))
            }
            FetchOutcome::Unauthorized => {
                self.lru.insert(id, CachedArchive::retry_tombstone());
                upstream.try_reauth().await;
                Err(AppError::Unauthorized)
            }
            FetchOutcome::NotFound => {
                if let Err(err) = self.disk.write(id, &[]).await {
                    tracing::warn!(error = %err, id, "disk tombstone write failed");
                }
                self.lru.insert(id, CachedArchive::tombstone());
                Err(AppError::NotFound)
            }
            FetchOutcome::TooManyRequests => {
                self.lru.insert(id, CachedArchive::retry_tombstone());
                Err(AppError::RateLimited { retry_after_secs: 60 })
            }
            FetchOutcome::Other(_) => {
                self.lru.insert(id, CachedArchive::retry_tombstone());
                Err(AppError::ServiceUnavailable("unclassified upstream status".to_string()))
            }
        }
    }
}

fn to_downloaded(archive: &CachedArchive) -> Downloaded {
    Downloaded {
        filename: archive.filename.clone(),
        payload: archive.payload.clone(),
    }
}

fn starts_with_zip_magic(bytes: &[u8]) -> bool {
    bytes.len() >= ZIP_MAGIC.len() && bytes[..ZIP_MAGIC.len()] == ZIP_MAGIC
}

static FILENAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"fs=[^&]*?%20([^&]+\.osz)").unwrap());

/// Extracts and URL-decodes the `fs=…%20<name>.osz` fragment from a
/// `Location` header. The run up to and including the first `%20` after
/// `fs=` is a set-id anchor, not part of the filename, and is discarded.
/// Returns `None` if the header is missing or unparseable, in which case the
/// caller falls back to `"<id>.osz"`.
fn filename_from_location(location: Option<&str>) -> Option<String> {
    let location = location?;
    let captured = FILENAME_PATTERN.captures(location)?.get(1)?.as_str();
    urlencoding::decode(captured).ok().map(|s| s.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zip_magic_accepts_valid_prefix() {
        assert!(starts_with_zip_magic(b"PK\x03\x04rest"));
    }

    #[test]
    fn zip_magic_rejects_other_bytes() {
        assert!(!starts_with_zip_magic(b"not a zip"));
        assert!(!starts_with_zip_magic(b"PK"));
    }

    #[test]
    fn filename_extracted_and_decoded() {
        let location =
            "https://osu.ppy.sh/d/123?fs=maps%20My%20Song.osz&other=1";
        assert_eq!(
            filename_from_location(Some(location)),
            Some("My Song.osz".to_string())
        );
    }

    #[test]
    fn missing_location_falls_back_to_none() {
        assert_eq!(filename_from_location(None), None);
    }

    #[test]
    fn unparseable_location_falls_back_to_none() {
        assert_eq!(
            filename_from_location(Some("https://osu.ppy.sh/d/123")),
            None
        );
    }
}
