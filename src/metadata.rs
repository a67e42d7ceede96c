//! Companion path: queries the upstream JSON API for beatmap descriptors and
//! upserts them into the relational store before returning a normalised
//! envelope to the caller. Shares the rate limiter and the `beatmaps` table
//! with the download pipeline, nothing else.

use crate::db::{Beatmap, Database, UpstreamBeatmapRow};
use crate::error::{AppError, AppResult};
use crate::ratelimit::TokenBucket;
use serde_json::Value;

const METADATA_CALL_COST: u64 = 10;
const UPSTREAM_API_BASE: &str = "https://osu.ppy.sh/api/get_beatmaps";

/// Fetches beatmap descriptors from the upstream JSON API and upserts them.
pub struct MetadataFetcher {
    client: reqwest::Client,
    api_key: String,
}

impl MetadataFetcher {
    /// Builds a fetcher. An empty `api_key` disables every call.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// True when an API key is configured and calls may proceed.
    pub fn enabled(&self) -> bool {
        !self.api_key.is_empty()
    }

    /// Fetches the single beatmap `id`: the first row of the upstream
    /// response, as a normalised JSON object.
    pub async fn download_beatmap(
        &self,
        limiter: &TokenBucket,
        db: &Database,
        id: i64,
    ) -> AppResult<Value> {
        let rows = self.fetch_rows(limiter, db, "b", id).await?;
        rows.into_iter().next().ok_or(AppError::NotFound)
    }

    /// Fetches every beatmap in beatmapset `id`: all rows of the upstream
    /// response, as a normalised JSON array.
    pub async fn download_beatmapset(
        &self,
        limiter: &TokenBucket,
        db: &Database,
        id: i64,
    ) -> AppResult<Vec<Value>> {
        self.fetch_rows(limiter, db, "s", id).await
    }

    async fn fetch_rows(
        &self,
        limiter: &TokenBucket,
        db: &Database,
        param: &str,
        id: i64,
    ) -> AppResult<Vec<Value>> {
        if !self.enabled() {
            return Err(AppError::NotFound);
        }
        if !limiter.consume(METADATA_CALL_COST) {
            return Err(AppError::RateLimited { retry_after_secs: 1 });
        }

        let response = self
            .client
            .get(UPSTREAM_API_BASE)
            .query(&[("k", self.api_key.as_str()), (param, &id.to_string())])
            .send()
            .await?;
        let rows: Vec<UpstreamBeatmapRow> = response.json().await?;

        let mut envelopes = Vec::with_capacity(rows.len());
        for row in &rows {
            match Beatmap::try_from(row) {
                Ok(beatmap) => {
                    if let Err(err) = db.insert_beatmap(&beatmap).await {
                        tracing::warn!(error = %err, "beatmap insert failed, dropping record");
                        continue;
                    }
                    envelopes.push(beatmap_envelope(&beatmap));
                }
                Err(err) => {
                    tracing::warn!(error = %err, "malformed upstream beatmap row, dropping record");
                }
            }
        }
        Ok(envelopes)
    }
}

fn beatmap_envelope(beatmap: &Beatmap) -> Value {
    serde_json::json!({
        "beatmap_id": beatmap.beatmap_id,
        "beatmapset_id": beatmap.beatmapset_id,
        "beatmap_md5": beatmap.beatmap_md5,
        "mode": beatmap.mode,
        "artist": beatmap.artist,
        "title": beatmap.title,
        "difficulty_name": beatmap.difficulty_name,
        "creator": beatmap.creator,
        "count_normal": beatmap.count_normal,
        "count_slider": beatmap.count_slider,
        "count_spinner": beatmap.count_spinner,
        "max_combo": beatmap.max_combo,
        "ranked_status": beatmap.ranked_status,
        "creating_date": crate::db::format_osu_datetime(&beatmap.creating_date),
        "bpm": beatmap.bpm,
        "hit_length": beatmap.hit_length,
        "cs": beatmap.cs,
        "ar": beatmap.ar,
        "od": beatmap.od,
        "hp": beatmap.hp,
        "difficulty_std": beatmap.difficulty_std,
        "difficulty_taiko": beatmap.difficulty_taiko,
        "difficulty_ctb": beatmap.difficulty_ctb,
        "difficulty_mania": beatmap.difficulty_mania,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_without_api_key() {
        let fetcher = MetadataFetcher::new("");
        assert!(!fetcher.enabled());
    }

    #[test]
    fn enabled_with_api_key() {
        let fetcher = MetadataFetcher::new("key");
        assert!(fetcher.enabled());
    }
}
