//! Relational persistence: the identifier-to-filename registry consulted by
//! the download pipeline, and the append-only beatmap metadata table fed by
//! the metadata fetcher.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Shared pool plus the queries the pipeline and metadata fetcher need.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connects to `database_url` and runs pending migrations.
    ///
    /// An in-memory URL (`sqlite::memory:`) gets a single-connection pool:
    /// sqlite hands each new connection its own private in-memory database,
    /// so pooling more than one connection would silently fragment state.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let max_connections = if database_url.contains(":memory:") { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns the persisted filename for `id`, if any.
    pub async fn lookup_name(&self, id: i64) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT name FROM beatmaps_names WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(name,)| name))
    }

    /// Fire-and-forget insert of `(id, name)`; duplicates are tolerated.
    pub async fn remember_name(&self, id: i64, name: &str) -> Result<(), sqlx::Error> {
        sqlx::query("INSERT OR IGNORE INTO beatmaps_names (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Inserts a beatmap metadata row, ignoring conflicts on `beatmap_id`.
    pub async fn insert_beatmap(&self, beatmap: &Beatmap) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR IGNORE INTO beatmaps (
                beatmap_id, beatmapset_id, beatmap_md5, mode, artist, title,
                difficulty_name, creator, count_normal, count_slider, count_spinner,
                max_combo, ranked_status, creating_date, bpm, hit_length,
                cs, ar, od, hp, difficulty_std, difficulty_taiko, difficulty_ctb, difficulty_mania
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(beatmap.beatmap_id)
        .bind(beatmap.beatmapset_id)
        .bind(&beatmap.beatmap_md5)
        .bind(beatmap.mode)
        .bind(&beatmap.artist)
        .bind(&beatmap.title)
        .bind(&beatmap.difficulty_name)
        .bind(&beatmap.creator)
        .bind(beatmap.count_normal)
        .bind(beatmap.count_slider)
        .bind(beatmap.count_spinner)
        .bind(beatmap.max_combo)
        .bind(beatmap.ranked_status)
        .bind(beatmap.creating_date.format("%Y-%m-%d %H:%M:%S").to_string())
        .bind(beatmap.bpm)
        .bind(beatmap.hit_length)
        .bind(beatmap.cs)
        .bind(beatmap.ar)
        .bind(beatmap.od)
        .bind(beatmap.hp)
        .bind(beatmap.difficulty_std)
        .bind(beatmap.difficulty_taiko)
        .bind(beatmap.difficulty_ctb)
        .bind(beatmap.difficulty_mania)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// One row of the append-only `beatmaps` table. Field names follow the
/// authoritative list; `ranked_status` is sourced from upstream's `approved`
/// field, never `approved_date`.
#[derive(Debug, Clone)]
pub struct Beatmap {
    pub beatmap_id: i64,
    pub beatmapset_id: i64,
    pub beatmap_md5: String,
    pub mode: i32,
    pub artist: String,
    pub title: String,
    pub difficulty_name: String,
    pub creator: String,
    pub count_normal: i64,
    pub count_slider: i64,
    pub count_spinner: i64,
    pub max_combo: Option<i64>,
    pub ranked_status: i32,
    pub creating_date: DateTime<Utc>,
    pub bpm: f64,
    pub hit_length: i64,
    pub cs: f64,
    pub ar: f64,
    pub od: f64,
    pub hp: f64,
    pub difficulty_std: Option<f64>,
    pub difficulty_taiko: Option<f64>,
    pub difficulty_ctb: Option<f64>,
    pub difficulty_mania: Option<f64>,
}

/// One row of the upstream `/api/get_beatmaps` JSON response. Field names
/// mirror the upstream API, not the persisted schema; `Beatmap::try_from`
/// does the mapping (and the `approved`-not-`approved_date` choice).
#[derive(Debug, Deserialize)]
pub struct UpstreamBeatmapRow {
    pub beatmap_id: String,
    pub beatmapset_id: String,
    pub file_md5: String,
    pub mode: String,
    pub artist: String,
    pub title: String,
    pub version: String,
    pub creator: String,
    pub count_normal: String,
    pub count_slider: String,
    pub count_spinner: String,
    pub max_combo: Option<String>,
    pub approved: String,
    pub approved_date: String,
    pub bpm: String,
    pub hit_length: String,
    pub diff_size: String,
    pub diff_approach: String,
    pub diff_overall: String,
    pub diff_drain: String,
    pub difficultyrating: Option<String>,
}

/// Errors while normalising one upstream row. The metadata fetcher catches
/// this around each row and drops just that record, not the whole response.
#[derive(Debug, thiserror::Error)]
#[error("malformed field in upstream beatmap row: {0}")]
pub struct RowParseError(pub String);

impl TryFrom<&UpstreamBeatmapRow> for Beatmap {
    type Error = RowParseError;

    fn try_from(row: &UpstreamBeatmapRow) -> Result<Self, Self::Error> {
        let parse = |field: &str, value: &str| -> Result<f64, RowParseError> {
            value
                .parse::<f64>()
                .map_err(|_| RowParseError(field.to_string()))
        };
        let parse_i = |field: &str, value: &str| -> Result<i64, RowParseError> {
            value
                .parse::<i64>()
                .map_err(|_| RowParseError(field.to_string()))
        };

        let mode = parse_i("mode", &row.mode)? as i32;
        let difficulty_rating = row
            .difficultyrating
            .as_deref()
            .map(|v| parse("difficultyrating", v))
            .transpose()?;

        let (std, taiko, ctb, mania) = match mode {
            0 => (difficulty_rating, None, None, None),
            1 => (None, difficulty_rating, None, None),
            2 => (None, None, difficulty_rating, None),
            3 => (None, None, None, difficulty_rating),
            _ => (None, None, None, None),
        };

        let creating_date = parse_osu_datetime(&row.approved_date).unwrap_or_else(Utc::now);

        Ok(Beatmap {
            beatmap_id: parse_i("beatmap_id", &row.beatmap_id)?,
            beatmapset_id: parse_i("beatmapset_id", &row.beatmapset_id)?,
            beatmap_md5: row.file_md5.clone(),
            mode,
            artist: row.artist.clone(),
            title: row.title.clone(),
            difficulty_name: row.version.clone(),
            creator: row.creator.clone(),
            count_normal: parse_i("count_normal", &row.count_normal)?,
            count_slider: parse_i("count_slider", &row.count_slider)?,
            count_spinner: parse_i("count_spinner", &row.count_spinner)?,
            max_combo: row
                .max_combo
                .as_deref()
                .and_then(|v| v.parse::<i64>().ok()),
            ranked_status: parse_i("approved", &row.approved)? as i32,
            creating_date,
            bpm: parse("bpm", &row.bpm)?,
            hit_length: parse_i("hit_length", &row.hit_length)?,
            cs: parse("diff_size", &row.diff_size)?,
            ar: parse("diff_approach", &row.diff_approach)?,
            od: parse("diff_overall", &row.diff_overall)?,
            hp: parse("diff_drain", &row.diff_drain)?,
            difficulty_std: std,
            difficulty_taiko: taiko,
            difficulty_ctb: ctb,
            difficulty_mania: mania,
        })
    }
}

/// Parses an upstream `"YYYY-MM-DD HH:MM:SS"` timestamp as UTC.
pub fn parse_osu_datetime(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// Formats a UTC timestamp back into the upstream's `"YYYY-MM-DD HH:MM:SS"`
/// shape. Forms the other half of the round-trip with `parse_osu_datetime`.
pub fn format_osu_datetime(value: &DateTime<Utc>) -> String {
    value.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trips() {
        let original = "2021-03-14 12:34:56";
        let parsed = parse_osu_datetime(original).unwrap();
        assert_eq!(format_osu_datetime(&parsed), original);
    }

    #[test]
    fn mode_selects_correct_difficulty_column() {
        let row = UpstreamBeatmapRow {
            beatmap_id: "1".into(),
            beatmapset_id: "2".into(),
            file_md5: "abc".into(),
            mode: "2".into(),
            artist: "a".into(),
            title: "t".into(),
            version: "v".into(),
            creator: "c".into(),
            count_normal: "1".into(),
            count_slider: "2".into(),
            count_spinner: "0".into(),
            max_combo: Some("100".into()),
            approved: "1".into(),
            approved_date: "2021-01-01 00:00:00".into(),
            bpm: "180".into(),
            hit_length: "60".into(),
            diff_size: "4".into(),
            diff_approach: "9".into(),
            diff_overall: "8".into(),
            diff_drain: "5".into(),
            difficultyrating: Some("5.5".into()),
        };
        let beatmap = Beatmap::try_from(&row).unwrap();
        assert_eq!(beatmap.difficulty_ctb, Some(5.5));
        assert_eq!(beatmap.difficulty_std, None);
        assert_eq!(beatmap.ranked_status, 1);
    }

    #[test]
    fn malformed_numeric_field_is_reported_not_panicked() {
        let mut row_source = UpstreamBeatmapRow {
            beatmap_id: "not-a-number".into(),
            beatmapset_id: "2".into(),
            file_md5: "abc".into(),
            mode: "0".into(),
            artist: "a".into(),
            title: "t".into(),
            version: "v".into(),
            creator: "c".into(),
            count_normal: "1".into(),
            count_slider: "2".into(),
            count_spinner: "0".into(),
            max_combo: None,
            approved: "1".into(),
            approved_date: "2021-01-01 00:00:00".into(),
            bpm: "180".into(),
            hit_length: "60".into(),
            diff_size: "4".into(),
            diff_approach: "9".into(),
            diff_overall: "8".into(),
            diff_drain: "5".into(),
            difficultyrating: None,
        };
        assert!(Beatmap::try_from(&row_source).is_err());
        row_source.beatmap_id = "1".into();
        assert!(Beatmap::try_from(&row_source).is_ok());
    }
}
