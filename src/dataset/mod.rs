//! Rating tables on disk.
//!
//! Ratings files are headed CSV with one observation per row:
//! `u_id,i_id,rating,timestamp`. `user_id`/`item_id` are accepted as column
//! names too, and the timestamp column (unix seconds) is optional.

use crate::error::{Result, SvdError};
use crate::models::{ExternalId, Rating};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DATA_DIR_ENV: &str = "FUNKREC_DATA";
const DEFAULT_DATA_DIR: &str = "funkrec_data";

const USER_COLUMNS: [&str; 2] = ["u_id", "user_id"];
const ITEM_COLUMNS: [&str; 2] = ["i_id", "item_id"];
const RATING_COLUMNS: [&str; 1] = ["rating"];
const TIMESTAMP_COLUMNS: [&str; 1] = ["timestamp"];

fn find_column(headers: &csv::StringRecord, names: &[&str]) -> Option<usize> {
    headers
        .iter()
        .position(|header| names.iter().any(|name| header.trim().eq_ignore_ascii_case(name)))
}

fn require_column(headers: &csv::StringRecord, names: &[&str]) -> Result<usize> {
    find_column(headers, names).ok_or_else(|| SvdError::MissingColumn(names[0].to_string()))
}

fn field<'r>(record: &'r csv::StringRecord, column: usize, index: usize, name: &str) -> Result<&'r str> {
    record.get(column).ok_or_else(|| SvdError::InvalidRecord {
        index,
        reason: format!("missing {} field", name),
    })
}

/// Load a ratings file, optionally ordering the rows by timestamp.
///
/// The sort is stable and rows without a timestamp come first.
pub fn load_ratings_csv<P: AsRef<Path>>(path: P, sort_by_timestamp: bool) -> Result<Vec<Rating>> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();

    let user_col = require_column(&headers, &USER_COLUMNS)?;
    let item_col = require_column(&headers, &ITEM_COLUMNS)?;
    let rating_col = require_column(&headers, &RATING_COLUMNS)?;
    let timestamp_col = find_column(&headers, &TIMESTAMP_COLUMNS);

    let mut ratings = Vec::new();
    for (index, result) in reader.records().enumerate() {
        let record = result?;

        let raw_rating = field(&record, rating_col, index, "rating")?;
        let rating = raw_rating
            .trim()
            .parse::<f64>()
            .map_err(|e| SvdError::InvalidRecord {
                index,
                reason: format!("rating {:?}: {}", raw_rating, e),
            })?;

        let mut row = Rating::new(
            ExternalId::parse(field(&record, user_col, index, "user")?),
            ExternalId::parse(field(&record, item_col, index, "item")?),
            rating,
        );
        if let Some(column) = timestamp_col {
            if let Some(timestamp) = parse_timestamp(record.get(column).unwrap_or(""), index)? {
                row = row.with_timestamp(timestamp);
            }
        }
        ratings.push(row);
    }

    if sort_by_timestamp {
        ratings.sort_by_key(|row| row.timestamp);
    }

    info!("Loaded {} ratings from {}", ratings.len(), path.display());
    Ok(ratings)
}

fn parse_timestamp(raw: &str, index: usize) -> Result<Option<DateTime<Utc>>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let seconds = raw.parse::<i64>().map_err(|e| SvdError::InvalidRecord {
        index,
        reason: format!("timestamp {:?}: {}", raw, e),
    })?;
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(Some)
        .ok_or_else(|| SvdError::InvalidRecord {
            index,
            reason: format!("timestamp {} out of range", seconds),
        })
}

pub fn write_predictions_csv<P: AsRef<Path>>(path: P, rows: &[Rating], predictions: &[f64]) -> Result<()> {
    if rows.len() != predictions.len() {
        return Err(SvdError::LengthMismatch {
            expected: rows.len(),
            found: predictions.len(),
        });
    }

    let mut writer = csv::Writer::from_path(path.as_ref())?;
    writer.write_record(["u_id", "i_id", "rating", "prediction"])?;
    for (row, prediction) in rows.iter().zip(predictions) {
        writer.write_record([
            row.user_id.to_string(),
            row.item_id.to_string(),
            row.rating.to_string(),
            prediction.to_string(),
        ])?;
    }
    writer.flush()?;

    debug!("Wrote {} predictions to {}", rows.len(), path.as_ref().display());
    Ok(())
}

/// Resolve the data directory and create it if needed.
///
/// Order: explicit path, `FUNKREC_DATA`, `$HOME/funkrec_data`.
pub fn data_dir_path(explicit: Option<&Path>) -> Result<PathBuf> {
    let dir = match explicit {
        Some(path) => path.to_path_buf(),
        None => match std::env::var_os(DATA_DIR_ENV) {
            Some(value) => PathBuf::from(value),
            None => std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_default()
                .join(DEFAULT_DATA_DIR),
        },
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn resolve_in(data_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        data_dir.join(path)
    }
}
