//! Filter selection for the catalog and its translation into a single
//! catalog query.
//!
//! Only one primary filter is honoured per query, in the order
//! genre, year, rating. The catalog could combine them, but the browsing
//! behaviour users know depends on this precedence, so it is kept as is.

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Minimum-rating buckets offered by the rating filter ("6+" .. "9+").
pub const RATING_BUCKETS: [u8; 4] = [9, 8, 7, 6];

/// Sentinel the genre control sends for "all genres".
pub const ALL_GENRES: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortKey {
    #[default]
    #[serde(rename = "popularity.desc")]
    PopularityDesc,
    #[serde(rename = "vote_average.desc")]
    VoteAverageDesc,
    #[serde(rename = "release_date.desc")]
    ReleaseDateDesc,
}

impl SortKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::PopularityDesc => "popularity.desc",
            SortKey::VoteAverageDesc => "vote_average.desc",
            SortKey::ReleaseDateDesc => "release_date.desc",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKey {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "" | "popularity.desc" => Ok(SortKey::PopularityDesc),
            "vote_average.desc" => Ok(SortKey::VoteAverageDesc),
            "release_date.desc" => Ok(SortKey::ReleaseDateDesc),
            other => Err(AppError::validation(format!("unknown sort key '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterField {
    Genre,
    Year,
    Rating,
    Sort,
}

impl FromStr for FilterField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "genre" => Ok(FilterField::Genre),
            "year" => Ok(FilterField::Year),
            "rating" => Ok(FilterField::Rating),
            "sort" | "sort_by" => Ok(FilterField::Sort),
            other => Err(AppError::validation(format!("unknown filter '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterSelection {
    pub genre: Option<i64>,
    pub year: Option<i32>,
    pub rating: Option<u8>,
    #[serde(default)]
    pub sort: SortKey,
}

/// Empty input and the "all" sentinel both mean "no filter".
fn is_unset(value: &str) -> bool {
    let v = value.trim();
    v.is_empty() || v.eq_ignore_ascii_case(ALL_GENRES)
}

impl FilterSelection {
    /// Updates one field from its textual control value. On error the
    /// selection is left untouched.
    pub fn set(&mut self, field: FilterField, value: &str) -> Result<()> {
        match field {
            FilterField::Genre => {
                self.genre = if is_unset(value) {
                    None
                } else {
                    Some(parse_genre(value)?)
                };
            }
            FilterField::Year => {
                self.year = if is_unset(value) {
                    None
                } else {
                    Some(parse_year(value)?)
                };
            }
            FilterField::Rating => {
                self.rating = if is_unset(value) {
                    None
                } else {
                    Some(parse_rating_bucket(value)?)
                };
            }
            FilterField::Sort => {
                self.sort = value.parse()?;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        *self = FilterSelection::default();
    }
}

fn parse_genre(value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| AppError::validation(format!("invalid genre id '{}'", value.trim())))
}

fn parse_year(value: &str) -> Result<i32> {
    value
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|y| (1874..=9999).contains(y))
        .ok_or_else(|| AppError::validation(format!("invalid year '{}'", value.trim())))
}

/// Accepts "8", "8+" or "8.0".
fn parse_rating_bucket(value: &str) -> Result<u8> {
    let raw = value.trim().trim_end_matches('+');
    let parsed = raw
        .parse::<f64>()
        .ok()
        .filter(|r| r.fract() == 0.0 && (1.0..=10.0).contains(r))
        .map(|r| r as u8)
        .filter(|bucket| RATING_BUCKETS.contains(bucket));
    match parsed {
        Some(bucket) => Ok(bucket),
        None => Err(AppError::validation(format!(
            "invalid rating bucket '{}'",
            value.trim()
        ))),
    }
}

/// The one catalog request a selection maps to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteQuery {
    Popular { sort: SortKey },
    ByGenre { genre: i64 },
    ByYear { year: i32 },
    ByRating { min: f64, max: f64 },
}

/// Inclusive vote-average range for a minimum-rating bucket.
pub fn rating_range(bucket: u8) -> (f64, f64) {
    let r = f64::from(bucket);
    ((r - 1.0).max(0.0), r.min(10.0))
}

pub fn resolve_query(selection: &FilterSelection) -> RemoteQuery {
    if let Some(genre) = selection.genre {
        RemoteQuery::ByGenre { genre }
    } else if let Some(year) = selection.year {
        RemoteQuery::ByYear { year }
    } else if let Some(bucket) = selection.rating {
        let (min, max) = rating_range(bucket);
        RemoteQuery::ByRating { min, max }
    } else {
        RemoteQuery::Popular {
            sort: selection.sort,
        }
    }
}
