use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FetchError, MaterializeError, ResolutionError};

static IMAGE_KEY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("image key pattern compiles"));

/// A Mapillary username as used for lookups and cache keys.
///
/// Comma separated input is accepted but only the first name is kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Username(String);

impl Username {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Username {
    type Err = ResolutionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let first = match value.split_once(',') {
            Some((first, _)) => {
                tracing::info!("list of usernames given, using the first one only");
                first
            }
            None => value,
        };
        let normalized = first.trim();
        if normalized.is_empty() {
            return Err(ResolutionError::InvalidUsername(value.to_string()));
        }
        Ok(Self(normalized.to_string()))
    }
}

/// Opaque account key assigned by Mapillary (`key` in the user record).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A resolved Mapillary user. Profile fields other than the key are kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    #[serde(skip)]
    pub username: Username,
    pub key: AccountId,
    #[serde(flatten)]
    pub profile: Map<String, Value>,
}

impl Account {
    pub fn from_record(username: Username, record: Value) -> Result<Self, ResolutionError> {
        let Value::Object(mut profile) = record else {
            return Err(ResolutionError::Malformed(
                "user record is not an object".to_string(),
            ));
        };
        let key = match profile.remove("key") {
            Some(Value::String(key)) if !key.is_empty() => AccountId(key),
            _ => {
                return Err(ResolutionError::Malformed(
                    "user record has no string key".to_string(),
                ));
            }
        };
        Ok(Self {
            username,
            key,
            profile,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
pub enum Encoding {
    #[serde(rename = "json")]
    #[value(name = "json")]
    Structured,
    #[serde(rename = "gpx")]
    #[value(name = "gpx")]
    TrackLog,
}

impl Encoding {
    pub fn extension(self) -> &'static str {
        match self {
            Encoding::Structured => "json",
            Encoding::TrackLog => "gpx",
        }
    }

    pub fn accept_header(self) -> Option<&'static str> {
        match self {
            Encoding::Structured => None,
            Encoding::TrackLog => Some("application/gpx+xml"),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

impl FromStr for Encoding {
    type Err = FetchError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Structured),
            "gpx" => Ok(Encoding::TrackLog),
            _ => Err(FetchError::InvalidFormat(value.to_string())),
        }
    }
}

/// Capture-date window passed to the sequences endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimeRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, FetchError> {
        if start > end {
            return Err(FetchError::InvalidTimeRange {
                start: start.to_string(),
                end: end.to_string(),
            });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap_or(NaiveDate::MIN),
            end: NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or(NaiveDate::MAX),
        }
    }
}

/// Image identifier, restricted to characters that are safe in a file name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey(String);

impl ImageKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ImageKey {
    type Err = MaterializeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if !IMAGE_KEY_RE.is_match(value) {
            return Err(MaterializeError::InvalidImageKey(value.to_string()));
        }
        Ok(Self(value.to_string()))
    }
}

/// A GeoJSON position: `[lon, lat]`, `[lon, lat, alt]`, or longer.
///
/// Components after the altitude are kept in `extra` so that equality and
/// serialization see the whole position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct Coordinate {
    pub lon: f64,
    pub lat: f64,
    pub alt: Option<f64>,
    pub extra: Vec<f64>,
}

impl Coordinate {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self {
            lon,
            lat,
            alt: None,
            extra: Vec::new(),
        }
    }
}

impl TryFrom<Vec<f64>> for Coordinate {
    type Error = String;

    fn try_from(value: Vec<f64>) -> Result<Self, Self::Error> {
        match value.as_slice() {
            [lon, lat, rest @ ..] => Ok(Self {
                lon: *lon,
                lat: *lat,
                alt: rest.first().copied(),
                extra: rest.iter().skip(1).copied().collect(),
            }),
            other => Err(format!(
                "coordinate needs at least 2 components, got {}",
                other.len()
            )),
        }
    }
}

impl From<Coordinate> for Vec<f64> {
    fn from(value: Coordinate) -> Self {
        let mut out = vec![value.lon, value.lat];
        out.extend(value.alt);
        out.extend(value.extra);
        out
    }
}

/// One contiguous piece of a user's path, as returned by the sequences endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequenceFragment {
    pub image_keys: Vec<String>,
    pub coordinates: Vec<Coordinate>,
}

/// All of a user's fragments concatenated in API order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MergedTrajectory {
    pub image_keys: Vec<String>,
    pub coordinates: Vec<Coordinate>,
}

impl MergedTrajectory {
    pub fn len(&self) -> usize {
        self.image_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_keys.is_empty()
    }
}
