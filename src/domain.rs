use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LocatorError;

/// Width of one remote range bucket. Buckets are 1-based and inclusive-low.
pub const BUCKET_WIDTH: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Jpg,
    Png,
}

impl RasterFormat {
    pub fn extension(self) -> &'static str {
        match self {
            RasterFormat::Jpg => "jpg",
            RasterFormat::Png => "png",
        }
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// User supplied identity fields, before alias resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub source: String,
    pub major: String,
    pub minor: String,
    pub sheet: String,
    pub part: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilenameStem(String);

impl FilenameStem {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FilenameStem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bucket label for a candidate id: 1..=100 -> "1-100", 101..=200 -> "101-200".
pub fn range_bucket(id: u64) -> String {
    let low = (id.saturating_sub(1) / BUCKET_WIDTH) * BUCKET_WIDTH + 1;
    let high = low + BUCKET_WIDTH - 1;
    format!("{low}-{high}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeCandidate {
    pub id: u64,
    pub range_bucket: String,
}

impl ProbeCandidate {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            range_bucket: range_bucket(id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageDescriptor {
    pub width: u64,
    pub height: u64,
    pub encoding_profile: Option<String>,
}

#[derive(Deserialize)]
struct RawDescriptor {
    width: u64,
    height: u64,
    #[serde(default)]
    profile: Option<Value>,
}

impl ImageDescriptor {
    pub fn parse(body: &str) -> Result<Self, LocatorError> {
        let raw: RawDescriptor = serde_json::from_str(body)
            .map_err(|err| LocatorError::MalformedDescriptor(err.to_string()))?;
        let encoding_profile = match raw.profile {
            Some(Value::String(value)) => Some(value),
            Some(Value::Array(items)) => items
                .first()
                .and_then(|value| value.as_str())
                .map(|value| value.to_string()),
            _ => None,
        };
        Ok(Self {
            width: raw.width,
            height: raw.height,
            encoding_profile,
        })
    }

    pub fn megapixels(&self) -> f64 {
        let pixels = self.width as f64 * self.height as f64;
        (pixels / 1e6 * 10.0).round() / 10.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub source_manifest_path: PathBuf,
}

impl Artifact {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Local artifact name for a remote file: base name only, unsafe characters
/// replaced, extension forced to the raster format.
pub fn artifact_name(remote_file_name: &str, format: RasterFormat) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"));

    let base = remote_file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(remote_file_name);
    let stem = Path::new(base)
        .file_stem()
        .map(|value| value.to_string_lossy().to_string())
        .unwrap_or_else(|| base.to_string());
    let stem = unsafe_chars.replace_all(stem.trim(), "_");
    let stem = if stem.is_empty() { "image".into() } else { stem };
    format!("{stem}.{}", format.extension())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub location: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
}

impl ImageRef {
    /// Remote identifier of the image, relative to the catalog base.
    pub fn identifier(&self) -> String {
        let location = self.location.trim_end_matches('/');
        if location.is_empty() {
            self.file_name.clone()
        } else {
            format!("{location}/{}", self.file_name)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchDocument {
    pub id: String,
    pub collection_id: Option<String>,
    pub title: Option<String>,
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchResultSet {
    pub documents: Vec<SearchDocument>,
}

impl SearchResultSet {
    pub fn new(documents: Vec<SearchDocument>) -> Self {
        Self { documents }
    }

    pub fn find(&self, id: &str) -> Option<&SearchDocument> {
        self.documents.iter().find(|doc| doc.id == id)
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheToken(String);

impl CacheToken {
    pub fn mint() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CacheToken {
    type Err = LocatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::SessionExpired("empty token".to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}
