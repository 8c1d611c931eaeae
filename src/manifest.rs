//! Evidence manifest: what the compiler and engine know about the
//! physical evidence files.
//!
//! Manifest entries are produced by the external ingestor and are
//! read-only here. Each entry binds a dataset alias to a Parquet file,
//! its content hash, row count, and column schema. The ledger references
//! evidence by `(alias, hash)`, never by path alone.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::sql::emit::is_identifier;

/// Coarse logical column types, as reported by the ingestor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalType {
    String,
    Numeric,
    Boolean,
    Date,
    Timestamp,
}

impl LogicalType {
    pub fn is_temporal(self) -> bool {
        matches!(self, LogicalType::Date | LogicalType::Timestamp)
    }
}

impl std::fmt::Display for LogicalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogicalType::String => "string",
            LogicalType::Numeric => "numeric",
            LogicalType::Boolean => "boolean",
            LogicalType::Date => "date",
            LogicalType::Timestamp => "timestamp",
        };
        write!(f, "{}", name)
    }
}

/// One column of a dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestColumn {
    pub name: String,
    pub logical_type: LogicalType,
}

/// Where the evidence came from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceMetadata {
    pub source_system: Option<String>,
    pub extracted_at: Option<DateTime<Utc>>,
    pub schema_version: Option<String>,
}

/// Errors raised when a manifest is assembled from ingestor output.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("duplicate dataset alias '{0}'")]
    DuplicateAlias(String),

    #[error("dataset alias '{0}' is not a valid identifier")]
    InvalidAlias(String),

    #[error("dataset '{alias}': '{hash}' is not a 64-character hex digest")]
    InvalidHash { alias: String, hash: String },

    #[error("dataset '{alias}': column '{column}' is not a valid identifier")]
    InvalidColumn { alias: String, column: String },
}

/// An immutable descriptor for one evidence dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ManifestEntry {
    pub alias: String,
    pub path: PathBuf,
    /// SHA-256 of the file bytes, lowercase hex.
    pub content_hash: String,
    pub row_count: u64,
    pub columns: Vec<ManifestColumn>,
    #[serde(default)]
    pub source: SourceMetadata,
}

impl ManifestEntry {
    /// Look up a column's logical type.
    pub fn column_type(&self, name: &str) -> Option<LogicalType> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.logical_type)
    }

    /// A short digest over the ordered `(name, type)` schema. Any schema
    /// change produces a different fingerprint.
    pub fn schema_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for column in &self.columns {
            hasher.update(column.name.as_bytes());
            hasher.update(b":");
            hasher.update(column.logical_type.to_string().as_bytes());
            hasher.update(b",");
        }
        let digest = hasher.finalize();
        hex_encode(&digest[..8])
    }

    fn check(&self) -> Result<(), ManifestError> {
        if !is_identifier(&self.alias) {
            return Err(ManifestError::InvalidAlias(self.alias.clone()));
        }
        if self.content_hash.len() != 64
            || !self.content_hash.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(ManifestError::InvalidHash {
                alias: self.alias.clone(),
                hash: self.content_hash.clone(),
            });
        }
        for column in &self.columns {
            if !is_identifier(&column.name) {
                return Err(ManifestError::InvalidColumn {
                    alias: self.alias.clone(),
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// The full evidence manifest for one control run: one entry per alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ManifestEntry>", into = "Vec<ManifestEntry>")]
pub struct EvidenceManifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl EvidenceManifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Result<Self, ManifestError> {
        let mut map = BTreeMap::new();
        for entry in entries {
            entry.check()?;
            let alias = entry.alias.clone();
            if map.insert(alias.clone(), entry).is_some() {
                return Err(ManifestError::DuplicateAlias(alias));
            }
        }
        Ok(Self { entries: map })
    }

    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, alias: &str) -> Option<&ManifestEntry> {
        self.entries.get(alias)
    }

    pub fn path_of(&self, alias: &str) -> Option<&Path> {
        self.entries.get(alias).map(|e| e.path.as_path())
    }

    pub fn hash_of(&self, alias: &str) -> Option<&str> {
        self.entries.get(alias).map(|e| e.content_hash.as_str())
    }

    pub fn row_count_of(&self, alias: &str) -> Option<u64> {
        self.entries.get(alias).map(|e| e.row_count)
    }

    pub fn columns_of(&self, alias: &str) -> Option<&[ManifestColumn]> {
        self.entries.get(alias).map(|e| e.columns.as_slice())
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.values()
    }

    /// Every alias mapped to its content hash.
    pub fn all_hashes(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(alias, entry)| (alias.clone(), entry.content_hash.clone()))
            .collect()
    }
}

impl TryFrom<Vec<ManifestEntry>> for EvidenceManifest {
    type Error = ManifestError;
    fn try_from(entries: Vec<ManifestEntry>) -> Result<Self, Self::Error> {
        Self::new(entries)
    }
}

impl From<EvidenceManifest> for Vec<ManifestEntry> {
    fn from(manifest: EvidenceManifest) -> Self {
        manifest.entries.into_values().collect()
    }
}

/// Streaming SHA-256 of a file's bytes, lowercase hex.
///
/// Hashes are normally computed by the ingestor; this helper lets ledger
/// consumers re-verify evidence against recorded hashes.
pub fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
