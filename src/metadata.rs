//! Static comparippson metadata, loaded once at process startup.
//!
//! Grounded on `spec.md` §3/§6: a JSON file at
//! `<db_dir>/comparippson/asdb/3.9/metadata.json` shaped
//! `{entries: {<entry_id>: {locus, type, accession, start, end}}}`, read
//! once in `asdb_jobs/__main__.py::main` and stashed on the application
//! object (`app['comparippson_metadata']`). Here it lives behind an `Arc`
//! shared by every dispatcher's handler.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::error::AsdbJobsError;

/// One entry of the comparippson static metadata table.
///
/// `start`/`end` are kept as raw JSON values rather than a fixed type:
/// `spec.md` §4.5 requires their original JSON shape to be preserved
/// verbatim in the enriched result, and the original data has been observed
/// as both numbers and strings depending on the entry.
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataEntry {
    pub locus: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub accession: String,
    pub start: Value,
    pub end: Value,
}

#[derive(Debug, Deserialize)]
struct MetadataFile {
    entries: HashMap<String, MetadataEntry>,
}

/// The comparippson static metadata table: entry key is the first
/// `|`-delimited field of a subject accession.
#[derive(Debug, Clone)]
pub struct StaticMetadata {
    entries: HashMap<String, MetadataEntry>,
}

impl StaticMetadata {
    /// Load from `<db_dir>/comparippson/asdb/3.9/metadata.json`.
    pub fn load(db_dir: &Path) -> Result<Self, AsdbJobsError> {
        let path = Self::path_under(db_dir);
        let data = std::fs::read_to_string(&path)
            .map_err(|err| AsdbJobsError::Metadata(format!("{}: {}", path.display(), err)))?;
        let file: MetadataFile = serde_json::from_str(&data)
            .map_err(|err| AsdbJobsError::Metadata(format!("{}: {}", path.display(), err)))?;
        Ok(Self { entries: file.entries })
    }

    pub fn path_under(db_dir: &Path) -> std::path::PathBuf {
        db_dir.join("comparippson").join("asdb").join("3.9").join("metadata.json")
    }

    /// Look up the metadata entry for a subject accession's entry id (the
    /// substring preceding its first `|`).
    pub fn lookup(&self, entry_id: &str) -> Result<&MetadataEntry, AsdbJobsError> {
        self.entries
            .get(entry_id)
            .ok_or_else(|| AsdbJobsError::MissingMetadataEntry(entry_id.to_string()))
    }

    /// Build a table directly from entries, bypassing the file on disk.
    /// Used by callers under test (e.g. `results.rs`'s enrichment tests).
    pub fn from_entries(entries: HashMap<String, MetadataEntry>) -> Self {
        Self { entries }
    }
}
