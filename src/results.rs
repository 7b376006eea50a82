//! Result records: parsing the analysis tool's tab-separated output and
//! enriching it with static metadata (`spec.md` §4.5).
//!
//! Grounded on `original_source/asdb_jobs/blast.py`'s `BlastResult`,
//! `ComparippsonResult`, and `parse_blast`, reimplemented as `TryFrom<&str>`
//! / `From` impls instead of the original's `classmethod` constructors.

use serde::Serialize;
use serde_json::Value;

use crate::error::AsdbJobsError;
use crate::metadata::StaticMetadata;

const BLAST_COLUMNS: usize = 11;

/// One parsed row of `blastp`/`diamond blastp` tabular output
/// (`-outfmt "6 qacc sacc nident qseq qstart qend qlen sseq sstart send slen"`).
#[derive(Debug, Clone, PartialEq)]
pub struct BlastResult {
    pub q_acc: String,
    pub s_acc: String,
    pub identity: i64,
    pub q_seq: String,
    pub q_start: i64,
    pub q_end: i64,
    pub q_len: i64,
    pub s_seq: String,
    pub s_start: i64,
    pub s_end: i64,
    pub s_len: i64,
}

impl BlastResult {
    /// Parse a single tab-separated line. Rejects the whole job (via an
    /// error, not a partial result) if the column count doesn't match the
    /// tool's fixed, known arity, or if a numeric field fails to parse, or
    /// if `q_len` is zero (division by zero computing `identity`).
    pub fn parse_line(line: &str) -> Result<Self, AsdbJobsError> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() != BLAST_COLUMNS {
            return Err(AsdbJobsError::MalformedResultLine(format!(
                "expected {} columns, got {}: {:?}",
                BLAST_COLUMNS,
                parts.len(),
                line
            )));
        }

        let parse_int = |field: &str, name: &str| -> Result<i64, AsdbJobsError> {
            field
                .parse::<i64>()
                .map_err(|_| AsdbJobsError::MalformedResultLine(format!("invalid {}: {:?}", name, field)))
        };

        let q_acc = parts[0].to_string();
        let s_acc = parts[1].to_string();
        let nident = parse_int(parts[2], "nident")?;
        let q_seq = parts[3].to_string();
        let q_start = parse_int(parts[4], "q_start")?;
        let q_end = parse_int(parts[5], "q_end")?;
        let q_len = parse_int(parts[6], "q_len")?;
        let s_seq = parts[7].to_string();
        let s_start = parse_int(parts[8], "s_start")?;
        let s_end = parse_int(parts[9], "s_end")?;
        let s_len = parse_int(parts[10], "s_len")?;

        if q_len == 0 {
            return Err(AsdbJobsError::MalformedResultLine(
                "q_len is zero, cannot compute identity".to_string(),
            ));
        }

        let identity = ((nident as f64 / q_len as f64) * 100.0).round_ties_even() as i64;

        Ok(Self {
            q_acc,
            s_acc,
            identity,
            q_seq,
            q_start,
            q_end,
            q_len,
            s_seq,
            s_start,
            s_end,
            s_len,
        })
    }
}

/// Parse every line of the tool's stdout into [`BlastResult`]s. A single
/// malformed line fails the whole batch -- no partial hits are persisted.
pub fn parse_blast_lines(lines: &[String]) -> Result<Vec<BlastResult>, AsdbJobsError> {
    lines.iter().map(|line| BlastResult::parse_line(line)).collect()
}

/// `BlastResult` projected to JSON with the derived `identity`, used
/// unmodified for `clusterblast` hits.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClusterBlastResult {
    pub q_acc: String,
    pub s_acc: String,
    pub identity: i64,
    pub q_seq: String,
    pub q_start: i64,
    pub q_end: i64,
    pub q_len: i64,
    pub s_seq: String,
    pub s_start: i64,
    pub s_end: i64,
    pub s_len: i64,
}

impl From<BlastResult> for ClusterBlastResult {
    fn from(b: BlastResult) -> Self {
        Self {
            q_acc: b.q_acc,
            s_acc: b.s_acc,
            identity: b.identity,
            q_seq: b.q_seq,
            q_start: b.q_start,
            q_end: b.q_end,
            q_len: b.q_len,
            s_seq: b.s_seq,
            s_start: b.s_start,
            s_end: b.s_end,
            s_len: b.s_len,
        }
    }
}

/// A `BlastResult` enriched with static comparippson metadata looked up by
/// the entry id preceding the first `|` of the subject accession.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComparippsonResult {
    pub q_acc: String,
    pub s_locus: String,
    pub s_type: String,
    pub s_acc: String,
    pub s_rec_start: Value,
    pub s_rec_end: Value,
    pub identity: i64,
    pub q_seq: String,
    pub q_start: i64,
    pub q_end: i64,
    pub q_len: i64,
    pub s_seq: String,
    pub s_start: i64,
    pub s_end: i64,
    pub s_len: i64,
}

impl ComparippsonResult {
    /// Enrich a `BlastResult` with the metadata entry for its subject
    /// accession. A missing entry is a fatal job error (`spec.md` §4.5).
    pub fn from_blast(blast: BlastResult, metadata: &StaticMetadata) -> Result<Self, AsdbJobsError> {
        let entry_id = blast.s_acc.split('|').next().unwrap_or(&blast.s_acc);
        let entry = metadata.lookup(entry_id)?;

        Ok(Self {
            q_acc: blast.q_acc,
            s_locus: entry.locus.clone(),
            s_type: entry.kind.clone(),
            s_acc: entry.accession.clone(),
            s_rec_start: entry.start.clone(),
            s_rec_end: entry.end.clone(),
            identity: blast.identity,
            q_seq: blast.q_seq,
            q_start: blast.q_start,
            q_end: blast.q_end,
            q_len: blast.q_len,
            s_seq: blast.s_seq,
            s_start: blast.s_start,
            s_end: blast.s_end,
            s_len: blast.s_len,
        })
    }
}

/// Sort comparippson hits non-increasing by `identity`; ties keep their
/// input order (Rust's `sort_by` is stable).
pub fn sort_comparippson_descending(results: &mut [ComparippsonResult]) {
    results.sort_by(|a, b| b.identity.cmp(&a.identity));
}
