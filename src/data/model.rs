use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::columns::PeakColumn;

// ---------------------------------------------------------------------------
// MetadataValue – a single free-form metadata cell
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata cell, as read from Feather / Parquet / CSV.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    /// ISO-8601 date string kept as text.
    Date(String),
    Null,
}

impl fmt::Display for MetadataValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetadataValue::String(s) | MetadataValue::Date(s) => write!(f, "{s}"),
            MetadataValue::Integer(i) => write!(f, "{i}"),
            MetadataValue::Float(v) => write!(f, "{v}"),
            MetadataValue::Bool(b) => write!(f, "{b}"),
            MetadataValue::Null => write!(f, "<null>"),
        }
    }
}

impl MetadataValue {
    /// A CSV cell. CSV carries no types, so the text is kept exactly as
    /// written (`007` stays `007`); only empty cells become null.
    pub fn from_text(s: &str) -> MetadataValue {
        if s.is_empty() {
            MetadataValue::Null
        } else {
            MetadataValue::String(s.to_string())
        }
    }

    /// Text form for categorical use; `None` only for null.
    pub fn as_text(&self) -> Option<String> {
        match self {
            MetadataValue::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// Truthiness for flag columns (`true`, `yes`, `y`, `1`).
    pub fn as_flag(&self) -> bool {
        match self {
            MetadataValue::Bool(b) => *b,
            MetadataValue::Integer(i) => *i != 0,
            MetadataValue::Float(f) => *f != 0.0,
            MetadataValue::String(s) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "y" | "1" | "t"
            ),
            MetadataValue::Date(_) | MetadataValue::Null => false,
        }
    }
}

// ---------------------------------------------------------------------------
// NormalizedKey – enhancer identifier used for joining
// ---------------------------------------------------------------------------

/// An enhancer identifier after trimming and case folding. Only
/// `metadata::normalize_key` builds these.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NormalizedKey(pub(crate) String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Peak table
// ---------------------------------------------------------------------------

/// One accessibility measurement: one enhancer in one cell type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeakRecord {
    pub enhancer_id: String,
    pub cell_type: String,
    pub chrom: Option<String>,
    pub start: i64,
    pub end: i64,
    pub accessibility_score: f64,
    pub position_index: Option<i64>,
}

/// Where a block of rows in the unified table came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChunkSource {
    pub name: String,
    pub part: Option<u32>,
    pub chunk: Option<u32>,
    pub rows: usize,
}

/// The concatenation of every chunk, in partition order.
#[derive(Debug, Clone)]
pub struct PeakTable {
    pub records: Vec<PeakRecord>,
    /// Canonical columns present in the first chunk.
    pub columns: Vec<PeakColumn>,
    pub sources: Vec<ChunkSource>,
}

impl PeakTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// SHA-256 over every row in table order.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for r in &self.records {
            hasher.update(r.enhancer_id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(r.cell_type.as_bytes());
            hasher.update([0x1f]);
            hasher.update(r.chrom.as_deref().unwrap_or("").as_bytes());
            hasher.update([0x1f]);
            hasher.update(r.start.to_le_bytes());
            hasher.update(r.end.to_le_bytes());
            hasher.update(r.accessibility_score.to_bits().to_le_bytes());
            hasher.update(r.position_index.unwrap_or(i64::MIN).to_le_bytes());
            hasher.update([0x1e]);
        }
        format!("{:x}", hasher.finalize())
    }
}

// ---------------------------------------------------------------------------
// Metadata table
// ---------------------------------------------------------------------------

/// The four categorical fields the dashboard filters and reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DescriptiveField {
    Cargo,
    Experiment,
    Gene,
    GcDelivered,
}

impl DescriptiveField {
    pub const ALL: [DescriptiveField; 4] = [
        DescriptiveField::Cargo,
        DescriptiveField::Experiment,
        DescriptiveField::Gene,
        DescriptiveField::GcDelivered,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DescriptiveField::Cargo => "cargo",
            DescriptiveField::Experiment => "experiment",
            DescriptiveField::Gene => "gene",
            DescriptiveField::GcDelivered => "gc_delivered",
        }
    }
}

impl fmt::Display for DescriptiveField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One row of the metadata file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetadataRecord {
    pub enhancer_id: String,
    pub key: NormalizedKey,
    pub cargo: Option<String>,
    pub experiment: Option<String>,
    pub gene: Option<String>,
    pub gc_delivered: Option<String>,
    pub hall_of_fame: bool,
    /// 0-based position in the source file.
    pub row: usize,
    /// Every other column (image links, neuroglancer views, MIPs, ...).
    pub attributes: BTreeMap<String, MetadataValue>,
}

impl MetadataRecord {
    pub fn field(&self, field: DescriptiveField) -> Option<&str> {
        match field {
            DescriptiveField::Cargo => self.cargo.as_deref(),
            DescriptiveField::Experiment => self.experiment.as_deref(),
            DescriptiveField::Gene => self.gene.as_deref(),
            DescriptiveField::GcDelivered => self.gc_delivered.as_deref(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetadataTable {
    /// `None` for the placeholder table used when metadata is unavailable.
    pub source: Option<PathBuf>,
    pub records: Vec<MetadataRecord>,
    /// Rows dropped for a null or blank enhancer identifier.
    pub skipped_rows: usize,
}

impl MetadataTable {
    pub fn empty() -> Self {
        MetadataTable::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Enriched table
// ---------------------------------------------------------------------------

/// Peak rows left-joined with metadata. Built by `metadata::join`.
///
/// Rows are grouped by enhancer (normalized key) so enhancer-grain
/// questions do not need to rescan the peak rows.
#[derive(Debug, Clone)]
pub struct EnrichedTable {
    pub(crate) peaks: Arc<PeakTable>,
    pub(crate) metadata: Arc<MetadataTable>,
    /// Distinct normalized keys in order of first appearance.
    pub(crate) enhancers: Vec<NormalizedKey>,
    /// Peak row → index into `enhancers`.
    pub(crate) row_enhancer: Vec<usize>,
    /// Enhancer → index into `metadata.records`.
    pub(crate) enhancer_match: Vec<Option<usize>>,
    /// Keys that matched more than one metadata row, with the row count.
    pub(crate) ambiguous: BTreeMap<NormalizedKey, usize>,
}

/// A borrowed view of one enriched row.
#[derive(Debug, Clone, Copy)]
pub struct EnrichedRow<'a> {
    pub index: usize,
    pub key: &'a NormalizedKey,
    pub peak: &'a PeakRecord,
    pub metadata: Option<&'a MetadataRecord>,
}

impl<'a> EnrichedRow<'a> {
    pub fn field(&self, field: DescriptiveField) -> Option<&'a str> {
        self.metadata.and_then(|m| m.field(field))
    }

    pub fn hall_of_fame(&self) -> bool {
        self.metadata.is_some_and(|m| m.hall_of_fame)
    }
}

impl EnrichedTable {
    pub fn len(&self) -> usize {
        self.peaks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peaks.is_empty()
    }

    pub fn peaks(&self) -> &PeakTable {
        &self.peaks
    }

    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    pub fn row(&self, index: usize) -> Option<EnrichedRow<'_>> {
        let peak = self.peaks.records.get(index)?;
        let enhancer = self.row_enhancer[index];
        Some(EnrichedRow {
            index,
            key: &self.enhancers[enhancer],
            peak,
            metadata: self.enhancer_metadata(enhancer),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = EnrichedRow<'_>> + '_ {
        (0..self.len()).filter_map(move |i| self.row(i))
    }

    /// Number of distinct enhancers (by normalized key) in the peak data.
    pub fn enhancer_count(&self) -> usize {
        self.enhancers.len()
    }

    /// Distinct enhancers with their matched metadata row, if any.
    pub fn enhancers(&self) -> impl Iterator<Item = (&NormalizedKey, Option<&MetadataRecord>)> + '_ {
        self.enhancers
            .iter()
            .enumerate()
            .map(move |(i, key)| (key, self.enhancer_metadata(i)))
    }

    /// Index into `enhancers()` for a peak row.
    pub fn enhancer_of(&self, row: usize) -> Option<usize> {
        self.row_enhancer.get(row).copied()
    }

    pub fn ambiguous_keys(&self) -> &BTreeMap<NormalizedKey, usize> {
        &self.ambiguous
    }

    fn enhancer_metadata(&self, enhancer: usize) -> Option<&MetadataRecord> {
        self.enhancer_match
            .get(enhancer)
            .copied()
            .flatten()
            .map(|m| &self.metadata.records[m])
    }
}
