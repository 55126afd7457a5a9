//! Header normalisation shared by the chunk and metadata readers.
//!
//! Source files are exported by different tools over time, so the same
//! column shows up as `Enhancer_ID`, `enhancer_id` or `id`, and the peak
//! chunks have used both `signal_value` and `accessibility_score`. Headers
//! are "squashed" (lowercased, non-alphanumerics removed) and looked up in
//! an alias table.

// ---------------------------------------------------------------------------
// Peak chunk columns
// ---------------------------------------------------------------------------

/// Canonical peak columns, in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PeakColumn {
    EnhancerId,
    CellType,
    Chrom,
    Start,
    End,
    AccessibilityScore,
    PositionIndex,
}

impl PeakColumn {
    pub const ALL: [PeakColumn; 7] = [
        PeakColumn::EnhancerId,
        PeakColumn::CellType,
        PeakColumn::Chrom,
        PeakColumn::Start,
        PeakColumn::End,
        PeakColumn::AccessibilityScore,
        PeakColumn::PositionIndex,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PeakColumn::EnhancerId => "enhancer_id",
            PeakColumn::CellType => "cell_type",
            PeakColumn::Chrom => "chr",
            PeakColumn::Start => "start",
            PeakColumn::End => "end",
            PeakColumn::AccessibilityScore => "accessibility_score",
            PeakColumn::PositionIndex => "position_index",
        }
    }

    /// Whether a chunk without this column is unusable.
    pub fn is_required(self) -> bool {
        !matches!(self, PeakColumn::Chrom | PeakColumn::PositionIndex)
    }

    fn aliases(self) -> &'static [&'static str] {
        match self {
            PeakColumn::EnhancerId => &["enhancerid", "id", "enhancer"],
            PeakColumn::CellType => &["celltype", "cellclass"],
            PeakColumn::Chrom => &["chr", "chrom", "chromosome"],
            PeakColumn::Start => &["start", "enhancerstart", "chromstart"],
            PeakColumn::End => &["end", "enhancerend", "chromend"],
            PeakColumn::AccessibilityScore => &[
                "accessibilityscore",
                "accessibility",
                "signalvalue",
                "score",
            ],
            PeakColumn::PositionIndex => &["positionindex", "genomicposition"],
        }
    }

    /// Resolve a raw header to a canonical column.
    pub fn from_header(header: &str) -> Option<PeakColumn> {
        let key = squash(header);
        PeakColumn::ALL
            .into_iter()
            .find(|col| col.aliases().contains(&key.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Metadata columns
// ---------------------------------------------------------------------------

/// Metadata columns with a fixed meaning. Everything else is kept as a
/// free-form attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataColumn {
    EnhancerId,
    Cargo,
    Experiment,
    Gene,
    GcDelivered,
    HallOfFame,
}

impl MetadataColumn {
    const ALL: [MetadataColumn; 6] = [
        MetadataColumn::EnhancerId,
        MetadataColumn::Cargo,
        MetadataColumn::Experiment,
        MetadataColumn::Gene,
        MetadataColumn::GcDelivered,
        MetadataColumn::HallOfFame,
    ];

    fn aliases(self) -> &'static [&'static str] {
        match self {
            MetadataColumn::EnhancerId => &["enhancerid", "id", "enhancer"],
            MetadataColumn::Cargo => &["cargo"],
            MetadataColumn::Experiment => &["experiment", "experimenttype"],
            MetadataColumn::Gene => &["gene", "proximalgene"],
            MetadataColumn::GcDelivered => &["gcdelivered", "gcdelivery", "deliverymethod"],
            MetadataColumn::HallOfFame => &["halloffame", "hof", "ishof"],
        }
    }

    pub fn from_header(header: &str) -> Option<MetadataColumn> {
        let key = squash(header);
        MetadataColumn::ALL
            .into_iter()
            .find(|col| col.aliases().contains(&key.as_str()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lowercase and drop everything that is not alphanumeric.
pub fn squash(header: &str) -> String {
    header
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// `Neuroglancer 1` → `neuroglancer_1`, `Coronal_MIP` → `coronal_mip`.
pub fn snake_case(header: &str) -> String {
    let mut out = String::with_capacity(header.len());
    for c in header.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}
