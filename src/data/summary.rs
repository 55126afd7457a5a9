use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::info;
use serde::Serialize;

use super::model::{EnrichedTable, MetadataValue, NormalizedKey};

// ---------------------------------------------------------------------------
// Dataset summary
// ---------------------------------------------------------------------------

/// Headline numbers shown above the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSummary {
    pub total_enhancers: usize,
    pub total_measurements: usize,
    pub cell_types: usize,
    pub chromosomes: usize,
    pub max_accessibility: Option<f64>,
    pub mean_accessibility: Option<f64>,
}

impl DatasetSummary {
    pub fn from_table(table: &EnrichedTable) -> Self {
        let records = &table.peaks().records;
        let cell_types: HashSet<&str> = records.iter().map(|r| r.cell_type.as_str()).collect();
        let chromosomes: HashSet<&str> = records.iter().filter_map(|r| r.chrom.as_deref()).collect();
        let (max, sum) = records.iter().fold((f64::NEG_INFINITY, 0.0), |(max, sum), r| {
            (max.max(r.accessibility_score), sum + r.accessibility_score)
        });
        let any = !records.is_empty();

        DatasetSummary {
            total_enhancers: table.enhancer_count(),
            total_measurements: records.len(),
            cell_types: cell_types.len(),
            chromosomes: chromosomes.len(),
            max_accessibility: any.then_some(max),
            mean_accessibility: any.then(|| sum / records.len() as f64),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity report
// ---------------------------------------------------------------------------

/// Cross-checks between the peak and metadata tables, logged at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    pub peak_rows: usize,
    pub peak_enhancers: usize,
    pub cell_types: usize,
    pub metadata_records: usize,
    pub metadata_enhancers: usize,
    /// Enhancers present in both tables.
    pub common_enhancers: usize,
    pub skipped_metadata_rows: usize,
    pub ambiguous_keys: usize,
}

impl IntegrityReport {
    pub fn build(table: &EnrichedTable) -> Self {
        let metadata = table.metadata();
        let metadata_keys: BTreeSet<&NormalizedKey> = metadata.records.iter().map(|r| &r.key).collect();
        let cell_types: HashSet<&str> = table
            .peaks()
            .records
            .iter()
            .map(|r| r.cell_type.as_str())
            .collect();

        IntegrityReport {
            peak_rows: table.len(),
            peak_enhancers: table.enhancer_count(),
            cell_types: cell_types.len(),
            metadata_records: metadata.len(),
            metadata_enhancers: metadata_keys.len(),
            common_enhancers: table.enhancers().filter(|(_, m)| m.is_some()).count(),
            skipped_metadata_rows: metadata.skipped_rows,
            ambiguous_keys: table.ambiguous_keys().len(),
        }
    }

    pub fn log(&self) {
        info!(
            "peak data: {} rows, {} enhancers, {} cell types",
            self.peak_rows, self.peak_enhancers, self.cell_types
        );
        info!(
            "metadata: {} records, {} enhancers ({} rows skipped, {} ambiguous keys)",
            self.metadata_records,
            self.metadata_enhancers,
            self.skipped_metadata_rows,
            self.ambiguous_keys
        );
        info!("enhancers common to both: {}", self.common_enhancers);
    }
}

// ---------------------------------------------------------------------------
// Enhancer catalogue
// ---------------------------------------------------------------------------

/// One enhancer with its descriptive metadata and accessibility statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnhancerEntry {
    pub key: NormalizedKey,
    /// Identifier as first seen in the peak data.
    pub enhancer_id: String,
    pub chrom: Option<String>,
    pub start: i64,
    pub end: i64,
    pub hall_of_fame: bool,
    pub cargo: Option<String>,
    pub experiment: Option<String>,
    pub gene: Option<String>,
    pub gc_delivered: Option<String>,
    /// Image, viewer and other free-form metadata columns.
    pub attributes: BTreeMap<String, MetadataValue>,
    pub cell_types: usize,
    pub measurements: usize,
    pub max_accessibility: f64,
    pub mean_accessibility: f64,
    /// Sample standard deviation; `None` for a single measurement.
    pub std_accessibility: Option<f64>,
}

#[derive(Default)]
struct Accumulator<'a> {
    first_row: Option<usize>,
    cell_types: HashSet<&'a str>,
    n: usize,
    mean: f64,
    m2: f64,
    max: f64,
}

/// One entry per enhancer in the peak data, sorted by identifier.
pub fn enhancer_catalog(table: &EnrichedTable) -> Vec<EnhancerEntry> {
    let mut acc: Vec<Accumulator<'_>> = (0..table.enhancer_count())
        .map(|_| Accumulator {
            max: f64::NEG_INFINITY,
            ..Accumulator::default()
        })
        .collect();

    for row in table.rows() {
        let Some(e) = table.enhancer_of(row.index) else {
            continue;
        };
        let a = &mut acc[e];
        a.first_row.get_or_insert(row.index);
        a.cell_types.insert(row.peak.cell_type.as_str());
        // Welford update
        let x = row.peak.accessibility_score;
        a.n += 1;
        let delta = x - a.mean;
        a.mean += delta / a.n as f64;
        a.m2 += delta * (x - a.mean);
        a.max = a.max.max(x);
    }

    let mut entries: Vec<EnhancerEntry> = acc
        .into_iter()
        .filter_map(|a| {
            let row = table.row(a.first_row?)?;
            let meta = row.metadata;
            Some(EnhancerEntry {
                key: row.key.clone(),
                enhancer_id: row.peak.enhancer_id.clone(),
                chrom: row.peak.chrom.clone(),
                start: row.peak.start,
                end: row.peak.end,
                hall_of_fame: row.hall_of_fame(),
                cargo: meta.and_then(|m| m.cargo.clone()),
                experiment: meta.and_then(|m| m.experiment.clone()),
                gene: meta.and_then(|m| m.gene.clone()),
                gc_delivered: meta.and_then(|m| m.gc_delivered.clone()),
                attributes: meta.map(|m| m.attributes.clone()).unwrap_or_default(),
                cell_types: a.cell_types.len(),
                measurements: a.n,
                max_accessibility: a.max,
                mean_accessibility: a.mean,
                std_accessibility: (a.n > 1).then(|| (a.m2 / (a.n - 1) as f64).sqrt()),
            })
        })
        .collect();
    entries.sort_by(|a, b| a.enhancer_id.cmp(&b.enhancer_id).then_with(|| a.key.cmp(&b.key)));
    entries
}
