use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use serde::Serialize;

use super::cache::DatasetCache;
use super::chunks::ChunkLoader;
use super::metadata::{completeness_all, join, Completeness, MetadataJoiner};
use super::model::{ChunkSource, DescriptiveField, EnrichedTable, MetadataTable, PeakTable};
use super::summary::{enhancer_catalog, DatasetSummary, EnhancerEntry, IntegrityReport};
use crate::config::DashboardConfig;
use crate::error::{LoadError, Result};

// ---------------------------------------------------------------------------
// Loaded dataset
// ---------------------------------------------------------------------------

/// Outcome of the metadata half of a load.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MetadataStatus {
    Loaded { path: PathBuf, records: usize },
    /// Peak data is shown with every descriptive field empty.
    Unavailable { reason: String },
    NotConfigured,
}

impl MetadataStatus {
    pub fn is_loaded(&self) -> bool {
        matches!(self, MetadataStatus::Loaded { .. })
    }
}

/// Everything one dashboard session works from.
#[derive(Debug, Clone)]
pub struct LoadedDataset {
    pub enriched: EnrichedTable,
    pub metadata_status: MetadataStatus,
    pub completeness: BTreeMap<DescriptiveField, Completeness>,
    pub summary: DatasetSummary,
    pub integrity: IntegrityReport,
    pub catalog: Vec<EnhancerEntry>,
}

/// Serializable digest of a [`LoadedDataset`].
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport<'a> {
    pub chunks: &'a [ChunkSource],
    pub metadata: &'a MetadataStatus,
    pub summary: &'a DatasetSummary,
    pub integrity: &'a IntegrityReport,
    pub completeness: &'a BTreeMap<DescriptiveField, Completeness>,
}

impl LoadedDataset {
    fn assemble(enriched: EnrichedTable, metadata_status: MetadataStatus) -> Self {
        let completeness = completeness_all(&enriched);
        let summary = DatasetSummary::from_table(&enriched);
        let integrity = IntegrityReport::build(&enriched);
        let catalog = enhancer_catalog(&enriched);
        integrity.log();
        for (field, c) in &completeness {
            info!(
                "{field}: {}/{} enhancers populated ({:.1}%)",
                c.populated_enhancers, c.total_enhancers, c.percentage
            );
        }
        LoadedDataset {
            enriched,
            metadata_status,
            completeness,
            summary,
            integrity,
            catalog,
        }
    }

    pub fn report(&self) -> SessionReport<'_> {
        SessionReport {
            chunks: &self.enriched.peaks().sources,
            metadata: &self.metadata_status,
            summary: &self.summary,
            integrity: &self.integrity,
            completeness: &self.completeness,
        }
    }
}

// ---------------------------------------------------------------------------
// Session load
// ---------------------------------------------------------------------------

/// Load, join and summarise using the process-wide caches.
///
/// Chunk errors abort the load. Metadata errors do not: the peak data is
/// returned with empty metadata and the error kept in
/// [`LoadedDataset::metadata_status`].
pub fn load_dataset(config: &DashboardConfig) -> Result<LoadedDataset> {
    let loader = ChunkLoader::new(&config.data_dir, config.chunk_pattern.as_str());
    let peaks = loader.get_cached()?;
    let (metadata, status) = load_metadata_or_degrade(config, |joiner| joiner.get_cached());
    Ok(LoadedDataset::assemble(join(peaks, metadata), status))
}

/// [`load_dataset`] against caller-owned caches.
pub fn load_dataset_in(
    config: &DashboardConfig,
    peak_cache: &DatasetCache<PeakTable>,
    metadata_cache: &DatasetCache<MetadataTable>,
) -> Result<LoadedDataset> {
    let loader = ChunkLoader::new(&config.data_dir, config.chunk_pattern.as_str());
    let peaks = loader.get_cached_in(peak_cache)?;
    let (metadata, status) =
        load_metadata_or_degrade(config, |joiner| joiner.get_cached_in(metadata_cache));
    Ok(LoadedDataset::assemble(join(peaks, metadata), status))
}

fn load_metadata_or_degrade<F>(config: &DashboardConfig, load: F) -> (Arc<MetadataTable>, MetadataStatus)
where
    F: FnOnce(&MetadataJoiner) -> Result<Arc<MetadataTable>>,
{
    let Some(path) = config.metadata_path() else {
        info!("no metadata file configured");
        return (Arc::new(MetadataTable::empty()), MetadataStatus::NotConfigured);
    };
    let joiner = MetadataJoiner::new(&path);
    match load(&joiner) {
        Ok(table) => {
            let status = MetadataStatus::Loaded {
                path,
                records: table.len(),
            };
            (table, status)
        }
        Err(err) => {
            warn!("metadata unavailable, continuing without it: {err}");
            (
                Arc::new(MetadataTable::empty()),
                MetadataStatus::Unavailable {
                    reason: describe(&err),
                },
            )
        }
    }
}

fn describe(err: &LoadError) -> String {
    format!("{} ({})", err, err.kind())
}
