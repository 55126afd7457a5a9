use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use log::debug;

use crate::data::filter::{available_options, filtered_indices, FilterField, FilterState};
use crate::data::model::{EnrichedRow, NormalizedKey};
use crate::data::pipeline::{LoadedDataset, MetadataStatus};
use crate::data::summary::EnhancerEntry;
use crate::error::LoadError;

// ---------------------------------------------------------------------------
// Dashboard state
// ---------------------------------------------------------------------------

/// Session state behind the dashboard, independent of rendering.
#[derive(Default)]
pub struct DashboardState {
    /// Loaded dataset (None until a load succeeds).
    pub dataset: Option<Arc<LoadedDataset>>,

    /// Current single-select filters.
    pub filters: FilterState,

    /// Indices of enriched rows passing the filters (cached).
    pub visible_indices: Vec<usize>,

    /// Options currently offered per filter.
    pub options: BTreeMap<FilterField, Vec<String>>,

    /// Status / error message shown to the user.
    pub status_message: Option<String>,
}

impl DashboardState {
    /// Ingest a newly loaded dataset and reset filters.
    pub fn set_dataset(&mut self, dataset: Arc<LoadedDataset>) {
        self.status_message = match &dataset.metadata_status {
            MetadataStatus::Unavailable { reason } => {
                Some(format!("Metadata unavailable, descriptive fields are empty: {reason}"))
            }
            MetadataStatus::Loaded { .. } | MetadataStatus::NotConfigured => None,
        };
        self.filters.clear();
        self.dataset = Some(dataset);
        self.refilter();
    }

    /// Record a failed load. The previous dataset is dropped so stale data is
    /// never shown next to the error.
    pub fn set_error(&mut self, err: &LoadError) {
        self.dataset = None;
        self.filters.clear();
        self.visible_indices.clear();
        self.options.clear();
        self.status_message = Some(format!("Data load failed: {err}"));
    }

    /// Recompute visible rows and options after a filter change.
    pub fn refilter(&mut self) {
        match &self.dataset {
            Some(ds) => {
                self.options = available_options(&ds.enriched, &self.filters);
                self.visible_indices = filtered_indices(&ds.enriched, &self.filters);
            }
            None => {
                self.options.clear();
                self.visible_indices.clear();
            }
        }
    }

    /// Select `value` for `field`. Returns `false` (and changes nothing) when
    /// the value is not currently on offer. Other selections that the new
    /// one rules out fall back to "All".
    pub fn select(&mut self, field: FilterField, value: &str) -> bool {
        let offered = self
            .options
            .get(&field)
            .is_some_and(|opts| opts.iter().any(|o| o == value));
        if !offered {
            return false;
        }
        self.filters.insert(field, value.to_string());
        self.refilter();

        let stale: Vec<FilterField> = self
            .filters
            .iter()
            .filter(|(f, v)| {
                !self
                    .options
                    .get(*f)
                    .is_some_and(|opts| opts.iter().any(|o| o == *v))
            })
            .map(|(f, _)| *f)
            .collect();
        if !stale.is_empty() {
            for f in &stale {
                debug!("resetting {} filter", f.name());
                self.filters.remove(f);
            }
            self.refilter();
        }
        true
    }

    /// Set one field back to "All".
    pub fn clear_selection(&mut self, field: FilterField) {
        if self.filters.remove(&field).is_some() {
            self.refilter();
        }
    }

    pub fn reset_filters(&mut self) {
        self.filters.clear();
        self.refilter();
    }

    /// Rows passing the current filters.
    pub fn visible_rows(&self) -> impl Iterator<Item = EnrichedRow<'_>> + '_ {
        let table = self.dataset.as_ref().map(|ds| &ds.enriched);
        self.visible_indices
            .iter()
            .filter_map(move |&i| table.and_then(|t| t.row(i)))
    }

    /// Catalogue entries of the enhancers with at least one visible row.
    pub fn visible_catalog(&self) -> Vec<&EnhancerEntry> {
        let Some(ds) = &self.dataset else {
            return Vec::new();
        };
        let keys: HashSet<&NormalizedKey> = self.visible_rows().map(|r| r.key).collect();
        ds.catalog.iter().filter(|e| keys.contains(&e.key)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DashboardConfig;
    use crate::data::cache::DatasetCache;
    use crate::data::pipeline::load_dataset_in;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn dataset(dir: &TempDir) -> Arc<LoadedDataset> {
        std::fs::write(
            dir.path().join("part1_chunk1.csv"),
            "enhancer_id,cell_type,start,end,score\n\
             e1,1 Astro,0,10,1.0\n\
             e2,1 Astro,0,10,2.0\n\
             e2,4 Vip,0,10,3.0\n\
             e3,4 Vip,0,10,4.0\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("meta.csv"),
            "Enhancer_ID,Cargo,Proximal_Gene\ne1,SYFP2,Pvalb\ne2,iCre,Sst\n",
        )
        .unwrap();
        let config = DashboardConfig {
            data_dir: dir.path().to_path_buf(),
            metadata_file: Some(PathBuf::from("meta.csv")),
            ..DashboardConfig::default()
        };
        Arc::new(load_dataset_in(&config, &DatasetCache::new(), &DatasetCache::new()).unwrap())
    }

    #[test]
    fn new_dataset_shows_every_row() {
        let tmp = TempDir::new().unwrap();
        let mut state = DashboardState::default();
        state.set_dataset(dataset(&tmp));
        assert_eq!(state.visible_indices, [0, 1, 2, 3]);
        assert_eq!(state.options[&FilterField::Cargo], ["SYFP2", "iCre"]);
        assert_eq!(state.status_message, None);
    }

    #[test]
    fn selecting_narrows_rows_and_options() {
        let tmp = TempDir::new().unwrap();
        let mut state = DashboardState::default();
        state.set_dataset(dataset(&tmp));

        assert!(state.select(FilterField::Cargo, "iCre"));
        assert_eq!(state.visible_indices, [1, 2]);
        assert_eq!(state.options[&FilterField::Gene], ["Sst"]);
        let catalog: Vec<_> = state.visible_catalog().iter().map(|e| e.enhancer_id.clone()).collect();
        assert_eq!(catalog, ["e2"]);

        assert!(state.select(FilterField::CellType, "4 Vip"));
        assert_eq!(state.visible_indices, [2]);

        assert!(!state.select(FilterField::Gene, "Pvalb"));
        assert_eq!(state.filters.get(&FilterField::Gene), None);
    }

    #[test]
    fn clearing_a_selection_widens_the_other_options() {
        let tmp = TempDir::new().unwrap();
        let mut state = DashboardState::default();
        state.set_dataset(dataset(&tmp));

        assert!(state.select(FilterField::Gene, "Pvalb"));
        assert_eq!(state.options[&FilterField::Enhancer], ["e1"]);
        assert!(!state.select(FilterField::Enhancer, "e2"));

        state.clear_selection(FilterField::Gene);
        assert_eq!(state.options[&FilterField::Enhancer], ["e1", "e2", "e3"]);
        assert!(state.select(FilterField::Enhancer, "e2"));
        assert_eq!(state.filters.get(&FilterField::Enhancer).map(String::as_str), Some("e2"));
        assert_eq!(state.visible_indices, [1, 2]);

        state.reset_filters();
        assert_eq!(state.visible_indices.len(), 4);
    }

    #[test]
    fn load_error_clears_the_dataset() {
        let tmp = TempDir::new().unwrap();
        let mut state = DashboardState::default();
        state.set_dataset(dataset(&tmp));
        state.set_error(&LoadError::Discovery {
            dir: tmp.path().to_path_buf(),
            pattern: "part".into(),
        });
        assert!(state.dataset.is_none());
        assert!(state.visible_indices.is_empty());
        assert!(state.status_message.unwrap().starts_with("Data load failed"));
    }
}
