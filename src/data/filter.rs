use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::metadata::normalize_key;
use super::model::{DescriptiveField, EnrichedRow, EnrichedTable};

// ---------------------------------------------------------------------------
// Filter fields
// ---------------------------------------------------------------------------

/// The dashboard's single-select filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    Enhancer,
    Cargo,
    Experiment,
    Gene,
    GcDelivered,
    CellType,
}

impl FilterField {
    pub const ALL: [FilterField; 6] = [
        FilterField::Enhancer,
        FilterField::Cargo,
        FilterField::Experiment,
        FilterField::Gene,
        FilterField::GcDelivered,
        FilterField::CellType,
    ];

    pub fn name(self) -> &'static str {
        match self {
            FilterField::Enhancer => "enhancer",
            FilterField::Cargo => "cargo",
            FilterField::Experiment => "experiment",
            FilterField::Gene => "gene",
            FilterField::GcDelivered => "gc_delivered",
            FilterField::CellType => "cell_type",
        }
    }

    pub fn from_name(name: &str) -> Option<FilterField> {
        FilterField::ALL.into_iter().find(|f| f.name() == name)
    }

    fn descriptive(self) -> Option<DescriptiveField> {
        match self {
            FilterField::Cargo => Some(DescriptiveField::Cargo),
            FilterField::Experiment => Some(DescriptiveField::Experiment),
            FilterField::Gene => Some(DescriptiveField::Gene),
            FilterField::GcDelivered => Some(DescriptiveField::GcDelivered),
            FilterField::Enhancer | FilterField::CellType => None,
        }
    }

    /// The row's value for this field; `None` when the metadata is missing.
    pub fn value_of<'a>(self, row: &EnrichedRow<'a>) -> Option<&'a str> {
        match self {
            FilterField::Enhancer => Some(row.peak.enhancer_id.as_str()),
            FilterField::CellType => Some(row.peak.cell_type.as_str()),
            other => other.descriptive().and_then(|f| row.field(f)),
        }
    }

    /// The value a selection is compared against. Enhancers compare by
    /// normalized key so every spelling of one id is selected together.
    fn match_value<'a>(self, row: &EnrichedRow<'a>) -> Option<&'a str> {
        match self {
            FilterField::Enhancer => Some(row.key.as_str()),
            other => other.value_of(row),
        }
    }
}

// ---------------------------------------------------------------------------
// Filter state
// ---------------------------------------------------------------------------

/// Selected value per field. An absent field means "All".
pub type FilterState = BTreeMap<FilterField, String>;

/// Selections in the form rows are matched against.
fn prepare(filters: &FilterState) -> Vec<(FilterField, String)> {
    filters
        .iter()
        .map(|(field, selected)| match field {
            FilterField::Enhancer => (*field, normalize_key(selected).as_str().to_string()),
            _ => (*field, selected.clone()),
        })
        .collect()
}

/// Whether `row` passes every selection except `skip`. A row without a
/// value for a selected field never passes.
fn passes(row: &EnrichedRow<'_>, selections: &[(FilterField, String)], skip: Option<FilterField>) -> bool {
    selections
        .iter()
        .filter(|(field, _)| Some(*field) != skip)
        .all(|(field, selected)| field.match_value(row) == Some(selected.as_str()))
}

/// Return indices of rows that pass all active filters.
pub fn filtered_indices(table: &EnrichedTable, filters: &FilterState) -> Vec<usize> {
    let selections = prepare(filters);
    table
        .rows()
        .filter(|row| passes(row, &selections, None))
        .map(|row| row.index)
        .collect()
}

/// First row of each enhancer; metadata is per enhancer, so one row stands
/// in for all of them.
fn representatives(table: &EnrichedTable) -> Vec<EnrichedRow<'_>> {
    let mut seen = vec![false; table.enhancer_count()];
    table
        .rows()
        .filter(|row| match table.enhancer_of(row.index) {
            Some(e) => !std::mem::replace(&mut seen[e], true),
            None => false,
        })
        .collect()
}

/// Options for every filter given the current selection.
///
/// Each metadata field's options come from enhancers passing all *other*
/// metadata selections, so picking a cargo narrows the genes on offer and
/// vice versa. Cell types are always offered in full. Null and blank values
/// are never offered.
pub fn available_options(table: &EnrichedTable, filters: &FilterState) -> BTreeMap<FilterField, Vec<String>> {
    let reps = representatives(table);
    let mut metadata_filters = filters.clone();
    metadata_filters.remove(&FilterField::CellType);
    let selections = prepare(&metadata_filters);

    let mut options = BTreeMap::new();
    for field in FilterField::ALL {
        if field == FilterField::CellType {
            continue;
        }
        let values: BTreeSet<&str> = reps
            .iter()
            .filter(|row| passes(row, &selections, Some(field)))
            .filter_map(|row| field.value_of(row))
            .filter(|v| !v.trim().is_empty())
            .collect();
        options.insert(field, values.into_iter().map(str::to_string).collect());
    }

    let mut cell_types: Vec<&str> = table
        .peaks()
        .records
        .iter()
        .map(|r| r.cell_type.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    cell_types.sort_by(|a, b| cell_type_order(a).cmp(&cell_type_order(b)));
    options.insert(
        FilterField::CellType,
        cell_types.into_iter().map(str::to_string).collect(),
    );
    options
}

/// Sort key for cell types named like `12 L6 CT`: leading number first,
/// names without one last.
pub fn cell_type_order(name: &str) -> (u32, &str) {
    let digits: String = name.chars().take_while(char::is_ascii_digit).collect();
    (digits.parse().unwrap_or(u32::MAX), name)
}
