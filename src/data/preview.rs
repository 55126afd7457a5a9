//! Arrow view of enriched rows, for table widgets and the CLI preview.

use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray};
use arrow::error::ArrowError;
use arrow::record_batch::RecordBatch;
use arrow::util::pretty::pretty_format_batches;

use super::model::{DescriptiveField, EnrichedRow, EnrichedTable};

/// Build a record batch for the given row indices. Missing metadata stays
/// null; out-of-range indices are skipped.
pub fn to_record_batch(table: &EnrichedTable, rows: &[usize]) -> Result<RecordBatch, ArrowError> {
    let rows: Vec<EnrichedRow<'_>> = rows.iter().filter_map(|&i| table.row(i)).collect();

    let text = |get: fn(&EnrichedRow<'_>) -> Option<String>| -> ArrayRef {
        Arc::new(rows.iter().map(get).collect::<StringArray>())
    };
    let field = |f: DescriptiveField| -> ArrayRef {
        Arc::new(rows.iter().map(|r| r.field(f)).collect::<StringArray>())
    };

    RecordBatch::try_from_iter(vec![
        ("enhancer_id", text(|r| Some(r.peak.enhancer_id.clone()))),
        ("cell_type", text(|r| Some(r.peak.cell_type.clone()))),
        ("chr", text(|r| r.peak.chrom.clone())),
        (
            "start",
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.peak.start))) as ArrayRef,
        ),
        (
            "end",
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.peak.end))) as ArrayRef,
        ),
        (
            "accessibility_score",
            Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.peak.accessibility_score),
            )) as ArrayRef,
        ),
        ("cargo", field(DescriptiveField::Cargo)),
        ("experiment", field(DescriptiveField::Experiment)),
        ("gene", field(DescriptiveField::Gene)),
        ("gc_delivered", field(DescriptiveField::GcDelivered)),
        (
            "hall_of_fame",
            Arc::new(
                rows.iter()
                    .map(|r| r.metadata.map(|m| m.hall_of_fame))
                    .collect::<BooleanArray>(),
            ) as ArrayRef,
        ),
    ])
}

/// Render rows as a text table.
pub fn pretty_rows(table: &EnrichedTable, rows: &[usize]) -> Result<String, ArrowError> {
    let batch = to_record_batch(table, rows)?;
    Ok(pretty_format_batches(&[batch])?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::metadata::{join, normalize_key};
    use crate::data::model::{MetadataRecord, MetadataTable, PeakRecord, PeakTable};
    use arrow::array::{Array, AsArray};
    use std::collections::BTreeMap;

    fn table() -> EnrichedTable {
        let peak = |id: &str| PeakRecord {
            enhancer_id: id.into(),
            cell_type: "3 Pvalb".into(),
            chrom: None,
            start: 5,
            end: 9,
            accessibility_score: 0.5,
            position_index: None,
        };
        let peaks = PeakTable {
            records: vec![peak("e1"), peak("e2")],
            columns: vec![],
            sources: vec![],
        };
        let metadata = MetadataTable {
            source: None,
            records: vec![MetadataRecord {
                enhancer_id: "e1".into(),
                key: normalize_key("e1"),
                cargo: Some(String::new()),
                experiment: None,
                gene: Some("Pvalb".into()),
                gc_delivered: None,
                hall_of_fame: true,
                row: 0,
                attributes: BTreeMap::new(),
            }],
            skipped_rows: 0,
        };
        join(Arc::new(peaks), Arc::new(metadata))
    }

    #[test]
    fn batch_keeps_null_and_empty_apart() {
        let batch = to_record_batch(&table(), &[0, 1, 7]).unwrap();
        assert_eq!(batch.num_rows(), 2);

        let cargo = batch.column_by_name("cargo").unwrap().as_string::<i32>();
        assert!(!cargo.is_null(0));
        assert_eq!(cargo.value(0), "");
        assert!(cargo.is_null(1));

        let hof = batch.column_by_name("hall_of_fame").unwrap().as_boolean();
        assert!(hof.value(0));
        assert!(hof.is_null(1));
    }

    #[test]
    fn pretty_output_contains_headers_and_values() {
        let text = pretty_rows(&table(), &[0]).unwrap();
        assert!(text.contains("accessibility_score"));
        assert!(text.contains("Pvalb"));
    }
}
