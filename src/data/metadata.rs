use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type, Int64Type};
use arrow::error::ArrowError;
use arrow::ipc::reader::FileReader;
use arrow::record_batch::RecordBatch;
use log::{info, warn};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;

use super::cache::{DatasetCache, FileStamp, Fingerprint};
use super::columns::{snake_case, MetadataColumn};
use super::model::{
    DescriptiveField, EnrichedTable, MetadataRecord, MetadataTable, MetadataValue, NormalizedKey,
    PeakTable,
};
use crate::error::{LoadError, Result};

/// Process-wide metadata table.
static METADATA_CACHE: DatasetCache<MetadataTable> = DatasetCache::new();

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Column names plus row-major cells, whatever the source format.
struct RawTable {
    headers: Vec<String>,
    rows: Vec<Vec<MetadataValue>>,
}

/// Load the metadata table. Dispatch by extension.
///
/// Supported formats:
/// * `.feather` / `.arrow` / `.ipc` – Arrow IPC file (Feather v2), compressed or not
/// * `.parquet` / `.pq`
/// * `.csv` – cells are kept as written; empty cells are null
///
/// Fails with [`LoadError::MetadataFormat`] when no column can serve as the
/// enhancer identifier.
pub fn load_metadata(path: &Path) -> Result<MetadataTable> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let raw = match ext.as_str() {
        "feather" | "arrow" | "ipc" => read_feather(path)?,
        "parquet" | "pq" => read_parquet(path)?,
        "csv" => read_csv(path)?,
        other => {
            return Err(LoadError::metadata(
                path,
                format!("unsupported file extension: .{other}"),
            ))
        }
    };
    build_table(path, raw)
}

fn read_feather(path: &Path) -> Result<RawTable> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let reader = FileReader::try_new(file, None)
        .map_err(|e| LoadError::metadata(path, format!("not an Arrow IPC file: {e}")))?;
    let headers = reader
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| LoadError::metadata(path, format!("reading record batch: {e}")))?;
        append_batch(&batch, &mut rows).map_err(|e| LoadError::metadata(path, e.to_string()))?;
    }
    Ok(RawTable { headers, rows })
}

fn read_parquet(path: &Path) -> Result<RawTable> {
    let file = File::open(path).map_err(|e| LoadError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| LoadError::metadata(path, format!("reading parquet metadata: {e}")))?;
    let headers = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder
        .build()
        .map_err(|e| LoadError::metadata(path, format!("building parquet reader: {e}")))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| LoadError::metadata(path, format!("reading record batch: {e}")))?;
        append_batch(&batch, &mut rows).map_err(|e| LoadError::metadata(path, e.to_string()))?;
    }
    Ok(RawTable { headers, rows })
}

fn read_csv(path: &Path) -> Result<RawTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| LoadError::csv(path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| LoadError::csv(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| LoadError::csv(path, e))?;
        rows.push(record.iter().map(MetadataValue::from_text).collect());
    }
    Ok(RawTable { headers, rows })
}

// -- Arrow helpers --

fn append_batch(batch: &RecordBatch, rows: &mut Vec<Vec<MetadataValue>>) -> std::result::Result<(), ArrowError> {
    let columns = batch
        .columns()
        .iter()
        .map(column_values)
        .collect::<std::result::Result<Vec<_>, _>>()?;
    for row in 0..batch.num_rows() {
        rows.push(columns.iter().map(|col| col[row].clone()).collect());
    }
    Ok(())
}

/// Convert one Arrow column into metadata cells. Categorical (dictionary)
/// columns, as written by pandas, are decoded to their string values.
fn column_values(col: &ArrayRef) -> std::result::Result<Vec<MetadataValue>, ArrowError> {
    let values = match col.data_type() {
        DataType::Null => vec![MetadataValue::Null; col.len()],
        DataType::Boolean => col
            .as_boolean()
            .iter()
            .map(|v| v.map_or(MetadataValue::Null, MetadataValue::Bool))
            .collect(),
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => cast(col, &DataType::Int64)?
            .as_primitive::<Int64Type>()
            .iter()
            .map(|v| v.map_or(MetadataValue::Null, MetadataValue::Integer))
            .collect(),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => cast(col, &DataType::Float64)?
            .as_primitive::<Float64Type>()
            .iter()
            .map(|v| v.map_or(MetadataValue::Null, MetadataValue::Float))
            .collect(),
        DataType::Date32 | DataType::Date64 | DataType::Timestamp(_, _) => cast(col, &DataType::Utf8)?
            .as_string::<i32>()
            .iter()
            .map(|v| v.map_or(MetadataValue::Null, |s| MetadataValue::Date(s.to_string())))
            .collect(),
        _ => cast(col, &DataType::Utf8)?
            .as_string::<i32>()
            .iter()
            .map(|v| v.map_or(MetadataValue::Null, |s| MetadataValue::String(s.to_string())))
            .collect(),
    };
    Ok(values)
}

// -- Record construction --

fn build_table(path: &Path, raw: RawTable) -> Result<MetadataTable> {
    // First column claiming each role wins; the rest become attributes.
    let mut roles: Vec<(MetadataColumn, usize)> = Vec::new();
    for (i, header) in raw.headers.iter().enumerate() {
        if let Some(role) = MetadataColumn::from_header(header) {
            if roles.iter().all(|(r, _)| *r != role) {
                roles.push((role, i));
            }
        }
    }
    let index_of = |role: MetadataColumn| roles.iter().find(|(r, _)| *r == role).map(|(_, i)| *i);

    let key_idx = index_of(MetadataColumn::EnhancerId).ok_or_else(|| {
        LoadError::metadata(
            path,
            format!("no enhancer id column among {:?}", raw.headers),
        )
    })?;
    let attribute_columns: Vec<(usize, String)> = raw
        .headers
        .iter()
        .enumerate()
        .filter(|(i, _)| roles.iter().all(|(_, idx)| idx != i))
        .map(|(i, h)| (i, snake_case(h)))
        .collect();
    info!(
        "metadata columns: {} mapped, {} kept as attributes",
        roles.len(),
        attribute_columns.len()
    );

    let text = |row: &[MetadataValue], role: MetadataColumn| -> Option<String> {
        index_of(role).and_then(|i| row.get(i)).and_then(MetadataValue::as_text)
    };

    let mut records = Vec::with_capacity(raw.rows.len());
    let mut skipped_rows = 0;
    for (row_no, row) in raw.rows.iter().enumerate() {
        let row = row.as_slice();
        let enhancer_id = match row.get(key_idx).and_then(MetadataValue::as_text) {
            Some(id) if !id.trim().is_empty() => id,
            _ => {
                skipped_rows += 1;
                continue;
            }
        };
        let attributes = attribute_columns
            .iter()
            .map(|(i, name)| (name.clone(), row.get(*i).cloned().unwrap_or(MetadataValue::Null)))
            .collect();
        records.push(MetadataRecord {
            key: normalize_key(&enhancer_id),
            enhancer_id,
            cargo: text(row, MetadataColumn::Cargo),
            experiment: text(row, MetadataColumn::Experiment),
            gene: text(row, MetadataColumn::Gene),
            gc_delivered: text(row, MetadataColumn::GcDelivered),
            hall_of_fame: index_of(MetadataColumn::HallOfFame)
                .and_then(|i| row.get(i))
                .is_some_and(MetadataValue::as_flag),
            row: row_no,
            attributes,
        });
    }
    if skipped_rows > 0 {
        warn!(
            "{}: skipped {skipped_rows} rows without an enhancer id",
            path.display()
        );
    }
    info!("loaded metadata: {} records", records.len());

    Ok(MetadataTable {
        source: Some(path.to_path_buf()),
        records,
        skipped_rows,
    })
}

// ---------------------------------------------------------------------------
// Join
// ---------------------------------------------------------------------------

/// Trim and lowercase an enhancer identifier. Both tables go through this
/// before joining.
pub fn normalize_key(raw: &str) -> NormalizedKey {
    NormalizedKey(raw.trim().to_lowercase())
}

/// Left join the peak table with metadata on normalized enhancer id.
///
/// Every peak row is kept. When several metadata rows share a key the first
/// one in file order is used and the key is reported in
/// [`EnrichedTable::ambiguous_keys`].
pub fn join(peaks: Arc<PeakTable>, metadata: Arc<MetadataTable>) -> EnrichedTable {
    let mut first: HashMap<&NormalizedKey, usize> = HashMap::new();
    let mut ambiguous: BTreeMap<NormalizedKey, usize> = BTreeMap::new();
    for (i, record) in metadata.records.iter().enumerate() {
        match first.entry(&record.key) {
            Entry::Vacant(slot) => {
                slot.insert(i);
            }
            Entry::Occupied(_) => *ambiguous.entry(record.key.clone()).or_insert(1) += 1,
        }
    }
    for (key, rows) in &ambiguous {
        warn!(
            "enhancer {key} has {rows} metadata rows; using row {}",
            metadata.records[first[key]].row
        );
    }

    let mut enhancers: Vec<NormalizedKey> = Vec::new();
    let mut enhancer_match: Vec<Option<usize>> = Vec::new();
    let mut row_enhancer = Vec::with_capacity(peaks.len());
    let mut by_key: HashMap<NormalizedKey, usize> = HashMap::new();
    let mut by_raw: HashMap<&str, usize> = HashMap::new();
    for record in &peaks.records {
        let idx = match by_raw.get(record.enhancer_id.as_str()) {
            Some(&idx) => idx,
            None => {
                let key = normalize_key(&record.enhancer_id);
                let idx = match by_key.get(&key) {
                    Some(&idx) => idx,
                    None => {
                        let idx = enhancers.len();
                        enhancer_match.push(first.get(&key).copied());
                        by_key.insert(key.clone(), idx);
                        enhancers.push(key);
                        idx
                    }
                };
                by_raw.insert(record.enhancer_id.as_str(), idx);
                idx
            }
        };
        row_enhancer.push(idx);
    }
    drop(by_raw);
    drop(first);

    let matched = enhancer_match.iter().filter(|m| m.is_some()).count();
    info!(
        "joined metadata: {matched} of {} enhancers matched, {} ambiguous keys",
        enhancers.len(),
        ambiguous.len()
    );

    EnrichedTable {
        peaks,
        metadata,
        enhancers,
        row_enhancer,
        enhancer_match,
        ambiguous,
    }
}

// ---------------------------------------------------------------------------
// Completeness
// ---------------------------------------------------------------------------

/// How many enhancers carry a value for one descriptive field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Completeness {
    pub total_enhancers: usize,
    pub populated_enhancers: usize,
    /// 0–100.
    pub percentage: f64,
}

/// Completeness of `field` counted per enhancer, not per peak row. Null and
/// blank values count as unpopulated.
pub fn completeness_report(table: &EnrichedTable, field: DescriptiveField) -> Completeness {
    let total_enhancers = table.enhancer_count();
    let populated_enhancers = table
        .enhancers()
        .filter(|(_, m)| {
            m.and_then(|m| m.field(field))
                .is_some_and(|v| !v.trim().is_empty())
        })
        .count();
    let percentage = if total_enhancers == 0 {
        0.0
    } else {
        populated_enhancers as f64 / total_enhancers as f64 * 100.0
    };
    Completeness {
        total_enhancers,
        populated_enhancers,
        percentage,
    }
}

/// [`completeness_report`] for each of the four descriptive fields.
pub fn completeness_all(table: &EnrichedTable) -> BTreeMap<DescriptiveField, Completeness> {
    DescriptiveField::ALL
        .into_iter()
        .map(|f| (f, completeness_report(table, f)))
        .collect()
}

// ---------------------------------------------------------------------------
// MetadataJoiner
// ---------------------------------------------------------------------------

/// Loads and caches one metadata file and joins it onto peak tables.
pub struct MetadataJoiner {
    path: PathBuf,
}

impl MetadataJoiner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MetadataJoiner { path: path.into() }
    }

    pub fn load(&self) -> Result<MetadataTable> {
        load_metadata(&self.path)
    }

    /// The process-wide table. The cache holds a single file: a joiner on a
    /// different path replaces the entry, so one process serves one dataset.
    pub fn get_cached(&self) -> Result<Arc<MetadataTable>> {
        self.get_cached_in(&METADATA_CACHE)
    }

    pub fn get_cached_in(&self, cache: &DatasetCache<MetadataTable>) -> Result<Arc<MetadataTable>> {
        let fingerprint = Fingerprint::of_files([FileStamp::read(&self.path)]);
        cache.get_or_try_insert_with(&fingerprint, || self.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::PeakRecord;
    use arrow::array::{DictionaryArray, StringArray};
    use arrow::datatypes::Int32Type;
    use arrow::ipc::writer::FileWriter;
    use parquet::arrow::ArrowWriter;
    use tempfile::TempDir;

    fn peaks(counts: &[(&str, usize)]) -> Arc<PeakTable> {
        let mut records = Vec::new();
        for (id, n) in counts {
            for i in 0..*n {
                records.push(PeakRecord {
                    enhancer_id: id.to_string(),
                    cell_type: format!("{} Cell", i % 4 + 1),
                    chrom: Some("chr2".into()),
                    start: 100,
                    end: 600,
                    accessibility_score: i as f64,
                    position_index: None,
                });
            }
        }
        Arc::new(PeakTable {
            records,
            columns: vec![],
            sources: vec![],
        })
    }

    fn record(row: usize, id: &str, cargo: Option<&str>) -> MetadataRecord {
        MetadataRecord {
            enhancer_id: id.to_string(),
            key: normalize_key(id),
            cargo: cargo.map(str::to_string),
            experiment: None,
            gene: None,
            gc_delivered: None,
            hall_of_fame: false,
            row,
            attributes: BTreeMap::new(),
        }
    }

    fn table(records: Vec<MetadataRecord>) -> Arc<MetadataTable> {
        Arc::new(MetadataTable {
            source: None,
            records,
            skipped_rows: 0,
        })
    }

    #[test]
    fn normalization_ignores_whitespace_and_case() {
        assert_eq!(normalize_key("  eHGT_078m "), normalize_key("EHGT_078M"));
        assert_eq!(normalize_key("eHGT_078m").as_str(), "ehgt_078m");
    }

    #[test]
    fn csv_metadata_maps_known_columns() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.csv");
        std::fs::write(
            &path,
            "Enhancer_ID,Cargo,Experiment_Type,Proximal_Gene,GC delivered,HOF,Neuroglancer 1\n\
             eHGT_001,SYFP2,RO,Pvalb,RO,yes,https://ng/1\n\
             ,SYFP2,RO,Sst,,no,\n\
             eHGT_002,,ICV,Lamp5,ICV,no,\n",
        )
        .unwrap();
        let meta = load_metadata(&path).unwrap();
        assert_eq!(meta.len(), 2);
        assert_eq!(meta.skipped_rows, 1);

        let first = &meta.records[0];
        assert_eq!(first.cargo.as_deref(), Some("SYFP2"));
        assert_eq!(first.experiment.as_deref(), Some("RO"));
        assert_eq!(first.gene.as_deref(), Some("Pvalb"));
        assert_eq!(first.gc_delivered.as_deref(), Some("RO"));
        assert!(first.hall_of_fame);
        assert_eq!(
            first.attributes.get("neuroglancer_1"),
            Some(&MetadataValue::String("https://ng/1".into()))
        );

        let second = &meta.records[1];
        assert_eq!(second.row, 2);
        assert_eq!(second.cargo, None);
        assert!(!second.hall_of_fame);
    }

    #[test]
    fn numeric_looking_csv_ids_still_join() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.csv");
        std::fs::write(&path, "Enhancer_ID,Cargo\n007,SYFP2\n1e3,iCre\n").unwrap();
        let meta = Arc::new(load_metadata(&path).unwrap());
        let ids: Vec<&str> = meta.records.iter().map(|r| r.enhancer_id.as_str()).collect();
        assert_eq!(ids, ["007", "1e3"]);

        let joined = join(peaks(&[("007", 1), ("1e3", 1), ("7", 1)]), meta);
        let cargo: Vec<_> = joined.rows().map(|r| r.field(DescriptiveField::Cargo)).collect();
        assert_eq!(cargo, [Some("SYFP2"), Some("iCre"), None]);
    }

    #[test]
    fn csv_categorical_text_is_kept_verbatim() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.csv");
        std::fs::write(
            &path,
            "Enhancer_ID,Cargo,Proximal_Gene,GC delivered,Dose\ne1,1.50,nan,TRUE,2.0e10\n",
        )
        .unwrap();
        let meta = load_metadata(&path).unwrap();
        let r = &meta.records[0];
        assert_eq!(r.cargo.as_deref(), Some("1.50"));
        assert_eq!(r.gene.as_deref(), Some("nan"));
        assert_eq!(r.gc_delivered.as_deref(), Some("TRUE"));
        assert_eq!(r.attributes["dose"], MetadataValue::String("2.0e10".into()));
    }

    #[test]
    fn missing_key_column_is_a_format_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.csv");
        std::fs::write(&path, "Cargo,Experiment_Type\nSYFP2,RO\n").unwrap();
        let err = load_metadata(&path).unwrap_err();
        assert!(matches!(err, LoadError::MetadataFormat { .. }), "{err}");
    }

    #[test]
    fn unknown_extension_is_a_format_error() {
        let err = load_metadata(Path::new("metadata.xlsx")).unwrap_err();
        assert_eq!(err.kind(), "metadata_format");
    }

    fn sample_batch() -> RecordBatch {
        let ids = StringArray::from(vec![Some("eHGT_001"), Some("eHGT_002"), Some("eHGT_003")]);
        let cargo: DictionaryArray<Int32Type> =
            vec![Some("SYFP2"), None, Some("")].into_iter().collect();
        let genes = StringArray::from(vec![Some("Pvalb"), Some("Sst"), None]);
        RecordBatch::try_from_iter(vec![
            ("Enhancer_ID", Arc::new(ids) as ArrayRef),
            ("Cargo", Arc::new(cargo) as ArrayRef),
            ("Proximal_Gene", Arc::new(genes) as ArrayRef),
        ])
        .unwrap()
    }

    #[test]
    fn feather_nulls_stay_distinct_from_empty_strings() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.feather");
        let batch = sample_batch();
        let file = File::create(&path).unwrap();
        let mut writer = FileWriter::try_new(file, &batch.schema()).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();

        let meta = load_metadata(&path).unwrap();
        let cargo: Vec<_> = meta.records.iter().map(|r| r.cargo.clone()).collect();
        assert_eq!(cargo, [Some("SYFP2".to_string()), None, Some(String::new())]);
        assert_eq!(meta.records[2].gene, None);
    }

    #[test]
    fn parquet_metadata_is_supported() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.parquet");
        let batch = sample_batch();
        let file = File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let meta = load_metadata(&path).unwrap();
        assert_eq!(meta.len(), 3);
        assert_eq!(meta.records[1].gene.as_deref(), Some("Sst"));
    }

    #[test]
    fn left_join_keeps_unmatched_rows() {
        let joined = join(
            peaks(&[("eHGT_001", 3), ("eHGT_404", 2)]),
            table(vec![record(0, " EHGT_001", Some("SYFP2"))]),
        );
        assert_eq!(joined.len(), 5);
        let matched: Vec<bool> = joined.rows().map(|r| r.metadata.is_some()).collect();
        assert_eq!(matched, [true, true, true, false, false]);
        assert_eq!(joined.row(0).unwrap().field(DescriptiveField::Cargo), Some("SYFP2"));
        assert_eq!(joined.row(4).unwrap().field(DescriptiveField::Cargo), None);
    }

    #[test]
    fn first_metadata_row_wins_for_duplicate_keys() {
        let meta = table(vec![
            record(0, "eHGT_010", Some("first")),
            record(1, "other", Some("x")),
            record(2, "ehgt_010 ", Some("second")),
        ]);
        for _ in 0..3 {
            let joined = join(peaks(&[("eHGT_010", 4)]), Arc::clone(&meta));
            assert!(joined
                .rows()
                .all(|r| r.field(DescriptiveField::Cargo) == Some("first")));
            assert_eq!(joined.ambiguous_keys().get(&normalize_key("eHGT_010")), Some(&2));
        }
    }

    #[test]
    fn completeness_counts_enhancers_not_rows() {
        let mut counts = Vec::new();
        let ids: Vec<String> = (0..55).map(|i| format!("e{i:02}")).collect();
        for (i, id) in ids.iter().enumerate() {
            counts.push((id.as_str(), if i == 0 { 10_000 } else { 1 + i % 3 }));
        }
        let records = ids
            .iter()
            .enumerate()
            .map(|(i, id)| record(i, id, (i < 49).then_some("SYFP2")))
            .collect();
        let joined = join(peaks(&counts), table(records));

        let report = completeness_report(&joined, DescriptiveField::Cargo);
        assert_eq!(report.total_enhancers, 55);
        assert_eq!(report.populated_enhancers, 49);
        assert_eq!(report.percentage, 49.0 / 55.0 * 100.0);

        let all = completeness_all(&joined);
        assert_eq!(all[&DescriptiveField::Gene].populated_enhancers, 0);
    }

    #[test]
    fn blank_values_do_not_count_as_populated() {
        let joined = join(
            peaks(&[("a", 1), ("b", 1)]),
            table(vec![record(0, "a", Some("  ")), record(1, "b", Some("PHP.eB"))]),
        );
        let report = completeness_report(&joined, DescriptiveField::Cargo);
        assert_eq!(report.populated_enhancers, 1);
        assert_eq!(report.percentage, 50.0);
    }

    #[test]
    fn cached_metadata_is_read_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("meta.csv");
        std::fs::write(&path, "enhancer_id,cargo\ne1,SYFP2\n").unwrap();
        let cache = DatasetCache::new();
        let joiner = MetadataJoiner::new(&path);
        let a = joiner.get_cached_in(&cache).unwrap();
        let b = joiner.get_cached_in(&cache).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
