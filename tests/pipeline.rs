use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use enhancer_atlas::data::cache::DatasetCache;
use enhancer_atlas::data::model::DescriptiveField;
use enhancer_atlas::data::pipeline::load_dataset_in;
use enhancer_atlas::{DashboardConfig, LoadError, LoadedDataset, MetadataStatus};
use tempfile::TempDir;

const HEADER: &str = "enhancer_id,cell_type,chrom,start,end,accessibility_score\n";

fn write_chunk(dir: &Path, name: &str, ids: &[&str]) {
    let mut body = String::from(HEADER);
    for (i, id) in ids.iter().enumerate() {
        writeln!(body, "{id},{} L5 IT,chr1,{},{},{}.5", i % 3, i * 100, i * 100 + 50, i).unwrap();
    }
    std::fs::write(dir.join(name), body).unwrap();
}

fn config(dir: &Path, metadata: Option<&str>) -> DashboardConfig {
    DashboardConfig {
        data_dir: dir.to_path_buf(),
        metadata_file: metadata.map(PathBuf::from),
        ..DashboardConfig::default()
    }
}

fn load(config: &DashboardConfig) -> Result<LoadedDataset, LoadError> {
    load_dataset_in(config, &DatasetCache::new(), &DatasetCache::new())
}

/// Three partitions of 10, 0 and 5 rows over five enhancers.
fn three_partitions(dir: &Path) {
    let first: Vec<&str> = ["e1", "e2", "e3", "e4", "e5"].iter().cycle().take(10).copied().collect();
    write_chunk(dir, "part1_chunk1.csv", &first);
    write_chunk(dir, "part1_chunk2.csv", &[]);
    write_chunk(dir, "part2_chunk1.csv", &["e5", "e4", "e3", "e2", "e1"]);
}

#[test]
fn partitions_concatenate_and_join_left() {
    let tmp = TempDir::new().unwrap();
    three_partitions(tmp.path());
    std::fs::write(
        tmp.path().join("meta.csv"),
        "Enhancer_ID,Cargo,Proximal_Gene\nE1,SYFP2,Pvalb\nnot_in_peaks,iCre,Sst\n",
    )
    .unwrap();

    let ds = load(&config(tmp.path(), Some("meta.csv"))).unwrap();
    assert_eq!(ds.enriched.len(), 15);
    assert_eq!(ds.enriched.enhancer_count(), 5);
    assert_eq!(
        ds.metadata_status,
        MetadataStatus::Loaded {
            path: tmp.path().join("meta.csv"),
            records: 2,
        }
    );

    let sources: Vec<(&str, usize)> = ds
        .enriched
        .peaks()
        .sources
        .iter()
        .map(|s| (s.name.as_str(), s.rows))
        .collect();
    assert_eq!(
        sources,
        [("part1_chunk1.csv", 10), ("part1_chunk2.csv", 0), ("part2_chunk1.csv", 5)]
    );

    let cargo = &ds.completeness[&DescriptiveField::Cargo];
    assert_eq!(cargo.total_enhancers, 5);
    assert_eq!(cargo.populated_enhancers, 1);
    assert!((cargo.percentage - 20.0).abs() < 1e-9);

    let matched = ds.enriched.rows().filter(|r| r.metadata.is_some()).count();
    assert_eq!(matched, 3);
    assert_eq!(ds.integrity.common_enhancers, 1);
}

#[test]
fn metadata_without_key_column_degrades_to_empty_fields() {
    let tmp = TempDir::new().unwrap();
    three_partitions(tmp.path());
    std::fs::write(tmp.path().join("meta.csv"), "Cargo,Proximal_Gene\nSYFP2,Pvalb\n").unwrap();

    let ds = load(&config(tmp.path(), Some("meta.csv"))).unwrap();
    assert_eq!(ds.enriched.len(), 15);
    match &ds.metadata_status {
        MetadataStatus::Unavailable { reason } => assert!(reason.contains("metadata_format")),
        other => panic!("expected unavailable metadata, got {other:?}"),
    }
    for row in ds.enriched.rows() {
        for field in DescriptiveField::ALL {
            assert_eq!(row.field(field), None);
        }
        assert!(!row.hall_of_fame());
    }
    assert!(ds.completeness.values().all(|c| c.populated_enhancers == 0));
}

#[test]
fn missing_metadata_file_still_loads_peaks() {
    let tmp = TempDir::new().unwrap();
    three_partitions(tmp.path());

    let ds = load(&config(tmp.path(), Some("absent.feather"))).unwrap();
    assert_eq!(ds.enriched.len(), 15);
    assert!(!ds.metadata_status.is_loaded());
}

#[test]
fn repeated_loads_are_identical() {
    let tmp = TempDir::new().unwrap();
    three_partitions(tmp.path());
    std::fs::write(
        tmp.path().join("meta.csv"),
        "Enhancer_ID,Cargo\ne2,SYFP2\ne2,iCre\ne4,tdTomato\n",
    )
    .unwrap();
    let cfg = config(tmp.path(), Some("meta.csv"));

    let a = load(&cfg).unwrap();
    let b = load(&cfg).unwrap();
    assert_eq!(a.enriched.peaks().checksum(), b.enriched.peaks().checksum());
    let fields = |ds: &LoadedDataset| -> Vec<Option<String>> {
        ds.enriched
            .rows()
            .map(|r| r.field(DescriptiveField::Cargo).map(str::to_string))
            .collect()
    };
    assert_eq!(fields(&a), fields(&b));
    assert_eq!(
        serde_json::to_string(&a.report()).unwrap(),
        serde_json::to_string(&b.report()).unwrap()
    );
    // first metadata row wins for the duplicated key
    let e2 = a.enriched.rows().find(|r| r.peak.enhancer_id == "e2").unwrap();
    assert_eq!(e2.field(DescriptiveField::Cargo), Some("SYFP2"));
}

#[test]
fn no_matching_chunks_is_an_error() {
    let tmp = TempDir::new().unwrap();
    std::fs::write(tmp.path().join("notes.csv"), HEADER).unwrap();

    let err = load(&config(tmp.path(), None)).unwrap_err();
    assert!(matches!(err, LoadError::Discovery { .. }), "{err}");
}

#[test]
fn bad_numeric_cell_fails_the_whole_load() {
    let tmp = TempDir::new().unwrap();
    write_chunk(tmp.path(), "part1_chunk1.csv", &["e1", "e2"]);
    std::fs::write(
        tmp.path().join("part1_chunk2.csv"),
        format!("{HEADER}e3,1 L5 IT,chr2,10,twenty,1.0\n"),
    )
    .unwrap();

    let err = load(&config(tmp.path(), None)).unwrap_err();
    match err {
        LoadError::TypeCoercion { column, value, .. } => {
            assert_eq!(column, "end");
            assert_eq!(value, "twenty");
        }
        other => panic!("expected a coercion error, got {other}"),
    }
}
