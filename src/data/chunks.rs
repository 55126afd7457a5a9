use std::cmp::Ordering;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use csv::{StringRecord, Trim};
use log::{debug, info, warn};
use regex::Regex;

use super::cache::{DatasetCache, FileStamp, Fingerprint};
use super::columns::PeakColumn;
use super::model::{ChunkSource, PeakRecord, PeakTable};
use crate::error::{LoadError, Result};

/// Matches `part1_chunk3.csv`, `part2_peaks_chunk01.csv`, ...
pub const DEFAULT_CHUNK_PATTERN: &str = r"^part(?P<part>\d+).*chunk(?P<chunk>\d+).*\.csv$";

/// Process-wide unified peak table.
static PEAK_CACHE: DatasetCache<PeakTable> = DatasetCache::new();

// ---------------------------------------------------------------------------
// Chunk discovery
// ---------------------------------------------------------------------------

/// One partition file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFile {
    pub path: PathBuf,
    pub name: String,
    /// `part` capture of the chunk pattern, if present.
    pub part: Option<u32>,
    /// `chunk` capture of the chunk pattern, if present.
    pub chunk: Option<u32>,
}

impl ChunkFile {
    pub fn stamp(&self) -> FileStamp<'_> {
        FileStamp::read(&self.path)
    }
}

impl Ord for ChunkFile {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.part, self.chunk, &self.name, &self.path).cmp(&(
            other.part,
            other.chunk,
            &other.name,
            &other.path,
        ))
    }
}

impl PartialOrd for ChunkFile {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// List the files in `dir` whose name matches `pattern`, in partition order.
///
/// Fails with [`LoadError::Discovery`] when nothing matches.
pub fn discover_chunks(dir: &Path, pattern: &str) -> Result<Vec<ChunkFile>> {
    let re = Regex::new(pattern).map_err(|source| LoadError::Pattern {
        pattern: pattern.to_string(),
        source,
    })?;

    let entries = fs::read_dir(dir).map_err(|e| LoadError::io(dir, e))?;
    let mut chunks = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| LoadError::io(dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(caps) = re.captures(&name) else {
            continue;
        };
        let number = |group: &str| caps.name(group).and_then(|m| m.as_str().parse::<u32>().ok());
        let (part, chunk) = (number("part"), number("chunk"));
        chunks.push(ChunkFile {
            path,
            name,
            part,
            chunk,
        });
    }

    if chunks.is_empty() {
        return Err(LoadError::Discovery {
            dir: dir.to_path_buf(),
            pattern: pattern.to_string(),
        });
    }
    chunks.sort();
    info!("found {} chunk files in {}", chunks.len(), dir.display());
    Ok(chunks)
}

// ---------------------------------------------------------------------------
// Per-chunk schema
// ---------------------------------------------------------------------------

/// How one chunk's header maps onto the canonical peak columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSchema {
    /// File the schema was read from.
    pub source: String,
    /// Canonical columns present, in canonical order.
    pub columns: Vec<PeakColumn>,
    /// Raw header names that map to no canonical column.
    pub ignored: Vec<String>,
    positions: [Option<usize>; PeakColumn::ALL.len()],
}

impl ChunkSchema {
    pub fn from_headers(source: &str, headers: &StringRecord) -> ChunkSchema {
        let mut positions = [None; PeakColumn::ALL.len()];
        let mut ignored = Vec::new();
        for (i, header) in headers.iter().enumerate() {
            match PeakColumn::from_header(header) {
                Some(col) if positions[col as usize].is_none() => positions[col as usize] = Some(i),
                Some(col) => {
                    warn!("{source}: duplicate `{}` column `{header}` ignored", col.name());
                    ignored.push(header.to_string());
                }
                None => ignored.push(header.to_string()),
            }
        }
        let columns = PeakColumn::ALL
            .into_iter()
            .filter(|c| positions[*c as usize].is_some())
            .collect();
        ChunkSchema {
            source: source.to_string(),
            columns,
            ignored,
            positions,
        }
    }

    /// Index of `col` in this chunk's raw rows.
    pub fn position(&self, col: PeakColumn) -> Option<usize> {
        self.positions[col as usize]
    }

    pub fn missing_required(&self) -> Vec<PeakColumn> {
        PeakColumn::ALL
            .into_iter()
            .filter(|c| c.is_required() && self.position(*c).is_none())
            .collect()
    }
}

/// Raw rows of one chunk plus the schema needed to type them.
#[derive(Debug, Clone)]
pub struct PartialTable {
    pub chunk: ChunkFile,
    pub schema: ChunkSchema,
    pub rows: Vec<StringRecord>,
}

impl PartialTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Loading and concatenation
// ---------------------------------------------------------------------------

/// Read one chunk's header and rows.
///
/// `reference` is the schema of the first chunk loaded; it only shapes the
/// diagnostics. Any chunk missing a required column is rejected, while a
/// chunk that lacks optional columns or orders them differently is aligned
/// to the canonical schema.
pub fn load_chunk(file: &ChunkFile, reference: Option<&ChunkSchema>) -> Result<PartialTable> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(Trim::All)
        .from_path(&file.path)
        .map_err(|e| LoadError::csv(&file.path, e))?;
    let headers = reader
        .headers()
        .map_err(|e| LoadError::csv(&file.path, e))?
        .clone();
    let schema = ChunkSchema::from_headers(&file.name, &headers);

    let missing = schema.missing_required();
    if !missing.is_empty() {
        return Err(LoadError::SchemaMismatch {
            file: file.path.clone(),
            missing: missing.iter().map(|c| c.name().to_string()).collect(),
            reference: reference.map_or_else(|| file.name.clone(), |r| r.source.clone()),
        });
    }
    if !schema.ignored.is_empty() {
        debug!("{}: ignoring columns {:?}", file.name, schema.ignored);
    }
    if let Some(reference) = reference {
        if reference.columns != schema.columns {
            info!(
                "{}: aligning columns {:?} to canonical schema of {}",
                file.name,
                schema.columns.iter().map(|c| c.name()).collect::<Vec<_>>(),
                reference.source
            );
        }
    }

    let rows = reader
        .records()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| LoadError::csv(&file.path, e))?;
    info!("  loaded {}: {} rows", file.name, rows.len());

    Ok(PartialTable {
        chunk: file.clone(),
        schema,
        rows,
    })
}

/// Union the partitions into one typed table.
///
/// Parts are ordered by their chunk position first, so the result does not
/// depend on the order they are passed in. Rows are never deduplicated.
pub fn concatenate(mut parts: Vec<PartialTable>) -> Result<PeakTable> {
    parts.sort_by(|a, b| a.chunk.cmp(&b.chunk));

    let columns = parts
        .first()
        .map(|p| p.schema.columns.clone())
        .unwrap_or_default();
    let total: usize = parts.iter().map(PartialTable::len).sum();
    let mut records = Vec::with_capacity(total);
    let mut sources = Vec::with_capacity(parts.len());

    for part in &parts {
        for row in &part.rows {
            records.push(typed_row(part, row)?);
        }
        sources.push(ChunkSource {
            name: part.chunk.name.clone(),
            part: part.chunk.part,
            chunk: part.chunk.chunk,
            rows: part.len(),
        });
    }
    info!("combined {} chunks: {} total rows", parts.len(), records.len());

    Ok(PeakTable {
        records,
        columns,
        sources,
    })
}

fn typed_row(part: &PartialTable, row: &StringRecord) -> Result<PeakRecord> {
    let cell = |col: PeakColumn| part.schema.position(col).and_then(|i| row.get(i));
    let fail = |col: PeakColumn, value: &str, expected: &'static str| LoadError::TypeCoercion {
        file: part.chunk.path.clone(),
        line: row.position().map_or(0, |p| p.line()),
        column: col.name().to_string(),
        value: value.to_string(),
        expected,
    };
    let text = |col: PeakColumn| -> Result<String> {
        match cell(col) {
            Some(v) if !v.is_empty() => Ok(v.to_string()),
            other => Err(fail(col, other.unwrap_or(""), "non-empty text")),
        }
    };
    let int = |col: PeakColumn| -> Result<i64> {
        let v = cell(col).unwrap_or("");
        v.parse::<i64>().map_err(|_| fail(col, v, "integer"))
    };
    let float = |col: PeakColumn| -> Result<f64> {
        let v = cell(col).unwrap_or("");
        v.parse::<f64>()
            .ok()
            .filter(|x| x.is_finite())
            .ok_or_else(|| fail(col, v, "finite number"))
    };

    let position_index = match cell(PeakColumn::PositionIndex) {
        None | Some("") => None,
        Some(_) => Some(int(PeakColumn::PositionIndex)?),
    };

    Ok(PeakRecord {
        enhancer_id: text(PeakColumn::EnhancerId)?,
        cell_type: text(PeakColumn::CellType)?,
        chrom: cell(PeakColumn::Chrom)
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        start: int(PeakColumn::Start)?,
        end: int(PeakColumn::End)?,
        accessibility_score: float(PeakColumn::AccessibilityScore)?,
        position_index,
    })
}

// ---------------------------------------------------------------------------
// ChunkLoader
// ---------------------------------------------------------------------------

/// Discovers, loads and caches the partitioned peak table of one directory.
pub struct ChunkLoader {
    dir: PathBuf,
    pattern: String,
    loads: AtomicUsize,
}

impl ChunkLoader {
    pub fn new(dir: impl Into<PathBuf>, pattern: impl Into<String>) -> Self {
        ChunkLoader {
            dir: dir.into(),
            pattern: pattern.into(),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn discover(&self) -> Result<Vec<ChunkFile>> {
        discover_chunks(&self.dir, &self.pattern)
    }

    pub fn fingerprint(chunks: &[ChunkFile]) -> Fingerprint {
        Fingerprint::of_files(chunks.iter().map(ChunkFile::stamp))
    }

    /// Discover and load without touching any cache.
    pub fn load(&self) -> Result<PeakTable> {
        let chunks = self.discover()?;
        self.load_chunks(&chunks)
    }

    /// The process-wide unified table, reloaded only when the chunk set's
    /// fingerprint changes.
    ///
    /// There is one slot per process: a loader on another directory or
    /// pattern evicts this one's table, so alternating between two datasets
    /// reloads on every call. Use [`ChunkLoader::get_cached_in`] with a
    /// dedicated cache for a second dataset.
    pub fn get_cached(&self) -> Result<Arc<PeakTable>> {
        self.get_cached_in(&PEAK_CACHE)
    }

    pub fn get_cached_in(&self, cache: &DatasetCache<PeakTable>) -> Result<Arc<PeakTable>> {
        let chunks = self.discover()?;
        let fingerprint = Self::fingerprint(&chunks);
        cache.get_or_try_insert_with(&fingerprint, || self.load_chunks(&chunks))
    }

    /// How many full loads this loader has performed.
    pub fn load_count(&self) -> usize {
        self.loads.load(AtomicOrdering::SeqCst)
    }

    fn load_chunks(&self, chunks: &[ChunkFile]) -> Result<PeakTable> {
        self.loads.fetch_add(1, AtomicOrdering::SeqCst);
        info!("loading peak data from {}", self.dir.display());

        let mut reference: Option<ChunkSchema> = None;
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let part = load_chunk(chunk, reference.as_ref())?;
            if reference.is_none() {
                reference = Some(part.schema.clone());
            }
            parts.push(part);
        }
        concatenate(parts)
    }
}

/// Drop the process-wide peak table; the next [`ChunkLoader::get_cached`]
/// reloads even if no file changed.
pub fn clear_cache() {
    PEAK_CACHE.clear();
}
