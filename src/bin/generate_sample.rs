use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, BooleanArray, StringArray};
use arrow::record_batch::RecordBatch;
use arrow::ipc::writer::FileWriter;

const CELL_TYPES: [&str; 8] = [
    "1 L2/3 IT",
    "2 L4 IT",
    "3 L5 IT",
    "5 L5 ET",
    "9 L6 CT",
    "14 Pvalb",
    "17 Sst",
    "30 Astro",
];
const CHROMS: [&str; 5] = ["chr1", "chr2", "chr7", "chr11", "chrX"];
const CARGOS: [&str; 3] = ["SYFP2", "iCre", "tdTomato"];
const EXPERIMENTS: [&str; 2] = ["RO", "ICV"];
const GENES: [&str; 6] = ["Pvalb", "Sst", "Lamp5", "Vip", "Gad2", "Slc17a7"];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn pick<'a>(&mut self, items: &[&'a str]) -> &'a str {
        items[(self.next_u64() % items.len() as u64) as usize]
    }
}

struct Enhancer {
    id: String,
    chrom: &'static str,
    start: i64,
}

fn main() -> Result<()> {
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("sample_data"));
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    let mut rng = SimpleRng::new(42);
    let enhancers: Vec<Enhancer> = (1..=60)
        .map(|i| Enhancer {
            id: format!("eHGT_{i:03}m"),
            chrom: rng.pick(&CHROMS),
            start: 1_000_000 + (rng.next_u64() % 50_000_000) as i64,
        })
        .collect();

    // Two parts, three chunks each; the last chunk of part 2 is header-only.
    let mut rows_written = 0;
    for part in 1..=2 {
        for chunk in 1..=3 {
            let path = out_dir.join(format!("part{part}_peaks_chunk{chunk}.csv"));
            let empty = part == 2 && chunk == 3;
            let slice: &[Enhancer] = if empty {
                &[]
            } else {
                let k = ((part - 1) * 3 + (chunk - 1)) * 12;
                &enhancers[k..(k + 12).min(enhancers.len())]
            };
            rows_written += write_chunk(&path, slice, &mut rng)?;
        }
    }

    let meta_path = out_dir.join("enhancer_metadata.feather");
    let records = write_metadata(&meta_path, &enhancers, &mut rng)?;

    println!(
        "Wrote {rows_written} peak rows for {} enhancers and {records} metadata rows to {}",
        enhancers.len(),
        out_dir.display()
    );
    Ok(())
}

/// Chunks use the legacy export headers; the loader renames them.
fn write_chunk(path: &Path, enhancers: &[Enhancer], rng: &mut SimpleRng) -> Result<usize> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    writer.write_record([
        "enhancer_id",
        "cell_type",
        "chr",
        "enhancer_start",
        "enhancer_end",
        "signal_value",
    ])?;
    let mut rows = 0;
    for e in enhancers {
        for cell in CELL_TYPES {
            if rng.next_f64() < 0.3 {
                continue;
            }
            let score = (rng.next_f64() * 8.0 * 1000.0).round() / 1000.0;
            writer.write_record([
                e.id.clone(),
                cell.to_string(),
                e.chrom.to_string(),
                e.start.to_string(),
                (e.start + 600).to_string(),
                score.to_string(),
            ])?;
            rows += 1;
        }
    }
    writer.flush()?;
    Ok(rows)
}

/// Metadata as written by pandas: one row per enhancer/experiment, some
/// enhancers missing, one duplicated, a few nulls.
fn write_metadata(path: &Path, enhancers: &[Enhancer], rng: &mut SimpleRng) -> Result<usize> {
    let mut ids = Vec::new();
    let mut cargo = Vec::new();
    let mut experiment = Vec::new();
    let mut gene = Vec::new();
    let mut delivered = Vec::new();
    let mut hof = Vec::new();
    let mut viewer = Vec::new();

    for (i, e) in enhancers.iter().enumerate() {
        if i % 11 == 10 {
            continue;
        }
        let copies = if i == 3 { 2 } else { 1 };
        for _ in 0..copies {
            let exp = rng.pick(&EXPERIMENTS);
            ids.push(e.id.clone());
            cargo.push((rng.next_f64() > 0.1).then(|| rng.pick(&CARGOS).to_string()));
            experiment.push(Some(exp.to_string()));
            gene.push((rng.next_f64() > 0.15).then(|| rng.pick(&GENES).to_string()));
            delivered.push(Some(exp.to_string()));
            hof.push(Some(i % 2 == 0));
            viewer.push(Some(format!("https://viewer.example.org/{}", e.id)));
        }
    }

    let batch = RecordBatch::try_from_iter(vec![
        ("Enhancer_ID", Arc::new(StringArray::from(ids)) as ArrayRef),
        ("Cargo", Arc::new(StringArray::from(cargo)) as ArrayRef),
        ("Experiment_Type", Arc::new(StringArray::from(experiment)) as ArrayRef),
        ("Proximal_Gene", Arc::new(StringArray::from(gene)) as ArrayRef),
        ("GC delivered", Arc::new(StringArray::from(delivered)) as ArrayRef),
        ("Hall_of_Fame", Arc::new(BooleanArray::from(hof)) as ArrayRef),
        ("Viewer Link", Arc::new(StringArray::from(viewer)) as ArrayRef),
    ])
    .context("building metadata batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = FileWriter::try_new(file, &batch.schema()).context("creating IPC writer")?;
    writer.write(&batch).context("writing metadata")?;
    writer.finish().context("finishing metadata file")?;
    Ok(batch.num_rows())
}
