use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::warn;

use enhancer_atlas::data::filter::FilterField;
use enhancer_atlas::data::preview::pretty_rows;
use enhancer_atlas::{load_dataset, DashboardConfig, DashboardState};

/// Load the enhancer peak chunks and metadata, and report what was loaded.
#[derive(Parser, Debug)]
#[command(name = "enhancer-atlas", version, about)]
struct Cli {
    /// JSON config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the chunk files.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Regular expression for chunk file names.
    #[arg(long)]
    chunk_pattern: Option<String>,

    /// Metadata table (.feather, .parquet or .csv).
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Filter as FIELD=VALUE, e.g. `cargo=SYFP2`. Repeatable.
    #[arg(long = "filter", value_name = "FIELD=VALUE")]
    filters: Vec<String>,

    /// Number of visible rows to print.
    #[arg(long, default_value = "10")]
    preview: usize,

    /// Print the session report as JSON instead of text.
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let config = build_config(&cli)?;

    let dataset = load_dataset(&config).context("loading dashboard data")?;
    let mut state = DashboardState::default();
    state.set_dataset(Arc::new(dataset));
    if let Some(msg) = &state.status_message {
        warn!("{msg}");
    }

    for filter in &cli.filters {
        let (name, value) = filter
            .split_once('=')
            .with_context(|| format!("filter `{filter}` is not FIELD=VALUE"))?;
        let Some(field) = FilterField::from_name(name.trim()) else {
            bail!("unknown filter field `{name}`");
        };
        if !state.select(field, value.trim()) {
            bail!("`{value}` is not an available {} value", field.name());
        }
    }

    let Some(dataset) = state.dataset.clone() else {
        bail!("no dataset loaded");
    };

    if cli.json {
        let out = serde_json::json!({
            "session": dataset.report(),
            "filters": &state.filters,
            "visible_rows": state.visible_indices.len(),
            "visible_enhancers": state.visible_catalog(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let s = &dataset.summary;
    println!(
        "{} enhancers, {} measurements, {} cell types, {} chromosomes",
        s.total_enhancers, s.total_measurements, s.cell_types, s.chromosomes
    );
    if let (Some(max), Some(mean)) = (s.max_accessibility, s.mean_accessibility) {
        println!("accessibility: max {max:.3}, mean {mean:.3}");
    }
    println!();
    println!("metadata completeness (per enhancer):");
    for (field, c) in &dataset.completeness {
        println!(
            "  {:<14} {:>6}/{:<6} {:>6.1}%",
            field.name(),
            c.populated_enhancers,
            c.total_enhancers,
            c.percentage
        );
    }
    println!();
    println!(
        "{} of {} rows visible",
        state.visible_indices.len(),
        dataset.enriched.len()
    );
    if cli.preview > 0 && !state.visible_indices.is_empty() {
        let n = cli.preview.min(state.visible_indices.len());
        let table = pretty_rows(&dataset.enriched, &state.visible_indices[..n])
            .context("rendering preview")?;
        println!("{table}");
    }
    Ok(())
}

/// Defaults < config file < environment < command line.
fn build_config(cli: &Cli) -> Result<DashboardConfig> {
    let base = match &cli.config {
        Some(path) => DashboardConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => DashboardConfig::default(),
    };
    let mut config = base.with_env_overrides();
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(pattern) = &cli.chunk_pattern {
        config.chunk_pattern = pattern.clone();
    }
    if let Some(meta) = &cli.metadata {
        config.metadata_file = Some(meta.clone());
    }
    Ok(config)
}
