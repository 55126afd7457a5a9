//! Peak-accessibility data layer for the Hall of Fame enhancer dashboard.
//!
//! Loads the chunked peak CSVs into one table, joins the enhancer metadata
//! onto it, and serves summaries, completeness figures and filtered views to
//! whatever renders them.

pub mod config;
pub mod data;
pub mod error;
pub mod state;

pub use config::DashboardConfig;
pub use data::pipeline::{load_dataset, LoadedDataset, MetadataStatus};
pub use error::LoadError;
pub use state::DashboardState;
