//! Data layer: chunk loading, metadata join, and the views built on top.
//!
//! Architecture:
//! ```text
//!  part*_chunk*.csv          metadata .feather / .parquet / .csv
//!        │                              │
//!        ▼                              ▼
//!   ┌──────────┐                  ┌──────────┐
//!   │  chunks   │  → PeakTable     │ metadata  │  → MetadataTable
//!   └──────────┘                  └──────────┘
//!        │          (both behind `cache`)  │
//!        └──────────────┬─────────────────┘
//!                       ▼
//!              join → EnrichedTable
//!                       │
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!   ┌─────────┐   ┌──────────┐   ┌──────────┐
//!   │ summary  │   │  filter   │   │ preview   │
//!   └─────────┘   └──────────┘   └──────────┘
//! ```
//! `pipeline` runs the whole sequence for one session.

pub mod cache;
pub mod chunks;
pub mod columns;
pub mod filter;
pub mod metadata;
pub mod model;
pub mod pipeline;
pub mod preview;
pub mod summary;
