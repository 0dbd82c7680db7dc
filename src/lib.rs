//! # sheetsnap
//!
//! Builds locale-aware, cross-referenced dataset snapshots from
//! spreadsheet-style table sources, for static site generation.
//!
//! The pipeline itself (schema, fetch, sanitize, resolve, consolidate,
//! codec) lives in `sheetsnap-core`. This crate adds the concrete table
//! sources, configuration, translation lookup, the live/cached dataset
//! strategy, the page-builder entry points, an HTTP server and the `snap`
//! CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────────┐   ┌────────────┐
//! │ Table source │──▶│ fetch → sanitize →     │──▶│  Snapshot  │
//! │ Airtable/Dir │   │ resolve → consolidate  │   │ (codec)    │
//! └──────────────┘   └────────────────────────┘   └─────┬──────┘
//!                                                       │
//!                         ┌─────────────────────────────┤
//!                         ▼                             ▼
//!                    ┌──────────┐                 ┌──────────┐
//!                    │   CLI    │                 │   HTTP   │
//!                    │  (snap)  │                 │  server  │
//!                    └──────────┘                 └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! snap sources                  # check the configured sources
//! snap build                    # fetch, consolidate and persist the snapshot
//! snap paths                    # locales to pre-render
//! snap props fr                 # page props for /fr
//! snap get Product rec123 --locale fr
//! snap serve                    # HTTP server with revalidation
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`sources`] | Table source factory and locale-suffix column mapping |
//! | [`connector_airtable`] | Airtable REST source |
//! | [`connector_dir`] | JSON export directory source |
//! | [`translations`] | Translation lookup |
//! | [`provider`] | Live and cached dataset strategies |
//! | [`pages`] | Static paths and static props |
//! | [`snapshot_cmd`] | CLI command implementations |
//! | [`server`] | HTTP server |

pub mod config;
pub mod connector_airtable;
pub mod connector_dir;
pub mod pages;
pub mod provider;
pub mod server;
pub mod snapshot_cmd;
pub mod sources;
pub mod translations;
