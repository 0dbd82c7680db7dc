//! # sheetsnap CLI (`snap`)
//!
//! Builds and serves locale-aware dataset snapshots for static site
//! generation.
//!
//! ## Usage
//!
//! ```bash
//! snap --config ./config/snap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `snap build` | Fetch every table, consolidate, and persist the snapshot |
//! | `snap paths` | List the locales to pre-render |
//! | `snap props [locale]` | Print the static props for one page |
//! | `snap get <table> <id>` | Print one record as seen from a locale |
//! | `snap sources` | List the configured sources and their status |
//! | `snap serve` | Start the HTTP server |
//!
//! Logs go to stderr and honor `RUST_LOG`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sheetsnap::{config, server, snapshot_cmd, sources};

/// sheetsnap: consolidated, cross-referenced table snapshots for static
/// site generation.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/snap.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "snap",
    about = "Build locale-aware dataset snapshots from spreadsheet tables",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/snap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, consolidate and persist the snapshot.
    ///
    /// Always reads the live table source. The result is what
    /// `build.mode = "cached"` serves afterwards.
    Build {
        /// Write the snapshot here instead of `build.snapshot_path`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// List the locales to pre-render, one per line.
    Paths,

    /// Print the static props for one page as JSON.
    Props {
        /// Locale segment of the page URL. Defaults to `site.default_locale`.
        locale: Option<String>,

        /// Build from the live source regardless of `build.mode`.
        #[arg(long)]
        preview: bool,

        /// JSON attached as `previewData`. Only used with `--preview`.
        #[arg(long)]
        preview_data: Option<String>,
    },

    /// Print one record as seen from a locale.
    Get {
        /// Table name, as declared under `[schema]`.
        table: String,

        /// Record id.
        id: String,

        /// Requested locale. Defaults to `site.default_locale`.
        #[arg(long)]
        locale: Option<String>,
    },

    /// List the configured sources and their status.
    Sources,

    /// Start the HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/health`, `/paths` and
    /// `/props/{locale}`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sheetsnap=info,sheetsnap_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Build { output } => {
            snapshot_cmd::run_build(&cfg, output).await?;
        }
        Commands::Paths => {
            snapshot_cmd::run_paths(&cfg).await?;
        }
        Commands::Props {
            locale,
            preview,
            preview_data,
        } => {
            snapshot_cmd::run_props(&cfg, locale, preview, preview_data).await?;
        }
        Commands::Get { table, id, locale } => {
            snapshot_cmd::run_get(&cfg, &table, &id, locale).await?;
        }
        Commands::Sources => {
            sources::list_sources(&cfg)?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
