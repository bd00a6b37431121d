//! Colindex CLI
//!
//! Command-line interface for column indexes:
//! - Create an index
//! - Load a CSV column into it
//! - Run range searches
//! - Optimize and inspect

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colindex::config::{generate_default_config, Config};
use colindex::index::attrs::IndexAttrs;
use colindex::index::{ColumnIndex, CompareOp, Geometry, IndexOptions, SearchScratch};
use colindex::storage::{Compression, DataType, Element, FixedBytes};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "colindex")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sorted secondary indexes for columnar data")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ~/.config/colindex/config.toml or ./colindex.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an empty index
    Create {
        /// Index directory
        dir: PathBuf,
        /// Element type (int8..int64, uint8..uint64, float32, float64, bytesN)
        #[arg(short, long)]
        dtype: String,
        /// Expected column length, used to size chunks
        #[arg(short, long, default_value_t = 100_000)]
        expected_rows: u64,
        /// Optimization level (0-9)
        #[arg(short, long)]
        optlevel: Option<u8>,
        /// Chunk compression (none, lz4)
        #[arg(long)]
        compression: Option<Compression>,
        /// Explicit geometry: chunksize,chunks/slice,slices/block,blocks/superblock
        #[arg(long)]
        geometry: Option<String>,
    },

    /// Append a CSV column to an index
    Load {
        /// Index directory
        dir: PathBuf,
        /// CSV file
        file: PathBuf,
        /// Column name or zero-based position
        #[arg(short = 'C', long, default_value = "0")]
        column: String,
        /// The file has no header row
        #[arg(long)]
        no_header: bool,
        /// Values per extend call
        #[arg(long, default_value_t = 65_536)]
        batch: usize,
        /// Optimize after loading
        #[arg(long)]
        optimize: bool,
    },

    /// Count (and list) rows matching range conditions
    Search {
        /// Index directory
        dir: PathBuf,
        /// Conditions such as ge:10 lt:20 (at most two)
        #[arg(required = true)]
        conditions: Vec<String>,
        /// Print the matching row numbers
        #[arg(short, long)]
        rows: bool,
        /// Maximum rows to print
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
    },

    /// Reorder slices to reduce overlaps
    Optimize {
        /// Index directory
        dir: PathBuf,
        /// Level override (0-9)
        #[arg(short, long)]
        level: Option<u8>,
        /// Log every pass
        #[arg(short, long)]
        verbose: bool,
    },

    /// Show index statistics
    Info {
        /// Index directory
        dir: PathBuf,
    },

    /// Mark an index as dirty or clean
    Dirty {
        /// Index directory
        dir: PathBuf,
        /// New state
        #[arg(action = clap::ArgAction::Set)]
        state: bool,
    },

    /// Remove an index
    Drop {
        /// Index directory
        dir: PathBuf,
    },

    /// Print the default configuration
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

/// Run `$body` with `$t` bound to the Rust type of `$dtype`
macro_rules! with_element {
    ($dtype:expr, $t:ident => $body:expr) => {
        match $dtype {
            DataType::Int8 => {
                type $t = i8;
                $body
            }
            DataType::Int16 => {
                type $t = i16;
                $body
            }
            DataType::Int32 => {
                type $t = i32;
                $body
            }
            DataType::Int64 => {
                type $t = i64;
                $body
            }
            DataType::UInt8 => {
                type $t = u8;
                $body
            }
            DataType::UInt16 => {
                type $t = u16;
                $body
            }
            DataType::UInt32 => {
                type $t = u32;
                $body
            }
            DataType::UInt64 => {
                type $t = u64;
                $body
            }
            DataType::Float32 => {
                type $t = f32;
                $body
            }
            DataType::Float64 => {
                type $t = f64;
                $body
            }
            DataType::Bytes(_) => {
                type $t = FixedBytes;
                $body
            }
        }
    };
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_logging(&config);

    let json = cli.format == "json";

    match cli.command {
        Commands::Create {
            dir,
            dtype,
            expected_rows,
            optlevel,
            compression,
            geometry,
        } => {
            let dtype = DataType::parse(&dtype)?;
            let mut options = config.index_options()?.with_expected_rows(expected_rows);
            if let Some(level) = optlevel {
                options = options.with_optlevel(level);
            }
            if let Some(compression) = compression {
                options.filters.compression = compression;
            }
            if let Some(text) = geometry {
                options = options.with_geometry(parse_geometry(&text)?);
            }

            let geometry = with_element!(dtype, T => create::<T>(&dir, dtype, options)?);
            println!("Created {} index at {:?}", dtype, dir);
            println!("  geometry: {}", geometry);
        }

        Commands::Load {
            dir,
            file,
            column,
            no_header,
            batch,
            optimize,
        } => {
            let dtype = index_type(&dir)?;
            let options = config.index_options()?;
            let load = LoadArgs {
                file: &file,
                column: &column,
                has_headers: !no_header,
                batch: batch.max(1),
                optimize,
            };
            let loaded = with_element!(dtype, T => load_csv::<T>(&dir, options, &load)?);
            println!("Indexed {} values from {:?}", loaded, file);
        }

        Commands::Search {
            dir,
            conditions,
            rows,
            limit,
        } => {
            let dtype = index_type(&dir)?;
            let options = config.index_options()?;
            let (count, matches) = with_element!(dtype, T => {
                search::<T>(&dir, options, &conditions, rows)?
            });

            if json {
                let mut out = serde_json::json!({ "count": count });
                if let Some(matches) = &matches {
                    out["rows"] = serde_json::json!(matches.iter().take(limit).collect::<Vec<_>>());
                }
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{} matching rows", count);
                if let Some(matches) = matches {
                    for row in matches.iter().take(limit) {
                        println!("  {}", row);
                    }
                    if matches.len() > limit {
                        println!("  ... {} more", matches.len() - limit);
                    }
                }
            }
        }

        Commands::Optimize {
            dir,
            level,
            verbose,
        } => {
            let dtype = index_type(&dir)?;
            let options = config.index_options()?;
            let report = with_element!(dtype, T => {
                let mut index = ColumnIndex::<T>::open(&dir, options)?;
                index.optimize(level, verbose)?
            });
            println!("{}", report);
        }

        Commands::Info { dir } => {
            let attrs = IndexAttrs::load(&dir)?;
            let options = config.index_options()?;
            let (stats, overlaps) = with_element!(attrs.dtype, T => {
                let index = ColumnIndex::<T>::open(&dir, options)?;
                (index.stats(), index.overlaps())
            });

            if json {
                let out = serde_json::json!({
                    "attrs": attrs,
                    "nelements": stats.nelements,
                    "nrows": stats.nrows,
                    "nelements_lr": stats.nelements_lr,
                    "nblocks": stats.nblocks,
                    "nsuperblocks": stats.nsuperblocks,
                    "overlaps": overlaps.noverlaps,
                    "overlap_ratio": overlaps.ratio,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Index at {:?}", dir);
                println!();
                println!("{}", stats);
                println!("overlaps:     {}", overlaps);
                println!("compression:  {}", attrs.filters.compression);
                println!("created:      {}", attrs.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
                for (key, value) in &attrs.user {
                    println!("  {} = {}", key, value);
                }
            }
        }

        Commands::Dirty { dir, state } => {
            let dtype = index_type(&dir)?;
            let options = config.index_options()?;
            with_element!(dtype, T => {
                ColumnIndex::<T>::open(&dir, options)?.set_dirty(state)?
            });
            println!("Marked {:?} {}", dir, if state { "dirty" } else { "clean" });
        }

        Commands::Drop { dir } => {
            let dtype = index_type(&dir)?;
            let options = config.index_options()?;
            with_element!(dtype, T => ColumnIndex::<T>::open(&dir, options)?.destroy()?);
            println!("Removed index at {:?}", dir);
        }

        Commands::Config { output } => {
            let content = generate_default_config();
            match output {
                Some(path) => {
                    std::fs::write(&path, content)
                        .with_context(|| format!("writing {:?}", path))?;
                    println!("Wrote default config to {:?}", path);
                }
                None => print!("{}", content),
            }
        }
    }

    Ok(())
}

fn init_logging(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("colindex={}", config.logging.level).into());
    let registry = tracing_subscriber::registry().with(filter);

    if config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn index_type(dir: &Path) -> anyhow::Result<DataType> {
    let attrs = IndexAttrs::load(dir).with_context(|| format!("no index at {:?}", dir))?;
    Ok(attrs.dtype)
}

fn parse_geometry(text: &str) -> anyhow::Result<Geometry> {
    let parts = text
        .split(',')
        .map(|p| p.trim().parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("invalid geometry {:?}", text))?;
    match parts.as_slice() {
        &[chunksize, cps, spb, bps] => Ok(Geometry::new(chunksize, cps, spb, bps)?),
        _ => bail!("geometry needs four comma-separated sizes, got {:?}", text),
    }
}

/// Split `ge:10` (or `>=:10`) into operator and literal
fn parse_condition(text: &str) -> anyhow::Result<(CompareOp, &str)> {
    let (op, literal) = text
        .split_once(':')
        .with_context(|| format!("condition {:?} is not op:value", text))?;
    Ok((op.parse()?, literal))
}

fn create<T: Element>(dir: &Path, dtype: DataType, options: IndexOptions) -> anyhow::Result<Geometry> {
    let index = ColumnIndex::<T>::create(dir, dtype, options)?;
    Ok(*index.geometry())
}

struct LoadArgs<'a> {
    file: &'a Path,
    column: &'a str,
    has_headers: bool,
    batch: usize,
    optimize: bool,
}

fn load_csv<T: Element>(dir: &Path, options: IndexOptions, args: &LoadArgs<'_>) -> anyhow::Result<u64> {
    let mut index = ColumnIndex::<T>::open(dir, options)?;
    let itemsize = index.attrs().dtype.itemsize();

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(args.has_headers)
        .from_path(args.file)
        .with_context(|| format!("opening {:?}", args.file))?;

    let position = match args.column.parse::<usize>() {
        Ok(position) => position,
        Err(_) => {
            if !args.has_headers {
                bail!("column {:?} given by name but the file has no header", args.column);
            }
            reader
                .headers()?
                .iter()
                .position(|h| h == args.column)
                .with_context(|| format!("no column named {:?}", args.column))?
        }
    };

    let mut pending = Vec::with_capacity(args.batch);
    let mut loaded = 0u64;
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let field = record
            .get(position)
            .with_context(|| format!("record {} has no column {}", line + 1, position))?;
        pending.push(T::parse_literal(field, itemsize)?);

        if pending.len() == args.batch {
            index.extend(&pending)?;
            loaded += pending.len() as u64;
            pending.clear();
        }
    }
    index.extend(&pending)?;
    loaded += pending.len() as u64;
    index.flush()?;

    if args.optimize {
        let report = index.optimize(None, false)?;
        tracing::info!("{}", report);
    }
    Ok(loaded)
}

fn search<T: Element>(
    dir: &Path,
    options: IndexOptions,
    conditions: &[String],
    with_rows: bool,
) -> anyhow::Result<(u64, Option<Vec<u64>>)> {
    let mut index = ColumnIndex::<T>::open(dir, options)?;
    let itemsize = index.attrs().dtype.itemsize();

    let mut ops = Vec::with_capacity(conditions.len());
    let mut limits = Vec::with_capacity(conditions.len());
    for condition in conditions {
        let (op, literal) = parse_condition(condition)?;
        ops.push(op);
        limits.push(T::parse_literal(literal, itemsize)?);
    }

    if index.is_dirty() {
        tracing::warn!("Index at {:?} is dirty; results may be stale", dir);
    }

    let mut scratch = SearchScratch::new();
    let count = index.search_ops(&ops, &limits, &mut scratch)?;
    let rows = if with_rows {
        Some(index.row_coords(&scratch)?)
    } else {
        None
    };
    Ok((count, rows))
}
