use crate::models::OutputFormat;
use crate::settings::SettingsOverrides;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aq-processor")]
#[command(about = "Daily air-quality summaries from raw OpenAQ measurements")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, env = "AQ_CONFIG", help = "TOML settings file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Suppress progress output")]
    pub quiet: bool,
}

/// Settings that can be overridden on any pipeline subcommand
#[derive(Args, Debug, Clone, Default)]
pub struct OverrideArgs {
    #[arg(long, help = "Raw input location (s3://bucket/prefix, file:///path or a path)")]
    pub source: Option<String>,

    #[arg(long, help = "Output location for staging, summaries and reports")]
    pub target: Option<String>,

    #[arg(long, help = "Measured parameter to summarise (e.g. pm25)")]
    pub parameter: Option<String>,

    #[arg(long, help = "Maximum raw files per chunk")]
    pub chunk_size: Option<usize>,

    #[arg(long, help = "Maximum chunk transforms in flight")]
    pub map_concurrency: Option<usize>,

    #[arg(long, value_parser = parse_format, help = "Output format: parquet or csv_gzip")]
    pub format: Option<OutputFormat>,

    #[arg(long, help = "Parquet compression: snappy, gzip, zstd, lz4 or none")]
    pub compression: Option<String>,

    #[arg(long, help = "Only delete recorded extracts, not the whole staging prefix")]
    pub no_sweep: bool,
}

impl From<OverrideArgs> for SettingsOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            source: args.source,
            target: args.target,
            chunk_size: args.chunk_size,
            map_concurrency: args.map_concurrency,
            parameter: args.parameter,
            format: args.format,
            compression: args.compression,
            no_sweep: args.no_sweep,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the whole pipeline for one day
    Run {
        #[arg(short, long, help = "Target day (YYYY-MM-DD) [default: yesterday, UTC]")]
        date: Option<NaiveDate>,

        #[arg(long, help = "Write the final status JSON to this file")]
        status_out: Option<PathBuf>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// List the day's raw files and print the initial status with its chunk manifest
    Partition {
        #[arg(short, long, help = "Target day (YYYY-MM-DD) [default: yesterday, UTC]")]
        date: Option<NaiveDate>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Transform one chunk of a partitioned run and print the extended status
    Transform {
        #[arg(short, long, help = "Status JSON file, or '-' for stdin")]
        status: String,

        #[arg(long, help = "Chunk index to transform")]
        chunk: usize,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Merge all extracts into the daily summary and print the extended status
    Aggregate {
        #[arg(
            short,
            long,
            required = true,
            help = "Status JSON file, or '-' for stdin; repeat to join parallel transforms"
        )]
        status: Vec<String>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Delete the run's intermediate extracts, report the run and print the final status
    Clean {
        #[arg(
            short,
            long,
            required = true,
            help = "Status JSON file, or '-' for stdin; repeat to join parallel branches"
        )]
        status: Vec<String>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Display information about a local summary file
    Info {
        #[arg(short, long)]
        file: PathBuf,

        #[arg(short, long, default_value = "10")]
        sample: usize,
    },
}

fn parse_format(s: &str) -> std::result::Result<OutputFormat, String> {
    s.parse()
}
