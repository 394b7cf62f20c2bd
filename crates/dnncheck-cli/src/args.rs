//! Command-line surface.
//!
//! List-valued options take comma-separated values and expand into one
//! case per combination, e.g. `--dt f32,bf16 --dir FWD_D,BWD_DW` yields four
//! cases per problem shape. Every reproducer printed by a run parses back
//! into exactly one case.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dnncheck_common::eltwise::Alg;
use dnncheck_common::{
    BenchMode, CheckAlg, ConfigLoader, DataType, Direction, HarnessConfig, LogFormat, NormFlags, parse_memory_limit,
};

/// Correctness and performance harness for layer normalization and eltwise
/// primitives.
#[derive(Debug, Parser)]
#[command(name = "dnncheck")]
#[command(about = "Verify layer-normalization and eltwise primitives against exact references")]
#[command(long_about = r#"
dnncheck fills inputs with data whose reference results are exactly
computable, runs the primitive, and compares element by element under a
per-type tolerance.

Examples:
  # Forward and backward layer norm in two precisions
  dnncheck lnorm --dt f32,bf16 --dir FWD_D,BWD_DW --flags ,CH 8x1024

  # Every gelu flavour, reduced precision
  dnncheck eltwise --alg gelu_tanh,gelu_erf --dt bf16 16x256

  # Same through the graph API, list only
  dnncheck --mode list eltwise --graph --alg relu,tanh 2x3x4
"#)]
#[command(version)]
#[command(allow_negative_numbers = true)]
pub struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log filter directive (trace, debug, info, warn, error, or an EnvFilter string)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log output format
    #[arg(long, value_name = "FORMAT", global = true)]
    pub format: Option<LogFormat>,

    /// Bench mode: corr, perf, both, list
    #[arg(long, value_name = "MODE", global = true)]
    pub mode: Option<BenchMode>,

    /// Worker threads for data generation and comparison
    #[arg(long, value_name = "N", global = true)]
    pub threads: Option<usize>,

    /// Skip cases whose implementation name contains any of these substrings
    #[arg(long, value_name = "NAMES", value_delimiter = ',', global = true)]
    pub skip_impl: Vec<String>,

    /// Memory limit per case, e.g. 512MB or 2GB
    #[arg(long, value_name = "SIZE", global = true)]
    pub memory_limit: Option<String>,

    /// Exact number of timed runs in perf mode
    #[arg(long, value_name = "N", global = true)]
    pub fix_times: Option<usize>,

    /// Write a JSON report of every case to this file
    #[arg(long, value_name = "PATH", global = true)]
    pub report: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Layer normalization cases
    Lnorm(LnormArgs),

    /// Eltwise cases
    Eltwise(EltwiseArgs),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show build and engine information
    Info,
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}

#[derive(Debug, Clone, Args)]
pub struct LnormArgs {
    #[arg(long, value_name = "DIRS", value_delimiter = ',')]
    pub dir: Vec<Direction>,

    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    pub dt: Vec<DataType>,

    /// Combinations of G, S, C, H; an empty entry means no flags
    #[arg(long, value_name = "FLAGS", value_delimiter = ',')]
    pub flags: Vec<NormFlags>,

    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tag: Vec<String>,

    /// Layout of the mean and variance tensors
    #[arg(long, value_name = "TAG")]
    pub stat_tag: Option<String>,

    #[arg(long, value_name = "ALGS", value_delimiter = ',')]
    pub check_alg: Vec<CheckAlg>,

    #[arg(long, value_name = "EPS")]
    pub eps: Option<f32>,

    /// Destination overwrites the source
    #[arg(long)]
    pub inplace: bool,

    /// Problem shapes such as 8x1024; the last dimension is normalized
    #[arg(required = true, value_name = "DIMS")]
    pub dims: Vec<String>,
}

#[derive(Debug, Clone, Args)]
pub struct EltwiseArgs {
    #[arg(long, value_name = "DIRS", value_delimiter = ',')]
    pub dir: Vec<Direction>,

    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    pub dt: Vec<DataType>,

    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    pub tag: Vec<String>,

    #[arg(long, value_name = "ALGS", value_delimiter = ',')]
    pub alg: Vec<Alg>,

    #[arg(long, value_name = "VALUES", value_delimiter = ',')]
    pub alpha: Vec<f32>,

    #[arg(long, value_name = "VALUES", value_delimiter = ',')]
    pub beta: Vec<f32>,

    /// Fuse `dst += src1` with src1 stored in each of these types
    #[arg(long, value_name = "TYPES", value_delimiter = ',')]
    pub binary_add: Vec<DataType>,

    /// Destination overwrites the source
    #[arg(long)]
    pub inplace: bool,

    /// Run through the graph API instead of the primitive API
    #[arg(long)]
    pub graph: bool,

    #[arg(required = true, value_name = "DIMS")]
    pub dims: Vec<String>,
}

impl Cli {
    /// Config file to read: `--config`, else the default path when it
    /// exists.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.config.clone().or_else(|| {
            let path = ConfigLoader::default_path();
            path.is_file().then_some(path)
        })
    }

    /// Overlay command-line flags on `config`.
    pub fn apply_overrides(&self, config: &mut HarnessConfig) -> Result<()> {
        if let Some(mode) = self.mode {
            config.run.mode = mode;
        }
        if let Some(threads) = self.threads {
            config.run.num_threads = Some(threads);
        }
        if !self.skip_impl.is_empty() {
            config.run.skip_impl = self.skip_impl.clone();
        }
        if let Some(limit) = &self.memory_limit {
            config.run.memory_limit = parse_memory_limit(limit).context("invalid --memory-limit")?;
        }
        if let Some(n) = self.fix_times {
            config.perf.fix_times = Some(n);
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = self.format {
            config.logging.format = format;
        }
        config.validate().context("invalid configuration after command-line overrides")?;
        Ok(())
    }

    /// Defaults, then the config file, then `DNNCHECK_*`, then flags.
    pub fn load_config(&self) -> Result<HarnessConfig> {
        let path = self.config_path();
        let mut config = ConfigLoader::load_with_precedence(path.as_deref())
            .with_context(|| match &path {
                Some(p) => format!("failed to load configuration from {}", p.display()),
                None => "failed to load configuration".to_string(),
            })?;
        self.apply_overrides(&mut config)?;
        Ok(config)
    }
}
