//! Harness configuration: defaults, TOML/JSON files and `DNNCHECK_*`
//! environment overrides, merged with a fixed precedence.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{DnnCheckError, Result};
use crate::types::BenchMode;


/// Top-level harness configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub run: RunConfig,
    pub perf: PerfConfig,
    pub logging: LoggingConfig,
}

/// What to run and under which resource limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub mode: BenchMode,
    /// Implementation-name substrings whose cases are skipped.
    pub skip_impl: Vec<String>,
    /// Upper bound in bytes for the memory a single case may allocate.
    pub memory_limit: Option<usize>,
    /// Worker threads for the rayon pool; `None` means one per core.
    pub num_threads: Option<usize>,
}

/// Performance measurement knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PerfConfig {
    /// Exact number of timed executions; overrides the time budget.
    pub fix_times: Option<usize>,
    /// Time budget per problem in milliseconds.
    pub max_ms_per_prb: f64,
    /// Untimed executions before measuring.
    pub warmup: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self { fix_times: None, max_ms_per_prb: 3000.0, warmup: 1 }
    }
}

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = DnnCheckError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(DnnCheckError::parse("log format", s, "expected pretty, compact or json")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `dnncheck_drivers=debug`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::default() }
    }
}

impl HarnessConfig {
    // ── Constructors ───────────────────────────────────────────────

    /// Load configuration from a TOML or JSON file, chosen by extension.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)?;
        let config: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&text)
                .map_err(|e| DnnCheckError::Serialization(format!("{}: {e}", path.display())))?,
            Some("json") => serde_json::from_str(&text)
                .map_err(|e| DnnCheckError::Serialization(format!("{}: {e}", path.display())))?,
            _ => {
                return Err(DnnCheckError::Config(format!(
                    "unsupported config file extension: {}",
                    path.display()
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with `DNNCHECK_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    pub fn builder() -> HarnessConfigBuilder {
        HarnessConfigBuilder::default()
    }

    // ── Environment ────────────────────────────────────────────────

    /// Apply every `DNNCHECK_*` variable that is set.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = env::var("DNNCHECK_MODE") {
            self.run.mode = v.parse()?;
        }
        if let Ok(v) = env::var("DNNCHECK_SKIP_IMPL") {
            self.run.skip_impl =
                v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Ok(v) = env::var("DNNCHECK_MEMORY_LIMIT") {
            self.run.memory_limit = parse_memory_limit(&v)?;
        }
        if let Ok(v) = env::var("DNNCHECK_NUM_THREADS") {
            self.run.num_threads = Some(parse_env_usize("DNNCHECK_NUM_THREADS", &v)?);
        }
        if let Ok(v) = env::var("DNNCHECK_FIX_TIMES") {
            self.perf.fix_times = Some(parse_env_usize("DNNCHECK_FIX_TIMES", &v)?);
        }
        if let Ok(v) = env::var("DNNCHECK_MAX_MS_PER_PRB") {
            self.perf.max_ms_per_prb = v.trim().parse().map_err(|_| invalid_env("DNNCHECK_MAX_MS_PER_PRB", &v))?;
        }
        if let Ok(v) = env::var("DNNCHECK_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }

    // ── Validation ─────────────────────────────────────────────────

    pub fn validate(&self) -> Result<()> {
        if self.run.num_threads == Some(0) {
            return Err(DnnCheckError::Config("num_threads must be >= 1 when set".into()));
        }
        if self.run.memory_limit == Some(0) {
            return Err(DnnCheckError::Config("memory_limit must be > 0 when set".into()));
        }
        if self.perf.fix_times == Some(0) {
            return Err(DnnCheckError::Config("fix_times must be >= 1 when set".into()));
        }
        if !(self.perf.max_ms_per_prb.is_finite() && self.perf.max_ms_per_prb > 0.0) {
            return Err(DnnCheckError::Config("max_ms_per_prb must be a positive number".into()));
        }
        if self.logging.level.trim().is_empty() {
            return Err(DnnCheckError::Config("logging level must not be empty".into()));
        }
        Ok(())
    }

    // ── Merge ──────────────────────────────────────────────────────

    /// Overlay `other` on top of `self`. Fields in `other` that differ
    /// from the default take precedence.
    pub fn merge_with(&mut self, other: Self) {
        let d = Self::default();
        if other.run.mode != d.run.mode {
            self.run.mode = other.run.mode;
        }
        if !other.run.skip_impl.is_empty() {
            self.run.skip_impl = other.run.skip_impl;
        }
        self.run.memory_limit = other.run.memory_limit.or(self.run.memory_limit);
        self.run.num_threads = other.run.num_threads.or(self.run.num_threads);
        self.perf.fix_times = other.perf.fix_times.or(self.perf.fix_times);
        if other.perf.max_ms_per_prb != d.perf.max_ms_per_prb {
            self.perf.max_ms_per_prb = other.perf.max_ms_per_prb;
        }
        if other.perf.warmup != d.perf.warmup {
            self.perf.warmup = other.perf.warmup;
        }
        if other.logging.level != d.logging.level {
            self.logging.level = other.logging.level;
        }
        if other.logging.format != d.logging.format {
            self.logging.format = other.logging.format;
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

fn invalid_env(key: &str, value: &str) -> DnnCheckError {
    DnnCheckError::Config(format!("invalid value {value:?} for {key}"))
}

fn parse_env_usize(key: &str, value: &str) -> Result<usize> {
    value.trim().parse::<usize>().map_err(|_| invalid_env(key, value))
}

/// Parse a memory size such as `512MB`, `2GB`, `4096` or `none`.
pub fn parse_memory_limit(value: &str) -> Result<Option<usize>> {
    let v = value.trim().to_ascii_uppercase();
    if v == "NONE" || v.is_empty() {
        return Ok(None);
    }
    let (digits, mult) = if let Some(n) = v.strip_suffix("GB") {
        (n, 1usize << 30)
    } else if let Some(n) = v.strip_suffix("MB") {
        (n, 1 << 20)
    } else if let Some(n) = v.strip_suffix("KB") {
        (n, 1 << 10)
    } else if let Some(n) = v.strip_suffix('B') {
        (n, 1)
    } else {
        (v.as_str(), 1)
    };
    let n: usize =
        digits.trim().parse().map_err(|_| invalid_env("DNNCHECK_MEMORY_LIMIT", value))?;
    n.checked_mul(mult).map(Some).ok_or_else(|| invalid_env("DNNCHECK_MEMORY_LIMIT", value))
}

// ── Builder ────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct HarnessConfigBuilder {
    config: HarnessConfig,
}

impl HarnessConfigBuilder {
    pub fn mode(mut self, mode: BenchMode) -> Self {
        self.config.run.mode = mode;
        self
    }

    pub fn skip_impl<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.run.skip_impl = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn memory_limit(mut self, bytes: usize) -> Self {
        self.config.run.memory_limit = Some(bytes);
        self
    }

    pub fn num_threads(mut self, n: usize) -> Self {
        self.config.run.num_threads = Some(n);
        self
    }

    pub fn fix_times(mut self, n: usize) -> Self {
        self.config.perf.fix_times = Some(n);
        self
    }

    pub fn max_ms_per_prb(mut self, ms: f64) -> Self {
        self.config.perf.max_ms_per_prb = ms;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.logging.format = format;
        self
    }

    pub fn build(self) -> Result<HarnessConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Loader ─────────────────────────────────────────────────────────

/// Resolves the final configuration: defaults, then the config file, then
/// environment variables.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Default config file location, `$DNNCHECK_CONFIG` or `./dnncheck.toml`.
    pub fn default_path() -> PathBuf {
        env::var_os("DNNCHECK_CONFIG").map(PathBuf::from).unwrap_or_else(|| PathBuf::from("dnncheck.toml"))
    }

    pub fn load_with_precedence(config_file: Option<&Path>) -> Result<HarnessConfig> {
        let mut config = HarnessConfig::default();
        if let Some(path) = config_file {
            config.merge_with(HarnessConfig::from_file(path)?);
        }
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }
}
