//! Harness configuration.
//!
//! A run is described by a [`HarnessConfig`], loaded from JSON and then
//! overridden by command-line flags. Every field has a default, so an empty
//! object `{}` is a valid configuration that reproduces the reference
//! workload: 16 compartments (8 created up front), 16 pointers each, 1 MiB
//! per allocation.

use crate::backend::{BackendOption, CompartmentBackend, HeapBackend, RegionBackend};
use core::alloc::GlobalAlloc;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How the driver orders allocation, verification and release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadMode {
    /// Per compartment: allocate and fill, verify, free.
    #[default]
    Minimal,
    /// Allocate across all compartments with a switch between every call,
    /// then re-activate each compartment to verify and free.
    Interleaved,
}

/// Shape of the allocation matrix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkloadConfig {
    /// Total compartments `N`.
    pub compartments: usize,
    /// Compartments created before the first round; the rest are created
    /// before the second round. `None` creates all up front.
    pub initial_compartments: Option<usize>,
    /// Allocations per compartment `P`.
    pub pointers_per_compartment: usize,
    /// Bytes per allocation `S`.
    pub allocation_size: usize,
    pub rounds: usize,
    pub mode: WorkloadMode,
    /// Check that live allocations are pairwise disjoint after each
    /// allocation phase.
    pub check_isolation: bool,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            compartments: 1 << 4,
            initial_compartments: Some(1 << 3),
            pointers_per_compartment: 1 << 4,
            allocation_size: 1 << 20,
            rounds: 1,
            mode: WorkloadMode::Minimal,
            check_isolation: true,
        }
    }
}

impl WorkloadConfig {
    /// Compartments created before the first round.
    pub fn initial(&self) -> usize {
        self.initial_compartments.unwrap_or(self.compartments).min(self.compartments)
    }

    /// Total bytes live at the peak of one round.
    pub fn peak_bytes(&self) -> usize {
        let per_compartment = self.pointers_per_compartment.saturating_mul(self.allocation_size);
        match self.mode {
            WorkloadMode::Minimal => per_compartment,
            WorkloadMode::Interleaved => per_compartment.saturating_mul(self.compartments),
        }
    }

    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compartments == 0 {
            return Err(ConfigError::Invalid("compartments must be at least 1".into()));
        }
        if self.pointers_per_compartment == 0 {
            return Err(ConfigError::Invalid("pointers_per_compartment must be at least 1".into()));
        }
        if self.allocation_size == 0 {
            return Err(ConfigError::Invalid("allocation_size must be at least 1 byte".into()));
        }
        if self.rounds == 0 {
            return Err(ConfigError::Invalid("rounds must be at least 1".into()));
        }
        if let Some(initial) = self.initial_compartments {
            if initial == 0 || initial > self.compartments {
                return Err(ConfigError::Invalid(format!(
                    "initial_compartments must be between 1 and {} (got {initial})",
                    self.compartments
                )));
            }
        }
        Ok(())
    }
}

/// Which allocator backs the compartments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// The platform allocator.
    #[default]
    System,
    /// One anonymous mapping per allocation.
    Region,
    Mimalloc,
    Snmalloc,
    Jemalloc,
}

impl BackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Region => "region",
            Self::Mimalloc => "mimalloc",
            Self::Snmalloc => "snmalloc",
            Self::Jemalloc => "jemalloc",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Cap on live bytes; requests beyond it fail.
    pub memory_limit: Option<usize>,
    /// Cap on compartments the isolation resource can back.
    pub max_compartments: Option<usize>,
    /// Read-only protection of inactive compartments (region backend).
    pub protect_inactive: bool,
    /// Per-call backend tracing. Off by default.
    pub verbose: bool,
}

impl BackendConfig {
    /// Builds the configured backend.
    ///
    /// # Errors
    /// `ConfigError::FeatureDisabled` for an allocator not compiled in, and
    /// `ConfigError::Invalid` for protection on a backend without pages.
    pub fn build(&self) -> Result<Box<dyn CompartmentBackend>, ConfigError> {
        if self.protect_inactive && self.kind != BackendKind::Region {
            return Err(ConfigError::Invalid(format!(
                "protect_inactive requires the region backend (got {})",
                self.kind.as_str()
            )));
        }

        let mut backend: Box<dyn CompartmentBackend> = match self.kind {
            BackendKind::System => Box::new(self.limit_heap(HeapBackend::system())),
            BackendKind::Region => {
                let mut region = RegionBackend::new();
                if let Some(limit) = self.memory_limit {
                    region = region.with_memory_limit(limit);
                }
                if let Some(limit) = self.max_compartments {
                    region = region.with_max_domains(limit);
                }
                if self.protect_inactive {
                    region = region.with_protection();
                }
                Box::new(region)
            }
            #[cfg(feature = "mimalloc")]
            BackendKind::Mimalloc => Box::new(self.limit_heap(HeapBackend::mimalloc())),
            #[cfg(feature = "snmalloc")]
            BackendKind::Snmalloc => Box::new(self.limit_heap(HeapBackend::snmalloc())),
            #[cfg(feature = "jemalloc")]
            BackendKind::Jemalloc => Box::new(self.limit_heap(HeapBackend::jemalloc())),
            #[allow(unreachable_patterns)]
            other => return Err(ConfigError::FeatureDisabled(other.as_str())),
        };

        if self.verbose {
            backend.set_option(BackendOption::Verbose, true);
        } else {
            backend.disable_option(BackendOption::Verbose);
        }
        Ok(backend)
    }

    fn limit_heap<A: GlobalAlloc>(&self, mut heap: HeapBackend<A>) -> HeapBackend<A> {
        if let Some(limit) = self.memory_limit {
            heap = heap.with_memory_limit(limit);
        }
        if let Some(limit) = self.max_compartments {
            heap = heap.with_max_domains(limit);
        }
        heap
    }
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Compact,
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directives; `RUST_LOG` takes precedence when set.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { filter: "info".into(), format: LogFormat::Compact }
    }
}

/// Everything needed for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HarnessConfig {
    pub workload: WorkloadConfig,
    pub backend: BackendConfig,
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    /// # Errors
    /// `ConfigError::Parse` on malformed JSON or unknown fields.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(ConfigError::Parse)
    }

    /// # Errors
    /// `ConfigError::Io` if the file cannot be read, otherwise as
    /// [`from_json_str`](Self::from_json_str).
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
        Self::from_json_str(&json)
    }

    /// # Errors
    /// `ConfigError::Invalid` for an inconsistent workload or backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.workload.validate()?;
        if self.backend.max_compartments == Some(0) {
            return Err(ConfigError::Invalid("max_compartments must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse(serde_json::Error),
    Invalid(String),
    /// The backend needs a cargo feature that is not enabled.
    FeatureDisabled(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {source}", path.display()),
            Self::Parse(err) => write!(f, "malformed configuration: {err}"),
            Self::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            Self::FeatureDisabled(name) => {
                write!(f, "backend `{name}` is not compiled in; rebuild with `--features {name}`")
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(err) => Some(err),
            _ => None,
        }
    }
}

/// Parses a byte count with an optional binary suffix (`K`, `M`, `G`, with
/// or without `iB`/`B`), e.g. `4096`, `64K`, `1MiB`.
///
/// # Errors
/// A message describing why the text is not a size.
pub fn parse_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let split = text.find(|c: char| !c.is_ascii_digit()).unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    let value: usize = digits.parse().map_err(|_| format!("`{text}` is not a size"))?;
    let shift = match suffix.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        other => return Err(format!("unknown size suffix `{other}`")),
    };
    value
        .checked_mul(1usize << shift)
        .ok_or_else(|| format!("`{text}` does not fit in usize"))
}
