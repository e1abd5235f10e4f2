use anyhow::{Context, Result};
use clap::Parser;
use compart::config::{parse_size, BackendKind, ConfigError, HarnessConfig, LogFormat};
use compart::logging::init_logging;
use compart::{run_workload, WorkloadMode};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit status for unreadable or inconsistent configuration.
const EXIT_CONFIG: u8 = 2;

#[derive(Parser)]
#[command(name = "compart-stress")]
#[command(about = "Stress an allocator across isolated compartments", long_about = None)]
struct Cli {
    /// JSON configuration file; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Total compartments
    #[arg(long)]
    compartments: Option<usize>,

    /// Compartments created before the first round (the rest come later)
    #[arg(long)]
    initial_compartments: Option<usize>,

    /// Create every compartment before the first round
    #[arg(long, default_value_t = false, conflicts_with = "initial_compartments")]
    all_up_front: bool,

    /// Allocations per compartment
    #[arg(long)]
    pointers: Option<usize>,

    /// Bytes per allocation (accepts K/M/G suffixes)
    #[arg(long, value_parser = parse_size)]
    size: Option<usize>,

    #[arg(long)]
    rounds: Option<usize>,

    #[arg(long, value_enum)]
    mode: Option<WorkloadMode>,

    /// Skip the pairwise address-range check
    #[arg(long, default_value_t = false)]
    no_isolation_check: bool,

    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Cap on live bytes (accepts K/M/G suffixes)
    #[arg(long, value_parser = parse_size)]
    memory_limit: Option<usize>,

    /// Cap on compartments the backend can create
    #[arg(long)]
    max_compartments: Option<usize>,

    /// Make inactive compartments read-only (region backend)
    #[arg(long, default_value_t = false)]
    protect_inactive: bool,

    /// Re-enable per-call backend tracing
    #[arg(long, default_value_t = false)]
    verbose_allocator: bool,

    /// Log filter directives (RUST_LOG wins when set)
    #[arg(long)]
    log_filter: Option<String>,

    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long, default_value_t = false)]
    print_config: bool,
}

impl Cli {
    fn load_config(&self) -> Result<HarnessConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => HarnessConfig::from_json_file(path)?,
            None => HarnessConfig::default(),
        };

        let workload = &mut config.workload;
        if let Some(n) = self.compartments {
            workload.compartments = n;
            // Keep deferring half of them unless told otherwise.
            if workload.initial_compartments.is_some() {
                workload.initial_compartments = Some((n / 2).max(1));
            }
        }
        if self.all_up_front {
            workload.initial_compartments = None;
        } else if let Some(n) = self.initial_compartments {
            workload.initial_compartments = Some(n);
        }
        if let Some(n) = self.pointers {
            workload.pointers_per_compartment = n;
        }
        if let Some(n) = self.size {
            workload.allocation_size = n;
        }
        if let Some(n) = self.rounds {
            workload.rounds = n;
        }
        if let Some(mode) = self.mode {
            workload.mode = mode;
        }
        if self.no_isolation_check {
            workload.check_isolation = false;
        }

        let backend = &mut config.backend;
        if let Some(kind) = self.backend {
            backend.kind = kind;
        }
        if let Some(limit) = self.memory_limit {
            backend.memory_limit = Some(limit);
        }
        if let Some(limit) = self.max_compartments {
            backend.max_compartments = Some(limit);
        }
        if self.protect_inactive {
            backend.protect_inactive = true;
        }
        if self.verbose_allocator {
            backend.verbose = true;
        }

        if let Some(filter) = &self.log_filter {
            config.logging.filter.clone_from(filter);
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match cli.load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(ExitCode::SUCCESS);
    }

    init_logging(&config.logging)?;

    let backend = match config.backend.build() {
        Ok(backend) => backend,
        Err(err) => {
            tracing::error!("{err}");
            return Ok(ExitCode::from(EXIT_CONFIG));
        }
    };

    let workload = &config.workload;
    tracing::info!(
        backend = backend.name(),
        compartments = workload.compartments,
        pointers = workload.pointers_per_compartment,
        size = workload.allocation_size,
        rounds = workload.rounds,
        peak_bytes = workload.peak_bytes(),
        mode = ?workload.mode,
        "starting compartment stress run"
    );

    match run_workload(workload, backend) {
        Ok(report) => {
            tracing::info!(
                allocations = report.allocations,
                words_verified = report.words_verified,
                switches = report.switches,
                peak_live_bytes = report.peak_live_bytes,
                elapsed_ms = report.elapsed_ms,
                "run passed"
            );
            if let Some(path) = &cli.report {
                let json = serde_json::to_string_pretty(&report)?;
                fs::write(path, json).with_context(|| format!("writing report to {}", path.display()))?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            eprintln!("FAILED: {err}");
            Ok(ExitCode::from(err.exit_code()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "compart-stress",
            "--compartments",
            "8",
            "--all-up-front",
            "--size",
            "64K",
            "--mode",
            "interleaved",
            "--backend",
            "region",
            "--protect-inactive",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.workload.compartments, 8);
        assert_eq!(config.workload.initial(), 8);
        assert_eq!(config.workload.allocation_size, 64 << 10);
        assert_eq!(config.workload.mode, WorkloadMode::Interleaved);
        assert_eq!(config.backend.kind, BackendKind::Region);
        assert!(config.backend.protect_inactive);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let cli = Cli::parse_from(["compart-stress", "--compartments", "2", "--initial-compartments", "3"]);
        assert!(matches!(cli.load_config(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn compartment_count_keeps_half_deferred() {
        let cli = Cli::parse_from(["compart-stress", "--compartments", "6"]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.workload.initial(), 3);
    }
}
