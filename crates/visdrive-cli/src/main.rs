//! `visdrive` – command line entry point for the vision-driven rover.
//!
//! ```text
//! visdrive [run] [--duration-secs N] [--duty-cycle P]   drive one session (default)
//! visdrive init                                         write a default ~/.visdrive/config.toml
//! visdrive config                                       print the effective configuration
//! ```
//!
//! During `run`, Ctrl-C or `q` + Enter ends the session early.  Either way
//! the motors are stopped and every pin is released before the Decision
//! History is printed.

mod config;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::io::BufRead;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

use visdrive_hal::sim::{SimBackend, SimCamera};
use visdrive_hal::{
    ActuatorDriver, DirectoryFrameSource, FrameSource, HBridgeDriver, PinMap, SysfsBackend,
};
use visdrive_runtime::{
    CancelSignal, ConsoleRenderer, ExitReason, HardwareProvider, OraclePrompt, SessionController,
    SessionReport, VisionOracle,
};
use visdrive_types::{DecisionRecord, DriveError};

use crate::config::{Backend, Config, HardwareSection};

#[derive(Parser, Debug)]
#[command(name = "visdrive", version, about = "Vision-driven rover control")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Drive one session (the default).
    Run(RunArgs),
    /// Write a default ~/.visdrive/config.toml.
    Init,
    /// Print the effective configuration, secrets redacted.
    Config,
}

/// One-off overrides on top of the config file and `VISDRIVE_*` variables.
#[derive(Args, Debug, Default, PartialEq)]
struct RunArgs {
    /// Session length in seconds.
    #[arg(long)]
    duration_secs: Option<u64>,
    /// Drive strength in percent.
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    duty_cycle: Option<u8>,
}

impl RunArgs {
    fn apply(&self, cfg: &mut Config) {
        if let Some(secs) = self.duration_secs {
            cfg.session.duration_secs = secs;
        }
        if let Some(duty) = self.duty_cycle {
            cfg.session.duty_cycle = duty;
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Installed before the runtime exists; the exporter is synchronous.
    let _telemetry = visdrive_runtime::init_tracing("visdrive");

    print_banner();

    match cli.command.unwrap_or(Command::Run(RunArgs::default())) {
        Command::Run(args) => cmd_run(&args),
        Command::Init => cmd_init(),
        Command::Config => cmd_config(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Commands
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_run(args: &RunArgs) -> ExitCode {
    let mut cfg = match load_or_create() {
        Ok(cfg) => cfg,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    args.apply(&mut cfg);
    let session_config = match cfg.to_session_config() {
        Ok(s) => s,
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = cfg.pins.validate() {
        println!("{}: {}", "Config error".red(), e);
        return ExitCode::FAILURE;
    }

    // ── Cancellation ──────────────────────────────────────────────────────
    let cancel = CancelSignal::new();
    let cancel_ctrlc = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping motors …".yellow().bold()
        );
        cancel_ctrlc.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use 'q' + Enter to stop");
    }
    spawn_stdin_watcher(cancel.clone());

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    let mut oracle = VisionOracle::new(&cfg.oracle.base_url, &cfg.oracle.model)
        .with_strategy(cfg.oracle.strategy);
    if !cfg.oracle.api_key.is_empty() {
        oracle = oracle.with_api_key(cfg.oracle.api_key.as_str());
    } else {
        warn!("no API key configured; requests are sent unauthenticated");
    }
    let prompt = OraclePrompt::for_strategy(cfg.oracle.strategy, cfg.oracle.vocabulary);

    println!(
        "  Driving for {}s with {} via {} ({} backend). Press {} + Enter or Ctrl-C to stop.\n",
        cfg.session.duration_secs,
        cfg.oracle.model.bold(),
        cfg.oracle.base_url.dimmed(),
        cfg.hardware.backend,
        "q".bold().cyan()
    );

    let controller = SessionController::with_prompt(session_config, Arc::new(oracle), prompt)
        .with_renderer(Box::new(ConsoleRenderer::new()))
        .with_cancel(cancel);
    let mut hardware = CliHardware::new(cfg.hardware.clone(), cfg.pins.clone());

    let report = runtime.block_on(controller.run(&mut hardware));
    info!(session = %report.session_id, cycles = report.records.len(), "session finished");

    print_history(&report);
    match report.exit {
        ExitReason::DurationElapsed | ExitReason::Cancelled => ExitCode::SUCCESS,
        ExitReason::ActuatorFault(_) | ExitReason::StartupFailed(_) => ExitCode::FAILURE,
    }
}

fn cmd_init() -> ExitCode {
    let path = config::config_path();
    if path.exists() {
        println!(
            "  Config already exists at {}",
            path.display().to_string().bold()
        );
        return ExitCode::SUCCESS;
    }
    match config::save(&Config::default()) {
        Ok(()) => {
            println!(
                "  {} Config saved to {}",
                "✓".green().bold(),
                path.display().to_string().bold()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Error saving config".red(), e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_config() -> ExitCode {
    match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}\n", config::config_path().display().to_string().bold());
            println!("{:#?}", cfg);
            ExitCode::SUCCESS
        }
        Ok(None) => {
            println!(
                "  No config at {}; run `{}` to create one. Defaults:\n",
                config::config_path().display(),
                "visdrive init".bold()
            );
            let mut cfg = Config::default();
            config::apply_env_overrides(&mut cfg);
            println!("{:#?}", cfg);
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// Load the config, writing the defaults on first run.
fn load_or_create() -> Result<Config, String> {
    match config::load()? {
        Some(cfg) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            Ok(cfg)
        }
        None => {
            let mut cfg = Config::default();
            config::save(&cfg)?;
            println!(
                "  {} No config found; defaults written to {}",
                "✓".green().bold(),
                config::config_path().display().to_string().bold()
            );
            config::apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// `q` + Enter raises `cancel`.  EOF on stdin is not a stop request.
fn spawn_stdin_watcher(cancel: CancelSignal) {
    let spawned = std::thread::Builder::new()
        .name("stdin-watcher".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().eq_ignore_ascii_case("q") {
                    println!("{}", "  Stop requested – stopping motors …".yellow().bold());
                    cancel.cancel();
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "stdin watcher unavailable");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Hardware
// ─────────────────────────────────────────────────────────────────────────────

/// Opens the devices named in `[hardware]` and `[pins]`.
struct CliHardware {
    hardware: HardwareSection,
    pins: PinMap,
}

impl CliHardware {
    fn new(hardware: HardwareSection, pins: PinMap) -> Self {
        Self { hardware, pins }
    }
}

impl HardwareProvider for CliHardware {
    fn open_frame_source(&mut self) -> Result<Box<dyn FrameSource>, DriveError> {
        match &self.hardware.frames_dir {
            Some(dir) => Ok(Box::new(DirectoryFrameSource::open(dir)?)),
            None => Ok(Box::new(SimCamera::with_size("sim-camera", 640, 480))),
        }
    }

    fn open_actuator(&mut self) -> Result<Box<dyn ActuatorDriver>, DriveError> {
        let driver = match self.hardware.backend {
            Backend::Sim => HBridgeDriver::open(&mut SimBackend::new(), &self.pins)?,
            Backend::Sysfs => {
                let mut backend = SysfsBackend::new(
                    &self.hardware.gpio_root,
                    &self.hardware.pwm_root,
                    self.hardware.pwm_chip,
                );
                HBridgeDriver::open(&mut backend, &self.pins)?
            }
        };
        Ok(Box::new(driver))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Decision History
// ─────────────────────────────────────────────────────────────────────────────

fn print_history(report: &SessionReport) {
    println!();
    println!("{}", "  Decision History".bold().cyan());
    println!("{}", format!("  session {}", report.session_id).dimmed());
    if report.records.is_empty() {
        println!("  (no cycles ran)");
    }
    for record in &report.records {
        let row = history_row(record);
        if record.anomaly.is_some() {
            println!("  {}", row.yellow());
        } else {
            println!("  {}", row);
        }
    }
    println!();

    let exit = report.exit.to_string();
    match &report.exit {
        ExitReason::DurationElapsed | ExitReason::Cancelled => {
            println!("  {} {}", "✓".green().bold(), exit)
        }
        _ => println!("  {} {}", "✗".red().bold(), exit.red()),
    }
    if report.drain.stop_dispatched {
        println!("  {} motors stopped, hardware released", "✓".green().bold());
    }
    for e in &report.drain.errors {
        println!("  {} teardown: {}", "⚠".yellow().bold(), e);
    }
}

/// One history line: `#seq  HH:MM:SS.mmm  DIRECTIVE  confidence  [anomaly]`.
fn history_row(record: &DecisionRecord) -> String {
    let confidence = record
        .metadata
        .as_ref()
        .and_then(|m| m.confidence)
        .map_or_else(|| "--".to_string(), |c| format!("{c}%"));
    let mut row = format!(
        "#{:<4} {}  {:<8} {:>4}",
        record.sequence,
        record.timestamp.format("%H:%M:%S%.3f"),
        record.directive.as_str().to_uppercase(),
        confidence
    );
    if let Some(anomaly) = &record.anomaly {
        row.push_str(&format!("  [{anomaly}]"));
    }
    row
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"        _         __    _         "#.bold().cyan());
    println!("{}", r#"  _  __(_)__ ___/ /___(_)  _____  "#.bold().cyan());
    println!("{}", r#" | |/ / (_-</ _  / __/ / |/ / -_) "#.bold().cyan());
    println!("{}", r#" |___/_/___/\_,_/_/ /_/|___/\__/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "visdrive".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Vision-driven rover control");
    println!();
}
