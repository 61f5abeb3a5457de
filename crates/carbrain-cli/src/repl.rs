//! REPL – the operator shell around the decision engine.
//!
//! Supported slash-commands:
//!   /help                         – show this list
//!   /status                       – engine mode, model and store sizes
//!   /history [n]                  – last n issued commands
//!   /metrics [n] | /metrics latest – last n sensor snapshots
//!   /stats                        – aggregate sensor statistics
//!   /exchanges [n]                – last n policy exchanges
//!   /alerts [n]                   – last n instability alerts
//!   /clear <store|all>            – empty commands, metrics, exchanges, alerts or images
//!   /prompt [set <text> | reset]  – show or change the system instruction
//!   /thresholds [set a b c d]     – show or change the anomaly thresholds
//!   /replay <file.ndjson>         – feed a recorded drive through the engine
//!   /quit | /exit                 – leave
//!
//! Any other line is decoded as a JSON car-data request and decided.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use carbrain_kernel::AnomalyThresholds;
use carbrain_runtime::DecisionEngine;
use carbrain_types::{CarError, Command};
use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::runtime::Runtime;
use tracing::warn;

use crate::wire;

const DEFAULT_LISTING: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Command grammar
// ─────────────────────────────────────────────────────────────────────────────

/// Stores that `/clear` can empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearTarget {
    Commands,
    Metrics,
    Exchanges,
    Alerts,
    Images,
    All,
}

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Help,
    Status,
    History(usize),
    Metrics(usize),
    MetricsLatest,
    Stats,
    Exchanges(usize),
    Alerts(usize),
    Clear(ClearTarget),
    Prompt,
    PromptSet(String),
    PromptReset,
    Thresholds,
    ThresholdsSet(AnomalyThresholds),
    Replay(PathBuf),
    Quit,
    /// A raw JSON car-data request.
    Snapshot(String),
}

/// Parse one non-empty input line.
pub fn parse_command(line: &str) -> Result<ReplCommand, String> {
    let line = line.trim();
    if !line.starts_with('/') {
        return Ok(ReplCommand::Snapshot(line.to_string()));
    }

    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let cmd = match head {
        "/help" => ReplCommand::Help,
        "/status" => ReplCommand::Status,
        "/history" => ReplCommand::History(parse_count(rest)?),
        "/metrics" if rest == "latest" => ReplCommand::MetricsLatest,
        "/metrics" => ReplCommand::Metrics(parse_count(rest)?),
        "/stats" => ReplCommand::Stats,
        "/exchanges" => ReplCommand::Exchanges(parse_count(rest)?),
        "/alerts" => ReplCommand::Alerts(parse_count(rest)?),
        "/clear" => ReplCommand::Clear(parse_clear_target(rest)?),
        "/prompt" => match rest.split_once(char::is_whitespace) {
            _ if rest.is_empty() => ReplCommand::Prompt,
            _ if rest == "reset" => ReplCommand::PromptReset,
            Some(("set", text)) if !text.trim().is_empty() => {
                ReplCommand::PromptSet(text.trim().to_string())
            }
            _ => return Err("usage: /prompt [set <text> | reset]".to_string()),
        },
        "/thresholds" if rest.is_empty() => ReplCommand::Thresholds,
        "/thresholds" => ReplCommand::ThresholdsSet(parse_thresholds(rest)?),
        "/replay" if !rest.is_empty() => ReplCommand::Replay(PathBuf::from(rest)),
        "/replay" => return Err("usage: /replay <file.ndjson>".to_string()),
        "/quit" | "/exit" => ReplCommand::Quit,
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(cmd)
}

fn parse_count(arg: &str) -> Result<usize, String> {
    if arg.is_empty() {
        return Ok(DEFAULT_LISTING);
    }
    arg.parse::<usize>()
        .map_err(|_| format!("expected a count, got '{arg}'"))
}

fn parse_clear_target(arg: &str) -> Result<ClearTarget, String> {
    match arg {
        "commands" | "history" => Ok(ClearTarget::Commands),
        "metrics" => Ok(ClearTarget::Metrics),
        "exchanges" => Ok(ClearTarget::Exchanges),
        "alerts" => Ok(ClearTarget::Alerts),
        "images" => Ok(ClearTarget::Images),
        "all" => Ok(ClearTarget::All),
        _ => Err("usage: /clear <commands|metrics|exchanges|alerts|images|all>".to_string()),
    }
}

fn parse_thresholds(arg: &str) -> Result<AnomalyThresholds, String> {
    const USAGE: &str = "usage: /thresholds set <ax_max> <ay_max> <az_min> <gyro_max>";
    let Some(values) = arg.strip_prefix("set") else {
        return Err(USAGE.to_string());
    };
    let values: Vec<f64> = values
        .split_whitespace()
        .map(str::parse::<f64>)
        .collect::<Result<_, _>>()
        .map_err(|_| USAGE.to_string())?;
    match values.as_slice() {
        &[ax_max, ay_max, az_min, gyro_max]
            if values.iter().all(|v| v.is_finite() && *v >= 0.0) =>
        {
            Ok(AnomalyThresholds {
                ax_max,
                ay_max,
                az_min,
                gyro_max,
            })
        }
        _ => Err(USAGE.to_string()),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shell
// ─────────────────────────────────────────────────────────────────────────────

/// Totals of one `/replay` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub processed: usize,
    pub rejected: usize,
}

/// The interactive shell: owns the engine and the runtime that drives it.
pub struct Shell {
    engine: Arc<DecisionEngine>,
    runtime: Runtime,
    shutdown: Arc<AtomicBool>,
}

impl Shell {
    pub fn new(engine: Arc<DecisionEngine>, runtime: Runtime, shutdown: Arc<AtomicBool>) -> Self {
        Self {
            engine,
            runtime,
            shutdown,
        }
    }

    /// Read lines until `/quit`, end of input, or shutdown.
    pub fn run(&self) {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                eprintln!("{}: {}", "Terminal error".red(), e);
                return;
            }
        };

        while !self.shutdown.load(Ordering::SeqCst) {
            let line = match editor.readline("carbrain> ") {
                Ok(line) => line,
                Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                    println!("{}", "Goodbye.".green());
                    break;
                }
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = editor.add_history_entry(line) {
                warn!(error = %e, "failed to record line history");
            }

            match parse_command(line) {
                Ok(ReplCommand::Quit) => {
                    println!("{}", "Goodbye.".green());
                    self.shutdown.store(true, Ordering::SeqCst);
                }
                Ok(cmd) => self.execute(cmd),
                Err(msg) => println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    msg,
                    "/help".bold()
                ),
            }
        }
    }

    fn execute(&self, cmd: ReplCommand) {
        match cmd {
            ReplCommand::Help => cmd_help(),
            ReplCommand::Status => self.cmd_status(),
            ReplCommand::History(n) => self.cmd_history(n),
            ReplCommand::Metrics(n) => self.cmd_metrics(n),
            ReplCommand::MetricsLatest => self.cmd_metrics_latest(),
            ReplCommand::Stats => self.cmd_stats(),
            ReplCommand::Exchanges(n) => self.cmd_exchanges(n),
            ReplCommand::Alerts(n) => self.cmd_alerts(n),
            ReplCommand::Clear(target) => {
                let removed = self.clear(target);
                println!("{} {} entries removed", "✓".green().bold(), removed);
            }
            ReplCommand::Prompt => self.cmd_prompt(),
            ReplCommand::PromptSet(text) => {
                self.engine.system_prompt().replace(text);
                println!("{}", "✓ System instruction replaced.".green());
            }
            ReplCommand::PromptReset => {
                self.engine.system_prompt().reset();
                println!("{}", "✓ System instruction reset to default.".green());
            }
            ReplCommand::Thresholds => self.cmd_thresholds(),
            ReplCommand::ThresholdsSet(t) => {
                self.engine.anomaly_monitor().set_thresholds(t);
                self.cmd_thresholds();
            }
            ReplCommand::Replay(path) => match self.replay(&path) {
                Ok(summary) => println!(
                    "{} {} processed, {} rejected",
                    "✓ Replay finished:".green(),
                    summary.processed,
                    summary.rejected
                ),
                Err(e) => println!("{}: {}", "Replay failed".red(), e),
            },
            ReplCommand::Snapshot(json) => match self.decide(&json) {
                Ok(command) => println!("{}", command_json(&command)),
                Err(e) => println!("{}: {}", "Rejected".red(), e),
            },
            ReplCommand::Quit => self.shutdown.store(true, Ordering::SeqCst),
        }
    }

    /// Decode `json` and run one decision cycle.
    pub fn decide(&self, json: &str) -> Result<Command, CarError> {
        let snapshot = wire::parse_snapshot(json)?;
        Ok(self.runtime.block_on(self.engine.process(snapshot)))
    }

    /// Feed every request in an NDJSON file through the engine.  Blank lines
    /// and `#` comments are skipped; rejected lines are reported and skipped.
    pub fn replay(&self, path: &Path) -> Result<ReplaySummary, CarError> {
        let raw = fs::read_to_string(path)
            .map_err(|e| CarError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut summary = ReplaySummary::default();
        for (idx, line) in raw.lines().enumerate() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.decide(line) {
                Ok(command) => {
                    summary.processed += 1;
                    println!("  {:>5}  {}", idx + 1, command_json(&command));
                }
                Err(e) => {
                    summary.rejected += 1;
                    println!("  {:>5}  {}: {}", idx + 1, "rejected".red(), e);
                }
            }
        }
        Ok(summary)
    }

    /// Empty `target`; returns the number of entries removed.
    pub fn clear(&self, target: ClearTarget) -> usize {
        let images = || self.engine.images().map_or(0, |index| index.clear());
        match target {
            ClearTarget::Commands => self.engine.commands().clear(),
            ClearTarget::Metrics => self.engine.metrics().clear(),
            ClearTarget::Exchanges => self.engine.exchanges().clear(),
            ClearTarget::Alerts => self.engine.alerts().clear(),
            ClearTarget::Images => images(),
            ClearTarget::All => {
                self.engine.commands().clear()
                    + self.engine.metrics().clear()
                    + self.engine.exchanges().clear()
                    + self.engine.alerts().clear()
                    + images()
            }
        }
    }

    fn cmd_status(&self) {
        let status = self.engine.status();
        println!("{}", "Engine Status".bold().underline());
        println!("  Mode              : {}", status.mode.to_string().yellow());
        println!(
            "  Model             : {}",
            status.model.as_deref().unwrap_or("– (heuristic policy)")
        );
        println!("  Commands issued   : {}", status.commands_processed);
        println!("  Metrics stored    : {}", status.metrics_stored);
        println!("  Exchanges stored  : {}", status.exchanges_stored);
        println!("  Alerts stored     : {}", status.alerts_stored);
        if let Some(images) = status.images_stored {
            println!("  Images stored     : {images}");
        }
        let vocabulary: Vec<&str> = status.available_commands.iter().map(|c| c.as_str()).collect();
        println!("  Vocabulary        : {}", vocabulary.join(", "));
        println!("  Default duration  : {}ms", status.default_duration_ms);
    }

    fn cmd_history(&self, n: usize) {
        let entries = self.engine.commands().recent(n);
        if entries.is_empty() {
            println!("  {}", "No commands issued yet.".dimmed());
            return;
        }
        for e in entries {
            println!(
                "  step {:>6}  {:<8} {:>6}ms  {}",
                e.step,
                e.command.as_str().bold(),
                e.duration_ms,
                e.recorded_at.format("%H:%M:%S%.3f").to_string().dimmed()
            );
        }
    }

    fn cmd_metrics(&self, n: usize) {
        let entries = self.engine.metrics().recent(n);
        if entries.is_empty() {
            println!("  {}", "No sensor data received yet.".dimmed());
            return;
        }
        for e in entries {
            println!(
                "  s{} step {:>6}  dist {:>7.1}cm  light {:>5}{}  imu {}  img {}",
                e.session_id,
                e.step,
                e.distance_cm,
                e.light_raw,
                if e.light_dark { " (dark)" } else { "" },
                if e.inertial.is_some() { "yes" } else { "no" },
                if e.image_available { "yes" } else { "no" },
            );
        }
    }

    fn cmd_metrics_latest(&self) {
        match self.engine.metrics().latest() {
            Some(entry) => print_json(&entry),
            None => println!("  {}", "No sensor data received yet.".dimmed()),
        }
    }

    fn cmd_stats(&self) {
        let Some(stats) = self.engine.metrics_stats() else {
            println!("  {}", "No sensor data received yet.".dimmed());
            return;
        };
        println!("{}", "Sensor Statistics".bold().underline());
        println!("  Records    : {}", stats.total_records);
        println!(
            "  Distance   : min {:.1}  max {:.1}  avg {:.1} cm",
            stats.distance.min, stats.distance.max, stats.distance.avg
        );
        println!(
            "  Light      : min {:.0}  max {:.0}  avg {:.1}",
            stats.light.min, stats.light.max, stats.light.avg
        );
        println!("  Dark       : {:.1}%", stats.dark_percentage);
        println!("  Images     : {}", stats.images_captured);
        println!(
            "  Window     : {} → {}",
            stats.first_record.to_rfc3339(),
            stats.last_record.to_rfc3339()
        );
    }

    fn cmd_exchanges(&self, n: usize) {
        let entries = self.engine.exchanges().recent(n);
        if entries.is_empty() {
            println!("  {}", "No exchanges recorded yet.".dimmed());
            return;
        }
        for e in entries {
            let decided = match (e.parsed_command, e.parsed_duration_ms) {
                (Some(c), Some(d)) => format!("{c} ({d}ms)"),
                (Some(c), None) => c.to_string(),
                _ => "–".to_string(),
            };
            let latency = e.latency_ms.map_or("–".to_string(), |ms| format!("{ms}ms"));
            let mut line = format!(
                "  [{}] step {:>6}  {:<18} {:>8}",
                e.mode, e.step, decided, latency
            );
            if e.substituted {
                line.push_str(&format!("  {}", "substituted".yellow()));
            }
            if e.image_sent {
                line.push_str("  +image");
            }
            println!("{line}");
            if let Some(err) = &e.error {
                println!("           {}", err.red());
            }
        }
    }

    fn cmd_alerts(&self, n: usize) {
        let entries = self.engine.alerts().recent(n);
        if entries.is_empty() {
            println!("  {}", "No alerts.".dimmed());
            return;
        }
        for a in entries {
            println!(
                "  step {:>6}  {}  (ax {:.2} ay {:.2} az {:.2} | gx {:.2} gy {:.2} gz {:.2})",
                a.step,
                a.message.yellow(),
                a.details.ax,
                a.details.ay,
                a.details.az,
                a.details.gx,
                a.details.gy,
                a.details.gz
            );
        }
    }

    fn cmd_prompt(&self) {
        let prompt = self.engine.system_prompt();
        let origin = if prompt.is_default() { "default" } else { "custom" };
        println!("{} ({})", "System Instruction".bold().underline(), origin.dimmed());
        println!("{}", prompt.get());
    }

    fn cmd_thresholds(&self) {
        let t = self.engine.anomaly_monitor().thresholds();
        println!("{}", "Anomaly Thresholds".bold().underline());
        println!("  |ax| >  {:.2}  → tilted X", t.ax_max);
        println!("  |ay| >  {:.2}  → tilted Y", t.ay_max);
        println!("  |az| <  {:.2}  → not upright", t.az_min);
        println!("  |g*| >  {:.2}  → rotating", t.gyro_max);
    }
}

fn cmd_help() {
    println!();
    println!("{}", "Car Brain Commands".bold().underline());
    println!("  {}          – engine mode, model and store sizes", "/status".bold().cyan());
    println!("  {}     – last n issued commands", "/history [n]".bold().cyan());
    println!("  {}     – last n sensor snapshots (or: /metrics latest)", "/metrics [n]".bold().cyan());
    println!("  {}           – aggregate sensor statistics", "/stats".bold().cyan());
    println!("  {}   – last n policy exchanges", "/exchanges [n]".bold().cyan());
    println!("  {}      – last n instability alerts", "/alerts [n]".bold().cyan());
    println!("  {} – commands|metrics|exchanges|alerts|images|all", "/clear <store>".bold().cyan());
    println!("  {} – show / replace / reset the system instruction", "/prompt [set <text>|reset]".bold().cyan());
    println!("  {} – show / replace anomaly thresholds", "/thresholds [set ax ay az gyro]".bold().cyan());
    println!("  {}  – decide every request in an NDJSON file", "/replay <file>".bold().cyan());
    println!("  {}    – exit", "/quit  /exit".bold().cyan());
    println!("  Any other line is decided as a JSON car-data request.");
    println!();
}

fn command_json(command: &Command) -> String {
    serde_json::to_string(command).unwrap_or_else(|_| command.to_string())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}: {}", "Serialization error".red(), e),
    }
}
