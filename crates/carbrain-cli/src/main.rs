//! `carbrain-cli` – Car Brain Command Line Interface
//!
//! This binary is the operator's entry point to the decision engine.  It:
//!
//! 1. Checks for `~/.carbrain/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Probes the configured chat-completions provider, or announces DEMO mode
//!    when no API key is set.
//! 3. Drops the user into an **interactive REPL** that decides pasted car-data
//!    requests and inspects the engine's stores (`/history`, `/stats`, …).
//! 4. Intercepts **Ctrl-C** to stop a running replay and exit cleanly.

mod config;
mod provider;
mod repl;
mod wire;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use carbrain_memory::DirectoryImageStore;
use carbrain_runtime::{CompletionProvider, DecisionEngine, LlmDriver};
use colored::Colorize;
use tracing::{info, warn};

fn main() {
    // RUST_LOG selects the level, CARBRAIN_LOG_FORMAT=json switches to
    // newline-delimited JSON, OTEL_EXPORTER_OTLP_ENDPOINT enables span export.
    let _tracing = carbrain_runtime::init_tracing("carbrain");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Provider discovery ────────────────────────────────────────────────
    let provider: Option<Arc<dyn CompletionProvider>> = if cfg.has_provider() {
        probe_provider(&cfg);
        Some(Arc::new(LlmDriver::new(
            cfg.api_base_url.clone(),
            cfg.api_key.clone(),
        )))
    } else {
        println!(
            "\n  {}  No API key configured; decisions come from the built-in heuristic.",
            "DEMO mode".yellow().bold()
        );
        None
    };

    let mut engine = DecisionEngine::new(cfg.engine_config(), provider);
    if let Some(dir) = &cfg.image_dir {
        match DirectoryImageStore::open(dir) {
            Ok(store) => {
                info!(dir = %dir.display(), "persisting camera frames");
                engine = engine.with_image_store(Arc::new(store));
            }
            Err(e) => warn!(dir = %dir.display(), error = %e, "image directory unavailable; frames will not be persisted"),
        }
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            std::process::exit(1);
        }
    };

    println!();
    println!(
        "  Paste a JSON car-data request to decide it. Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    repl::Shell::new(Arc::new(engine), runtime, shutdown).run();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Car Brain First-Run Wizard      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up the decision engine.\n");

    let mut cfg = config::Config::default();

    cfg.api_base_url = prompt_line(
        &format!("  Chat-completions base URL [{}]: ", cfg.api_base_url),
        &cfg.api_base_url,
    );
    cfg.api_key = prompt_line("  API key (leave blank for DEMO mode): ", "");
    cfg.model = prompt_line(&format!("  Model [{}]: ", cfg.model), &cfg.model);

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Provider probe
// ─────────────────────────────────────────────────────────────────────────────

fn probe_provider(cfg: &config::Config) {
    print!("\n  Probing provider at {} … ", cfg.api_base_url.dimmed());
    match provider::fetch_models(&cfg.api_base_url, &cfg.api_key) {
        Ok(models) => {
            println!("{} ({} model(s) available)", "online".green(), models.len());
            if !models.is_empty() && !provider::lists_model(&models, &cfg.model) {
                println!(
                    "  {} model {} is not in the provider's listing.",
                    "Warning:".yellow(),
                    cfg.model.bold()
                );
            }
        }
        Err(e) => {
            println!("{}", "unreachable".yellow());
            println!(
                "  {}  Decisions will fall back to the heuristic until it answers.",
                e.to_string().dimmed()
            );
        }
    }
    println!("  Model: {}", cfg.model.bold());
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ______              ____             _     "#.bold().cyan());
    println!("{}", r#"   / ____/___ ______   / __ )_________ _(_)___ "#.bold().cyan());
    println!("{}", r#"  / /   / __ `/ ___/  / __  / ___/ __ `/ / __ \"#.bold().cyan());
    println!("{}", r#" / /___/ /_/ / /     / /_/ / /  / /_/ / / / / /"#.bold().cyan());
    println!("{}", r#" \____/\__,_/_/     /_____/_/   \__,_/_/_/ /_/ "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Car Brain".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Sensor-to-command decision engine");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
