use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Context, Result};
use mercury_bridge::{BridgeConfig, JsBridgeEnvironment, LoopbackHost};
use tracing_subscriber::EnvFilter;

/// Upper bound on host flush rounds before giving up on a script that keeps
/// issuing calls.
const MAX_ROUNDS: usize = 10_000;

fn main() {
    let mut args = std::env::args().skip(1);
    let Some(script_path) = args.next().map(PathBuf::from) else {
        eprintln!("usage: mercury-bridge <script.js> [config.yaml]");
        std::process::exit(2);
    };
    let config_path = args.next().map(PathBuf::from);

    let subscriber_result = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .try_init();
    if subscriber_result.is_err() {
        // tracing was already initialised; continue silently
    }

    let config = match config_path {
        Some(path) => BridgeConfig::load(Some(path)).unwrap_or_else(|err| {
            eprintln!("Failed to load bridge configuration: {err}");
            std::process::exit(2);
        }),
        None => BridgeConfig::discover().unwrap_or_else(|err| {
            eprintln!("Failed to load bridge configuration: {err}. Using defaults.");
            BridgeConfig::default()
        }),
    };

    if let Err(err) = run(&script_path, config) {
        eprintln!("{err:#}");
        std::process::exit(1);
    }
}

fn run(script_path: &Path, config: BridgeConfig) -> Result<()> {
    let source = std::fs::read_to_string(script_path)
        .with_context(|| format!("failed to read {}", script_path.display()))?;

    let host = Rc::new(LoopbackHost::new());
    let environment = JsBridgeEnvironment::new(host.clone(), config)?;
    environment.eval(&source, &script_path.display().to_string())?;

    let mut rounds = 0;
    loop {
        let flushed = host.flush();
        let pumped = environment.pump()?;
        if flushed == 0 && !pumped {
            break;
        }
        rounds += 1;
        if rounds >= MAX_ROUNDS {
            tracing::warn!("stopped after {MAX_ROUNDS} host rounds with work still queued");
            break;
        }
    }

    let pending = environment.pending_invocations();
    if pending > 0 {
        tracing::warn!(pending, "script finished with unanswered host calls");
    }
    Ok(())
}
