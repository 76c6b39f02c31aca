use anyhow::Context;
use attendanced::clock::{FixedClock, SystemClock};
use attendanced::ipc::{self, AppState};
use attendanced::store::Store;
use attendanced::{config, logging};
use chrono::NaiveDateTime;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Attendance daemon. Reads one JSON request per line on stdin and answers
/// on stdout.
#[derive(Parser, Debug)]
#[command(name = "attendanced", version)]
struct Cli {
    /// Extra TOML file merged after the standard locations.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Database to open at start-up.
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    log_level: Option<String>,

    /// Run on a replay clock starting at this local time (YYYY-MM-DDTHH:MM:SS).
    #[arg(long)]
    fixed_clock: Option<NaiveDateTime>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(db) = cli.db {
        cfg.storage.database_path = Some(db);
    }
    if let Some(level) = cli.log_level {
        cfg.log.level = level;
    }
    config::validate(&cfg).context("invalid configuration")?;
    logging::init(&cfg.log.level);

    let codec = cfg.build_codec()?;
    let notifier = cfg.build_notifier()?;
    let db_path = cfg.storage.database_path.clone();
    let busy_timeout = cfg.busy_timeout();

    let mut state = AppState::new(cfg, Arc::new(SystemClock), codec, notifier);
    if let Some(at) = cli.fixed_clock {
        warn!(%at, "running on a replay clock");
        state = state.with_fixed_clock(Arc::new(FixedClock::new(at)));
    }
    if let Some(path) = db_path {
        let store = Store::open(&path, busy_timeout)
            .with_context(|| format!("opening {}", path.display()))?;
        state.workspace = path.parent().map(PathBuf::from);
        state.store = Some(store);
        info!(db = %path.display(), "database opened");
    }

    serve(&mut state);
    Ok(())
}

fn serve(state: &mut AppState) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No id to answer to.
                let resp = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                let _ = writeln!(stdout, "{}", resp);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    info!("stdin closed; shutting down");
}
