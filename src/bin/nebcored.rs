//! nebcore daemon
//!
//! Runs the timed-event loop, loads the configured broker modules and serves
//! NERD subscription channels on a unix socket.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nebcore::broker::events::{NEBTYPE_PROCESS_SHUTDOWN, NEBTYPE_PROCESS_START};
use nebcore::broker::{EventLogger, EventMeta, UnloadFlags, UnloadReason};
use nebcore::{
    DaemonConfig, EventBroker, EventKind, EventList, Module, ModuleRegistry, NebError, NebResult, NerdModule, NerdServer,
    TimedEvent,
};

/// Longest the main loop sleeps between polls.
const MAX_IDLE: Duration = Duration::from_millis(100);

/// Seconds between heartbeat log lines.
const HEARTBEAT_SECS: u64 = 60;

/// Upper bound for `--run-for` (ten years).
const MAX_RUN_FOR_SECS: u64 = 315_360_000;

#[derive(Default)]
struct Args {
    config: Option<PathBuf>,
    socket: Option<PathBuf>,
    run_for: Option<u64>,
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut out = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    out.config = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --config requires a value");
                    std::process::exit(1);
                }
            }
            "--socket" | "-s" => {
                if i + 1 < args.len() {
                    out.socket = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --socket requires a value");
                    std::process::exit(1);
                }
            }
            "--run-for" => {
                if i + 1 < args.len() {
                    let secs: u64 = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("error: invalid number of seconds: {}", args[i + 1]);
                        std::process::exit(1);
                    });
                    out.run_for = Some(secs);
                    i += 2;
                } else {
                    eprintln!("error: --run-for requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("nebcored - nebcore event broker daemon");
                println!();
                println!("USAGE:");
                println!("    nebcored [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -c, --config <FILE>       JSON config file [default: built-in defaults]");
                println!("    -s, --socket <PATH>       NERD socket path [default: /tmp/nerd.sock]");
                println!("        --run-for <SECS>      Shut down after SECS seconds");
                println!("    -h, --help                Print help information");
                println!();
                println!("ENVIRONMENT:");
                println!("    RUST_LOG                  Log filter [default: info]");
                println!("    NEBCORE_LOG_JSON          Set to 1 for JSON log lines");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    out
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let use_json = std::env::var("NEBCORE_LOG_JSON")
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if use_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_thread_names(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_thread_names(true).compact())
            .init();
    }
}

fn install_signal_handlers(shutdown: &Arc<AtomicBool>) -> std::io::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    signal_hook::flag::register(SIGINT, Arc::clone(shutdown))?;
    signal_hook::flag::register(SIGTERM, Arc::clone(shutdown))?;
    Ok(())
}

fn builtin_module(name: &str) -> Option<Arc<dyn Module>> {
    match name {
        "logger" => Some(Arc::new(EventLogger)),
        _ => None,
    }
}

fn run(cfg: DaemonConfig, run_for: Option<u64>, shutdown: &AtomicBool) -> NebResult<()> {
    let broker = Arc::new(EventBroker::new(cfg.event_broker_options));
    let mut modules = ModuleRegistry::new(Arc::clone(&broker));

    let nerd = if cfg.nerd.enabled {
        let module = Arc::new(NerdModule::new(cfg.nerd.max_subscribers));
        modules.add_module("nerd", None, Arc::clone(&module) as Arc<dyn Module>);
        Some(module)
    } else {
        None
    };

    for spec in &cfg.modules {
        match builtin_module(&spec.name) {
            Some(module) => {
                modules.add_module(spec.name.clone(), spec.args.clone(), module);
            }
            None => warn!(module = %spec.name, "unknown module, skipped"),
        }
    }

    let failed = modules.load_all();
    if failed > 0 {
        warn!(failed, "some modules failed to load");
    }

    let channels = nerd.as_ref().and_then(|m| m.registry());
    let mut server = match &channels {
        Some(_) => Some(NerdServer::bind(&cfg.nerd)?),
        None => None,
    };

    let mut events = EventList::new(Arc::clone(&broker), cfg.scheduler.horizon)?;
    let start = Utc::now();
    events.schedule(TimedEvent::every(EventKind::StatusSave, "heartbeat", HEARTBEAT_SECS, start))?;
    if let Some(secs) = run_for {
        let secs = i64::try_from(secs.min(MAX_RUN_FOR_SECS)).unwrap_or(0);
        let at = start + chrono::Duration::seconds(secs);
        events.schedule(TimedEvent::once(EventKind::ProgramShutdown, "run-for", at))?;
    }

    broker.program_state(EventMeta::new(NEBTYPE_PROCESS_START))?;
    info!(version = env!("CARGO_PKG_VERSION"), "nebcored started");

    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("shutdown signal received");
            break;
        }
        if let (Some(server), Some(channels)) = (&server, &channels) {
            server.poll(channels);
        }

        let now = Utc::now();
        let mut stop = false;
        events.run_due(now, |event| match event.kind {
            EventKind::ProgramShutdown => stop = true,
            EventKind::StatusSave => info!(
                interval_secs = event.interval,
                uptime_secs = (now - start).num_seconds(),
                "heartbeat"
            ),
            other => info!(kind = ?other, label = %event.label, "timed event"),
        })?;
        if stop {
            break;
        }

        let idle = events
            .next_run_time()
            .and_then(|next| (next - Utc::now()).to_std().ok())
            .map_or(MAX_IDLE, |d| d.min(MAX_IDLE));
        thread::sleep(idle);
    }

    info!("nebcored shutting down");
    broker.program_state(EventMeta::new(NEBTYPE_PROCESS_SHUTDOWN))?;
    if let Some(server) = server.as_mut() {
        if server.dropped_messages() > 0 {
            warn!(dropped = server.dropped_messages(), "nerd control messages dropped");
        }
        server.shutdown();
    }
    let refused = modules.unload_all(UnloadFlags::Force, UnloadReason::NebShutdown);
    if refused > 0 {
        return Err(NebError::internal(format!("{refused} modules failed to unload")));
    }
    Ok(())
}

fn main() {
    let args = parse_args();
    init_tracing();

    let mut cfg = match &args.config {
        Some(path) => match DaemonConfig::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(path = %path.display(), error = %err, "failed to load config");
                std::process::exit(1);
            }
        },
        None => DaemonConfig::default(),
    };
    if let Some(socket) = args.socket {
        cfg.nerd.socket_path = socket;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(err) = install_signal_handlers(&shutdown) {
        error!(error = %err, "failed to install signal handlers");
        std::process::exit(1);
    }

    if let Err(err) = run(cfg, args.run_for, &shutdown) {
        error!(error = %err, "nebcored failed");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shutdown_flag_stops_loop_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DaemonConfig::default();
        cfg.nerd.socket_path = dir.path().join("nerd.sock");

        let shutdown = AtomicBool::new(true);
        run(cfg.clone(), None, &shutdown).unwrap();
        assert!(!cfg.nerd.socket_path.exists());
    }

    #[test]
    fn test_run_for_still_stops_without_a_signal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = DaemonConfig::default();
        cfg.nerd.enabled = false;
        cfg.nerd.socket_path = dir.path().join("nerd.sock");

        run(cfg, Some(0), &AtomicBool::new(false)).unwrap();
    }
}
