pub mod config;
pub mod errors;
pub mod events;
pub mod host_profile;
pub mod log_retention;
pub mod logging;
pub mod manager;
pub mod placement;
pub mod process_table;
pub mod remux;
pub mod runtime;
pub mod session_identity;
pub mod session_store;
pub mod timefmt;
pub mod transcode_pool;
pub mod types;

use clap::{error::ErrorKind, ArgGroup, Parser, Subcommand, ValueEnum};
use config::{load_config, AppConfig, CliOverrides};
use errors::ReplayError;
use events::{parse_event_line, HostEvent};
use logging::{append_run_log, init_run_logger, structured_fallback_line};
use manager::{EventOutcome, RemuxTarget, ReplayManager};
use runtime::{ProductionRuntime, Terminal};
use serde_json::json;
use session_store::SessionStore;
use std::path::{Path, PathBuf};
use transcode_pool::DispatchHandle;

#[derive(Debug, Clone, Parser)]
#[command(name = "replay-manager")]
#[command(about = "Moves, sorts and remuxes replay-buffer recordings")]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Handle one replay-buffer lifecycle event.
    Event {
        #[arg(value_enum)]
        kind: EventKind,
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        scene: Option<String>,
    },
    /// Read JSON events from stdin, one per line, until end of input.
    Listen,
    /// Place a file as if it were a freshly saved replay.
    Place {
        file: PathBuf,
        #[arg(long)]
        scene: Option<String>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Remux one file or every mp4/mkv in a directory.
    #[command(group(ArgGroup::new("input").required(true).args(["file", "batch"])))]
    Remux {
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        batch: Option<PathBuf>,
    },
    /// Print the open session, if any.
    Session,
    /// Print the effective configuration.
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventKind {
    Started,
    Saved,
    Stopped,
}

impl EventKind {
    fn into_event(self, path: Option<PathBuf>, scene: Option<String>) -> HostEvent {
        match self {
            Self::Started => HostEvent::BufferStarted,
            Self::Saved => HostEvent::BufferSaved { path, scene },
            Self::Stopped => HostEvent::BufferStopped,
        }
    }
}

pub fn run() -> Result<i32, ReplayError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let cwd = std::env::current_dir().map_err(|e| ReplayError::Io(e.to_string()))?;
    let runtime = ProductionRuntime::new();
    run_with_runtime(&args, &cwd, &runtime)
}

pub fn run_with_runtime(
    args: &[std::ffi::OsString],
    cwd: &Path,
    runtime: &ProductionRuntime,
) -> Result<i32, ReplayError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                print!("{error}");
                return Ok(0);
            }
            _ => return Err(ReplayError::Cli(error.to_string())),
        },
    };

    let overrides = CliOverrides {
        config_path: cli.config.clone(),
        state_dir: cli.state_dir.clone(),
    };
    let cfg = load_config(&overrides, cwd, runtime.file_system.as_ref())?;
    init_run_logger(
        cfg.state_dir().join("logs").join("run.jsonl"),
        cfg.state.log_budget_bytes,
    );
    append_run_log(
        "info",
        "run.started",
        json!({
            "command": format!("{:?}", cli.command),
            "output_dir": cfg.output.dir.as_ref().map(|p| p.display().to_string()),
        }),
    );

    if matches!(cli.command, Command::Config) {
        let rendered =
            toml::to_string_pretty(&cfg).map_err(|e| ReplayError::ConfigParse(e.to_string()))?;
        for line in rendered.lines() {
            runtime.terminal.write_line(line)?;
        }
        return Ok(0);
    }

    let mut manager = open_manager(cfg, runtime)?;
    let terminal = runtime.terminal.as_ref();
    match cli.command {
        Command::Event { kind, path, scene } => {
            let event = kind.into_event(path, scene);
            let name = event.name().to_string();
            let outcome = manager.handle(event)?;
            report_outcome(terminal, &name, &outcome)?;
            if let Some(handle) = outcome.dispatch {
                let summary = handle.wait()?;
                report(
                    terminal,
                    &summary.label,
                    "transcoded",
                    &format!("succeeded={} failed={}", summary.succeeded, summary.failed),
                )?;
            }
            Ok(0)
        }
        Command::Listen => listen(&mut manager, terminal),
        Command::Place {
            file,
            scene,
            dry_run,
        } => {
            let file = absolutize(cwd, &file);
            let destination = manager.place_file(&file, scene.as_deref(), dry_run)?;
            let state = if dry_run { "planned" } else { "moved" };
            report(terminal, "place", state, &destination.display().to_string())?;
            Ok(0)
        }
        Command::Remux { file, batch } => {
            let target = match (&file, &batch) {
                (Some(file), _) => RemuxTarget::File(file),
                (None, Some(dir)) => RemuxTarget::Batch(dir),
                (None, None) => {
                    return Err(ReplayError::Cli(
                        "remux needs --file or --batch".to_string(),
                    ))
                }
            };
            let summary = manager.manual_remux(target)?.wait()?;
            report(
                terminal,
                "remux",
                "finished",
                &format!("succeeded={} failed={}", summary.succeeded, summary.failed),
            )?;
            Ok(if summary.failed == 0 { 0 } else { 1 })
        }
        Command::Session => {
            match manager.store().current_session()? {
                Some(session) => {
                    let rendered = serde_json::to_string_pretty(&session)
                        .map_err(|e| ReplayError::Io(e.to_string()))?;
                    for line in rendered.lines() {
                        terminal.write_line(line)?;
                    }
                }
                None => terminal.write_line("no open session")?,
            }
            Ok(0)
        }
        Command::Config => Ok(0),
    }
}

fn open_manager(cfg: AppConfig, runtime: &ProductionRuntime) -> Result<ReplayManager, ReplayError> {
    let store = SessionStore::open(cfg.state_dir().join("sessions.sqlite"))?;
    Ok(ReplayManager::new(cfg, runtime, store))
}

fn listen(manager: &mut ReplayManager, terminal: &dyn Terminal) -> Result<i32, ReplayError> {
    let mut pending: Vec<DispatchHandle> = Vec::new();
    let mut line_no = 0usize;
    while let Some(line) = terminal.read_line()? {
        line_no += 1;
        reap_finished(&mut pending, terminal)?;
        if line.trim().is_empty() {
            continue;
        }
        let event = match parse_event_line(&line) {
            Ok(event) => event,
            Err(err) => {
                append_run_log(
                    "warn",
                    "listen.line.rejected",
                    json!({ "line": line_no, "error": err.to_string() }),
                );
                report(terminal, "listen", "rejected", &format!("line {line_no}: {err}"))?;
                continue;
            }
        };
        let name = event.name().to_string();
        match manager.handle(event) {
            Ok(mut outcome) => {
                if let Some(handle) = outcome.dispatch.take() {
                    pending.push(handle);
                }
                report_outcome(terminal, &name, &outcome)?;
            }
            Err(err) => {
                append_run_log(
                    "error",
                    "listen.event.failed",
                    json!({ "line": line_no, "event": name, "error": err.to_string() }),
                );
                report(terminal, &name, "failed", &err.to_string())?;
            }
        }
    }

    append_run_log(
        "info",
        "listen.input.closed",
        json!({ "lines": line_no, "pending_dispatches": pending.len() }),
    );
    for handle in pending {
        report_dispatch(terminal, handle)?;
    }
    Ok(0)
}

fn reap_finished(
    pending: &mut Vec<DispatchHandle>,
    terminal: &dyn Terminal,
) -> Result<(), ReplayError> {
    let (finished, running): (Vec<_>, Vec<_>) =
        pending.drain(..).partition(DispatchHandle::is_finished);
    *pending = running;
    for handle in finished {
        report_dispatch(terminal, handle)?;
    }
    Ok(())
}

fn report_dispatch(terminal: &dyn Terminal, handle: DispatchHandle) -> Result<(), ReplayError> {
    let label = handle.label().to_string();
    match handle.wait() {
        Ok(summary) => report(
            terminal,
            &summary.label,
            "transcoded",
            &format!("succeeded={} failed={}", summary.succeeded, summary.failed),
        ),
        Err(err) => report(terminal, &label, "failed", &err.to_string()),
    }
}

fn report_outcome(
    terminal: &dyn Terminal,
    name: &str,
    outcome: &EventOutcome,
) -> Result<(), ReplayError> {
    let mut parts = Vec::new();
    if let Some(id) = &outcome.session_id {
        parts.push(format!("session={id}"));
    }
    if let Some(placed) = &outcome.placed {
        parts.push(format!("placed={}", placed.display()));
    }
    if let Some(persistent) = &outcome.persistent {
        parts.push(format!("persistent={}", persistent.display()));
    }
    report(terminal, name, "handled", &parts.join(" "))
}

fn report(
    terminal: &dyn Terminal,
    component: &str,
    state: &str,
    message: &str,
) -> Result<(), ReplayError> {
    if terminal.stdin_is_tty() {
        terminal.write_line(&format!("{component}: {state} {message}"))
    } else {
        terminal.write_line(&structured_fallback_line(component, state, message))
    }
}

fn absolutize(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
