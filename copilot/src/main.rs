//! Data-analysis copilot CLI.
//!
//! Sessions live under `--storage` (default `./storage`), one directory per
//! session id. `copilot run` streams progress events to stdout as JSON lines
//! and exits with a code reflecting how the run ended.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;

use copilot::chat::handle_message;
use copilot::core::types::LoopState;
use copilot::cotas::{LoopConfig, RunOutcome, RunRequest};
use copilot::exit_codes;
use copilot::io::config::{CopilotConfig, load_config};
use copilot::io::context::read_context;
use copilot::io::lookup::lookup_from_config;
use copilot::io::oracle::CommandOracle;
use copilot::io::sandbox::sandbox_from_config;
use copilot::io::session::{SessionPaths, create_session};
use copilot::io::step_log::load_step_log;
use copilot::logging;
use copilot::stream::{Collaborators, spawn_run};

#[derive(Parser)]
#[command(
    name = "copilot",
    version,
    about = "Data-analysis copilot driven by the CoTAS loop"
)]
struct Cli {
    /// Storage root holding `config.toml` and one directory per session.
    #[arg(long, global = true, default_value = "storage")]
    storage: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage sessions.
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
    /// Run the analysis loop for a goal, streaming progress as JSON lines.
    Run {
        #[arg(long)]
        session: String,
        /// Analytical goal. Optional with `--resume`, which uses the stored goal.
        #[arg(long, required_unless_present = "resume")]
        goal: Option<String>,
        /// Override the configured iteration bound.
        #[arg(long)]
        max_loops: Option<u32>,
        /// Continue an interrupted run instead of starting over.
        #[arg(long)]
        resume: bool,
    },
    /// Send a chat message; durable facts are added to the session context.
    Chat {
        #[arg(long)]
        session: String,
        #[arg(long)]
        message: String,
    },
    /// Print the session's step log.
    Log {
        #[arg(long)]
        session: String,
    },
    /// Print the session's context document.
    Context {
        #[arg(long)]
        session: String,
    },
}

#[derive(Subcommand)]
enum SessionCommand {
    /// Create a new session and print its id.
    New,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let storage = cli.storage.as_path();
    match cli.command {
        Command::Session {
            command: SessionCommand::New,
        } => cmd_session_new(storage),
        Command::Run {
            session,
            goal,
            max_loops,
            resume,
        } => cmd_run(storage, &session, goal, max_loops, resume),
        Command::Chat { session, message } => cmd_chat(storage, &session, &message),
        Command::Log { session } => cmd_log(storage, &session),
        Command::Context { session } => cmd_context(storage, &session),
    }
}

fn load_storage_config(storage: &Path) -> Result<CopilotConfig> {
    load_config(&storage.join("config.toml"))
}

fn cmd_session_new(storage: &Path) -> Result<i32> {
    let paths = create_session(storage)?;
    println!("{}", paths.session_id);
    Ok(exit_codes::OK)
}

fn cmd_run(
    storage: &Path,
    session: &str,
    goal: Option<String>,
    max_loops: Option<u32>,
    resume: bool,
) -> Result<i32> {
    let paths = SessionPaths::open(storage, session)?;
    let mut cfg = load_storage_config(storage)?;
    if let Some(max_loops) = max_loops {
        cfg.max_loops = max_loops;
        cfg.validate()?;
    }

    let collaborators = Collaborators {
        oracle: Box::new(CommandOracle::from_config(&cfg.oracle)),
        sandbox: sandbox_from_config(&cfg.sandbox),
        lookup: lookup_from_config(&cfg.search, &paths)?,
    };
    let request = RunRequest {
        goal: goal.unwrap_or_default(),
        resume,
    };
    let (mut events, worker) = spawn_run(
        paths,
        collaborators,
        LoopConfig::from_config(&cfg),
        request,
        cfg.event_buffer,
    )?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    while let Some(event) = events.blocking_recv() {
        let line = serde_json::to_string(&event).context("serialize event")?;
        if writeln!(out, "{line}").and_then(|()| out.flush()).is_err() {
            // Reader went away; dropping the receiver stops the loop.
            break;
        }
    }
    drop(events);

    let outcome = worker.join()?;
    Ok(exit_code_for(&outcome))
}

fn exit_code_for(outcome: &RunOutcome) -> i32 {
    match outcome.state {
        LoopState::Done => exit_codes::OK,
        LoopState::Error => exit_codes::ERROR,
        LoopState::Exhausted => exit_codes::EXHAUSTED,
        LoopState::Running => exit_codes::INVALID,
    }
}

fn cmd_chat(storage: &Path, session: &str, message: &str) -> Result<i32> {
    let paths = SessionPaths::open(storage, session)?;
    let cfg = load_storage_config(storage)?;
    let oracle = CommandOracle::from_config(&cfg.oracle);
    let reply = handle_message(&paths, &oracle, message)?;
    print_json(&reply)?;
    Ok(exit_codes::OK)
}

fn cmd_log(storage: &Path, session: &str) -> Result<i32> {
    let paths = SessionPaths::open(storage, session)?;
    let log = load_step_log(&paths.step_log_path)?
        .ok_or_else(|| anyhow!("session '{session}' has no step log yet"))?;
    print_json(&log)?;
    Ok(exit_codes::OK)
}

fn cmd_context(storage: &Path, session: &str) -> Result<i32> {
    let paths = SessionPaths::open(storage, session)?;
    print_json(&read_context(&paths.context_path))?;
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{payload}");
    Ok(())
}
