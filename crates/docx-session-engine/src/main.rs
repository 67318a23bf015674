use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use docx_session_content::PatchOp;
use docx_session_core::SourceDescriptor;
use docx_session_engine::{EngineConfig, ExternalState, SessionManager};
use docx_session_store::{FileLock, LocalSourceStore, LocalStorage};

/// Maintenance CLI for docx editing sessions.
#[derive(Parser, Debug)]
#[command(name = "docx-sessionctl")]
#[command(about = "Inspect and drive docx editing sessions")]
struct Cli {
    /// Root directory for session persistence.
    #[arg(long, env = "DOCX_SESSIONS_DIR")]
    sessions_dir: Option<PathBuf>,

    /// Tenant to operate on. The stdio deployment uses a single tenant.
    #[arg(long, default_value = "default", env = "DOCX_TENANT")]
    tenant: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a session, optionally backed by a local file.
    Open {
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// List sessions known to the tenant index.
    List,
    /// Show one session's status.
    Status { session_id: String },
    /// Print a window of a session's WAL.
    History {
        session_id: String,
        #[arg(long, default_value_t = 0)]
        from: u64,
        #[arg(long, default_value_t = 50)]
        limit: u64,
    },
    /// Apply a batch of operations from a JSON file (an array of ops).
    Apply {
        session_id: String,
        #[arg(long)]
        ops: PathBuf,
    },
    /// Move the cursor back.
    Undo {
        session_id: String,
        #[arg(long, default_value_t = 1)]
        steps: u64,
    },
    /// Move the cursor forward.
    Redo {
        session_id: String,
        #[arg(long, default_value_t = 1)]
        steps: u64,
    },
    /// Jump to an absolute WAL position.
    Jump { session_id: String, position: u64 },
    /// Compare the session against its source.
    Check { session_id: String },
    /// Adopt external source changes into the history.
    Sync { session_id: String },
    /// Flush and close a session.
    Close { session_id: String },
    /// Delete a closed session's persistent state.
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    if let Some(dir) = cli.sessions_dir {
        config.sessions_dir = dir;
    }
    info!("sessions dir: {}", config.sessions_dir.display());

    let base_dir = config.sessions_dir.clone();
    let manager = SessionManager::new(
        Arc::new(LocalStorage::new(&base_dir)),
        Arc::new(FileLock::new(&base_dir)),
        Arc::new(LocalSourceStore::new()),
        config,
    );
    let tenant = cli.tenant.as_str();

    match cli.command {
        Command::Open { path } => {
            let source = match path {
                Some(path) => Some(SourceDescriptor::local(std::path::absolute(path)?)),
                None => None,
            };
            let session_id = manager.open(tenant, source).await?;
            println!("{session_id}");
        }
        Command::List => {
            let sessions = manager.list_sessions(tenant).await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Command::Status { session_id } => {
            let status = manager.session_status(tenant, &session_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Command::History {
            session_id,
            from,
            limit,
        } => {
            let (entries, has_more) = manager
                .read_history(tenant, &session_id, from, limit)
                .await?;
            for entry in &entries {
                println!("{}", serde_json::to_string(entry)?);
            }
            if has_more {
                eprintln!("... more entries past position {}", from + limit);
            }
        }
        Command::Apply { session_id, ops } => {
            let raw = tokio::fs::read_to_string(&ops).await?;
            let ops: Vec<PatchOp> = serde_json::from_str(&raw)?;
            manager.resume(tenant, &session_id).await?;
            let report = manager.apply_patch(tenant, &session_id, &ops).await?;
            manager.close(tenant, &session_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Undo { session_id, steps } => {
            manager.resume(tenant, &session_id).await?;
            let cursor = manager.undo(tenant, &session_id, steps).await?;
            manager.close(tenant, &session_id).await?;
            println!("cursor: {cursor}");
        }
        Command::Redo { session_id, steps } => {
            manager.resume(tenant, &session_id).await?;
            let cursor = manager.redo(tenant, &session_id, steps).await?;
            manager.close(tenant, &session_id).await?;
            println!("cursor: {cursor}");
        }
        Command::Jump {
            session_id,
            position,
        } => {
            manager.resume(tenant, &session_id).await?;
            let cursor = manager.jump_to(tenant, &session_id, position).await?;
            manager.close(tenant, &session_id).await?;
            println!("cursor: {cursor}");
        }
        Command::Check { session_id } => {
            manager.resume(tenant, &session_id).await?;
            let state = manager.check_external(tenant, &session_id).await?;
            manager.close(tenant, &session_id).await?;
            match state {
                ExternalState::NoSource => println!("no source configured"),
                ExternalState::Clean => println!("clean"),
                ExternalState::Pending(changes) => {
                    println!("{}", serde_json::to_string_pretty(&changes)?)
                }
            }
        }
        Command::Sync { session_id } => {
            manager.resume(tenant, &session_id).await?;
            let report = manager.sync_external(tenant, &session_id).await?;
            manager.close(tenant, &session_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Close { session_id } => {
            manager.resume(tenant, &session_id).await?;
            manager.close(tenant, &session_id).await?;
            println!("closed {session_id}");
        }
        Command::Delete { session_id } => {
            let existed = manager.delete_session(tenant, &session_id).await?;
            println!("deleted {session_id} (existed: {existed})");
        }
    }

    Ok(())
}
