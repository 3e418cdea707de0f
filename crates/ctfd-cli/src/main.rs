//! ctfd-converge - declarative CTFd challenge management
//!
//! ## Commands
//!
//! - `plan`: show what `apply` would change, without changing anything
//! - `apply`: converge the remote challenge to the declaration
//! - `import`: record an existing remote challenge as state
//! - `destroy`: delete the recorded challenge
//! - `show`: summarise the recorded state

mod state_file;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ctfd_client::{ClientConfig, HttpGateway};
use ctfd_converge::{
    apply_challenge, bind_identities, cancel_pair, delete_challenge, emit_pass_aborted,
    emit_pass_finished, emit_pass_started, emit_plan_computed, new_pass_id, plan_challenge,
    read_challenge, CancelToken, ChallengeSpec, ChallengeState, Completion, PassSpan,
    ReconcileError, Reconciled,
};
use ctfd_state::{CtfdGateway, RemoteId};
use tracing::{info, warn, Level};

use crate::state_file::StateFile;

#[derive(Parser)]
#[command(name = "ctfd-converge")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Converge CTFd challenges to a JSON declaration", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// CTFd base URL
    #[arg(long, global = true, env = "CTFD_URL")]
    url: Option<String>,

    /// CTFd admin API token
    #[arg(long, global = true, env = "CTFD_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Session cookie, used when no API token is given
    #[arg(long, global = true, env = "CTFD_SESSION", hide_env_values = true)]
    session: Option<String>,

    /// CSRF nonce belonging to the session cookie
    #[arg(long, global = true, env = "CTFD_NONCE", hide_env_values = true)]
    nonce: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the actions `apply` would take
    Plan {
        /// Challenge declaration (JSON)
        #[arg(short, long)]
        declaration: PathBuf,

        /// State file from the previous apply
        #[arg(short, long, default_value = "challenge.state.json")]
        state: PathBuf,

        /// Print the plan as JSON
        #[arg(long)]
        output_json: bool,

        /// Exit 2 instead of 0 when the plan contains changes
        #[arg(long)]
        detailed_exitcode: bool,
    },

    /// Converge the remote challenge to the declaration
    Apply {
        /// Challenge declaration (JSON)
        #[arg(short, long)]
        declaration: PathBuf,

        /// State file, read before and rewritten after the pass
        #[arg(short, long, default_value = "challenge.state.json")]
        state: PathBuf,
    },

    /// Record an existing remote challenge in a new state file
    Import {
        /// Remote challenge id
        id: String,

        /// State file to create
        #[arg(short, long, default_value = "challenge.state.json")]
        state: PathBuf,

        /// Also write a declaration matching the imported challenge
        #[arg(long)]
        declaration_out: Option<PathBuf>,

        /// Overwrite an existing state file
        #[arg(long)]
        force: bool,
    },

    /// Delete the recorded challenge and its state file
    Destroy {
        #[arg(short, long, default_value = "challenge.state.json")]
        state: PathBuf,
    },

    /// Summarise the recorded state
    Show {
        #[arg(short, long, default_value = "challenge.state.json")]
        state: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    ctfd_converge::init_tracing(ctfd_converge::LogFormat::from_json_flag(cli.json), level);

    if let Commands::Show { state } = &cli.command {
        cmd_show(state)?;
        return Ok(ExitCode::SUCCESS);
    }

    let gateway = HttpGateway::new(client_config(&cli)).context("Failed to build CTFd client")?;
    if !gateway.config().has_credentials() {
        warn!("no CTFd credentials configured; set CTFD_API_KEY or CTFD_SESSION/CTFD_NONCE");
    }

    match cli.command {
        Commands::Plan {
            declaration,
            state,
            output_json,
            detailed_exitcode,
        } => {
            let changes = cmd_plan(&gateway, &declaration, &state, output_json).await?;
            Ok(ExitCode::from(plan_exit_status(changes, detailed_exitcode)))
        }
        Commands::Apply { declaration, state } => {
            let (handle, cancel) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted; stopping before the next remote call");
                    handle.cancel();
                }
            });
            let success = cmd_apply(&gateway, &declaration, &state, &cancel).await?;
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Import {
            id,
            state,
            declaration_out,
            force,
        } => {
            cmd_import(&gateway, &id, &state, declaration_out.as_deref(), force).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Destroy { state } => {
            cmd_destroy(&gateway, &state).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Show { .. } => Ok(ExitCode::SUCCESS),
    }
}

/// 0 when converged or not asked for detail, 2 when `apply` would change something.
fn plan_exit_status(changes: bool, detailed: bool) -> u8 {
    if changes && detailed {
        2
    } else {
        0
    }
}

/// Environment first, then explicit flags on top.
fn client_config(cli: &Cli) -> ClientConfig {
    let mut config = ClientConfig::from_env();
    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(key) = &cli.api_key {
        config = config.with_api_key(key);
    }
    if let (Some(session), Some(nonce)) = (&cli.session, &cli.nonce) {
        config = config.with_session(session, nonce);
    }
    config
}

fn load_declaration(path: &Path) -> Result<ChallengeSpec> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read declaration {}", path.display()))?;
    let spec: ChallengeSpec = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse declaration {}", path.display()))?;
    spec.validate()?;
    Ok(spec)
}

/// Declaration with ids bound from the recorded state, if there is one.
fn bound_declaration(path: &Path, recorded: Option<&StateFile>) -> Result<ChallengeSpec> {
    let desired = load_declaration(path)?;
    Ok(match recorded {
        Some(file) => bind_identities(desired, &file.challenge),
        None => desired,
    })
}

/// Show the actions `apply` would take
async fn cmd_plan(
    gw: &dyn CtfdGateway,
    declaration: &Path,
    state_path: &Path,
    output_json: bool,
) -> Result<bool> {
    let recorded = StateFile::load(state_path)?;
    let desired = bound_declaration(declaration, recorded.as_ref())?;

    let pass_id = new_pass_id();
    let _span = PassSpan::enter(&desired.fields.name, &pass_id);
    emit_pass_started(&pass_id, &desired.fields.name, "plan");

    let plan = plan_challenge(gw, &desired, recorded.as_ref().map(|f| &f.challenge))
        .await
        .context("Failed to compute plan")?;
    let summary = plan.summary();
    for kind in &summary.kinds {
        emit_plan_computed(&pass_id, kind.kind.as_str(), &kind.counts);
    }

    if output_json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("challenge {}: {}", desired.fields.name, describe_parent(&plan.parent));
        for kind in &summary.kinds {
            let c = kind.counts;
            println!(
                "{}: {} keep, {} create, {} update, {} delete",
                kind.kind, c.keep, c.create, c.update, c.delete
            );
            for action in kind.actions.iter().filter(|a| a.op != ctfd_converge::Op::Keep) {
                println!("  {action}");
            }
        }
        if plan.is_noop() {
            println!("No changes.");
        }
    }
    Ok(!plan.is_noop())
}

fn describe_parent(parent: &ctfd_converge::ParentAction) -> String {
    use ctfd_converge::ParentAction;
    match parent {
        ParentAction::Create => "create".to_string(),
        ParentAction::Recreate { id } => format!("re-create #{id} (type changed)"),
        ParentAction::Update {
            id,
            fields_changed: true,
        } => format!("update #{id}"),
        ParentAction::Update {
            id,
            fields_changed: false,
        } => format!("unchanged #{id}"),
    }
}

/// Converge the remote challenge; returns whether the pass was clean.
///
/// The state file is rewritten even when the pass had failures, so the next
/// run starts from what actually happened.
async fn cmd_apply(
    gw: &dyn CtfdGateway,
    declaration: &Path,
    state_path: &Path,
    cancel: &CancelToken,
) -> Result<bool> {
    let recorded = StateFile::load(state_path)?;
    let desired = bound_declaration(declaration, recorded.as_ref())?;
    let recorded = recorded.map(|f| f.challenge);

    let mode = match &recorded {
        None => "create",
        Some(rec) if rec.fields.kind != desired.fields.kind => "recreate",
        Some(_) => "update",
    };
    let pass_id = new_pass_id();
    let _span = PassSpan::enter(&desired.fields.name, &pass_id);
    emit_pass_started(&pass_id, &desired.fields.name, mode);
    let started = Instant::now();

    let out = match apply_challenge(gw, &desired, recorded.as_ref(), cancel).await {
        Ok(out) => out,
        Err(err) => {
            emit_pass_aborted(&pass_id, &err);
            // The old challenge is gone; a stale state file would point at it.
            if mode == "recreate" && matches!(err, ReconcileError::ParentCreate(_)) {
                std::fs::remove_file(state_path).ok();
            }
            return Err(err).context("Reconciliation aborted");
        }
    };
    emit_pass_finished(&pass_id, started.elapsed().as_millis() as u64, &out);

    StateFile::new(out.state.clone()).save(state_path)?;
    print_outcome(&out);
    Ok(out.is_success())
}

fn print_outcome(out: &Reconciled<ChallengeState>) {
    for s in &out.summary {
        println!(
            "{}: {} kept, {} created, {} updated, {} deleted, {} failed",
            s.kind, s.kept, s.created, s.updated, s.deleted, s.failed
        );
    }
    for diagnostic in &out.diagnostics {
        eprintln!("{diagnostic}");
    }
    if out.completion == Completion::Cancelled {
        eprintln!("Cancelled; remaining actions were not run.");
    }
    if out.is_success() {
        println!("Challenge #{} is up to date.", out.state.id);
    }
}

/// Record an existing remote challenge in a new state file
async fn cmd_import(
    gw: &dyn CtfdGateway,
    id: &str,
    state_path: &Path,
    declaration_out: Option<&Path>,
    force: bool,
) -> Result<()> {
    if !force && StateFile::load(state_path)?.is_some() {
        bail!(
            "{} already exists; pass --force to overwrite it",
            state_path.display()
        );
    }
    let id = RemoteId::from(id);
    let state = read_challenge(gw, &id)
        .await
        .with_context(|| format!("Failed to read challenge {id}"))?;
    info!(challenge = %state.fields.name, id = %state.id, "imported challenge");

    if let Some(path) = declaration_out {
        let spec = serde_json::to_string_pretty(&state.to_spec())?;
        std::fs::write(path, spec + "\n")
            .with_context(|| format!("Failed to write declaration {}", path.display()))?;
    }
    StateFile::new(state.clone()).save(state_path)?;
    println!("Imported challenge #{} ({})", state.id, state.fields.name);
    Ok(())
}

/// Delete the recorded challenge and its state file
async fn cmd_destroy(gw: &dyn CtfdGateway, state_path: &Path) -> Result<()> {
    let Some(file) = StateFile::load(state_path)? else {
        bail!("no state file at {}; nothing to destroy", state_path.display());
    };
    let pass_id = new_pass_id();
    let _span = PassSpan::enter(&file.challenge.fields.name, &pass_id);
    emit_pass_started(&pass_id, &file.challenge.fields.name, "destroy");

    delete_challenge(gw, &file.challenge.id)
        .await
        .with_context(|| format!("Failed to delete challenge {}", file.challenge.id))?;
    std::fs::remove_file(state_path)
        .with_context(|| format!("Failed to remove {}", state_path.display()))?;
    println!("Deleted challenge #{}", file.challenge.id);
    Ok(())
}

/// Summarise the recorded state
fn cmd_show(state_path: &Path) -> Result<()> {
    let Some(file) = StateFile::load(state_path)? else {
        bail!("no state file at {}", state_path.display());
    };
    let c = &file.challenge;
    println!("challenge #{} {} [{}]", c.id, c.fields.name, c.fields.category);
    println!("  applied at {}", file.applied_at.to_rfc3339());
    println!("  {} files, {} flags, {} hints", c.files.len(), c.flags.len(), c.hints.len());
    for f in &c.files {
        let digest = f.fields.fingerprint();
        println!("    file #{} {} ({})", f.id, f.fields.name, digest.short());
    }
    println!("  tags: {}", c.tags.join(", "));
    println!("  topics: {}", c.topics.join(", "));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctfd_state::fakes::{Entity, MemoryGateway, Verb};
    use serde_json::json;

    fn write_declaration(dir: &Path, flag: &str) -> PathBuf {
        let path = dir.join("challenge.json");
        let spec = json!({
            "name": "warmup",
            "category": "misc",
            "description": "say hi",
            "value": 100,
            "flags": [{ "content": flag }],
            "files": [{ "name": "notes.txt", "content": "hello" }],
            "tags": ["easy"],
        });
        std::fs::write(&path, spec.to_string()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_apply_twice_is_stable() {
        let gw = MemoryGateway::new();
        let dir = tempfile::tempdir().unwrap();
        let decl = write_declaration(dir.path(), "CTF{hi}");
        let state = dir.path().join("state.json");

        assert!(cmd_apply(&gw, &decl, &state, &CancelToken::never())
            .await
            .unwrap());
        let first = StateFile::load(&state).unwrap().unwrap();
        gw.clear_calls();

        assert!(cmd_apply(&gw, &decl, &state, &CancelToken::never())
            .await
            .unwrap());
        let second = StateFile::load(&state).unwrap().unwrap();

        assert_eq!(first.challenge.flags, second.challenge.flags);
        assert_eq!(first.challenge.files, second.challenge.files);
        assert!(gw
            .mutating_calls()
            .iter()
            .all(|c| c.entity == Entity::Tag));
    }

    #[test]
    fn test_plan_exit_status() {
        assert_eq!(plan_exit_status(true, true), 2);
        assert_eq!(plan_exit_status(true, false), 0);
        assert_eq!(plan_exit_status(false, true), 0);
    }

    #[tokio::test]
    async fn test_plan_reports_flag_update() {
        let gw = MemoryGateway::new();
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state.json");
        let decl = write_declaration(dir.path(), "CTF{one}");
        cmd_apply(&gw, &decl, &state, &CancelToken::never())
            .await
            .unwrap();

        let decl = write_declaration(dir.path(), "CTF{two}");
        gw.clear_calls();
        let changes = cmd_plan(&gw, &decl, &state, true).await.unwrap();
        assert!(changes);
        // Planning never writes.
        assert!(gw.mutating_calls().is_empty());
        assert!(gw
            .calls()
            .iter()
            .all(|c| matches!(c.verb, Verb::List | Verb::Get)));
    }

    #[tokio::test]
    async fn test_failed_apply_still_saves_state() {
        let gw = MemoryGateway::new();
        let dir = tempfile::tempdir().unwrap();
        let decl = write_declaration(dir.path(), "CTF{hi}");
        let state = dir.path().join("state.json");

        gw.fail_next(Entity::Flag, Verb::Create);
        let success = cmd_apply(&gw, &decl, &state, &CancelToken::never())
            .await
            .unwrap();

        assert!(!success);
        let saved = StateFile::load(&state).unwrap().unwrap();
        assert!(saved.challenge.flags.is_empty());
        assert_eq!(saved.challenge.files.len(), 1);

        // The next apply fills the gap.
        assert!(cmd_apply(&gw, &decl, &state, &CancelToken::never())
            .await
            .unwrap());
        let saved = StateFile::load(&state).unwrap().unwrap();
        assert_eq!(saved.challenge.flags.len(), 1);
    }

    #[tokio::test]
    async fn test_import_then_destroy() {
        let gw = MemoryGateway::new();
        let dir = tempfile::tempdir().unwrap();
        let decl = write_declaration(dir.path(), "CTF{hi}");
        let applied = dir.path().join("applied.json");
        cmd_apply(&gw, &decl, &applied, &CancelToken::never())
            .await
            .unwrap();
        let id = StateFile::load(&applied).unwrap().unwrap().challenge.id;

        let imported = dir.path().join("imported.json");
        let decl_out = dir.path().join("imported-decl.json");
        cmd_import(&gw, id.as_str(), &imported, Some(&decl_out), false)
            .await
            .unwrap();
        assert_eq!(
            StateFile::load(&imported).unwrap().unwrap().challenge,
            StateFile::load(&applied).unwrap().unwrap().challenge
        );
        assert!(load_declaration(&decl_out).is_ok());

        // Refuses to clobber without --force.
        assert!(cmd_import(&gw, id.as_str(), &imported, None, false)
            .await
            .is_err());

        cmd_destroy(&gw, &imported).await.unwrap();
        assert!(!imported.exists());
        assert_eq!(gw.challenge_count(), 0);
    }

    #[test]
    fn test_show_requires_state() {
        let dir = tempfile::tempdir().unwrap();
        assert!(cmd_show(&dir.path().join("missing.json")).is_err());
    }
}
