//! agenda: a line-oriented task list.
//!
//! Drives the sync engine against an in-process store, printing the list as
//! it changes. Commands are read from stdin (`help` lists them); logs go to
//! stderr so stdout stays readable.
//!
//! Usage:
//!   cargo run -p agenda-cli -- --user alice
//!
//!   # Slow writes make the optimistic rows visible
//!   cargo run -p agenda-cli -- --user alice --latency-ms 1500
//!
//!   RUST_LOG=agenda_client=debug cargo run -p agenda-cli -- --user alice

mod commands;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{EnvFilter, fmt};

use agenda_client::{
    ClientConfig, ListEvent, LocalIdentity, MemoryStore, SyncHandle, Todo, TodoId, apply_ops,
    spawn_sync,
};
use agenda_types::now_millis;

use commands::{Command, HELP};

#[derive(Parser, Debug)]
#[command(name = "agenda")]
#[command(about = "Optimistically synced task list")]
struct Args {
    /// Sign in as this user at startup
    #[arg(short, long)]
    user: Option<String>,

    /// Config file (default: <config dir>/agenda/client.ron)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Artificial latency for every store write, in milliseconds
    #[arg(long, default_value_t = 0)]
    latency_ms: u64,
}

type Rendered = Arc<Mutex<Vec<Todo>>>;

fn format_row(n: usize, todo: &Todo, now: u64) -> String {
    let check = if todo.completed { 'x' } else { ' ' };
    let mut line = format!("{n:>3}. [{check}] {}", todo.text);
    if let Some(due) = todo.due_at {
        if due <= now {
            line.push_str("  (overdue)");
        } else {
            line.push_str(&format!("  (due in {}m)", (due - now).div_ceil(60_000)));
        }
    }
    if todo.is_pending() {
        line.push_str("  …saving");
    }
    line
}

fn print_list(rows: &[Todo]) {
    if rows.is_empty() {
        println!("no tasks");
        return;
    }
    let now = now_millis();
    for (i, todo) in rows.iter().enumerate() {
        println!("{}", format_row(i + 1, todo, now));
    }
}

/// Applies diffs to the rendered copy and reports events on stdout.
///
/// Starts from a full view and skips diffs that view already contains, so
/// subscribing after the actor started loses nothing.
async fn present(handle: SyncHandle, rendered: Rendered) {
    let mut events = handle.subscribe_events();
    let mut version = resync(&handle, &rendered).await;
    loop {
        match events.recv().await {
            Ok(ListEvent::Diff { version: v, .. }) if v <= version => {}
            Ok(ListEvent::Diff { version: v, ops }) => {
                version = v;
                let applied = apply_ops(&mut rendered.lock(), &ops);
                if let Err(e) = applied {
                    tracing::warn!(version, error = %e, "diff did not apply, resyncing");
                    version = resync(&handle, &rendered).await;
                }
                print_list(&rendered.lock());
            }
            Ok(ListEvent::Synced { count: 0 }) => println!("no tasks"),
            Ok(ListEvent::Synced { count }) => tracing::debug!(count, "synced"),
            Ok(ListEvent::Status(state)) => println!("[{state}]"),
            Ok(ListEvent::SyncError(e)) => println!("! {e}"),
            Ok(ListEvent::MutationFailed { kind, message }) => println!("! {kind} failed: {message}"),
            Ok(ListEvent::MutationApplied { kind }) => tracing::debug!(%kind, "write acknowledged"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "presenter lagged, resyncing");
                version = resync(&handle, &rendered).await;
                print_list(&rendered.lock());
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Replace the rendered copy with the actor's view; returns its version.
async fn resync(handle: &SyncHandle, rendered: &Rendered) -> u64 {
    match handle.items().await {
        Ok(view) => {
            *rendered.lock() = view.todos;
            view.version
        }
        Err(e) => {
            tracing::warn!(error = %e, "resync failed");
            0
        }
    }
}

/// Absolute deadline `minutes` from `now`.
fn deadline(now: u64, minutes: u64) -> Result<u64> {
    minutes
        .checked_mul(60_000)
        .and_then(|ms| now.checked_add(ms))
        .ok_or_else(|| anyhow::anyhow!("{minutes} minutes is too far in the future"))
}

fn row_id(rendered: &Rendered, row: usize) -> Option<TodoId> {
    rendered.lock().get(row - 1).map(|todo| todo.id.clone())
}

/// Returns false when the session should end. The list itself is printed by
/// the presenter as diffs arrive.
async fn execute(
    command: Command,
    handle: &SyncHandle,
    identity: &LocalIdentity,
    store: &MemoryStore,
    rendered: &Rendered,
) -> bool {
    let row_of = |row: usize| {
        let id = row_id(rendered, row);
        if id.is_none() {
            println!("! no row {row}");
        }
        id
    };

    let result = match command {
        Command::Add(text) => handle.create(&text, None).await.map(|_| ()),
        Command::Done { row, completed } => match row_of(row) {
            Some(id) => handle.set_completed(&id, completed).await,
            None => return true,
        },
        Command::Rename { row, text } => match row_of(row) {
            Some(id) => handle.rename(&id, &text).await,
            None => return true,
        },
        Command::Due { row, minutes } => match row_of(row) {
            Some(id) => {
                let due = match minutes.map(|m| deadline(now_millis(), m)).transpose() {
                    Ok(due) => due,
                    Err(e) => {
                        println!("! {e}");
                        return true;
                    }
                };
                handle.set_due(&id, due).await
            }
            None => return true,
        },
        Command::Remove(row) => match row_of(row) {
            Some(id) => handle.delete(&id).await,
            None => return true,
        },
        Command::Login(user) => {
            identity.sign_in(user.as_str());
            Ok(())
        }
        Command::Logout => {
            identity.sign_out();
            Ok(())
        }
        Command::List => {
            print_list(&rendered.lock());
            Ok(())
        }
        Command::Fail => {
            store.fail_next_write("injected failure");
            println!("next write will fail");
            Ok(())
        }
        Command::Help => {
            println!("{HELP}");
            Ok(())
        }
        Command::Quit => return false,
    };

    if let Err(e) = result {
        println!("! {e}");
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => ClientConfig::load(path),
        None => ClientConfig::load_default(),
    }
    .context("loading client config")?;

    // Logs to stderr; stdout is the list.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let store = MemoryStore::new();
    store.set_latency(Duration::from_millis(args.latency_ms));
    let identity = LocalIdentity::new(args.user.map(Into::into));

    let handle = spawn_sync(Arc::new(store.clone()), &identity, &config);
    let rendered: Rendered = Arc::default();
    let presenter = tokio::spawn(present(handle.clone(), rendered.clone()));

    tracing::info!(collection = %config.collection, "agenda ready");
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        match commands::parse(&line) {
            Ok(command) => {
                if !execute(command, &handle, &identity, &store, &rendered).await {
                    break;
                }
            }
            Err(e) => println!("! {e:#}"),
        }
    }

    handle.shutdown().await;
    presenter.abort();
    tracing::info!("agenda shutting down");
    Ok(())
}
