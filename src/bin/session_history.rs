//! session_history - inspect and prune stored detection sessions

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::io::IsTerminal;

use headwatch::history::{format_session_duration, format_timestamp, group_sessions_by_period};
use headwatch::storage::SessionRow;
use headwatch::ui::Ui;
use headwatch::{Clock, HeadwatchConfig, SessionStore, SqliteSessionStore, SystemClock};

#[derive(Parser, Debug)]
#[command(name = "session_history", about = "List, show and delete stored detection sessions")]
struct Args {
    /// Session database (defaults to the configured storage.db_path).
    #[arg(long)]
    db_path: Option<String>,
    /// Capture object directory (defaults to the configured storage.object_dir).
    #[arg(long)]
    object_dir: Option<std::path::PathBuf>,
    /// User whose sessions to read (defaults to the configured user_id).
    #[arg(long)]
    user: Option<String>,
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sessions grouped by period, newest first.
    List {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        /// Print rows as JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// One session with its captures.
    Show {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Remove a session, its capture rows and image files.
    Delete { session_id: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = Ui::from_flag(
        &args.ui,
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );
    let cfg = HeadwatchConfig::load()?;
    let db_path = args.db_path.unwrap_or(cfg.storage.db_path);
    let object_dir = args.object_dir.unwrap_or(cfg.storage.object_dir);
    let user = args.user.unwrap_or(cfg.user_id);

    let mut store = {
        let _stage = ui.stage("Open session store");
        SqliteSessionStore::open(&db_path, &object_dir)?
    };

    match args.command {
        Command::List { limit, json } => {
            let rows = {
                let _stage = ui.stage("Load sessions");
                store.list_sessions(&user, limit)?
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
                return Ok(());
            }
            let grouped = group_sessions_by_period(rows, SystemClock::new().epoch_ms());
            if grouped.is_empty() {
                println!("no sessions in the last 30 days for {}", user);
            }
            for (heading, rows) in grouped.sections() {
                println!("{}", heading);
                for row in rows {
                    print_row(row);
                }
                println!();
            }
        }
        Command::Show { session_id, json } => {
            let row = {
                let _stage = ui.stage("Load session");
                store
                    .get_session(&user, &session_id)?
                    .ok_or_else(|| anyhow!("session {} not found for {}", session_id, user))?
            };
            let captures = store.session_captures(&user, &session_id)?;
            if json {
                let doc = serde_json::json!({ "session": row, "captures": captures });
                println!("{}", serde_json::to_string_pretty(&doc)?);
                return Ok(());
            }
            print_row(&row);
            for (direction, count) in row.direction_tally.iter() {
                println!("    {:<5} {}", direction, count);
            }
            for capture in &captures {
                println!(
                    "    {}  {:<5} {:>5.1}%  {}",
                    format_timestamp(capture.captured_at_ms),
                    capture.direction,
                    f64::from(capture.confidence) * 100.0,
                    store.object_path(&capture.object_key).display()
                );
            }
        }
        Command::Delete { session_id } => {
            let deleted = {
                let _stage = ui.stage("Delete session");
                store.delete_session(&user, &session_id)?
            };
            if !deleted {
                return Err(anyhow!("session {} not found for {}", session_id, user));
            }
            println!("deleted session {}", session_id);
        }
    }
    Ok(())
}

fn print_row(row: &SessionRow) {
    println!(
        "  {}  {}  {:>10}  {} captures",
        format_timestamp(row.started_at_ms),
        row.session_id,
        format_session_duration(row.started_at_ms, row.ended_at_ms),
        row.total_captures
    );
}
