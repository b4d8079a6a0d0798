use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::Value;
use snapclean_contracts::chat::{parse_intent, CHAT_HELP_COMMANDS};
use snapclean_contracts::events::EventWriter;
use snapclean_contracts::session::{Instruction, PRESET_INSTRUCTIONS, PROCESSING_MESSAGE};
use snapclean_engine::{
    resolve_editor, DownloadOutcome, EditOutcome, EditSession, SelectOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "snapclean", version, about = "SnapClean product photo editor")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Chat(ChatArgs),
    Edit(EditArgs),
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Directory where downloads and the event log land.
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    editor: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Parser)]
struct EditArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, default_value = "gemini")]
    editor: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    request_timeout_secs: Option<u64>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("snapclean error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Chat(args) => {
            run_chat(args)?;
            Ok(0)
        }
        Command::Edit(args) => run_edit_once(args),
    }
}

fn build_session(
    out: &PathBuf,
    events: Option<PathBuf>,
    editor: &str,
    model: Option<&str>,
    request_timeout_secs: Option<u64>,
) -> Result<EditSession> {
    let events_path = events.unwrap_or_else(|| out.join("events.jsonl"));
    let transport = resolve_editor(
        editor,
        model,
        request_timeout_secs.map(Duration::from_secs),
    )?;
    EditSession::new(transport, EventWriter::new(&events_path, session_id()))
}

fn run_chat(args: ChatArgs) -> Result<()> {
    let mut session = build_session(
        &args.out,
        args.events.clone(),
        &args.editor,
        args.model.as_deref(),
        args.request_timeout_secs,
    )?;

    let stdin = io::stdin();
    let mut line = String::new();

    println!(
        "SnapClean chat started ({} editor). Type /help for commands.",
        session.editor_name()
    );

    loop {
        print!("> ");
        io::stdout().flush()?;

        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }

        let input = line.trim_end_matches(['\n', '\r']);
        let intent = parse_intent(input);
        if intent.action == "noop" {
            continue;
        }

        match intent.action.as_str() {
            "help" => {
                println!("Commands: {}", CHAT_HELP_COMMANDS.join(" "));
                println!("Anything else is sent as an edit instruction.");
            }
            "quit" => break,
            "select_image" => {
                let Some(path_text) =
                    value_as_non_empty_string(intent.command_args.get("path"))
                else {
                    println!("/upload requires a path");
                    continue;
                };
                let path = PathBuf::from(path_text);
                match session.select_image(&path) {
                    Ok(SelectOutcome::Selected) => {
                        println!("Source image set to {}", path.display());
                    }
                    Ok(SelectOutcome::Rejected(reason)) => println!("{}", reason.user_message()),
                    Err(err) => println!("Upload failed: {err:#}"),
                }
            }
            "list_presets" => {
                println!("Quick actions:");
                for (idx, preset) in PRESET_INSTRUCTIONS.iter().enumerate() {
                    println!("  {}. {preset}", idx + 1);
                }
                println!("Run one with /preset <number>.");
            }
            "run_preset" => {
                let Some(index_text) =
                    value_as_non_empty_string(intent.command_args.get("index"))
                else {
                    println!("/preset requires a number (see /presets)");
                    continue;
                };
                let Some(instruction) = index_text
                    .parse::<usize>()
                    .ok()
                    .and_then(Instruction::preset)
                else {
                    println!("No such preset. /presets lists the quick actions.");
                    continue;
                };
                println!("{PROCESSING_MESSAGE}");
                match session.run_edit(&instruction) {
                    Ok(outcome) => report_edit_outcome(outcome),
                    Err(err) => println!("Edit failed: {err:#}"),
                }
            }
            "show_history" => print_history(&session),
            "set_active_entry" => {
                let Some(entry_text) =
                    value_as_non_empty_string(intent.command_args.get("entry"))
                else {
                    println!("/use requires a history index or id");
                    continue;
                };
                let Some(id) = resolve_history_entry(&session, &entry_text) else {
                    println!("No matching history entry. /history lists them.");
                    continue;
                };
                match session.select_history_entry(&id) {
                    Ok(true) => println!("Active result set to [{}]", short_id(&id)),
                    Ok(false) => println!("No matching history entry. /history lists them."),
                    Err(err) => println!("Selection failed: {err:#}"),
                }
            }
            "download" => {
                let explicit = value_as_non_empty_string(intent.command_args.get("path"));
                let result = match explicit {
                    Some(path_text) => session.download_to_path(&PathBuf::from(path_text)),
                    None => session.download_to_dir(&args.out),
                };
                match result {
                    Ok(DownloadOutcome::Saved(path)) => println!("Saved {}", path.display()),
                    Ok(DownloadOutcome::Rejected(reason)) => {
                        println!("{}", reason.user_message());
                    }
                    Err(err) => println!("Download failed: {err:#}"),
                }
            }
            "reset" => match session.reset() {
                Ok(()) => println!("Session reset. Upload an image to start a new project."),
                Err(err) => println!("Reset failed: {err:#}"),
            },
            "edit" => {
                let prompt = intent.prompt.clone().unwrap_or_default();
                println!("{PROCESSING_MESSAGE}");
                match session.run_edit_prompt(&prompt) {
                    Ok(outcome) => report_edit_outcome(outcome),
                    Err(err) => println!("Edit failed: {err:#}"),
                }
            }
            "unknown" => {
                let command = value_as_non_empty_string(intent.command_args.get("command"))
                    .unwrap_or_default();
                println!("Unknown command /{command}. Type /help for commands.");
            }
            _ => {}
        }
    }

    Ok(())
}

fn run_edit_once(args: EditArgs) -> Result<i32> {
    let mut session = build_session(
        &args.out,
        args.events.clone(),
        &args.editor,
        args.model.as_deref(),
        args.request_timeout_secs,
    )?;

    match session.select_image(&args.image)? {
        SelectOutcome::Selected => {}
        SelectOutcome::Rejected(reason) => {
            eprintln!("{}", reason.user_message());
            return Ok(1);
        }
    }

    println!("{PROCESSING_MESSAGE}");
    match session.run_edit_prompt(&args.prompt)? {
        EditOutcome::Completed(entry) => match session.download_to_dir(&args.out)? {
            DownloadOutcome::Saved(path) => {
                println!("Saved {} ({})", path.display(), entry.short_digest());
                Ok(0)
            }
            DownloadOutcome::Rejected(reason) => {
                eprintln!("{}", reason.user_message());
                Ok(1)
            }
        },
        EditOutcome::Rejected(reason) => {
            eprintln!("{}", reason.user_message());
            Ok(1)
        }
        EditOutcome::Failed(notice) => {
            eprintln!("{notice}");
            Ok(1)
        }
    }
}

fn report_edit_outcome(outcome: EditOutcome) {
    match outcome {
        EditOutcome::Completed(entry) => {
            println!(
                "Edit complete: [{}] {} (/download to save)",
                short_id(&entry.id),
                entry.prompt
            );
        }
        EditOutcome::Rejected(reason) => println!("{}", reason.user_message()),
        EditOutcome::Failed(notice) => println!("{notice}"),
    }
}

fn print_history(session: &EditSession) {
    let entries = session.state.history.entries();
    if entries.is_empty() {
        println!("No edits yet. Upload an image and type an instruction to start.");
        return;
    }
    println!("Recent edits (newest first):");
    for (idx, entry) in entries.iter().enumerate() {
        let marker = if session.state.active_id.as_deref() == Some(entry.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {}. [{}] {} ({})",
            idx + 1,
            short_id(&entry.id),
            entry.prompt,
            entry.created_at
        );
    }
}

/// Accepts a 1-based history index, a full entry id, or a unique id prefix.
fn resolve_history_entry(session: &EditSession, arg: &str) -> Option<String> {
    let trimmed = arg.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(index) = trimmed.parse::<usize>() {
        return session
            .state
            .history
            .entries()
            .get(index.checked_sub(1)?)
            .map(|entry| entry.id.clone());
    }
    let matches: Vec<&str> = session
        .state
        .history
        .entries()
        .iter()
        .filter(|entry| entry.id.starts_with(trimmed))
        .map(|entry| entry.id.as_str())
        .collect();
    match matches.as_slice() {
        [only] => Some((*only).to_string()),
        _ => None,
    }
}

fn short_id(id: &str) -> &str {
    &id[..id.len().min(8)]
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

fn session_id() -> String {
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0);
    format!("session-{stamp}")
}
