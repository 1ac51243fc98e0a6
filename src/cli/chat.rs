//! Interactive chat REPL and one-shot `ask`.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::mpsc;

use tallychat::config::Config;
use tallychat::session::{ChatEvent, ChatOverrides, Mode};
use tallychat::{ChatPipeline, TallyError};

use super::build_pipeline;
use super::status::{cmd_modes, print_cache_stats, print_report, print_status};

/// A `/command` typed at the prompt.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SlashCommand {
    Mode(String),
    Modes,
    Reset,
    Save,
    Load(PathBuf),
    Status,
    Report,
    Export(PathBuf),
    Trim(usize),
    Cache,
    Cleanup,
    Help,
    Quit,
}

impl SlashCommand {
    /// `None` when the line is not a slash command.
    pub(crate) fn parse(line: &str) -> Option<std::result::Result<Self, String>> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((n, a)) => (n, a.trim()),
            None => (rest, ""),
        };
        let cmd = match name {
            "mode" => required(arg, "/mode <id>").map(|a| Self::Mode(a.to_string())),
            "modes" => Ok(Self::Modes),
            "reset" => Ok(Self::Reset),
            "save" => Ok(Self::Save),
            "load" => required(arg, "/load <path>").map(|a| Self::Load(PathBuf::from(a))),
            "status" => Ok(Self::Status),
            "report" => Ok(Self::Report),
            "export" => required(arg, "/export <csv path>").map(|a| Self::Export(PathBuf::from(a))),
            "trim" => required(arg, "/trim <rounds>").and_then(|a| {
                a.parse::<usize>()
                    .map(Self::Trim)
                    .map_err(|_| format!("not a number: {}", a))
            }),
            "cache" => Ok(Self::Cache),
            "cleanup" => Ok(Self::Cleanup),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" | "q" => Ok(Self::Quit),
            other => Err(format!("unknown command /{} (try /help)", other)),
        };
        Some(cmd)
    }
}

fn required<'a>(arg: &'a str, usage: &str) -> std::result::Result<&'a str, String> {
    if arg.is_empty() {
        Err(format!("usage: {}", usage))
    } else {
        Ok(arg)
    }
}

const HELP: &str = "\
/mode <id>       switch preset mode (saves and clears the conversation)
/modes           list preset modes
/reset           clear conversation and cost ledger
/save            save the conversation snapshot
/load <path>     load a conversation snapshot
/status          session summary
/report          detailed cost report
/export <path>   write call records as CSV
/trim <rounds>   keep only the last N rounds
/cache           cache statistics
/cleanup         remove expired cache entries
/quit            exit";

/// Run the interactive REPL.
pub(crate) async fn cmd_chat(config: Config, no_stream: bool) -> Result<()> {
    let mut pipeline = build_pipeline(&config)?;
    let stream = config.chat.stream && !no_stream;
    let mut editor = DefaultEditor::new().with_context(|| "Failed to initialize line editor")?;

    println!(
        "TallyChat ({}, mode: {}). Budget ${:.2}. Type /help for commands.",
        pipeline.context().model(),
        pipeline.context().mode(),
        pipeline.tracker().limit()
    );

    loop {
        let line = match editor.readline("you> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e).context("Failed to read input"),
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(text);

        match SlashCommand::parse(text) {
            Some(Ok(SlashCommand::Quit)) => break,
            Some(Ok(cmd)) => run_slash(&mut pipeline, cmd).await,
            Some(Err(msg)) => println!("{}", msg),
            None => {
                if stream {
                    send_streaming(&mut pipeline, text).await;
                } else {
                    send_blocking(&mut pipeline, text).await;
                }
            }
        }
    }

    if !pipeline.context().is_empty() {
        match pipeline.save() {
            Ok(path) => println!("Conversation saved to {}", path.display()),
            Err(e) => eprintln!("Could not save conversation: {}", e),
        }
    }
    Ok(())
}

/// Answer a single question without streaming.
pub(crate) async fn cmd_ask(config: Config, text: String, overrides: ChatOverrides) -> Result<()> {
    if text.trim().is_empty() {
        anyhow::bail!("Nothing to ask");
    }
    let mut pipeline = build_pipeline(&config)?;
    let outcome = pipeline.send_message(&text, &overrides).await?;
    println!("{}", outcome.content);
    if outcome.from_cache {
        eprintln!("(cached)");
    }
    Ok(())
}

async fn send_blocking(pipeline: &mut ChatPipeline, text: &str) {
    match pipeline.send_message(text, &ChatOverrides::default()).await {
        Ok(outcome) => {
            println!("{}", outcome.content);
            print_footer(pipeline, outcome.from_cache);
        }
        Err(e) => print_error(&e),
    }
}

async fn send_streaming(pipeline: &mut ChatPipeline, text: &str) {
    let (tx, mut rx) = mpsc::channel(64);
    let printer = async {
        let mut stdout = std::io::stdout();
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::Delta(fragment) => {
                    let _ = write!(stdout, "{}", fragment);
                    let _ = stdout.flush();
                }
                ChatEvent::Done(_) => println!(),
                ChatEvent::Error(_) => {}
            }
        }
    };
    let overrides = ChatOverrides::default();
    let (result, ()) = tokio::join!(
        pipeline.send_message_stream(text, &overrides, tx),
        printer
    );
    match result {
        Ok(outcome) => print_footer(pipeline, outcome.from_cache),
        Err(e) => print_error(&e),
    }
}

fn print_footer(pipeline: &ChatPipeline, from_cache: bool) {
    let status = pipeline.tracker().check_budget();
    println!(
        "  [{}${:.4} / ${:.2}]",
        if from_cache { "cached | " } else { "" },
        status.current_cost,
        status.limit
    );
    if status.is_near_limit && !status.is_over_budget {
        println!("  warning: {:.0}% of budget used", status.usage_percentage);
    }
}

fn print_error(e: &TallyError) {
    match e {
        TallyError::BudgetExceeded { .. } => {
            eprintln!("{}. Use /reset to start over or raise budget.limit_usd.", e)
        }
        _ => eprintln!("Error: {}", e),
    }
}

async fn run_slash(pipeline: &mut ChatPipeline, cmd: SlashCommand) {
    match cmd {
        SlashCommand::Mode(id) => match pipeline.switch_mode(&id) {
            Ok(mode) => println!("Switched to {} mode: {}", mode, mode.label()),
            Err(e) => println!("{}", e),
        },
        SlashCommand::Modes => {
            cmd_modes();
            println!("Current: {}", pipeline.context().mode());
        }
        SlashCommand::Reset => {
            pipeline.reset();
            println!("Conversation and cost ledger cleared.");
        }
        SlashCommand::Save => match pipeline.save() {
            Ok(path) => println!("Saved to {}", path.display()),
            Err(e) => println!("{}", e),
        },
        SlashCommand::Load(path) => match pipeline.load(&path) {
            Ok(()) => println!(
                "Loaded {} messages (session {}).",
                pipeline.context().message_count(),
                pipeline.session_id()
            ),
            Err(e) => println!("{}", e),
        },
        SlashCommand::Status => print_status(&pipeline.status().await),
        SlashCommand::Report => print_report(&pipeline.detailed_report().await),
        SlashCommand::Export(path) => match pipeline.export_csv(&path) {
            Ok(rows) => println!("Wrote {} call record(s) to {}", rows, path.display()),
            Err(e) => println!("{}", e),
        },
        SlashCommand::Trim(rounds) => {
            let removed = pipeline.context_mut().trim_history(rounds);
            println!("Removed {} message(s).", removed);
        }
        SlashCommand::Cache => print_cache_stats(&pipeline.cache().lock().await.stats()),
        SlashCommand::Cleanup => {
            let removed = pipeline.cleanup_cache().await;
            println!("Removed {} expired cache entr{}.", removed, if removed == 1 { "y" } else { "ies" });
        }
        SlashCommand::Help => {
            println!("{}", HELP);
            println!("Modes: {}", Mode::ids().join(", "));
        }
        SlashCommand::Quit => {}
    }
}
