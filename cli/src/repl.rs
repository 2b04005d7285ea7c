//! Line-oriented chat loop and its slash commands.

use std::io::{Write, stdout};

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader, stdin};

use persona_engine::{AdherenceScorer, ChatSession, ConversationHistory, Role, SessionUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Quit,
    Help,
    History,
    Clear,
    Stats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Input<'a> {
    Empty,
    Command(Command),
    UnknownCommand(&'a str),
    Message(&'a str),
}

pub(crate) fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if !line.starts_with('/') {
        return Input::Message(line);
    }

    match line.to_ascii_lowercase().as_str() {
        "/quit" | "/exit" | "/q" => Input::Command(Command::Quit),
        "/help" | "/h" => Input::Command(Command::Help),
        "/history" | "/hist" => Input::Command(Command::History),
        "/clear" | "/reset" => Input::Command(Command::Clear),
        "/stats" => Input::Command(Command::Stats),
        _ => Input::UnknownCommand(line),
    }
}

pub(crate) const HELP: &str = "\
Commands:
  /quit, /exit, /q     end the session
  /help, /h            show this help
  /history, /hist      show the stored conversation
  /clear, /reset       forget the conversation
  /stats               adherence and token usage
Anything else is sent as a message.";

pub(crate) fn format_history(history: &ConversationHistory) -> String {
    if history.is_empty() {
        return "No conversation history yet.".to_string();
    }

    let mut out = format!("Conversation history ({} turns):\n", history.len());
    for (index, turn) in history.turns().enumerate() {
        let speaker = match turn.role() {
            Role::User => "You",
            Role::Assistant => "Me",
        };
        let marker = if turn.is_placeholder() { " (omitted)" } else { "" };
        out.push_str(&format!(
            "{:>3}. {speaker}{marker}: {}\n",
            index + 1,
            turn.content()
        ));
    }
    out
}

pub(crate) fn format_stats(adherence: &AdherenceScorer, usage: &SessionUsage) -> String {
    let average = adherence
        .average()
        .map_or_else(|| "n/a".to_string(), |avg| format!("{avg:.2}"));
    let recent: Vec<String> = adherence.recent().map(|s| format!("{s:.0}")).collect();

    format!(
        "Adherence: avg {average} over {} replies [{}]\n\
         Context:   {} ({} turns)\n\
         API:       {} prompt + {} completion = {} tokens\n\
         Degraded:  {}",
        adherence.len(),
        recent.join(" "),
        usage.context.format_compact(),
        usage.context.turns,
        usage.api.prompt_tokens,
        usage.api.completion_tokens,
        usage.api.total_tokens,
        usage.degraded_replies,
    )
}

fn prompt() -> Result<()> {
    let mut out = stdout().lock();
    write!(out, "\nYou: ")?;
    out.flush()?;
    Ok(())
}

pub(crate) async fn run(mut session: ChatSession) -> Result<()> {
    println!("Persona chat ({})", session.client().model());
    println!("Type a message and press Enter. /help for commands.");

    let mut lines = BufReader::new(stdin()).lines();
    loop {
        prompt()?;
        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        match parse_input(&line) {
            Input::Empty => {}
            Input::Command(Command::Quit) => break,
            Input::Command(Command::Help) => println!("{HELP}"),
            Input::Command(Command::History) => print!("{}", format_history(session.history())),
            Input::Command(Command::Clear) => {
                session.clear();
                println!("Conversation cleared.");
            }
            Input::Command(Command::Stats) => {
                println!("{}", format_stats(session.adherence(), &session.usage()));
            }
            Input::UnknownCommand(raw) => println!("Unknown command {raw}. Try /help."),
            Input::Message(text) => {
                let reply = session.send(text).await;
                println!("Me: {}", reply.text);
            }
        }
    }

    println!("Goodbye!");
    tracing::info!(usage = ?session.usage(), "Chat session ended");
    Ok(())
}
