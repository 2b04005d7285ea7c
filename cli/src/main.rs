//! Persona CLI - chat with a persona prompt from the terminal.
//!
//! # Architecture
//!
//! ```text
//! main() -> PersonaConfig::load() -> GenerationClient::from_config()
//!        -> ChatSession::new(persona) -> repl::run()
//! ```
//!
//! Logs go to `~/.persona/logs/persona.log` so stdout carries only the
//! transcript.

mod repl;

use anyhow::{Context, Result};
use clap::Parser;
use std::{
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use persona_engine::{ChatSession, ClientOptions, GenerationClient, PersonaConfig};

#[derive(Debug, Parser)]
#[command(name = "persona", about = "Chat with a persona prompt", version)]
struct Cli {
    /// File holding the persona prompt
    persona: PathBuf,

    /// Model id (overrides [app].model)
    #[arg(short, long, env = "PERSONA_MODEL")]
    model: Option<String>,

    /// Requests-per-minute budget (overrides [rate_limit])
    #[arg(long)]
    rpm: Option<u32>,

    /// Log request parameters and token usage
    #[arg(short, long)]
    debug: bool,

    /// Config file (default: ~/.persona/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,
}

type FilterHandle = reload::Handle<EnvFilter, Registry>;

/// Runs before the config is read so config warnings are captured.
///
/// Returns a handle for raising the level later, or `None` when `RUST_LOG`
/// decides the filter.
fn init_tracing(debug: bool) -> Option<FilterHandle> {
    let default_level = if debug { "debug" } else { "info" };
    let (env_filter, from_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (
            EnvFilter::try_new(default_level)
                .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid")),
            false,
        ),
    };
    let (filter, handle) = reload::Layer::new(env_filter);

    let (log_file, init_warnings) = open_persona_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
    } else {
        // No log file: drop logs rather than interleave them with the chat.
        tracing_subscriber::registry().with(filter).init();
    }

    (!from_env).then_some(handle)
}

fn enable_debug_logging(handle: &FilterHandle) {
    match EnvFilter::try_new("debug") {
        Ok(filter) => {
            if let Err(err) = handle.reload(filter) {
                tracing::warn!("Failed to raise log level: {err}");
            }
        }
        Err(err) => tracing::warn!("Invalid debug filter: {err}"),
    }
}

fn open_persona_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in persona_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn persona_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.persona/logs/persona.log
    if let Some(config_path) = PersonaConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("persona.log"));
    }

    // Fallback: ./.persona/logs/persona.log
    candidates.push(PathBuf::from(".persona").join("logs").join("persona.log"));

    candidates
}

fn load_config(explicit: Option<PathBuf>) -> Result<PersonaConfig> {
    let loaded = match explicit {
        Some(path) => PersonaConfig::load_from(path)?,
        None => PersonaConfig::load()?,
    };
    Ok(loaded.unwrap_or_default())
}

fn load_persona(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read persona file {}", path.display()))?;
    let content = content.trim();
    anyhow::ensure!(
        !content.is_empty(),
        "persona file {} is empty",
        path.display()
    );
    Ok(content.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let filter = init_tracing(cli.debug);
    let config = load_config(cli.config.clone())?;
    if config.debug()
        && !cli.debug
        && let Some(filter) = &filter
    {
        enable_debug_logging(filter);
    }

    let persona = load_persona(&cli.persona)?;
    let options = ClientOptions {
        model: cli.model.clone(),
        requests_per_minute: cli.rpm,
        debug: cli.debug.then_some(true),
        endpoint: None,
    };
    let client = GenerationClient::from_config(&config, options)
        .context("failed to set up the generation client")?;

    let session = ChatSession::new(&persona, client, &config);
    repl::run(session).await
}

#[cfg(test)]
mod tests {
    use super::{enable_debug_logging, load_config};
    use std::fs;
    use std::io::{self, Write};
    use std::sync::{Arc, Mutex};
    use tracing::subscriber::with_default;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    #[test]
    fn config_load_warnings_are_logged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[app\nmodel = ").unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );
        with_default(subscriber, || {
            assert!(load_config(Some(path)).is_err());
        });

        assert!(captured.text().contains("Failed to parse config"), "{}", captured.text());
    }

    #[test]
    fn debug_logging_can_be_enabled_after_startup() {
        let (filter, handle) = reload::Layer::new(EnvFilter::new("info"));
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::registry().with(filter).with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(move || writer.clone()),
        );

        with_default(subscriber, || {
            tracing::debug!("before reload");
            enable_debug_logging(&handle);
            tracing::debug!("after reload");
        });

        let text = captured.text();
        assert!(!text.contains("before reload"), "{text}");
        assert!(text.contains("after reload"), "{text}");
    }
}
