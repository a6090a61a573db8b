//! quill: terminal front end for quill-core.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use quill_core::config::DEFAULT_ENDPOINT;
use quill_core::{
    paths, CoreConfig, Mode, QuillContext, SessionManager, SettingsPatch, SimulatedBackend,
};

mod repl;

use repl::{print_models, StreamPrinter};

/// Quill: a writing assistant for locally hosted models.
#[derive(Parser)]
#[command(name = "quill", version, about)]
struct Cli {
    /// Completion endpoint (Ollama `/api/generate`).
    #[arg(long, env = "QUILL_ENDPOINT", default_value = DEFAULT_ENDPOINT, global = true)]
    endpoint: String,

    /// Model to generate with.
    #[arg(short, long, env = "QUILL_MODEL", global = true)]
    model: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 120, global = true)]
    timeout: u64,

    /// Use canned replies instead of a model server.
    #[arg(long, global = true)]
    simulate: bool,

    /// Print replies only once they are complete.
    #[arg(long, global = true)]
    no_stream: bool,

    /// Directory for /export (default: ~/quill-exports).
    #[arg(long, env = "QUILL_EXPORT_DIR", global = true)]
    export_dir: Option<PathBuf>,

    /// Write raw completion traffic to <dir>/completion.log.
    #[arg(long, env = "QUILL_LOG_DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Ask once and print the reply.
    Ask {
        #[arg(long, default_value_t = Mode::Writer)]
        mode: Mode,

        #[arg(required = true)]
        prompt: Vec<String>,
    },

    /// Interactive session (default).
    Chat {
        #[arg(long, default_value_t = Mode::Writer)]
        mode: Mode,
    },

    /// List known models.
    Models,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let ctx = build_context(&cli);
    apply_startup_settings(&ctx.sessions, &cli)?;

    let export_dir = cli.export_dir.clone().or_else(paths::default_export_dir);
    let result = match cli.command.unwrap_or(Command::Chat { mode: Mode::Writer }) {
        Command::Ask { mode, prompt } => ask(&ctx.sessions, mode, &prompt.join(" ")),
        Command::Chat { mode } => repl::run(Arc::clone(&ctx.sessions), mode, export_dir),
        Command::Models => print_models(&ctx.sessions, &mut io::stdout()).map_err(Into::into),
    };

    ctx.sessions.shutdown();
    result
}

fn build_context(cli: &Cli) -> QuillContext {
    let mut config = CoreConfig::default()
        .endpoint(cli.endpoint.clone())
        .request_timeout(Duration::from_secs(cli.timeout));
    if let Some(dir) = &cli.log_dir {
        config = config.log_dir(dir);
    }

    let builder = QuillContext::builder().config(config);
    if cli.simulate {
        log::info!("Using simulated completion backend");
        builder.backend(Arc::new(SimulatedBackend::default())).build()
    } else {
        builder.build()
    }
}

fn apply_startup_settings(sessions: &SessionManager, cli: &Cli) -> Result<()> {
    let mut patch = SettingsPatch::default();
    if let Some(model) = &cli.model {
        patch = patch.selected_model(model.clone());
    }
    if cli.no_stream {
        patch = patch.stream_response(false);
    }
    if !patch.is_empty() {
        sessions
            .update_settings(&patch)
            .context("Invalid startup settings")?;
    }
    Ok(())
}

fn ask(sessions: &SessionManager, mode: Mode, prompt: &str) -> Result<()> {
    let mut stdout = io::stdout();
    let mut printer = StreamPrinter::new(&mut stdout);

    let reply = {
        let mut on_token = |prefix: &str| printer.show(prefix);
        sessions.send_message(mode, prompt, Some(&mut on_token))?
    };
    printer.finish(&reply.message.content)?;
    stdout.flush()?;

    if reply.failed {
        bail!("Generation failed (run with --verbose for details)");
    }
    Ok(())
}
