//! Interactive chat loop.
//!
//! Plain lines are sent to the model in the current mode. Lines starting
//! with `/` are commands; `/help` lists them.

use anyhow::Result;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use quill_core::{DownloadOutcome, ExportFormat, Mode, SessionError, SessionManager, SettingsPatch};

const HELP: &str = "\
Commands:
  /mode <writer|rephraser|explainer|search>  switch mode
  /new                                      start a conversation in the current mode
  /list                                     list conversations
  /switch <n>                               activate conversation n from /list
  /history                                  show the active conversation
  /export <json|txt|csv>                    export the active conversation
  /models                                   list models
  /download <model-id>                      download a model in the background
  /set <key> <value>                        model, temperature, top-p, max-tokens, stream, history
  /settings                                 show generation settings
  /status                                   show system status
  /help                                     this text
  /quit                                     exit";

#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Say(String),
    Mode(Mode),
    New,
    List,
    Switch(usize),
    History,
    Export(ExportFormat),
    Models,
    Download(String),
    Set(SettingsPatch),
    Settings,
    Status,
    Help,
    Quit,
    Empty,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(ReplCommand::Empty);
        }
        let Some(command) = line.strip_prefix('/') else {
            return Ok(ReplCommand::Say(line.to_string()));
        };

        let mut parts = command.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let args: Vec<&str> = parts.collect();

        match (name, args.as_slice()) {
            ("mode", [mode]) => mode.parse().map(ReplCommand::Mode),
            ("new", []) => Ok(ReplCommand::New),
            ("list", []) => Ok(ReplCommand::List),
            ("switch", [n]) => n
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .map(ReplCommand::Switch)
                .ok_or_else(|| format!("Not a conversation number: {n}")),
            ("history", []) => Ok(ReplCommand::History),
            ("export", [format]) => format
                .parse()
                .map(ReplCommand::Export)
                .map_err(|e| e.to_string()),
            ("models", []) => Ok(ReplCommand::Models),
            ("download", [id]) => Ok(ReplCommand::Download(id.to_string())),
            ("set", [key, value]) => parse_setting(key, value).map(ReplCommand::Set),
            ("settings", []) => Ok(ReplCommand::Settings),
            ("status", []) => Ok(ReplCommand::Status),
            ("help", []) => Ok(ReplCommand::Help),
            ("quit" | "exit", []) => Ok(ReplCommand::Quit),
            _ => Err(format!("Unknown command: /{command} (try /help)")),
        }
    }
}

fn parse_setting(key: &str, value: &str) -> Result<SettingsPatch, String> {
    let patch = SettingsPatch::default();
    let number = |v: &str| v.parse::<f64>().map_err(|_| format!("Not a number: {v}"));
    let switch = |v: &str| match v {
        "on" | "true" | "yes" => Ok(true),
        "off" | "false" | "no" => Ok(false),
        _ => Err(format!("Expected on or off, got {v}")),
    };

    match key {
        "model" => Ok(patch.selected_model(value)),
        "temperature" => number(value).map(|v| patch.temperature(v)),
        "top-p" | "top_p" => number(value).map(|v| patch.top_p(v)),
        "max-tokens" | "max_tokens" => value
            .parse::<u32>()
            .map(|v| patch.max_tokens(v))
            .map_err(|_| format!("Not a token count: {value}")),
        "stream" => switch(value).map(|v| patch.stream_response(v)),
        "history" => switch(value).map(|v| patch.save_history(v)),
        _ => Err(format!("Unknown setting: {key}")),
    }
}

/// Prints streamed prefixes as deltas.
pub struct StreamPrinter<'a> {
    out: &'a mut dyn Write,
    shown: String,
}

impl<'a> StreamPrinter<'a> {
    pub fn new(out: &'a mut dyn Write) -> Self {
        Self {
            out,
            shown: String::new(),
        }
    }

    pub fn show(&mut self, prefix: &str) {
        if let Some(delta) = prefix.strip_prefix(self.shown.as_str()) {
            let _ = write!(self.out, "{delta}");
            let _ = self.out.flush();
            self.shown = prefix.to_string();
        }
    }

    /// Print whatever of `text` has not been shown yet, then a newline.
    pub fn finish(self, text: &str) -> io::Result<()> {
        match text.strip_prefix(self.shown.as_str()) {
            Some(rest) => writeln!(self.out, "{rest}"),
            None => writeln!(self.out, "\n{text}"),
        }
    }
}

pub fn print_models(sessions: &SessionManager, out: &mut dyn Write) -> io::Result<()> {
    for model in sessions.models() {
        let progress = model
            .download_progress
            .map(|p| format!(" {p}%"))
            .unwrap_or_default();
        writeln!(
            out,
            "{:<16} {:<16} {:>6}  {:?}{}",
            model.id, model.name, model.size, model.status, progress
        )?;
    }
    Ok(())
}

enum Flow {
    Continue,
    Quit,
}

pub struct Repl {
    sessions: Arc<SessionManager>,
    mode: Mode,
    export_dir: Option<PathBuf>,
}

impl Repl {
    pub fn new(sessions: Arc<SessionManager>, mode: Mode, export_dir: Option<PathBuf>) -> Self {
        Self {
            sessions,
            mode,
            export_dir,
        }
    }

    fn execute(&mut self, command: ReplCommand, out: &mut dyn Write) -> Result<Flow> {
        match command {
            ReplCommand::Empty => {}
            ReplCommand::Say(text) => self.say(&text, out)?,
            ReplCommand::Mode(mode) => {
                self.mode = mode;
                let conversation = self.sessions.select_mode(mode);
                writeln!(out, "Mode: {} ({})", mode, conversation.title)?;
            }
            ReplCommand::New => {
                let conversation = self.sessions.create_conversation(self.mode);
                writeln!(out, "Started: {}", conversation.title)?;
            }
            ReplCommand::List => {
                let active = self.sessions.active_conversation().map(|c| c.id);
                for (n, conversation) in self.sessions.conversations().iter().enumerate() {
                    let marker = if Some(&conversation.id) == active.as_ref() { "*" } else { " " };
                    writeln!(
                        out,
                        "{marker}{:>3}. {} ({} messages)",
                        n + 1,
                        conversation.title,
                        conversation.messages.len()
                    )?;
                }
            }
            ReplCommand::Switch(n) => {
                let target = self.sessions.conversations().into_iter().nth(n - 1);
                match target {
                    Some(conversation) if self.sessions.set_active_conversation(&conversation.id) => {
                        self.mode = conversation.mode;
                        writeln!(out, "Switched to: {}", conversation.title)?;
                    }
                    _ => writeln!(out, "No conversation {n}")?,
                }
            }
            ReplCommand::History => match self.sessions.active_conversation() {
                Some(conversation) => {
                    for message in &conversation.messages {
                        writeln!(out, "{}: {}\n", message.role, message.content)?;
                    }
                }
                None => writeln!(out, "No active conversation")?,
            },
            ReplCommand::Export(format) => self.export(format, out)?,
            ReplCommand::Models => print_models(&self.sessions, out)?,
            ReplCommand::Download(id) => match self.sessions.download_model(&id) {
                DownloadOutcome::Started(_) => writeln!(out, "Downloading {id} (see /models)")?,
                DownloadOutcome::AlreadyInProgress => writeln!(out, "{id} is already downloading")?,
                DownloadOutcome::NotFound => writeln!(out, "Unknown model: {id}")?,
            },
            ReplCommand::Set(patch) => match self.sessions.update_settings(&patch) {
                Ok(()) => writeln!(out, "Updated")?,
                Err(e) => writeln!(out, "{e}")?,
            },
            ReplCommand::Settings => {
                let settings = self.sessions.settings();
                writeln!(out, "{}", describe_settings(&settings))?;
            }
            ReplCommand::Status => {
                let status = self.sessions.system_status();
                writeln!(
                    out,
                    "{} | models loaded: {} | memory: {:.0}% | cpu: {:.0}%",
                    if status.is_online { "online" } else { "offline" },
                    status.models_loaded,
                    status.memory_usage,
                    status.cpu_usage
                )?;
            }
            ReplCommand::Help => writeln!(out, "{HELP}")?,
            ReplCommand::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    fn say(&mut self, text: &str, out: &mut dyn Write) -> Result<()> {
        let mut printer = StreamPrinter::new(out);
        let result = {
            let mut on_token = |prefix: &str| printer.show(prefix);
            self.sessions.send_message(self.mode, text, Some(&mut on_token))
        };

        match result {
            Ok(reply) => {
                printer.finish(&reply.message.content)?;
            }
            Err(SessionError::Busy) => {
                printer.finish("Still generating, try again in a moment")?;
            }
            Err(e) => printer.finish(&e.to_string())?,
        }
        Ok(())
    }

    fn export(&self, format: ExportFormat, out: &mut dyn Write) -> Result<()> {
        let Some(conversation) = self.sessions.active_conversation() else {
            writeln!(out, "No active conversation")?;
            return Ok(());
        };
        let Some(dir) = &self.export_dir else {
            writeln!(out, "No export directory (set --export-dir)")?;
            return Ok(());
        };

        match self.sessions.export_to_dir(&conversation.id, format, dir)? {
            Some(path) => writeln!(out, "Exported to {}", path.display())?,
            None => writeln!(out, "No active conversation")?,
        }
        Ok(())
    }
}

fn describe_settings(settings: &quill_core::GenerationSettings) -> String {
    format!(
        "model: {}\ntemperature: {}\ntop-p: {}\nmax-tokens: {}\nstream: {}\nhistory: {}",
        settings.selected_model,
        settings.temperature,
        settings.top_p,
        settings.max_tokens,
        on_off(settings.stream_response),
        on_off(settings.save_history)
    )
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

pub fn run(sessions: Arc<SessionManager>, mode: Mode, export_dir: Option<PathBuf>) -> Result<()> {
    let mut repl = Repl::new(sessions, mode, export_dir);
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    writeln!(stdout, "quill {} - /help for commands", env!("CARGO_PKG_VERSION"))?;
    loop {
        write!(stdout, "[{}]> ", repl.mode)?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            writeln!(stdout)?;
            break;
        }

        match ReplCommand::parse(&line) {
            Ok(command) => {
                if let Flow::Quit = repl.execute(command, &mut stdout)? {
                    break;
                }
            }
            Err(message) => writeln!(stdout, "{message}")?,
        }
    }
    Ok(())
}
