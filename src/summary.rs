use anyhow::{anyhow, bail, Context, Result};
use std::io::{ErrorKind, Write};
use std::process::{Command, Stdio};
use tracing::debug;

/// Something that can shorten a long task description into a phrase.
/// It never sees the task store.
pub trait Summarizer {
    fn summarize(&self, text: &str) -> Result<String>;
}

/// Delegates to an external command line, run through the system shell:
/// the text goes in on stdin and the summary is whatever the command
/// prints on stdout.
#[derive(Debug, Clone)]
pub struct CommandSummarizer {
    command: String,
}

impl CommandSummarizer {
    pub fn new(command: impl Into<String>) -> Self {
        CommandSummarizer {
            command: command.into(),
        }
    }

    #[cfg(unix)]
    fn shell(&self) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command);
        cmd
    }

    #[cfg(windows)]
    fn shell(&self) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(&self.command);
        cmd
    }
}

impl Summarizer for CommandSummarizer {
    fn summarize(&self, text: &str) -> Result<String> {
        debug!(command = %self.command, "running summarizer");
        let mut child = self
            .shell()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start summarizer `{}`.", self.command))?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("Failed to open summarizer input."))?;
            // A command may exit without reading all of its input.
            match stdin.write_all(text.as_bytes()) {
                Err(e) if e.kind() != ErrorKind::BrokenPipe => {
                    return Err(e).context("Failed to send text to summarizer.");
                }
                _ => {}
            }
        }

        let output = child
            .wait_with_output()
            .context("Failed to read summarizer output.")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Summarizer exited with {}: {}", output.status, stderr.trim());
        }

        let summary = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if summary.is_empty() {
            bail!("Summarizer returned nothing.");
        }
        Ok(summary)
    }
}

/// Used when no summarizer program has been set up.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl Summarizer for Unconfigured {
    fn summarize(&self, _text: &str) -> Result<String> {
        bail!("No summarizer configured. Use --summarizer <command> or set TASQ_SUMMARIZER.")
    }
}

/// Pick a summarizer from the optional command line.
pub fn from_command(command: Option<String>) -> Box<dyn Summarizer> {
    match command {
        Some(command) => Box::new(CommandSummarizer::new(command)),
        None => Box::new(Unconfigured),
    }
}
