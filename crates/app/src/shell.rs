use std::io::Write;

use llama_link_chat::{ChatSession, DirectoryStatus, Role, SessionUpdate};
use snafu::{ResultExt, Snafu};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

const PROMPT: &str = "> ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Models,
    SelectModel(String),
    Quit,
    Submit(String),
    Usage(&'static str),
    Blank,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Self::Blank;
        }

        match trimmed.split_once(char::is_whitespace) {
            None if trimmed == "/models" => Self::Models,
            None if trimmed == "/quit" => Self::Quit,
            None if trimmed == "/model" => Self::Usage("usage: /model <id>"),
            Some(("/model", model_id)) => Self::SelectModel(model_id.trim().to_string()),
            _ => Self::Submit(trimmed.to_string()),
        }
    }
}

#[derive(Debug, Snafu)]
pub enum ShellError {
    #[snafu(display("failed to read input on `{stage}`: {source}"))]
    ReadInput {
        stage: &'static str,
        source: std::io::Error,
    },
    #[snafu(display("failed to write output on `{stage}`: {source}"))]
    WriteOutput {
        stage: &'static str,
        source: std::io::Error,
    },
}

pub type ShellResult<T> = Result<T, ShellError>;

/// Line-oriented front end for a [`ChatSession`].
///
/// Input is read only between exchanges, so at most one exchange runs at a time.
pub struct Shell<W> {
    session: ChatSession,
    out: W,
}

impl<W: Write> Shell<W> {
    pub fn new(session: ChatSession, out: W) -> Self {
        Self { session, out }
    }

    pub fn into_parts(self) -> (ChatSession, W) {
        (self.session, self.out)
    }

    pub async fn run<R>(&mut self, input: R) -> ShellResult<()>
    where
        R: AsyncBufRead + Unpin,
    {
        self.print_models()?;
        let mut lines = input.lines();

        loop {
            self.prompt()?;
            let Some(line) = lines.next_line().await.context(ReadInputSnafu {
                stage: "read-shell-line",
            })?
            else {
                break;
            };

            match Command::parse(&line) {
                Command::Blank => {}
                Command::Quit => break,
                Command::Models => self.print_models()?,
                Command::Usage(usage) => self.print_line(usage)?,
                Command::SelectModel(model_id) => {
                    self.session.select_model(model_id);
                    let selected = self
                        .session
                        .selected_model()
                        .map(|model_id| self.session.directory().display_name(model_id))
                        .unwrap_or_default();
                    self.print_line(&format!("switched to {selected}, history cleared"))?;
                }
                Command::Submit(text) => self.exchange(&text).await?,
            }
        }

        tracing::debug!("shell input closed");
        Ok(())
    }

    async fn exchange(&mut self, text: &str) -> ShellResult<()> {
        if self.session.submit(text).is_none() {
            return self.print_line("no model selected, see /models");
        }

        if !self.session.is_streaming() {
            // The exchange failed before streaming; its error note is already recorded.
            if let Some(last) = self.session.transcript().last()
                && last.role == Role::Assistant
            {
                let content = last.content.clone();
                self.print_line(&content)?;
            }
            return Ok(());
        }

        let mut mid_line = false;
        while let Some(update) = self.session.next_update().await {
            match update {
                SessionUpdate::Fragment { text, .. } => {
                    self.write(&text)?;
                    mid_line = !text.ends_with('\n');
                }
                SessionUpdate::Completed => {
                    if mid_line {
                        self.print_line("")?;
                    }
                }
                SessionUpdate::Failed { message } => {
                    if mid_line {
                        self.print_line("")?;
                    }
                    self.print_line(&message)?;
                }
            }
        }

        Ok(())
    }

    fn print_models(&mut self) -> ShellResult<()> {
        let directory = self.session.directory();
        let mut listing = match directory.status() {
            DirectoryStatus::Unavailable(reason) => vec![format!("models unavailable: {reason}")],
            DirectoryStatus::Unloaded => vec!["models not loaded".to_string()],
            DirectoryStatus::Ready if directory.models().is_empty() => {
                vec!["no models available".to_string()]
            }
            DirectoryStatus::Ready => directory
                .models()
                .iter()
                .map(|model| {
                    let marker = if directory.selected() == Some(model.id.as_str()) {
                        '*'
                    } else {
                        ' '
                    };
                    match &model.description {
                        Some(description) => format!("{marker} {} ({description})", model.id),
                        None => format!("{marker} {}", model.id),
                    }
                })
                .collect(),
        };

        if let Some(selected) = directory.selected()
            && !directory.contains(selected)
        {
            listing.push(format!("* {selected}"));
        }

        for line in listing {
            self.print_line(&line)?;
        }
        Ok(())
    }

    fn prompt(&mut self) -> ShellResult<()> {
        self.write(PROMPT)
    }

    fn print_line(&mut self, line: &str) -> ShellResult<()> {
        writeln!(self.out, "{line}").context(WriteOutputSnafu { stage: "print-line" })
    }

    fn write(&mut self, text: &str) -> ShellResult<()> {
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .context(WriteOutputSnafu { stage: "write-fragment" })
    }
}
