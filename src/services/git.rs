use crate::services::credentials::AuthenticatedUrl;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

/// Errors from running the version-control tool
#[derive(Error, Debug)]
pub enum GitError {
    #[error("{program} not found on PATH")]
    ToolNotFound { program: String },

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Git exited with code {exit_code}. Output: {output}")]
    Exit { exit_code: i32, output: String },

    #[error("I/O error while running git: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps one line of tool output to a completion fraction
pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<f32>;
}

/// Parses git's `Receiving objects:  NN% (...)` lines
pub struct ReceivingObjectsParser {
    pattern: Regex,
}

impl ReceivingObjectsParser {
    pub fn new() -> Self {
        Self {
            pattern: Regex::new(r"Receiving objects:\s+(\d+)%")
                .expect("Invalid receiving objects regex"),
        }
    }
}

impl Default for ReceivingObjectsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressParser for ReceivingObjectsParser {
    fn parse(&self, line: &str) -> Option<f32> {
        let captures = self.pattern.captures(line)?;
        let percent: u32 = captures.get(1)?.as_str().parse().ok()?;
        Some(percent.min(100) as f32 / 100.0)
    }
}

/// Which pipe a segment of output came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: Stream,
    text: String,
}

/// Splits a byte stream into segments terminated by `\n` or `\r`.
///
/// Git redraws its progress meter with bare carriage returns, so a newline
/// splitter alone would only see the final percentage.
#[derive(Debug, Default)]
pub struct SegmentSplitter {
    pending: Vec<u8>,
}

impl SegmentSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every segment they complete
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut segments = Vec::new();
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                if !self.pending.is_empty() {
                    segments.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(byte);
            }
        }
        segments
    }

    /// Flush an unterminated trailing segment
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let segment = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(segment)
    }
}

/// Runs the external version-control binary.
///
/// The service never talks to the network itself; it only spawns the tool
/// and interprets what the tool prints.
pub struct GitService {
    program: String,
    parser: Box<dyn ProgressParser>,
}

impl GitService {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            parser: Box::new(ReceivingObjectsParser::new()),
        }
    }

    /// Swap the progress line parser
    pub fn with_parser(mut self, parser: Box<dyn ProgressParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Locate the tool on PATH (or validate it when configured as a path)
    pub fn detect(&self) -> Option<Utf8PathBuf> {
        let found = which::which(&self.program).ok()?;
        match Utf8PathBuf::from_path_buf(found) {
            Ok(path) => Some(path),
            Err(path) => {
                tracing::warn!("Ignoring non UTF-8 tool path {}", path.display());
                None
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.detect().is_some()
    }

    /// `git --version`, for diagnostics
    pub async fn version(&self) -> Result<String, GitError> {
        let program = self.require_program()?;
        let output = Command::new(program.as_std_path())
            .arg("--version")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| GitError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(GitError::Exit {
                exit_code: output.status.code().unwrap_or(-1),
                output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Clone `url` into `dest`, reporting parsed progress as it arrives.
    ///
    /// `on_progress` receives the tool's own fraction in `[0, 1]` together
    /// with the line it was parsed from.
    pub async fn clone_repo(
        &self,
        url: &AuthenticatedUrl,
        dest: &Utf8Path,
        mut on_progress: impl FnMut(f32, &str) + Send,
    ) -> Result<(), GitError> {
        tracing::info!("Cloning {} into {}", url, dest);

        let args = vec![
            "clone".to_string(),
            "--progress".to_string(),
            url.expose().to_string(),
            dest.to_string(),
        ];

        let result = self
            .run(&args, None, Some(url), |_, line| {
                if let Some(fraction) = self.parser.parse(line) {
                    on_progress(fraction, line);
                    true
                } else {
                    false
                }
            })
            .await;

        // git stores the clone address as remote.origin.url
        if url.has_credentials() && dest.join(".git").is_dir() {
            self.forget_credentials(url, dest).await;
        }

        result
    }

    /// Point `origin` at the credential-free address so `.git/config` holds
    /// no secret, even if the checkout outlives the run
    async fn forget_credentials(&self, url: &AuthenticatedUrl, checkout: &Utf8Path) {
        let args = vec![
            "remote".to_string(),
            "set-url".to_string(),
            "origin".to_string(),
            url.without_credentials(),
        ];

        if let Err(e) = self.run(&args, Some(checkout), Some(url), |_, _| false).await {
            tracing::warn!(
                "Could not remove credentials from {}/.git/config: {}",
                checkout,
                e
            );
        }
    }

    /// Run `git pull` inside `working_dir`.
    ///
    /// Every stdout line is reported as `Updating: {line}`.
    pub async fn pull(
        &self,
        working_dir: &Utf8Path,
        mut on_status: impl FnMut(&str) + Send,
    ) -> Result<(), GitError> {
        tracing::info!("Pulling latest changes in {}", working_dir);

        let args = vec!["pull".to_string()];
        self.run(&args, Some(working_dir), None, |stream, line| {
            if stream == Stream::Stdout {
                on_status(&format!("Updating: {}", line));
            }
            false
        })
        .await
    }

    fn require_program(&self) -> Result<Utf8PathBuf, GitError> {
        self.detect().ok_or_else(|| GitError::ToolNotFound {
            program: self.program.clone(),
        })
    }

    /// Spawn the tool and drain both pipes until it exits.
    ///
    /// `on_line` returns true when it consumed the line as progress; consumed
    /// lines are left out of the diagnostic output.
    async fn run(
        &self,
        args: &[String],
        working_dir: Option<&Utf8Path>,
        redactor: Option<&AuthenticatedUrl>,
        mut on_line: impl FnMut(Stream, &str) -> bool + Send,
    ) -> Result<(), GitError> {
        let program = self.require_program()?;

        let mut command = Command::new(program.as_std_path());
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            command.current_dir(dir.as_std_path());
        }

        let mut child = command.spawn().map_err(|source| GitError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(forward_segments(stdout, Stream::Stdout, tx.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(forward_segments(stderr, Stream::Stderr, tx.clone())));
        }
        drop(tx);

        let mut output: Vec<String> = Vec::new();
        while let Some(OutputLine { stream, text }) = rx.recv().await {
            let text = match redactor {
                Some(url) => url.redact(&text),
                None => text,
            };
            tracing::debug!(target: "assetpull::git", "{:?}: {}", stream, text);

            if on_line(stream, &text) {
                continue;
            }
            match stream {
                Stream::Stdout => output.push(text),
                Stream::Stderr => output.push(format!("ERROR: {}", text)),
            }
        }

        for reader in readers {
            if let Err(e) = reader.await {
                tracing::debug!("Output reader task ended abnormally: {}", e);
            }
        }

        let status = child.wait().await?;
        // Killed by a signal: no exit code
        let exit_code = status.code().unwrap_or(-1);

        if exit_code != 0 {
            let output = output.join("\n");
            tracing::error!("git {} exited with code {}", args[0], exit_code);
            return Err(GitError::Exit { exit_code, output });
        }

        Ok(())
    }
}

async fn forward_segments<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut splitter = SegmentSplitter::new();

    loop {
        let chunk = match reader.fill_buf().await {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::debug!("Stopped reading {:?}: {}", stream, e);
                break;
            }
        };
        if chunk.is_empty() {
            break;
        }

        let consumed = chunk.len();
        let segments = splitter.push(chunk);
        reader.consume(consumed);

        for text in segments {
            if tx.send(OutputLine { stream, text }).is_err() {
                return;
            }
        }
    }

    if let Some(text) = splitter.finish() {
        let _ = tx.send(OutputLine { stream, text });
    }
}
