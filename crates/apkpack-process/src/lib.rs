//! Running the native build tools (`ndk-build -n`, `cmake`) for the JSON
//! generator.
//!
//! The generator parses a tool's stdout, so stdout is captured whole up to a
//! hard limit and a run that exceeds it fails instead of yielding a cut-off
//! listing. stderr is only shown to the user, so just its tail is kept: make
//! and CMake print the failing step last.

use std::{
    fmt,
    io::{self, Read},
    path::PathBuf,
    process::{Command, ExitStatus, Stdio},
    thread,
};

/// Lines of stdout quoted in a failure message when the tool wrote nothing
/// to stderr.
const FAILURE_STDOUT_LINES: usize = 20;

/// Capture limits for a tool run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Bytes of stdout accepted before the run counts as overflowing.
    pub stdout_limit: usize,
    /// Trailing bytes of stderr kept.
    pub stderr_tail: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            stdout_limit: 64 * 1024 * 1024,
            stderr_tail: 64 * 1024,
        }
    }
}

/// A tool invocation: working directory, program and arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub cwd: PathBuf,
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(cwd: impl Into<PathBuf>, program: impl Into<PathBuf>) -> Self {
        Self {
            cwd: cwd.into(),
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program and arguments one per line, as stored next to the generated
    /// JSON. Two texts are equal exactly when the invocations are.
    pub fn to_command_text(&self) -> String {
        let mut out = format!("Executable : {}\narguments : \n", self.program.display());
        for arg in &self.args {
            out.push_str(arg);
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// What a tool printed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub stdout: String,
    /// Set when stdout went past [`RunOptions::stdout_limit`]; `stdout` then
    /// holds only the accepted prefix.
    pub stdout_overflowed: bool,
    /// The last [`RunOptions::stderr_tail`] bytes of stderr.
    pub stderr: String,
    /// Bytes of stderr dropped ahead of the kept tail.
    pub stderr_dropped: u64,
}

impl ToolOutput {
    /// The part of the output worth quoting when the tool fails: stderr, or
    /// the end of stdout for tools that report errors there.
    pub fn diagnostics(&self) -> String {
        if !self.stderr.trim().is_empty() {
            return self.stderr.trim_end().to_owned();
        }
        let lines: Vec<&str> = self.stdout.trim_end().lines().collect();
        let start = lines.len().saturating_sub(FAILURE_STDOUT_LINES);
        lines[start..].join("\n")
    }
}

/// A finished tool run, whatever its exit status.
#[derive(Debug, Clone)]
pub struct ToolRun {
    pub status: ExitStatus,
    pub output: ToolOutput,
}

/// A tool that ran but exited unsuccessfully.
#[derive(Debug, Clone)]
pub struct CommandFailure {
    pub command: CommandSpec,
    pub status: ExitStatus,
    pub output: ToolOutput,
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "`{}` exited with {}", self.command, self.status)?;
        let diagnostics = self.output.diagnostics();
        if diagnostics.is_empty() {
            return Ok(());
        }
        if self.output.stderr_dropped > 0 {
            write!(
                f,
                "\n[{} earlier bytes of stderr omitted]",
                self.output.stderr_dropped
            )?;
        }
        write!(f, "\n{diagnostics}")
    }
}

impl std::error::Error for CommandFailure {}

/// Error returned by [`run_command_checked`].
#[derive(Debug)]
pub enum RunCommandError {
    /// The tool could not be started or its pipes could not be read.
    Io {
        command: CommandSpec,
        source: io::Error,
    },
    /// The tool exited unsuccessfully.
    Failed(Box<CommandFailure>),
    /// The tool succeeded but printed more than the stdout limit.
    StdoutOverflow { command: CommandSpec, limit: usize },
}

impl fmt::Display for RunCommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { command, source } => write!(f, "failed to run `{command}`: {source}"),
            Self::Failed(failure) => failure.fmt(f),
            Self::StdoutOverflow { command, limit } => {
                write!(f, "`{command}` printed more than {limit} bytes to stdout")
            }
        }
    }
}

impl std::error::Error for RunCommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Failed(failure) => Some(failure.as_ref()),
            Self::StdoutOverflow { .. } => None,
        }
    }
}

/// Runs `command` to completion with stdin closed.
pub fn run_command(command: &CommandSpec, opts: &RunOptions) -> io::Result<ToolRun> {
    tracing::debug!(target = "apkpack.process", command = %command, "spawning");

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .current_dir(&command.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;
    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(io::Error::other("child pipes were not captured"));
    };

    // Both pipes drain while waiting; a tool blocked on a full stderr pipe
    // never closes stdout.
    let (status, stdout, stderr) = thread::scope(|scope| {
        let stdout = scope.spawn(|| read_head(stdout, opts.stdout_limit));
        let stderr = scope.spawn(|| read_tail(stderr, opts.stderr_tail));
        let status = child.wait();
        (status, joined(stdout, "stdout"), joined(stderr, "stderr"))
    });
    let ((stdout, stdout_overflowed), (stderr, stderr_dropped)) = (stdout?, stderr?);

    Ok(ToolRun {
        status: status?,
        output: ToolOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stdout_overflowed,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stderr_dropped,
        },
    })
}

/// Runs `command` and requires a zero exit with stdout inside the limit.
pub fn run_command_checked(
    command: &CommandSpec,
    opts: &RunOptions,
) -> Result<ToolRun, RunCommandError> {
    let run = run_command(command, opts).map_err(|source| RunCommandError::Io {
        command: command.clone(),
        source,
    })?;

    if !run.status.success() {
        return Err(RunCommandError::Failed(Box::new(CommandFailure {
            command: command.clone(),
            status: run.status,
            output: run.output,
        })));
    }
    if run.output.stdout_overflowed {
        return Err(RunCommandError::StdoutOverflow {
            command: command.clone(),
            limit: opts.stdout_limit,
        });
    }
    Ok(run)
}

fn joined<T>(
    handle: thread::ScopedJoinHandle<'_, io::Result<T>>,
    stream: &str,
) -> io::Result<T> {
    handle
        .join()
        .map_err(|_| io::Error::other(format!("{stream} reader panicked")))?
}

/// Keeps the first `limit` bytes and reports whether anything followed.
fn read_head(mut reader: impl Read, limit: usize) -> io::Result<(Vec<u8>, bool)> {
    let mut head = Vec::new();
    reader.by_ref().take(limit as u64).read_to_end(&mut head)?;
    let rest = io::copy(&mut reader, &mut io::sink())?;
    Ok((head, rest > 0))
}

/// Keeps the last `limit` bytes and counts the ones dropped before them.
fn read_tail(mut reader: impl Read, limit: usize) -> io::Result<(Vec<u8>, u64)> {
    let mut tail = Vec::new();
    let mut dropped = 0u64;
    let mut buf = [0u8; 8 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        tail.extend_from_slice(&buf[..n]);
        // Trim in batches so a long stream is not shifted on every read.
        if tail.len() > limit.saturating_mul(2).max(buf.len()) {
            let excess = tail.len() - limit;
            tail.drain(..excess);
            dropped += excess as u64;
        }
    }
    if tail.len() > limit {
        let excess = tail.len() - limit;
        tail.drain(..excess);
        dropped += excess as u64;
    }
    Ok((tail, dropped))
}
