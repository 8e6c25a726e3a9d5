use apkpack_process::{run_command_checked, CommandSpec, RunCommandError, RunOptions};

/// Executes build-system commands and returns their stdout.
pub trait CommandRunner: Send + Sync + std::fmt::Debug {
    fn run(&self, command: &CommandSpec) -> Result<String, RunCommandError>;
}

/// Spawns real processes through [`apkpack_process`].
#[derive(Debug, Clone, Default)]
pub struct ProcessCommandRunner {
    pub options: RunOptions,
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, command: &CommandSpec) -> Result<String, RunCommandError> {
        let run = run_command_checked(command, &self.options)?;
        if !run.output.stderr.is_empty() {
            tracing::info!(
                target = "apkpack.native",
                command = %command,
                stderr = %run.output.stderr,
                stderr_dropped = run.output.stderr_dropped,
                "build tool wrote to stderr"
            );
        }
        Ok(run.output.stdout)
    }
}
