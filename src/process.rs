use anyhow::{Context, Result, bail};
use std::path::Path;
use std::process::Command;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

pub trait CommandRunner {
    fn run(&mut self, cwd: &Path, program: &str, args: &[String]) -> Result<CommandOutput>;
}

pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&mut self, cwd: &Path, program: &str, args: &[String]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .with_context(|| format!("Failed to execute `{program}`. Is it installed?"))?;

        Ok(CommandOutput {
            status: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Runs a command and fails with both captured streams when it exits nonzero.
pub fn run_checked(
    runner: &mut dyn CommandRunner,
    cwd: &Path,
    program: &str,
    args: &[&str],
    context: &str,
) -> Result<String> {
    let args = args.iter().map(|arg| arg.to_string()).collect::<Vec<_>>();
    tracing::debug!(command = %format_command(program, &args), "running");

    let output = runner.run(cwd, program, &args)?;
    if output.status != 0 {
        bail!(
            "{context} Command `{}` failed (exit {}).\nstdout: {}\nstderr: {}",
            format_command(program, &args),
            output.status,
            or_placeholder(&output.stdout),
            or_placeholder(&output.stderr),
        );
    }
    Ok(output.stdout)
}

fn or_placeholder(stream: &str) -> &str {
    let trimmed = stream.trim();
    if trimmed.is_empty() {
        "<empty>"
    } else {
        trimmed
    }
}

fn format_command(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        return program.to_string();
    }
    format!("{program} {}", args.join(" "))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Debug, Clone)]
    pub struct RecordedCall {
        pub program: String,
        pub args: Vec<String>,
    }

    pub struct ScriptedRunner {
        responses: VecDeque<CommandOutput>,
        pub calls: Vec<RecordedCall>,
    }

    impl ScriptedRunner {
        pub fn new(responses: Vec<CommandOutput>) -> Self {
            Self {
                responses: responses.into(),
                calls: Vec::new(),
            }
        }
    }

    impl CommandRunner for ScriptedRunner {
        fn run(&mut self, _cwd: &Path, program: &str, args: &[String]) -> Result<CommandOutput> {
            self.calls.push(RecordedCall {
                program: program.to_string(),
                args: args.to_vec(),
            });
            self.responses
                .pop_front()
                .ok_or_else(|| anyhow::anyhow!("Missing scripted response for `{program}`"))
        }
    }

    pub fn ok(stdout: &str) -> CommandOutput {
        CommandOutput {
            status: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        }
    }

    pub fn err_status(code: i32, stdout: &str, stderr: &str) -> CommandOutput {
        CommandOutput {
            status: code,
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
        }
    }
}
