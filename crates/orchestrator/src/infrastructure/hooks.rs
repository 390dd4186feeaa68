use std::process::Stdio;

use tokio::process::Command;

use crate::config::HooksConfig;
use crate::domain::ports::HookKind;
use crate::domain::ports::HookRunner;

/// Runs hook commands from the profile as detached processes.
pub struct CommandHooks {
    hooks: HooksConfig,
}

impl CommandHooks {
    pub fn new(hooks: HooksConfig) -> Self {
        Self { hooks }
    }
}

/// Splits a hook command line on whitespace into program and arguments.
pub fn split_command(command: &str) -> Option<(&str, Vec<&str>)> {
    let mut parts = command.split_whitespace();
    let program = parts.next()?;
    Some((program, parts.collect()))
}

impl HookRunner for CommandHooks {
    fn run(&self, kind: HookKind) {
        let Some(command) = self.hooks.command(kind) else {
            return;
        };
        let Some((program, args)) = split_command(command) else {
            return;
        };

        let mut child = Command::new(program);
        child
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let program = program.to_string();
        tokio::spawn(async move {
            match child.status().await {
                Ok(status) if status.success() => {
                    tracing::debug!(hook = %kind, "hook finished");
                }
                Ok(status) => {
                    tracing::warn!(hook = %kind, program = %program, "hook exited with {status}");
                }
                Err(e) => {
                    tracing::warn!(hook = %kind, program = %program, "failed to run hook: {e}");
                }
            }
        });
    }
}
