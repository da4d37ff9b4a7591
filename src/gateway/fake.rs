use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{CommandOutput, CommandRunner, CommandSpec, GatewayError};

#[derive(Clone)]
enum Scripted {
    Output(CommandOutput),
    Timeout,
}

/// Scripted stand-in for the OS: the first rule whose prefix matches the
/// command line answers; anything unmatched succeeds with empty output.
pub struct FakeRunner {
    rules: Mutex<Vec<(String, Scripted)>>,
    calls: Mutex<Vec<String>>,
    next_pid: AtomicU32,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(4242),
        }
    }

    fn rule(self, prefix: &str, scripted: Scripted) -> Self {
        self.rules.lock().unwrap().push((prefix.to_string(), scripted));
        self
    }

    pub fn on(self, prefix: &str, stdout: &str) -> Self {
        self.rule(prefix, Scripted::Output(CommandOutput::ok(stdout)))
    }

    pub fn fail(self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.rule(prefix, Scripted::Output(CommandOutput::failed(code, stderr)))
    }

    pub fn timeout(self, prefix: &str) -> Self {
        self.rule(prefix, Scripted::Timeout)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called(&self, prefix: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(prefix))
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, cmd: &CommandSpec) -> Result<CommandOutput, GatewayError> {
        let line = cmd.command_line();
        self.calls.lock().unwrap().push(line.clone());

        let scripted = self
            .rules
            .lock()
            .unwrap()
            .iter()
            .find(|(prefix, _)| line.starts_with(prefix.as_str()))
            .map(|(_, s)| s.clone());

        match scripted {
            Some(Scripted::Output(out)) => Ok(out),
            Some(Scripted::Timeout) => Err(GatewayError::Timeout {
                program: cmd.program.clone(),
                after: cmd.timeout,
            }),
            None => Ok(CommandOutput::ok("")),
        }
    }

    fn spawn_detached(&self, cmd: &CommandSpec) -> Result<u32, GatewayError> {
        self.calls.lock().unwrap().push(cmd.command_line());
        Ok(self.next_pid.fetch_add(1, Ordering::SeqCst))
    }
}
