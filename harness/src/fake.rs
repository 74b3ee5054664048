//! A scripted `CommandRunner` for unit tests.

use crate::process::{CommandOutput, CommandRunner, Invocation};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

struct Rule {
    prefix: String,
    outputs: VecDeque<CommandOutput>,
}

/// Records every invocation and answers with canned outputs. A rule matches when the rendered
/// command line starts with its prefix; the first matching rule wins. A rule with several outputs
/// replays them in order and then keeps repeating the last one. Unmatched commands succeed with
/// empty output.
#[derive(Default)]
pub(crate) struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn respond(self, prefix: &str, outputs: Vec<CommandOutput>) -> Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                prefix: prefix.to_string(),
                outputs: outputs.into(),
            });
        }
        self
    }

    pub(crate) fn ok(self, prefix: &str, stdout: &str) -> Self {
        self.respond(prefix, vec![ok(stdout)])
    }

    pub(crate) fn fail(self, prefix: &str, code: i32, stderr: &str) -> Self {
        self.respond(prefix, vec![failed(code, stderr)])
    }

    pub(crate) fn calls(&self) -> Vec<Invocation> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Rendered command lines in the order they ran.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    pub(crate) fn ran(&self, prefix: &str) -> bool {
        self.lines().iter().any(|line| line.starts_with(prefix))
    }

    pub(crate) fn position(&self, prefix: &str) -> Option<usize> {
        self.lines().iter().position(|line| line.starts_with(prefix))
    }
}

pub(crate) fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

pub(crate) fn ok_bytes(stdout: Vec<u8>) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout,
        stderr: Vec::new(),
    }
}

pub(crate) fn failed(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: Vec::new(),
        stderr: stderr.as_bytes().to_vec(),
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(invocation.clone());
        }
        let line = invocation.to_string();
        let mut rules = match self.rules.lock() {
            Ok(rules) => rules,
            Err(_) => return Ok(ok("")),
        };
        let output = rules
            .iter_mut()
            .find(|rule| line.starts_with(&rule.prefix))
            .and_then(|rule| {
                if rule.outputs.len() > 1 {
                    rule.outputs.pop_front()
                } else {
                    rule.outputs.front().cloned()
                }
            });
        Ok(output.unwrap_or_else(|| ok("")))
    }
}
