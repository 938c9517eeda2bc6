//! In-memory stand-in for `netsh advfirewall firewall` used by the tests.

use crate::platform::{CommandOutput, CommandRunner};
use std::io;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Rule {
    localport: String,
    enabled: bool,
}

#[derive(Debug, Default)]
struct State {
    rule: Option<Rule>,
    fail_enable: bool,
    fail_queries: bool,
    mutations: usize,
    console_launches: usize,
}

/// Shared handle; clones observe the same firewall.
#[derive(Debug, Clone, Default)]
pub struct FakeNetsh {
    state: Arc<Mutex<State>>,
}

fn exited(code: i32, stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(code),
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

impl FakeNetsh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule(localport: &str) -> Self {
        let fake = Self::new();
        fake.state.lock().unwrap().rule = Some(Rule {
            localport: localport.to_string(),
            enabled: true,
        });
        fake
    }

    pub fn fail_enable(&self, fail: bool) {
        self.state.lock().unwrap().fail_enable = fail;
    }

    pub fn fail_queries(&self, fail: bool) {
        self.state.lock().unwrap().fail_queries = fail;
    }

    pub fn is_enabled(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.rule.as_ref().is_some_and(|r| r.enabled)
    }

    pub fn has_rule(&self) -> bool {
        self.state.lock().unwrap().rule.is_some()
    }

    pub fn localport(&self) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.rule.as_ref().map(|r| r.localport.clone())
    }

    /// Number of add/set/delete invocations seen so far.
    pub fn mutation_count(&self) -> usize {
        self.state.lock().unwrap().mutations
    }

    pub fn console_launches(&self) -> usize {
        self.state.lock().unwrap().console_launches
    }
}

const NO_MATCH: &str = "No rules match the specified criteria.";

impl CommandRunner for FakeNetsh {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        if program != "netsh" {
            return Err(io::Error::new(io::ErrorKind::NotFound, program.to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let verb = args.get(2).map(String::as_str).unwrap_or_default();
        if verb != "show" {
            state.mutations += 1;
        }

        let output = match verb {
            "show" if state.fail_queries => exited(87, "The parameter is incorrect."),
            "show" => match state.rule {
                Some(_) => exited(0, "Rule Name: WarframePairBlockPort"),
                None => exited(1, NO_MATCH),
            },
            "add" => {
                if state.rule.is_some() {
                    exited(1, "A rule with this name already exists.")
                } else {
                    let localport = args
                        .iter()
                        .find_map(|a| a.strip_prefix("localport="))
                        .unwrap_or_default()
                        .to_string();
                    state.rule = Some(Rule {
                        localport,
                        enabled: false,
                    });
                    exited(0, "Ok.")
                }
            }
            "set" => {
                let fail_enable = state.fail_enable;
                match state.rule.as_mut() {
                    Some(_) if fail_enable => exited(1, "Access is denied."),
                    Some(rule) => {
                        rule.enabled = true;
                        exited(0, "Updated 1 rule(s).")
                    }
                    None => exited(1, NO_MATCH),
                }
            }
            "delete" => match state.rule.take() {
                Some(_) => exited(0, "Deleted 1 rule(s)."),
                None => exited(1, NO_MATCH),
            },
            _ => exited(1, "The following command was not found."),
        };
        Ok(output)
    }

    fn spawn_detached(&self, _program: &str, _args: &[String]) -> io::Result<()> {
        self.state.lock().unwrap().console_launches += 1;
        Ok(())
    }
}
