use crate::error::{Result, RuleError};
use crate::platform::{windows, CommandRunner, CommandOutput};
use crate::rule::{PortPair, RuleStatus};
use tracing::{info, warn};

/// Returned by [`RuleController::enable_rule`] when netsh never reported an
/// exit code.
pub const NO_EXIT_CODE: i32 = -1;

/// Owns every interaction with the firewall rule.
///
/// The rule's state lives in the OS firewall and is re-queried on every
/// call; nothing is cached here apart from the last error message. Not
/// meant for concurrent use: drive it from a single task.
pub struct RuleController<R> {
    runner: R,
    last_error: Option<String>,
}

impl<R: CommandRunner> RuleController<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            last_error: None,
        }
    }

    fn netsh(&self, args: Vec<String>) -> Result<CommandOutput> {
        self.runner
            .run(windows::NETSH, &args)
            .map_err(|e| RuleError::CommandExecution(format!("{}: {}", windows::NETSH, e)))
    }

    fn record(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(error = %message, "firewall command failed");
        self.last_error = Some(message);
    }

    /// Queries the rule. Never fails; anything unclassifiable is `Unknown`.
    pub fn get_status(&mut self) -> RuleStatus {
        match self.netsh(windows::show_rule_args()) {
            Ok(output) => {
                let status = RuleStatus::from_exit_code(output.code);
                if status == RuleStatus::Unknown {
                    self.record(format!("unexpected status query result: {}", output.diagnostic()));
                }
                status
            }
            Err(e) => {
                self.record(e.to_string());
                RuleStatus::Unknown
            }
        }
    }

    /// True only when the rule is known to exist; Unknown counts as absent.
    pub fn is_rule_present(&mut self) -> bool {
        self.get_status() == RuleStatus::Blocked
    }

    /// Adds the block rule for `ports` and then enables it. A failed enable
    /// is recorded in [`last_error`](Self::last_error) but does not fail the
    /// call, since the rule already exists at that point.
    pub fn create_rule(&mut self, ports: PortPair) -> Result<()> {
        let output = match self.netsh(windows::add_rule_args(ports)) {
            Ok(output) => output,
            Err(e) => {
                self.record(e.to_string());
                return Err(e);
            }
        };
        if !output.success() {
            let diagnostic = output.diagnostic();
            self.record(diagnostic.clone());
            return Err(RuleError::RuleCreation(diagnostic));
        }
        info!(ports = %ports, "firewall rule added");

        let code = self.enable_rule();
        if code != 0 {
            warn!(code, "rule added but enabling it failed");
        }
        Ok(())
    }

    /// Best-effort enable of the existing rule; returns netsh's exit code.
    pub fn enable_rule(&mut self) -> i32 {
        match self.netsh(windows::enable_rule_args()) {
            Ok(output) => {
                if !output.success() {
                    self.record(output.diagnostic());
                }
                output.code.unwrap_or(NO_EXIT_CODE)
            }
            Err(e) => {
                self.record(e.to_string());
                NO_EXIT_CODE
            }
        }
    }

    /// Removes the rule. Fails when netsh reports an error, which includes
    /// the rule not existing.
    pub fn delete_rule(&mut self) -> Result<()> {
        let output = match self.netsh(windows::delete_rule_args()) {
            Ok(output) => output,
            Err(e) => {
                self.record(e.to_string());
                return Err(e);
            }
        };
        if !output.success() {
            let diagnostic = output.diagnostic();
            self.record(diagnostic.clone());
            return Err(RuleError::RuleDeletion(diagnostic));
        }
        info!("firewall rule deleted");
        Ok(())
    }

    /// Opens the firewall management console without waiting for it.
    pub fn open_firewall_console(&mut self) -> bool {
        match self
            .runner
            .spawn_detached(windows::CONSOLE_PROGRAM, &windows::console_args())
        {
            Ok(()) => true,
            Err(e) => {
                self.record(format!("{}: {}", windows::CONSOLE_PROGRAM, e));
                false
            }
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Creates the rule unless the query says it is already there.
    pub fn block(&mut self, ports: PortPair) -> Result<RuleStatus> {
        match self.get_status() {
            RuleStatus::Blocked => Err(RuleError::AlreadyBlocked),
            RuleStatus::Unknown => Err(RuleError::StatusUnknown),
            RuleStatus::Normal => {
                self.create_rule(ports)?;
                Ok(self.get_status())
            }
        }
    }

    /// Deletes the rule unless the query says it is already gone.
    pub fn unblock(&mut self) -> Result<RuleStatus> {
        match self.get_status() {
            RuleStatus::Normal => Err(RuleError::AlreadyNormal),
            RuleStatus::Unknown => Err(RuleError::StatusUnknown),
            RuleStatus::Blocked => {
                self.delete_rule()?;
                Ok(self.get_status())
            }
        }
    }

    pub fn toggle(&mut self, ports: PortPair) -> Result<RuleStatus> {
        match self.get_status() {
            RuleStatus::Normal => {
                self.create_rule(ports)?;
                Ok(self.get_status())
            }
            RuleStatus::Blocked => {
                self.delete_rule()?;
                Ok(self.get_status())
            }
            RuleStatus::Unknown => Err(RuleError::StatusUnknown),
        }
    }
}
