use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Failed to execute firewall command: {0}")]
    CommandExecution(String),

    #[error("Failed to create firewall rule: {0}")]
    RuleCreation(String),

    #[error("Failed to delete firewall rule: {0}")]
    RuleDeletion(String),

    #[error("Matchmaking is already blocked")]
    AlreadyBlocked,

    #[error("Matchmaking is already normal")]
    AlreadyNormal,

    #[error("Firewall rule state could not be determined")]
    StatusUnknown,

    #[error("Invalid port pair: {0}")]
    InvalidPortPair(String),

    #[error("Invalid hotkey: {0}")]
    InvalidHotkey(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RuleError {
    /// True for refusals caused by the rule already being in the requested
    /// state, as opposed to a failed command.
    pub fn is_already_in_state(&self) -> bool {
        matches!(self, RuleError::AlreadyBlocked | RuleError::AlreadyNormal)
    }
}

pub type Result<T> = std::result::Result<T, RuleError>;
