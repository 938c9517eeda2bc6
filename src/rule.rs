use crate::error::{Result, RuleError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Name of the single firewall rule this tool owns. Must stay stable so
/// rules left behind by earlier runs are still recognised.
pub const RULE_NAME: &str = "WarframePairBlockPort";

/// `netsh ... show rule` exits with this code when the rule exists.
pub const RULE_FOUND_EXIT_CODE: i32 = 0;

/// `netsh ... show rule` exits with this code when no rule matched.
pub const RULE_NOT_FOUND_EXIT_CODE: i32 = 1;

/// UDP ranges the game can be configured to use, in menu order.
pub const PORT_PRESETS: [PortPair; 6] = [
    PortPair { start: 4950, end: 4955 },
    PortPair { start: 4960, end: 4965 },
    PortPair { start: 4970, end: 4975 },
    PortPair { start: 4980, end: 4985 },
    PortPair { start: 4990, end: 4995 },
    PortPair { start: 3074, end: 3080 },
];

/// Contiguous local UDP port range; `start <= end`, neither zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PortPair {
    start: u16,
    end: u16,
}

impl PortPair {
    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 || end == 0 {
            return Err(RuleError::InvalidPortPair(format!(
                "{}-{}: port 0 is not a valid local port",
                start, end
            )));
        }
        if start > end {
            return Err(RuleError::InvalidPortPair(format!(
                "{}-{}: start must not exceed end",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn preset(index: usize) -> Option<Self> {
        PORT_PRESETS.get(index).copied()
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    /// Value for netsh's `localport=` argument.
    pub fn to_localport(&self) -> String {
        format!("{}-{}", self.start(), self.end())
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_localport())
    }
}

impl FromStr for PortPair {
    type Err = RuleError;

    /// Accepts `4950-4955`, `4950 & 4955` or a single port.
    fn from_str(s: &str) -> Result<Self> {
        let parse_port = |part: &str| {
            part.trim()
                .parse::<u16>()
                .map_err(|e| RuleError::InvalidPortPair(format!("{:?}: {}", s, e)))
        };

        let mut parts = s.splitn(2, ['-', '&']);
        let start = parse_port(parts.next().unwrap_or_default())?;
        let end = match parts.next() {
            Some(part) => parse_port(part)?,
            None => start,
        };
        Self::new(start, end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleStatus {
    Normal,
    Blocked,
    Unknown,
}

impl RuleStatus {
    /// Maps the exit code of the show-rule query to a status. `None` means
    /// the process ended without a code (e.g. killed by a signal).
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(RULE_FOUND_EXIT_CODE) => RuleStatus::Blocked,
            Some(RULE_NOT_FOUND_EXIT_CODE) => RuleStatus::Normal,
            _ => RuleStatus::Unknown,
        }
    }

    pub fn is_blocked(&self) -> bool {
        matches!(self, RuleStatus::Blocked)
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RuleStatus::Normal => "NORMAL",
            RuleStatus::Blocked => "BLOCKED",
            RuleStatus::Unknown => "UNKNOWN",
        };
        f.write_str(text)
    }
}
