use crate::config::AppConfig;
use crate::rule::{PortPair, RuleStatus, RULE_NAME};
use colored::Colorize;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub rule_name: String,
    pub status: RuleStatus,
    pub selected_ports: PortPair,
    pub auto_recover_enabled: bool,
    pub auto_recover_seconds: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl StatusReport {
    pub fn new(status: RuleStatus, config: &AppConfig, last_error: Option<&str>) -> Self {
        Self {
            rule_name: RULE_NAME.to_string(),
            status,
            selected_ports: config.ports(),
            auto_recover_enabled: config.auto_recover.enabled,
            auto_recover_seconds: config.auto_recover.delay_seconds,
            last_error: match status {
                RuleStatus::Unknown => last_error.map(str::to_string),
                _ => None,
            },
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn display(&self) {
        println!("\n{}", "━".repeat(60).bright_blue());
        println!(
            "{}",
            "            MATCHMAKING BLOCK STATUS            "
                .bright_blue()
                .bold()
        );
        println!("{}", "━".repeat(60).bright_blue());
        println!();

        match self.status {
            RuleStatus::Blocked => {
                println!(
                    "  {} {}",
                    "Status:".bold(),
                    "🔴 BLOCKED (forcing host)".bright_red().bold()
                );
            }
            RuleStatus::Normal => {
                println!(
                    "  {} {}",
                    "Status:".bold(),
                    "🟢 NORMAL".bright_green().bold()
                );
            }
            RuleStatus::Unknown => {
                println!(
                    "  {} {}",
                    "Status:".bold(),
                    "⚪ UNKNOWN".bright_yellow().bold()
                );
                if let Some(error) = &self.last_error {
                    println!("  {} {}", "Detail:".bold(), error.yellow());
                }
            }
        }
        println!("  {} {}", "Rule:".bold(), self.rule_name.bright_cyan());
        println!(
            "  {} {}",
            "Selected ports:".bold(),
            format!("UDP {}", self.selected_ports).bright_cyan()
        );
        let recover = if self.auto_recover_enabled {
            format!("after {}s", self.auto_recover_seconds)
        } else {
            "off".to_string()
        };
        println!("  {} {}", "Auto-recover:".bold(), recover);

        println!();
        println!("{}", "━".repeat(60).bright_blue());
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_uses_lowercase_status() {
        let report = StatusReport::new(RuleStatus::Blocked, &AppConfig::default(), None);
        let json = report.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "blocked");
        assert_eq!(value["rule_name"], "WarframePairBlockPort");
        assert_eq!(value["selected_ports"]["start"], 4950);
        assert!(value.get("last_error").is_none());
    }

    #[test]
    fn error_detail_only_for_unknown() {
        let config = AppConfig::default();
        let report = StatusReport::new(RuleStatus::Unknown, &config, Some("netsh: not found"));
        assert_eq!(report.last_error.as_deref(), Some("netsh: not found"));

        let report = StatusReport::new(RuleStatus::Normal, &config, Some("stale"));
        assert_eq!(report.last_error, None);
    }
}
