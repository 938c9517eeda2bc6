// src/platform/windows.rs

//! Command lines for the Windows firewall. They are built on every target so
//! the controller can be exercised against a fake runner anywhere; only
//! `hide_console` is Windows-specific.

use crate::rule::{PortPair, RULE_NAME};
use std::process::Command;

pub const NETSH: &str = "netsh";

/// Program and arguments that open the firewall management console.
pub const CONSOLE_PROGRAM: &str = "mmc";
pub const CONSOLE_ARGS: [&str; 1] = ["wf.msc"];

#[cfg(target_os = "windows")]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

fn advfirewall(verb: &str, rest: &[String]) -> Vec<String> {
    let mut args = vec![
        "advfirewall".to_string(),
        "firewall".to_string(),
        verb.to_string(),
        "rule".to_string(),
        format!("name={}", RULE_NAME),
    ];
    args.extend_from_slice(rest);
    args
}

pub fn show_rule_args() -> Vec<String> {
    advfirewall("show", &["dir=out".to_string()])
}

pub fn add_rule_args(ports: PortPair) -> Vec<String> {
    advfirewall(
        "add",
        &[
            "protocol=UDP".to_string(),
            "dir=out".to_string(),
            format!("localport={}", ports.to_localport()),
            "action=block".to_string(),
        ],
    )
}

pub fn enable_rule_args() -> Vec<String> {
    advfirewall("set", &["new".to_string(), "enable=yes".to_string()])
}

pub fn delete_rule_args() -> Vec<String> {
    advfirewall("delete", &[])
}

pub fn console_args() -> Vec<String> {
    CONSOLE_ARGS.iter().map(|s| s.to_string()).collect()
}

/// Keeps child processes from flashing a console window.
#[cfg(target_os = "windows")]
pub fn hide_console(command: &mut Command) {
    use std::os::windows::process::CommandExt;
    command.creation_flags(CREATE_NO_WINDOW);
}

#[cfg(not(target_os = "windows"))]
pub fn hide_console(_command: &mut Command) {}
