use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc;
use tracing::info;

mod config;
mod controller;
mod error;
mod hotkey;
mod monitor;
mod platform;
mod rule;
mod scheduler;
mod session;
mod status;
#[cfg(test)]
mod testing;

use config::{AppConfig, AutoRecoverConfig};
use controller::RuleController;
use hotkey::{format_hotkey_display, Hotkey};
use platform::SystemRunner;
use rule::{PortPair, RuleStatus, PORT_PRESETS};
use session::{Notice, Session, SessionEvent};

#[derive(Parser)]
#[command(name = "pairblock")]
#[command(
    version,
    about = "Block matchmaking UDP ports to force host status",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PortArgs {
    /// Port preset number (see `pairblock presets`)
    #[arg(short, long, conflicts_with = "ports")]
    preset: Option<usize>,
    /// Explicit UDP range, e.g. "4950-4955"
    #[arg(long)]
    ports: Option<PortPair>,
}

#[derive(Args)]
struct RecoverArgs {
    /// Unblock automatically after this many seconds
    #[arg(short, long, value_name = "SECS", conflicts_with = "no_recover")]
    recover_after: Option<u64>,
    /// Leave the rule in place even if auto-recover is enabled
    #[arg(long)]
    no_recover: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show whether matchmaking is blocked
    Status {
        /// Print the report as JSON
        #[arg(long, conflicts_with = "quiet")]
        json: bool,
        /// Print nothing; exit 0 if the rule is in place, 1 otherwise
        #[arg(short, long)]
        quiet: bool,
    },
    /// Block matchmaking (create the firewall rule)
    Block {
        #[command(flatten)]
        ports: PortArgs,
        #[command(flatten)]
        recover: RecoverArgs,
    },
    /// Restore matchmaking (delete the firewall rule)
    Unblock,
    /// Block if normal, restore if blocked
    Toggle {
        #[command(flatten)]
        ports: PortArgs,
        #[command(flatten)]
        recover: RecoverArgs,
    },
    /// Open the Windows Firewall management console
    Console,
    /// List the port presets
    Presets,
    /// Interactive dashboard with hotkey support
    Monitor,
    /// Show or change settings
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings
    Show,
    /// Restore default settings
    Reset,
    /// Change one or more settings
    Set {
        #[arg(long)]
        preset: Option<usize>,
        #[arg(long)]
        auto_recover: Option<bool>,
        #[arg(long, value_name = "SECS")]
        recover_delay: Option<u64>,
        #[arg(long)]
        notifications: Option<bool>,
        /// Global toggle key for the dashboard, e.g. "ctrl+alt+b"
        #[arg(long, conflicts_with = "clear_hotkey")]
        hotkey: Option<String>,
        #[arg(long)]
        clear_hotkey: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The dashboard owns the terminal; only log there when asked to.
    let quiet = matches!(cli.command, Commands::Monitor) && std::env::var_os("RUST_LOG").is_none();
    if !quiet {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive(tracing::Level::INFO.into()),
            )
            .init();
    }

    let config = AppConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Status { json, quiet } => {
            let mut controller = RuleController::new(SystemRunner);
            if quiet {
                std::process::exit(if controller.is_rule_present() { 0 } else { 1 });
            }
            let status = controller.get_status();
            let report = status::StatusReport::new(status, &config, controller.last_error());
            if json {
                println!("{}", report.to_json()?);
            } else {
                report.display();
            }
        }

        Commands::Block { ports, recover } => {
            let ports = resolve_ports(&config, &ports)?;
            run_change(&config, ports, &recover, SessionEvent::Block).await?;
        }

        Commands::Toggle { ports, recover } => {
            let ports = resolve_ports(&config, &ports)?;
            let event = SessionEvent::Toggle {
                source: session::ToggleSource::User,
            };
            run_change(&config, ports, &recover, event).await?;
        }

        Commands::Unblock => {
            let recover = RecoverArgs {
                recover_after: None,
                no_recover: true,
            };
            run_change(&config, config.ports(), &recover, SessionEvent::Unblock).await?;
        }

        Commands::Console => {
            let mut controller = RuleController::new(SystemRunner);
            if controller.open_firewall_console() {
                println!("{}", "[✓] Firewall console opened".green());
            } else {
                eprintln!(
                    "{} {}",
                    "[✗] Failed to open firewall console:".bright_red(),
                    controller.last_error().unwrap_or("unknown error")
                );
                std::process::exit(1);
            }
        }

        Commands::Presets => {
            println!("{}", "Port presets:".bright_blue().bold());
            for (i, preset) in PORT_PRESETS.iter().enumerate() {
                let marker = if i == config.preset_index { "*" } else { " " };
                println!("  {} {}  UDP {}", marker, i, preset);
            }
        }

        Commands::Monitor => {
            let mut dashboard = monitor::Monitor::new(config);
            dashboard.run().await?;
        }

        Commands::Config { action } => match action.unwrap_or(ConfigAction::Show) {
            ConfigAction::Show => print_config(&config),
            ConfigAction::Reset => {
                let config = AppConfig::reset()?;
                println!("{}", "[✓] Settings reset to defaults".green());
                print_config(&config);
            }
            ConfigAction::Set {
                preset,
                auto_recover,
                recover_delay,
                notifications,
                hotkey,
                clear_hotkey,
            } => {
                let mut config = config;
                if let Some(index) = preset {
                    if PortPair::preset(index).is_none() {
                        return Err(error::RuleError::Config(format!(
                            "no port preset #{} (0-{})",
                            index,
                            PORT_PRESETS.len() - 1
                        ))
                        .into());
                    }
                    config.preset_index = index;
                }
                if let Some(enabled) = auto_recover {
                    config.auto_recover.enabled = enabled;
                }
                if let Some(seconds) = recover_delay {
                    config.auto_recover =
                        AutoRecoverConfig::new(config.auto_recover.enabled, seconds);
                }
                if let Some(enabled) = notifications {
                    config.notifications_enabled = enabled;
                }
                if let Some(raw) = hotkey {
                    let parsed: Hotkey = raw.parse()?;
                    config.hotkey = Some(parsed.to_string());
                }
                if clear_hotkey {
                    config.hotkey = None;
                }
                config.save()?;
                info!(path = %AppConfig::config_path().display(), "settings saved");
                print_config(&config);
            }
        },
    }

    Ok(())
}

fn resolve_ports(config: &AppConfig, args: &PortArgs) -> Result<PortPair> {
    if let Some(ports) = args.ports {
        return Ok(ports);
    }
    match args.preset {
        Some(index) => PortPair::preset(index).ok_or_else(|| {
            anyhow::anyhow!("no port preset #{} (0-{})", index, PORT_PRESETS.len() - 1)
        }),
        None => Ok(config.ports()),
    }
}

/// Applies a block, unblock or toggle and, when the rule ends up in place
/// with auto-recover on, waits in the foreground until the delay has passed.
async fn run_change(
    config: &AppConfig,
    ports: PortPair,
    recover: &RecoverArgs,
    event: SessionEvent,
) -> Result<()> {
    let auto_recover = match (recover.no_recover, recover.recover_after) {
        (true, _) => AutoRecoverConfig::new(false, config.auto_recover.delay_seconds),
        (false, Some(seconds)) => AutoRecoverConfig::new(true, seconds),
        (false, None) => config.auto_recover,
    };

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session::new(RuleController::new(SystemRunner), config, tx.clone())
        .with_ports(ports)
        .with_auto_recover(auto_recover)
        .with_notifications(true);

    match session.handle(event) {
        Some(Notice::Error(message)) => {
            eprintln!("{} {}", "[✗]".bright_red(), message);
            std::process::exit(1);
        }
        Some(Notice::Warning(message)) => println!("{} {}", "[!]".yellow(), message),
        Some(Notice::Info(message)) => println!("{} {}", "[✓]".bright_green(), message),
        None => {}
    }

    let Some(remaining) = session.recover_remaining() else {
        return Ok(());
    };
    println!(
        "{}",
        format!(
            "Waiting {}s before restoring matchmaking (Ctrl+C to keep the block)",
            remaining.as_secs()
        )
        .bright_blue()
    );

    ctrlc::set_handler(move || {
        let _ = tx.send(SessionEvent::Interrupt);
    })?;

    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Interrupt => {
                session.handle(SessionEvent::SetAutoRecover { enabled: false });
                println!("{}", "[!] Auto-recover cancelled, rule left in place".yellow());
                break;
            }
            event @ SessionEvent::AutoRecoverElapsed { .. } => {
                match session.handle(event) {
                    Some(Notice::Error(message)) => {
                        eprintln!("{} {}", "[✗]".bright_red(), message);
                        std::process::exit(1);
                    }
                    Some(notice) => println!("{} {}", "[✓]".bright_green(), notice.message()),
                    None => {}
                }
                if session.status() != RuleStatus::Blocked {
                    break;
                }
            }
            _ => {}
        }
    }

    Ok(())
}

fn print_config(config: &AppConfig) {
    println!("{}", "Current Configuration:".bright_blue().bold());
    println!("{}", "━".repeat(50).bright_blue());
    println!(
        "  Port preset:    #{} (UDP {})",
        config.preset_index,
        config.ports()
    );
    let recover = if config.auto_recover.enabled {
        format!("on, {}s", config.auto_recover.delay_seconds)
    } else {
        "off".to_string()
    };
    println!("  Auto-recover:   {}", recover);
    println!(
        "  Notifications:  {}",
        if config.notifications_enabled { "on" } else { "off" }
    );
    let hotkey = config
        .hotkey
        .as_deref()
        .map(format_hotkey_display)
        .unwrap_or_else(|| "none".to_string());
    println!("  Hotkey:         {}", hotkey);
    println!("  File:           {}", AppConfig::config_path().display());
}
