use crate::config::AppConfig;
use crate::controller::RuleController;
use crate::hotkey::HotkeyListener;
use crate::platform::{CommandRunner, SystemRunner};
use crate::rule::{RuleStatus, PORT_PRESETS};
use crate::session::{Notice, Session, SessionEvent, ToggleSource};
use anyhow::Result;
use crossterm::{
    event::{KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::warn;

const STATUS_POLL_INTERVAL: Duration = Duration::from_secs(3);

pub struct Monitor {
    config: AppConfig,
}

impl Monitor {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(&mut self) -> Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = std::io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let res = self.run_app(&mut terminal).await;

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        if let Err(err) = res {
            println!("{:?}", err)
        }

        if let Err(e) = self.config.save() {
            warn!(error = %e, "failed to save settings");
        }

        Ok(())
    }

    async fn run_app<B: ratatui::backend::Backend>(
        &mut self,
        terminal: &mut Terminal<B>,
    ) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut session = Session::new(RuleController::new(SystemRunner), &self.config, tx.clone());

        let mut listener = HotkeyListener::new();
        let hotkey = self.config.hotkey();
        if !listener.register(hotkey, tx) {
            anyhow::bail!("could not start the keyboard listener");
        }
        let hotkey_label = hotkey.map(|h| h.to_string()).unwrap_or_else(|| "none".into());

        let mut notice: Option<Notice> = None;
        // Redraws the auto-recover countdown.
        let mut tick = tokio::time::interval(Duration::from_millis(250));
        // Picks up changes made outside the dashboard, e.g. in the firewall console.
        let mut poll = tokio::time::interval(STATUS_POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            terminal.draw(|f| draw(f, &session, notice.as_ref(), &hotkey_label))?;

            let event = tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = tick.tick() => continue,
                _ = poll.tick() => SessionEvent::Refresh,
            };

            let event = match event {
                SessionEvent::Key(key) => match key_action(&key, &session) {
                    Some(KeyAction::Quit) => break,
                    Some(KeyAction::Send(event)) => event,
                    None => continue,
                },
                SessionEvent::Interrupt => break,
                other => other,
            };

            if let Some(n) = session.handle(event) {
                notice = Some(n);
            }
        }

        listener.unregister();
        self.config = session.apply_to(&self.config);
        Ok(())
    }
}

enum KeyAction {
    Quit,
    Send(SessionEvent),
}

fn key_action<R: CommandRunner>(key: &KeyEvent, session: &Session<R>) -> Option<KeyAction> {
    let recover = session.auto_recover();
    let event = match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Some(KeyAction::Quit),
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            return Some(KeyAction::Quit)
        }
        KeyCode::Char('t') | KeyCode::Char(' ') | KeyCode::Enter => SessionEvent::Toggle {
            source: ToggleSource::User,
        },
        KeyCode::Char('p') | KeyCode::Right => {
            let next = session.preset_index().map_or(0, |i| (i + 1) % PORT_PRESETS.len());
            SessionEvent::SelectPreset(next)
        }
        KeyCode::Left => {
            let len = PORT_PRESETS.len();
            let prev = session.preset_index().map_or(0, |i| (i + len - 1) % len);
            SessionEvent::SelectPreset(prev)
        }
        KeyCode::Char('a') => SessionEvent::SetAutoRecover {
            enabled: !recover.enabled,
        },
        KeyCode::Char('+') | KeyCode::Up => SessionEvent::SetRecoverDelay(recover.delay_seconds + 1),
        KeyCode::Char('-') | KeyCode::Down => {
            SessionEvent::SetRecoverDelay(recover.delay_seconds.saturating_sub(1))
        }
        KeyCode::Char('n') => SessionEvent::SetNotifications(!session.notifications_enabled()),
        KeyCode::Char('f') => SessionEvent::OpenConsole,
        KeyCode::Char('r') => SessionEvent::Refresh,
        _ => return None,
    };
    Some(KeyAction::Send(event))
}

fn draw<R: CommandRunner>(
    f: &mut Frame,
    session: &Session<R>,
    notice: Option<&Notice>,
    hotkey_label: &str,
) {
    let size = f.size();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints(
            [
                Constraint::Length(3), // Title
                Constraint::Min(8),    // Main Content
                Constraint::Length(3), // Notice
                Constraint::Length(3), // Footer
            ]
            .as_ref(),
        )
        .split(size);

    // Title
    let title = Paragraph::new("Matchmaking Limiter (force host)")
        .style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(title, chunks[0]);

    // Main Status
    let (status_msg, status_color) = match session.status() {
        RuleStatus::Blocked => ("BLOCKED", Color::Red),
        RuleStatus::Normal => ("NORMAL", Color::Green),
        RuleStatus::Unknown => ("UNKNOWN", Color::Yellow),
    };
    let preset = match session.preset_index() {
        Some(i) => format!("UDP {} (preset {}/{})", session.ports(), i + 1, PORT_PRESETS.len()),
        None => format!("UDP {} (custom)", session.ports()),
    };
    let recover = session.auto_recover();
    let recover_text = match (recover.enabled, session.recover_remaining()) {
        (false, _) => "off".to_string(),
        (true, Some(left)) => format!(
            "{}s (restoring in {}s)",
            recover.delay_seconds,
            left.as_secs() + 1
        ),
        (true, None) => format!("{}s", recover.delay_seconds),
    };

    let mut status_text = vec![
        Line::from(vec![
            Span::raw("Status: "),
            Span::styled(
                status_msg,
                Style::default()
                    .fg(status_color)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(""),
        Line::from(vec![
            Span::raw("Ports: "),
            Span::styled(preset, Style::default().fg(Color::Yellow)),
        ]),
        Line::from(vec![
            Span::raw("Auto-recover: "),
            Span::styled(recover_text, Style::default().fg(Color::Blue)),
        ]),
        Line::from(vec![
            Span::raw("Hotkey: "),
            Span::styled(hotkey_label.to_string(), Style::default().fg(Color::Blue)),
        ]),
    ];

    if session.status() == RuleStatus::Unknown {
        if let Some(detail) = session.last_error() {
            status_text.push(Line::from(vec![
                Span::raw("Detail: "),
                Span::styled(detail.to_string(), Style::default().fg(Color::Yellow)),
            ]));
        }
    }

    let main_block = Paragraph::new(status_text)
        .block(
            Block::default()
                .title("Firewall Rule")
                .borders(Borders::ALL),
        )
        .style(Style::default().fg(Color::White));
    f.render_widget(main_block, chunks[1]);

    // Notice
    let (notice_text, notice_color) = match notice {
        Some(n @ Notice::Info(_)) => (n.message().to_string(), Color::Green),
        Some(n @ Notice::Warning(_)) => (n.message().to_string(), Color::Yellow),
        Some(n @ Notice::Error(_)) => (n.message().to_string(), Color::Red),
        None => (String::new(), Color::Gray),
    };
    let notice_block = Paragraph::new(notice_text)
        .style(Style::default().fg(notice_color))
        .block(Block::default().borders(Borders::ALL));
    f.render_widget(notice_block, chunks[2]);

    // Footer
    let footer = Paragraph::new(
        "t Toggle | p Preset | a Auto-recover | +/- Delay | n Notices | f Firewall | q Quit",
    )
    .style(Style::default().fg(Color::Gray))
    .block(Block::default().borders(Borders::ALL));
    f.render_widget(footer, chunks[3]);
}
