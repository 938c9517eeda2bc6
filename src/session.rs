use crate::config::{AppConfig, AutoRecoverConfig};
use crate::controller::RuleController;
use crate::error::RuleError;
use crate::platform::CommandRunner;
use crate::rule::{PortPair, RuleStatus, PORT_PRESETS};
use crate::scheduler::AutoRecoverTimer;
use crossterm::event::KeyEvent;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleSource {
    User,
    Hotkey,
}

/// Everything that can ask the session to do something. Producers on other
/// threads (hotkey listener, timers, signal handler) only ever send these.
#[derive(Debug)]
pub enum SessionEvent {
    Refresh,
    Redraw,
    Toggle { source: ToggleSource },
    Block,
    Unblock,
    SelectPreset(usize),
    SetAutoRecover { enabled: bool },
    SetRecoverDelay(u64),
    SetNotifications(bool),
    AutoRecoverElapsed { generation: u64 },
    OpenConsole,
    Key(KeyEvent),
    Interrupt,
}

/// User-facing outcome of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Info(String),
    Warning(String),
    Error(String),
}

impl Notice {
    pub fn message(&self) -> &str {
        match self {
            Notice::Info(m) | Notice::Warning(m) | Notice::Error(m) => m,
        }
    }
}

/// Presentation-side state around one [`RuleController`].
pub struct Session<R> {
    controller: RuleController<R>,
    ports: PortPair,
    preset_index: Option<usize>,
    auto_recover: AutoRecoverConfig,
    notifications_enabled: bool,
    timer: AutoRecoverTimer,
    tx: UnboundedSender<SessionEvent>,
    status: RuleStatus,
}

impl<R: CommandRunner> Session<R> {
    pub fn new(
        controller: RuleController<R>,
        config: &AppConfig,
        tx: UnboundedSender<SessionEvent>,
    ) -> Self {
        let mut session = Self {
            controller,
            ports: config.ports(),
            preset_index: Some(config.preset_index),
            auto_recover: config.auto_recover,
            notifications_enabled: config.notifications_enabled,
            timer: AutoRecoverTimer::new(),
            tx,
            status: RuleStatus::Unknown,
        };
        session.refresh();
        session
    }

    /// Uses a port range that is not one of the presets.
    pub fn with_ports(mut self, ports: PortPair) -> Self {
        self.preset_index = PORT_PRESETS.iter().position(|p| *p == ports);
        self.ports = ports;
        self
    }

    pub fn with_auto_recover(mut self, auto_recover: AutoRecoverConfig) -> Self {
        self.auto_recover = auto_recover;
        self
    }

    /// The CLI always reports outcomes, whatever the dashboard setting is.
    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    pub fn status(&self) -> RuleStatus {
        self.status
    }

    pub fn ports(&self) -> PortPair {
        self.ports
    }

    pub fn preset_index(&self) -> Option<usize> {
        self.preset_index
    }

    pub fn auto_recover(&self) -> AutoRecoverConfig {
        self.auto_recover
    }

    pub fn notifications_enabled(&self) -> bool {
        self.notifications_enabled
    }

    pub fn recover_remaining(&self) -> Option<Duration> {
        self.timer.remaining()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.controller.last_error()
    }

    pub fn refresh(&mut self) -> RuleStatus {
        self.status = self.controller.get_status();
        self.status
    }

    /// Copies the user's choices back into `base` for saving.
    pub fn apply_to(&self, base: &AppConfig) -> AppConfig {
        AppConfig {
            preset_index: self.preset_index.unwrap_or(base.preset_index),
            auto_recover: self.auto_recover,
            notifications_enabled: self.notifications_enabled,
            hotkey: base.hotkey.clone(),
        }
    }

    pub fn handle(&mut self, event: SessionEvent) -> Option<Notice> {
        let notice = match event {
            SessionEvent::Refresh => {
                // A rule removed elsewhere leaves nothing to recover.
                if self.refresh() == RuleStatus::Normal {
                    self.timer.cancel();
                }
                None
            }
            SessionEvent::Toggle { source } => {
                debug!(?source, "toggle requested");
                let result = self.controller.toggle(self.ports);
                self.after_change(result)
            }
            SessionEvent::Block => {
                let result = self.controller.block(self.ports);
                self.after_change(result)
            }
            SessionEvent::Unblock => {
                let result = self.controller.unblock();
                self.after_change(result)
            }
            SessionEvent::SelectPreset(index) => match PortPair::preset(index) {
                Some(ports) => {
                    self.ports = ports;
                    self.preset_index = Some(index);
                    Some(Notice::Info(format!("UDP ports set to {}", ports)))
                }
                None => Some(Notice::Warning(format!("No port preset #{}", index))),
            },
            SessionEvent::SetAutoRecover { enabled } => {
                self.auto_recover.enabled = enabled;
                if !enabled {
                    self.timer.cancel();
                } else if self.refresh().is_blocked() && !self.timer.is_armed() {
                    self.timer.arm(self.auto_recover.delay(), self.tx.clone());
                }
                Some(Notice::Info(format!(
                    "Auto-recover {}",
                    if enabled { "enabled" } else { "disabled" }
                )))
            }
            SessionEvent::SetRecoverDelay(seconds) => {
                self.auto_recover = AutoRecoverConfig::new(self.auto_recover.enabled, seconds);
                None
            }
            SessionEvent::SetNotifications(enabled) => {
                self.notifications_enabled = enabled;
                None
            }
            SessionEvent::AutoRecoverElapsed { generation } => self.recover(generation),
            SessionEvent::OpenConsole => {
                if self.controller.open_firewall_console() {
                    Some(Notice::Info("Opened Windows Firewall console".into()))
                } else {
                    Some(Notice::Error(format!(
                        "Could not open the firewall console: {}",
                        self.controller.last_error().unwrap_or("unknown error")
                    )))
                }
            }
            SessionEvent::Redraw | SessionEvent::Key(_) | SessionEvent::Interrupt => None,
        };
        self.filter(notice)
    }

    fn after_change(&mut self, result: crate::error::Result<RuleStatus>) -> Option<Notice> {
        match result {
            Ok(status) => {
                info!(%status, ports = %self.ports, "rule state changed");
                self.status = status;
                match status {
                    RuleStatus::Blocked => {
                        if self.auto_recover.enabled {
                            self.timer.arm(self.auto_recover.delay(), self.tx.clone());
                            Some(Notice::Info(format!(
                                "Matchmaking blocked on UDP {}; restoring in {}s",
                                self.ports, self.auto_recover.delay_seconds
                            )))
                        } else {
                            Some(Notice::Info(format!(
                                "Matchmaking blocked on UDP {}",
                                self.ports
                            )))
                        }
                    }
                    RuleStatus::Normal => {
                        self.timer.cancel();
                        Some(Notice::Info("Matchmaking restored".into()))
                    }
                    RuleStatus::Unknown => Some(Notice::Warning(
                        "Rule state is indeterminate after the change".into(),
                    )),
                }
            }
            Err(e) => {
                self.refresh();
                if !self.status.is_blocked() {
                    self.timer.cancel();
                }
                Some(notice_for(&e))
            }
        }
    }

    fn recover(&mut self, generation: u64) -> Option<Notice> {
        if !self.timer.take_elapsed(generation) {
            debug!(generation, "ignoring stale auto-recover");
            return None;
        }
        // The rule may have been removed by hand in the meantime.
        match self.refresh() {
            RuleStatus::Blocked => {}
            RuleStatus::Normal => {
                debug!("auto-recover fired but rule is already gone");
                return None;
            }
            RuleStatus::Unknown => {
                return Some(Notice::Error(
                    "Auto-recover skipped: rule state could not be determined".into(),
                ))
            }
        }
        info!("auto-recover restoring matchmaking");
        match self.controller.delete_rule() {
            Ok(()) => {
                self.refresh();
                Some(Notice::Info("Auto-recover: matchmaking restored".into()))
            }
            Err(e) => {
                self.refresh();
                Some(notice_for(&e))
            }
        }
    }

    fn filter(&self, notice: Option<Notice>) -> Option<Notice> {
        match notice {
            Some(Notice::Info(_)) if !self.notifications_enabled => None,
            other => other,
        }
    }
}

fn notice_for(error: &RuleError) -> Notice {
    if error.is_already_in_state() {
        Notice::Warning(format!("{}, nothing to do", error))
    } else {
        Notice::Error(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeNetsh;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn session_with(
        fake: &FakeNetsh,
        delay_seconds: u64,
    ) -> (Session<FakeNetsh>, UnboundedReceiver<SessionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = AppConfig {
            auto_recover: AutoRecoverConfig::new(true, delay_seconds),
            ..Default::default()
        };
        let session = Session::new(RuleController::new(fake.clone()), &config, tx);
        (session, rx)
    }

    fn toggle() -> SessionEvent {
        SessionEvent::Toggle {
            source: ToggleSource::User,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn auto_recover_restores_after_delay() {
        let fake = FakeNetsh::new();
        let (mut session, mut rx) = session_with(&fake, 10);
        assert_eq!(session.status(), RuleStatus::Normal);

        session.handle(toggle());
        assert_eq!(session.status(), RuleStatus::Blocked);

        tokio::time::sleep(Duration::from_millis(9_900)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(session.refresh(), RuleStatus::Blocked);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event, SessionEvent::AutoRecoverElapsed { .. }));
        let notice = session.handle(event);
        assert_eq!(notice, Some(Notice::Info("Auto-recover: matchmaking restored".into())));
        assert_eq!(session.status(), RuleStatus::Normal);
        assert!(!fake.has_rule());
    }

    #[tokio::test(start_paused = true)]
    async fn manual_unblock_cancels_pending_recover() {
        let fake = FakeNetsh::new();
        let (mut session, mut rx) = session_with(&fake, 5);

        session.handle(toggle());
        session.handle(SessionEvent::Toggle {
            source: ToggleSource::Hotkey,
        });
        assert_eq!(session.status(), RuleStatus::Normal);
        let mutations = fake.mutation_count();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(fake.mutation_count(), mutations);
        assert_eq!(session.recover_remaining(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_auto_recover_cancels_timer() {
        let fake = FakeNetsh::new();
        let (mut session, mut rx) = session_with(&fake, 5);

        session.handle(SessionEvent::Block);
        assert!(session.recover_remaining().is_some());
        session.handle(SessionEvent::SetAutoRecover { enabled: false });

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
        assert!(fake.has_rule());
    }

    #[tokio::test(start_paused = true)]
    async fn recover_skips_delete_when_rule_removed_externally() {
        let fake = FakeNetsh::new();
        let (mut session, mut rx) = session_with(&fake, 5);
        session.handle(toggle());

        // Someone deletes the rule from the firewall console.
        RuleController::new(fake.clone()).delete_rule().unwrap();
        let mutations = fake.mutation_count();

        let event = rx.recv().await.unwrap();
        assert_eq!(session.handle(event), None);
        assert_eq!(fake.mutation_count(), mutations);
        assert_eq!(session.status(), RuleStatus::Normal);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_notices_external_removal_and_drops_timer() {
        let fake = FakeNetsh::new();
        let (mut session, mut rx) = session_with(&fake, 5);
        session.handle(SessionEvent::Block);
        assert!(session.recover_remaining().is_some());

        RuleController::new(fake.clone()).delete_rule().unwrap();
        assert_eq!(session.status(), RuleStatus::Blocked);

        assert_eq!(session.handle(SessionEvent::Refresh), None);
        assert_eq!(session.status(), RuleStatus::Normal);
        assert_eq!(session.recover_remaining(), None);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn enabling_auto_recover_rechecks_rule_first() {
        let fake = FakeNetsh::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = AppConfig {
            auto_recover: AutoRecoverConfig::new(false, 5),
            ..Default::default()
        };
        let mut session = Session::new(RuleController::new(fake.clone()), &config, tx);
        assert_eq!(session.status(), RuleStatus::Normal);

        // Blocked from the firewall console while the dashboard shows NORMAL.
        RuleController::new(fake.clone())
            .create_rule(PORT_PRESETS[0])
            .unwrap();
        session.handle(SessionEvent::SetAutoRecover { enabled: true });
        assert_eq!(session.status(), RuleStatus::Blocked);
        assert!(session.recover_remaining().is_some());

        let event = rx.recv().await.unwrap();
        session.handle(event);
        assert!(!fake.has_rule());
    }

    #[tokio::test]
    async fn stale_generation_is_ignored() {
        let fake = FakeNetsh::new();
        let (mut session, _rx) = session_with(&fake, 5);
        session.handle(toggle());

        let notice = session.handle(SessionEvent::AutoRecoverElapsed { generation: 9_999 });
        assert_eq!(notice, None);
        assert!(fake.has_rule());
    }

    #[tokio::test]
    async fn redundant_requests_warn_instead_of_failing() {
        let fake = FakeNetsh::with_rule("4950-4955");
        let (mut session, _rx) = session_with(&fake, 5);
        assert_eq!(session.status(), RuleStatus::Blocked);

        match session.handle(SessionEvent::Block) {
            Some(Notice::Warning(message)) => assert!(message.contains("already blocked")),
            other => panic!("unexpected notice: {:?}", other),
        }
        assert!(session.handle(SessionEvent::Unblock).is_some());
        assert!(matches!(
            session.handle(SessionEvent::Unblock),
            Some(Notice::Warning(_))
        ));
    }

    #[tokio::test]
    async fn query_failure_surfaces_as_error() {
        let fake = FakeNetsh::new();
        let (mut session, _rx) = session_with(&fake, 5);
        fake.fail_queries(true);

        assert!(matches!(session.handle(toggle()), Some(Notice::Error(_))));
        assert_eq!(session.status(), RuleStatus::Unknown);
        assert!(!fake.has_rule());
    }

    #[tokio::test]
    async fn disabled_notifications_hide_info_only() {
        let fake = FakeNetsh::new();
        let (mut session, _rx) = session_with(&fake, 5);
        session.handle(SessionEvent::SetNotifications(false));

        assert_eq!(session.handle(toggle()), None);
        assert!(matches!(
            session.handle(SessionEvent::Block),
            Some(Notice::Warning(_))
        ));
    }

    #[tokio::test]
    async fn preset_selection_changes_next_block() {
        let fake = FakeNetsh::new();
        let (mut session, _rx) = session_with(&fake, 5);

        session.handle(SessionEvent::SelectPreset(5));
        assert!(matches!(
            session.handle(SessionEvent::SelectPreset(6)),
            Some(Notice::Warning(_))
        ));
        session.handle(toggle());
        assert_eq!(fake.localport().as_deref(), Some("3074-3080"));

        let saved = session.apply_to(&AppConfig::default());
        assert_eq!(saved.preset_index, 5);
    }

    #[tokio::test]
    async fn console_shortcut_launches_without_state_change() {
        let fake = FakeNetsh::new();
        let (mut session, _rx) = session_with(&fake, 5);
        assert!(matches!(
            session.handle(SessionEvent::OpenConsole),
            Some(Notice::Info(_))
        ));
        assert_eq!(fake.console_launches(), 1);
        assert_eq!(fake.mutation_count(), 0);
    }
}
