use crate::error::{Result, RuleError};
use crate::session::{SessionEvent, ToggleSource};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use global_hotkey::hotkey::{Code, HotKey, Modifiers};
use global_hotkey::{GlobalHotKeyEvent, GlobalHotKeyManager, HotKeyState};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const GLOBAL_POLL_INTERVAL: Duration = Duration::from_millis(30);

/// A key chord such as `Ctrl + Alt + B`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotkey {
    pub modifiers: KeyModifiers,
    pub code: KeyCode,
}

fn parse_key(name: &str) -> Option<KeyCode> {
    let lower = name.to_ascii_lowercase();
    let mut chars = lower.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        return Some(KeyCode::Char(c));
    }
    let code = match lower.as_str() {
        "space" => KeyCode::Char(' '),
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "esc" | "escape" => KeyCode::Esc,
        "backspace" => KeyCode::Backspace,
        "insert" => KeyCode::Insert,
        "delete" | "del" => KeyCode::Delete,
        "home" => KeyCode::Home,
        "end" => KeyCode::End,
        "pageup" => KeyCode::PageUp,
        "pagedown" => KeyCode::PageDown,
        "up" => KeyCode::Up,
        "down" => KeyCode::Down,
        "left" => KeyCode::Left,
        "right" => KeyCode::Right,
        f if f.starts_with('f') => {
            let n: u8 = f[1..].parse().ok()?;
            if !(1..=24).contains(&n) {
                return None;
            }
            KeyCode::F(n)
        }
        _ => return None,
    };
    Some(code)
}

impl FromStr for Hotkey {
    type Err = RuleError;

    fn from_str(s: &str) -> Result<Self> {
        let mut modifiers = KeyModifiers::NONE;
        let mut code = None;

        for part in s.split('+').map(str::trim) {
            if part.is_empty() {
                return Err(RuleError::InvalidHotkey(format!("{:?}: empty key", s)));
            }
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" => modifiers |= KeyModifiers::CONTROL,
                "alt" => modifiers |= KeyModifiers::ALT,
                "shift" => modifiers |= KeyModifiers::SHIFT,
                "win" | "super" => modifiers |= KeyModifiers::SUPER,
                _ => {
                    if code.is_some() {
                        return Err(RuleError::InvalidHotkey(format!(
                            "{:?}: more than one non-modifier key",
                            s
                        )));
                    }
                    code = Some(parse_key(part).ok_or_else(|| {
                        RuleError::InvalidHotkey(format!("{:?}: unknown key {:?}", s, part))
                    })?);
                }
            }
        }

        let code =
            code.ok_or_else(|| RuleError::InvalidHotkey(format!("{:?}: missing key", s)))?;
        Ok(Self { modifiers, code })
    }
}

impl Hotkey {
    /// Some terminals report a shifted letter as upper case without the
    /// SHIFT flag, so an upper-case letter counts as shifted.
    pub fn matches(&self, key: &KeyEvent) -> bool {
        if key.kind != KeyEventKind::Press {
            return false;
        }
        match (self.code, key.code) {
            (KeyCode::Char(want), KeyCode::Char(got)) if want.is_ascii_alphabetic() => {
                let mut modifiers = key.modifiers;
                if got.is_ascii_uppercase() {
                    modifiers |= KeyModifiers::SHIFT;
                }
                want.eq_ignore_ascii_case(&got) && modifiers == self.modifiers
            }
            (want, got) => want == got && key.modifiers == self.modifiers,
        }
    }

    /// The same chord as a system-wide hotkey. `None` for keys the OS
    /// hotkey API has no code for.
    pub fn to_global(&self) -> Option<HotKey> {
        let code = match self.code {
            KeyCode::Char(c) => char_code(c.to_ascii_lowercase())?,
            KeyCode::F(n) => function_code(n)?,
            KeyCode::Enter => Code::Enter,
            KeyCode::Tab => Code::Tab,
            KeyCode::Esc => Code::Escape,
            KeyCode::Backspace => Code::Backspace,
            KeyCode::Insert => Code::Insert,
            KeyCode::Delete => Code::Delete,
            KeyCode::Home => Code::Home,
            KeyCode::End => Code::End,
            KeyCode::PageUp => Code::PageUp,
            KeyCode::PageDown => Code::PageDown,
            KeyCode::Up => Code::ArrowUp,
            KeyCode::Down => Code::ArrowDown,
            KeyCode::Left => Code::ArrowLeft,
            KeyCode::Right => Code::ArrowRight,
            _ => return None,
        };

        let mut mods = Modifiers::empty();
        for (ours, theirs) in [
            (KeyModifiers::CONTROL, Modifiers::CONTROL),
            (KeyModifiers::ALT, Modifiers::ALT),
            (KeyModifiers::SHIFT, Modifiers::SHIFT),
            (KeyModifiers::SUPER, Modifiers::SUPER),
        ] {
            if self.modifiers.contains(ours) {
                mods |= theirs;
            }
        }
        Some(HotKey::new(Some(mods), code))
    }
}

fn char_code(c: char) -> Option<Code> {
    let code = match c {
        'a' => Code::KeyA,
        'b' => Code::KeyB,
        'c' => Code::KeyC,
        'd' => Code::KeyD,
        'e' => Code::KeyE,
        'f' => Code::KeyF,
        'g' => Code::KeyG,
        'h' => Code::KeyH,
        'i' => Code::KeyI,
        'j' => Code::KeyJ,
        'k' => Code::KeyK,
        'l' => Code::KeyL,
        'm' => Code::KeyM,
        'n' => Code::KeyN,
        'o' => Code::KeyO,
        'p' => Code::KeyP,
        'q' => Code::KeyQ,
        'r' => Code::KeyR,
        's' => Code::KeyS,
        't' => Code::KeyT,
        'u' => Code::KeyU,
        'v' => Code::KeyV,
        'w' => Code::KeyW,
        'x' => Code::KeyX,
        'y' => Code::KeyY,
        'z' => Code::KeyZ,
        '0' => Code::Digit0,
        '1' => Code::Digit1,
        '2' => Code::Digit2,
        '3' => Code::Digit3,
        '4' => Code::Digit4,
        '5' => Code::Digit5,
        '6' => Code::Digit6,
        '7' => Code::Digit7,
        '8' => Code::Digit8,
        '9' => Code::Digit9,
        ' ' => Code::Space,
        '-' => Code::Minus,
        '=' => Code::Equal,
        ',' => Code::Comma,
        '.' => Code::Period,
        '/' => Code::Slash,
        ';' => Code::Semicolon,
        '\'' => Code::Quote,
        '[' => Code::BracketLeft,
        ']' => Code::BracketRight,
        '\\' => Code::Backslash,
        '`' => Code::Backquote,
        _ => return None,
    };
    Some(code)
}

fn function_code(n: u8) -> Option<Code> {
    let code = match n {
        1 => Code::F1,
        2 => Code::F2,
        3 => Code::F3,
        4 => Code::F4,
        5 => Code::F5,
        6 => Code::F6,
        7 => Code::F7,
        8 => Code::F8,
        9 => Code::F9,
        10 => Code::F10,
        11 => Code::F11,
        12 => Code::F12,
        13 => Code::F13,
        14 => Code::F14,
        15 => Code::F15,
        16 => Code::F16,
        17 => Code::F17,
        18 => Code::F18,
        19 => Code::F19,
        20 => Code::F20,
        21 => Code::F21,
        22 => Code::F22,
        23 => Code::F23,
        24 => Code::F24,
        _ => return None,
    };
    Some(code)
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = Vec::new();
        if self.modifiers.contains(KeyModifiers::CONTROL) {
            parts.push("Ctrl".into());
        }
        if self.modifiers.contains(KeyModifiers::ALT) {
            parts.push("Alt".into());
        }
        if self.modifiers.contains(KeyModifiers::SHIFT) {
            parts.push("Shift".into());
        }
        if self.modifiers.contains(KeyModifiers::SUPER) {
            parts.push("Win".into());
        }
        parts.push(match self.code {
            KeyCode::Char(' ') => "Space".into(),
            KeyCode::Char(c) => c.to_ascii_uppercase().to_string(),
            KeyCode::F(n) => format!("F{}", n),
            KeyCode::Esc => "Esc".into(),
            KeyCode::PageUp => "PageUp".into(),
            KeyCode::PageDown => "PageDown".into(),
            other => format!("{:?}", other),
        });
        f.write_str(&parts.join(" + "))
    }
}

/// Normalises a user-entered hotkey string for display:
/// `ctrl+alt+b` becomes `Ctrl + Alt + B`.
pub fn format_hotkey_display(hotkey: &str) -> String {
    if hotkey.trim().is_empty() {
        return String::new();
    }
    hotkey
        .split('+')
        .map(str::trim)
        .map(|part| {
            if part.chars().count() == 1 {
                return part.to_uppercase();
            }
            let lower = part.to_lowercase();
            let mut chars = lower.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" + ")
}

/// Listens for the toggle hotkey and dashboard keys on background threads
/// and turns them into [`SessionEvent`]s. It never touches the rule
/// controller itself.
///
/// The hotkey is registered system-wide so it works while another window
/// (the game) has focus. If the OS refuses the registration, the hotkey is
/// matched against terminal key presses instead.
#[derive(Default)]
pub struct HotkeyListener {
    keys: Option<JoinHandle<()>>,
    global: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts listening, replacing any earlier listener. With no hotkey only
    /// plain key presses are forwarded.
    pub fn register(&mut self, hotkey: Option<Hotkey>, tx: UnboundedSender<SessionEvent>) -> bool {
        self.unregister();

        let stop = Arc::new(AtomicBool::new(false));
        self.stop = stop.clone();

        self.global = hotkey.and_then(|hotkey| spawn_global(hotkey, tx.clone(), stop.clone()));
        let local = match self.global {
            Some(_) => None,
            None => hotkey,
        };

        let spawned = std::thread::Builder::new()
            .name("key-listener".into())
            .spawn(move || listen_terminal(local, tx, stop));

        match spawned {
            Ok(handle) => {
                match (hotkey, self.global.is_some()) {
                    (Some(hotkey), true) => info!(%hotkey, "global hotkey registered"),
                    (Some(hotkey), false) => {
                        warn!(%hotkey, "hotkey only active while the dashboard has focus")
                    }
                    (None, _) => debug!("key listener started without hotkey"),
                }
                self.keys = Some(handle);
                true
            }
            Err(e) => {
                error!(error = %e, "failed to start key listener");
                self.unregister();
                false
            }
        }
    }

    /// Releases the hotkey and stops the listener threads. Returns whether
    /// anything was running.
    pub fn unregister(&mut self) -> bool {
        let handles: Vec<_> = [self.global.take(), self.keys.take()]
            .into_iter()
            .flatten()
            .collect();
        if handles.is_empty() {
            return false;
        }
        self.stop.store(true, Ordering::SeqCst);
        for handle in handles {
            if handle.join().is_err() {
                error!("key listener panicked");
            }
        }
        debug!("key listener stopped");
        true
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// Registers `hotkey` with the OS on its own thread. Returns `None` when
/// the registration failed; the thread has exited by then.
fn spawn_global(
    hotkey: Hotkey,
    tx: UnboundedSender<SessionEvent>,
    stop: Arc<AtomicBool>,
) -> Option<JoinHandle<()>> {
    // Only Windows gets a message pump here; other platforms use the
    // terminal fallback.
    if !cfg!(windows) {
        return None;
    }
    let Some(chord) = hotkey.to_global() else {
        warn!(%hotkey, "key cannot be registered as a global hotkey");
        return None;
    };

    let (ready_tx, ready_rx) = std_mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("global-hotkey".into())
        .spawn(move || listen_global(chord, tx, stop, ready_tx));
    let handle = match spawned {
        Ok(handle) => handle,
        Err(e) => {
            error!(error = %e, "failed to start global hotkey thread");
            return None;
        }
    };

    if ready_rx.recv().unwrap_or(false) {
        Some(handle)
    } else {
        let _ = handle.join();
        None
    }
}

fn listen_global(
    chord: HotKey,
    tx: UnboundedSender<SessionEvent>,
    stop: Arc<AtomicBool>,
    ready: std_mpsc::Sender<bool>,
) {
    // The manager must live on the thread that pumps its messages.
    let manager = match GlobalHotKeyManager::new() {
        Ok(manager) => manager,
        Err(e) => {
            warn!(error = %e, "global hotkeys unavailable");
            let _ = ready.send(false);
            return;
        }
    };
    if let Err(e) = manager.register(chord) {
        warn!(error = %e, "global hotkey registration failed");
        let _ = ready.send(false);
        return;
    }
    let _ = ready.send(true);

    let receiver = GlobalHotKeyEvent::receiver();
    'outer: while !stop.load(Ordering::SeqCst) {
        pump_messages();
        while let Ok(event) = receiver.try_recv() {
            if event.id != chord.id() || !matches!(event.state, HotKeyState::Pressed) {
                continue;
            }
            debug!("global hotkey pressed");
            let toggle = SessionEvent::Toggle {
                source: ToggleSource::Hotkey,
            };
            if tx.send(toggle).is_err() {
                break 'outer;
            }
        }
        std::thread::sleep(GLOBAL_POLL_INTERVAL);
    }

    if let Err(e) = manager.unregister(chord) {
        warn!(error = %e, "global hotkey unregistration failed");
    }
}

/// Dispatches pending window messages so hotkey presses reach the manager.
#[cfg(windows)]
fn pump_messages() {
    use windows::Win32::Foundation::HWND;
    use windows::Win32::UI::WindowsAndMessaging::{
        DispatchMessageW, PeekMessageW, TranslateMessage, MSG, PM_REMOVE,
    };

    // SAFETY: `msg` is a valid, owned MSG for the duration of each call.
    unsafe {
        let mut msg = MSG::default();
        while PeekMessageW(&mut msg, HWND(0), 0, 0, PM_REMOVE).as_bool() {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }
}

#[cfg(not(windows))]
fn pump_messages() {}

fn listen_terminal(hotkey: Option<Hotkey>, tx: UnboundedSender<SessionEvent>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        match event::poll(POLL_INTERVAL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(e) => {
                error!(error = %e, "polling terminal events failed");
                return;
            }
        }

        let event = match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                if hotkey.is_some_and(|h| h.matches(&key)) {
                    debug!("hotkey pressed");
                    SessionEvent::Toggle {
                        source: ToggleSource::Hotkey,
                    }
                } else {
                    SessionEvent::Key(key)
                }
            }
            Ok(Event::Resize(..)) => SessionEvent::Redraw,
            Ok(_) => continue,
            Err(e) => {
                error!(error = %e, "reading terminal event failed");
                return;
            }
        };

        if tx.send(event).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn press(code: KeyCode, modifiers: KeyModifiers) -> KeyEvent {
        KeyEvent::new(code, modifiers)
    }

    #[test]
    fn parses_modifiers_and_key() {
        let hotkey: Hotkey = "ctrl+alt+b".parse().unwrap();
        assert_eq!(hotkey.modifiers, KeyModifiers::CONTROL | KeyModifiers::ALT);
        assert_eq!(hotkey.code, KeyCode::Char('b'));

        let hotkey: Hotkey = "Shift + F9".parse().unwrap();
        assert_eq!(hotkey.modifiers, KeyModifiers::SHIFT);
        assert_eq!(hotkey.code, KeyCode::F(9));
    }

    #[test]
    fn rejects_malformed_hotkeys() {
        assert!("ctrl+".parse::<Hotkey>().is_err());
        assert!("ctrl+alt".parse::<Hotkey>().is_err());
        assert!("a+b".parse::<Hotkey>().is_err());
        assert!("ctrl+banana".parse::<Hotkey>().is_err());
        assert!("f30".parse::<Hotkey>().is_err());
    }

    #[test]
    fn display_round_trips_through_parse() {
        let hotkey: Hotkey = "alt+ctrl+space".parse().unwrap();
        assert_eq!(hotkey.to_string(), "Ctrl + Alt + Space");
        assert_eq!(hotkey.to_string().parse::<Hotkey>().unwrap(), hotkey);
    }

    #[test]
    fn matches_letters_case_insensitively() {
        let hotkey: Hotkey = "ctrl+B".parse().unwrap();
        assert!(hotkey.matches(&press(KeyCode::Char('b'), KeyModifiers::CONTROL)));
        assert!(!hotkey.matches(&press(KeyCode::Char('b'), KeyModifiers::NONE)));
        assert!(!hotkey.matches(&press(KeyCode::Char('b'), KeyModifiers::ALT)));
    }

    #[test]
    fn shift_distinguishes_letter_chords() {
        let plain: Hotkey = "ctrl+b".parse().unwrap();
        let shifted: Hotkey = "ctrl+shift+b".parse().unwrap();
        let ctrl_b = press(KeyCode::Char('b'), KeyModifiers::CONTROL);
        let ctrl_shift_b = press(
            KeyCode::Char('B'),
            KeyModifiers::CONTROL | KeyModifiers::SHIFT,
        );
        // Upper case without the SHIFT flag, as some terminals send it.
        let ctrl_upper_b = press(KeyCode::Char('B'), KeyModifiers::CONTROL);

        assert!(plain.matches(&ctrl_b));
        assert!(!plain.matches(&ctrl_shift_b));
        assert!(!plain.matches(&ctrl_upper_b));

        assert!(!shifted.matches(&ctrl_b));
        assert!(shifted.matches(&ctrl_shift_b));
        assert!(shifted.matches(&ctrl_upper_b));
    }

    #[test]
    fn converts_to_system_hotkey() {
        let hotkey: Hotkey = "ctrl+alt+b".parse().unwrap();
        let global = hotkey.to_global().unwrap();
        assert_eq!(global.key, Code::KeyB);
        assert_eq!(global.mods, Modifiers::CONTROL | Modifiers::ALT);

        let hotkey: Hotkey = "shift+f9".parse().unwrap();
        let global = hotkey.to_global().unwrap();
        assert_eq!(global.key, Code::F9);
        assert_eq!(global.mods, Modifiers::SHIFT);

        let hotkey: Hotkey = "win+space".parse().unwrap();
        assert_eq!(hotkey.to_global().unwrap().key, Code::Space);

        let hotkey: Hotkey = "ctrl+ä".parse().unwrap();
        assert!(hotkey.to_global().is_none());
    }

    #[test]
    fn same_chord_gets_same_registration_id() {
        let a: Hotkey = "ctrl+alt+b".parse().unwrap();
        let b: Hotkey = "Alt + Ctrl + B".parse().unwrap();
        let c: Hotkey = "ctrl+shift+b".parse().unwrap();
        assert_eq!(a.to_global().unwrap().id(), b.to_global().unwrap().id());
        assert_ne!(a.to_global().unwrap().id(), c.to_global().unwrap().id());
    }

    #[test]
    fn unregister_without_register_is_noop() {
        let mut listener = HotkeyListener::new();
        assert!(!listener.unregister());
    }

    #[test]
    fn ignores_key_release() {
        let hotkey: Hotkey = "f8".parse().unwrap();
        let mut event = press(KeyCode::F(8), KeyModifiers::NONE);
        assert!(hotkey.matches(&event));
        event.kind = KeyEventKind::Release;
        assert!(!hotkey.matches(&event));
    }

    #[test]
    fn formats_display_strings() {
        assert_eq!(format_hotkey_display("ctrl+alt+b"), "Ctrl + Alt + B");
        assert_eq!(format_hotkey_display("shift + f5"), "Shift + F5");
        assert_eq!(format_hotkey_display("win+SPACE"), "Win + Space");
        assert_eq!(format_hotkey_display(""), "");
    }
}
