//! Linux input sources backed by evdev (`/dev/input/event*`).

use std::collections::VecDeque;
use std::fs::File;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use ducktrack_common::config::CaptureSettings;
use ducktrack_common::error::{DucktrackError, DucktrackResult};
use ducktrack_event_model::{InputAction, MouseButton};
use evdev::{Device, InputEventKind, Key, RelativeAxisType};

use super::normalize_key_name;
use crate::{InputSource, InputSourceFactory, ListenerKind};

/// Keyboard key codes end where the button range starts.
const FIRST_BUTTON_CODE: u16 = 0x100;

/// evdev key value for autorepeat.
const KEY_REPEAT: i32 = 2;

const INPUT_DIR: &str = "/dev/input";

struct OpenDevice {
    path: PathBuf,
    device: Device,
}

/// Put the device fd into non-blocking mode so `fetch_events` returns
/// `WouldBlock` instead of parking the listener thread.
fn set_nonblocking(device: &Device) -> std::io::Result<()> {
    let fd = device.as_raw_fd();
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn open_matching(
    kind: ListenerKind,
    matches: impl Fn(&Device) -> bool,
) -> DucktrackResult<Vec<OpenDevice>> {
    let mut devices = Vec::new();
    for (path, device) in evdev::enumerate() {
        if !matches(&device) {
            continue;
        }
        match set_nonblocking(&device) {
            Ok(()) => {
                tracing::debug!(
                    listener = %kind,
                    path = %path.display(),
                    name = device.name().unwrap_or("unknown"),
                    "Opened input device"
                );
                devices.push(OpenDevice { path, device });
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Skipping input device");
            }
        }
    }

    if devices.is_empty() {
        return Err(no_device_error(kind));
    }
    Ok(devices)
}

/// `enumerate()` silently skips nodes it cannot open, so tell a missing
/// device apart from one we are not allowed to read.
fn no_device_error(kind: ListenerKind) -> DucktrackError {
    let message = format!("no readable {kind} device; {}", input_device_diagnostic());
    let denied = event_nodes(INPUT_DIR)
        .map(|nodes| all_denied(nodes.iter().map(|node| File::open(node).map(drop))))
        .unwrap_or(false);
    if denied {
        DucktrackError::permission_denied(message)
    } else {
        DucktrackError::listener(message)
    }
}

/// True when there was at least one open attempt and every one was refused.
fn all_denied(attempts: impl IntoIterator<Item = std::io::Result<()>>) -> bool {
    let mut any = false;
    for attempt in attempts {
        match attempt {
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => any = true,
            _ => return false,
        }
    }
    any
}

fn event_nodes(dir: &str) -> std::io::Result<Vec<PathBuf>> {
    Ok(std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|e| e.file_name().to_string_lossy().starts_with("event"))
        .map(|e| e.path())
        .collect())
}

/// Read every pending event from every device, in device order.
fn fetch_all(devices: &mut [OpenDevice]) -> DucktrackResult<Vec<evdev::InputEvent>> {
    let mut batch = Vec::new();
    for open in devices.iter_mut() {
        match open.device.fetch_events() {
            Ok(events) => batch.extend(events),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(e) => {
                return Err(DucktrackError::listener(format!(
                    "failed reading {}: {e}",
                    open.path.display()
                )));
            }
        }
    }
    Ok(batch)
}

/// Opens [`EvdevPointerSource`]s over every relative pointing device.
pub struct EvdevPointerFactory {
    width: f64,
    height: f64,
}

impl EvdevPointerFactory {
    pub fn new(settings: &CaptureSettings) -> Self {
        Self {
            width: settings.screen_width.max(1) as f64,
            height: settings.screen_height.max(1) as f64,
        }
    }
}

impl InputSourceFactory for EvdevPointerFactory {
    fn kind(&self) -> ListenerKind {
        ListenerKind::Pointer
    }

    fn open(&self) -> DucktrackResult<Box<dyn InputSource>> {
        let devices = open_matching(ListenerKind::Pointer, |device| {
            device.supported_relative_axes().is_some_and(|axes| {
                axes.contains(RelativeAxisType::REL_X) && axes.contains(RelativeAxisType::REL_Y)
            })
        })?;

        Ok(Box::new(EvdevPointerSource {
            devices,
            pending: VecDeque::new(),
            x: self.width / 2.0,
            y: self.height / 2.0,
            moved: false,
            width: self.width,
            height: self.height,
        }))
    }
}

/// Relative pointer motion accumulated into absolute screen pixels.
///
/// evdev only reports deltas, so the position starts at the screen centre
/// and is clamped to the configured desktop size.
pub struct EvdevPointerSource {
    devices: Vec<OpenDevice>,
    pending: VecDeque<InputAction>,
    x: f64,
    y: f64,
    moved: bool,
    width: f64,
    height: f64,
}

impl EvdevPointerSource {
    fn process(&mut self, event: evdev::InputEvent) {
        match event.kind() {
            InputEventKind::RelAxis(axis) if axis == RelativeAxisType::REL_X => {
                self.x = (self.x + event.value() as f64).clamp(0.0, self.width - 1.0);
                self.moved = true;
            }
            InputEventKind::RelAxis(axis) if axis == RelativeAxisType::REL_Y => {
                self.y = (self.y + event.value() as f64).clamp(0.0, self.height - 1.0);
                self.moved = true;
            }
            InputEventKind::RelAxis(axis) if axis == RelativeAxisType::REL_WHEEL => {
                self.flush_motion();
                self.pending.push_back(InputAction::Scroll {
                    x: self.x,
                    y: self.y,
                    dx: 0.0,
                    dy: event.value() as f64,
                });
            }
            InputEventKind::RelAxis(axis) if axis == RelativeAxisType::REL_HWHEEL => {
                self.flush_motion();
                self.pending.push_back(InputAction::Scroll {
                    x: self.x,
                    y: self.y,
                    dx: event.value() as f64,
                    dy: 0.0,
                });
            }
            InputEventKind::Key(key) => {
                if let Some(button) = mouse_button(key) {
                    if event.value() == KEY_REPEAT {
                        return;
                    }
                    self.flush_motion();
                    self.pending.push_back(InputAction::Click {
                        x: self.x,
                        y: self.y,
                        button,
                        pressed: event.value() != 0,
                    });
                }
            }
            InputEventKind::Synchronization(_) => self.flush_motion(),
            _ => {}
        }
    }

    fn flush_motion(&mut self) {
        if self.moved {
            self.moved = false;
            self.pending.push_back(InputAction::Move {
                x: self.x,
                y: self.y,
            });
        }
    }
}

impl InputSource for EvdevPointerSource {
    fn poll(&mut self) -> DucktrackResult<Option<InputAction>> {
        if let Some(action) = self.pending.pop_front() {
            return Ok(Some(action));
        }

        for event in fetch_all(&mut self.devices)? {
            self.process(event);
        }
        Ok(self.pending.pop_front())
    }

    fn name(&self) -> &str {
        "evdev-pointer"
    }
}

fn mouse_button(key: Key) -> Option<MouseButton> {
    let button = if key == Key::BTN_LEFT {
        MouseButton::Left
    } else if key == Key::BTN_RIGHT {
        MouseButton::Right
    } else if key == Key::BTN_MIDDLE {
        MouseButton::Middle
    } else if key == Key::BTN_SIDE {
        MouseButton::Back
    } else if key == Key::BTN_EXTRA {
        MouseButton::Forward
    } else {
        return None;
    };
    Some(button)
}

/// Opens [`EvdevKeyboardSource`]s over every device with a letter row.
#[derive(Debug, Default)]
pub struct EvdevKeyboardFactory;

impl EvdevKeyboardFactory {
    pub fn new() -> Self {
        Self
    }
}

impl InputSourceFactory for EvdevKeyboardFactory {
    fn kind(&self) -> ListenerKind {
        ListenerKind::Keyboard
    }

    fn open(&self) -> DucktrackResult<Box<dyn InputSource>> {
        let devices = open_matching(ListenerKind::Keyboard, |device| {
            device
                .supported_keys()
                .is_some_and(|keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_ENTER))
        })?;

        Ok(Box::new(EvdevKeyboardSource {
            devices,
            pending: VecDeque::new(),
        }))
    }
}

/// Key presses and releases from keyboard devices. Autorepeat is reported
/// as repeated presses.
pub struct EvdevKeyboardSource {
    devices: Vec<OpenDevice>,
    pending: VecDeque<InputAction>,
}

impl InputSource for EvdevKeyboardSource {
    fn poll(&mut self) -> DucktrackResult<Option<InputAction>> {
        if let Some(action) = self.pending.pop_front() {
            return Ok(Some(action));
        }

        for event in fetch_all(&mut self.devices)? {
            if let InputEventKind::Key(key) = event.kind() {
                if key.code() >= FIRST_BUTTON_CODE {
                    continue;
                }
                let name = normalize_key_name(&format!("{key:?}"));
                let action = if event.value() == 0 {
                    InputAction::key_release(name)
                } else {
                    InputAction::key_press(name)
                };
                self.pending.push_back(action);
            }
        }
        Ok(self.pending.pop_front())
    }

    fn name(&self) -> &str {
        "evdev-keyboard"
    }
}

fn input_device_diagnostic() -> String {
    let dir = INPUT_DIR;
    let uid = unsafe { libc::geteuid() };
    let gid = unsafe { libc::getegid() };

    match event_nodes(dir) {
        Ok(nodes) => {
            let group = nodes
                .first()
                .and_then(|node| std::fs::metadata(node).ok())
                .map(|m| m.gid().to_string())
                .unwrap_or_else(|| "?".to_string());
            format!(
                "{} event nodes under {dir} owned by gid={group}, process uid={uid} gid={gid}; likely missing 'input' group membership. Fix: sudo usermod -aG input $USER && log out/in",
                nodes.len()
            )
        }
        Err(err) => format!(
            "{dir} unavailable ({err}); ensure kernel input devices exist and permissions allow read access"
        ),
    }
}
