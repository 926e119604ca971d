use std::fs;
use std::thread;
use std::time::{Duration, Instant};

use enumset::EnumSet;
use gilrs::{Axis, EventType, Gilrs};
use log::{debug, info, warn};
use minifb::{Key, Scale, Window, WindowOptions};

use crate::error::{FrontendError, Result};
use crate::pad::{Button, RawInput};
use crate::paths::Paths;

/// Per-device constants: logical surface size and which abstract buttons
/// physically exist.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub name: String,
    pub width: usize,
    pub height: usize,
    pub buttons: EnumSet<Button>,
}

fn full_button_set() -> EnumSet<Button> {
    EnumSet::all()
}

fn compact_button_set() -> EnumSet<Button> {
    // No thumb-stick clicks or sticks on the compact boards.
    EnumSet::all() - Button::L3 - Button::R3
}

pub fn device_spec(platform: &str, device: &str) -> DeviceSpec {
    let (width, height, buttons) = match (platform, device) {
        ("tg5040", "brick") => (1024, 768, compact_button_set()),
        ("tg5040", _) => (1280, 720, full_button_set()),
        ("rg35xx", _) => (640, 480, compact_button_set()),
        ("miyoomini", _) => (640, 480, compact_button_set()),
        _ => (640, 480, full_button_set()),
    };

    DeviceSpec {
        name: format!("{platform}/{device}"),
        width,
        height,
        buttons,
    }
}

/// Uniform surface, input, time, and power access for one device. The
/// window doubles as the event pump; gamepads come in over gilrs and merge
/// with the keyboard for bench use.
pub struct Platform {
    window: Window,
    gilrs: Option<Gilrs>,
    spec: DeviceSpec,
    epoch: Instant,
    pad_held: EnumSet<Button>,
    left: (i16, i16),
    right: (i16, i16),
}

impl Platform {
    pub fn init(paths: &Paths) -> Result<Self> {
        let spec = device_spec(&paths.platform, &paths.device);
        info!(
            "platform {}: {}x{} surface",
            spec.name, spec.width, spec.height
        );

        let title = paths.rom_basename();
        let mut window = Window::new(
            &title,
            spec.width,
            spec.height,
            WindowOptions {
                resize: false,
                scale: Scale::X1,
                ..WindowOptions::default()
            },
        )
        .map_err(|err| FrontendError::PlatformInit(format!("surface unavailable: {err}")))?;

        // The tick loop owns pacing; the window must not add its own.
        window.limit_update_rate(None);

        let gilrs = match Gilrs::new() {
            Ok(gilrs) => Some(gilrs),
            Err(err) => {
                warn!("gamepad support unavailable: {err}");
                None
            }
        };

        Ok(Self {
            window,
            gilrs,
            spec,
            epoch: Instant::now(),
            pad_held: EnumSet::empty(),
            left: (0, 0),
            right: (0, 0),
        })
    }

    pub fn spec(&self) -> &DeviceSpec {
        &self.spec
    }

    /// Monotonic microsecond clock.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    /// Sleeps until the deadline: coarse sleep for the bulk, then a short
    /// spin for the tail so the tick start stays precise.
    pub fn sleep_until(&self, deadline_us: u64) {
        loop {
            let now = self.now_us();

            if now >= deadline_us {
                return;
            }

            let remaining = deadline_us - now;

            if remaining > 2_000 {
                thread::sleep(Duration::from_micros(remaining - 1_000));
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Ingests the native event batch and reports the merged raw state.
    pub fn pump(&mut self) -> RawInput {
        if let Some(gilrs) = self.gilrs.as_mut() {
            while let Some(event) = gilrs.next_event() {
                match event.event {
                    EventType::ButtonPressed(button, _) => {
                        if let Some(button) = map_gilrs_button(button) {
                            self.pad_held |= button;
                        }
                    }
                    EventType::ButtonReleased(button, _) => {
                        if let Some(button) = map_gilrs_button(button) {
                            self.pad_held -= button;
                        }
                    }
                    EventType::AxisChanged(axis, value, _) => {
                        let scaled = (value.clamp(-1.0, 1.0) * 32_767.0) as i16;

                        match axis {
                            Axis::LeftStickX => self.left.0 = scaled,
                            Axis::LeftStickY => self.left.1 = scaled,
                            Axis::RightStickX => self.right.0 = scaled,
                            Axis::RightStickY => self.right.1 = scaled,
                            _ => {}
                        }
                    }
                    EventType::Disconnected => {
                        self.pad_held = EnumSet::empty();
                        self.left = (0, 0);
                        self.right = (0, 0);
                    }
                    _ => {}
                }
            }
        }

        let mut buttons = self.pad_held;

        for key in self.window.get_keys() {
            if let Some(button) = map_key(key) {
                buttons |= button;
            }
        }

        RawInput {
            buttons: buttons & self.spec.buttons,
            left: self.left,
            right: self.right,
        }
    }

    /// Pushes the finished surface out. Also services the window's event
    /// queue, so it must run every tick even when the frame was dropped.
    pub fn present(&mut self, surface: &[u32]) -> Result<()> {
        self.window
            .update_with_buffer(surface, self.spec.width, self.spec.height)
            .map_err(|err| FrontendError::PlatformInit(format!("surface lost: {err}")))
    }

    /// The platform asked us to go away (window closed, power key).
    pub fn wants_close(&self) -> bool {
        !self.window.is_open()
    }

    pub fn battery_percent(&self) -> Option<u8> {
        let supplies = fs::read_dir("/sys/class/power_supply").ok()?;

        for entry in supplies.filter_map(|entry| entry.ok()) {
            let capacity = entry.path().join("capacity");

            if let Ok(text) = fs::read_to_string(&capacity) {
                if let Ok(percent) = text.trim().parse::<u8>() {
                    return Some(percent.min(100));
                }
            }
        }

        None
    }

    /// Maps the CPU speed option onto the cpufreq governor. Missing sysfs
    /// nodes make this a logged no-op, which is what desktop runs hit.
    pub fn set_cpu_speed(&self, value: &str) {
        let governor = match value {
            "Powersave" => "powersave",
            "Performance" => "performance",
            _ => "ondemand",
        };

        let node = "/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor";

        match fs::write(node, governor) {
            Ok(()) => info!("cpu governor set to {governor}"),
            Err(err) => debug!("cpu governor not set ({err})"),
        }
    }
}

fn map_gilrs_button(button: gilrs::Button) -> Option<Button> {
    Some(match button {
        gilrs::Button::DPadUp => Button::Up,
        gilrs::Button::DPadDown => Button::Down,
        gilrs::Button::DPadLeft => Button::Left,
        gilrs::Button::DPadRight => Button::Right,
        gilrs::Button::East => Button::A,
        gilrs::Button::South => Button::B,
        gilrs::Button::North => Button::X,
        gilrs::Button::West => Button::Y,
        gilrs::Button::Start => Button::Start,
        gilrs::Button::Select => Button::Select,
        gilrs::Button::Mode => Button::Menu,
        gilrs::Button::LeftTrigger => Button::L,
        gilrs::Button::LeftTrigger2 => Button::L2,
        gilrs::Button::LeftThumb => Button::L3,
        gilrs::Button::RightTrigger => Button::R,
        gilrs::Button::RightTrigger2 => Button::R2,
        gilrs::Button::RightThumb => Button::R3,
        _ => return None,
    })
}

fn map_key(key: Key) -> Option<Button> {
    Some(match key {
        Key::Up => Button::Up,
        Key::Down => Button::Down,
        Key::Left => Button::Left,
        Key::Right => Button::Right,
        Key::X => Button::A,
        Key::Z => Button::B,
        Key::S => Button::X,
        Key::A => Button::Y,
        Key::Q => Button::L,
        Key::W => Button::R,
        Key::Key1 => Button::L2,
        Key::Key2 => Button::R2,
        Key::Enter => Button::Start,
        Key::RightShift => Button::Select,
        Key::Escape => Button::Menu,
        Key::Minus => Button::VolDown,
        Key::Equal => Button::VolUp,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_devices_have_specs() {
        let brick = device_spec("tg5040", "brick");
        assert_eq!((brick.width, brick.height), (1024, 768));
        assert!(!brick.buttons.contains(Button::L3));

        let fallback = device_spec("unknown", "unknown");
        assert_eq!((fallback.width, fallback.height), (640, 480));
        assert!(fallback.buttons.contains(Button::L3));
    }

    #[test]
    fn keyboard_map_covers_the_navigation_cluster() {
        assert_eq!(map_key(Key::X), Some(Button::A));
        assert_eq!(map_key(Key::Escape), Some(Button::Menu));
        assert_eq!(map_key(Key::F12), None);
    }
}
