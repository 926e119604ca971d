use std::ffi::c_uint;

use enumset::{EnumSet, EnumSetType};

pub const REPEAT_DELAY_US: u64 = 300_000;
pub const REPEAT_INTERVAL_US: u64 = 100_000;
pub const MENU_TAP_US: u64 = 300_000;

/// Analog values inside ~30% of full range clamp to zero; the rest remaps
/// linearly onto the full range.
pub const DEADZONE: i16 = 9830;

const BUTTON_COUNT: usize = 20;

#[derive(EnumSetType, Debug)]
pub enum Button {
    Up,
    Down,
    Left,
    Right,
    A,
    B,
    X,
    Y,
    Start,
    Select,
    L,
    L2,
    L3,
    R,
    R2,
    R3,
    Menu,
    Power,
    VolUp,
    VolDown,
}

impl Button {
    pub fn from_raw_retro_joypad_device_id(device_id_joypad: c_uint) -> Option<Self> {
        Some(match device_id_joypad {
            libretro_sys::DEVICE_ID_JOYPAD_UP => Button::Up,
            libretro_sys::DEVICE_ID_JOYPAD_DOWN => Button::Down,
            libretro_sys::DEVICE_ID_JOYPAD_LEFT => Button::Left,
            libretro_sys::DEVICE_ID_JOYPAD_RIGHT => Button::Right,
            libretro_sys::DEVICE_ID_JOYPAD_A => Button::A,
            libretro_sys::DEVICE_ID_JOYPAD_B => Button::B,
            libretro_sys::DEVICE_ID_JOYPAD_X => Button::X,
            libretro_sys::DEVICE_ID_JOYPAD_Y => Button::Y,
            libretro_sys::DEVICE_ID_JOYPAD_SELECT => Button::Select,
            libretro_sys::DEVICE_ID_JOYPAD_START => Button::Start,
            libretro_sys::DEVICE_ID_JOYPAD_L => Button::L,
            libretro_sys::DEVICE_ID_JOYPAD_L2 => Button::L2,
            libretro_sys::DEVICE_ID_JOYPAD_L3 => Button::L3,
            libretro_sys::DEVICE_ID_JOYPAD_R => Button::R,
            libretro_sys::DEVICE_ID_JOYPAD_R2 => Button::R2,
            libretro_sys::DEVICE_ID_JOYPAD_R3 => Button::R3,
            _ => return None,
        })
    }
}

/// One batch of native events as the platform saw them, before debouncing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawInput {
    pub buttons: EnumSet<Button>,
    pub left: (i16, i16),
    pub right: (i16, i16),
}

/// What the core's input-state callback reads for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct PadSnapshot {
    pub buttons: EnumSet<Button>,
    pub left: (i16, i16),
    pub right: (i16, i16),
}

/// Debounced pad state. `poll` ingests one native batch and computes edge
/// flags valid until the next `poll`; all queries are side-effect-free.
pub struct Pad {
    held: EnumSet<Button>,
    just_pressed: EnumSet<Button>,
    just_released: EnumSet<Button>,
    just_repeated: EnumSet<Button>,
    repeat_due: [u64; BUTTON_COUNT],
    left: (i16, i16),
    right: (i16, i16),
    menu_down_at: Option<u64>,
    menu_combo: bool,
    tapped_menu: bool,
}

impl Pad {
    pub fn new() -> Self {
        Self {
            held: EnumSet::empty(),
            just_pressed: EnumSet::empty(),
            just_released: EnumSet::empty(),
            just_repeated: EnumSet::empty(),
            repeat_due: [0; BUTTON_COUNT],
            left: (0, 0),
            right: (0, 0),
            menu_down_at: None,
            menu_combo: false,
            tapped_menu: false,
        }
    }

    pub fn poll(&mut self, raw: RawInput, now_us: u64) {
        let mut buttons = raw.buttons;

        // Opposing d-pad directions cancel.
        if buttons.is_superset(Button::Up | Button::Down) {
            buttons -= Button::Up | Button::Down;
        }
        if buttons.is_superset(Button::Left | Button::Right) {
            buttons -= Button::Left | Button::Right;
        }

        self.just_pressed = buttons - self.held;
        self.just_released = self.held - buttons;
        self.just_repeated = EnumSet::empty();

        for button in buttons {
            let slot = button as usize;

            if self.just_pressed.contains(button) {
                self.repeat_due[slot] = now_us + REPEAT_DELAY_US;
            } else if now_us >= self.repeat_due[slot] {
                self.just_repeated |= button;
                self.repeat_due[slot] = now_us + REPEAT_INTERVAL_US;
            }
        }

        self.update_menu_tap(buttons, now_us);

        self.held = buttons;
        self.left = remap_stick(raw.left);
        self.right = remap_stick(raw.right);
    }

    /// Menu tap: pressed and released within the tap window with no other
    /// button touched. Anything else is a Menu+combo and never a tap.
    fn update_menu_tap(&mut self, buttons: EnumSet<Button>, now_us: u64) {
        self.tapped_menu = false;

        let others = buttons - Button::Menu;

        if self.just_pressed.contains(Button::Menu) {
            self.menu_down_at = Some(now_us);
            self.menu_combo = !others.is_empty();
        } else if self.menu_down_at.is_some() && !others.is_empty() {
            self.menu_combo = true;
        }

        if self.just_released.contains(Button::Menu) {
            if let Some(down_at) = self.menu_down_at.take() {
                self.tapped_menu =
                    !self.menu_combo && now_us.saturating_sub(down_at) <= MENU_TAP_US;
            }

            self.menu_combo = false;
        }
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.held.contains(button)
    }

    pub fn just_pressed(&self, button: Button) -> bool {
        self.just_pressed.contains(button)
    }

    pub fn just_released(&self, button: Button) -> bool {
        self.just_released.contains(button)
    }

    pub fn just_repeated(&self, button: Button) -> bool {
        self.just_repeated.contains(button)
    }

    /// Pressed now, or the repeat timer fired this poll. The menu scrolls
    /// on this.
    pub fn pressed_or_repeated(&self, button: Button) -> bool {
        self.just_pressed(button) || self.just_repeated(button)
    }

    pub fn tapped_menu(&self) -> bool {
        self.tapped_menu
    }

    pub fn snapshot(&self) -> PadSnapshot {
        PadSnapshot {
            buttons: self.held,
            left: self.left,
            right: self.right,
        }
    }
}

impl Default for Pad {
    fn default() -> Self {
        Self::new()
    }
}

fn remap_stick(raw: (i16, i16)) -> (i16, i16) {
    (remap_axis(raw.0), remap_axis(raw.1))
}

fn remap_axis(value: i16) -> i16 {
    let magnitude = (value as i32).unsigned_abs().min(32767);

    if magnitude <= DEADZONE as u32 {
        return 0;
    }

    let span = (32767 - DEADZONE as i32) as u32;
    let scaled = (magnitude - DEADZONE as u32) * 32767 / span;

    if value < 0 {
        -(scaled as i32) as i16
    } else {
        scaled as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(buttons: EnumSet<Button>) -> RawInput {
        RawInput {
            buttons,
            ..RawInput::default()
        }
    }

    #[test]
    fn just_pressed_fires_in_exactly_one_poll_cycle() {
        let mut pad = Pad::new();

        pad.poll(raw(Button::A.into()), 0);
        assert!(pad.just_pressed(Button::A));

        pad.poll(raw(Button::A.into()), 16_000);
        assert!(!pad.just_pressed(Button::A));
        assert!(pad.is_pressed(Button::A));

        pad.poll(raw(EnumSet::empty()), 32_000);
        assert!(pad.just_released(Button::A));

        pad.poll(raw(EnumSet::empty()), 48_000);
        assert!(!pad.just_released(Button::A));
    }

    #[test]
    fn repeat_fires_after_delay_then_interval() {
        let mut pad = Pad::new();

        pad.poll(raw(Button::Down.into()), 0);
        pad.poll(raw(Button::Down.into()), 200_000);
        assert!(!pad.just_repeated(Button::Down));

        pad.poll(raw(Button::Down.into()), 300_000);
        assert!(pad.just_repeated(Button::Down));

        pad.poll(raw(Button::Down.into()), 350_000);
        assert!(!pad.just_repeated(Button::Down));

        pad.poll(raw(Button::Down.into()), 400_000);
        assert!(pad.just_repeated(Button::Down));
    }

    #[test]
    fn opposing_dpad_directions_cancel() {
        let mut pad = Pad::new();

        pad.poll(raw(Button::Left | Button::Right | Button::Up), 0);

        assert!(!pad.is_pressed(Button::Left));
        assert!(!pad.is_pressed(Button::Right));
        assert!(pad.is_pressed(Button::Up));
    }

    #[test]
    fn menu_tap_detected_on_quick_clean_release() {
        let mut pad = Pad::new();

        pad.poll(raw(Button::Menu.into()), 0);
        assert!(!pad.tapped_menu());

        pad.poll(raw(EnumSet::empty()), 150_000);
        assert!(pad.tapped_menu());

        pad.poll(raw(EnumSet::empty()), 166_000);
        assert!(!pad.tapped_menu());
    }

    #[test]
    fn menu_combo_or_slow_release_is_not_a_tap() {
        let mut pad = Pad::new();

        // Menu+VolUp combo.
        pad.poll(raw(Button::Menu.into()), 0);
        pad.poll(raw(Button::Menu | Button::VolUp), 50_000);
        pad.poll(raw(EnumSet::empty()), 100_000);
        assert!(!pad.tapped_menu());

        // Held past the tap window.
        pad.poll(raw(Button::Menu.into()), 0);
        pad.poll(raw(EnumSet::empty()), 400_000);
        assert!(!pad.tapped_menu());
    }

    #[test]
    fn deadzone_clamps_and_remaps_linearly() {
        assert_eq!(remap_axis(0), 0);
        assert_eq!(remap_axis(DEADZONE), 0);
        assert_eq!(remap_axis(-DEADZONE), 0);
        assert_eq!(remap_axis(32767), 32767);
        assert_eq!(remap_axis(-32767), -32767);

        let mid = remap_axis((DEADZONE as i32 + (32767 - DEADZONE as i32) / 2) as i16);
        assert!((mid - 16383).abs() <= 1, "{mid}");
    }
}
