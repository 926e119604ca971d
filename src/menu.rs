use crate::pad::{Button, Pad};
use crate::paths::SLOT_COUNT;
use crate::video::Presenter;

const ROW_HEIGHT: usize = 20;
const TEXT_SCALE: usize = 2;
const MARGIN: usize = 24;

const COLOR_TEXT: u32 = 0x00E0_E0E0;
const COLOR_DIM: u32 = 0x0080_8080;
const COLOR_CURSOR: u32 = 0x00FF_FF00;
const COLOR_TITLE: u32 = 0x00FF_FFFF;

/// Number of rows on the slots screen: the auto slot plus the numbered ones.
pub const SLOT_ROWS: usize = SLOT_COUNT as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotMode {
    Save,
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Main,
    Slots(SlotMode),
    Options,
    Cheats,
    Discs,
}

/// Read-only view of everything the menu can show. The session assembles
/// it on entry and after every applied command; the menu itself never
/// touches the host.
#[derive(Default)]
pub struct MenuSnapshot {
    pub frontend_options: Vec<OptionView>,
    pub core_options: Vec<OptionView>,
    pub cheats: Vec<CheatView>,
    pub disc_count: u32,
    pub disc_index: u32,
    pub slots_present: [bool; SLOT_ROWS],
}

pub struct OptionView {
    pub key: String,
    pub label: String,
    pub value: String,
    pub editable: bool,
    pub locked: bool,
}

pub struct CheatView {
    pub description: String,
    pub enabled: bool,
}

/// What the session should do on the host's behalf. The menu emits these;
/// it never calls into the core itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuCommand {
    Resume,
    Quit,
    SaveState(u8),
    LoadState(u8),
    CycleFrontendOption { key: String, forward: bool },
    CycleCoreOption { key: String, forward: bool },
    ToggleCheat(usize),
    SwapDisc(u32),
}

const MAIN_ENTRIES: [&str; 7] = [
    "Continue",
    "Save state",
    "Load state",
    "Options",
    "Cheats",
    "Disc control",
    "Quit",
];

pub struct Menu {
    screen: Screen,
    main_cursor: usize,
    slots_cursor: usize,
    options_cursor: usize,
    cheats_cursor: usize,
    discs_cursor: usize,
    pub snapshot: MenuSnapshot,
}

impl Menu {
    pub fn new(snapshot: MenuSnapshot) -> Self {
        Self {
            screen: Screen::Main,
            main_cursor: 0,
            slots_cursor: 0,
            options_cursor: 0,
            cheats_cursor: 0,
            discs_cursor: snapshot.disc_index as usize,
            snapshot,
        }
    }

    pub fn set_snapshot(&mut self, snapshot: MenuSnapshot) {
        self.snapshot = snapshot;
    }

    /// One navigation step driven by this poll's pad state. Commands come
    /// back for the session to apply; `Resume`/`Quit` end the menu.
    pub fn update(&mut self, pad: &Pad) -> Vec<MenuCommand> {
        if pad.just_pressed(Button::B) {
            return match self.screen {
                Screen::Main => vec![MenuCommand::Resume],
                _ => {
                    self.screen = Screen::Main;
                    Vec::new()
                }
            };
        }

        // Menu again while inside collapses everything back to the game.
        if pad.just_pressed(Button::Menu) {
            return vec![MenuCommand::Resume];
        }

        let down = pad.pressed_or_repeated(Button::Down);
        let up = pad.pressed_or_repeated(Button::Up);
        let left = pad.pressed_or_repeated(Button::Left);
        let right = pad.pressed_or_repeated(Button::Right);
        let confirm = pad.just_pressed(Button::A);

        match self.screen {
            Screen::Main => {
                move_cursor(&mut self.main_cursor, MAIN_ENTRIES.len(), up, down);

                if confirm {
                    return self.confirm_main();
                }
            }
            Screen::Slots(mode) => {
                move_cursor(&mut self.slots_cursor, SLOT_ROWS, up, down);

                if confirm {
                    let slot = self.slots_cursor as u8;

                    return match mode {
                        SlotMode::Save => vec![MenuCommand::SaveState(slot), MenuCommand::Resume],
                        SlotMode::Load if self.snapshot.slots_present[self.slots_cursor] => {
                            vec![MenuCommand::LoadState(slot), MenuCommand::Resume]
                        }
                        SlotMode::Load => Vec::new(),
                    };
                }
            }
            Screen::Options => {
                let count = self.option_count();

                move_cursor(&mut self.options_cursor, count, up, down);

                if left || right {
                    if let Some(command) = self.cycle_option(right) {
                        return vec![command];
                    }
                }
            }
            Screen::Cheats => {
                move_cursor(&mut self.cheats_cursor, self.snapshot.cheats.len(), up, down);

                if (confirm || left || right) && !self.snapshot.cheats.is_empty() {
                    return vec![MenuCommand::ToggleCheat(self.cheats_cursor)];
                }
            }
            Screen::Discs => {
                move_cursor(&mut self.discs_cursor, self.snapshot.disc_count as usize, up, down);

                if confirm {
                    let target = self.discs_cursor as u32;

                    if target != self.snapshot.disc_index {
                        return vec![MenuCommand::SwapDisc(target), MenuCommand::Resume];
                    }
                }
            }
        }

        Vec::new()
    }

    fn confirm_main(&mut self) -> Vec<MenuCommand> {
        match self.main_cursor {
            0 => return vec![MenuCommand::Resume],
            1 => {
                self.slots_cursor = 1.min(SLOT_ROWS - 1);
                self.screen = Screen::Slots(SlotMode::Save);
            }
            2 => {
                self.slots_cursor = 1.min(SLOT_ROWS - 1);
                self.screen = Screen::Slots(SlotMode::Load);
            }
            3 => {
                self.options_cursor = 0;
                self.screen = Screen::Options;
            }
            4 if !self.snapshot.cheats.is_empty() => {
                self.cheats_cursor = 0;
                self.screen = Screen::Cheats;
            }
            5 if self.snapshot.disc_count > 1 => {
                self.discs_cursor = self.snapshot.disc_index as usize;
                self.screen = Screen::Discs;
            }
            6 => return vec![MenuCommand::Quit],
            _ => {}
        }

        Vec::new()
    }

    fn option_count(&self) -> usize {
        self.snapshot.frontend_options.len() + self.snapshot.core_options.len()
    }

    fn option_at(&self, index: usize) -> Option<(&OptionView, bool)> {
        let frontend_len = self.snapshot.frontend_options.len();

        if index < frontend_len {
            Some((&self.snapshot.frontend_options[index], true))
        } else {
            self.snapshot
                .core_options
                .get(index - frontend_len)
                .map(|view| (view, false))
        }
    }

    /// Single-value and locked options are skipped: stepping them is a
    /// no-op, which the session never even sees.
    fn cycle_option(&self, forward: bool) -> Option<MenuCommand> {
        let (view, is_frontend) = self.option_at(self.options_cursor)?;

        if !view.editable {
            return None;
        }

        let key = view.key.clone();

        Some(if is_frontend {
            MenuCommand::CycleFrontendOption { key, forward }
        } else {
            MenuCommand::CycleCoreOption { key, forward }
        })
    }

    /// Paints the menu over the frozen game backdrop.
    pub fn render(&self, presenter: &mut Presenter, backdrop: &[u32]) {
        presenter.restore(backdrop);
        presenter.dim();

        let (width, height) = presenter.size();
        let title = match self.screen {
            Screen::Main => "Menu",
            Screen::Slots(SlotMode::Save) => "Save state",
            Screen::Slots(SlotMode::Load) => "Load state",
            Screen::Options => "Options",
            Screen::Cheats => "Cheats",
            Screen::Discs => "Disc control",
        };

        presenter.draw_text(MARGIN, MARGIN, TEXT_SCALE, COLOR_TITLE, title);

        let list_top = MARGIN + 2 * ROW_HEIGHT;
        let visible_rows = (height.saturating_sub(list_top + MARGIN)) / ROW_HEIGHT;

        match self.screen {
            Screen::Main => {
                for (index, entry) in MAIN_ENTRIES.iter().enumerate() {
                    let enabled = match index {
                        4 => !self.snapshot.cheats.is_empty(),
                        5 => self.snapshot.disc_count > 1,
                        _ => true,
                    };
                    let color = row_color(index == self.main_cursor, enabled);

                    self.draw_row(presenter, list_top, index, 0, color, entry, "");
                }
            }
            Screen::Slots(_) => {
                let offset = scroll_offset(self.slots_cursor, SLOT_ROWS, visible_rows);

                for row in 0..visible_rows.min(SLOT_ROWS) {
                    let index = row + offset;
                    let label = if index == 0 {
                        "Auto".to_owned()
                    } else {
                        format!("Slot {index}")
                    };
                    let status = if self.snapshot.slots_present[index] {
                        "saved"
                    } else {
                        "empty"
                    };
                    let color = row_color(index == self.slots_cursor, true);

                    self.draw_row(presenter, list_top, row, width, color, &label, status);
                }
            }
            Screen::Options => {
                let count = self.option_count();
                let offset = scroll_offset(self.options_cursor, count, visible_rows);

                for row in 0..visible_rows.min(count) {
                    let index = row + offset;
                    let Some((view, _)) = self.option_at(index) else {
                        break;
                    };

                    let value = if view.locked {
                        format!("{} (locked)", view.value)
                    } else {
                        view.value.clone()
                    };
                    let color = row_color(index == self.options_cursor, view.editable);

                    self.draw_row(presenter, list_top, row, width, color, &view.label, &value);
                }
            }
            Screen::Cheats => {
                let count = self.snapshot.cheats.len();
                let offset = scroll_offset(self.cheats_cursor, count, visible_rows);

                for row in 0..visible_rows.min(count) {
                    let index = row + offset;
                    let cheat = &self.snapshot.cheats[index];
                    let marker = if cheat.enabled { "[x]" } else { "[ ]" };
                    let color = row_color(index == self.cheats_cursor, true);

                    self.draw_row(
                        presenter,
                        list_top,
                        row,
                        width,
                        color,
                        &cheat.description,
                        marker,
                    );
                }
            }
            Screen::Discs => {
                for index in 0..self.snapshot.disc_count as usize {
                    let label = format!("Disc {}", index + 1);
                    let status = if index as u32 == self.snapshot.disc_index {
                        "inserted"
                    } else {
                        ""
                    };
                    let color = row_color(index == self.discs_cursor, true);

                    self.draw_row(presenter, list_top, index, width, color, &label, status);
                }
            }
        }
    }

    fn draw_row(
        &self,
        presenter: &mut Presenter,
        list_top: usize,
        row: usize,
        width: usize,
        color: u32,
        label: &str,
        value: &str,
    ) {
        let y = list_top + row * ROW_HEIGHT;

        presenter.draw_text(MARGIN, y, TEXT_SCALE, color, label);

        if !value.is_empty() && width > 0 {
            let x = width.saturating_sub(MARGIN + Presenter::text_width(TEXT_SCALE, value));
            presenter.draw_text(x, y, TEXT_SCALE, color, value);
        }
    }
}

fn row_color(selected: bool, enabled: bool) -> u32 {
    match (selected, enabled) {
        (true, _) => COLOR_CURSOR,
        (false, true) => COLOR_TEXT,
        (false, false) => COLOR_DIM,
    }
}

fn move_cursor(cursor: &mut usize, count: usize, up: bool, down: bool) {
    if count == 0 {
        return;
    }

    if down {
        *cursor = (*cursor + 1) % count;
    } else if up {
        *cursor = (*cursor + count - 1) % count;
    }
}

/// Keeps the cursor on screen for lists longer than the window.
fn scroll_offset(cursor: usize, count: usize, visible: usize) -> usize {
    if visible == 0 || count <= visible {
        return 0;
    }

    cursor.saturating_sub(visible / 2).min(count - visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pad::RawInput;
    use enumset::EnumSet;

    fn pad_with(buttons: EnumSet<Button>) -> Pad {
        let mut pad = Pad::new();
        pad.poll(
            RawInput {
                buttons,
                ..RawInput::default()
            },
            0,
        );

        pad
    }

    fn snapshot() -> MenuSnapshot {
        MenuSnapshot {
            frontend_options: vec![OptionView {
                key: "frontend.scaling".into(),
                label: "Scaling".into(),
                value: "Aspect".into(),
                editable: true,
                locked: false,
            }],
            core_options: vec![
                OptionView {
                    key: "cpu".into(),
                    label: "CPU".into(),
                    value: "Powersave".into(),
                    editable: false,
                    locked: true,
                },
                OptionView {
                    key: "region".into(),
                    label: "Region".into(),
                    value: "Auto".into(),
                    editable: false,
                    locked: false,
                },
            ],
            cheats: vec![CheatView {
                description: "Lives".into(),
                enabled: false,
            }],
            disc_count: 2,
            disc_index: 0,
            slots_present: [false; SLOT_ROWS],
        }
    }

    #[test]
    fn b_on_main_resumes() {
        let mut menu = Menu::new(snapshot());

        let commands = menu.update(&pad_with(Button::B.into()));

        assert_eq!(commands, vec![MenuCommand::Resume]);
    }

    #[test]
    fn quit_emits_quit_command() {
        let mut menu = Menu::new(snapshot());
        menu.main_cursor = 6;

        let commands = menu.update(&pad_with(Button::A.into()));

        assert_eq!(commands, vec![MenuCommand::Quit]);
    }

    #[test]
    fn save_slot_flow_emits_save_then_resume() {
        let mut menu = Menu::new(snapshot());
        menu.main_cursor = 1;

        assert!(menu.update(&pad_with(Button::A.into())).is_empty());
        assert_eq!(menu.screen, Screen::Slots(SlotMode::Save));

        // Cursor starts on slot 1; move to slot 3 and confirm.
        menu.slots_cursor = 3;
        let commands = menu.update(&pad_with(Button::A.into()));

        assert_eq!(commands, vec![
            MenuCommand::SaveState(3),
            MenuCommand::Resume
        ]);
    }

    #[test]
    fn load_from_empty_slot_is_refused() {
        let mut menu = Menu::new(snapshot());
        menu.screen = Screen::Slots(SlotMode::Load);
        menu.slots_cursor = 2;

        assert!(menu.update(&pad_with(Button::A.into())).is_empty());
    }

    #[test]
    fn locked_option_cannot_be_cycled() {
        let mut menu = Menu::new(snapshot());
        menu.screen = Screen::Options;
        menu.options_cursor = 1; // the locked core option

        assert!(menu.update(&pad_with(Button::Right.into())).is_empty());
    }

    #[test]
    fn single_value_option_is_skipped() {
        let mut menu = Menu::new(snapshot());
        menu.screen = Screen::Options;
        menu.options_cursor = 2; // single-value, not editable

        assert!(menu.update(&pad_with(Button::Right.into())).is_empty());
    }

    #[test]
    fn editable_option_cycles() {
        let mut menu = Menu::new(snapshot());
        menu.screen = Screen::Options;
        menu.options_cursor = 0;

        let commands = menu.update(&pad_with(Button::Right.into()));

        assert_eq!(commands, vec![MenuCommand::CycleFrontendOption {
            key: "frontend.scaling".into(),
            forward: true,
        }]);
    }

    #[test]
    fn disc_swap_only_on_different_disc() {
        let mut menu = Menu::new(snapshot());
        menu.screen = Screen::Discs;

        // Confirming the inserted disc does nothing.
        assert!(menu.update(&pad_with(Button::A.into())).is_empty());

        menu.discs_cursor = 1;
        let commands = menu.update(&pad_with(Button::A.into()));

        assert_eq!(commands, vec![
            MenuCommand::SwapDisc(1),
            MenuCommand::Resume
        ]);
    }

    #[test]
    fn back_from_subscreen_returns_to_main() {
        let mut menu = Menu::new(snapshot());
        menu.screen = Screen::Options;

        assert!(menu.update(&pad_with(Button::B.into())).is_empty());
        assert_eq!(menu.screen, Screen::Main);
    }
}
