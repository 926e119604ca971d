use std::collections::HashSet;
use std::ffi::{CStr, CString};

use anyhow::{Context, Result};
use indexmap::IndexMap;
use log::{info, warn};

use crate::config::Cascade;

/// Config key naming core options that need a reset-and-reload when edited.
/// The v0 variable schema cannot declare this itself, so the core's default
/// config layer ships a comma-separated list.
const RESTART_KEYS: &str = "restart";

/// One core option mirrored from a `SET_VARIABLES` declaration, with the
/// user's override applied on top.
#[derive(Debug)]
pub struct CoreOption {
    pub key: String,
    pub label: String,
    pub values: Vec<String>,
    pub default: usize,
    pub selected: usize,
    pub locked: bool,
    value_c: CString,
}

impl CoreOption {
    /// Parses the v0 variable payload: `"Label; first|second|third"`, first
    /// value is the default.
    fn parse(key: String, raw: &str) -> Result<Self> {
        let (label, values) = raw
            .split_once("; ")
            .with_context(|| format!("variable `{key}` is missing `; `"))?;
        let values = values.split('|').map(str::to_owned).collect::<Vec<_>>();
        let first = values.first().cloned().unwrap_or_default();
        let value_c = CString::new(first).context("variable value contains NUL")?;

        Ok(Self {
            key,
            label: label.to_owned(),
            values,
            default: 0,
            selected: 0,
            locked: false,
            value_c,
        })
    }

    pub fn value(&self) -> &str {
        self.values
            .get(self.selected)
            .map(String::as_str)
            .unwrap_or_default()
    }

    pub fn value_cstr(&self) -> &CStr {
        &self.value_c
    }

    /// Single-value options have nothing to edit; locked options refuse
    /// edits by cascade decree.
    pub fn editable(&self) -> bool {
        !self.locked && self.values.len() > 1
    }

    fn select(&mut self, index: usize) -> bool {
        if index >= self.values.len() || index == self.selected {
            return false;
        }

        self.selected = index;
        self.value_c = CString::new(self.values[index].clone()).unwrap_or_default();

        true
    }
}

/// The host's mirror of the core's option schema. Core declaration order is
/// preserved for the menu; `updated` answers the core's dirty query.
#[derive(Debug, Default)]
pub struct OptionSet {
    options: IndexMap<String, CoreOption>,
    restart_keys: HashSet<String>,
    pub updated: bool,
    pub user_dirty: bool,
}

impl OptionSet {
    /// Replaces the schema with what the core declared. Invoked from the
    /// environment callback; any previous overrides are gone until the
    /// cascade is re-applied.
    pub fn replace_from_variables<I>(&mut self, variables: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.options.clear();

        for (key, raw) in variables {
            match CoreOption::parse(key, &raw) {
                Ok(option) => {
                    self.options.insert(option.key.clone(), option);
                }
                Err(err) => warn!("skipping malformed variable: {err:#}"),
            }
        }

        self.updated = true;
        info!("core declared {} options", self.options.len());
    }

    /// Applies the effective cascade values on top of core defaults and
    /// records which options are locked or restart-gated.
    pub fn apply_cascade(&mut self, cascade: &Cascade) {
        self.restart_keys = cascade
            .effective(RESTART_KEYS)
            .map(|(list, _)| list.split(',').map(|key| key.trim().to_owned()).collect())
            .unwrap_or_default();

        for option in self.options.values_mut() {
            let Some((value, locked)) = cascade.effective(&option.key) else {
                continue;
            };

            option.locked = locked;

            match option.values.iter().position(|candidate| candidate == value) {
                Some(index) => {
                    option.select(index);
                }
                None => warn!(
                    "config value `{value}` for `{}` is not offered by the core",
                    option.key
                ),
            }
        }

        self.updated = true;
    }

    pub fn value_cstr(&self, key: &str) -> Option<&CStr> {
        self.options.get(key).map(CoreOption::value_cstr)
    }

    /// Steps an editable option forward or backward. Returns whether the
    /// edit requires a core reload.
    pub fn cycle(&mut self, key: &str, forward: bool) -> bool {
        let Some(option) = self.options.get_mut(key) else {
            return false;
        };

        if !option.editable() {
            return false;
        }

        let count = option.values.len();
        let next = if forward {
            (option.selected + 1) % count
        } else {
            (option.selected + count - 1) % count
        };

        if option.select(next) {
            self.updated = true;
            self.user_dirty = true;

            return self.restart_keys.contains(key);
        }

        false
    }

    /// The core's `GET_VARIABLE_UPDATE` query: reports and clears.
    pub fn take_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CoreOption> {
        self.options.values()
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Flat view for the user-layer config write.
    pub fn to_desired(&self) -> IndexMap<String, String> {
        self.options
            .values()
            .map(|option| (option.key.clone(), option.value().to_owned()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Layer};

    fn set_with(vars: &[(&str, &str)]) -> OptionSet {
        let mut set = OptionSet::default();
        set.replace_from_variables(
            vars.iter()
                .map(|(key, raw)| ((*key).to_owned(), (*raw).to_owned())),
        );

        set
    }

    fn cascade_of(text: &str) -> Cascade {
        let (entries, issues) = config::parse(text);
        assert!(issues.is_empty());

        Cascade::from_layers(vec![Layer {
            label: "test".into(),
            entries,
        }])
    }

    #[test]
    fn parses_v0_variable_payload() {
        let set = set_with(&[("gb_palette", "Palette; Grey|Green|Red")]);
        let option = set.iter().next().unwrap();

        assert_eq!(option.label, "Palette");
        assert_eq!(option.values.len(), 3);
        assert_eq!(option.value(), "Grey");
        assert_eq!(option.value_cstr().to_bytes(), b"Grey");
    }

    #[test]
    fn cascade_override_selects_and_locks() {
        let mut set = set_with(&[("cpu", "CPU; Normal|Powersave|Overclock")]);
        set.apply_cascade(&cascade_of("-cpu = Powersave\n"));

        let option = set.iter().next().unwrap();
        assert_eq!(option.value(), "Powersave");
        assert!(option.locked);
        assert!(!option.editable());
    }

    #[test]
    fn unknown_cascade_value_keeps_default() {
        let mut set = set_with(&[("cpu", "CPU; Normal|Powersave")]);
        set.apply_cascade(&cascade_of("cpu = Turbo\n"));

        assert_eq!(set.iter().next().unwrap().value(), "Normal");
    }

    #[test]
    fn single_value_option_is_not_editable() {
        let mut set = set_with(&[("region", "Region; Auto")]);

        assert!(!set.iter().next().unwrap().editable());
        assert!(!set.cycle("region", true));
        assert_eq!(set.iter().next().unwrap().value(), "Auto");
    }

    #[test]
    fn cycle_wraps_and_flags_dirty() {
        let mut set = set_with(&[("cpu", "CPU; Normal|Powersave")]);
        set.take_updated();

        set.cycle("cpu", false);
        assert_eq!(set.iter().next().unwrap().value(), "Powersave");
        assert!(set.user_dirty);
        assert!(set.take_updated());
        assert!(!set.take_updated());
    }

    #[test]
    fn restart_gated_key_reports_reload() {
        let mut set = set_with(&[("renderer", "Renderer; Soft|Hard")]);
        set.apply_cascade(&cascade_of("restart = renderer\n"));

        assert!(set.cycle("renderer", true));
    }
}
