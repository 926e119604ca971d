use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

use indexmap::IndexMap;
use log::warn;

use crate::paths::Paths;
use crate::persist;

/// One resolved `key = value` binding inside a layer. A leading `-` on the
/// key in the source file marks the binding locked against menu edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub value: String,
    pub locked: bool,
}

#[derive(Debug, Default, Clone)]
pub struct Layer {
    pub label: String,
    pub entries: IndexMap<String, Entry>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ParseIssue {
    pub line: usize,
    pub text: String,
}

/// Parses the `key = value` config dialect: `#` comment lines, blank lines
/// ignored, CR/LF tolerant, trailing whitespace stripped. Malformed lines are
/// reported with their line number and skipped; they never abort the load.
pub fn parse(text: &str) -> (IndexMap<String, Entry>, Vec<ParseIssue>) {
    let mut entries: IndexMap<String, Entry> = IndexMap::new();
    let mut issues = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            issues.push(ParseIssue {
                line: index + 1,
                text: raw.trim_end().to_owned(),
            });
            continue;
        };

        let mut key = key.trim();
        let value = value.trim();
        let locked = key.starts_with('-');

        if locked {
            key = key[1..].trim_start();
        }

        if key.is_empty() {
            issues.push(ParseIssue {
                line: index + 1,
                text: raw.trim_end().to_owned(),
            });
            continue;
        }

        // Later bindings overwrite earlier ones; the lock bit is sticky.
        let entry = entries.entry(key.to_owned()).or_insert(Entry {
            value: String::new(),
            locked: false,
        });
        entry.value = value.to_owned();
        entry.locked |= locked;
    }

    (entries, issues)
}

/// The six-layer option cascade, lowest priority first:
/// system, system-device, core default, core default-device, user rom,
/// user rom-device.
#[derive(Debug, Default)]
pub struct Cascade {
    layers: Vec<Layer>,
}

/// Number of layers below the user pair; `save_user` diffs against these.
const USER_LAYER: usize = 4;

impl Cascade {
    pub fn load(paths: &Paths) -> Self {
        let mut layers = Vec::new();

        for path in paths.config_layers() {
            let label = path.display().to_string();
            let text = match fs::read_to_string(&path) {
                Ok(text) => text,
                Err(err) if err.kind() == io::ErrorKind::NotFound => String::new(),
                Err(err) => {
                    warn!("config layer {label}: {err}");
                    String::new()
                }
            };

            let (entries, issues) = parse(&text);

            for issue in &issues {
                warn!("{label}:{}: unparsable line `{}`", issue.line, issue.text);
            }

            layers.push(Layer { label, entries });
        }

        Self { layers }
    }

    pub fn from_layers(layers: Vec<Layer>) -> Self {
        Self { layers }
    }

    /// Highest-priority value for `key`; the lock bit is the OR of the lock
    /// bits across every layer that defines it.
    pub fn effective(&self, key: &str) -> Option<(&str, bool)> {
        let locked = self
            .layers
            .iter()
            .filter_map(|layer| layer.entries.get(key))
            .any(|entry| entry.locked);
        let value = self
            .layers
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(key))?;

        Some((value.value.as_str(), locked))
    }

    /// What `key` resolves to when the user layers are ignored.
    fn resolved_below_user(&self, key: &str) -> Option<&str> {
        self.layers[..USER_LAYER.min(self.layers.len())]
            .iter()
            .rev()
            .find_map(|layer| layer.entries.get(key))
            .map(|entry| entry.value.as_str())
    }

    /// Writes the user layer: only keys whose value differs from the layers
    /// below, keeping `-` lock markers the user file already carried.
    pub fn save_user(
        &self,
        path: &Path,
        desired: &IndexMap<String, String>,
    ) -> io::Result<()> {
        let prior_user = self.layers.get(USER_LAYER);
        let mut out = String::new();

        for (key, value) in desired {
            let inherited = self.resolved_below_user(key);

            if inherited == Some(value.as_str()) {
                continue;
            }

            let locked = prior_user
                .and_then(|layer| layer.entries.get(key))
                .map(|entry| entry.locked)
                .unwrap_or(false);
            let prefix = if locked { "-" } else { "" };

            let _ = writeln!(out, "{prefix}{key} = {value}");
        }

        if out.is_empty() && !path.exists() {
            return Ok(());
        }

        persist::atomic_write(path, out.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(label: &str, pairs: &[(&str, &str, bool)]) -> Layer {
        Layer {
            label: label.into(),
            entries: pairs
                .iter()
                .map(|(key, value, locked)| {
                    (
                        (*key).to_owned(),
                        Entry {
                            value: (*value).to_owned(),
                            locked: *locked,
                        },
                    )
                })
                .collect(),
        }
    }

    #[test]
    fn parses_comments_crlf_and_lock_prefix() {
        let (entries, issues) = parse("# comment\r\ncpu = Normal\r\n\r\n-scaling = Native  \r\n");

        assert!(issues.is_empty());
        assert_eq!(
            entries.get("cpu"),
            Some(&Entry {
                value: "Normal".into(),
                locked: false
            })
        );
        assert_eq!(
            entries.get("scaling"),
            Some(&Entry {
                value: "Native".into(),
                locked: true
            })
        );
    }

    #[test]
    fn malformed_line_reports_number_and_load_continues() {
        let (entries, issues) = parse("cpu = Normal\nbogus line\nsharpness = Soft\n");

        assert_eq!(issues, vec![ParseIssue {
            line: 2,
            text: "bogus line".into()
        }]);
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn higher_layer_wins_and_lock_is_or_of_layers() {
        // Mirrors a platform default being pinned by the device overlay.
        let cascade = Cascade::from_layers(vec![
            layer("base/default.cfg", &[("cpu", "Normal", false)]),
            layer("base/default-brick.cfg", &[("cpu", "Powersave", true)]),
        ]);

        assert_eq!(cascade.effective("cpu"), Some(("Powersave", true)));
    }

    #[test]
    fn lock_is_sticky_when_redefined_without_marker() {
        let cascade = Cascade::from_layers(vec![
            layer("low", &[("cpu", "Powersave", true)]),
            layer("high", &[("cpu", "Overclock", false)]),
        ]);

        assert_eq!(cascade.effective("cpu"), Some(("Overclock", true)));
    }

    #[test]
    fn save_user_writes_only_differences() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.cfg");
        let cascade = Cascade::from_layers(vec![
            layer("system", &[("cpu", "Normal", false), ("scaling", "Aspect", false)]),
            Layer::default(),
            Layer::default(),
            Layer::default(),
            Layer::default(),
            Layer::default(),
        ]);

        let mut desired = IndexMap::new();
        desired.insert("cpu".to_owned(), "Normal".to_owned());
        desired.insert("scaling".to_owned(), "Native".to_owned());
        cascade.save_user(&path, &desired).unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, "scaling = Native\n");
    }

    #[test]
    fn save_user_preserves_lock_markers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.cfg");
        let cascade = Cascade::from_layers(vec![
            Layer::default(),
            Layer::default(),
            Layer::default(),
            Layer::default(),
            layer("user", &[("cpu", "Powersave", true)]),
            Layer::default(),
        ]);

        let mut desired = IndexMap::new();
        desired.insert("cpu".to_owned(), "Powersave".to_owned());
        cascade.save_user(&path, &desired).unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "-cpu = Powersave\n");
    }
}
