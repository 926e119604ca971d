use std::fs;
use std::io;
use std::path::Path;

use log::warn;

use crate::persist;

/// One cheat as applied through the core's cheat API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cheat {
    pub index: u32,
    pub description: String,
    pub code: String,
    pub enabled: bool,
}

/// Loads `<rom>.cht`: one `description = code` per line, `#` comments, a
/// leading `!` marks the cheat disabled. A missing file is an empty list.
pub fn load(path: &Path) -> Vec<Cheat> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };

    let mut cheats = Vec::new();

    for (line_no, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (enabled, line) = match line.strip_prefix('!') {
            Some(rest) => (false, rest.trim_start()),
            None => (true, line),
        };

        let Some((description, code)) = line.split_once('=') else {
            warn!("{}:{}: unparsable cheat line", path.display(), line_no + 1);
            continue;
        };

        cheats.push(Cheat {
            index: cheats.len() as u32,
            description: description.trim().to_owned(),
            code: code.trim().to_owned(),
            enabled,
        });
    }

    cheats
}

/// Writes the list back, keeping the enable toggles for the next session.
pub fn save(path: &Path, cheats: &[Cheat]) -> io::Result<()> {
    let mut out = String::new();

    for cheat in cheats {
        let prefix = if cheat.enabled { "" } else { "!" };
        out.push_str(&format!("{prefix}{} = {}\n", cheat.description, cheat.code));
    }

    persist::atomic_write(path, out.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_toggles_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.cht");
        fs::write(&path, "# cheats\nInfinite Lives = 00FF-1234\n!Moon Jump = 01AB-9999\n").unwrap();

        let cheats = load(&path);

        assert_eq!(cheats.len(), 2);
        assert!(cheats[0].enabled);
        assert_eq!(cheats[0].description, "Infinite Lives");
        assert_eq!(cheats[0].code, "00FF-1234");
        assert!(!cheats[1].enabled);
        assert_eq!(cheats[1].index, 1);
    }

    #[test]
    fn round_trips_enable_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.cht");
        let mut cheats = vec![Cheat {
            index: 0,
            description: "Lives".into(),
            code: "AAAA".into(),
            enabled: true,
        }];

        cheats[0].enabled = false;
        save(&path, &cheats).unwrap();

        assert_eq!(load(&path), cheats);
    }

    #[test]
    fn missing_file_is_empty() {
        assert!(load(Path::new("/nonexistent/rom.cht")).is_empty());
    }
}
