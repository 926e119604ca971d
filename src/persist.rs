use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use atomicwrites::{AtomicFile, OverwriteBehavior::AllowOverwrite};
use log::{debug, info, warn};

use crate::paths::Paths;

/// Maximum entries kept in the recent list.
const RECENT_CAP: usize = 50;

/// Write-temp, fsync, rename-over. Readers only ever open the canonical
/// path, so a crash mid-write leaves either the previous contents or the new
/// contents, and stray temp files are ignored.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }

    AtomicFile::new(path, AllowOverwrite)
        .write(|file| file.write_all(bytes))
        .map_err(|err| match err {
            atomicwrites::Error::Internal(err) | atomicwrites::Error::User(err) => err,
        })
}

pub fn write_state(path: &Path, bytes: &[u8]) -> io::Result<()> {
    atomic_write(path, bytes)
}

pub fn read_state(path: &Path) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Battery-backed cartridge memory mirrored to disk. The store keeps the last
/// flushed image so unchanged regions cost no writes; flushes happen on
/// pause, slot change, and clean exit.
pub struct SramStore {
    sav_path: PathBuf,
    rtc_path: PathBuf,
    last_sav: Option<Vec<u8>>,
    last_rtc: Option<Vec<u8>>,
}

impl SramStore {
    pub fn new(paths: &Paths) -> Self {
        Self {
            sav_path: paths.sram_path(),
            rtc_path: paths.rtc_path(),
            last_sav: None,
            last_rtc: None,
        }
    }

    /// On-disk SRAM image from a previous session, if any.
    pub fn load_sram(&mut self) -> Option<Vec<u8>> {
        let bytes = fs::read(&self.sav_path).ok()?;
        self.last_sav = Some(bytes.clone());

        Some(bytes)
    }

    pub fn load_rtc(&mut self) -> Option<Vec<u8>> {
        let bytes = fs::read(&self.rtc_path).ok()?;
        self.last_rtc = Some(bytes.clone());

        Some(bytes)
    }

    /// Flushes the SRAM region if it changed since the last flush. Returns
    /// whether a write happened. On failure the dirty image is kept so a
    /// later retry still sees the change.
    pub fn flush_sram(&mut self, region: &[u8]) -> io::Result<bool> {
        Self::flush(&self.sav_path, &mut self.last_sav, region)
    }

    pub fn flush_rtc(&mut self, region: &[u8]) -> io::Result<bool> {
        Self::flush(&self.rtc_path, &mut self.last_rtc, region)
    }

    fn flush(path: &Path, last: &mut Option<Vec<u8>>, region: &[u8]) -> io::Result<bool> {
        if region.is_empty() {
            return Ok(false);
        }

        if last.as_deref() == Some(region) {
            debug!("{} unchanged, skipping flush", path.display());
            return Ok(false);
        }

        atomic_write(path, region)?;
        *last = Some(region.to_vec());
        info!("flushed {} bytes to {}", region.len(), path.display());

        Ok(true)
    }
}

/// Marker consumed by the launcher to restart this binary with the same
/// content after a mid-game exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumeToken {
    pub core: PathBuf,
    pub rom: PathBuf,
}

pub fn write_resume_token(path: &Path, token: &ResumeToken) -> io::Result<()> {
    let line = format!("{}\t{}\n", token.core.display(), token.rom.display());

    atomic_write(path, line.as_bytes())
}

pub fn read_resume_token(path: &Path) -> Option<ResumeToken> {
    let text = fs::read_to_string(path).ok()?;
    let line = text.lines().next()?;
    let (core, rom) = line.split_once('\t')?;

    Some(ResumeToken {
        core: PathBuf::from(core),
        rom: PathBuf::from(rom),
    })
}

pub fn clear_resume_token(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!("could not clear resume token: {err}");
        }
    }
}

/// Loads `recent.txt`, dropping entries whose file no longer exists.
pub fn load_recent(path: &Path) -> Vec<(PathBuf, Option<String>)> {
    let Ok(text) = fs::read_to_string(path) else {
        return Vec::new();
    };

    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((path, name)) => (PathBuf::from(path), Some(name.to_owned())),
            None => (PathBuf::from(line), None),
        })
        .filter(|(path, _)| path.exists())
        .collect()
}

/// Prepends `rom` to the recent list, newest first, deduplicated.
pub fn note_recent(path: &Path, rom: &Path, display: Option<&str>) -> io::Result<()> {
    let mut entries = load_recent(path);

    entries.retain(|(existing, _)| existing != rom);
    entries.insert(0, (rom.to_owned(), display.map(str::to_owned)));
    entries.truncate(RECENT_CAP);

    let mut out = String::new();

    for (path, name) in &entries {
        match name {
            Some(name) => out.push_str(&format!("{}\t{}\n", path.display(), name)),
            None => out.push_str(&format!("{}\n", path.display())),
        }
    }

    atomic_write(path, out.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slot/rom.st1");

        atomic_write(&path, b"first").unwrap();
        atomic_write(&path, b"second").unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn stray_tmp_remnants_are_ignored_by_readers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rom.st1");

        atomic_write(&path, b"good state").unwrap();
        // A crash between temp write and rename leaves junk beside the file.
        fs::write(dir.path().join("rom.st1.tmp"), b"torn").unwrap();

        assert_eq!(read_state(&path).unwrap(), b"good state");
    }

    #[test]
    fn sram_flush_skips_unchanged_images() {
        let dir = tempfile::tempdir().unwrap();
        let paths = test_paths(dir.path());
        let mut store = SramStore::new(&paths);

        assert!(store.flush_sram(&[1, 2, 3]).unwrap());
        assert!(!store.flush_sram(&[1, 2, 3]).unwrap());
        assert!(store.flush_sram(&[9, 9, 9]).unwrap());
        assert_eq!(fs::read(paths.sram_path()).unwrap(), vec![9, 9, 9]);
    }

    #[test]
    fn resume_token_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".resume");
        let token = ResumeToken {
            core: PathBuf::from("/cores/gambatte_libretro.so"),
            rom: PathBuf::from("/roms/rom.gb"),
        };

        write_resume_token(&path, &token).unwrap();
        assert_eq!(read_resume_token(&path), Some(token));

        clear_resume_token(&path);
        assert_eq!(read_resume_token(&path), None);
    }

    #[test]
    fn recent_list_prunes_missing_and_keeps_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("recent.txt");
        let rom_a = dir.path().join("a.gb");
        let rom_b = dir.path().join("b.gb");
        fs::write(&rom_a, b"a").unwrap();
        fs::write(&rom_b, b"b").unwrap();

        note_recent(&list, &rom_a, None).unwrap();
        note_recent(&list, &rom_b, Some("Game B")).unwrap();
        note_recent(&list, &rom_a, None).unwrap();

        let entries = load_recent(&list);
        assert_eq!(entries[0].0, rom_a);
        assert_eq!(entries[1].0, rom_b);
        assert_eq!(entries[1].1.as_deref(), Some("Game B"));

        fs::remove_file(&rom_b).unwrap();
        assert_eq!(load_recent(&list).len(), 1);
    }

    fn test_paths(root: &Path) -> Paths {
        Paths::resolve(
            "test".into(),
            "dev".into(),
            root.to_owned(),
            None,
            None,
            None,
            None,
            None,
            None,
            root.join("core_libretro.so"),
            root.join("rom.gb"),
        )
    }
}
