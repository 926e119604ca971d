use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};

/// Loads a multi-disc playlist. One image path per line, relative to the
/// playlist file; blank lines and `#` comments ignored, CRLF tolerant.
///
/// Disc names must match on-disk names exactly: a case mismatch is an error,
/// never a guess, even when the filesystem would tolerate it.
pub fn load(path: &Path) -> Result<Vec<PathBuf>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read playlist `{}`", path.display()))?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut discs = Vec::new();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let disc = dir.join(line);

        ensure!(
            exists_case_sensitive(&disc),
            "playlist `{}` line {}: disc image `{}` not found",
            path.display(),
            index + 1,
            line,
        );

        discs.push(disc);
    }

    ensure!(!discs.is_empty(), "playlist `{}` lists no discs", path.display());

    Ok(discs)
}

pub fn is_playlist(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("m3u"))
        .unwrap_or(false)
}

/// Directory-listing comparison so the match is case-sensitive even on
/// filesystems that are not.
fn exists_case_sensitive(path: &Path) -> bool {
    let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
        return false;
    };

    let Ok(entries) = fs::read_dir(dir) else {
        return false;
    };

    entries
        .filter_map(|entry| entry.ok())
        .any(|entry| entry.file_name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_relative_entries_with_comments_and_crlf() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("disc1.bin"), b"1").unwrap();
        fs::write(dir.path().join("disc2.bin"), b"2").unwrap();
        let playlist = dir.path().join("game.m3u");
        fs::write(&playlist, "# two discs\r\ndisc1.bin\r\n\r\ndisc2.bin\r\n").unwrap();

        let discs = load(&playlist).unwrap();

        assert_eq!(discs, vec![
            dir.path().join("disc1.bin"),
            dir.path().join("disc2.bin"),
        ]);
    }

    #[test]
    fn missing_disc_is_an_error_with_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("game.m3u");
        fs::write(&playlist, "disc1.bin\n").unwrap();

        let err = load(&playlist).unwrap_err().to_string();

        assert!(err.contains("line 1"), "{err}");
        assert!(err.contains("disc1.bin"), "{err}");
    }

    #[test]
    fn case_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("Disc1.bin"), b"1").unwrap();
        let playlist = dir.path().join("game.m3u");
        fs::write(&playlist, "disc1.bin\n").unwrap();

        assert!(load(&playlist).is_err());
    }

    #[test]
    fn empty_playlist_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("game.m3u");
        fs::write(&playlist, "# nothing\n\n").unwrap();

        assert!(load(&playlist).is_err());
    }
}
