use std::path::{Path, PathBuf};

/// Numbered save-state slots available in the menu. Slot 0 is the auto slot
/// written on exit when auto-resume is armed.
pub const SLOT_COUNT: u8 = 10;
pub const AUTO_SLOT: u8 = 0;

/// Every persisted artifact lives under a root derived from the SD card
/// mount. Roots not given in the environment are derived from `SDCARD_PATH`
/// so a bare launcher invocation still lands everything in one place.
#[derive(Debug, Clone)]
pub struct Paths {
    pub platform: String,
    pub device: String,
    pub sdcard: PathBuf,
    pub system: PathBuf,
    pub userdata: PathBuf,
    pub bios: PathBuf,
    pub saves: PathBuf,
    pub cores: PathBuf,
    pub logs: PathBuf,
    pub core: PathBuf,
    pub rom: PathBuf,
}

impl Paths {
    #[allow(clippy::too_many_arguments)]
    pub fn resolve(
        platform: String,
        device: String,
        sdcard: PathBuf,
        system: Option<PathBuf>,
        userdata: Option<PathBuf>,
        bios: Option<PathBuf>,
        saves: Option<PathBuf>,
        cores: Option<PathBuf>,
        logs: Option<PathBuf>,
        core: PathBuf,
        rom: PathBuf,
    ) -> Self {
        let system = system.unwrap_or_else(|| sdcard.join(".system"));
        let userdata = userdata.unwrap_or_else(|| sdcard.join(".userdata"));
        let bios = bios.unwrap_or_else(|| userdata.join("bios"));
        let saves = saves.unwrap_or_else(|| userdata.join("saves"));
        let cores = cores.unwrap_or_else(|| system.join("cores"));
        let logs = logs.unwrap_or_else(|| userdata.join("logs"));

        Self {
            platform,
            device,
            sdcard,
            system,
            userdata,
            bios,
            saves,
            cores,
            logs,
            core,
            rom,
        }
    }

    /// Short tag identifying the loaded core, derived from the library file
    /// name with the conventional `_libretro.<dll>` suffix stripped.
    pub fn core_tag(&self) -> String {
        let name = self
            .core
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        name.strip_suffix("_libretro")
            .map(str::to_owned)
            .unwrap_or(name)
    }

    pub fn rom_basename(&self) -> String {
        self.rom
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// SRAM lives next to the ROM in the user area.
    pub fn sram_path(&self) -> PathBuf {
        self.rom.with_extension("sav")
    }

    pub fn rtc_path(&self) -> PathBuf {
        self.rom.with_extension("rtc")
    }

    pub fn cheats_path(&self) -> PathBuf {
        self.rom.with_extension("cht")
    }

    /// Save states live in a per-core directory under the saves root.
    pub fn state_dir(&self) -> PathBuf {
        self.saves.join(self.core_tag())
    }

    pub fn state_path(&self, slot: u8) -> PathBuf {
        self.state_dir()
            .join(format!("{}.st{}", self.rom_basename(), slot))
    }

    /// Config cascade layers, lowest priority first. Missing files are
    /// silently empty.
    pub fn config_layers(&self) -> [PathBuf; 6] {
        let core_dir = self.system.join(self.core_tag());

        [
            self.system.join("default.cfg"),
            self.system.join(format!("default-{}.cfg", self.device)),
            core_dir.join("default.cfg"),
            core_dir.join(format!("default-{}.cfg", self.device)),
            self.rom.with_extension("cfg"),
            self.rom.with_extension(format!("{}.cfg", self.device)),
        ]
    }

    /// The user layer written back by `save_user`.
    pub fn user_config_path(&self) -> PathBuf {
        self.rom.with_extension("cfg")
    }

    pub fn resume_token_path(&self) -> PathBuf {
        self.userdata.join(".resume")
    }

    pub fn recent_path(&self) -> PathBuf {
        self.userdata.join("recent.txt")
    }

    pub fn log_path(&self) -> PathBuf {
        self.logs.join(format!("{}.log", self.core_tag()))
    }

    /// Directory handed to cores asking for the system/BIOS directory.
    pub fn bios_dir(&self) -> &Path {
        &self.bios
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Paths {
        Paths::resolve(
            "tg5040".into(),
            "brick".into(),
            PathBuf::from("/mnt/SDCARD"),
            None,
            None,
            None,
            None,
            None,
            None,
            PathBuf::from("/mnt/SDCARD/.system/cores/gambatte_libretro.so"),
            PathBuf::from("/mnt/SDCARD/Roms/GB/rom.gb"),
        )
    }

    #[test]
    fn roots_derive_from_sdcard() {
        let paths = sample();

        assert_eq!(paths.system, PathBuf::from("/mnt/SDCARD/.system"));
        assert_eq!(paths.logs, PathBuf::from("/mnt/SDCARD/.userdata/logs"));
        assert_eq!(paths.saves, PathBuf::from("/mnt/SDCARD/.userdata/saves"));
    }

    #[test]
    fn core_tag_strips_libretro_suffix() {
        assert_eq!(sample().core_tag(), "gambatte");
    }

    #[test]
    fn sram_sits_next_to_rom() {
        assert_eq!(
            sample().sram_path(),
            PathBuf::from("/mnt/SDCARD/Roms/GB/rom.sav")
        );
    }

    #[test]
    fn states_live_in_per_core_directory() {
        assert_eq!(
            sample().state_path(3),
            PathBuf::from("/mnt/SDCARD/.userdata/saves/gambatte/rom.st3")
        );
    }

    #[test]
    fn config_layers_order_lowest_to_highest() {
        let layers = sample().config_layers();

        assert_eq!(layers[0], PathBuf::from("/mnt/SDCARD/.system/default.cfg"));
        assert_eq!(
            layers[1],
            PathBuf::from("/mnt/SDCARD/.system/default-brick.cfg")
        );
        assert_eq!(
            layers[3],
            PathBuf::from("/mnt/SDCARD/.system/gambatte/default-brick.cfg")
        );
        assert_eq!(layers[4], PathBuf::from("/mnt/SDCARD/Roms/GB/rom.cfg"));
        assert_eq!(
            layers[5],
            PathBuf::from("/mnt/SDCARD/Roms/GB/rom.brick.cfg")
        );
    }
}
