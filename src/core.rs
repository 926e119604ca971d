use core::slice;
use std::ffi::{CStr, CString};
use std::fs;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::ptr::null;

use anyhow::anyhow;
use libretro_sys::{GameGeometry, GameInfo, SystemAvInfo, SystemTiming};
use log::{debug, info, warn};

use crate::error::{FrontendError, Result};
use crate::options::OptionSet;
use crate::paths::Paths;

use self::api::Api;

mod api;

mod callbacks;
pub use callbacks::*;

pub mod disk;
pub use disk::DiskControl;

pub(crate) mod environment;

mod memory_map;
pub use memory_map::*;

mod state;
pub use state::*;

const EXPECTED_LIB_RETRO_VERSION: u32 = 1;

/// Host lifecycle. Every operation names the states it is legal in; a call
/// from anywhere else is a `HostState` error, never undefined behavior in
/// the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Unloaded,
    Loaded,
    GameLoaded,
    Running,
    Paused,
    GameUnloaded,
}

impl Lifecycle {
    pub fn name(self) -> &'static str {
        match self {
            Lifecycle::Unloaded => "Unloaded",
            Lifecycle::Loaded => "Loaded",
            Lifecycle::GameLoaded => "GameLoaded",
            Lifecycle::Running => "Running",
            Lifecycle::Paused => "Paused",
            Lifecycle::GameUnloaded => "GameUnloaded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SystemInfo {
    pub library_name: String,
    pub library_version: String,
    pub valid_extensions: String,
    pub need_fullpath: bool,
    pub block_extract: bool,
}

/// One loaded emulator core. Exactly one per process; all calls from the
/// main thread. Callbacks out of the core are only ever invoked while one
/// of our `retro_*` calls is on the stack.
pub struct Core {
    api: Api,
    lifecycle: Lifecycle,
    system_info: SystemInfo,
    av_info: SystemAvInfo,
    // Cores loaded from memory may keep referencing the buffer.
    rom_data: Option<Vec<u8>>,
}

impl Core {
    /// Loads the dynamic library, checks the API version, registers every
    /// callback and runs `retro_init`. `Unloaded -> Loaded`.
    pub fn load(core_path: &Path, paths: &Paths) -> Result<Self> {
        let already_loaded = STATE.with_borrow(|state| state.is_core_loaded);

        if already_loaded {
            return Err(FrontendError::CoreLoad(anyhow!(
                "only one core per process allowed"
            )));
        }

        let api = unsafe { Api::load(core_path) }.map_err(FrontendError::CoreLoad)?;

        unsafe {
            let api_version = (api.retro_api_version)();

            if api_version != EXPECTED_LIB_RETRO_VERSION {
                return Err(FrontendError::CoreLoad(anyhow!(
                    "core implements libretro version `{api_version}`, \
                     expected `{EXPECTED_LIB_RETRO_VERSION}`"
                )));
            }
        }

        // Directories must be in place before the core starts asking for
        // them out of retro_set_environment.
        STATE.with_borrow_mut(|state| {
            state.system_dir = path_cstring(paths.bios_dir());
            state.save_dir = path_cstring(&paths.state_dir());
        });

        unsafe {
            (api.retro_set_environment)(callbacks::ffi::environment);
            (api.retro_set_video_refresh)(callbacks::ffi::video_refresh);
            (api.retro_set_audio_sample)(callbacks::ffi::audio_sample);
            (api.retro_set_audio_sample_batch)(callbacks::ffi::audio_sample_batch);
            (api.retro_set_input_poll)(callbacks::ffi::input_poll);
            (api.retro_set_input_state)(callbacks::ffi::input_state);

            (api.retro_init)();
        }

        STATE.with_borrow_mut(|state| state.is_core_loaded = true);

        let system_info = unsafe { query_system_info(&api) };
        info!(
            "loaded {} {} ({})",
            system_info.library_name, system_info.library_version, system_info.valid_extensions
        );
        debug!("{system_info:?}");

        Ok(Self {
            api,
            lifecycle: Lifecycle::Loaded,
            system_info,
            av_info: empty_av_info(),
            rom_data: None,
        })
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn av_info(&self) -> &SystemAvInfo {
        &self.av_info
    }

    /// Loads content, or starts content-free when the core advertised
    /// support for it. `Loaded -> GameLoaded`.
    pub fn load_game(&mut self, rom: Option<&Path>) -> Result<()> {
        self.expect(&[Lifecycle::Loaded])?;

        let loaded = match rom {
            Some(rom) => unsafe { self.load_game_content(rom)? },
            None => {
                let supported = STATE.with_borrow(|state| state.support_no_game);

                if !supported {
                    return Err(FrontendError::GameLoad {
                        path: PathBuf::from("<no content>"),
                    });
                }

                unsafe { (self.api.retro_load_game)(null()) }
            }
        };

        if !loaded {
            return Err(FrontendError::GameLoad {
                path: rom.map(Path::to_path_buf).unwrap_or_default(),
            });
        }

        unsafe {
            (self.api.retro_get_system_av_info)(&mut self.av_info);
            (self.api.retro_set_controller_port_device)(0, libretro_sys::DEVICE_JOYPAD);

            let region = (self.api.retro_get_region)();
            debug!(
                "region {}",
                match libretro_sys::Region::from_uint(region) {
                    Some(libretro_sys::Region::PAL) => "PAL",
                    _ => "NTSC",
                }
            );
        }

        info!(
            "game loaded: {}x{} @ {:.2} fps, {:.0} Hz audio",
            self.av_info.geometry.base_width,
            self.av_info.geometry.base_height,
            self.av_info.timing.fps,
            self.av_info.timing.sample_rate,
        );

        self.lifecycle = Lifecycle::GameLoaded;

        Ok(())
    }

    unsafe fn load_game_content(&mut self, rom: &Path) -> Result<bool> {
        let rom_c = path_cstring(rom).ok_or_else(|| FrontendError::GameLoad {
            path: rom.to_path_buf(),
        })?;

        let game_info = if self.system_info.need_fullpath {
            GameInfo {
                path: rom_c.as_ptr(),
                data: null(),
                size: 0,
                meta: null(),
            }
        } else {
            let data = fs::read(rom).map_err(|err| FrontendError::io(rom, err))?;
            let game_info = GameInfo {
                path: rom_c.as_ptr(),
                data: data.as_ptr().cast(),
                size: data.len(),
                meta: null(),
            };

            self.rom_data = Some(data);

            game_info
        };

        Ok((self.api.retro_load_game)(&game_info))
    }

    /// `GameLoaded | Paused -> Running`.
    pub fn start(&mut self) -> Result<()> {
        self.expect(&[Lifecycle::GameLoaded, Lifecycle::Paused])?;
        self.lifecycle = Lifecycle::Running;

        Ok(())
    }

    /// `Running -> Paused`. While paused no core callback fires because no
    /// `retro_*` call is made.
    pub fn pause(&mut self) -> Result<()> {
        self.expect(&[Lifecycle::Running])?;
        self.lifecycle = Lifecycle::Paused;

        Ok(())
    }

    /// One `retro_run`. The core is a black box that may panic through our
    /// callbacks; a tick that does not return normally is an error for this
    /// tick, not the process.
    pub fn tick(&mut self) -> Result<()> {
        self.expect(&[Lifecycle::Running])?;

        let run = self.api.retro_run;

        panic::catch_unwind(AssertUnwindSafe(|| unsafe { run() }))
            .map_err(|_| FrontendError::CoreRun(anyhow!("core fault during retro_run")))
    }

    pub fn reset(&mut self) -> Result<()> {
        self.expect(&[Lifecycle::Running, Lifecycle::Paused])?;

        unsafe { (self.api.retro_reset)() }

        Ok(())
    }

    pub fn serialize_size(&self) -> usize {
        unsafe { (self.api.retro_serialize_size)() }
    }

    /// Serializes the complete core state. The size is requeried on every
    /// save; cores may legally grow or shrink it between sessions, so a
    /// failed first attempt retries once at the fresh size.
    pub fn save_state(&mut self) -> Result<Vec<u8>> {
        self.expect(&[Lifecycle::Running, Lifecycle::Paused])?;

        unsafe {
            let size = self.serialize_size();

            if size == 0 {
                return Err(FrontendError::CoreRun(anyhow!(
                    "core does not support save states"
                )));
            }

            let mut buffer = vec![0u8; size];

            // libretro-sys 0.1.1 mis-declares retro_serialize as returning
            // `()` instead of `bool` (unlike its retro_unserialize sibling);
            // the real libretro ABI returns bool, so we recover it here.
            let retro_serialize: unsafe extern "C" fn(*mut c_void, usize) -> bool =
                std::mem::transmute(self.api.retro_serialize);

            if retro_serialize(buffer.as_mut_ptr().cast::<c_void>(), buffer.len()) {
                return Ok(buffer);
            }

            let requeried = self.serialize_size();

            if requeried != size {
                buffer = vec![0u8; requeried];

                if retro_serialize(buffer.as_mut_ptr().cast::<c_void>(), buffer.len()) {
                    return Ok(buffer);
                }
            }

            Err(FrontendError::CoreRun(anyhow!("state serialization failed")))
        }
    }

    pub fn load_state(&mut self, bytes: &[u8]) -> Result<()> {
        self.expect(&[Lifecycle::Running, Lifecycle::Paused])?;

        let expected = self.serialize_size();

        if bytes.len() != expected {
            return Err(FrontendError::StateSize {
                expected,
                found: bytes.len(),
            });
        }

        let restored =
            unsafe { (self.api.retro_unserialize)(bytes.as_ptr().cast::<c_void>(), bytes.len()) };

        if !restored {
            return Err(FrontendError::CoreRun(anyhow!("state restore failed")));
        }

        Ok(())
    }

    pub fn save_ram(&self) -> &[u8] {
        unsafe { self.memory_region(libretro_sys::MEMORY_SAVE_RAM) }
    }

    pub fn rtc_ram(&self) -> &[u8] {
        unsafe { self.memory_region(libretro_sys::MEMORY_RTC) }
    }

    pub fn restore_save_ram(&mut self, data: &[u8]) {
        unsafe { restore_region(self.memory_region_mut(libretro_sys::MEMORY_SAVE_RAM), data) }
    }

    pub fn restore_rtc_ram(&mut self, data: &[u8]) {
        unsafe { restore_region(self.memory_region_mut(libretro_sys::MEMORY_RTC), data) }
    }

    unsafe fn memory_region(&self, region: u32) -> &[u8] {
        let ptr = (self.api.retro_get_memory_data)(region);
        let len = (self.api.retro_get_memory_size)(region);

        if ptr.is_null() || len == 0 {
            return &[];
        }

        slice::from_raw_parts(ptr.cast::<u8>(), len)
    }

    unsafe fn memory_region_mut(&mut self, region: u32) -> &mut [u8] {
        let ptr = (self.api.retro_get_memory_data)(region);
        let len = (self.api.retro_get_memory_size)(region);

        if ptr.is_null() || len == 0 {
            return &mut [];
        }

        slice::from_raw_parts_mut(ptr.cast::<u8>(), len)
    }

    pub fn cheat_reset(&mut self) {
        unsafe { (self.api.retro_cheat_reset)() }
    }

    pub fn cheat_set(&mut self, index: u32, enabled: bool, code: &str) {
        let Ok(code) = CString::new(code) else {
            warn!("cheat {index} contains NUL, skipped");
            return;
        };

        unsafe { (self.api.retro_cheat_set)(index, enabled, code.as_ptr()) }
    }

    pub fn disk_control(&self) -> Option<DiskControl> {
        STATE.with_borrow(|state| state.disk_control.map(DiskControl::new))
    }

    /// Host-side mirror of the option schema.
    pub fn with_options<R>(&self, f: impl FnOnce(&mut OptionSet) -> R) -> R {
        STATE.with_borrow_mut(|state| f(&mut state.options))
    }

    pub fn take_shutdown_request(&self) -> bool {
        STATE.with_borrow_mut(|state| std::mem::take(&mut state.shutdown_requested))
    }

    pub fn take_messages(&self) -> Vec<String> {
        STATE.with_borrow_mut(|state| std::mem::take(&mut state.messages))
    }

    /// AV renegotiation requested by the core mid-session, if any. Applies
    /// to the stored info so later readers see the new timing.
    pub fn take_av_change(&mut self) -> Option<SystemAvInfo> {
        let pending = STATE.with_borrow_mut(|state| state.pending_av_info.take());

        if let Some(av_info) = &pending {
            self.av_info = SystemAvInfo {
                geometry: GameGeometry { ..av_info.geometry },
                timing: SystemTiming { ..av_info.timing },
            };
        }

        pending
    }

    pub fn take_geometry_change(&mut self) -> Option<GameGeometry> {
        let pending = STATE.with_borrow_mut(|state| state.pending_geometry.take());

        if let Some(geometry) = &pending {
            self.av_info.geometry = GameGeometry { ..*geometry };
        }

        pending
    }

    /// `* -> GameUnloaded`.
    pub fn unload_game(&mut self) -> Result<()> {
        self.expect(&[
            Lifecycle::GameLoaded,
            Lifecycle::Running,
            Lifecycle::Paused,
        ])?;

        unsafe { (self.api.retro_unload_game)() }

        self.rom_data = None;
        self.lifecycle = Lifecycle::GameUnloaded;

        Ok(())
    }

    /// Terminal transition. Runs from `Drop`, so an early return on an
    /// error path still deinitializes the core.
    fn teardown(&mut self) {
        if self.lifecycle == Lifecycle::Unloaded {
            return;
        }

        unsafe {
            if matches!(
                self.lifecycle,
                Lifecycle::GameLoaded | Lifecycle::Running | Lifecycle::Paused
            ) {
                (self.api.retro_unload_game)();
            }

            (self.api.retro_deinit)();
        }

        callbacks::clear();
        STATE.set(State::new());
        self.lifecycle = Lifecycle::Unloaded;
        info!("core unloaded");
    }

    fn expect(&self, allowed: &[Lifecycle]) -> Result<()> {
        if !allowed.contains(&self.lifecycle) {
            return Err(FrontendError::HostState {
                required: allowed[0].name(),
                actual: self.lifecycle.name(),
            });
        }

        Ok(())
    }
}

impl Drop for Core {
    fn drop(&mut self) {
        self.teardown();
    }
}

unsafe fn query_system_info(api: &Api) -> SystemInfo {
    let mut raw = libretro_sys::SystemInfo {
        library_name: null(),
        library_version: null(),
        valid_extensions: null(),
        need_fullpath: false,
        block_extract: false,
    };

    (api.retro_get_system_info)(&mut raw);

    let own = |ptr: *const std::os::raw::c_char| {
        ptr.as_ref()
            .map(|ptr| CStr::from_ptr(ptr).to_string_lossy().into_owned())
            .unwrap_or_default()
    };

    SystemInfo {
        library_name: own(raw.library_name),
        library_version: own(raw.library_version),
        valid_extensions: own(raw.valid_extensions),
        need_fullpath: raw.need_fullpath,
        block_extract: raw.block_extract,
    }
}

fn empty_av_info() -> SystemAvInfo {
    SystemAvInfo {
        geometry: GameGeometry {
            aspect_ratio: f32::NAN,
            base_width: 0,
            base_height: 0,
            max_width: 0,
            max_height: 0,
        },
        timing: SystemTiming {
            fps: 0.,
            sample_rate: 0.,
        },
    }
}

pub(crate) fn path_cstring(path: &Path) -> Option<CString> {
    CString::new(path.to_string_lossy().into_owned().into_bytes()).ok()
}

fn restore_region(region: &mut [u8], data: &[u8]) {
    let len = region.len().min(data.len());

    region[..len].copy_from_slice(&data[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_names_match_states() {
        assert_eq!(Lifecycle::Running.name(), "Running");
        assert_eq!(Lifecycle::GameUnloaded.name(), "GameUnloaded");
    }
}
