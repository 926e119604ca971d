use std::cell::RefCell;
use std::ffi::CString;

use libretro_sys::{GameGeometry, PixelFormat, SystemAvInfo};

use crate::core::disk::RawDiskControl;
use crate::core::MemoryMap;
use crate::options::OptionSet;

thread_local! {
    pub static STATE: RefCell<State> = RefCell::new(State::new());
}

/// Host-side state the environment callback mutates on the core's behalf.
/// Thread-local because all libretro calls happen on the main thread; the
/// FFI trampolines have no other channel back to the host.
pub struct State {
    pub is_core_loaded: bool,
    pub pixel_format: PixelFormat,
    pub options: OptionSet,
    pub memory_map: MemoryMap,
    pub system_dir: Option<CString>,
    pub save_dir: Option<CString>,
    pub support_no_game: bool,
    pub shutdown_requested: bool,
    pub messages: Vec<String>,
    pub disk_control: Option<RawDiskControl>,
    pub pending_av_info: Option<SystemAvInfo>,
    pub pending_geometry: Option<GameGeometry>,
}

impl State {
    pub fn new() -> Self {
        Self {
            is_core_loaded: false,
            pixel_format: PixelFormat::ARGB1555,
            options: OptionSet::default(),
            memory_map: MemoryMap::empty(),
            system_dir: None,
            save_dir: None,
            support_no_game: false,
            shutdown_requested: false,
            messages: Vec::new(),
            disk_control: None,
            pending_av_info: None,
            pending_geometry: None,
        }
    }
}
