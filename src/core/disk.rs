use std::ffi::c_uint;
use std::path::Path;
use std::ptr::null;

use libretro_sys::GameInfo;
use log::warn;

use crate::core::path_cstring;

/// Mirror of `retro_disk_control_callback`: function pointers the core hands
/// over so the frontend can eject and swap disk images. Fields are nullable
/// in the wild, so every call checks.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct RawDiskControl {
    pub set_eject_state: Option<unsafe extern "C" fn(bool) -> bool>,
    pub get_eject_state: Option<unsafe extern "C" fn() -> bool>,
    pub get_image_index: Option<unsafe extern "C" fn() -> c_uint>,
    pub set_image_index: Option<unsafe extern "C" fn(c_uint) -> bool>,
    pub get_num_images: Option<unsafe extern "C" fn() -> c_uint>,
    pub replace_image_index: Option<unsafe extern "C" fn(c_uint, *const GameInfo) -> bool>,
    pub add_image_index: Option<unsafe extern "C" fn() -> bool>,
}

/// Typed access to the core's disk drive. Calls go into the core, so they
/// are only legal between ticks, from the main thread.
#[derive(Clone, Copy)]
pub struct DiskControl {
    raw: RawDiskControl,
}

impl DiskControl {
    pub fn new(raw: RawDiskControl) -> Self {
        Self { raw }
    }

    pub fn num_images(&self) -> u32 {
        match self.raw.get_num_images {
            Some(get_num_images) => unsafe { get_num_images() },
            None => 0,
        }
    }

    pub fn image_index(&self) -> u32 {
        match self.raw.get_image_index {
            Some(get_image_index) => unsafe { get_image_index() },
            None => 0,
        }
    }

    pub fn is_ejected(&self) -> bool {
        match self.raw.get_eject_state {
            Some(get_eject_state) => unsafe { get_eject_state() },
            None => false,
        }
    }

    pub fn set_ejected(&self, ejected: bool) -> bool {
        match self.raw.set_eject_state {
            Some(set_eject_state) => unsafe { set_eject_state(ejected) },
            None => false,
        }
    }

    pub fn set_image_index(&self, index: u32) -> bool {
        match self.raw.set_image_index {
            Some(set_image_index) => unsafe { set_image_index(index) },
            None => false,
        }
    }

    /// Appends one disc image to the core's drive: a blank index first,
    /// then the path swapped into it. This is how playlist discs beyond the
    /// boot image reach the core.
    pub fn add_image(&self, path: &Path) -> bool {
        let (Some(add_image_index), Some(replace_image_index)) =
            (self.raw.add_image_index, self.raw.replace_image_index)
        else {
            warn!("core disk control cannot add images");
            return false;
        };

        let Some(path_c) = path_cstring(path) else {
            return false;
        };

        unsafe {
            if !add_image_index() {
                return false;
            }

            let index = self.num_images().saturating_sub(1);
            let game_info = GameInfo {
                path: path_c.as_ptr(),
                data: null(),
                size: 0,
                meta: null(),
            };

            replace_image_index(index, &game_info)
        }
    }

    /// Full swap sequence: open the tray, select, close. Cores expect the
    /// eject/insert pair in exactly this order.
    pub fn swap_to(&self, index: u32) -> bool {
        if index >= self.num_images() {
            warn!("disc {index} out of range ({} images)", self.num_images());
            return false;
        }

        if self.is_ejected() {
            warn!("tray already open before swap");
        }

        if !self.set_ejected(true) {
            return false;
        }

        let selected = self.set_image_index(index);
        let closed = self.set_ejected(false);

        selected && closed
    }
}
