use core::slice;
use std::ffi::CStr;

use itertools::Itertools;

/// Mirror of the address-space descriptors a core publishes through
/// `SET_MEMORY_MAPS`. The host keeps the bookkeeping; cheats and save data
/// go through the typed memory-region calls instead of raw addresses.
#[derive(Debug, Default)]
pub struct MemoryMap {
    descriptors: Vec<Descriptor>,
}

impl MemoryMap {
    pub fn empty() -> Self {
        Self {
            descriptors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    pub unsafe fn from_raw(map: *const libretro_sys::MemoryMap) -> Self {
        if map.is_null() {
            return MemoryMap::empty();
        }

        let descriptors =
            slice::from_raw_parts((*map).descriptors, (*map).num_descriptors as usize)
                .iter()
                .map(|descriptor| Descriptor::from_raw_ref(descriptor))
                .collect_vec();

        Self { descriptors }
    }
}

#[derive(custom_debug::Debug)]
pub struct Descriptor {
    pub flags: u64,
    ptr: *mut u8,
    #[debug(format = "0x{:X}")]
    pub offset: usize,
    #[debug(format = "0x{:X}")]
    pub start: usize,
    #[debug(format = "0x{:X}")]
    pub select: usize,
    #[debug(format = "0x{:X}")]
    pub disconnect: usize,
    pub len: usize,
    pub address_space: String,
}

impl Descriptor {
    unsafe fn from_raw_ref(descriptor: &libretro_sys::MemoryDescriptor) -> Self {
        let address_space = descriptor
            .addrspace
            .as_ref()
            .map(|address_space| CStr::from_ptr(address_space).to_string_lossy().into_owned())
            .unwrap_or_default();

        Self {
            flags: descriptor.flags,
            ptr: descriptor.ptr.cast::<u8>(),
            offset: descriptor.offset,
            start: descriptor.start,
            select: descriptor.select,
            disconnect: descriptor.disconnect,
            len: descriptor.len,
            address_space,
        }
    }
}
