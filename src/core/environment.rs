use std::ffi::{c_char, c_uint, c_void, CStr};
use std::iter;
use std::ptr::null;

use log::{debug, info, trace, warn};
use libretro_sys::{GameGeometry, PixelFormat, SystemAvInfo, SystemTiming, Variable};
use strum::FromRepr;

use crate::core::disk::RawDiskControl;
use crate::core::{MemoryMap, STATE};

// If set, this call is not part of the public libretro API yet. It can
// change or be removed at any time.
pub const ENVIRONMENT_EXPERIMENTAL: c_uint = 0x10000;

// Environment callback to be used internally in frontend.
pub const ENVIRONMENT_PRIVATE: c_uint = 0x20000;

/// The environment commands this host answers. Unknown commands return
/// false and the core carries on with its fallback path.
#[derive(FromRepr, Debug, PartialEq)]
#[repr(u32)]
pub enum Command {
    // bool * --
    // Whether the frontend crops away overscan.
    GET_OVERSCAN = 2,

    // bool * --
    // Whether the frontend supports frame duping (NULL video data).
    GET_CAN_DUPE = 3,

    // const struct Message * --
    // A message to display for a number of frames.
    SET_MESSAGE = 6,

    // N/A (NULL) --
    // The core asks the frontend to shut down.
    SHUTDOWN = 7,

    // const unsigned * --
    // Hint how demanding the core is on the system.
    SET_PERFORMANCE_LEVEL = 8,

    // const char ** --
    // Directory for BIOSes and other system content. May be NULL.
    GET_SYSTEM_DIRECTORY = 9,

    // const enum PixelFormat * --
    // Pixel format for the video callback; refused formats return false.
    SET_PIXEL_FORMAT = 10,

    // const struct InputDescriptor * --
    // NULL-description-terminated array naming the core's inputs.
    SET_INPUT_DESCRIPTORS = 11,

    // const struct DiskControlCallback * --
    // Interface the frontend uses to eject and swap disk images.
    SET_DISK_CONTROL_INTERFACE = 13,

    // struct Variable * --
    // Look up one option value by key; value NULL when unknown.
    GET_VARIABLE = 15,

    // const struct Variable * --
    // The core's option schema, `{ NULL, NULL }` terminated. Value text is
    // `description; first|second`, first entry is the default.
    SET_VARIABLES = 16,

    // bool * --
    // True when an option changed since the last GET_VARIABLE.
    GET_VARIABLE_UPDATE = 17,

    // const bool * --
    // Core can run without content.
    SET_SUPPORT_NO_GAME = 18,

    // struct RumbleInterface * --
    // Rumble motor access; this host wires a no-op.
    GET_RUMBLE_INTERFACE = 23,

    // uint64_t * --
    // Bitmask of input device classes the frontend can report.
    GET_INPUT_DEVICE_CAPABILITIES = 24,

    // struct LogCallback * --
    // Frontend-provided logging sink.
    GET_LOG_INTERFACE = 27,

    // struct PerfCallback * --
    // Performance counter interface; this host wires no-ops.
    GET_PERF_INTERFACE = 28,

    // const char ** --
    // Directory for per-game save data. May be NULL.
    GET_SAVE_DIRECTORY = 31,

    // const struct SystemAvInfo * --
    // Complete AV renegotiation mid-session.
    SET_SYSTEM_AV_INFO = 32,

    // const struct ControllerInfo * --
    // Controller subclasses per port; informational.
    SET_CONTROLLER_INFO = 35,

    // const struct MemoryMap * --
    // Address-space descriptors for the emulated machine.
    SET_MEMORY_MAPS = 36,

    // const struct GameGeometry * --
    // Geometry-only change; timing is untouched.
    SET_GEOMETRY = 37,

    // unsigned * --
    // Language the frontend runs in.
    GET_LANGUAGE = 39,

    // unsigned * --
    // Highest core-options API the frontend speaks; 0 selects the
    // SET_VARIABLES protocol above.
    GET_CORE_OPTIONS_VERSION = 52,
}

#[repr(C)]
struct RawRumbleInterface {
    set_rumble_state: Option<unsafe extern "C" fn(c_uint, c_uint, u16) -> bool>,
}

#[repr(C)]
struct RawLogInterface {
    log: Option<unsafe extern "C" fn(c_uint, *const c_char)>,
}

// Mirror of `retro_perf_callback`. The counter argument is the core's
// `retro_perf_counter`, opaque to this host.
#[repr(C)]
struct RawPerfInterface {
    get_time_usec: Option<unsafe extern "C" fn() -> i64>,
    get_cpu_features: Option<unsafe extern "C" fn() -> u64>,
    get_perf_counter: Option<unsafe extern "C" fn() -> u64>,
    perf_register: Option<unsafe extern "C" fn(*mut c_void)>,
    perf_start: Option<unsafe extern "C" fn(*mut c_void)>,
    perf_stop: Option<unsafe extern "C" fn(*mut c_void)>,
    perf_log: Option<unsafe extern "C" fn()>,
}

unsafe extern "C" fn rumble_noop(_port: c_uint, _effect: c_uint, _strength: u16) -> bool {
    true
}

unsafe extern "C" fn perf_time_noop() -> i64 {
    0
}

unsafe extern "C" fn perf_value_noop() -> u64 {
    0
}

unsafe extern "C" fn perf_counter_noop(_counter: *mut c_void) {}

unsafe extern "C" fn perf_log_noop() {}

/// Printf-style sink handed to the core. Format arguments are not expanded;
/// the raw format string still lands in the log, which beats losing the
/// message.
unsafe extern "C" fn core_log(level: c_uint, fmt: *const c_char) {
    if fmt.is_null() {
        return;
    }

    let text = CStr::from_ptr(fmt).to_string_lossy();
    let text = text.trim_end();

    match level {
        0 => debug!(target: "core", "{text}"),
        1 => info!(target: "core", "{text}"),
        2 => warn!(target: "core", "{text}"),
        _ => log::error!(target: "core", "{text}"),
    }
}

pub unsafe fn handle(command: u32, data: *mut c_void) -> bool {
    let raw = command;
    let Some(command) = Command::from_repr(command & !(ENVIRONMENT_EXPERIMENTAL | ENVIRONMENT_PRIVATE))
    else {
        trace!("{}", crate::error::FrontendError::CoreEnvUnsupported { command: raw });
        return false;
    };

    match command {
        Command::GET_OVERSCAN => {
            if !data.is_null() {
                *data.cast::<bool>() = false;
            }

            true
        }
        Command::GET_CAN_DUPE => {
            if !data.is_null() {
                *data.cast::<bool>() = true;
            }

            true
        }
        Command::SET_MESSAGE => {
            let Some(message) = data.cast_const().cast::<libretro_sys::Message>().as_ref() else {
                return false;
            };

            if let Some(msg) = message.msg.as_ref() {
                let text = CStr::from_ptr(msg).to_string_lossy().into_owned();
                STATE.with_borrow_mut(|state| state.messages.push(text));
            }

            true
        }
        Command::SHUTDOWN => {
            info!("core requested shutdown");
            STATE.with_borrow_mut(|state| state.shutdown_requested = true);

            true
        }
        Command::SET_PERFORMANCE_LEVEL => {
            if let Some(level) = data.cast_const().cast::<c_uint>().as_ref() {
                info!("core reports performance level {level}");
            }

            true
        }
        Command::GET_SYSTEM_DIRECTORY => {
            // The CString stays owned by STATE, so the pointer outlives the
            // borrow below.
            let dir = STATE.with_borrow(|state| {
                state
                    .system_dir
                    .as_ref()
                    .map(|dir| dir.as_ptr())
                    .unwrap_or(null())
            });
            *data.cast::<*const c_char>() = dir;

            true
        }
        Command::SET_PIXEL_FORMAT => {
            let pixel_format = *data.cast_const().cast::<c_uint>();
            let Some(pixel_format) = PixelFormat::from_uint(pixel_format) else {
                warn!("core requested unknown pixel format `{pixel_format}`");
                return false;
            };

            info!("pixel format {pixel_format:?}");
            STATE.with_borrow_mut(|state| state.pixel_format = pixel_format);

            true
        }
        Command::SET_INPUT_DESCRIPTORS => {
            let mut descriptor = data.cast_const().cast::<libretro_sys::InputDescriptor>();
            let mut count = 0usize;

            while let Some(entry) = descriptor.as_ref() {
                if entry.description.is_null() {
                    break;
                }

                count += 1;
                descriptor = descriptor.add(1);
            }

            debug!("core declared {count} input descriptors");

            true
        }
        Command::SET_DISK_CONTROL_INTERFACE => {
            let Some(raw) = data.cast_const().cast::<RawDiskControl>().as_ref() else {
                return false;
            };

            info!("core provides disk control");
            STATE.with_borrow_mut(|state| state.disk_control = Some(*raw));

            true
        }
        Command::GET_VARIABLE => {
            let Some(variable) = data.cast::<Variable>().as_mut() else {
                return false;
            };

            let Some(key) = variable.key.as_ref() else {
                return false;
            };
            let key = CStr::from_ptr(key).to_string_lossy();

            STATE.with_borrow(|state| {
                variable.value = match state.options.value_cstr(&key) {
                    Some(value) => value.as_ptr(),
                    None => {
                        debug!("core queried unknown option `{key}`");
                        null()
                    }
                };
            });

            true
        }
        Command::SET_VARIABLES => {
            let mut variables = data.cast_const().cast::<Variable>();
            let variables = iter::from_fn(|| {
                let variable = variables.as_ref()?;

                // Safety: `.as_ref()?` guarantees non-null ptr
                let key = CStr::from_ptr(variable.key.as_ref()?);
                let key = key.to_string_lossy().into_owned();

                // Safety: `.as_ref()?` guarantees non-null ptr
                let value = CStr::from_ptr(variable.value.as_ref()?);
                let value = value.to_string_lossy().into_owned();

                // Safety: valid until either `key` or `value` are null
                variables = variables.add(1);

                Some((key, value))
            })
            // Safety: fusing prevents iterating past sentinel variable
            .fuse();

            STATE.with_borrow_mut(|state| state.options.replace_from_variables(variables));

            true
        }
        Command::GET_VARIABLE_UPDATE => {
            let updated = STATE.with_borrow_mut(|state| state.options.take_updated());

            if !data.is_null() {
                *data.cast::<bool>() = updated;
            }

            true
        }
        Command::SET_SUPPORT_NO_GAME => {
            let support = data
                .cast_const()
                .cast::<bool>()
                .as_ref()
                .copied()
                .unwrap_or(false);

            STATE.with_borrow_mut(|state| state.support_no_game = support);

            true
        }
        Command::GET_RUMBLE_INTERFACE => {
            let Some(interface) = data.cast::<RawRumbleInterface>().as_mut() else {
                return false;
            };

            interface.set_rumble_state = Some(rumble_noop);

            true
        }
        Command::GET_INPUT_DEVICE_CAPABILITIES => {
            if data.is_null() {
                return false;
            }

            *data.cast::<u64>() =
                (1 << libretro_sys::DEVICE_JOYPAD) | (1 << libretro_sys::DEVICE_ANALOG);

            true
        }
        Command::GET_LOG_INTERFACE => {
            let Some(interface) = data.cast::<RawLogInterface>().as_mut() else {
                return false;
            };

            interface.log = Some(core_log);

            true
        }
        Command::GET_PERF_INTERFACE => {
            let Some(interface) = data.cast::<RawPerfInterface>().as_mut() else {
                return false;
            };

            interface.get_time_usec = Some(perf_time_noop);
            interface.get_cpu_features = Some(perf_value_noop);
            interface.get_perf_counter = Some(perf_value_noop);
            interface.perf_register = Some(perf_counter_noop);
            interface.perf_start = Some(perf_counter_noop);
            interface.perf_stop = Some(perf_counter_noop);
            interface.perf_log = Some(perf_log_noop);

            true
        }
        Command::GET_SAVE_DIRECTORY => {
            let dir = STATE.with_borrow(|state| {
                state
                    .save_dir
                    .as_ref()
                    .map(|dir| dir.as_ptr())
                    .unwrap_or(null())
            });
            *data.cast::<*const c_char>() = dir;

            true
        }
        Command::SET_SYSTEM_AV_INFO => {
            let Some(av_info) = data.cast_const().cast::<SystemAvInfo>().as_ref() else {
                return false;
            };

            info!(
                "core renegotiated AV: {}x{} @ {:.2} fps, {:.0} Hz",
                av_info.geometry.base_width,
                av_info.geometry.base_height,
                av_info.timing.fps,
                av_info.timing.sample_rate,
            );
            STATE.with_borrow_mut(|state| {
                state.pending_av_info = Some(SystemAvInfo {
                    geometry: GameGeometry { ..av_info.geometry },
                    timing: SystemTiming { ..av_info.timing },
                });
            });

            true
        }
        Command::SET_CONTROLLER_INFO => {
            debug!("core declared controller info");

            true
        }
        Command::SET_MEMORY_MAPS => {
            let memory_map = MemoryMap::from_raw(data.cast_const().cast());

            debug!("memory map with {} descriptors", memory_map.len());

            for descriptor in memory_map.descriptors() {
                trace!("{descriptor:?}");
            }

            STATE.with_borrow_mut(|state| state.memory_map = memory_map);

            true
        }
        Command::SET_GEOMETRY => {
            let Some(geometry) = data.cast_const().cast::<GameGeometry>().as_ref() else {
                return false;
            };

            STATE.with_borrow_mut(|state| {
                state.pending_geometry = Some(GameGeometry { ..*geometry })
            });

            true
        }
        Command::GET_LANGUAGE => {
            if !data.is_null() {
                // RETRO_LANGUAGE_ENGLISH
                *data.cast::<c_uint>() = 0;
            }

            true
        }
        Command::GET_CORE_OPTIONS_VERSION => {
            if data.is_null() {
                return false;
            }

            // Pin the v0 variables protocol; the host mirrors it.
            *data.cast::<c_uint>() = 0;

            true
        }
    }
}
