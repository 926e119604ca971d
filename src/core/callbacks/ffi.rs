use std::ffi::{c_uint, c_void};
use std::slice;

use crate::core::{environment, CALLBACKS, STATE};
use crate::video::Frame;

pub unsafe extern "C" fn video_refresh(
    data: *const c_void,
    width: c_uint,
    height: c_uint,
    pitch: usize,
) {
    let pixel_format = STATE.with_borrow(|state| state.pixel_format);
    let frame = Frame::from_raw(data, width, height, pitch, pixel_format);

    CALLBACKS.with_borrow_mut(|callbacks| callbacks.video_refresh(frame));
}

pub unsafe extern "C" fn audio_sample(left: i16, right: i16) {
    CALLBACKS.with_borrow_mut(|callbacks| callbacks.audio_sample(left, right))
}

pub unsafe extern "C" fn audio_sample_batch(samples: *const i16, num_frames: usize) -> usize {
    let num_channels = 2;
    let samples = slice::from_raw_parts(samples, num_channels * num_frames);

    CALLBACKS.with_borrow_mut(|callbacks| callbacks.audio_samples(samples));

    num_frames
}

pub unsafe extern "C" fn input_poll() {
    CALLBACKS.with_borrow_mut(|callbacks| callbacks.input_poll());
}

pub unsafe extern "C" fn input_state(
    port: c_uint,
    device: c_uint,
    index: c_uint,
    id: c_uint,
) -> i16 {
    CALLBACKS.with_borrow_mut(|callbacks| callbacks.input_state(port, device, index, id))
}

pub unsafe extern "C" fn environment(command: u32, data: *mut c_void) -> bool {
    environment::handle(command, data)
}
