use std::cell::RefCell;
use std::ffi::c_uint;

use log::warn;

use crate::video::Frame;

pub mod ffi;

thread_local! {
    pub static CALLBACKS: RefCell<Box<dyn Callbacks>> = RefCell::new(Stub.boxed());
}

pub fn register(callbacks: Box<dyn Callbacks>) {
    CALLBACKS.set(callbacks);
}

pub fn clear() {
    CALLBACKS.set(Stub.boxed());
}

/// Data-plane callbacks the core drives during `retro_run`. These are pure
/// ingress: none of them may call back into the core.
pub trait Callbacks {
    /// `None` is a dupe frame; the previous frame stays on screen.
    fn video_refresh(&mut self, frame: Option<Frame>);
    fn audio_sample(&mut self, left: i16, right: i16);
    /// Interleaved stereo samples, two per frame.
    fn audio_samples(&mut self, samples: &[i16]);
    fn input_poll(&mut self);
    fn input_state(&mut self, port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16;

    fn boxed(self) -> Box<Self>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Placeholder registered while no session is attached, so a stray core
/// callback is loud instead of undefined.
pub struct Stub;

impl Callbacks for Stub {
    fn video_refresh(&mut self, _frame: Option<Frame>) {
        warn!("video_refresh while no session attached");
    }

    fn audio_sample(&mut self, _left: i16, _right: i16) {
        warn!("audio_sample while no session attached");
    }

    fn audio_samples(&mut self, _samples: &[i16]) {
        warn!("audio_samples while no session attached");
    }

    fn input_poll(&mut self) {
        warn!("input_poll while no session attached");
    }

    fn input_state(&mut self, _port: c_uint, _device: c_uint, _index: c_uint, _id: c_uint) -> i16 {
        0
    }
}
