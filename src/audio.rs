use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};
use rodio::{OutputStream, OutputStreamHandle, Source};

/// Device-side output rate. The resampler tracks the core rate onto this.
pub const OUTPUT_RATE: u32 = 48_000;

/// Ring capacity in stereo frames: at least twice the largest expected
/// producer burst (~0.25 s at 48 kHz).
pub const RING_CAPACITY: usize = 32_768;

const FRAC_ONE: u32 = 65_536;

/// Dynamic rate adjust bounds and gain for the drift controller.
pub const RATE_ADJUST_MIN: f32 = 0.97;
pub const RATE_ADJUST_MAX: f32 = 1.03;
pub const RATE_ADJUST_GAIN: f32 = 0.05;
const RING_FILL_TARGET: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StereoFrame {
    pub l: i16,
    pub r: i16,
}

impl StereoFrame {
    /// Frames travel through the ring packed into one 32-bit word so every
    /// slot is a single atomic.
    fn pack(self) -> u32 {
        (self.l as u16 as u32) | ((self.r as u16 as u32) << 16)
    }

    fn unpack(word: u32) -> Self {
        Self {
            l: word as u16 as i16,
            r: (word >> 16) as u16 as i16,
        }
    }
}

/// Lock-free single-producer single-consumer ring of stereo frames.
///
/// Both indices increase monotonically (wrapping); `write - read` is the
/// occupancy and never exceeds capacity. The main thread is the sole
/// producer, the audio driver thread the sole consumer. When a push would
/// exceed capacity the oldest frames are overwritten and counted as
/// overflow; an empty pop is the consumer's cue to emit silence, counted as
/// underflow.
pub struct SpscRing {
    frames: Box<[AtomicU32]>,
    write: AtomicUsize,
    read: AtomicUsize,
    overflows: AtomicU64,
    underflows: AtomicU64,
}

impl SpscRing {
    pub fn new(capacity: usize) -> Arc<Self> {
        assert!(capacity > 0);

        let frames = (0..capacity)
            .map(|_| AtomicU32::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Arc::new(Self {
            frames,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
            overflows: AtomicU64::new(0),
            underflows: AtomicU64::new(0),
        })
    }

    pub fn capacity(&self) -> usize {
        self.frames.len()
    }

    pub fn occupancy(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Acquire);

        write.wrapping_sub(read)
    }

    pub fn fill_ratio(&self) -> f32 {
        self.occupancy() as f32 / self.capacity() as f32
    }

    pub fn overflows(&self) -> u64 {
        self.overflows.load(Ordering::Relaxed)
    }

    pub fn underflows(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    /// Producer side. Oldest frames are sacrificed when the ring is full;
    /// a burst larger than the whole ring keeps only its tail.
    pub fn push(&self, mut input: &[StereoFrame]) {
        let capacity = self.capacity();

        if input.len() > capacity {
            self.overflows
                .fetch_add((input.len() - capacity) as u64, Ordering::Relaxed);
            input = &input[input.len() - capacity..];
        }

        let write = self.write.load(Ordering::Relaxed);
        let mut read = self.read.load(Ordering::Acquire);

        // Claim space by advancing the read index past the oldest frames.
        // The consumer may race ahead of us, in which case the exchange
        // fails and the recomputed deficit shrinks.
        loop {
            let free = capacity - write.wrapping_sub(read);

            if input.len() <= free {
                break;
            }

            let deficit = input.len() - free;
            let claimed = read.wrapping_add(deficit);

            match self
                .read
                .compare_exchange(read, claimed, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.overflows.fetch_add(deficit as u64, Ordering::Relaxed);
                    break;
                }
                Err(current) => read = current,
            }
        }

        for (offset, frame) in input.iter().enumerate() {
            let slot = write.wrapping_add(offset) % capacity;
            self.frames[slot].store(frame.pack(), Ordering::Relaxed);
        }

        self.write
            .store(write.wrapping_add(input.len()), Ordering::Release);
    }

    /// Consumer side: at most one frame, `None` when empty.
    pub fn pop_one(&self) -> Option<StereoFrame> {
        let read = self.read.load(Ordering::Relaxed);
        let write = self.write.load(Ordering::Acquire);

        if write.wrapping_sub(read) == 0 {
            return None;
        }

        let frame = StereoFrame::unpack(self.frames[read % self.capacity()].load(Ordering::Relaxed));

        // The producer may have reclaimed this slot while overwriting the
        // oldest frames; the exchange detects that and the stale frame is
        // discarded rather than read twice.
        match self.read.compare_exchange(
            read,
            read.wrapping_add(1),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Some(frame),
            Err(_) => None,
        }
    }

    pub fn note_underflow(&self, frames: u64) {
        self.underflows.fetch_add(frames, Ordering::Relaxed);
    }

    #[cfg(test)]
    fn drain(&self) -> Vec<StereoFrame> {
        std::iter::from_fn(|| self.pop_one()).collect()
    }
}

/// Shared rate state between the session (producer of adjustments) and the
/// audio thread (consumer). Plain atomics; the audio hot path takes no lock.
pub struct RateControl {
    /// Base step `in_rate / out_rate` in 16.16.
    base_step: AtomicU32,
    /// Current adjust factor as f32 bits.
    adjust: AtomicU32,
}

impl RateControl {
    pub fn new(in_rate: f64, out_rate: u32) -> Arc<Self> {
        let this = Arc::new(Self {
            base_step: AtomicU32::new(0),
            adjust: AtomicU32::new(1.0f32.to_bits()),
        });
        this.set_input_rate(in_rate, out_rate);

        this
    }

    pub fn set_input_rate(&self, in_rate: f64, out_rate: u32) {
        let step = (in_rate / out_rate as f64 * FRAC_ONE as f64) as u32;
        self.base_step.store(step.max(1), Ordering::Relaxed);
    }

    /// Drift controller: nudge the resampling step so the ring converges on
    /// half full. `adjust = clamp(1 + k(r - 1/2))`.
    pub fn update_from_fill(&self, ratio: f32) -> f32 {
        let adjust = (1.0 + RATE_ADJUST_GAIN * (ratio - RING_FILL_TARGET))
            .clamp(RATE_ADJUST_MIN, RATE_ADJUST_MAX);
        self.adjust.store(adjust.to_bits(), Ordering::Relaxed);

        adjust
    }

    pub fn adjust(&self) -> f32 {
        f32::from_bits(self.adjust.load(Ordering::Relaxed))
    }

    /// Effective 16.16 step for the resampler.
    pub fn step(&self) -> u32 {
        let base = self.base_step.load(Ordering::Relaxed) as f64;

        (base * self.adjust() as f64) as u32
    }
}

/// Linear resampler over 16.16 fixed-point stepping, deterministic on
/// devices without an FPU in the hot path.
pub struct Resampler {
    step: u32,
    frac: u32,
    prev: StereoFrame,
    curr: StereoFrame,
    primed: bool,
}

impl Resampler {
    pub fn new(step: u32) -> Self {
        Self {
            step: step.max(1),
            frac: 0,
            prev: StereoFrame::default(),
            curr: StereoFrame::default(),
            primed: false,
        }
    }

    pub fn set_step(&mut self, step: u32) {
        self.step = step.max(1);
    }

    /// One output frame interpolated at `frac/65536` between the previous
    /// and current input frames, or `None` when the input is starved. The
    /// fractional position survives starvation so playback resumes in
    /// phase.
    pub fn next_output(
        &mut self,
        mut pull: impl FnMut() -> Option<StereoFrame>,
    ) -> Option<StereoFrame> {
        if !self.primed {
            self.prev = pull()?;
            self.curr = pull().unwrap_or(self.prev);
            self.frac = 0;
            self.primed = true;
        }

        while self.frac >= FRAC_ONE {
            let next = pull()?;

            self.prev = self.curr;
            self.curr = next;
            self.frac -= FRAC_ONE;
        }

        let out = lerp(self.prev, self.curr, self.frac);
        self.frac += self.step;

        Some(out)
    }
}

fn lerp(prev: StereoFrame, curr: StereoFrame, frac: u32) -> StereoFrame {
    let t = frac as i32;

    StereoFrame {
        l: (prev.l as i32 + (((curr.l as i32 - prev.l as i32) * t) >> 16)) as i16,
        r: (prev.r as i32 + (((curr.r as i32 - prev.r as i32) * t) >> 16)) as i16,
    }
}

/// The rodio source the audio driver thread drains. Sole consumer of the
/// ring; empty pulls emit silence and bump the underflow counter.
pub struct RingSource {
    ring: Arc<SpscRing>,
    rate: Arc<RateControl>,
    resampler: Resampler,
    pending: Option<i16>,
}

impl RingSource {
    pub fn new(ring: Arc<SpscRing>, rate: Arc<RateControl>) -> Self {
        let resampler = Resampler::new(rate.step());

        Self {
            ring,
            rate,
            resampler,
            pending: None,
        }
    }

    fn next_frame(&mut self) -> StereoFrame {
        let Self {
            ring,
            rate,
            resampler,
            ..
        } = self;

        resampler.set_step(rate.step());

        match resampler.next_output(|| ring.pop_one()) {
            Some(frame) => frame,
            None => {
                ring.note_underflow(1);
                StereoFrame::default()
            }
        }
    }
}

impl Iterator for RingSource {
    type Item = i16;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(sample) = self.pending.take() {
            return Some(sample);
        }

        let frame = self.next_frame();
        self.pending = Some(frame.r);

        Some(frame.l)
    }
}

impl Source for RingSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        2
    }

    fn sample_rate(&self) -> u32 {
        OUTPUT_RATE
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

/// Owns the output stream; the ring producer lives with the host callbacks,
/// which hold their own handle to the same ring.
pub struct AudioOutput {
    _stream: OutputStream,
    _handle: OutputStreamHandle,
    ring: Arc<SpscRing>,
    rate: Arc<RateControl>,
}

impl AudioOutput {
    /// Opens the device stream and starts draining the ring. The ring is
    /// created ahead of time so the core's audio callbacks can be wired
    /// before AV timing is known.
    pub fn start(ring: Arc<SpscRing>, rate: Arc<RateControl>) -> Result<Self> {
        let (stream, handle) =
            OutputStream::try_default().context("failed to open audio output")?;
        let source = RingSource::new(Arc::clone(&ring), Arc::clone(&rate));

        handle
            .play_raw(source.convert_samples())
            .context("failed to play stream")?;
        info!("audio: device rate {OUTPUT_RATE} Hz");

        Ok(Self {
            _stream: stream,
            _handle: handle,
            ring,
            rate,
        })
    }

    /// Called from the session every rate-control interval.
    pub fn update_rate_adjust(&self) -> f32 {
        self.rate.update_from_fill(self.ring.fill_ratio())
    }

    pub fn rate_adjust(&self) -> f32 {
        self.rate.adjust()
    }

    pub fn set_core_rate(&self, core_sample_rate: f64) {
        self.rate.set_input_rate(core_sample_rate, OUTPUT_RATE);
        warn!("audio: core sample rate changed to {core_sample_rate:.1} Hz");
    }

    pub fn ring(&self) -> &Arc<SpscRing> {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(n: i16) -> StereoFrame {
        StereoFrame { l: n, r: -n }
    }

    #[test]
    fn ring_accepts_capacity_then_overwrites_oldest() {
        let ring = SpscRing::new(8);
        let frames = (0..8).map(frame).collect::<Vec<_>>();

        ring.push(&frames);
        assert_eq!(ring.occupancy(), 8);
        assert_eq!(ring.overflows(), 0);

        ring.push(&[frame(8)]);
        assert_eq!(ring.occupancy(), 8);
        assert_eq!(ring.overflows(), 1);

        // Frame 0 was sacrificed; order is preserved from frame 1 on.
        let drained = ring.drain();
        assert_eq!(drained.first(), Some(&frame(1)));
        assert_eq!(drained.last(), Some(&frame(8)));
    }

    #[test]
    fn ring_never_reads_a_frame_twice() {
        let ring = SpscRing::new(4);

        ring.push(&[frame(1), frame(2)]);
        assert_eq!(ring.pop_one(), Some(frame(1)));
        assert_eq!(ring.pop_one(), Some(frame(2)));
        assert_eq!(ring.pop_one(), None);
        assert_eq!(ring.occupancy(), 0);
    }

    #[test]
    fn ring_occupancy_never_exceeds_capacity() {
        let ring = SpscRing::new(4);

        for round in 0..10 {
            ring.push(&[frame(round), frame(round + 1), frame(round + 2)]);
            assert!(ring.occupancy() <= 4);
            ring.pop_one();
        }
    }

    #[test]
    fn burst_larger_than_ring_keeps_tail() {
        let ring = SpscRing::new(4);
        let frames = (0..10).map(frame).collect::<Vec<_>>();

        ring.push(&frames);

        let drained = ring.drain();
        assert_eq!(drained, vec![frame(6), frame(7), frame(8), frame(9)]);
        assert_eq!(ring.overflows(), 6);
    }

    #[test]
    fn resampler_is_identity_at_equal_rates() {
        let input = (0..64).map(frame).collect::<Vec<_>>();
        let mut feed = input.iter().copied();
        let mut resampler = Resampler::new(FRAC_ONE);
        let mut out = Vec::new();

        while let Some(sample) = resampler.next_output(|| feed.next()) {
            out.push(sample);
        }

        // Identity within 1 LSB; the fixed-point path is exact at t = 0.
        assert_eq!(out.len(), input.len() - 1);
        assert_eq!(&out[..], &input[..out.len()]);
    }

    #[test]
    fn upsampling_yields_expected_output_count() {
        // in 32000 -> out 48000: at least floor(N * 48/32) - 1 frames.
        let n: i16 = 320;
        let input = (0..n).map(frame).collect::<Vec<_>>();
        let mut feed = input.iter().copied();
        let step = (32_000u64 * FRAC_ONE as u64 / 48_000) as u32;
        let mut resampler = Resampler::new(step);
        let mut produced = 0usize;

        while resampler.next_output(|| feed.next()).is_some() {
            produced += 1;
        }

        let expected = n as usize * 48_000 / 32_000;
        assert!(produced >= expected - 1, "{produced} < {expected} - 1");
    }

    #[test]
    fn resampler_survives_starvation_in_phase() {
        let mut resampler = Resampler::new(FRAC_ONE * 2);

        let mut feed = vec![frame(0), frame(10)].into_iter();
        assert_eq!(resampler.next_output(|| feed.next()), Some(frame(0)));
        // Starved mid-advance: position is retained.
        assert_eq!(resampler.next_output(|| feed.next()), None);

        let mut feed = vec![frame(20), frame(30)].into_iter();
        let resumed = resampler.next_output(|| feed.next()).unwrap();
        assert_eq!(resumed, frame(20));
    }

    #[test]
    fn rate_adjust_tracks_fill_and_clamps() {
        let rate = RateControl::new(48_000.0, OUTPUT_RATE);

        assert!((rate.update_from_fill(0.5) - 1.0).abs() < 1e-6);
        assert!(rate.update_from_fill(0.9) > 1.0);
        assert!(rate.update_from_fill(1.0) <= RATE_ADJUST_MAX);
        assert!(rate.update_from_fill(0.0) >= RATE_ADJUST_MIN);
    }

    #[test]
    fn rate_step_scales_with_adjust() {
        let rate = RateControl::new(48_000.0, OUTPUT_RATE);

        rate.update_from_fill(0.5);
        let base = rate.step();

        rate.update_from_fill(1.0);
        assert!(rate.step() > base);

        rate.update_from_fill(0.0);
        assert!(rate.step() < base);
    }
}
