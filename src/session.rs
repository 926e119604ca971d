use std::cell::{Cell, RefCell};
use std::ffi::c_uint;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use log::{debug, error, info, warn};

use crate::audio::{AudioOutput, RateControl, SpscRing, StereoFrame, OUTPUT_RATE, RING_CAPACITY};
use crate::cheats::{self, Cheat};
use crate::config::Cascade;
use crate::core::{self, Callbacks, Core};
use crate::error::{FrontendError, Outcome, Result};
use crate::m3u;
use crate::menu::{CheatView, Menu, MenuCommand, MenuSnapshot, OptionView, SLOT_ROWS};
use crate::pad::{Button, Pad, PadSnapshot};
use crate::paths::{Paths, AUTO_SLOT};
use crate::persist::{self, ResumeToken, SramStore};
use crate::platform::Platform;
use crate::signal;
use crate::video::{Frame, Hud, Presenter, ScalePolicy, Sharpness};

/// Drift control runs every this many ticks.
const RATE_CONTROL_INTERVAL: u32 = 30;

/// Consecutive overruns before the session declares overload and sheds
/// non-essential work for a while.
const OVERLOAD_THRESHOLD: u32 = 30;
const OVERLOAD_WINDOW_US: u64 = 2_000_000;

/// Persistence flushes slower than this draw a warning.
const FLUSH_BUDGET_US: u128 = 250_000;

const MENU_TICK_US: u64 = 16_666;

/// Frontend-owned options, resolved through the same cascade as core
/// options under `frontend.*` keys.
struct FrontendOptions {
    scaling: ScalePolicy,
    sharpness: Sharpness,
    scanlines: bool,
    show_fps: bool,
    fast_forward: bool,
    ff_max: u32,
    cpu: String,
    auto_resume: bool,
    dirty: bool,
}

const CPU_VALUES: [&str; 3] = ["Powersave", "Normal", "Performance"];
const FF_MAX_RANGE: (u32, u32) = (2, 8);

impl FrontendOptions {
    fn from_cascade(cascade: &Cascade) -> Self {
        let value = |key: &str| cascade.effective(key).map(|(value, _)| value.to_owned());
        let toggled = |key: &str| value(key).as_deref() == Some("On");

        Self {
            scaling: ScalePolicy::from_value(value("frontend.scaling").as_deref().unwrap_or("")),
            sharpness: Sharpness::from_value(value("frontend.sharpness").as_deref().unwrap_or("")),
            scanlines: toggled("frontend.scanlines"),
            show_fps: toggled("frontend.fps"),
            fast_forward: value("frontend.fast_forward").as_deref() != Some("Off"),
            ff_max: value("frontend.ff_max")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(4)
                .clamp(FF_MAX_RANGE.0, FF_MAX_RANGE.1),
            cpu: value("frontend.cpu").unwrap_or_else(|| "Normal".to_owned()),
            auto_resume: toggled("frontend.resume"),
            dirty: false,
        }
    }

    fn views(&self, cascade: &Cascade) -> Vec<OptionView> {
        let locked = |key: &str| {
            cascade
                .effective(key)
                .map(|(_, locked)| locked)
                .unwrap_or(false)
        };
        let view = |key: &str, label: &str, value: String, multi: bool| {
            let locked = locked(key);

            OptionView {
                key: key.to_owned(),
                label: label.to_owned(),
                value,
                editable: multi && !locked,
                locked,
            }
        };
        let on_off = |on: bool| if on { "On" } else { "Off" }.to_owned();

        vec![
            view(
                "frontend.scaling",
                "Scaling",
                self.scaling.value().to_owned(),
                true,
            ),
            view(
                "frontend.sharpness",
                "Sharpness",
                self.sharpness.value().to_owned(),
                true,
            ),
            view(
                "frontend.scanlines",
                "Scanlines",
                on_off(self.scanlines),
                true,
            ),
            view("frontend.fps", "Show FPS", on_off(self.show_fps), true),
            view(
                "frontend.fast_forward",
                "Fast forward",
                on_off(self.fast_forward),
                true,
            ),
            view(
                "frontend.ff_max",
                "Fast forward cap",
                format!("{}x", self.ff_max),
                true,
            ),
            view("frontend.cpu", "CPU speed", self.cpu.clone(), true),
            view("frontend.resume", "Auto resume", on_off(self.auto_resume), true),
        ]
    }

    fn cycle(&mut self, key: &str, forward: bool) {
        match key {
            "frontend.scaling" => {
                self.scaling = cycle_values(&ScalePolicy::VALUES, self.scaling.value(), forward)
                    .map(ScalePolicy::from_value)
                    .unwrap_or(self.scaling);
            }
            "frontend.sharpness" => {
                self.sharpness = cycle_values(&Sharpness::VALUES, self.sharpness.value(), forward)
                    .map(Sharpness::from_value)
                    .unwrap_or(self.sharpness);
            }
            "frontend.scanlines" => self.scanlines = !self.scanlines,
            "frontend.fps" => self.show_fps = !self.show_fps,
            "frontend.fast_forward" => self.fast_forward = !self.fast_forward,
            "frontend.ff_max" => {
                self.ff_max = if forward {
                    if self.ff_max >= FF_MAX_RANGE.1 {
                        FF_MAX_RANGE.0
                    } else {
                        self.ff_max + 1
                    }
                } else if self.ff_max <= FF_MAX_RANGE.0 {
                    FF_MAX_RANGE.1
                } else {
                    self.ff_max - 1
                };
            }
            "frontend.cpu" => {
                if let Some(value) = cycle_values(&CPU_VALUES, &self.cpu, forward) {
                    self.cpu = value.to_owned();
                }
            }
            "frontend.resume" => self.auto_resume = !self.auto_resume,
            _ => return,
        }

        self.dirty = true;
    }

    fn to_desired(&self, desired: &mut IndexMap<String, String>) {
        let on_off = |on: bool| if on { "On" } else { "Off" }.to_owned();

        desired.insert("frontend.scaling".into(), self.scaling.value().to_owned());
        desired.insert(
            "frontend.sharpness".into(),
            self.sharpness.value().to_owned(),
        );
        desired.insert("frontend.scanlines".into(), on_off(self.scanlines));
        desired.insert("frontend.fps".into(), on_off(self.show_fps));
        desired.insert("frontend.fast_forward".into(), on_off(self.fast_forward));
        desired.insert("frontend.ff_max".into(), self.ff_max.to_string());
        desired.insert("frontend.cpu".into(), self.cpu.clone());
        desired.insert("frontend.resume".into(), on_off(self.auto_resume));
    }
}

fn cycle_values<'v>(values: &[&'v str], current: &str, forward: bool) -> Option<&'v str> {
    let index = values.iter().position(|value| *value == current)?;
    let count = values.len();
    let next = if forward {
        (index + 1) % count
    } else {
        (index + count - 1) % count
    };

    values.get(next).copied()
}

/// The host callbacks for a live session: pure data ingress, never
/// re-entering the core.
struct SessionCallbacks {
    video: Rc<RefCell<Option<Frame>>>,
    ring: Arc<SpscRing>,
    input: Rc<Cell<PadSnapshot>>,
    scratch: Vec<StereoFrame>,
}

impl Callbacks for SessionCallbacks {
    fn video_refresh(&mut self, frame: Option<Frame>) {
        // None is a dupe; the previous frame stays current.
        if let Some(frame) = frame {
            *self.video.borrow_mut() = Some(frame);
        }
    }

    fn audio_sample(&mut self, left: i16, right: i16) {
        self.ring.push(&[StereoFrame { l: left, r: right }]);
    }

    fn audio_samples(&mut self, samples: &[i16]) {
        self.scratch.clear();
        self.scratch.extend(samples.chunks_exact(2).map(|pair| StereoFrame {
            l: pair[0],
            r: pair[1],
        }));
        self.ring.push(&self.scratch);
    }

    fn input_poll(&mut self) {
        // The session snapshots the pad once per tick before retro_run.
    }

    fn input_state(&mut self, port: c_uint, device: c_uint, index: c_uint, id: c_uint) -> i16 {
        if port != 0 {
            return 0;
        }

        let snapshot = self.input.get();

        match device {
            libretro_sys::DEVICE_JOYPAD => Button::from_raw_retro_joypad_device_id(id)
                .map(|button| snapshot.buttons.contains(button) as i16)
                .unwrap_or(0),
            libretro_sys::DEVICE_ANALOG => {
                let stick = if index == 0 {
                    snapshot.left
                } else {
                    snapshot.right
                };

                match id {
                    libretro_sys::DEVICE_ID_ANALOG_X => stick.0,
                    libretro_sys::DEVICE_ID_ANALOG_Y => stick.1,
                    _ => 0,
                }
            }
            _ => 0,
        }
    }
}

enum MenuExit {
    Resume,
    Quit,
    Shutdown,
}

/// The session controller: owns every component and runs the tick loop.
/// Field order doubles as teardown order.
pub struct Session {
    paths: Paths,
    cascade: Cascade,
    frontend: FrontendOptions,
    cheats: Vec<Cheat>,
    cheats_dirty: bool,
    sram: SramStore,
    discs: Vec<PathBuf>,
    video_sink: Rc<RefCell<Option<Frame>>>,
    input_sink: Rc<Cell<PadSnapshot>>,
    core: Core,
    audio: AudioOutput,
    presenter: Presenter,
    pad: Pad,
    platform: Platform,
    tick_us: u64,
    pending_reload: bool,
    last_slot: Option<u8>,
    fps_value: Option<f32>,
    fps_window_start: u64,
    fps_ticks: u32,
    battery: Option<u8>,
    battery_polled_at: u64,
    overruns: u32,
    overload_until: u64,
    rate_div: u32,
}

impl Session {
    /// Startup order per the component graph: platform, config, pad,
    /// audio plumbing, presenter, host, persistence.
    pub fn boot(paths: Paths) -> Result<Self> {
        signal::install();

        let platform = Platform::init(&paths)?;
        let cascade = Cascade::load(&paths);
        let frontend = FrontendOptions::from_cascade(&cascade);

        let ring = SpscRing::new(RING_CAPACITY);
        let rate = RateControl::new(OUTPUT_RATE as f64, OUTPUT_RATE);

        let spec = platform.spec().clone();
        let mut presenter = Presenter::new(spec.width, spec.height);
        let video_sink: Rc<RefCell<Option<Frame>>> = Rc::new(RefCell::new(None));
        let input_sink: Rc<Cell<PadSnapshot>> = Rc::new(Cell::new(PadSnapshot::default()));

        core::register(
            SessionCallbacks {
                video: Rc::clone(&video_sink),
                ring: Arc::clone(&ring),
                input: Rc::clone(&input_sink),
                scratch: Vec::with_capacity(1024),
            }
            .boxed(),
        );

        let mut core = Core::load(&paths.core, &paths)?;

        // Multi-disc sets are validated up front; a bad playlist is a game
        // load failure before the core ever sees it.
        let discs = if m3u::is_playlist(&paths.rom) {
            match m3u::load(&paths.rom) {
                Ok(discs) => {
                    info!("playlist with {} discs", discs.len());
                    discs
                }
                Err(err) => {
                    error!("{err:#}");
                    return Err(FrontendError::GameLoad {
                        path: paths.rom.clone(),
                    });
                }
            }
        } else {
            Vec::new()
        };

        // Playlists boot from their first listed disc; cores do not parse
        // .m3u themselves. The rest of the set goes into the drive below.
        let content = discs.first().cloned().unwrap_or_else(|| paths.rom.clone());

        core.load_game(Some(&content))?;

        if discs.len() > 1 {
            register_playlist_discs(&core, &discs);
        }

        core.with_options(|options| options.apply_cascade(&cascade));
        info!(
            "{} core options after cascade",
            core.with_options(|options| options.len())
        );

        let av_info = core.av_info();
        presenter.set_aspect(av_info.geometry.aspect_ratio);
        rate.set_input_rate(av_info.timing.sample_rate, OUTPUT_RATE);

        let fps = av_info.timing.fps;
        let tick_us = tick_duration_us(fps);

        let audio = AudioOutput::start(ring, rate)
            .map_err(|err| FrontendError::PlatformInit(format!("{err:#}")))?;

        let mut sram = SramStore::new(&paths);

        if let Some(bytes) = sram.load_sram() {
            core.restore_save_ram(&bytes);
            info!("restored {} bytes of SRAM", bytes.len());
        }

        if let Some(bytes) = sram.load_rtc() {
            core.restore_rtc_ram(&bytes);
        }

        let cheats = cheats::load(&paths.cheats_path());

        core.cheat_reset();

        for cheat in &cheats {
            core.cheat_set(cheat.index, cheat.enabled, &cheat.code);
        }

        if let Err(err) = persist::note_recent(&paths.recent_path(), &paths.rom, None) {
            warn!("could not update recent list: {err}");
        }

        // A token pointing at this ROM means the launcher restarted us to
        // resume; the token is consumed either way.
        let resume_here = persist::read_resume_token(&paths.resume_token_path())
            .map(|token| token.rom == paths.rom)
            .unwrap_or(false);
        persist::clear_resume_token(&paths.resume_token_path());

        platform.set_cpu_speed(&frontend.cpu);

        let battery = platform.battery_percent();

        core.start()?;

        if resume_here && frontend.auto_resume {
            let auto_state = paths.state_path(AUTO_SLOT);

            match persist::read_state(&auto_state) {
                Ok(bytes) => match core.load_state(&bytes) {
                    Ok(()) => info!("resumed from auto slot"),
                    Err(err) => warn!("auto resume failed: {err}"),
                },
                Err(err) => debug!("no auto state to resume ({err})"),
            }
        }

        let mut session = Self {
            paths,
            cascade,
            frontend,
            cheats,
            cheats_dirty: false,
            sram,
            discs,
            video_sink,
            input_sink,
            core,
            audio,
            presenter,
            pad: Pad::new(),
            platform,
            tick_us,
            pending_reload: false,
            last_slot: None,
            fps_value: None,
            fps_window_start: 0,
            fps_ticks: 0,
            battery,
            battery_polled_at: 0,
            overruns: 0,
            overload_until: 0,
            rate_div: 0,
        };
        session.apply_frontend();

        Ok(session)
    }

    pub fn run(mut self) -> Outcome {
        let outcome = self.main_loop();

        self.shutdown(outcome)
    }

    fn main_loop(&mut self) -> Outcome {
        loop {
            let tick_start = self.platform.now_us();

            if signal::shutdown_requested() || self.platform.wants_close() {
                info!("shutdown requested");
                return Outcome::Normal;
            }

            if signal::take_reload_request() {
                self.reload_config();
            }

            let raw = self.platform.pump();
            self.pad.poll(raw, tick_start);
            self.input_sink.set(self.pad.snapshot());

            if self.pad.tapped_menu() {
                match self.run_menu() {
                    MenuExit::Resume => continue,
                    MenuExit::Quit => return Outcome::NextCommand,
                    MenuExit::Shutdown => return Outcome::Normal,
                }
            }

            let fast_forward =
                self.frontend.fast_forward && self.pad.is_pressed(Button::R2);
            let ticks = if fast_forward { self.frontend.ff_max } else { 1 };

            for _ in 0..ticks {
                match self.core.tick() {
                    Ok(()) => {}
                    Err(err) if err.is_fatal() => return Outcome::Fatal(err),
                    Err(err) => {
                        error!("{err:#}");
                        self.presenter
                            .set_toast(format!("{err}"), self.platform.now_us());
                        break;
                    }
                }
            }

            if self.core.take_shutdown_request() {
                return Outcome::Normal;
            }

            self.drain_core_events();
            self.present_tick(fast_forward);

            self.rate_div += 1;

            if self.rate_div >= RATE_CONTROL_INTERVAL {
                self.rate_div = 0;
                self.audio.update_rate_adjust();
            }

            self.account_fps(tick_start);

            if !fast_forward {
                self.pace(tick_start);
            }
        }
    }

    fn drain_core_events(&mut self) {
        let now = self.platform.now_us();

        for message in self.core.take_messages() {
            self.presenter.set_toast(message, now);
        }

        if let Some(av_info) = self.core.take_av_change() {
            self.audio.set_core_rate(av_info.timing.sample_rate);
            self.tick_us = tick_duration_us(av_info.timing.fps);
            self.presenter.set_aspect(av_info.geometry.aspect_ratio);
            self.presenter.invalidate_rect();
        }

        if let Some(geometry) = self.core.take_geometry_change() {
            self.presenter.set_aspect(geometry.aspect_ratio);
            self.presenter.invalidate_rect();
        }
    }

    fn present_tick(&mut self, fast_forward: bool) {
        let now = self.platform.now_us();
        let overloaded = now < self.overload_until;

        self.presenter.scanlines = self.frontend.scanlines && !overloaded;

        let frame = self.video_sink.borrow_mut().take();

        match frame {
            Some(frame) => self.presenter.present(&frame),
            None => self.presenter.present_previous(),
        }

        if !overloaded {
            if now.saturating_sub(self.battery_polled_at) > 5_000_000 {
                self.battery = self.platform.battery_percent();
                self.battery_polled_at = now;
            }

            let hud = Hud {
                fps: self.fps_value.filter(|_| self.frontend.show_fps),
                slot: self.last_slot,
                fast_forward,
                battery: self.battery,
            };

            self.presenter.draw_overlays(&hud, now);
        }

        if let Err(err) = self.platform.present(self.presenter.surface()) {
            // The surface going away mid-session is the platform telling us
            // to leave; the loop exits on wants_close next iteration.
            warn!("{err}");
        }
    }

    fn account_fps(&mut self, tick_start: u64) {
        self.fps_ticks += 1;

        let elapsed = tick_start.saturating_sub(self.fps_window_start);

        if elapsed >= 1_000_000 {
            self.fps_value = Some(self.fps_ticks as f32 * 1_000_000.0 / elapsed as f32);
            self.fps_window_start = tick_start;
            self.fps_ticks = 0;

            let ring = self.audio.ring();
            debug!(
                "fps {:.1}, ring fill {:.2}, underflows {}, overflows {}, rate adjust {:.4}",
                self.fps_value.unwrap_or_default(),
                ring.fill_ratio(),
                ring.underflows(),
                ring.overflows(),
                self.audio.rate_adjust(),
            );
        }
    }

    /// End-of-tick pacing with overload detection: sustained overruns log a
    /// `Timing` fault and shed HUD and scanline work for a window.
    fn pace(&mut self, tick_start: u64) {
        let deadline = tick_start + self.tick_us;
        let now = self.platform.now_us();

        if now >= deadline {
            self.overruns += 1;

            if self.overruns >= OVERLOAD_THRESHOLD {
                self.overruns = 0;
                self.overload_until = now + OVERLOAD_WINDOW_US;
                warn!("{}", FrontendError::Timing);
            }

            return;
        }

        self.overruns = 0;
        self.platform.sleep_until(deadline);
    }

    fn run_menu(&mut self) -> MenuExit {
        if let Err(err) = self.core.pause() {
            warn!("{err}");
            return MenuExit::Resume;
        }

        info!("menu entered");

        let backdrop = self.presenter.snapshot();
        let mut menu = Menu::new(self.menu_snapshot());

        let exit = loop {
            let now = self.platform.now_us();

            if signal::shutdown_requested() || self.platform.wants_close() {
                break MenuExit::Shutdown;
            }

            let raw = self.platform.pump();
            self.pad.poll(raw, now);

            let commands = menu.update(&self.pad);
            let refresh = !commands.is_empty();
            let mut done = None;

            for command in commands {
                match command {
                    MenuCommand::Resume => done = Some(MenuExit::Resume),
                    MenuCommand::Quit => done = Some(MenuExit::Quit),
                    MenuCommand::SaveState(slot) => self.do_save_state(slot),
                    MenuCommand::LoadState(slot) => self.do_load_state(slot),
                    MenuCommand::CycleCoreOption { key, forward } => {
                        let needs_reload =
                            self.core.with_options(|options| options.cycle(&key, forward));

                        if needs_reload {
                            self.pending_reload = true;
                            self.presenter
                                .set_toast("Applies after restart", now);
                        }
                    }
                    MenuCommand::CycleFrontendOption { key, forward } => {
                        self.frontend.cycle(&key, forward);
                        self.apply_frontend();
                    }
                    MenuCommand::ToggleCheat(index) => self.toggle_cheat(index),
                    MenuCommand::SwapDisc(index) => self.do_swap_disc(index),
                }
            }

            if refresh {
                menu.set_snapshot(self.menu_snapshot());
            }

            menu.render(&mut self.presenter, &backdrop);

            if self.platform.present(self.presenter.surface()).is_err() {
                break MenuExit::Shutdown;
            }

            if let Some(exit) = done {
                break exit;
            }

            self.platform.sleep_until(now + MENU_TICK_US);
        };

        // Pause boundary: battery memory goes to disk here.
        self.flush_sram();

        if self.pending_reload && matches!(exit, MenuExit::Resume) {
            self.pending_reload = false;
            self.apply_pending_reset();
        }

        // The frozen frame stays up until the core delivers the next one.
        self.presenter.restore(&backdrop);

        if matches!(exit, MenuExit::Resume) {
            if let Err(err) = self.core.start() {
                warn!("{err}");
            }

            info!("menu exited, resumed");
        }

        exit
    }

    fn menu_snapshot(&self) -> MenuSnapshot {
        let core_options = self.core.with_options(|options| {
            options
                .iter()
                .map(|option| OptionView {
                    key: option.key.clone(),
                    label: option.label.clone(),
                    value: option.value().to_owned(),
                    editable: option.editable(),
                    locked: option.locked,
                })
                .collect()
        });

        let (disc_count, disc_index) = match self.core.disk_control() {
            Some(disk) => (disk.num_images(), disk.image_index()),
            None => (self.discs.len() as u32, 0),
        };

        let mut slots_present = [false; SLOT_ROWS];

        for (slot, present) in slots_present.iter_mut().enumerate() {
            *present = self.paths.state_path(slot as u8).exists();
        }

        MenuSnapshot {
            frontend_options: self.frontend.views(&self.cascade),
            core_options,
            cheats: self
                .cheats
                .iter()
                .map(|cheat| CheatView {
                    description: cheat.description.clone(),
                    enabled: cheat.enabled,
                })
                .collect(),
            disc_count,
            disc_index,
            slots_present,
        }
    }

    fn do_save_state(&mut self, slot: u8) {
        let started = Instant::now();
        let now = self.platform.now_us();

        match self.core.save_state() {
            Ok(bytes) => {
                let path = self.paths.state_path(slot);

                match persist::write_state(&path, &bytes) {
                    Ok(()) => {
                        self.last_slot = Some(slot);
                        self.presenter.set_toast(format!("Saved slot {slot}"), now);
                        info!("state saved to {} ({} bytes)", path.display(), bytes.len());
                    }
                    Err(err) => {
                        let err = FrontendError::io(path, err);
                        error!("{err:#}");
                        self.presenter.set_toast(format!("{err}"), now);
                    }
                }
            }
            Err(err) => {
                error!("{err:#}");
                self.presenter.set_toast(format!("{err}"), now);
            }
        }

        // Slot writes share the pause boundary with SRAM.
        self.flush_sram();

        if started.elapsed().as_micros() > FLUSH_BUDGET_US {
            warn!("state save exceeded the flush budget");
        }
    }

    fn do_load_state(&mut self, slot: u8) {
        let now = self.platform.now_us();
        let path = self.paths.state_path(slot);

        let bytes = match persist::read_state(&path) {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = FrontendError::io(path, err);
                warn!("{err:#}");
                self.presenter.set_toast(format!("{err}"), now);
                return;
            }
        };

        match self.core.load_state(&bytes) {
            Ok(()) => {
                self.last_slot = Some(slot);
                self.presenter.set_toast(format!("Loaded slot {slot}"), now);
            }
            Err(err @ FrontendError::StateSize { .. }) => {
                warn!("{err}");
                self.presenter.set_toast("Incompatible save state", now);
            }
            Err(err) => {
                error!("{err:#}");
                self.presenter.set_toast(format!("{err}"), now);
            }
        }
    }

    fn toggle_cheat(&mut self, index: usize) {
        let Some(cheat) = self.cheats.get_mut(index) else {
            return;
        };

        cheat.enabled = !cheat.enabled;
        self.cheats_dirty = true;
        self.core.cheat_set(cheat.index, cheat.enabled, &cheat.code);
    }

    fn do_swap_disc(&mut self, index: u32) {
        let now = self.platform.now_us();

        let Some(disk) = self.core.disk_control() else {
            self.presenter.set_toast("Core has no disc control", now);
            return;
        };

        if disk.swap_to(index) {
            self.presenter
                .set_toast(format!("Disc {} inserted", index + 1), now);
            info!("swapped to disc {index}");
        } else {
            self.presenter.set_toast("Disc swap failed", now);
            warn!("disc swap to {index} failed");
        }
    }

    fn apply_frontend(&mut self) {
        self.presenter.policy = self.frontend.scaling;
        self.presenter.sharpness = self.frontend.sharpness;
        self.presenter.scanlines = self.frontend.scanlines;
        self.presenter.invalidate_rect();
        self.platform.set_cpu_speed(&self.frontend.cpu);
    }

    /// SIGHUP: rebuild the cascade and push the effective values back into
    /// the core's options and the frontend's.
    fn reload_config(&mut self) {
        info!("reloading config");
        self.cascade = Cascade::load(&self.paths);
        self.core
            .with_options(|options| options.apply_cascade(&self.cascade));
        self.frontend = FrontendOptions::from_cascade(&self.cascade);
        self.apply_frontend();
    }

    /// Restart-gated option edits: the SRAM goes to disk first, then the
    /// core resets with the variables-updated flag raised, so it rereads
    /// the whole option set while reinitializing. A full library reload is
    /// not expressible inside the lifecycle; `GameUnloaded` is terminal.
    fn apply_pending_reset(&mut self) {
        info!("resetting core for restart-gated options");

        self.flush_sram();

        if let Err(err) = self.core.reset() {
            warn!("{err}");
            return;
        }

        // Resets clear cheats in many cores; arm them again.
        self.core.cheat_reset();

        for cheat in &self.cheats {
            self.core.cheat_set(cheat.index, cheat.enabled, &cheat.code);
        }
    }

    fn flush_sram(&mut self) {
        let started = Instant::now();

        let result = self.sram.flush_sram(self.core.save_ram());

        if let Err(err) = result {
            let err = FrontendError::io(self.paths.sram_path(), err);
            error!("{err:#}");
            self.presenter
                .set_toast(format!("{err}"), self.platform.now_us());
        }

        if let Err(err) = self.sram.flush_rtc(self.core.rtc_ram()) {
            warn!("rtc flush failed: {err}");
        }

        if started.elapsed().as_micros() > FLUSH_BUDGET_US {
            warn!("SRAM flush exceeded the flush budget");
        }
    }

    fn shutdown(&mut self, outcome: Outcome) -> Outcome {
        info!(
            "shutting down ({outcome:?}) from host state {}",
            self.core.lifecycle().name()
        );

        self.flush_sram();

        if matches!(outcome, Outcome::NextCommand) {
            if self.frontend.auto_resume {
                self.do_save_state(AUTO_SLOT);
            }

            let token = ResumeToken {
                core: self.paths.core.clone(),
                rom: self.paths.rom.clone(),
            };

            if let Err(err) = persist::write_resume_token(&self.paths.resume_token_path(), &token)
            {
                error!("could not write resume token: {err}");
            }
        }

        self.save_user_config();

        if self.cheats_dirty {
            if let Err(err) = cheats::save(&self.paths.cheats_path(), &self.cheats) {
                warn!("could not save cheats: {err}");
            }
        }

        if let Outcome::Fatal(err) = &outcome {
            self.present_fatal(err);
        }

        if let Err(err) = self.core.unload_game() {
            debug!("{err}");
        }

        // Component teardown happens in field order when `self` drops:
        // host, audio, presenter, pad, platform.
        outcome
    }

    fn save_user_config(&mut self) {
        let user_dirty = self.core.with_options(|options| options.user_dirty);

        if !user_dirty && !self.frontend.dirty {
            return;
        }

        let mut desired = self.core.with_options(|options| options.to_desired());
        self.frontend.to_desired(&mut desired);

        match self
            .cascade
            .save_user(&self.paths.user_config_path(), &desired)
        {
            Ok(()) => info!("user config saved"),
            Err(err) => error!("could not save user config: {err}"),
        }
    }

    /// Full-screen message for fatal kinds, held briefly so it is readable
    /// before the process exits with the matching code.
    fn present_fatal(&mut self, err: &FrontendError) {
        self.presenter.clear();
        self.presenter
            .draw_text(24, 24, 2, 0x00FF_4040, "Something went wrong");
        self.presenter
            .draw_text(24, 64, 1, 0x00E0_E0E0, &format!("{err}"));

        if self.platform.present(self.presenter.surface()).is_ok() {
            let now = self.platform.now_us();
            self.platform.sleep_until(now + 2_000_000);
        }
    }
}

/// Hands the playlist's remaining disc images to the core's drive. The
/// boot disc is inserted by `load_game`; whatever the core does not already
/// report is appended in playlist order, so the disc menu and the
/// eject/select/insert sequence see the whole set.
fn register_playlist_discs(core: &Core, discs: &[PathBuf]) {
    let Some(disk) = core.disk_control() else {
        warn!("playlist loaded but the core has no disk control");
        return;
    };

    let known = disk.num_images() as usize;

    for disc in discs.iter().skip(known) {
        if !disk.add_image(disc) {
            warn!("could not register disc image `{}`", disc.display());
            return;
        }
    }

    info!("disk drive holds {} images", disk.num_images());
}

fn tick_duration_us(fps: f64) -> u64 {
    let fps = if fps.is_finite() && fps > 1.0 { fps } else { 60.0 };

    (1_000_000.0 / fps) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{self, Layer};

    fn cascade_of(text: &str) -> Cascade {
        let (entries, _) = config::parse(text);

        Cascade::from_layers(vec![Layer {
            label: "test".into(),
            entries,
        }])
    }

    #[test]
    fn tick_duration_handles_degenerate_fps() {
        assert_eq!(tick_duration_us(60.0), 16_666);
        assert_eq!(tick_duration_us(0.0), 16_666);
        assert_eq!(tick_duration_us(f64::NAN), 16_666);
        assert_eq!(tick_duration_us(50.0), 20_000);
    }

    #[test]
    fn frontend_options_resolve_from_cascade() {
        let options = FrontendOptions::from_cascade(&cascade_of(
            "frontend.scaling = Native\nfrontend.scanlines = On\nfrontend.ff_max = 6\n",
        ));

        assert_eq!(options.scaling, ScalePolicy::Native);
        assert!(options.scanlines);
        assert_eq!(options.ff_max, 6);
        assert!(!options.show_fps);
    }

    #[test]
    fn frontend_cycle_wraps_and_marks_dirty() {
        let mut options = FrontendOptions::from_cascade(&Cascade::default());

        assert_eq!(options.scaling, ScalePolicy::Aspect);
        options.cycle("frontend.scaling", true);
        assert_eq!(options.scaling, ScalePolicy::Fullscreen);
        options.cycle("frontend.scaling", true);
        assert_eq!(options.scaling, ScalePolicy::Native);
        assert!(options.dirty);
    }

    #[test]
    fn ff_max_stays_in_range() {
        let mut options = FrontendOptions::from_cascade(&cascade_of("frontend.ff_max = 99\n"));

        assert_eq!(options.ff_max, FF_MAX_RANGE.1);
        options.cycle("frontend.ff_max", true);
        assert_eq!(options.ff_max, FF_MAX_RANGE.0);
        options.cycle("frontend.ff_max", false);
        assert_eq!(options.ff_max, FF_MAX_RANGE.1);
    }

    #[test]
    fn locked_frontend_option_is_not_editable_in_view() {
        let options = FrontendOptions::from_cascade(&cascade_of("-frontend.cpu = Powersave\n"));
        let views = options.views(&cascade_of("-frontend.cpu = Powersave\n"));

        let cpu = views
            .iter()
            .find(|view| view.key == "frontend.cpu")
            .unwrap();

        assert!(cpu.locked);
        assert!(!cpu.editable);
    }
}
