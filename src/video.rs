use std::ffi::{c_uint, c_void};
use std::slice;

use font8x8::legacy::BASIC_LEGACY;
use itertools::Itertools;
use libretro_sys::PixelFormat;
use log::warn;

const FRAC_ONE: u32 = 65_536;

/// How long a toast stays on screen.
pub const TOAST_US: u64 = 3_000_000;

/// One video frame as handed over by the core. The pixel data is copied out
/// of the core's buffer inside the callback; nothing here aliases core
/// memory after the callback returns.
pub struct Frame {
    pub buffer: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub pitch: usize,
    pub pixel_format: PixelFormat,
}

impl Frame {
    pub unsafe fn from_raw(
        data: *const c_void,
        width: c_uint,
        height: c_uint,
        pitch: usize,
        pixel_format: PixelFormat,
    ) -> Option<Self> {
        if data.is_null() {
            return None;
        }

        let width = width as usize;
        let height = height as usize;
        let size = height * pitch;
        let buffer = slice::from_raw_parts(data.cast::<u8>(), size).to_vec();

        Some(Self {
            buffer,
            width,
            height,
            pitch,
            pixel_format,
        })
    }

    /// Converts to packed `0RGB` for the surface, cropping each row to the
    /// visible width.
    pub fn to_packed_xrgb(&self) -> Vec<u32> {
        match self.pixel_format {
            PixelFormat::ARGB8888 => self.xrgb8888_to_packed(),
            PixelFormat::RGB565 => self.rgb565_to_packed(),
            PixelFormat::ARGB1555 => self.rgb1555_to_packed(),
        }
    }

    fn xrgb8888_to_packed(&self) -> Vec<u32> {
        let bytes_per_row = 4 * self.width;

        self.buffer
            .chunks_exact(self.pitch.max(bytes_per_row))
            .flat_map(|row| &row[..bytes_per_row])
            .copied()
            .tuples()
            .map(|(b1, b2, b3, b4)| u32::from_le_bytes([b1, b2, b3, b4]) & 0x00FF_FFFF)
            .collect_vec()
    }

    fn rgb565_to_packed(&self) -> Vec<u32> {
        let bytes_per_row = 2 * self.width;

        self.buffer
            .chunks_exact(self.pitch.max(bytes_per_row))
            .flat_map(|row| &row[..bytes_per_row])
            .copied()
            .tuples()
            .map(|(b1, b2)| {
                let pixel = u16::from_le_bytes([b1, b2]) as u32;
                let r = (pixel >> 11) & 0x1F;
                let g = (pixel >> 5) & 0x3F;
                let b = pixel & 0x1F;

                ((r << 3 | r >> 2) << 16) | ((g << 2 | g >> 4) << 8) | (b << 3 | b >> 2)
            })
            .collect_vec()
    }

    fn rgb1555_to_packed(&self) -> Vec<u32> {
        let bytes_per_row = 2 * self.width;

        self.buffer
            .chunks_exact(self.pitch.max(bytes_per_row))
            .flat_map(|row| &row[..bytes_per_row])
            .copied()
            .tuples()
            .map(|(b1, b2)| {
                let pixel = u16::from_le_bytes([b1, b2]) as u32;
                let r = (pixel >> 10) & 0x1F;
                let g = (pixel >> 5) & 0x1F;
                let b = pixel & 0x1F;

                ((r << 3 | r >> 2) << 16) | ((g << 3 | g >> 2) << 8) | (b << 3 | b >> 2)
            })
            .collect_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePolicy {
    /// Largest integer multiple that fits, centered.
    Native,
    /// Largest rect preserving the core's aspect ratio.
    Aspect,
    /// The whole surface.
    Fullscreen,
}

impl ScalePolicy {
    pub const VALUES: [&'static str; 3] = ["Native", "Aspect", "Fullscreen"];

    pub fn from_value(value: &str) -> Self {
        match value {
            "Native" => ScalePolicy::Native,
            "Fullscreen" => ScalePolicy::Fullscreen,
            _ => ScalePolicy::Aspect,
        }
    }

    pub fn value(&self) -> &'static str {
        match self {
            ScalePolicy::Native => "Native",
            ScalePolicy::Aspect => "Aspect",
            ScalePolicy::Fullscreen => "Fullscreen",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sharpness {
    Nearest,
    /// Horizontal lerp between neighboring source pixels, weights from the
    /// precomputed column table.
    Soft,
}

impl Sharpness {
    pub const VALUES: [&'static str; 2] = ["Crisp", "Soft"];

    pub fn from_value(value: &str) -> Self {
        match value {
            "Soft" => Sharpness::Soft,
            _ => Sharpness::Nearest,
        }
    }

    pub fn value(&self) -> &'static str {
        match self {
            Sharpness::Nearest => "Crisp",
            Sharpness::Soft => "Soft",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub w: usize,
    pub h: usize,
}

/// Destination rect for a source of `src_w x src_h` with the given aspect
/// ratio hint (`<= 0` means use the pixel aspect) on a `dst_w x dst_h`
/// surface.
pub fn fit_rect(
    src_w: usize,
    src_h: usize,
    aspect: f32,
    dst_w: usize,
    dst_h: usize,
    policy: ScalePolicy,
) -> Rect {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return Rect::default();
    }

    match policy {
        ScalePolicy::Fullscreen => Rect {
            x: 0,
            y: 0,
            w: dst_w,
            h: dst_h,
        },
        ScalePolicy::Native => {
            let scale = (dst_w / src_w).min(dst_h / src_h);

            if scale == 0 {
                // Source exceeds the screen; fall back to aspect fit.
                return fit_rect(src_w, src_h, aspect, dst_w, dst_h, ScalePolicy::Aspect);
            }

            let w = src_w * scale;
            let h = src_h * scale;

            Rect {
                x: (dst_w - w) / 2,
                y: (dst_h - h) / 2,
                w,
                h,
            }
        }
        ScalePolicy::Aspect => {
            let aspect = if aspect > 0.0 {
                aspect
            } else {
                src_w as f32 / src_h as f32
            };

            let mut w = dst_w;
            let mut h = (dst_w as f32 / aspect) as usize;

            if h > dst_h {
                h = dst_h;
                w = ((dst_h as f32 * aspect) as usize).min(dst_w);
            }

            let w = w.max(1);
            let h = h.max(1);

            Rect {
                x: (dst_w - w) / 2,
                y: (dst_h - h) / 2,
                w,
                h,
            }
        }
    }
}

pub struct Hud {
    pub fps: Option<f32>,
    pub slot: Option<u8>,
    pub fast_forward: bool,
    pub battery: Option<u8>,
}

struct Toast {
    text: String,
    until_us: u64,
}

/// Owns the output surface. Converts and blits core frames into it, lays
/// scanlines and HUD text on top, and keeps the last converted frame around
/// for dupe frames and the menu backdrop.
pub struct Presenter {
    width: usize,
    height: usize,
    surface: Vec<u32>,
    pub policy: ScalePolicy,
    pub sharpness: Sharpness,
    pub scanlines: bool,
    aspect: f32,
    src: Vec<u32>,
    src_w: usize,
    src_h: usize,
    rect: Rect,
    x_lut: Vec<u32>,
    lut_key: (usize, usize, ScalePolicy, u32),
    toast: Option<Toast>,
}

impl Presenter {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            surface: vec![0; width * height],
            policy: ScalePolicy::Aspect,
            sharpness: Sharpness::Nearest,
            scanlines: false,
            aspect: 0.0,
            src: Vec::new(),
            src_w: 0,
            src_h: 0,
            rect: Rect::default(),
            x_lut: Vec::new(),
            lut_key: (0, 0, ScalePolicy::Aspect, 0),
            toast: None,
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn surface(&self) -> &[u32] {
        &self.surface
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn has_frame(&self) -> bool {
        !self.src.is_empty()
    }

    /// Copy of the current surface, used to freeze the menu backdrop.
    pub fn snapshot(&self) -> Vec<u32> {
        self.surface.clone()
    }

    pub fn restore(&mut self, snapshot: &[u32]) {
        if snapshot.len() == self.surface.len() {
            self.surface.copy_from_slice(snapshot);
        }
    }

    pub fn present(&mut self, frame: &Frame) {
        let pixels = frame.to_packed_xrgb();

        if pixels.len() != frame.width * frame.height {
            warn!(
                "frame geometry mismatch: {}x{} vs {} pixels",
                frame.width,
                frame.height,
                pixels.len()
            );
            return;
        }

        self.src = pixels;
        self.src_w = frame.width;
        self.src_h = frame.height;
        self.blit();
    }

    /// Dupe frame: the core sent a null buffer, the previous frame is
    /// presented again.
    pub fn present_previous(&mut self) {
        if self.has_frame() {
            self.blit();
        }
    }

    fn blit(&mut self) {
        self.refresh_lut();

        let rect = self.rect;

        if rect.w == 0 || rect.h == 0 {
            return;
        }

        self.surface.fill(0);

        for dy in 0..rect.h {
            let sy = ((dy as u64 * self.src_h as u64) / rect.h as u64) as usize;
            let src_row = &self.src[sy * self.src_w..(sy + 1) * self.src_w];
            let dst_start = (rect.y + dy) * self.width + rect.x;
            let dst_row = &mut self.surface[dst_start..dst_start + rect.w];

            match self.sharpness {
                Sharpness::Nearest => {
                    for (dx, out) in dst_row.iter_mut().enumerate() {
                        *out = src_row[(self.x_lut[dx] >> 16) as usize];
                    }
                }
                Sharpness::Soft => {
                    for (dx, out) in dst_row.iter_mut().enumerate() {
                        let pos = self.x_lut[dx];
                        let sx = (pos >> 16) as usize;
                        let frac = pos & 0xFFFF;
                        let a = src_row[sx];
                        let b = src_row[(sx + 1).min(self.src_w - 1)];

                        *out = lerp_pixel(a, b, frac);
                    }
                }
            }

            if self.scanlines && (rect.y + dy) % 2 == 1 {
                for pixel in dst_row.iter_mut() {
                    *pixel = (*pixel >> 1) & 0x007F_7F7F;
                }
            }
        }
    }

    /// The rect and the per-column source table are derived once per
    /// geometry or policy change, never per pixel.
    fn refresh_lut(&mut self) {
        let key = (self.src_w, self.src_h, self.policy, self.aspect.to_bits());

        if key == self.lut_key && !self.x_lut.is_empty() {
            return;
        }

        self.lut_key = key;
        self.rect = fit_rect(
            self.src_w,
            self.src_h,
            self.aspect,
            self.width,
            self.height,
            self.policy,
        );
        self.x_lut = (0..self.rect.w)
            .map(|dx| ((dx as u64 * self.src_w as u64 * FRAC_ONE as u64) / self.rect.w as u64) as u32)
            .collect();
    }

    /// Geometry changed mid-session; next blit re-derives the rect.
    pub fn invalidate_rect(&mut self) {
        self.x_lut.clear();
    }

    pub fn clear(&mut self) {
        self.surface.fill(0);
    }

    /// Darkens the whole surface, used under menu text.
    pub fn dim(&mut self) {
        for pixel in &mut self.surface {
            *pixel = (*pixel >> 2) & 0x003F_3F3F;
        }
    }

    pub fn fill_rect(&mut self, rect: Rect, color: u32) {
        for y in rect.y..(rect.y + rect.h).min(self.height) {
            let row = &mut self.surface[y * self.width..y * self.width + self.width];

            for pixel in &mut row[rect.x..(rect.x + rect.w).min(self.width)] {
                *pixel = color;
            }
        }
    }

    /// 8x8 bitmap text at an integer scale.
    pub fn draw_text(&mut self, x: usize, y: usize, scale: usize, color: u32, text: &str) {
        let mut pen_x = x;

        for ch in text.chars() {
            let glyph = BASIC_LEGACY.get(ch as usize).unwrap_or(&BASIC_LEGACY[b'?' as usize]);

            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..8 {
                    if bits >> col & 1 == 0 {
                        continue;
                    }

                    for sy in 0..scale {
                        for sx in 0..scale {
                            let px = pen_x + col * scale + sx;
                            let py = y + row * scale + sy;

                            if px < self.width && py < self.height {
                                self.surface[py * self.width + px] = color;
                            }
                        }
                    }
                }
            }

            pen_x += 8 * scale;
        }
    }

    pub fn text_width(scale: usize, text: &str) -> usize {
        text.chars().count() * 8 * scale
    }

    pub fn set_toast(&mut self, text: impl Into<String>, now_us: u64) {
        self.toast = Some(Toast {
            text: text.into(),
            until_us: now_us + TOAST_US,
        });
    }

    /// HUD and toast pass, drawn after the frame blit.
    pub fn draw_overlays(&mut self, hud: &Hud, now_us: u64) {
        let mut line = String::new();

        if let Some(fps) = hud.fps {
            line.push_str(&format!("{fps:5.1} "));
        }

        if hud.fast_forward {
            line.push_str(">> ");
        }

        if let Some(slot) = hud.slot {
            line.push_str(&format!("S{slot} "));
        }

        if let Some(battery) = hud.battery {
            line.push_str(&format!("{battery:3}%"));
        }

        if !line.is_empty() {
            let x = self.width.saturating_sub(Self::text_width(1, &line) + 4);
            self.draw_text(x, 4, 1, 0x00FF_FF00, &line);
        }

        if let Some(toast) = self.toast.take() {
            if toast.until_us > now_us {
                self.fill_rect(
                    Rect {
                        x: 0,
                        y: 0,
                        w: self.width,
                        h: 16,
                    },
                    0x0020_2020,
                );
                self.draw_text(4, 4, 1, 0x00FF_FFFF, &toast.text);
                self.toast = Some(toast);
            }
        }
    }
}

fn lerp_pixel(a: u32, b: u32, frac: u32) -> u32 {
    let t = frac >> 8;
    let inv = 256 - t;

    let rb = ((a & 0x00FF_00FF) * inv + (b & 0x00FF_00FF) * t) >> 8;
    let g = ((a & 0x0000_FF00) * inv + (b & 0x0000_FF00) * t) >> 8;

    (rb & 0x00FF_00FF) | (g & 0x0000_FF00)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_565(pixels: &[u16], width: usize, height: usize) -> Frame {
        Frame {
            buffer: pixels.iter().flat_map(|p| p.to_le_bytes()).collect(),
            width,
            height,
            pitch: width * 2,
            pixel_format: PixelFormat::RGB565,
        }
    }

    #[test]
    fn rgb565_conversion_expands_channels() {
        let frame = frame_565(&[0xF800, 0x07E0, 0x001F, 0xFFFF], 4, 1);
        let pixels = frame.to_packed_xrgb();

        assert_eq!(pixels, vec![0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0x00FF_FFFF]);
    }

    #[test]
    fn pitch_padding_is_cropped() {
        let mut buffer = vec![0u8; 2 * 3];
        buffer[0] = 0x1F; // one blue pixel, rest is padding
        let frame = Frame {
            buffer,
            width: 1,
            height: 1,
            pitch: 6,
            pixel_format: PixelFormat::RGB565,
        };

        assert_eq!(frame.to_packed_xrgb().len(), 1);
    }

    #[test]
    fn native_policy_centers_integer_scale() {
        let rect = fit_rect(160, 144, 0.0, 640, 480, ScalePolicy::Native);

        assert_eq!(rect, Rect {
            x: (640 - 480) / 2,
            y: (480 - 432) / 2,
            w: 480,
            h: 432,
        });
    }

    #[test]
    fn aspect_policy_letterboxes() {
        let rect = fit_rect(160, 144, 160.0 / 144.0, 640, 480, ScalePolicy::Aspect);

        assert_eq!(rect.h, 480);
        assert!(rect.w < 640);
        assert_eq!(rect.y, 0);
        assert!(rect.x > 0);
    }

    #[test]
    fn oversized_source_falls_back_to_aspect_fit() {
        let rect = fit_rect(1280, 960, 0.0, 640, 480, ScalePolicy::Native);

        assert!(rect.w <= 640 && rect.h <= 480);
        assert!(rect.w > 0 && rect.h > 0);
    }

    #[test]
    fn fullscreen_policy_covers_surface() {
        let rect = fit_rect(160, 144, 0.0, 640, 480, ScalePolicy::Fullscreen);

        assert_eq!(rect, Rect {
            x: 0,
            y: 0,
            w: 640,
            h: 480,
        });
    }

    #[test]
    fn blit_fills_rect_with_nearest_pixels() {
        let mut presenter = Presenter::new(8, 8);
        presenter.policy = ScalePolicy::Fullscreen;

        let frame = frame_565(&[0xF800, 0x001F, 0xF800, 0x001F], 2, 2);
        presenter.present(&frame);

        assert_eq!(presenter.rect(), Rect {
            x: 0,
            y: 0,
            w: 8,
            h: 8,
        });

        let surface = presenter.surface();
        assert_eq!(surface[0], 0x00FF_0000);
        assert_eq!(surface[7], 0x0000_00FF);
        assert_eq!(surface[8 * 7], 0x00FF_0000);
    }

    #[test]
    fn scanlines_darken_odd_rows() {
        let mut presenter = Presenter::new(4, 4);
        presenter.policy = ScalePolicy::Fullscreen;
        presenter.scanlines = true;

        let frame = frame_565(&[0xFFFF], 1, 1);
        presenter.present(&frame);

        let surface = presenter.surface();
        assert_eq!(surface[0], 0x00FF_FFFF);
        assert!(surface[4] < 0x00FF_FFFF);
    }

    #[test]
    fn toast_expires_after_timeout() {
        let mut presenter = Presenter::new(64, 32);
        presenter.set_toast("saved", 0);

        presenter.draw_overlays(
            &Hud {
                fps: None,
                slot: None,
                fast_forward: false,
                battery: None,
            },
            TOAST_US + 1,
        );

        assert!(presenter.toast.is_none());
    }
}
