//! Video capture sources
//!
//! Frames come from V4L2 devices (USB cameras, HDMI capture sticks) or
//! from a built-in test pattern. V4L2 capture supports MJPEG, YUYV, RGB3
//! and BGR3 and always hands out RGB frames.
//!
//! Performance notes:
//! - Uses turbojpeg for hardware-accelerated MJPEG decoding (libjpeg-turbo with SIMD)
//! - Integer-only YUYV to RGB conversion (no floating point)

use anyhow::{Context, Result};
use image::RgbImage;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::config::{CaptureFormat, SourceKind, VideoConfig};
use crate::error::WarpError;

/// Thread-local turbojpeg decompressor for hardware-accelerated MJPEG decoding
thread_local! {
    static JPEG_DECOMPRESSOR: std::cell::RefCell<Option<turbojpeg::Decompressor>> =
        std::cell::RefCell::new(turbojpeg::Decompressor::new().ok());
}

/// Consecutive undecodable frames tolerated before giving up
const MAX_DECODE_FAILURES: u32 = 100;

/// A camera-like producer of RGB frames
pub trait FrameSource {
    /// Next frame, or `None` at end of stream
    fn read(&mut self) -> Result<Option<RgbImage>>;

    /// Stop capturing and hand the device back
    fn release(&mut self);

    /// Negotiated frame size
    fn dimensions(&self) -> (u32, u32);
}

/// Open the source selected in the video configuration
pub fn open_source(config: &VideoConfig) -> Result<Box<dyn FrameSource>> {
    match config.source {
        SourceKind::V4l => {
            let camera = V4lCamera::open(
                &config.input_device,
                config.width,
                config.height,
                config.fps,
                config.format,
            )?;
            Ok(Box::new(camera))
        }
        SourceKind::Pattern => Ok(Box::new(TestPattern::new(
            config.width,
            config.height,
            config.fps,
            config.pattern_frames,
        ))),
    }
}

/// Pixel layout delivered by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputFormat {
    Mjpeg,
    Yuyv,
    Rgb,
    Bgr,
}

impl InputFormat {
    fn from_fourcc(repr: &[u8; 4]) -> Self {
        match repr {
            b"MJPG" => InputFormat::Mjpeg,
            b"YUYV" => InputFormat::Yuyv,
            b"BGR3" => InputFormat::Bgr,
            // Assume RGB or copy raw
            _ => InputFormat::Rgb,
        }
    }
}

/// Capture formats in order of preference for each configured preference
fn preferred_formats(preference: CaptureFormat) -> &'static [&'static [u8; 4]] {
    match preference {
        // Compressed format uses less USB bandwidth and allows higher frame rates
        CaptureFormat::Mjpeg => &[b"MJPG", b"YUYV", b"RGB3", b"BGR3"],
        CaptureFormat::Yuyv => &[b"YUYV", b"MJPG", b"RGB3", b"BGR3"],
    }
}

/// A V4L2 capture device streaming through memory-mapped buffers
pub struct V4lCamera {
    device_path: String,
    stream: Option<Stream<'static>>,
    format: InputFormat,
    width: u32,
    height: u32,
    rgb_buffer: Vec<u8>,
    frame_count: u64,
    last_stats_time: Instant,
}

impl V4lCamera {
    pub fn open(
        device_path: &str,
        width: u32,
        height: u32,
        fps: u32,
        preference: CaptureFormat,
    ) -> Result<Self> {
        info!("Opening capture device {}", device_path);
        info!("Requested resolution: {}x{} @ {} fps", width, height, fps);

        let dev = Device::with_path(device_path).map_err(|e| {
            WarpError::CaptureUnavailable(format!("failed to open {}: {}", device_path, e))
        })?;

        let caps = dev
            .query_caps()
            .context("Failed to query device capabilities")?;
        info!("Camera: {} (driver: {})", caps.card, caps.driver);

        let format = configure_capture_format(&dev, width, height, preference)?;
        info!(
            "Capture format: {}x{} {:?}",
            format.width,
            format.height,
            String::from_utf8_lossy(&format.fourcc.repr)
        );

        if let Err(e) = set_frame_rate(&dev, fps) {
            warn!("Could not set frame rate to {} fps: {}", fps, e);
        }

        // Using 4 buffers for smooth capture pipeline
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).map_err(|e| {
            WarpError::CaptureUnavailable(format!("failed to start stream on {}: {}", device_path, e))
        })?;

        let input_format = InputFormat::from_fourcc(&format.fourcc.repr);
        if input_format == InputFormat::Mjpeg {
            JPEG_DECOMPRESSOR.with(|_| {});
            debug!("TurboJPEG decompressor initialized");
        }

        Ok(Self {
            device_path: device_path.to_string(),
            stream: Some(stream),
            format: input_format,
            width: format.width,
            height: format.height,
            rgb_buffer: vec![0u8; format.width as usize * format.height as usize * 3],
            frame_count: 0,
            last_stats_time: Instant::now(),
        })
    }

    fn log_stats(&mut self) {
        let elapsed = self.last_stats_time.elapsed();
        if elapsed < Duration::from_secs(10) {
            return;
        }
        let secs = elapsed.as_secs_f64();
        info!(
            "Capture: {:.1} fps ({} frames in {:.1}s)",
            self.frame_count as f64 / secs,
            self.frame_count,
            secs
        );
        self.frame_count = 0;
        self.last_stats_time = Instant::now();
    }
}

impl FrameSource for V4lCamera {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        let width = self.width as usize;
        let height = self.height as usize;
        let mut failures = 0;

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };
            let (buf, _meta) = stream.next().context("Failed to capture frame")?;

            let converted = match self.format {
                InputFormat::Mjpeg => decode_mjpeg(buf, &mut self.rgb_buffer, width, height),
                InputFormat::Yuyv => {
                    yuyv_to_rgb(buf, &mut self.rgb_buffer, width, height);
                    Ok(())
                }
                InputFormat::Bgr => {
                    bgr_to_rgb(buf, &mut self.rgb_buffer);
                    Ok(())
                }
                InputFormat::Rgb => {
                    let copy_len = buf.len().min(self.rgb_buffer.len());
                    self.rgb_buffer[..copy_len].copy_from_slice(&buf[..copy_len]);
                    Ok(())
                }
            };

            match converted {
                Ok(()) => break,
                Err(e) => {
                    failures += 1;
                    if failures % 10 == 1 {
                        warn!("Failed to decode frame from {}: {:#}", self.device_path, e);
                    }
                    if failures >= MAX_DECODE_FAILURES {
                        return Err(WarpError::CaptureUnavailable(format!(
                            "{} consecutive undecodable frames from {}",
                            failures, self.device_path
                        ))
                        .into());
                    }
                }
            }
        }

        self.frame_count += 1;
        self.log_stats();

        let frame = RgbImage::from_raw(self.width, self.height, self.rgb_buffer.clone())
            .context("Capture buffer does not match frame size")?;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            info!("Camera device {} released", self.device_path);
        }
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Configure the capture format, trying preferred formats in order
fn configure_capture_format(
    dev: &Device,
    width: u32,
    height: u32,
    preference: CaptureFormat,
) -> Result<v4l::Format> {
    let formats = dev.enum_formats().context("Failed to enumerate formats")?;

    info!("Available formats:");
    for fmt in &formats {
        info!("  {:?}: {}", String::from_utf8_lossy(&fmt.fourcc.repr), fmt.description);
    }

    for preferred in preferred_formats(preference) {
        let fourcc = FourCC::new(preferred);
        if formats.iter().any(|f| f.fourcc == fourcc) {
            debug!(
                "Trying format: {:?} at {}x{}",
                String::from_utf8_lossy(*preferred),
                width,
                height
            );

            let mut format = dev.format().context("Failed to get current format")?;
            format.width = width;
            format.height = height;
            format.fourcc = fourcc;

            match dev.set_format(&format) {
                Ok(actual) => return Ok(actual),
                Err(e) => {
                    warn!(
                        "Could not set format {:?} at {}x{}: {}",
                        String::from_utf8_lossy(*preferred),
                        width,
                        height,
                        e
                    );
                }
            }
        }
    }

    // Fall back to whatever the device gives us
    let mut format = dev.format().context("Failed to get current format")?;
    format.width = width;
    format.height = height;

    match dev.set_format(&format) {
        Ok(actual) => Ok(actual),
        Err(e) => {
            warn!("Could not set resolution {}x{}: {}", width, height, e);
            let current = dev.format().context("Failed to get device format")?;
            info!(
                "Using device's current format: {}x{} {:?}",
                current.width,
                current.height,
                String::from_utf8_lossy(&current.fourcc.repr)
            );
            Ok(current)
        }
    }
}

/// Set the frame rate on the capture device
fn set_frame_rate(dev: &Device, fps: u32) -> Result<()> {
    let mut params = dev.params().context("Failed to get parameters")?;
    params.interval = v4l::Fraction::new(1, fps.max(1));
    dev.set_params(&params).context("Failed to set parameters")?;

    let actual = dev.params().context("Failed to read back parameters")?;
    info!(
        "Frame interval: {}/{} ({:.1} fps, requested {})",
        actual.interval.numerator,
        actual.interval.denominator,
        actual.interval.denominator as f64 / actual.interval.numerator.max(1) as f64,
        fps
    );

    Ok(())
}

/// Decode an MJPEG frame to RGB using turbojpeg
/// Falls back to software jpeg-decoder if turbojpeg fails
fn decode_mjpeg(mjpeg_data: &[u8], rgb_buffer: &mut [u8], width: usize, height: usize) -> Result<()> {
    let expected_size = width * height * 3;

    let decoded = JPEG_DECOMPRESSOR.with(|decomp| {
        let mut decomp = decomp.borrow_mut();
        let decompressor = decomp.as_mut()?;
        let header = decompressor.read_header(mjpeg_data).ok()?;
        if header.width != width || header.height != height {
            return None;
        }

        let image = turbojpeg::Image {
            pixels: &mut rgb_buffer[..expected_size],
            width: header.width,
            pitch: header.width * 3,
            height: header.height,
            format: turbojpeg::PixelFormat::RGB,
        };
        decompressor.decompress(mjpeg_data, image).ok()
    });

    if decoded.is_some() {
        return Ok(());
    }

    decode_mjpeg_software(mjpeg_data, rgb_buffer, width, height)
}

/// Software fallback MJPEG decoder using jpeg-decoder crate
fn decode_mjpeg_software(
    mjpeg_data: &[u8],
    rgb_buffer: &mut [u8],
    width: usize,
    height: usize,
) -> Result<()> {
    use std::io::Cursor;

    let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(mjpeg_data));
    let pixels = decoder.decode().context("Failed to decode MJPEG frame")?;
    let info = decoder.info().context("MJPEG frame has no header")?;

    let expected_size = width * height * 3;

    match info.pixel_format {
        jpeg_decoder::PixelFormat::L8 => {
            // Grayscale - convert to RGB
            for (i, &gray) in pixels.iter().enumerate().take(width * height) {
                let rgb_offset = i * 3;
                if rgb_offset + 2 < rgb_buffer.len() {
                    rgb_buffer[rgb_offset] = gray;
                    rgb_buffer[rgb_offset + 1] = gray;
                    rgb_buffer[rgb_offset + 2] = gray;
                }
            }
        }
        _ => {
            let copy_len = pixels.len().min(rgb_buffer.len()).min(expected_size);
            rgb_buffer[..copy_len].copy_from_slice(&pixels[..copy_len]);
        }
    }

    Ok(())
}

/// Convert YUYV to RGB using fast integer math (no floating point)
/// Uses fixed-point arithmetic with 8-bit shift for BT.601 color conversion
#[inline]
pub fn yuyv_to_rgb(yuyv: &[u8], rgb: &mut [u8], width: usize, height: usize) {
    let pixels = width * height;

    // Process 2 pixels at a time (4 bytes YUYV -> 6 bytes RGB)
    for i in 0..(pixels / 2) {
        let yuyv_offset = i * 4;
        let rgb_offset = i * 6;

        if yuyv_offset + 3 >= yuyv.len() || rgb_offset + 5 >= rgb.len() {
            break;
        }

        let y0 = yuyv[yuyv_offset] as i32;
        let u = yuyv[yuyv_offset + 1] as i32 - 128;
        let y1 = yuyv[yuyv_offset + 2] as i32;
        let v = yuyv[yuyv_offset + 3] as i32 - 128;

        // R = Y + 1.402 * V             → Y + (359 * V) >> 8
        // G = Y - 0.344 * U - 0.714 * V → Y - (88 * U + 183 * V) >> 8
        // B = Y + 1.772 * U             → Y + (454 * U) >> 8
        let v_r = (359 * v) >> 8;
        let uv_g = (88 * u + 183 * v) >> 8;
        let u_b = (454 * u) >> 8;

        rgb[rgb_offset] = (y0 + v_r).clamp(0, 255) as u8;
        rgb[rgb_offset + 1] = (y0 - uv_g).clamp(0, 255) as u8;
        rgb[rgb_offset + 2] = (y0 + u_b).clamp(0, 255) as u8;

        // Second pixel (shares U and V)
        rgb[rgb_offset + 3] = (y1 + v_r).clamp(0, 255) as u8;
        rgb[rgb_offset + 4] = (y1 - uv_g).clamp(0, 255) as u8;
        rgb[rgb_offset + 5] = (y1 + u_b).clamp(0, 255) as u8;
    }
}

/// Convert BGR to RGB (swap R and B channels)
#[inline]
pub fn bgr_to_rgb(bgr: &[u8], rgb: &mut [u8]) {
    for (bgr_chunk, rgb_chunk) in bgr.chunks_exact(3).zip(rgb.chunks_exact_mut(3)) {
        rgb_chunk[0] = bgr_chunk[2];
        rgb_chunk[1] = bgr_chunk[1];
        rgb_chunk[2] = bgr_chunk[0];
    }
}

/// Synthetic source: a scrolling color gradient under a 40px grid
pub struct TestPattern {
    width: u32,
    height: u32,
    frame_interval: Duration,
    limit: Option<u64>,
    produced: u64,
    released: bool,
}

impl TestPattern {
    pub fn new(width: u32, height: u32, fps: u32, limit: Option<u64>) -> Self {
        info!(
            "Using test pattern source {}x{} @ {} fps",
            width, height, fps
        );
        Self {
            width,
            height,
            frame_interval: if fps == 0 {
                Duration::ZERO
            } else {
                Duration::from_secs(1) / fps
            },
            limit,
            produced: 0,
            released: false,
        }
    }

    fn render(&self) -> RgbImage {
        let shift = (self.produced * 4) as u32;
        let w = self.width.max(1);
        let h = self.height.max(1);
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if x % 40 == 0 || y % 40 == 0 {
                return image::Rgb([255, 255, 255]);
            }
            let r = (((x + shift) % w) * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            image::Rgb([r, g, 128])
        })
    }
}

impl FrameSource for TestPattern {
    fn read(&mut self) -> Result<Option<RgbImage>> {
        if self.released || self.limit.is_some_and(|limit| self.produced >= limit) {
            return Ok(None);
        }
        if self.produced > 0 && !self.frame_interval.is_zero() {
            std::thread::sleep(self.frame_interval);
        }
        let frame = self.render();
        self.produced += 1;
        Ok(Some(frame))
    }

    fn release(&mut self) {
        self.released = true;
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb() {
        let width = 4;
        let height = 2;
        let yuyv_input: Vec<u8> = (0..width * height * 2).map(|i| (i % 256) as u8).collect();
        let mut rgb = vec![0u8; width * height * 3];

        yuyv_to_rgb(&yuyv_input, &mut rgb, width, height);

        assert!(rgb.iter().any(|&x| x != 0));
    }

    #[test]
    fn test_yuyv_neutral_chroma_is_gray() {
        let yuyv = [100u8, 128, 200, 128];
        let mut rgb = [0u8; 6];
        yuyv_to_rgb(&yuyv, &mut rgb, 2, 1);
        assert_eq!(rgb, [100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn test_bgr_to_rgb() {
        let bgr = vec![0u8, 128u8, 255u8];
        let mut rgb = vec![0u8; 3];

        bgr_to_rgb(&bgr, &mut rgb);

        assert_eq!(rgb, vec![255, 128, 0]);
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(InputFormat::from_fourcc(b"MJPG"), InputFormat::Mjpeg);
        assert_eq!(InputFormat::from_fourcc(b"YUYV"), InputFormat::Yuyv);
        assert_eq!(InputFormat::from_fourcc(b"BGR3"), InputFormat::Bgr);
        assert_eq!(InputFormat::from_fourcc(b"RGB3"), InputFormat::Rgb);
        assert_eq!(preferred_formats(CaptureFormat::Yuyv)[0], b"YUYV");
    }

    #[test]
    fn test_pattern_ends_after_limit() {
        let mut source = TestPattern::new(32, 24, 0, Some(2));
        assert_eq!(source.dimensions(), (32, 24));
        assert!(source.read().unwrap().is_some());
        let frame = source.read().unwrap().unwrap();
        assert_eq!(frame.dimensions(), (32, 24));
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_pattern_stops_when_released() {
        let mut source = TestPattern::new(8, 8, 0, None);
        assert!(source.read().unwrap().is_some());
        source.release();
        assert!(source.read().unwrap().is_none());
    }

    #[test]
    fn test_missing_device_is_capture_unavailable() {
        let result = V4lCamera::open(
            "/dev/does-not-exist-video",
            640,
            480,
            30,
            CaptureFormat::Mjpeg,
        );
        let err = result.err().expect("opening a missing device fails");
        assert!(matches!(
            err.downcast_ref::<WarpError>(),
            Some(WarpError::CaptureUnavailable(_))
        ));
    }
}
