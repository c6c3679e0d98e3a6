//! Control point overlay rendering
//!
//! Draws the quad outline, one filled disc per control point and a short
//! label ("O1".."O4" in warp mode, "I1".."I4" in input mode) next to it.
//! Labels use the first usable system font; without one only discs and
//! lines are drawn.

use std::fs;
use std::sync::OnceLock;

use ab_glyph::{point, Font, FontArc, PxScale, ScaleFont};
use anyhow::{anyhow, Context, Result};
use fontdb::{Database, Family, Query, Source};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::points::ControlPoints;
use crate::warp::Mode;

pub const BLUE: Rgb<u8> = Rgb([0, 0, 255]);
pub const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
pub const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Sizes used when drawing the overlay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OverlayStyle {
    /// Disc radius in pixels
    pub point_radius: i32,
    /// Pick radius for grabbing a point with the mouse
    pub hit_radius: f64,
    /// Outline thickness in pixels
    pub line_thickness: u32,
    /// Label glyph height in pixels
    pub label_scale: f32,
    /// Label offset from the point center, both axes
    pub label_offset: i32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            point_radius: 10,
            hit_radius: crate::points::DEFAULT_HIT_RADIUS,
            line_thickness: 2,
            label_scale: 18.0,
            label_offset: 15,
        }
    }
}

/// Colors for one mode's overlay
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Palette {
    pub point: Rgb<u8>,
    pub selected: Rgb<u8>,
    pub line: Rgb<u8>,
    pub label_prefix: char,
}

impl Palette {
    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Warp => Self {
                point: BLUE,
                selected: GREEN,
                line: BLUE,
                label_prefix: 'O',
            },
            Mode::Input => Self {
                point: GREEN,
                selected: BLUE,
                line: GREEN,
                label_prefix: 'I',
            },
        }
    }
}

/// Label of point `index` (0-based) in `mode`, e.g. "O1" or "I4"
pub fn label_text(mode: Mode, index: usize) -> String {
    format!("{}{}", Palette::for_mode(mode).label_prefix, index + 1)
}

/// Draw outline, discs and labels for `points` onto `canvas`
pub fn draw_control_points(
    canvas: &mut RgbImage,
    points: &ControlPoints,
    selected: Option<usize>,
    mode: Mode,
    style: &OverlayStyle,
    font: Option<&FontArc>,
) {
    let palette = Palette::for_mode(mode);
    let quad = points.as_quad();

    for i in 0..4 {
        let start = quad[i];
        let end = quad[(i + 1) % 4];
        draw_thick_line(canvas, start, end, style.line_thickness, palette.line);
    }

    for (idx, p) in points.iter().enumerate() {
        let color = if selected == Some(idx) {
            palette.selected
        } else {
            palette.point
        };
        draw_filled_circle_mut(canvas, p.to_pixel(), style.point_radius, color);

        if let Some(font) = font {
            let (px, py) = p.to_pixel();
            let label = label_text(mode, idx);
            draw_text(
                canvas,
                font,
                PxScale::from(style.label_scale),
                px + style.label_offset,
                py + style.label_offset,
                WHITE,
                &label,
            );
        }
    }
}

/// Line segment widened by drawing parallel copies along the normal
fn draw_thick_line(
    canvas: &mut RgbImage,
    start: (f64, f64),
    end: (f64, f64),
    thickness: u32,
    color: Rgb<u8>,
) {
    let dx = end.0 - start.0;
    let dy = end.1 - start.1;
    let len = dx.hypot(dy);
    let (nx, ny) = if len > f64::EPSILON {
        (-dy / len, dx / len)
    } else {
        (0.0, 0.0)
    };

    let thickness = thickness.max(1) as i32;
    for step in 0..thickness {
        let offset = (step - (thickness - 1) / 2) as f64;
        let ox = nx * offset;
        let oy = ny * offset;
        draw_line_segment_mut(
            canvas,
            ((start.0 + ox) as f32, (start.1 + oy) as f32),
            ((end.0 + ox) as f32, (end.1 + oy) as f32),
            color,
        );
    }
}

/// Alpha-blend `text` onto `image` with its baseline-origin at `(x, y)`
fn draw_text(
    image: &mut RgbImage,
    font: &FontArc,
    scale: PxScale,
    x: i32,
    y: i32,
    color: Rgb<u8>,
    text: &str,
) {
    let (width, height) = image.dimensions();
    let scaled_font = font.as_scaled(scale);
    let mut caret = point(x as f32, y as f32 + scaled_font.ascent());
    let mut previous = None;

    for ch in text.chars() {
        let glyph_id = scaled_font.glyph_id(ch);
        if let Some(prev) = previous {
            caret.x += scaled_font.kern(prev, glyph_id);
        }
        let glyph = glyph_id.with_scale_and_position(scale, caret);
        if let Some(outlined) = font.outline_glyph(glyph) {
            let bounds = outlined.px_bounds();
            let origin_x = bounds.min.x.floor() as i32;
            let origin_y = bounds.min.y.floor() as i32;
            outlined.draw(|gx, gy, v| {
                let px = origin_x + gx as i32;
                let py = origin_y + gy as i32;
                if px < 0 || py < 0 || px as u32 >= width || py as u32 >= height {
                    return;
                }
                let alpha = (v.clamp(0.0, 1.0) * 255.0).round() as u16;
                let inv = 255 - alpha;
                let dst = image.get_pixel_mut(px as u32, py as u32);
                for c in 0..3 {
                    dst.0[c] = ((dst.0[c] as u16 * inv + color.0[c] as u16 * alpha) / 255) as u8;
                }
            });
        }
        caret.x += scaled_font.h_advance(glyph_id);
        previous = Some(glyph_id);
    }
}

/// The label font, loaded from the system on first use
pub fn label_font() -> Option<&'static FontArc> {
    static FONT: OnceLock<Option<FontArc>> = OnceLock::new();

    FONT.get_or_init(|| match load_font() {
        Ok(font) => {
            debug!("Loaded overlay label font");
            Some(font)
        }
        Err(e) => {
            warn!("Overlay labels disabled: {:#}", e);
            None
        }
    })
    .as_ref()
}

fn load_font() -> Result<FontArc> {
    let mut db = Database::new();
    db.load_system_fonts();

    let preferred_families = [
        Family::Name("DejaVu Sans"),
        Family::Name("Noto Sans"),
        Family::Name("Liberation Sans"),
        Family::SansSerif,
    ];

    for family in preferred_families {
        let query = Query {
            families: &[family],
            ..Default::default()
        };
        if let Some(id) = db.query(&query) {
            if let Some(font) = load_face(&db, id)? {
                return Ok(font);
            }
        }
    }

    for face in db.faces() {
        if let Some(font) = load_face(&db, face.id)? {
            return Ok(font);
        }
    }

    Err(anyhow!("no usable system font found"))
}

fn load_face(db: &Database, id: fontdb::ID) -> Result<Option<FontArc>> {
    let face = db.face(id).context("missing font face in database")?;
    let Some(data) = face_data(&face.source) else {
        return Ok(None);
    };
    // Collections and odd formats are skipped rather than failing the search
    Ok(FontArc::try_from_vec(data).ok())
}

/// Raw bytes of a font source; unreadable files yield `None`
fn face_data(source: &Source) -> Option<Vec<u8>> {
    match source {
        Source::Binary(data) => Some(data.as_ref().as_ref().to_vec()),
        Source::File(path) => match fs::read(path) {
            Ok(data) => Some(data),
            Err(e) => {
                debug!("Skipping font {}: {}", path.display(), e);
                None
            }
        },
        Source::SharedFile(_, data) => Some(data.as_ref().as_ref().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> ControlPoints {
        ControlPoints::from_quad([(20.0, 20.0), (80.0, 20.0), (80.0, 80.0), (20.0, 80.0)])
    }

    #[test]
    fn test_palettes_swap_between_modes() {
        let warp = Palette::for_mode(Mode::Warp);
        let input = Palette::for_mode(Mode::Input);
        assert_eq!(warp.point, BLUE);
        assert_eq!(warp.selected, GREEN);
        assert_eq!(input.point, GREEN);
        assert_eq!(input.selected, BLUE);
        assert_eq!(warp.line, warp.point);
        assert_eq!(input.line, input.point);
        assert_eq!(warp.label_prefix, 'O');
        assert_eq!(input.label_prefix, 'I');
    }

    #[test]
    fn test_discs_use_selected_color() {
        let mut canvas = RgbImage::new(100, 100);
        let style = OverlayStyle::default();
        draw_control_points(&mut canvas, &corners(), Some(2), Mode::Warp, &style, None);

        assert_eq!(canvas.get_pixel(20, 20), &BLUE);
        assert_eq!(canvas.get_pixel(80, 80), &GREEN);
        assert_eq!(canvas.get_pixel(25, 25), &BLUE);
    }

    #[test]
    fn test_outline_drawn_between_points() {
        let mut canvas = RgbImage::new(100, 100);
        let style = OverlayStyle::default();
        draw_control_points(&mut canvas, &corners(), None, Mode::Input, &style, None);

        // Midpoint of the top edge, away from any disc
        assert_eq!(canvas.get_pixel(50, 20), &GREEN);
        // Interior untouched
        assert_eq!(canvas.get_pixel(50, 50), &Rgb([0, 0, 0]));
    }

    #[test]
    fn test_label_text() {
        assert_eq!(label_text(Mode::Warp, 0), "O1");
        assert_eq!(label_text(Mode::Warp, 3), "O4");
        assert_eq!(label_text(Mode::Input, 0), "I1");
        assert_eq!(label_text(Mode::Input, 3), "I4");
    }

    /// Near-white pixels in the label box of a point at `(px, py)`
    fn label_pixels(canvas: &RgbImage, px: u32, py: u32, offset: u32) -> usize {
        let mut count = 0;
        for y in py + offset..(py + offset + 24).min(canvas.height()) {
            for x in px + offset..(px + offset + 28).min(canvas.width()) {
                if canvas.get_pixel(x, y).0.iter().all(|&c| c > 200) {
                    count += 1;
                }
            }
        }
        count
    }

    #[test]
    fn test_labels_drawn_white_at_offset() {
        let style = OverlayStyle::default();
        let offset = style.label_offset as u32;

        let mut plain = RgbImage::new(100, 100);
        draw_control_points(&mut plain, &corners(), None, Mode::Input, &style, None);
        assert_eq!(label_pixels(&plain, 20, 20, offset), 0);

        // Labels need a system font; without one only the plain case applies
        let Some(font) = label_font() else {
            return;
        };
        let mut labeled = RgbImage::new(100, 100);
        draw_control_points(&mut labeled, &corners(), None, Mode::Input, &style, Some(font));
        assert!(label_pixels(&labeled, 20, 20, offset) > 0);
        // Discs keep their color under the label pass
        assert_eq!(labeled.get_pixel(20, 20), &GREEN);
    }

    #[test]
    fn test_unreadable_font_file_is_skipped() {
        let source = Source::File("/nonexistent/warpcam/font.ttf".into());
        assert!(face_data(&source).is_none());

        let bytes: Vec<u8> = vec![1, 2, 3];
        let source = Source::Binary(std::sync::Arc::new(bytes.clone()));
        assert_eq!(face_data(&source), Some(bytes));
    }

    #[test]
    fn test_drawing_clips_at_frame_edges() {
        let mut canvas = RgbImage::new(40, 30);
        let points = ControlPoints::frame_corners(40, 30);
        draw_control_points(
            &mut canvas,
            &points,
            None,
            Mode::Warp,
            &OverlayStyle::default(),
            label_font(),
        );
        assert_eq!(canvas.get_pixel(0, 0), &BLUE);
        assert_eq!(canvas.get_pixel(39, 29), &BLUE);
    }
}
