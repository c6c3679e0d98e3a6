//! Interactive perspective warp effect
//!
//! The effect owns four draggable control points. In [`Mode::Warp`] the
//! frame corners are mapped onto the control points, so dragging a point
//! moves where that corner of the source frame lands in the output. In
//! [`Mode::Input`] the control points mark a region of the input frame and
//! the output is the unmodified input with the region outlined.
//!
//! Pointer events and frame processing may come from different threads;
//! all mutable state lives in one [`WarpState`] behind a mutex so a point
//! move and the transform recompute it triggers are never observed apart.

use std::fmt;
use std::str::FromStr;

use image::RgbImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::effect::VideoEffect;
use crate::error::WarpError;
use crate::overlay::{self, OverlayStyle};
use crate::points::{ControlPoints, CORNER_LABELS};
use crate::transform::{frame_corners, PerspectiveTransform};
use crate::viewer::MouseHandler;

/// How the control points are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Frame corners are mapped onto the control points
    Warp,
    /// The control points select a region of the input frame
    Input,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Warp => "warp",
            Mode::Input => "input",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = WarpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "warp" => Ok(Mode::Warp),
            "input" => Ok(Mode::Input),
            other => Err(WarpError::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointerKind {
    Press,
    Move,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PointerButton {
    Left,
    Right,
    #[default]
    None,
}

/// A mouse event in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    #[serde(rename = "event")]
    pub kind: PointerKind,
    #[serde(default)]
    pub button: PointerButton,
    pub x: f64,
    pub y: f64,
    /// Modifier bit flags as reported by the viewer
    #[serde(default)]
    pub flags: u32,
}

/// Which point, if any, is being dragged
///
/// `dragging` is only ever true together with a selected index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DragState {
    selected: Option<usize>,
    dragging: bool,
}

impl DragState {
    fn start(index: usize) -> Self {
        Self {
            selected: Some(index),
            dragging: true,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_dragging(&self) -> bool {
        self.dragging
    }

    /// The dragged point index
    fn active(&self) -> Option<usize> {
        if self.dragging {
            self.selected
        } else {
            None
        }
    }
}

/// Everything a pointer event can change, guarded as one unit
#[derive(Debug, Clone)]
struct WarpState {
    points: ControlPoints,
    mode: Mode,
    drag: DragState,
    transform: Option<PerspectiveTransform>,
}

impl WarpState {
    /// Rebuild the cached transform from the current points and mode
    fn recompute(&mut self, width: u32, height: u32) {
        let canonical = frame_corners(width, height);
        let points = self.points.as_quad();
        let (src, dst) = match self.mode {
            Mode::Warp => (canonical, points),
            Mode::Input => (points, canonical),
        };

        match PerspectiveTransform::compute(src, dst, width, height) {
            Ok(transform) => {
                if self.transform.is_none() {
                    debug!("Warp transform available ({} mode)", self.mode);
                }
                self.transform = Some(transform);
            }
            Err(e) => {
                if self.transform.is_some() {
                    warn!("Warp transform disabled, passing frames through: {}", e);
                } else {
                    debug!("Warp transform still unavailable: {}", e);
                }
                self.transform = None;
            }
        }
    }
}

/// A labeled control point for the UI
#[derive(Debug, Clone, Serialize)]
pub struct PointInfo {
    pub id: usize,
    pub label: &'static str,
    pub x: f64,
    pub y: f64,
}

/// Point-in-time copy of the effect state
#[derive(Debug, Clone, Serialize)]
pub struct WarpSnapshot {
    pub name: String,
    pub mode: Mode,
    pub width: u32,
    pub height: u32,
    pub show_overlays: bool,
    pub points: Vec<PointInfo>,
    pub selected: Option<usize>,
    pub dragging: bool,
    /// Row-major homography, absent while the points are degenerate
    pub matrix: Option<[[f64; 3]; 3]>,
}

/// Perspective warp with draggable corners
pub struct WarpEffect {
    name: String,
    width: u32,
    height: u32,
    show_overlays: bool,
    style: OverlayStyle,
    state: Mutex<WarpState>,
}

impl WarpEffect {
    /// Create an effect for `width x height` frames with points on the frame corners
    pub fn new(name: &str, width: u32, height: u32, mode: Mode, show_overlays: bool) -> Self {
        let mut state = WarpState {
            points: ControlPoints::frame_corners(width, height),
            mode,
            drag: DragState::default(),
            transform: None,
        };
        state.recompute(width, height);
        if state.transform.is_none() {
            warn!(
                "{}: no initial transform for {}x{} frames, passing frames through",
                name, width, height
            );
        }

        Self {
            name: name.to_string(),
            width,
            height,
            show_overlays,
            style: OverlayStyle::default(),
            state: Mutex::new(state),
        }
    }

    pub fn with_style(mut self, style: OverlayStyle) -> Self {
        self.style = style;
        self
    }

    /// Switch interpretation of the points; their positions are kept
    pub fn set_mode(&self, mode: Mode) {
        let mut state = self.state.lock();
        if state.mode != mode {
            info!("{}: switching to {} mode", self.name, mode);
        }
        state.mode = mode;
        state.recompute(self.width, self.height);
    }

    /// [`set_mode`](Self::set_mode) from a mode name, rejecting unknown names
    pub fn set_mode_str(&self, mode: &str) -> Result<(), WarpError> {
        self.set_mode(mode.parse()?);
        Ok(())
    }

    /// Put the points back on the frame corners and drop any drag
    pub fn reset_points(&self) {
        let mut state = self.state.lock();
        state.points = ControlPoints::frame_corners(self.width, self.height);
        state.drag = DragState::default();
        state.recompute(self.width, self.height);
        info!("{}: control points reset", self.name);
    }

    pub fn snapshot(&self) -> WarpSnapshot {
        let state = self.state.lock();
        WarpSnapshot {
            name: self.name.clone(),
            mode: state.mode,
            width: self.width,
            height: self.height,
            show_overlays: self.show_overlays,
            points: state
                .points
                .iter()
                .enumerate()
                .map(|(id, p)| PointInfo {
                    id,
                    label: CORNER_LABELS[id],
                    x: p.x,
                    y: p.y,
                })
                .collect(),
            selected: state.drag.selected(),
            dragging: state.drag.is_dragging(),
            matrix: state.transform.as_ref().map(|t| {
                let m = t.matrix();
                [0, 1, 2].map(|r| [m[(r, 0)], m[(r, 1)], m[(r, 2)]])
            }),
        }
    }

    /// Apply a pointer event; ignored entirely when overlays are hidden
    ///
    /// Right-button presses are left to the viewer's context menu.
    pub fn handle_pointer(&self, event: PointerEvent) {
        if !self.show_overlays {
            return;
        }

        let mut state = self.state.lock();
        match (event.kind, event.button) {
            (PointerKind::Press, PointerButton::Left) => {
                if let Some(idx) = state.points.hit_test(event.x, event.y, self.style.hit_radius) {
                    state.drag = DragState::start(idx);
                    info!("{}: selected point {} for dragging", self.name, idx + 1);
                }
            }
            (PointerKind::Move, _) => {
                let Some(idx) = state.drag.active() else {
                    return;
                };
                let width = self.width;
                let height = self.height;
                if state
                    .points
                    .move_clamped(idx, event.x, event.y, width, height)
                    .is_some()
                {
                    state.recompute(width, height);
                }
            }
            (PointerKind::Release, PointerButton::Left) => {
                if let Some(idx) = state.drag.active() {
                    info!("{}: released point {}", self.name, idx + 1);
                    state.drag = DragState::default();
                }
            }
            _ => {}
        }
    }
}

impl MouseHandler for WarpEffect {
    fn on_pointer(&self, event: PointerEvent) {
        self.handle_pointer(event);
    }

    fn accepts_pointer(&self) -> bool {
        self.show_overlays
    }
}

impl VideoEffect for WarpEffect {
    fn process(&self, frame: &RgbImage) -> RgbImage {
        let (transform, points, mode, selected) = {
            let state = self.state.lock();
            (
                state.transform.clone(),
                state.points,
                state.mode,
                state.drag.selected(),
            )
        };

        let Some(transform) = transform else {
            return frame.clone();
        };

        let mut output = match mode {
            Mode::Warp => transform.warp_rgb(frame),
            Mode::Input => frame.clone(),
        };

        if self.show_overlays {
            overlay::draw_control_points(
                &mut output,
                &points,
                selected,
                mode,
                &self.style,
                overlay::label_font(),
            );
        }

        output
    }

    fn name(&self) -> &str {
        &self.name
    }
}
