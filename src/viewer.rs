//! Viewer windows
//!
//! A viewer is a named display sink. It keeps the latest frame as JPEG for
//! the web UI, forwards pointer events to a registered [`MouseHandler`] and
//! hosts a right-click context menu whose selections go to a registered
//! callback. The browser only reports which menu entry was picked; drawing
//! the menu is left to the page.

use std::fmt;
use std::io::Cursor;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use arc_swap::ArcSwapOption;
use image::{ImageOutputFormat, RgbImage};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::WarpError;
use crate::warp::{PointerButton, PointerEvent, PointerKind};

/// Receives pointer events delivered to a viewer
pub trait MouseHandler: Send + Sync {
    fn on_pointer(&self, event: PointerEvent);

    /// Whether events delivered now can have any effect
    fn accepts_pointer(&self) -> bool {
        true
    }
}

/// Entries of the mode-switch context menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MenuOption {
    SwitchToInputView,
    SwitchToWarpView,
}

impl MenuOption {
    pub const ALL: [MenuOption; 2] = [MenuOption::SwitchToInputView, MenuOption::SwitchToWarpView];

    pub fn label(&self) -> &'static str {
        match self {
            MenuOption::SwitchToInputView => "Switch to Input View",
            MenuOption::SwitchToWarpView => "Switch to Warp View",
        }
    }
}

impl fmt::Display for MenuOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MenuOption {
    type Err = WarpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MenuOption::ALL
            .into_iter()
            .find(|option| option.label() == s)
            .ok_or_else(|| WarpError::UnknownMenuOption(s.to_string()))
    }
}

pub type MenuCallback = Arc<dyn Fn(MenuOption) + Send + Sync>;

/// Something that offers a context menu and reacts to a chosen entry
pub trait MenuHost {
    fn menu_options(&self) -> &[MenuOption];

    /// Run the registered callback for the entry labeled `label`
    fn select_menu_option(&self, label: &str) -> Result<MenuOption, WarpError>;
}

/// Latest frame of a viewer, JPEG encoded
#[derive(Debug)]
pub struct EncodedFrame {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub sequence: u64,
}

/// A named display window
pub struct Viewer {
    name: String,
    slug: String,
    jpeg_quality: u8,
    frame: ArcSwapOption<EncodedFrame>,
    sequence: AtomicU64,
    closed: AtomicBool,
    mouse_handler: RwLock<Option<Arc<dyn MouseHandler>>>,
    menu_callback: RwLock<Option<MenuCallback>>,
}

impl Viewer {
    pub fn new(name: &str, jpeg_quality: u8) -> Self {
        Self {
            name: name.to_string(),
            slug: slugify(name),
            jpeg_quality,
            frame: ArcSwapOption::empty(),
            sequence: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            mouse_handler: RwLock::new(None),
            menu_callback: RwLock::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// URL-safe identifier derived from the name
    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Publish a frame; ignored once the window is closed
    pub fn show_frame(&self, frame: &RgbImage) {
        if self.is_window_closed() {
            return;
        }
        match encode_jpeg(frame, self.jpeg_quality) {
            Ok(jpeg) => {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
                self.frame.store(Some(Arc::new(EncodedFrame {
                    jpeg,
                    width: frame.width(),
                    height: frame.height(),
                    sequence,
                })));
            }
            Err(e) => warn!("{}: failed to encode frame: {}", self.name, e),
        }
    }

    pub fn latest_frame(&self) -> Option<Arc<EncodedFrame>> {
        self.frame.load_full()
    }

    pub fn is_window_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("{} closed", self.name);
        }
    }

    pub fn register_mouse_handler(&self, handler: Arc<dyn MouseHandler>) {
        *self.mouse_handler.write() = Some(handler);
    }

    /// True when a registered handler currently reacts to pointer events
    pub fn is_interactive(&self) -> bool {
        self.mouse_handler
            .read()
            .as_ref()
            .is_some_and(|handler| handler.accepts_pointer())
    }

    pub fn register_menu_callback(&self, callback: MenuCallback) {
        *self.menu_callback.write() = Some(callback);
    }

    /// Forward a pointer event to the registered handler
    pub fn dispatch_pointer(&self, event: PointerEvent) {
        if self.is_window_closed() {
            return;
        }
        if event.kind == PointerKind::Press && event.button == PointerButton::Right {
            debug!("{}: context menu requested at ({}, {})", self.name, event.x, event.y);
        }
        let handler = self.mouse_handler.read().clone();
        if let Some(handler) = handler {
            handler.on_pointer(event);
        }
    }
}

impl MenuHost for Viewer {
    fn menu_options(&self) -> &[MenuOption] {
        &MenuOption::ALL
    }

    fn select_menu_option(&self, label: &str) -> Result<MenuOption, WarpError> {
        let option: MenuOption = label.parse()?;
        let callback = self.menu_callback.read().clone();
        match callback {
            Some(callback) => {
                debug!("{}: menu option {:?}", self.name, option.label());
                callback(option);
            }
            None => debug!("{}: no menu callback for {:?}", self.name, option.label()),
        }
        Ok(option)
    }
}

/// Encode RGB data to JPEG
fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut jpeg_data = Vec::new();
    let mut cursor = Cursor::new(&mut jpeg_data);
    frame.write_to(&mut cursor, ImageOutputFormat::Jpeg(quality))?;
    Ok(jpeg_data)
}

fn slugify(name: &str) -> String {
    name.split_whitespace()
        .map(|word| word.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// Summary of a viewer for the UI
#[derive(Debug, Clone, Serialize)]
pub struct ViewerInfo {
    pub name: String,
    pub slug: String,
    pub interactive: bool,
    pub closed: bool,
    /// Size of the latest published frame
    pub frame_size: Option<(u32, u32)>,
}

/// Registry of all viewers plus the application-wide quit flag
pub struct ViewerHub {
    viewers: RwLock<Vec<Arc<Viewer>>>,
    quit: AtomicBool,
    jpeg_quality: u8,
}

impl ViewerHub {
    pub fn new(jpeg_quality: u8) -> Self {
        Self {
            viewers: RwLock::new(Vec::new()),
            quit: AtomicBool::new(false),
            jpeg_quality,
        }
    }

    /// Open a new viewer window
    pub fn create_viewer(&self, name: &str) -> Arc<Viewer> {
        let viewer = Arc::new(Viewer::new(name, self.jpeg_quality));
        info!("Opened viewer {:?} at /viewer/{}", name, viewer.slug());
        self.viewers.write().push(viewer.clone());
        viewer
    }

    pub fn get(&self, slug: &str) -> Result<Arc<Viewer>, WarpError> {
        self.viewers
            .read()
            .iter()
            .find(|v| v.slug() == slug)
            .cloned()
            .ok_or_else(|| WarpError::UnknownViewer(slug.to_string()))
    }

    pub fn list(&self) -> Vec<ViewerInfo> {
        self.viewers
            .read()
            .iter()
            .map(|v| ViewerInfo {
                name: v.name().to_string(),
                slug: v.slug().to_string(),
                interactive: v.is_interactive(),
                closed: v.is_window_closed(),
                frame_size: v.latest_frame().map(|f| (f.width, f.height)),
            })
            .collect()
    }

    pub fn request_quit(&self) {
        if !self.quit.swap(true, Ordering::SeqCst) {
            info!("Quit requested");
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit.load(Ordering::SeqCst)
    }

    pub fn any_closed(&self) -> bool {
        self.viewers.read().iter().any(|v| v.is_window_closed())
    }

    pub fn close_all(&self) {
        for viewer in self.viewers.read().iter() {
            viewer.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<PointerEvent>>,
    }

    impl MouseHandler for Recorder {
        fn on_pointer(&self, event: PointerEvent) {
            self.events.lock().push(event);
        }
    }

    #[test]
    fn test_menu_option_labels() {
        assert_eq!(
            "Switch to Input View".parse::<MenuOption>().unwrap(),
            MenuOption::SwitchToInputView
        );
        assert_eq!(
            "Switch to Warp View".parse::<MenuOption>().unwrap(),
            MenuOption::SwitchToWarpView
        );
        assert!(matches!(
            "Switch to Nowhere".parse::<MenuOption>(),
            Err(WarpError::UnknownMenuOption(_))
        ));
    }

    #[test]
    fn test_menu_selection_runs_callback() {
        let viewer = Viewer::new("Main Viewer", 75);
        let picked = Arc::new(Mutex::new(Vec::new()));
        let sink = picked.clone();
        viewer.register_menu_callback(Arc::new(move |option| sink.lock().push(option)));

        viewer.select_menu_option("Switch to Warp View").unwrap();
        assert!(viewer.select_menu_option("bogus").is_err());

        assert_eq!(*picked.lock(), vec![MenuOption::SwitchToWarpView]);
        assert_eq!(viewer.menu_options().len(), 2);
    }

    #[test]
    fn test_pointer_events_reach_handler_until_closed() {
        let viewer = Viewer::new("Input Warping Viewer", 75);
        let recorder = Arc::new(Recorder::default());
        viewer.register_mouse_handler(recorder.clone());

        let event = PointerEvent::new(PointerKind::Press, PointerButton::Left, 3.0, 4.0);
        viewer.dispatch_pointer(event);
        viewer.close();
        viewer.dispatch_pointer(event);

        assert_eq!(*recorder.events.lock(), vec![event]);
        assert!(viewer.is_window_closed());
    }

    #[test]
    fn test_show_frame_publishes_jpeg() {
        let viewer = Viewer::new("Main Viewer", 75);
        assert!(viewer.latest_frame().is_none());

        viewer.show_frame(&RgbImage::new(16, 8));
        let frame = viewer.latest_frame().unwrap();
        assert_eq!(&frame.jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!((frame.width, frame.height, frame.sequence), (16, 8, 1));

        viewer.close();
        viewer.show_frame(&RgbImage::new(16, 8));
        assert_eq!(viewer.latest_frame().unwrap().sequence, 1);
    }

    #[test]
    fn test_hub_lookup_and_close() {
        let hub = ViewerHub::new(75);
        hub.create_viewer("Main Viewer");
        hub.create_viewer("Output Warping Viewer");

        assert_eq!(hub.get("output-warping-viewer").unwrap().name(), "Output Warping Viewer");
        assert!(matches!(hub.get("nope"), Err(WarpError::UnknownViewer(_))));
        assert!(!hub.any_closed());

        hub.get("main-viewer").unwrap().close();
        assert!(hub.any_closed());

        hub.close_all();
        assert!(hub.list().iter().all(|v| v.closed));
    }

    /// Handler that is registered but reacts to nothing
    struct Inert;

    impl MouseHandler for Inert {
        fn on_pointer(&self, _event: PointerEvent) {}

        fn accepts_pointer(&self) -> bool {
            false
        }
    }

    #[test]
    fn test_list_reports_interactive_and_frame_size() {
        let hub = ViewerHub::new(75);
        let main = hub.create_viewer("Main Viewer");
        let input = hub.create_viewer("Input Warping Viewer");
        let output = hub.create_viewer("Output Warping Viewer");
        input.register_mouse_handler(Arc::new(Recorder::default()));
        output.register_mouse_handler(Arc::new(Inert));
        main.show_frame(&RgbImage::new(32, 24));

        let list = hub.list();
        let interactive: Vec<bool> = list.iter().map(|v| v.interactive).collect();
        assert_eq!(interactive, vec![false, true, false]);
        assert_eq!(list[0].frame_size, Some((32, 24)));
        assert_eq!(list[1].frame_size, None);
    }

    #[test]
    fn test_quit_flag() {
        let hub = ViewerHub::new(75);
        assert!(!hub.quit_requested());
        hub.request_quit();
        assert!(hub.quit_requested());
    }
}
