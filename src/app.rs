//! Main loop wiring the camera, the warp pipeline and the viewers

use std::sync::Arc;

use anyhow::Result;
use image::RgbImage;
use tracing::{info, warn};

use crate::capture::FrameSource;
use crate::effect::{Pipeline, VideoEffect};
use crate::error::WarpError;
use crate::overlay::OverlayStyle;
use crate::server::AppState;
use crate::viewer::{MenuOption, Viewer, ViewerHub};
use crate::warp::{Mode, WarpEffect};

pub const MAIN_VIEWER: &str = "Main Viewer";
pub const INPUT_VIEWER: &str = "Input Warping Viewer";
pub const OUTPUT_VIEWER: &str = "Output Warping Viewer";

/// Viewers, effects and pipeline for one run
pub struct Session {
    main_viewer: Arc<Viewer>,
    input_viewer: Arc<Viewer>,
    output_viewer: Arc<Viewer>,
    input_effect: Arc<WarpEffect>,
    output_effect: Arc<WarpEffect>,
    pipeline: Pipeline,
}

impl Session {
    /// Open the three viewers and attach the warp effects for `width x height` frames
    pub fn new(width: u32, height: u32, state: &AppState, style: &OverlayStyle) -> Self {
        let hub = &state.hub;
        let main_viewer = hub.create_viewer(MAIN_VIEWER);
        let input_viewer = hub.create_viewer(INPUT_VIEWER);
        let output_viewer = hub.create_viewer(OUTPUT_VIEWER);

        // The input side is interactive, the output side only displays
        let input_effect = Arc::new(
            WarpEffect::new("input-warp", width, height, Mode::Input, true)
                .with_style(style.clone()),
        );
        let output_effect = Arc::new(
            WarpEffect::new("output-warp", width, height, Mode::Warp, false)
                .with_style(style.clone()),
        );

        input_viewer.register_mouse_handler(input_effect.clone());
        output_viewer.register_mouse_handler(output_effect.clone());
        state.attach_effect(&input_viewer, input_effect.clone());
        state.attach_effect(&output_viewer, output_effect.clone());

        // Input warp is applied first
        let mut pipeline = Pipeline::new();
        pipeline
            .add_effect(input_effect.clone())
            .add_effect(output_effect.clone());
        info!("Pipeline ready with {} effects", pipeline.len());

        let callback = {
            let input_effect = input_effect.clone();
            let output_effect = output_effect.clone();
            Arc::new(move |option: MenuOption| {
                handle_menu_option(option, &input_effect, &output_effect)
            })
        };
        for viewer in [&main_viewer, &input_viewer, &output_viewer] {
            viewer.register_menu_callback(callback.clone());
        }

        Self {
            main_viewer,
            input_viewer,
            output_viewer,
            input_effect,
            output_effect,
            pipeline,
        }
    }

    /// Process one frame and publish it to every viewer
    pub fn show(&self, frame: &RgbImage) {
        let processed = self.pipeline.process_frame(frame);

        self.main_viewer.show_frame(frame);
        self.input_viewer.show_frame(&self.input_effect.process(frame));
        self.output_viewer.show_frame(&processed);
    }
}

/// Switch both effects to complementary modes
pub fn handle_menu_option(option: MenuOption, input: &WarpEffect, output: &WarpEffect) {
    match option {
        MenuOption::SwitchToInputView => {
            input.set_mode(Mode::Input);
            output.set_mode(Mode::Warp);
            info!("Switched to Input View");
        }
        MenuOption::SwitchToWarpView => {
            input.set_mode(Mode::Warp);
            output.set_mode(Mode::Input);
            info!("Switched to Warp View");
        }
    }
}

/// Run until the source ends, a viewer is closed or quit is requested
///
/// The source and the viewers are released on every exit path.
pub fn run(mut source: Box<dyn FrameSource>, state: Arc<AppState>, style: OverlayStyle) -> Result<()> {
    let result = run_loop(source.as_mut(), &state, &style);

    source.release();
    state.hub.close_all();

    result
}

fn run_loop(source: &mut dyn FrameSource, state: &AppState, style: &OverlayStyle) -> Result<()> {
    // The first frame fixes the dimensions of every effect
    let Some(first_frame) = source.read()? else {
        return Err(WarpError::CaptureUnavailable("Unable to read from camera".to_string()).into());
    };
    let (width, height) = first_frame.dimensions();
    if (width, height) != source.dimensions() {
        warn!(
            "Source negotiated {:?} but delivered {}x{} frames",
            source.dimensions(),
            width,
            height
        );
    }
    info!("Frame size: {}x{}", width, height);

    let session = Session::new(width, height, state, style);
    session.show(&first_frame);

    loop {
        if should_exit(&state.hub) {
            info!("Exiting application");
            return Ok(());
        }

        let Some(frame) = source.read()? else {
            info!("No frame captured from camera. Exiting");
            return Ok(());
        };

        session.show(&frame);
    }
}

fn should_exit(hub: &ViewerHub) -> bool {
    hub.quit_requested() || hub.any_closed()
}
