//! Video effects and the linear effect pipeline

use std::sync::Arc;

use image::RgbImage;

/// A per-frame image transformation
pub trait VideoEffect: Send + Sync {
    /// Produce a new frame from `frame`; the input is never modified
    fn process(&self, frame: &RgbImage) -> RgbImage;

    fn name(&self) -> &str;
}

/// Ordered chain of effects applied one after another
#[derive(Default, Clone)]
pub struct Pipeline {
    effects: Vec<Arc<dyn VideoEffect>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_effect(&mut self, effect: Arc<dyn VideoEffect>) -> &mut Self {
        tracing::debug!("Pipeline stage {}: {}", self.effects.len(), effect.name());
        self.effects.push(effect);
        self
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Run `frame` through every effect in insertion order
    pub fn process_frame(&self, frame: &RgbImage) -> RgbImage {
        let mut effects = self.effects.iter();
        let Some(first) = effects.next() else {
            return frame.clone();
        };

        effects.fold(first.process(frame), |result, effect| effect.process(&result))
    }
}
