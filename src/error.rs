//! Error types for the warp effect and its collaborators

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WarpError {
    /// The four correspondences do not define a projective transform
    /// (collinear triples, duplicate points, singular system)
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(&'static str),

    /// The camera could not be opened or did not deliver a frame
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("unknown warp mode: {0:?}")]
    UnknownMode(String),

    #[error("unknown menu option: {0:?}")]
    UnknownMenuOption(String),

    #[error("unknown viewer: {0:?}")]
    UnknownViewer(String),
}
