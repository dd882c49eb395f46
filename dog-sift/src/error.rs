use thiserror::Error;

/// Everything that can go wrong while building a scale space, detecting
/// keypoints or writing a match report.
///
/// Candidates rejected by the detector (low contrast, edges, refinement that
/// leaves the octave or does not converge) are not errors; they are counted
/// in [`RejectionCounts`](crate::RejectionCounts).
#[derive(Debug, Error)]
pub enum SiftError {
    #[error("the input image has no pixels")]
    EmptyImage,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The extremum kind could not be parsed. This is a caller bug, not a
    /// property of the image.
    #[error("unknown extremum kind {0:?}, expected \"max\" or \"min\"")]
    UnknownExtremum(String),
    #[error("hessian at octave {octave}, scale {scale}, ({row}, {col}) could not be inverted")]
    SingularHessian {
        octave: usize,
        scale: usize,
        row: usize,
        col: usize,
    },
    #[error("the operation was cancelled")]
    Cancelled,
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = core::result::Result<T, SiftError>;
