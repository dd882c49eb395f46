use crate::{DogStack, RefinedKeypoint, Sift};
use log::*;

/// Edge response `trace(H)^2 / det(H)` of the spatial Hessian of one
/// Difference-of-Gaussians image at an interior sample.
///
/// Returns `None` when the determinant is not positive: the curvatures have
/// different signs or one of them vanishes, so the point is not blob-like.
pub fn edge_response(dog: &DogStack, scale: usize, row: usize, col: usize) -> Option<f64> {
    let d = |r: usize, c: usize| f64::from(dog.get(scale, r, c));
    let center = 2.0 * d(row, col);
    let h_rr = d(row + 1, col) + d(row - 1, col) - center;
    let h_cc = d(row, col + 1) + d(row, col - 1) - center;
    let h_rc = 0.25
        * (d(row + 1, col + 1) - d(row + 1, col - 1) - d(row - 1, col + 1)
            + d(row - 1, col - 1));
    let trace = h_rr + h_cc;
    let det = h_rr * h_cc - h_rc * h_rc;
    if det > 0.0 {
        Some(trace * trace / det)
    } else {
        None
    }
}

impl Sift {
    /// The largest accepted edge response, `(r + 1)^2 / r` for `r = edge_ratio`.
    pub fn edge_limit(&self) -> f64 {
        (self.edge_ratio + 1.0).powi(2) / self.edge_ratio
    }

    /// Keep the keypoints whose interpolated response reaches the threshold.
    pub fn discard_low_contrast(&self, keypoints: &[RefinedKeypoint]) -> Vec<RefinedKeypoint> {
        let kept: Vec<RefinedKeypoint> = keypoints
            .iter()
            .filter(|kp| kp.contrast.abs() >= self.contrast_threshold)
            .copied()
            .collect();
        debug!(
            "{}/{} remain after the contrast threshold.",
            kept.len(),
            keypoints.len()
        );
        kept
    }

    /// Keep the keypoints whose principal curvatures are similar enough to
    /// describe a blob rather than an edge.
    pub fn discard_edges(
        &self,
        dogs: &[DogStack],
        keypoints: &[RefinedKeypoint],
    ) -> Vec<RefinedKeypoint> {
        let limit = self.edge_limit();
        let kept: Vec<RefinedKeypoint> = keypoints
            .iter()
            .filter(|kp| {
                edge_response(&dogs[kp.octave], kp.scale, kp.row, kp.col)
                    .map_or(false, |response| response < limit)
            })
            .copied()
            .collect();
        debug!(
            "{}/{} remain after edge rejection.",
            kept.len(),
            keypoints.len()
        );
        kept
    }
}
