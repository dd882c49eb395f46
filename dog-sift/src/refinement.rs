use crate::{DogStack, KeypointCandidate, Result, Sift, SiftError};
use cv_core::nalgebra::{Matrix3, Point2, Vector3};
use cv_core::ImagePoint;
use log::*;

/// A keypoint located to sub-pixel and sub-scale accuracy.
///
/// `octave`, `scale`, `row` and `col` are the discrete position the
/// refinement converged at. `x` runs along rows and `y` along columns, both
/// in units of the minimum sampling distance.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RefinedKeypoint {
    pub octave: usize,
    pub scale: usize,
    pub row: usize,
    pub col: usize,
    /// Physical scale
    pub sigma: f64,
    pub x: f64,
    pub y: f64,
    /// Interpolated Difference-of-Gaussians response
    pub contrast: f64,
}

impl ImagePoint for RefinedKeypoint {
    fn image_point(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}

/// The extremum of the quadratic fitted around a discrete position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadraticFit {
    /// Offset to the extremum as `(scale, row, col)`
    pub offset: Vector3<f64>,
    /// Interpolated response at the extremum
    pub contrast: f64,
}

impl QuadraticFit {
    /// Whether the extremum lies close enough to the sample it was fitted at.
    pub fn is_converged(&self, max_offset: f64) -> bool {
        self.offset.iter().all(|o| o.abs() < max_offset)
    }
}

/// Gradient and Hessian with respect to `(scale, row, col)` by central differences.
fn gradient_and_hessian(
    dog: &DogStack,
    scale: usize,
    row: usize,
    col: usize,
) -> (Vector3<f64>, Matrix3<f64>) {
    let d = |ds: isize, dr: isize, dc: isize| {
        f64::from(dog.get(
            (scale as isize + ds) as usize,
            (row as isize + dr) as usize,
            (col as isize + dc) as usize,
        ))
    };
    let center = d(0, 0, 0);
    let gradient = Vector3::new(
        0.5 * (d(1, 0, 0) - d(-1, 0, 0)),
        0.5 * (d(0, 1, 0) - d(0, -1, 0)),
        0.5 * (d(0, 0, 1) - d(0, 0, -1)),
    );
    let h_ss = d(1, 0, 0) + d(-1, 0, 0) - 2.0 * center;
    let h_rr = d(0, 1, 0) + d(0, -1, 0) - 2.0 * center;
    let h_cc = d(0, 0, 1) + d(0, 0, -1) - 2.0 * center;
    let h_sr = 0.25 * (d(1, 1, 0) - d(1, -1, 0) - d(-1, 1, 0) + d(-1, -1, 0));
    let h_sc = 0.25 * (d(1, 0, 1) - d(1, 0, -1) - d(-1, 0, 1) + d(-1, 0, -1));
    let h_rc = 0.25 * (d(0, 1, 1) - d(0, 1, -1) - d(0, -1, 1) + d(0, -1, -1));
    #[rustfmt::skip]
    let hessian = Matrix3::new(
        h_ss, h_sr, h_sc,
        h_sr, h_rr, h_rc,
        h_sc, h_rc, h_cc,
    );
    (gradient, hessian)
}

impl Sift {
    /// Distance between samples of `octave`, in units of the input.
    pub fn sampling_distance(&self, octave: usize) -> f64 {
        self.min_sampling_distance * 2f64.powi(octave as i32 - 1)
    }

    /// Whether a refinement step may be taken at a discrete position.
    fn is_refinable(&self, dog: &DogStack, scale: isize, row: isize, col: isize) -> bool {
        0 < scale
            && scale < self.scales_per_octave as isize
            && scale < dog.len() as isize - 1
            && 0 < row
            && row < dog.height() as isize - 1
            && 0 < col
            && col < dog.width() as isize - 1
    }

    /// Fit a quadratic to the Difference-of-Gaussians around a discrete
    /// position, which must be at least one sample away from every border.
    ///
    /// A small constant is added to the diagonal of the Hessian so flat
    /// neighbourhoods still invert.
    pub fn fit_quadratic(
        &self,
        dog: &DogStack,
        scale: usize,
        row: usize,
        col: usize,
    ) -> Result<QuadraticFit> {
        let (gradient, hessian) = gradient_and_hessian(dog, scale, row, col);
        let hessian = hessian + Matrix3::identity() * self.hessian_regularization;
        let inverse = hessian
            .try_inverse()
            .ok_or(SiftError::SingularHessian {
                octave: dog.octave,
                scale,
                row,
                col,
            })?;
        let step = inverse * gradient;
        Ok(QuadraticFit {
            offset: -step,
            contrast: f64::from(dog.get(scale, row, col)) - 0.5 * gradient.dot(&step),
        })
    }

    /// One refinement step at a discrete position, or `None` when the
    /// position is too close to the border of the stack.
    pub fn offset_at(
        &self,
        dog: &DogStack,
        scale: usize,
        row: usize,
        col: usize,
    ) -> Result<Option<QuadraticFit>> {
        if !self.is_refinable(dog, scale as isize, row as isize, col as isize) {
            return Ok(None);
        }
        self.fit_quadratic(dog, scale, row, col).map(Some)
    }

    /// Iteratively move a candidate to the extremum of its local quadratic.
    ///
    /// Returns `None` when the candidate leaves the refinable region of its
    /// octave or has not converged after `max_refinement_steps` steps.
    pub fn refine(
        &self,
        dog: &DogStack,
        candidate: &KeypointCandidate,
    ) -> Result<Option<RefinedKeypoint>> {
        let mut scale = candidate.scale as isize;
        let mut row = candidate.row as isize;
        let mut col = candidate.col as isize;
        for _ in 0..self.max_refinement_steps {
            if !self.is_refinable(dog, scale, row, col) {
                return Ok(None);
            }
            let (s, r, c) = (scale as usize, row as usize, col as usize);
            let fit = self.fit_quadratic(dog, s, r, c)?;
            if fit.is_converged(self.max_offset) {
                let delta = self.sampling_distance(dog.octave);
                let offset = fit.offset;
                return Ok(Some(RefinedKeypoint {
                    octave: dog.octave,
                    scale: s,
                    row: r,
                    col: c,
                    sigma: delta / self.min_sampling_distance
                        * self.base_radius()
                        * 2f64.powf((offset[0] + s as f64) / self.scales_per_octave as f64),
                    x: delta * (offset[1] + r as f64),
                    y: delta * (offset[2] + c as f64),
                    contrast: fit.contrast,
                }));
            }
            scale = (s as f64 + fit.offset[0]).round() as isize;
            row = (r as f64 + fit.offset[1]).round() as isize;
            col = (c as f64 + fit.offset[2]).round() as isize;
        }
        Ok(None)
    }

    /// Refine every candidate, dropping the unstable ones.
    pub fn refine_candidates(
        &self,
        dogs: &[DogStack],
        candidates: &[KeypointCandidate],
    ) -> Result<Vec<RefinedKeypoint>> {
        let mut refined = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if let Some(keypoint) = self.refine(&dogs[candidate.octave], candidate)? {
                refined.push(keypoint);
            }
        }
        debug!(
            "{}/{} remain after subpixel refinement.",
            refined.len(),
            candidates.len()
        );
        Ok(refined)
    }
}
