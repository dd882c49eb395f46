//! Difference-of-Gaussians keypoint detection and keypoint-set matching.
//!
//! The detector builds a Gaussian scale space from a grayscale image, takes
//! the difference of adjacent levels, finds the samples that are strict
//! extrema among their 26 neighbours in space and scale, refines each one to
//! sub-pixel and sub-scale accuracy with a second order Taylor expansion and
//! finally drops candidates with weak responses or edge-like curvature.
//!
//! The [`Matcher`] compares the keypoint sets of several images with a
//! nearest neighbour distance ratio test gated by a whole image mean squared
//! error, and reports the pairs that look alike.
//!
//! ```no_run
//! use dog_sift::{Matcher, Sift};
//!
//! let sift = Sift::default();
//! let matcher = Matcher::default();
//! let subjects = ["a.png", "b.png"]
//!     .iter()
//!     .map(|path| matcher.subject_from_path(&sift, path))
//!     .collect::<dog_sift::Result<Vec<_>>>()
//!     .unwrap();
//! let report = matcher
//!     .match_all(&subjects, &dog_sift::CancellationToken::new())
//!     .unwrap();
//! report.write_to("results.txt").unwrap();
//! ```

mod cancel;
mod difference;
mod error;
mod extrema;
mod filtering;
pub mod image;
mod matcher;
mod refinement;
mod scale_space;

pub use crate::cancel::CancellationToken;
pub use crate::difference::{difference_of_gaussians, DogStack};
pub use crate::error::{Result, SiftError};
pub use crate::extrema::{find_extrema, is_extremum, Extremum, KeypointCandidate};
pub use crate::filtering::edge_response;
pub use crate::image::{DefaultFilter, Filter, GrayFloatImage};
pub use crate::matcher::{thumbnail_mse, MatchReport, Matcher, PairComparison, Subject};
pub use crate::refinement::{QuadraticFit, RefinedKeypoint};
pub use crate::scale_space::{Octave, Pyramid, ScaleLevel};

use ::image::DynamicImage;
use log::*;
use std::path::Path;

/// Contains the configuration parameters of the detector.
///
/// The most important parameter to pay attention to is `contrast_threshold`.
/// [`Sift::new`] can be used to set it and leave everything else at the
/// defaults. The helpers [`Sift::sparse`] and [`Sift::dense`] are also
/// available. The default threshold is `0.015` on samples between 0 and 1.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Sift {
    /// Base scale (sigma units). The first level of every octave is blurred
    /// with `sigma * blur_step^3`.
    pub sigma: f64,

    /// Ratio between the blur radii of consecutive levels in an octave
    pub blur_step: f64,

    /// Number of octaves; octave `i` is resampled to `base_size / 2^i`
    pub num_octaves: usize,

    /// Number of scales per octave. Every octave holds two more levels.
    pub scales_per_octave: usize,

    /// Side of the square image the first octave is resampled to
    pub base_size: usize,

    /// Minimum absolute interpolated response of a keypoint
    pub contrast_threshold: f64,

    /// Fraction of `contrast_threshold` raw extrema must reach to be refined
    pub initial_contrast_ratio: f64,

    /// Maximum ratio of principal curvatures before a point counts as an edge
    pub edge_ratio: f64,

    /// Number of Taylor refinement iterations before a candidate is dropped
    pub max_refinement_steps: usize,

    /// Refinement converges once every offset component is below this
    pub max_offset: f64,

    /// Added to the diagonal of the scale space Hessian before inversion
    pub hessian_regularization: f64,

    /// Sampling distance the physical coordinates are expressed in
    pub min_sampling_distance: f64,
}

impl Sift {
    /// This convenience constructor is provided for the very common case
    /// that the contrast threshold needs to be modified.
    pub fn new(threshold: f64) -> Self {
        Self {
            contrast_threshold: threshold,
            ..Default::default()
        }
    }

    /// Create a `Sift` that sparsely detects features.
    ///
    /// Uses a threshold of `0.03` (default is `0.015`).
    pub fn sparse() -> Self {
        Self::new(0.03)
    }

    /// Create a `Sift` that densely detects features.
    ///
    /// Uses a threshold of `0.0075` (default is `0.015`).
    pub fn dense() -> Self {
        Self::new(0.0075)
    }

    /// Blur radius of the first level of every octave.
    pub fn base_radius(&self) -> f64 {
        self.sigma * self.blur_step.powi(3)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(SiftError::InvalidConfig(reason));
        if self.num_octaves == 0 {
            return invalid("at least one octave is required".into());
        }
        if self.scales_per_octave == 0 {
            return invalid("at least one scale per octave is required".into());
        }
        if !(self.sigma > 0.0) || !(self.blur_step > 0.0) {
            return invalid(format!(
                "sigma ({}) and blur step ({}) must be positive",
                self.sigma, self.blur_step
            ));
        }
        for (name, value) in [
            ("contrast threshold", self.contrast_threshold),
            ("edge ratio", self.edge_ratio),
            ("maximum offset", self.max_offset),
        ] {
            if !(value > 0.0) {
                return invalid(format!("{} ({}) must be positive", name, value));
            }
        }
        let smallest = self.base_size >> (self.num_octaves - 1).min(usize::BITS as usize - 1);
        if smallest < 3 {
            return invalid(format!(
                "octave {} would be {}x{} pixels, at least 3x3 is required",
                self.num_octaves - 1,
                smallest,
                smallest
            ));
        }
        Ok(())
    }
}

impl Default for Sift {
    fn default() -> Sift {
        Sift {
            sigma: 1.6,
            blur_step: std::f64::consts::SQRT_2,
            num_octaves: 1,
            scales_per_octave: 3,
            base_size: 256,
            contrast_threshold: 0.015,
            initial_contrast_ratio: 0.8,
            edge_ratio: 10.0,
            max_refinement_steps: 5,
            max_offset: 0.6,
            hessian_regularization: 1e-5,
            min_sampling_distance: 0.5,
        }
    }
}

/// How many candidates each stage of a detection run discarded.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RejectionCounts {
    /// Discrete scale space extrema found
    pub extrema: usize,
    /// Extrema below the coarse contrast gate
    pub low_initial_contrast: usize,
    /// Candidates that left the octave or did not converge while refining
    pub unstable: usize,
    /// Refined keypoints below the contrast threshold
    pub low_contrast: usize,
    /// Refined keypoints on edges
    pub edge: usize,
}

/// The immutable outcome of one detection run.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    /// Keypoints in scan order (octave, scale, row, col).
    pub keypoints: Vec<RefinedKeypoint>,
    pub rejected: RejectionCounts,
}

impl Detection {
    /// The physical `(x, y)` position of every keypoint.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.keypoints.iter().map(|kp| (kp.x, kp.y)).collect()
    }
}

impl Sift {
    /// Detect keypoints with the default filters.
    pub fn detect(&self, image: &GrayFloatImage) -> Result<Detection> {
        self.detect_with(image, &DefaultFilter, &CancellationToken::new())
    }

    /// Detect keypoints in an image.
    ///
    /// This performs all operations end-to-end. The client might be only
    /// interested in certain portions of the process, all of which are
    /// exposed in public functions, but this function documents how the
    /// various parts fit together.
    ///
    /// # Arguments
    /// * `image` - The input image.
    /// * `filter` - The blur and resampling primitives.
    /// * `cancel` - Checked before every octave.
    pub fn detect_with(
        &self,
        image: &GrayFloatImage,
        filter: &impl Filter,
        cancel: &CancellationToken,
    ) -> Result<Detection> {
        let pyramid = self.build_pyramid(image, filter, cancel)?;
        trace!("Gaussian scale space finished.");
        let dogs = difference_of_gaussians(&pyramid);
        trace!("Difference of Gaussians finished.");
        let extrema = self.find_scale_space_extrema(&dogs, cancel)?;
        let candidates = self.discard_low_initial_contrast(&dogs, &extrema);
        let refined = self.refine_candidates(&dogs, &candidates)?;
        let contrasted = self.discard_low_contrast(&refined);
        let keypoints = self.discard_edges(&dogs, &contrasted);
        let rejected = RejectionCounts {
            extrema: extrema.len(),
            low_initial_contrast: extrema.len() - candidates.len(),
            unstable: candidates.len() - refined.len(),
            low_contrast: refined.len() - contrasted.len(),
            edge: contrasted.len() - keypoints.len(),
        };
        debug!("Rejections: {:?}", rejected);
        info!("Extracted {} keypoints", keypoints.len());
        Ok(Detection {
            keypoints,
            rejected,
        })
    }

    /// Extract keypoints from an image of any color type.
    ///
    /// # Example
    /// ```no_run
    /// let sift = dog_sift::Sift::default();
    /// let keypoints = sift.extract(&image::open("box.png").unwrap()).unwrap();
    /// ```
    pub fn extract(&self, image: &DynamicImage) -> Result<Vec<RefinedKeypoint>> {
        Ok(self.detect(&GrayFloatImage::from_dynamic(image))?.keypoints)
    }

    /// Extract keypoints from an image on disk.
    pub fn extract_path(&self, path: impl AsRef<Path>) -> Result<Vec<RefinedKeypoint>> {
        self.extract(&::image::open(path)?)
    }
}
