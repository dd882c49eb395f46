use crate::image::{resize_bilinear, smooth_more};
use crate::{CancellationToken, GrayFloatImage, RefinedKeypoint, Result, Sift, SiftError};
use cv_core::ImagePoint;
use float_ord::FloatOrd;
use log::*;
use std::fmt;
use std::path::Path;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Decides whether two images show the same thing by comparing their keypoint
/// positions, gated by how different the images look as a whole.
#[derive(Debug, Copy, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Matcher {
    /// A correspondence is accepted when the nearest right keypoint is closer
    /// than `ratio` times the second nearest.
    pub ratio: f64,

    /// Fraction of the left keypoints that must find a correspondence
    pub min_match_fraction: f64,

    /// Pairs whose thumbnails differ by this mean squared error or more never match
    pub max_mse: f64,

    /// Side of the square thumbnails the error is computed on
    pub thumbnail_size: usize,
}

impl Default for Matcher {
    fn default() -> Matcher {
        Matcher {
            ratio: 0.6,
            min_match_fraction: 0.25,
            max_mse: 2500.0,
            thumbnail_size: 256,
        }
    }
}

/// A named image prepared for matching.
#[derive(Debug, Clone)]
pub struct Subject {
    pub name: String,
    /// Resampled and smoothed copy of the image
    pub thumbnail: GrayFloatImage,
    pub keypoints: Vec<RefinedKeypoint>,
}

/// The verdict for one ordered pair of subjects.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PairComparison {
    pub left: String,
    pub right: String,
    pub left_count: usize,
    pub right_count: usize,
    /// Left keypoints that passed the ratio test
    pub accepted: usize,
    pub mse: f64,
    pub is_match: bool,
}

impl PairComparison {
    /// Accepted correspondences per left keypoint.
    pub fn ratio(&self) -> f64 {
        if self.left_count == 0 {
            0.0
        } else {
            self.accepted as f64 / self.left_count as f64
        }
    }
}

/// The matching pairs among a set of subjects.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MatchReport {
    pub entries: Vec<PairComparison>,
}

impl fmt::Display for MatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            write!(
                f,
                "{}\t{}\n{}\t{:.2}\t{}\t{:.2}\n\n",
                entry.left,
                entry.right,
                entry.left_count,
                entry.ratio(),
                entry.right_count,
                entry.mse
            )?;
        }
        Ok(())
    }
}

impl MatchReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the plain text report, replacing any existing file.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_string())?;
        info!(
            "Wrote {} matching pairs to {}",
            self.entries.len(),
            path.as_ref().display()
        );
        Ok(())
    }
}

impl Matcher {
    /// The resampled and smoothed image the error gate compares.
    pub fn thumbnail(&self, image: &GrayFloatImage) -> Result<GrayFloatImage> {
        if image.is_empty() {
            return Err(SiftError::EmptyImage);
        }
        let size = self.thumbnail_size;
        Ok(smooth_more(&resize_bilinear(image, size, size)))
    }

    pub fn subject(
        &self,
        name: impl Into<String>,
        image: &GrayFloatImage,
        keypoints: Vec<RefinedKeypoint>,
    ) -> Result<Subject> {
        Ok(Subject {
            name: name.into(),
            thumbnail: self.thumbnail(image)?,
            keypoints,
        })
    }

    /// Load an image, detect its keypoints and name it after its file name.
    pub fn subject_from_path(&self, sift: &Sift, path: impl AsRef<Path>) -> Result<Subject> {
        let path = path.as_ref();
        let image = GrayFloatImage::from_dynamic(&::image::open(path)?);
        let keypoints = sift.detect(&image)?.keypoints;
        let name = path.file_name().map_or_else(
            || path.display().to_string(),
            |name| name.to_string_lossy().into_owned(),
        );
        self.subject(name, &image, keypoints)
    }

    /// Mean squared error between two images in 8-bit intensity units.
    pub fn mse(&self, a: &GrayFloatImage, b: &GrayFloatImage) -> Result<f64> {
        thumbnail_mse(&self.thumbnail(a)?, &self.thumbnail(b)?)
    }

    /// Count the left points whose nearest right point passes the distance
    /// ratio test. Fewer than two right points never pass.
    pub fn count_correspondences<P: ImagePoint>(&self, left: &[P], right: &[P]) -> usize {
        if right.len() < 2 {
            return 0;
        }
        left.iter()
            .filter(|l| {
                let l = l.image_point();
                let mut distances: Vec<FloatOrd<f64>> = right
                    .iter()
                    .map(|r| FloatOrd((l - r.image_point()).norm()))
                    .collect();
                distances.sort_unstable();
                distances[0].0 < self.ratio * distances[1].0
            })
            .count()
    }

    /// Compare `left` against `right`. The test is directional.
    ///
    /// Both thumbnails must have the same size.
    pub fn compare(&self, left: &Subject, right: &Subject) -> Result<PairComparison> {
        let accepted = self.count_correspondences(&left.keypoints, &right.keypoints);
        let mse = thumbnail_mse(&left.thumbnail, &right.thumbnail)?;
        let left_count = left.keypoints.len();
        let is_match = left_count != 0
            && accepted as f64 >= self.min_match_fraction * left_count as f64
            && mse < self.max_mse;
        trace!(
            "{} -> {}: {}/{} accepted, mse {:.2}.",
            left.name,
            right.name,
            accepted,
            left_count,
            mse
        );
        Ok(PairComparison {
            left: left.name.clone(),
            right: right.name.clone(),
            left_count,
            right_count: right.keypoints.len(),
            accepted,
            mse,
            is_match,
        })
    }

    /// Compare every pair `(k, t)` with `k < t` once and report the matches.
    pub fn match_all(
        &self,
        subjects: &[Subject],
        cancel: &CancellationToken,
    ) -> Result<MatchReport> {
        let pairs: Vec<(usize, usize)> = (0..subjects.len())
            .flat_map(|k| (k + 1..subjects.len()).map(move |t| (k, t)))
            .collect();
        let compare_pair = |&(k, t): &(usize, usize)| -> Result<PairComparison> {
            cancel.check()?;
            self.compare(&subjects[k], &subjects[t])
        };
        #[cfg(not(feature = "rayon"))]
        let comparisons = pairs.iter().map(compare_pair).collect::<Result<Vec<_>>>()?;
        #[cfg(feature = "rayon")]
        let comparisons = pairs
            .par_iter()
            .map(compare_pair)
            .collect::<Result<Vec<_>>>()?;
        let entries: Vec<PairComparison> =
            comparisons.into_iter().filter(|c| c.is_match).collect();
        info!(
            "{} of {} pairs match among {} images",
            entries.len(),
            pairs.len(),
            subjects.len()
        );
        Ok(MatchReport { entries })
    }
}

/// Mean squared error of two equally sized thumbnails, with samples scaled to 0..255.
pub fn thumbnail_mse(a: &GrayFloatImage, b: &GrayFloatImage) -> Result<f64> {
    if (a.width(), a.height()) != (b.width(), b.height()) {
        return Err(SiftError::InvalidConfig(format!(
            "thumbnails of {}x{} and {}x{} pixels cannot be compared",
            a.width(),
            a.height(),
            b.width(),
            b.height()
        )));
    }
    if a.is_empty() {
        return Ok(0.0);
    }
    let sum: f64 = a
        .ref_array2()
        .iter()
        .zip(b.ref_array2().iter())
        .map(|(&x, &y)| (255.0 * f64::from(x - y)).powi(2))
        .sum();
    Ok(sum / (a.width() * a.height()) as f64)
}
