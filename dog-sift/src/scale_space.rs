use crate::{CancellationToken, Filter, GrayFloatImage, Result, Sift, SiftError};
use log::*;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// One blurred image of an octave.
#[derive(Debug, Clone)]
pub struct ScaleLevel {
    /// Radius of the Gaussian the octave image was blurred with
    pub sigma: f64,
    pub image: GrayFloatImage,
}

/// All levels of one resolution, finest first.
#[derive(Debug, Clone)]
pub struct Octave {
    pub index: usize,
    pub levels: Vec<ScaleLevel>,
}

impl Octave {
    pub fn width(&self) -> usize {
        self.levels.first().map_or(0, |level| level.image.width())
    }

    pub fn height(&self) -> usize {
        self.levels.first().map_or(0, |level| level.image.height())
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// The Gaussian scale space. Octave `i` has half the resolution of octave `i - 1`.
#[derive(Debug, Clone)]
pub struct Pyramid {
    pub octaves: Vec<Octave>,
}

impl Sift {
    /// Side of the square image octave `octave` is resampled to.
    pub fn octave_size(&self, octave: usize) -> usize {
        self.base_size >> octave
    }

    /// Blur radii of the levels of an octave.
    ///
    /// Every octave starts again from [`Sift::base_radius`] rather than
    /// continuing from the blur reached by the previous octave.
    pub fn level_radii(&self) -> Vec<f64> {
        (0..self.scales_per_octave + 2)
            .map(|level| self.base_radius() * self.blur_step.powi(level as i32))
            .collect()
    }

    /// Build the Gaussian scale space.
    ///
    /// Each octave resamples the source image to its own size and blurs the
    /// resampled image once per level. Octaves do not depend on each other.
    ///
    /// # Arguments
    /// * `image` - The input image.
    /// * `filter` - The blur and resampling primitives.
    /// * `cancel` - Checked before every octave.
    pub fn build_pyramid(
        &self,
        image: &GrayFloatImage,
        filter: &impl Filter,
        cancel: &CancellationToken,
    ) -> Result<Pyramid> {
        if image.is_empty() {
            return Err(SiftError::EmptyImage);
        }
        self.validate()?;
        let radii = self.level_radii();
        let build_octave = |index: usize| -> Result<Octave> {
            cancel.check()?;
            let size = self.octave_size(index);
            let resized = filter.resize(image, size, size);
            trace!("Octave {} resampled to {}x{}.", index, size, size);
            let levels = radii
                .iter()
                .map(|&sigma| ScaleLevel {
                    sigma,
                    image: filter.gaussian_blur(&resized, sigma as f32),
                })
                .collect();
            debug!(
                "Octave {}: {} levels with sigma {:.3} to {:.3}.",
                index,
                radii.len(),
                radii[0],
                radii[radii.len() - 1]
            );
            Ok(Octave { index, levels })
        };
        #[cfg(not(feature = "rayon"))]
        let octaves = (0..self.num_octaves)
            .map(build_octave)
            .collect::<Result<Vec<_>>>()?;
        #[cfg(feature = "rayon")]
        let octaves = (0..self.num_octaves)
            .into_par_iter()
            .map(build_octave)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pyramid { octaves })
    }
}
