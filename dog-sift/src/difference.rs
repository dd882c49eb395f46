use crate::image::difference;
use crate::{Octave, Pyramid};
use ndarray::{Array3, ArrayView2, Axis};

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// The Difference-of-Gaussians images of one octave.
///
/// Stored as a dense `(scale, row, col)` array; `scale` `i` holds
/// `level[i + 1] - level[i]` of the octave.
#[derive(Debug, Clone)]
pub struct DogStack {
    pub octave: usize,
    pub data: Array3<f32>,
}

impl DogStack {
    /// Subtract adjacent levels of `octave`.
    ///
    /// Panics if the octave has fewer than two levels.
    pub fn from_octave(octave: &Octave) -> Self {
        assert!(
            octave.len() >= 2,
            "octave {} has {} levels, at least two are needed",
            octave.index,
            octave.len()
        );
        let mut data = Array3::zeros((octave.len() - 1, octave.height(), octave.width()));
        for (mut out, pair) in data.outer_iter_mut().zip(octave.levels.windows(2)) {
            out.assign(&difference(&pair[1].image, &pair[0].image));
        }
        Self {
            octave: octave.index,
            data,
        }
    }

    /// Number of difference images.
    pub fn len(&self) -> usize {
        self.data.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn height(&self) -> usize {
        self.data.len_of(Axis(1))
    }

    pub fn width(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    #[inline]
    pub fn get(&self, scale: usize, row: usize, col: usize) -> f32 {
        self.data[(scale, row, col)]
    }

    pub fn level(&self, scale: usize) -> ArrayView2<f32> {
        self.data.index_axis(Axis(0), scale)
    }
}

/// Produce the Difference-of-Gaussians stack of every octave, in octave order.
pub fn difference_of_gaussians(pyramid: &Pyramid) -> Vec<DogStack> {
    #[cfg(not(feature = "rayon"))]
    let stacks = pyramid.octaves.iter().map(DogStack::from_octave).collect();
    #[cfg(feature = "rayon")]
    let stacks = pyramid.octaves.par_iter().map(DogStack::from_octave).collect();
    stacks
}
