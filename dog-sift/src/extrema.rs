use crate::{CancellationToken, DogStack, Result, Sift, SiftError};
use log::*;
use ndarray::s;
use std::str::FromStr;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Which side of its neighbourhood a scale space extremum lies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Extremum {
    Maximum,
    Minimum,
}

impl Extremum {
    /// Whether `value` beats `neighbor` for this kind of extremum.
    #[inline]
    pub fn dominates(self, value: f32, neighbor: f32) -> bool {
        match self {
            Extremum::Maximum => value > neighbor,
            Extremum::Minimum => value < neighbor,
        }
    }
}

impl FromStr for Extremum {
    type Err = SiftError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "max" | "maximum" => Ok(Extremum::Maximum),
            "min" | "minimum" => Ok(Extremum::Minimum),
            other => Err(SiftError::UnknownExtremum(other.to_owned())),
        }
    }
}

/// A discrete scale space position that is a strict local extremum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KeypointCandidate {
    pub octave: usize,
    pub scale: usize,
    pub row: usize,
    pub col: usize,
    pub kind: Extremum,
}

/// Whether the sample at `(scale, row, col)` is strictly above (or below) all
/// 26 neighbours of its 3x3x3 block.
///
/// The position must not lie on the border of the stack.
pub fn is_extremum(dog: &DogStack, scale: usize, row: usize, col: usize, kind: Extremum) -> bool {
    let value = dog.get(scale, row, col);
    dog.data
        .slice(s![scale - 1..=scale + 1, row - 1..=row + 1, col - 1..=col + 1])
        .indexed_iter()
        .all(|(offset, &neighbor)| offset == (1, 1, 1) || kind.dominates(value, neighbor))
}

/// Scan every interior position of a stack for maxima and minima.
///
/// Candidates come out in scan order: scale, then row, then column. A
/// position is listed once per kind it passes.
pub fn find_extrema(dog: &DogStack) -> Vec<KeypointCandidate> {
    let (scales, height, width) = dog.data.dim();
    let mut candidates = vec![];
    if scales < 3 || height < 3 || width < 3 {
        return candidates;
    }
    for scale in 1..scales - 1 {
        for row in 1..height - 1 {
            for col in 1..width - 1 {
                for kind in [Extremum::Maximum, Extremum::Minimum] {
                    if is_extremum(dog, scale, row, col, kind) {
                        candidates.push(KeypointCandidate {
                            octave: dog.octave,
                            scale,
                            row,
                            col,
                            kind,
                        });
                    }
                }
            }
        }
    }
    candidates
}

impl Sift {
    /// Find the discrete extrema of every octave.
    ///
    /// # Arguments
    /// * `dogs` - The Difference-of-Gaussians stacks, in octave order.
    /// * `cancel` - Checked before every octave.
    pub fn find_scale_space_extrema(
        &self,
        dogs: &[DogStack],
        cancel: &CancellationToken,
    ) -> Result<Vec<KeypointCandidate>> {
        let scan = |dog: &DogStack| -> Result<Vec<KeypointCandidate>> {
            cancel.check()?;
            let found = find_extrema(dog);
            trace!("Octave {}: {} extrema.", dog.octave, found.len());
            Ok(found)
        };
        #[cfg(not(feature = "rayon"))]
        let per_octave = dogs.iter().map(scan).collect::<Result<Vec<_>>>()?;
        #[cfg(feature = "rayon")]
        let per_octave = dogs.par_iter().map(scan).collect::<Result<Vec<_>>>()?;
        let extrema: Vec<KeypointCandidate> = per_octave.into_iter().flatten().collect();
        debug!("Extracted {} scale space extrema.", extrema.len());
        Ok(extrema)
    }

    /// Drop candidates whose raw response is too weak to be worth refining.
    pub fn discard_low_initial_contrast(
        &self,
        dogs: &[DogStack],
        candidates: &[KeypointCandidate],
    ) -> Vec<KeypointCandidate> {
        let gate = self.initial_contrast_ratio * self.contrast_threshold;
        let kept: Vec<KeypointCandidate> = candidates
            .iter()
            .filter(|c| f64::from(dogs[c.octave].get(c.scale, c.row, c.col)).abs() >= gate)
            .copied()
            .collect();
        debug!(
            "{}/{} remain after the initial contrast gate.",
            kept.len(),
            candidates.len()
        );
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn stack(data: Array3<f32>) -> DogStack {
        DogStack { octave: 0, data }
    }

    fn assert_strict(dog: &DogStack, c: &KeypointCandidate) {
        let value = dog.get(c.scale, c.row, c.col);
        for ds in 0..3 {
            for dr in 0..3 {
                for dc in 0..3 {
                    if (ds, dr, dc) == (1, 1, 1) {
                        continue;
                    }
                    let neighbor = dog.get(c.scale + ds - 1, c.row + dr - 1, c.col + dc - 1);
                    match c.kind {
                        Extremum::Maximum => assert!(value > neighbor),
                        Extremum::Minimum => assert!(value < neighbor),
                    }
                }
            }
        }
    }

    #[test]
    fn finds_an_isolated_peak_and_pit() {
        let mut data = Array3::zeros((4, 9, 9));
        data[(1, 3, 3)] = 1.0;
        data[(2, 6, 5)] = -1.0;
        let dog = stack(data);
        let found = find_extrema(&dog);
        assert_eq!(
            found,
            vec![
                KeypointCandidate {
                    octave: 0,
                    scale: 1,
                    row: 3,
                    col: 3,
                    kind: Extremum::Maximum
                },
                KeypointCandidate {
                    octave: 0,
                    scale: 2,
                    row: 6,
                    col: 5,
                    kind: Extremum::Minimum
                },
            ]
        );
        for c in &found {
            assert_strict(&dog, c);
        }
    }

    #[test]
    fn borders_are_never_reported() {
        let mut data = Array3::zeros((4, 6, 6));
        data[(0, 3, 3)] = 5.0;
        data[(3, 2, 2)] = 5.0;
        data[(1, 0, 2)] = 5.0;
        data[(2, 3, 5)] = -5.0;
        assert!(find_extrema(&stack(data)).is_empty());
    }

    #[test]
    fn ties_are_not_extrema() {
        let mut data = Array3::zeros((3, 5, 5));
        data[(1, 2, 2)] = 1.0;
        data[(1, 2, 3)] = 1.0;
        assert!(find_extrema(&stack(data)).is_empty());
        let flat = Array3::from_elem((4, 8, 8), 0.25);
        assert!(find_extrema(&stack(flat)).is_empty());
    }

    #[test]
    fn every_reported_position_is_strict() {
        let data = Array3::from_shape_fn((5, 12, 12), |(s, r, c)| {
            ((s * 31 + r * 17 + c * 7) % 13) as f32 - 6.0
        });
        let dog = stack(data);
        for c in find_extrema(&dog) {
            assert_strict(&dog, &c);
        }
    }

    #[test]
    fn kinds_parse_from_text() {
        assert_eq!("max".parse::<Extremum>().unwrap(), Extremum::Maximum);
        assert_eq!("minimum".parse::<Extremum>().unwrap(), Extremum::Minimum);
        assert!(matches!(
            "saddle".parse::<Extremum>(),
            Err(SiftError::UnknownExtremum(kind)) if kind == "saddle"
        ));
    }

    #[test]
    fn weak_extrema_are_gated_by_magnitude() {
        let mut data = Array3::zeros((4, 7, 7));
        data[(1, 2, 2)] = 0.5;
        data[(1, 4, 4)] = -0.5;
        data[(2, 2, 4)] = 0.005;
        let dogs = vec![stack(data)];
        let sift = Sift::default();
        let found = find_extrema(&dogs[0]);
        assert_eq!(found.len(), 3);
        let kept = sift.discard_low_initial_contrast(&dogs, &found);
        assert_eq!(kept.len(), 2);
        assert!(kept.iter().any(|c| c.kind == Extremum::Minimum));
    }
}
