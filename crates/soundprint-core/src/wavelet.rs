//! Haar wavelet decomposition of spectrogram images

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Normalization divisor of a decomposition step. Kept at 1 so coefficients
/// stay plain sums and differences.
const NORMALIZATION: f32 = 1.0;

/// Decomposes a single image in place, `image[row][column]`
pub trait WaveletDecomposition: Send + Sync {
    fn decompose_image(&self, image: &mut [Vec<f32>]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveletKind {
    /// Row-wise decomposition only
    HaarRows,
    /// Rows, then columns
    #[default]
    StandardHaar,
}

impl WaveletKind {
    pub fn decomposition(self) -> Box<dyn WaveletDecomposition> {
        match self {
            WaveletKind::HaarRows => Box::new(HaarRowsDecomposition),
            WaveletKind::StandardHaar => Box::new(StandardHaarDecomposition),
        }
    }
}

pub struct HaarRowsDecomposition;

impl WaveletDecomposition for HaarRowsDecomposition {
    fn decompose_image(&self, image: &mut [Vec<f32>]) {
        for row in image.iter_mut() {
            decompose_array(row);
        }
    }
}

pub struct StandardHaarDecomposition;

impl WaveletDecomposition for StandardHaarDecomposition {
    fn decompose_image(&self, image: &mut [Vec<f32>]) {
        for row in image.iter_mut() {
            decompose_array(row);
        }

        let columns = image.first().map_or(0, |row| row.len());
        let mut column = vec![0.0; image.len()];
        for c in 0..columns {
            for (value, row) in column.iter_mut().zip(image.iter()) {
                *value = row[c];
            }
            decompose_array(&mut column);
            for (value, row) in column.iter().zip(image.iter_mut()) {
                row[c] = *value;
            }
        }
    }
}

/// One step over the first `h` values: pairwise sums into the lower half,
/// pairwise differences into the upper half
pub fn decomposition_step(array: &mut [f32], h: usize) {
    let half = h / 2;
    let mut temp = vec![0.0; h];
    for i in 0..half {
        let j = 2 * i;
        temp[i] = (array[j] + array[j + 1]) / NORMALIZATION;
        temp[i + half] = (array[j] - array[j + 1]) / NORMALIZATION;
    }
    array[..h].copy_from_slice(&temp);
}

/// Full multilevel decomposition: repeat the step while the working length exceeds 1
pub fn decompose_array(array: &mut [f32]) {
    let mut h = array.len();
    while h > 1 {
        decomposition_step(array, h);
        h /= 2;
    }
}

/// Decompose every image in parallel
pub fn decompose_images(images: &mut [Vec<Vec<f32>>], decomposition: &dyn WaveletDecomposition) {
    images
        .par_iter_mut()
        .for_each(|image| decomposition.decompose_image(image));
}
