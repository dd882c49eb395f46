use derive_more::{Deref, DerefMut};
use image::{imageops, DynamicImage, ImageBuffer, Luma};
use log::*;
use ndarray::{azip, Array2, ArrayView2};
use nshare::RefNdarray2;
use std::f32;
use wide::f32x4;

pub type GrayImageBuffer = ImageBuffer<Luma<f32>, Vec<f32>>;

/// The image type used throughout the detector.
///
/// A thin wrapper around the `image` crate's single channel `f32` buffer
/// with samples between 0 and 1. Pixel access goes through the buffer for
/// loading and resizing and through `ndarray` views for the numeric work,
/// where rows come first: a view has shape `(height, width)`.
#[derive(Debug, Clone, Deref, DerefMut)]
pub struct GrayFloatImage(pub GrayImageBuffer);

impl GrayFloatImage {
    /// Create a unit float image from the image crate's DynamicImage type.
    ///
    /// Color images are converted to luma first.
    pub fn from_dynamic(input_image: &DynamicImage) -> Self {
        info!(
            "Loaded a {} x {} image",
            input_image.width(),
            input_image.height()
        );
        Self(input_image.to_luma32f())
    }

    /// Build an image from a row-major array of shape `(height, width)`.
    pub fn from_array2(arr: Array2<f32>) -> Self {
        let (height, width) = arr.dim();
        let arr = if arr.is_standard_layout() {
            arr
        } else {
            arr.as_standard_layout().into_owned()
        };
        Self(
            ImageBuffer::from_raw(width as u32, height as u32, arr.into_raw_vec())
                .expect("raw vector didn't have enough pixels for the image"),
        )
    }

    /// Build an image by evaluating `f(row, col)` at every sample.
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        Self(ImageBuffer::from_fn(width as u32, height as u32, |x, y| {
            Luma([f(y as usize, x as usize)])
        }))
    }

    pub fn ref_array2(&self) -> ArrayView2<f32> {
        self.0.ref_ndarray2()
    }

    pub fn width(&self) -> usize {
        self.0.width() as usize
    }

    pub fn height(&self) -> usize {
        self.0.height() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// A constant image.
    pub fn new(width: usize, height: usize, value: f32) -> Self {
        Self(ImageBuffer::from_pixel(
            width as u32,
            height as u32,
            Luma([value]),
        ))
    }

    /// Sample at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.get_pixel(col as u32, row as u32)[0]
    }
}

/// The smoothing and resampling primitives the scale space is built from.
///
/// The detector treats both as black boxes: pure functions of their inputs.
pub trait Filter: Sync {
    /// Blur `image` with a Gaussian of standard deviation `sigma`.
    fn gaussian_blur(&self, image: &GrayFloatImage, sigma: f32) -> GrayFloatImage;

    /// Resample `image` to `width` x `height` with bilinear interpolation.
    fn resize(&self, image: &GrayFloatImage, width: usize, height: usize) -> GrayFloatImage;
}

/// Separable SIMD Gaussian blur and the `image` crate's triangle resampler.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFilter;

impl Filter for DefaultFilter {
    fn gaussian_blur(&self, image: &GrayFloatImage, sigma: f32) -> GrayFloatImage {
        gaussian_blur(image, sigma)
    }

    fn resize(&self, image: &GrayFloatImage, width: usize, height: usize) -> GrayFloatImage {
        resize_bilinear(image, width, height)
    }
}

/// Resample with a triangle (bilinear) filter. Same-size requests return a copy.
pub fn resize_bilinear(image: &GrayFloatImage, width: usize, height: usize) -> GrayFloatImage {
    if image.width() == width && image.height() == height {
        return image.clone();
    }
    GrayFloatImage(imageops::resize(
        &image.0,
        width as u32,
        height as u32,
        imageops::FilterType::Triangle,
    ))
}

/// Kernel padded with zeros to a multiple of the SIMD lane count.
fn simd_kernel(kernel: &[f32]) -> Vec<f32x4> {
    kernel
        .chunks(4)
        .map(|chunk| {
            let mut lanes = [0.0; 4];
            lanes[..chunk.len()].copy_from_slice(chunk);
            f32x4::new(lanes)
        })
        .collect()
}

#[inline]
fn simd_dot(window: &[f32], kernel: &[f32x4]) -> f32 {
    window
        .chunks_exact(4)
        .map(|chunk| f32x4::new([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .zip(kernel.iter())
        .fold(f32x4::splat(0.), |acc, (a, b)| a.mul_add(*b, acc))
        .reduce_add()
}

/// Convolve every row with `kernel`, replicating the edge samples.
pub fn horizontal_filter(image: &GrayImageBuffer, kernel: &[f32]) -> GrayImageBuffer {
    let kernel_size = kernel.len();
    debug_assert!(kernel_size % 2 == 1);
    let half = kernel_size / 2;
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut output = vec![0.0; width * height];
    let kernel_simd = simd_kernel(kernel);
    let window = 4 * kernel_simd.len();
    let extra = window - kernel_size;
    let mut scratch = vec![0f32; width + half * 2 + extra];
    for (row_in, row_out) in image
        .as_raw()
        .chunks_exact(width)
        .zip(output.chunks_exact_mut(width))
    {
        scratch[..half].fill(row_in[0]);
        scratch[half..half + width].copy_from_slice(row_in);
        scratch[half + width..2 * half + width].fill(row_in[width - 1]);
        scratch[2 * half + width..].fill(0.);
        for (samples, out) in scratch.windows(window).zip(row_out) {
            *out = simd_dot(samples, &kernel_simd);
        }
    }
    GrayImageBuffer::from_raw(width as u32, height as u32, output)
        .expect("output has width * height samples")
}

/// Convolve every column with `kernel`, replicating the edge samples.
pub fn vertical_filter(image: &GrayImageBuffer, kernel: &[f32]) -> GrayImageBuffer {
    let kernel_size = kernel.len();
    debug_assert!(kernel_size % 2 == 1);
    let half = kernel_size / 2;
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut output = vec![0.0; width * height];
    let kernel_simd = simd_kernel(kernel);
    let window = 4 * kernel_simd.len();
    let extra = window - kernel_size;
    // Columns are gathered into a contiguous strip a cache line wide.
    const STRIP: usize = 16;
    let column_len = height + half * 2 + extra;
    let mut scratch = vec![0f32; STRIP * column_len];
    let raw = image.as_raw();
    for x_s in (0..width).step_by(STRIP) {
        let x_e = (x_s + STRIP).min(width);
        for (dx, column) in scratch.chunks_exact_mut(column_len).take(x_e - x_s).enumerate() {
            let x = x_s + dx;
            column[..half].fill(raw[x]);
            for y in 0..height {
                column[half + y] = raw[y * width + x];
            }
            column[half + height..2 * half + height].fill(raw[(height - 1) * width + x]);
            column[2 * half + height..].fill(0.);
        }
        for (dx, column) in scratch.chunks_exact(column_len).take(x_e - x_s).enumerate() {
            for (y, samples) in column.windows(window).take(height).enumerate() {
                output[y * width + x_s + dx] = simd_dot(samples, &kernel_simd);
            }
        }
    }
    GrayImageBuffer::from_raw(width as u32, height as u32, output)
        .expect("output has width * height samples")
}

pub fn separable_filter(
    image: &GrayImageBuffer,
    h_kernel: &[f32],
    v_kernel: &[f32],
) -> GrayImageBuffer {
    let h = horizontal_filter(image, h_kernel);
    vertical_filter(&h, v_kernel)
}

/// The Gaussian function.
///
/// # Arguments
/// * `x` - the offset.
/// * `r` - sigma.
fn gaussian(x: f32, r: f32) -> f32 {
    ((2.0 * f32::consts::PI).sqrt() * r).recip() * (-x.powi(2) / (2.0 * r.powi(2))).exp()
}

/// Generate a normalized Gaussian kernel.
///
/// # Arguments
/// * `r` - sigma.
/// * `kernel_size` - The size of the kernel, must be odd.
pub fn gaussian_kernel(r: f32, kernel_size: usize) -> Vec<f32> {
    assert!(kernel_size % 2 == 1, "kernel_size must be odd");
    let half_width = (kernel_size / 2) as i32;
    let mut kernel: Vec<f32> = (-half_width..=half_width)
        .map(|i| gaussian(i as f32, r))
        .collect();
    let sum: f32 = kernel.iter().sum();
    for val in kernel.iter_mut() {
        *val /= sum;
    }
    kernel
}

/// Perform Gaussian blur on an image.
///
/// The kernel is truncated at three standard deviations.
pub fn gaussian_blur(image: &GrayFloatImage, r: f32) -> GrayFloatImage {
    assert!(r > 0.0, "sigma must be > 0.0");
    let kernel_radius = (3.0 * r).ceil() as usize;
    let kernel = gaussian_kernel(r, kernel_radius * 2 + 1);
    GrayFloatImage(separable_filter(image, &kernel, &kernel))
}

/// The 5x5 "smooth more" kernel, weights sum to 100.
#[rustfmt::skip]
const SMOOTH_MORE: [[f32; 5]; 5] = [
    [1., 1.,  1., 1., 1.],
    [1., 5.,  5., 5., 1.],
    [1., 5., 44., 5., 1.],
    [1., 5.,  5., 5., 1.],
    [1., 1.,  1., 1., 1.],
];

/// Apply the non-separable 5x5 smoothing kernel with replicated edges.
pub fn smooth_more(image: &GrayFloatImage) -> GrayFloatImage {
    let (height, width) = (image.height(), image.width());
    let input = image.ref_array2();
    let mut padded = Array2::<f32>::zeros((height + 4, width + 4));
    for ((row, col), out) in padded.indexed_iter_mut() {
        let r = row.saturating_sub(2).min(height - 1);
        let c = col.saturating_sub(2).min(width - 1);
        *out = input[(r, c)];
    }
    let mut output = Array2::<f32>::zeros((height, width));
    azip!((out in &mut output, window in padded.windows((5, 5))) {
        let mut acc = 0.0;
        for (weights, samples) in SMOOTH_MORE.iter().zip(window.outer_iter()) {
            for (w, v) in weights.iter().zip(samples.iter()) {
                acc += w * v;
            }
        }
        *out = acc / 100.0;
    });
    GrayFloatImage::from_array2(output)
}

/// `a - b`, sample by sample.
pub fn difference(a: &GrayFloatImage, b: &GrayFloatImage) -> Array2<f32> {
    assert_eq!(a.width(), b.width());
    assert_eq!(a.height(), b.height());
    &a.ref_array2() - &b.ref_array2()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize) -> GrayFloatImage {
        GrayFloatImage::from_fn(width, height, |row, col| {
            ((row * 7 + col * 13) % 31) as f32 / 31.0
        })
    }

    #[test]
    fn gaussian_kernel_correct() {
        // test against known correct kernel
        let kernel = gaussian_kernel(3.0, 7);
        let known_correct_kernel = vec![
            0.1062_8852,
            0.1403_2133,
            0.1657_7007,
            0.1752_4014,
            0.1657_7007,
            0.1403_2133,
            0.1062_8852,
        ];
        for (i, j) in kernel.iter().zip(known_correct_kernel.iter()) {
            assert!(f32::abs(*i - *j) < 0.0001);
        }
    }

    #[test]
    fn horizontal_filter_matches_imageproc() {
        let image = ramp(45, 23);
        let kernel = gaussian_kernel(3.0, 7);
        let filtered_ours = super::horizontal_filter(&image.0, &kernel);
        let filtered_imageproc = imageproc::filter::horizontal_filter(&image.0, &kernel);
        imageproc::assert_pixels_eq_within!(filtered_ours, filtered_imageproc, 0.0001);
    }

    #[test]
    fn vertical_filter_matches_imageproc() {
        let image = ramp(37, 29);
        let kernel = gaussian_kernel(3.0, 7);
        let filtered_ours = super::vertical_filter(&image.0, &kernel);
        let filtered_imageproc = imageproc::filter::vertical_filter(&image.0, &kernel);
        imageproc::assert_pixels_eq_within!(filtered_ours, filtered_imageproc, 0.0001);
    }

    #[test]
    fn blur_keeps_flat_images_flat() {
        let image = GrayFloatImage::new(40, 30, 0.25);
        let blurred = gaussian_blur(&image, 4.5);
        for &v in blurred.ref_array2().iter() {
            assert!((v - 0.25).abs() < 1e-5);
        }
    }

    #[test]
    fn same_size_resize_is_a_copy() {
        let image = ramp(16, 16);
        let resized = resize_bilinear(&image, 16, 16);
        assert_eq!(resized.ref_array2(), image.ref_array2());
        let half = resize_bilinear(&image, 8, 4);
        assert_eq!((half.width(), half.height()), (8, 4));
    }

    #[test]
    fn smooth_more_preserves_constants_and_spreads_impulses() {
        let flat = smooth_more(&GrayFloatImage::new(9, 9, 0.5));
        for &v in flat.ref_array2().iter() {
            assert!((v - 0.5).abs() < 1e-6);
        }
        let impulse = GrayFloatImage::from_fn(9, 9, |r, c| if (r, c) == (4, 4) { 1.0 } else { 0.0 });
        let smoothed = smooth_more(&impulse);
        assert!((smoothed.get(4, 4) - 0.44).abs() < 1e-6);
        assert!((smoothed.get(3, 4) - 0.05).abs() < 1e-6);
        assert!((smoothed.get(2, 2) - 0.01).abs() < 1e-6);
        assert_eq!(smoothed.get(0, 0), 0.0);
    }

    #[test]
    fn difference_is_row_major() {
        let a = GrayFloatImage::from_fn(3, 2, |r, c| (r * 3 + c) as f32);
        let b = GrayFloatImage::new(3, 2, 1.0);
        let d = difference(&a, &b);
        assert_eq!(d.dim(), (2, 3));
        assert_eq!(d[(1, 2)], 4.0);
        assert_eq!(a.get(1, 2), 5.0);
    }
}
