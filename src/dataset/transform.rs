//! Per-image preprocessing and augmentation on `[height, width, channels]` arrays.

use ndarray::{Array3, ArrayView3, Axis, ErrorKind, ShapeError, s};
use rand::Rng;
use rand_distr::{Bernoulli, Distribution, Uniform};

use crate::Result;

/// Converts raw pixels to floats, keeping their `[0, 255]` range.
pub fn to_float(image: ArrayView3<'_, u8>) -> Array3<f32> {
    image.mapv(f32::from)
}

/// Center crops and/or zero pads `image` to `height` x `width`.
///
/// Each spatial axis is handled on its own: a larger axis is cropped around its
/// center, a smaller one is padded evenly on both sides, the odd leftover pixel
/// going to the far side.
pub fn resize_with_crop_or_pad(
    image: ArrayView3<'_, f32>,
    height: usize,
    width: usize,
) -> Array3<f32> {
    let (h, w, channels) = image.dim();
    let (src_y, dst_y, rows) = window(h, height);
    let (src_x, dst_x, cols) = window(w, width);

    let mut resized = Array3::zeros((height, width, channels));
    resized
        .slice_mut(s![dst_y..dst_y + rows, dst_x..dst_x + cols, ..])
        .assign(&image.slice(s![src_y..src_y + rows, src_x..src_x + cols, ..]));
    resized
}

/// Returns the source offset, destination offset and length of the kept span.
fn window(size: usize, target: usize) -> (usize, usize, usize) {
    let kept = size.min(target);
    ((size - kept) / 2, (target - kept) / 2, kept)
}

/// Takes a `height` x `width` window at a uniformly random position.
///
/// # Arguments
/// * `image` - The image to crop.
/// * `height` - The window height.
/// * `width` - The window width.
/// * `rng` - A random number generator.
///
/// # Returns
/// The cropped image, or an error if the window doesn't fit in `image`.
pub fn random_crop<R: Rng + ?Sized>(
    image: ArrayView3<'_, f32>,
    height: usize,
    width: usize,
    rng: &mut R,
) -> Result<Array3<f32>> {
    let (h, w, _) = image.dim();
    if height > h || width > w {
        return Err(ShapeError::from_kind(ErrorKind::IncompatibleShape).into());
    }

    let top = Uniform::new_inclusive(0, h - height)?.sample(rng);
    let left = Uniform::new_inclusive(0, w - width)?.sample(rng);

    Ok(image
        .slice(s![top..top + height, left..left + width, ..])
        .to_owned())
}

/// Mirrors `image` horizontally with probability one half.
pub fn random_flip_left_right<R: Rng + ?Sized>(
    image: Array3<f32>,
    rng: &mut R,
) -> Result<Array3<f32>> {
    if Bernoulli::new(0.5)?.sample(rng) {
        Ok(flip_left_right(image))
    } else {
        Ok(image)
    }
}

pub fn flip_left_right(mut image: Array3<f32>) -> Array3<f32> {
    image.invert_axis(Axis(1));
    image
}

/// Scales `image` to zero mean and unit variance over all of its values.
///
/// The standard deviation is floored at `1 / sqrt(n)` so uniform images don't
/// divide by zero.
pub fn per_image_standardization(mut image: Array3<f32>) -> Array3<f32> {
    let n = image.len();
    if n == 0 {
        return image;
    }

    let (sum, sum_sq) = image.iter().fold((0f64, 0f64), |(sum, sum_sq), &x| {
        let x = f64::from(x);
        (sum + x, sum_sq + x * x)
    });
    let mean = sum / n as f64;
    let variance = (sum_sq / n as f64 - mean * mean).max(0.0);
    let stddev = variance.sqrt().max(1.0 / (n as f64).sqrt());

    image.mapv_inplace(|x| ((f64::from(x) - mean) / stddev) as f32);
    image
}
