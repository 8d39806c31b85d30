//! Reading pickled CIFAR batch files into image and label arrays.

use std::{fs, path::Path};

use log::info;
use ndarray::{Array1, Array4, ArrayView4, Axis, concatenate};

use crate::{
    DatasetErr, Result,
    pickle::{self, Value, numpy::NdArray},
};

const DATA: &str = "data";
const LABELS: &str = "fine_labels";

/// Reads one batch file.
///
/// # Arguments
/// * `path` - The pickled batch.
/// * `image_size` - The images' height and width.
/// * `channels` - The number of color planes.
///
/// # Returns
/// Images as `[n, image_size, image_size, channels]` and their `n` labels.
pub fn read_batch(
    path: &Path,
    image_size: usize,
    channels: usize,
) -> Result<(Array4<u8>, Array1<i64>)> {
    let buf = fs::read(path)?;
    let mut batch = pickle::from_slice(&buf)?;
    drop(buf);

    let data = batch.take(DATA).ok_or_else(|| DatasetErr::MissingField {
        path: path.to_path_buf(),
        field: DATA,
    })?;
    let labels = batch.take(LABELS).ok_or_else(|| DatasetErr::MissingField {
        path: path.to_path_buf(),
        field: LABELS,
    })?;

    let images = NdArray::from_value(data)
        .and_then(NdArray::into_u8)
        .map_err(|e| invalid(path, DATA, e.to_string()))?;
    let Some(&num) = images.shape().first() else {
        return Err(invalid(path, DATA, "array has no dimensions".to_string()));
    };

    // stored channel-first, one flat row per image
    let images = images
        .into_shape_with_order((num, channels, image_size, image_size))?
        .permuted_axes([0, 2, 3, 1]);

    let labels = parse_labels(labels).map_err(|reason| invalid(path, LABELS, reason))?;
    if labels.len() != num {
        return Err(DatasetErr::LengthMismatch {
            path: path.to_path_buf(),
            images: num,
            labels: labels.len(),
        });
    }

    info!("loaded {num} examples from {}", path.display());
    Ok((images, Array1::from(labels)))
}

/// Reads several batch files and concatenates them along the example axis.
///
/// Any failing batch fails the whole read.
pub fn read_batches<I, P>(
    paths: I,
    image_size: usize,
    channels: usize,
) -> Result<(Array4<u8>, Array1<i64>)>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let (images, labels): (Vec<_>, Vec<_>) = paths
        .into_iter()
        .map(|path| read_batch(path.as_ref(), image_size, channels))
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .unzip();

    let image_views: Vec<ArrayView4<u8>> = images.iter().map(|a| a.view()).collect();
    let label_views: Vec<_> = labels.iter().map(|a| a.view()).collect();

    Ok((
        concatenate(Axis(0), &image_views)?,
        concatenate(Axis(0), &label_views)?,
    ))
}

/// Labels are a plain list of ints in the published batches, integer arrays are
/// accepted as well.
fn parse_labels(value: Value) -> std::result::Result<Vec<i64>, String> {
    match value {
        Value::List(items) | Value::Tuple(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                item.as_int()
                    .ok_or_else(|| format!("label {i} is a {}", item.kind()))
            })
            .collect(),
        value @ Value::Object { .. } => {
            let labels = NdArray::from_value(value)
                .and_then(NdArray::into_i64)
                .map_err(|e| e.to_string())?;
            Ok(labels.iter().copied().collect())
        }
        other => Err(format!("expected a list, got a {}", other.kind())),
    }
}

fn invalid(path: &Path, field: &'static str, reason: String) -> DatasetErr {
    DatasetErr::InvalidField {
        path: path.to_path_buf(),
        field,
        reason,
    }
}
