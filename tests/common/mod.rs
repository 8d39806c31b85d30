#![allow(dead_code)]

use std::{fs, io, path::Path};

use flate2::{Compression, write::GzEncoder};

use cifar100::dataset::cifar100::{ARCHIVE_NAME, CHANNELS, DATA_DIR, IMAGE_SIZE};

pub const IMAGE_LEN: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;

/// The pixel stored for image `i`, channel `c`, row `y`, column `x`.
pub fn pixel(i: usize, c: usize, y: usize, x: usize) -> u8 {
    ((i * 31 + c * 80 + y * 3 + x) % 256) as u8
}

/// Flat channel-first rows for `n` images, as they are stored in batch files.
pub fn image_rows(n: usize) -> Vec<u8> {
    let mut rows = Vec::with_capacity(n * IMAGE_LEN);
    for i in 0..n {
        for c in 0..CHANNELS {
            for y in 0..IMAGE_SIZE {
                for x in 0..IMAGE_SIZE {
                    rows.push(pixel(i, c, y, x));
                }
            }
        }
    }
    rows
}

fn binint(buf: &mut Vec<u8>, value: i32) {
    buf.push(b'J');
    buf.extend_from_slice(&value.to_le_bytes());
}

fn short_string(buf: &mut Vec<u8>, s: &str) {
    buf.push(b'U');
    buf.push(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
}

fn global(buf: &mut Vec<u8>, module: &str, name: &str) {
    buf.push(b'c');
    buf.extend_from_slice(format!("{module}\n{name}\n").as_bytes());
}

/// Pickles a batch dict the way Python 2 numpy wrote the published batches:
/// protocol 2, `data` as a `uint8` ndarray of shape `[n, 3072]` and
/// `fine_labels` as a list of ints.
pub fn batch_pickle(rows: &[u8], labels: &[i64]) -> Vec<u8> {
    let n = rows.len() / IMAGE_LEN;
    let mut buf = vec![0x80, 2, b'}', b'('];

    short_string(&mut buf, "data");
    global(&mut buf, "numpy.core.multiarray", "_reconstruct");
    global(&mut buf, "numpy", "ndarray");
    buf.extend_from_slice(&[b'K', 0, 0x85]);
    short_string(&mut buf, "b");
    buf.extend_from_slice(&[0x87, b'R', b'(']);
    buf.extend_from_slice(&[b'K', 1]);
    binint(&mut buf, n as i32);
    binint(&mut buf, IMAGE_LEN as i32);
    buf.push(0x86);
    global(&mut buf, "numpy", "dtype");
    short_string(&mut buf, "u1");
    buf.extend_from_slice(&[b'K', 0, b'K', 1, 0x87, b'R', b'(']);
    buf.extend_from_slice(&[b'K', 3]);
    short_string(&mut buf, "|");
    buf.extend_from_slice(b"NNN");
    binint(&mut buf, -1);
    binint(&mut buf, -1);
    buf.extend_from_slice(&[b'K', 0, b't', b'b', 0x89]);
    buf.push(b'T');
    buf.extend_from_slice(&(rows.len() as u32).to_le_bytes());
    buf.extend_from_slice(rows);
    buf.extend_from_slice(b"tb");

    short_string(&mut buf, "fine_labels");
    buf.extend_from_slice(b"](");
    for &label in labels {
        binint(&mut buf, label as i32);
    }
    buf.push(b'e');

    short_string(&mut buf, "coarse_labels");
    buf.extend_from_slice(b"](");
    for &label in labels {
        binint(&mut buf, (label / 5) as i32);
    }
    buf.push(b'e');

    buf.extend_from_slice(b"u.");
    buf
}

/// Labels `0, 1, 2...` wrapping at 100.
pub fn labels(n: usize) -> Vec<i64> {
    (0..n as i64).map(|i| i % 100).collect()
}

pub fn write_batch(path: &Path, rows: &[u8], labels: &[i64]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, batch_pickle(rows, labels))
}

/// Builds a `.tar.gz` holding each `(name, content)` under the extracted directory.
pub fn archive_bytes(files: &[(&str, Vec<u8>)]) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, format!("{DATA_DIR}/{name}"), content.as_slice())?;
    }

    builder.into_inner()?.finish()
}

/// An archive holding a `train` batch of `train` images and a `test` batch of
/// `test` images.
pub fn dataset_archive(train: usize, test: usize) -> io::Result<Vec<u8>> {
    archive_bytes(&[
        ("train", batch_pickle(&image_rows(train), &labels(train))),
        ("test", batch_pickle(&image_rows(test), &labels(test))),
    ])
}

pub fn write_archive(root: &Path, bytes: &[u8]) -> io::Result<()> {
    fs::create_dir_all(root)?;
    fs::write(root.join(ARCHIVE_NAME), bytes)
}
