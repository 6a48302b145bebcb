//! Reader and downloader for the MNIST handwritten digits in IDX format.

use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};

use byteorder::{BigEndian, ReadBytesExt};
use flate2::read::GzDecoder;
use log::{info, warn};

use super::ImageDataset;
use crate::{MlErr, Result};

pub const IMAGE_SIZE: usize = 28 * 28;
pub const NUM_CLASSES: usize = 10;

const IMAGES_MAGIC: u32 = 2051;
const LABELS_MAGIC: u32 = 2049;

/// Tried in order until one serves the file.
const MIRRORS: [&str; 2] = [
    "https://ossci-datasets.s3.amazonaws.com/mnist/",
    "https://storage.googleapis.com/cvdf-datasets/mnist/",
];

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

fn file_names(train: bool) -> (&'static str, &'static str) {
    if train {
        ("train-images-idx3-ubyte", "train-labels-idx1-ubyte")
    } else {
        ("t10k-images-idx3-ubyte", "t10k-labels-idx1-ubyte")
    }
}

/// Loads the training or test split stored under `root`, either raw or gzipped.
///
/// # Returns
/// An error if a file is missing, a magic number is wrong or the image and label counts differ.
pub fn load(root: &Path, train: bool) -> Result<ImageDataset> {
    let (images_name, labels_name) = file_names(train);

    let mut reader = open(root, images_name)?;
    expect_magic(&mut reader, IMAGES_MAGIC, images_name)?;
    let count = reader.read_u32::<BigEndian>()? as usize;
    let rows = reader.read_u32::<BigEndian>()? as usize;
    let cols = reader.read_u32::<BigEndian>()? as usize;

    let image_size = rows
        .checked_mul(cols)
        .ok_or_else(|| MlErr::Dataset(format!("{images_name} has {rows}x{cols} images")))?;
    let total = count.checked_mul(image_size).ok_or_else(|| {
        MlErr::Dataset(format!("{images_name} declares {count} images of {image_size} pixels"))
    })?;

    let pixels = read_body(&mut reader, total, images_name)?;
    let images = pixels.iter().map(|&px| f32::from(px) / 255.).collect();

    let mut reader = open(root, labels_name)?;
    expect_magic(&mut reader, LABELS_MAGIC, labels_name)?;
    let label_count = reader.read_u32::<BigEndian>()? as usize;
    if label_count != count {
        return Err(MlErr::Dataset(format!(
            "{images_name} holds {count} images but {labels_name} holds {label_count} labels"
        )));
    }

    let labels = read_body(&mut reader, label_count, labels_name)?;

    ImageDataset::new(images, labels, image_size, NUM_CLASSES)
}

/// Returns whether every file of the split is already present under `root`.
pub fn is_present(root: &Path, train: bool) -> bool {
    let (images, labels) = file_names(train);
    [images, labels].iter().all(|name| find(root, name).is_some())
}

/// Downloads the missing files of the split into `root`.
///
/// Each file is written to a temporary path and renamed once complete, so an interrupted
/// download never leaves a truncated file behind.
pub async fn download(root: &Path, train: bool) -> Result<()> {
    tokio::fs::create_dir_all(root).await?;

    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| MlErr::Download {
            file: root.display().to_string(),
            detail: e.to_string(),
        })?;

    let (images, labels) = file_names(train);
    for name in [images, labels] {
        if find(root, name).is_some() {
            info!(file = name; "already present, skipping download");
            continue;
        }

        let file = format!("{name}.gz");
        let bytes = fetch(&client, &file).await?;

        let dest = root.join(&file);
        let tmp = root.join(format!("{file}.part"));
        if let Err(e) = tokio::fs::write(&tmp, &bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &dest).await?;

        info!(file = file.as_str(), bytes = bytes.len(); "downloaded");
    }

    Ok(())
}

async fn fetch(client: &reqwest::Client, file: &str) -> Result<Vec<u8>> {
    let mut detail = String::from("no mirror available");

    for mirror in MIRRORS {
        let url = format!("{mirror}{file}");
        let response = client
            .get(&url)
            .send()
            .await
            .and_then(|response| response.error_for_status());

        let body = match response {
            Ok(response) => response.bytes().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(bytes) => return Ok(bytes.to_vec()),
            Err(e) => {
                warn!(url = url.as_str(); "download failed: {e}");
                detail = e.to_string();
            }
        }
    }

    Err(MlErr::Download {
        file: file.to_string(),
        detail,
    })
}

fn find(root: &Path, name: &str) -> Option<PathBuf> {
    [root.join(format!("{name}.gz")), root.join(name)]
        .into_iter()
        .find(|path| path.is_file())
}

fn open(root: &Path, name: &str) -> Result<Box<dyn Read>> {
    let path = find(root, name).ok_or_else(|| {
        MlErr::Dataset(format!("{name} not found in {}", root.display()))
    })?;

    let file = BufReader::new(File::open(&path)?);
    let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
        Box::new(GzDecoder::new(file))
    } else {
        Box::new(file)
    };

    Ok(reader)
}

/// Reads exactly `len` bytes, allocating no more than the file actually holds.
fn read_body(reader: &mut impl Read, len: usize, name: &str) -> Result<Vec<u8>> {
    let mut body = Vec::new();
    reader.by_ref().take(len as u64).read_to_end(&mut body)?;

    if body.len() != len {
        return Err(MlErr::Dataset(format!(
            "{name} is truncated, expected {len} bytes of data, found {}",
            body.len()
        )));
    }

    Ok(body)
}

fn expect_magic(reader: &mut impl Read, expected: u32, name: &str) -> Result<()> {
    let magic = reader.read_u32::<BigEndian>()?;
    if magic != expected {
        return Err(MlErr::Dataset(format!(
            "{name} has magic number {magic}, expected {expected}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use byteorder::WriteBytesExt;
    use flate2::{Compression, write::GzEncoder};

    use super::*;

    fn write_idx(path: &Path, header: &[u32], body: &[u8], gzip: bool) {
        let mut raw = Vec::new();
        for value in header {
            raw.write_u32::<BigEndian>(*value).unwrap();
        }
        raw.extend_from_slice(body);

        if gzip {
            let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::fast());
            encoder.write_all(&raw).unwrap();
            encoder.finish().unwrap();
        } else {
            std::fs::write(path, raw).unwrap();
        }
    }

    #[test]
    fn loads_gzipped_and_raw_files() {
        let dir = tempfile::tempdir().unwrap();
        let pixels: Vec<u8> = (0..8).map(|v| v * 30).collect();

        write_idx(
            &dir.path().join("t10k-images-idx3-ubyte.gz"),
            &[IMAGES_MAGIC, 2, 2, 2],
            &pixels,
            true,
        );
        write_idx(
            &dir.path().join("t10k-labels-idx1-ubyte"),
            &[LABELS_MAGIC, 2],
            &[7, 3],
            false,
        );

        assert!(is_present(dir.path(), false));
        assert!(!is_present(dir.path(), true));

        let dataset = load(dir.path(), false).unwrap();

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.image_size(), 4);
        assert_eq!(dataset.label(0), 7);
        assert_eq!(dataset.image(1)[3], 210. / 255.);
    }

    #[test]
    fn rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        write_idx(
            &dir.path().join("train-images-idx3-ubyte"),
            &[LABELS_MAGIC, 0, 28, 28],
            &[],
            false,
        );

        assert!(matches!(load(dir.path(), true), Err(MlErr::Dataset(_))));
    }

    #[test]
    fn rejects_count_disagreement() {
        let dir = tempfile::tempdir().unwrap();
        write_idx(
            &dir.path().join("train-images-idx3-ubyte"),
            &[IMAGES_MAGIC, 1, 1, 1],
            &[0],
            false,
        );
        write_idx(
            &dir.path().join("train-labels-idx1-ubyte"),
            &[LABELS_MAGIC, 2],
            &[0, 1],
            false,
        );

        assert!(matches!(load(dir.path(), true), Err(MlErr::Dataset(_))));
    }

    #[test]
    fn rejects_oversized_header() {
        let dir = tempfile::tempdir().unwrap();
        write_idx(
            &dir.path().join("train-images-idx3-ubyte"),
            &[IMAGES_MAGIC, u32::MAX, u32::MAX, u32::MAX],
            &[0; 16],
            false,
        );

        assert!(matches!(load(dir.path(), true), Err(MlErr::Dataset(_))));
    }

    #[test]
    fn rejects_truncated_images() {
        let dir = tempfile::tempdir().unwrap();
        write_idx(
            &dir.path().join("train-images-idx3-ubyte.gz"),
            &[IMAGES_MAGIC, 3, 28, 28],
            &[1; 100],
            true,
        );

        assert!(matches!(load(dir.path(), true), Err(MlErr::Dataset(_))));
    }

    #[tokio::test]
    async fn download_skips_present_files() {
        let dir = tempfile::tempdir().unwrap();
        write_idx(
            &dir.path().join("t10k-images-idx3-ubyte"),
            &[IMAGES_MAGIC, 0, 28, 28],
            &[],
            false,
        );
        write_idx(
            &dir.path().join("t10k-labels-idx1-ubyte"),
            &[LABELS_MAGIC, 0],
            &[],
            false,
        );

        download(dir.path(), false).await.unwrap();

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
    }
}
