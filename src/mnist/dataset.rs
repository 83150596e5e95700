use crate::backend::Element;
use anyhow::{Context, Result, bail, ensure};
use burn_common::network::downloader::download_file_as_bytes;
use burn_dataset::{
    Dataset, InMemDataset,
    transform::{Mapper, MapperDataset},
};
use flate2::read::GzDecoder;
use num_traits::AsPrimitive;
use serde::{Deserialize, Serialize};
use std::fs::{File, create_dir_all};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

// CVDF mirror of http://yann.lecun.com/exdb/mnist/
const URL: &str = "https://storage.googleapis.com/cvdf-datasets/mnist/";
const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// IDX magic number for unsigned byte data with 3 dimensions.
const IMAGES_MAGIC: u32 = 0x0000_0803;
/// IDX magic number for unsigned byte data with 1 dimension.
const LABELS_MAGIC: u32 = 0x0000_0801;

pub const WIDTH: usize = 28;
pub const HEIGHT: usize = 28;
/// Labels are the digits 0 to 9.
pub const NUM_CLASSES: u8 = 10;

/// MNIST item.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct MnistItem {
    /// Image as a flat, row-major array of floats.
    /// Each value is a brightness, in between 0.0 and 255.0.
    ///
    /// # Shape
    /// [HEIGHT * WIDTH]
    pub image: Vec<Element>,

    /// Label of the image.
    /// Each value is in between 0 and 9.
    pub label: u8,
}

#[derive(Deserialize, Debug, Clone)]
struct MnistItemRaw {
    pub image_bytes: Vec<u8>,
    pub label: u8,
}

struct BytesToImage;

impl Mapper<MnistItemRaw, MnistItem> for BytesToImage {
    /// Convert a raw MNIST item (image bytes) to a MNIST item (flat array image).
    fn map(&self, item: &MnistItemRaw) -> MnistItem {
        debug_assert_eq!(item.image_bytes.len(), WIDTH * HEIGHT);

        let image: Vec<Element> = item
            .image_bytes
            .iter()
            .map(|brightness| {
                let element: Element = (*brightness).as_();
                element
            })
            .collect();

        MnistItem {
            image,
            label: item.label,
        }
    }
}

type MappedDataset = MapperDataset<InMemDataset<MnistItemRaw>, BytesToImage, MnistItemRaw>;

/// Which half of MNIST to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    /// 60,000 training images.
    Train,
    /// 10,000 test images.
    Test,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    fn images_file(&self) -> &'static str {
        match self {
            Split::Train => TRAIN_IMAGES,
            Split::Test => TEST_IMAGES,
        }
    }

    fn labels_file(&self) -> &'static str {
        match self {
            Split::Train => TRAIN_LABELS,
            Split::Test => TEST_LABELS,
        }
    }
}

/// The MNIST dataset consists of 70,000 28x28 grayscale images in 10 classes (one for each digit).
/// There are 60,000 training images and 10,000 test images.
///
/// Missing files are downloaded from the [CVDF mirror](https://github.com/cvdfoundation/mnist)
/// into `<data_dir>/mnist/<split>/`.
pub struct MnistDataset {
    dataset: MappedDataset,
}

impl Dataset<MnistItem> for MnistDataset {
    fn get(&self, index: usize) -> Option<MnistItem> {
        self.dataset.get(index)
    }

    fn len(&self) -> usize {
        self.dataset.len()
    }
}

impl MnistDataset {
    /// Creates a new train dataset.
    pub fn train(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::new(data_dir, Split::Train)
    }

    /// Creates a new test dataset.
    pub fn test(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::new(data_dir, Split::Test)
    }

    pub fn new(data_dir: impl AsRef<Path>, split: Split) -> Result<Self> {
        let root = Self::download(data_dir.as_ref(), split)?;

        // MNIST is tiny so we can load it in-memory
        // Train images (u8): 28 * 28 * 60000 = 47.04Mb
        // Test images (u8): 28 * 28 * 10000 = 7.84Mb
        let images_path = root.join(split.images_file());
        let labels_path = root.join(split.labels_file());
        let images = File::open(&images_path)
            .with_context(|| format!("failed to open {images_path:?}"))?;
        let labels = File::open(&labels_path)
            .with_context(|| format!("failed to open {labels_path:?}"))?;

        let dataset = Self::from_idx(BufReader::new(images), BufReader::new(labels))
            .with_context(|| format!("invalid MNIST {} split in {root:?}", split.dir_name()))?;
        log::info!(
            "Loaded {} MNIST {} images from {root:?}",
            dataset.len(),
            split.dir_name()
        );
        Ok(dataset)
    }

    /// Builds the dataset from uncompressed IDX images and labels streams.
    pub fn from_idx(images: impl Read, labels: impl Read) -> Result<Self> {
        let images = read_images(images).context("failed to read the images")?;
        let labels = read_labels(labels).context("failed to read the labels")?;
        ensure!(
            images.len() == labels.len(),
            "found {} images but {} labels",
            images.len(),
            labels.len()
        );

        let items: Vec<_> = images
            .into_iter()
            .zip(labels)
            .map(|(image_bytes, label)| MnistItemRaw { image_bytes, label })
            .collect();

        let dataset = InMemDataset::new(items);
        let dataset = MapperDataset::new(dataset, BytesToImage);

        Ok(Self { dataset })
    }

    /// Download the split files that are not yet present, returning the split directory.
    fn download(data_dir: &Path, split: Split) -> Result<PathBuf> {
        let split_dir = data_dir.join("mnist").join(split.dir_name());

        if !split_dir.exists() {
            create_dir_all(&split_dir)
                .with_context(|| format!("failed to create {split_dir:?}"))?;
        }

        Self::download_file(split.images_file(), &split_dir)?;
        Self::download_file(split.labels_file(), &split_dir)?;

        Ok(split_dir)
    }

    /// Download a gzip file from the MNIST mirror and store it decompressed in `dest_dir`.
    fn download_file(name: &str, dest_dir: &Path) -> Result<PathBuf> {
        let file_name = dest_dir.join(name);

        if !file_name.exists() {
            log::info!("Downloading {name} into {dest_dir:?}");
            let bytes = download_file_as_bytes(&format!("{URL}{name}.gz"), name);

            // decompress next to the destination so that an interrupted write is not mistaken
            // for a complete file on the next run
            let partial = file_name.with_extension("part");
            let mut output_file =
                File::create(&partial).with_context(|| format!("failed to create {partial:?}"))?;
            let mut gz_buffer = GzDecoder::new(&bytes[..]);
            std::io::copy(&mut gz_buffer, &mut output_file)
                .with_context(|| format!("failed to decompress {name}.gz"))?;
            std::fs::rename(&partial, &file_name)
                .with_context(|| format!("failed to move {partial:?} to {file_name:?}"))?;
        }

        Ok(file_name)
    }
}

/// Read an IDX images stream.
/// Each image is a vector of `HEIGHT * WIDTH` bytes.
pub fn read_images(mut reader: impl Read) -> Result<Vec<Vec<u8>>> {
    // 16-byte header: magic, count, rows, cols
    let magic = read_u32(&mut reader)?;
    if magic != IMAGES_MAGIC {
        bail!("unexpected magic number {magic:#010x} for an images file");
    }
    let size = read_u32(&mut reader)? as usize;
    let rows = read_u32(&mut reader)? as usize;
    let cols = read_u32(&mut reader)? as usize;
    ensure!(
        rows == HEIGHT && cols == WIDTH,
        "expected {HEIGHT}x{WIDTH} images, found {rows}x{cols}"
    );

    let buf_images = read_payload(&mut reader, WIDTH * HEIGHT, size)
        .with_context(|| format!("expected {size} images"))?;

    Ok(buf_images
        .chunks(WIDTH * HEIGHT)
        .map(|chunk| chunk.to_vec())
        .collect())
}

/// Read an IDX labels stream.
pub fn read_labels(mut reader: impl Read) -> Result<Vec<u8>> {
    // 8-byte header: magic, count
    let magic = read_u32(&mut reader)?;
    if magic != LABELS_MAGIC {
        bail!("unexpected magic number {magic:#010x} for a labels file");
    }
    let size = read_u32(&mut reader)? as usize;

    let buf_labels = read_payload(&mut reader, 1, size)
        .with_context(|| format!("expected {size} labels"))?;
    if let Some(index) = buf_labels.iter().position(|&label| label >= NUM_CLASSES) {
        bail!("label {} at index {index} is not a digit", buf_labels[index]);
    }

    Ok(buf_labels)
}

/// Reads exactly `count` records of `record_len` bytes.
///
/// The buffer grows with the bytes actually present, so a corrupt count cannot
/// trigger a huge allocation.
fn read_payload(reader: &mut impl Read, record_len: usize, count: usize) -> Result<Vec<u8>> {
    let len = record_len
        .checked_mul(count)
        .with_context(|| format!("{count} records of {record_len} bytes overflow"))?;
    let mut buf = Vec::new();
    reader
        .take(len as u64)
        .read_to_end(&mut buf)
        .context("failed to read the IDX payload")?;
    ensure!(
        buf.len() == len,
        "truncated payload: expected {len} bytes, found {}",
        buf.len()
    );
    Ok(buf)
}

fn read_u32(reader: &mut impl Read) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .context("truncated IDX header")?;
    Ok(u32::from_be_bytes(buf))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds an IDX images file of `images.len()` 28x28 images.
    pub(crate) fn idx_images(images: &[[u8; WIDTH * HEIGHT]]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(IMAGES_MAGIC.to_be_bytes());
        bytes.extend((images.len() as u32).to_be_bytes());
        bytes.extend((HEIGHT as u32).to_be_bytes());
        bytes.extend((WIDTH as u32).to_be_bytes());
        for image in images {
            bytes.extend(image);
        }
        bytes
    }

    pub(crate) fn idx_labels(labels: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend(LABELS_MAGIC.to_be_bytes());
        bytes.extend((labels.len() as u32).to_be_bytes());
        bytes.extend(labels);
        bytes
    }

    #[test]
    fn reads_items_in_order() {
        let mut first = [0u8; WIDTH * HEIGHT];
        first[0] = 255;
        let mut second = [0u8; WIDTH * HEIGHT];
        second[WIDTH * HEIGHT - 1] = 7;

        let dataset = MnistDataset::from_idx(
            &idx_images(&[first, second])[..],
            &idx_labels(&[3, 9])[..],
        )
        .unwrap();

        assert_eq!(dataset.len(), 2);
        let item = dataset.get(0).unwrap();
        assert_eq!(item.label, 3);
        assert_eq!(item.image.len(), WIDTH * HEIGHT);
        assert_eq!(item.image[0], 255.0);
        let item = dataset.get(1).unwrap();
        assert_eq!(item.label, 9);
        assert_eq!(item.image[WIDTH * HEIGHT - 1], 7.0);
        assert!(dataset.get(2).is_none());
    }

    #[test]
    fn rejects_swapped_files() {
        let images = idx_images(&[[0u8; WIDTH * HEIGHT]]);
        let labels = idx_labels(&[1]);
        assert!(MnistDataset::from_idx(&labels[..], &images[..]).is_err());
    }

    #[test]
    fn rejects_truncated_images() {
        let mut images = idx_images(&[[0u8; WIDTH * HEIGHT]; 2]);
        images.truncate(images.len() - 1);
        assert!(read_images(&images[..]).is_err());
    }

    #[test]
    fn rejects_huge_counts_without_allocating() {
        let mut images = idx_images(&[]);
        images[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        images.extend([0u8; 10]);
        let err = read_images(&images[..]).unwrap_err();
        assert!(format!("{err:#}").contains("truncated payload"), "{err:#}");

        let mut labels = idx_labels(&[1, 2]);
        labels[4..8].copy_from_slice(&u32::MAX.to_be_bytes());
        let err = read_labels(&labels[..]).unwrap_err();
        assert!(format!("{err:#}").contains("truncated payload"), "{err:#}");
    }

    #[test]
    fn rejects_labels_out_of_range() {
        assert_eq!(read_labels(&idx_labels(&[0, 9])[..]).unwrap(), vec![0, 9]);
        let err = read_labels(&idx_labels(&[3, 10])[..]).unwrap_err();
        assert!(err.to_string().contains("label 10 at index 1"), "{err}");
    }

    #[test]
    fn rejects_unexpected_image_size() {
        let mut images = idx_images(&[]);
        // rows field
        images[8..12].copy_from_slice(&32u32.to_be_bytes());
        let err = read_images(&images[..]).unwrap_err();
        assert!(err.to_string().contains("32x28"));
    }

    #[test]
    fn rejects_count_mismatch() {
        let images = idx_images(&[[0u8; WIDTH * HEIGHT]; 2]);
        let labels = idx_labels(&[1, 2, 3]);
        assert!(MnistDataset::from_idx(&images[..], &labels[..]).is_err());
    }
}
