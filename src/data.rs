use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
    tensor::TensorData,
};
use log::error;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};
use walkdir::WalkDir;

use crate::{
    error::{BicycleError, Result},
    utils::load_pair,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Flips
/// Seeded horizontal flips. Whether item `index` is flipped depends only on
/// the seed, the current epoch and `index`, so the outcome does not depend on
/// which loader worker decodes the item or when.
///
/// Clones share the epoch counter.
#[derive(Debug, Clone)]
pub struct FlipSchedule {
    seed: u64,
    epoch: Arc<AtomicUsize>,
}

impl FlipSchedule {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            epoch: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Must be called before the loader iterates the epoch.
    pub fn set_epoch(&self, epoch: usize) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub fn flips(&self, index: usize) -> bool {
        let epoch = self.epoch.load(Ordering::SeqCst) as u64;
        let key = self
            .seed
            .wrapping_add(epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15))
            .wrapping_add((index as u64).wrapping_mul(0xC2B2_AE3D_27D4_EB4F));

        StdRng::seed_from_u64(key).gen_bool(0.5)
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Dataset
/// Side-by-side paired images under `<root>/<split>/`. Images are decoded on
/// access. Pairs are flipped only when a [`FlipSchedule`] is attached.
#[derive(Debug, Clone)]
pub struct PairedImageDataset {
    files: Vec<PathBuf>,
    shape: [usize; 3],
    flips: Option<FlipSchedule>,
}

impl PairedImageDataset {
    pub fn new<P: AsRef<Path>>(root: P, split: Split, shape: [usize; 3]) -> Result<Self> {
        let split_root = root.as_ref().join(split.dir_name());

        let mut files = Vec::new();
        for entry in WalkDir::new(&split_root)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|e| BicycleError::Io(e.into()))?;
            let path = entry.path();
            if let Some(ext) = path.extension() {
                let ext = ext.to_string_lossy().to_ascii_lowercase();
                if matches!(ext.as_str(), "jpg" | "jpeg" | "png") {
                    // headers only; pixels are decoded on access
                    let (width, _) = image::image_dimensions(path)?;
                    if width < 2 {
                        return Err(BicycleError::Data(format!(
                            "{} is too narrow to hold an image pair",
                            path.display()
                        )));
                    }
                    files.push(path.to_path_buf());
                }
            }
        }

        if files.is_empty() {
            return Err(BicycleError::EmptyDataset(split_root));
        }

        Ok(Self {
            files,
            shape,
            flips: None,
        })
    }

    pub fn with_random_flip(mut self, flips: FlipSchedule) -> Self {
        self.flips = Some(flips);
        self
    }
}

#[derive(Debug, Clone)]
pub struct PairItem {
    /// `[channels, height, width]` in `[-1, 1]`
    pub source: Vec<f32>,
    pub target: Vec<f32>,
}

impl Dataset<PairItem> for PairedImageDataset {
    fn get(&self, index: usize) -> Option<PairItem> {
        let path = self.files.get(index)?;
        let flip = self.flips.as_ref().is_some_and(|flips| flips.flips(index));

        match load_pair(path, self.shape, flip) {
            Ok(pair) => Some(PairItem {
                source: pair.source,
                target: pair.target,
            }),
            Err(err) => {
                error!("failed to load {}: {err}", path.display());
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.files.len()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Batcher
#[derive(Debug, Clone)]
pub struct PairBatch<B: Backend> {
    pub source: Tensor<B, 4>,
    pub target: Tensor<B, 4>,
    pub size: usize,
}
impl<B: Backend> PairBatch<B> {
    /// Single-item batch at `index`.
    pub fn item(&self, index: usize) -> PairBatch<B> {
        PairBatch {
            source: self.source.clone().narrow(0, index, 1),
            target: self.target.clone().narrow(0, index, 1),
            size: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PairBatcher {
    shape: [usize; 3],
}
impl PairBatcher {
    pub fn new(shape: [usize; 3]) -> Self {
        Self { shape }
    }
}
impl<B: Backend> Batcher<B, PairItem, PairBatch<B>> for PairBatcher {
    fn batch(&self, items: Vec<PairItem>, device: &B::Device) -> PairBatch<B> {
        let [channels, height, width] = self.shape;
        let size = items.len();

        let mut source = Vec::with_capacity(size * channels * height * width);
        let mut target = Vec::with_capacity(size * channels * height * width);
        for item in items {
            source.extend(item.source);
            target.extend(item.target);
        }

        let shape = [size, channels, height, width];
        PairBatch {
            source: Tensor::from_data(TensorData::new(source, shape), device),
            target: Tensor::from_data(TensorData::new(target, shape), device),
            size,
        }
    }
}
