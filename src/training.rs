use burn::{
    config::Config,
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::{AutodiffModule, Module},
    optim::{
        adaptor::OptimizerAdaptor, Adam, AdamConfig, GradientsAccumulator, GradientsParams,
        Optimizer,
    },
    tensor::{
        backend::{AutodiffBackend, Backend},
        cast::ToElement,
        Tensor,
    },
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    checkpoint::CheckpointStore,
    data::{FlipSchedule, PairBatch, PairBatcher, PairedImageDataset, Split},
    error::BicycleError,
    latent::{reparameterize, LatentSampler},
    loss::{
        adversarial_loss, discriminator_loss, kl_divergence, latent_loss, pixel_loss, LossWeights,
        REAL_LABEL,
    },
    model::{discriminator::Discriminator, encoder::Encoder, generator::Generator, ModelConfig},
    sampling::save_samples,
    schedule::{UpdatePhase, UpdateSchedule},
};

type ModuleOptimizer<M, B> = OptimizerAdaptor<Adam, M, B>;

/// Which gradients drive the generator step of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratorGradients {
    /// Joint encoder+generator loss plus the latent reconstruction loss.
    Accumulate,
    /// Latent reconstruction loss only; the joint loss trains the encoder alone.
    LatentOnly,
}

impl fmt::Display for GeneratorGradients {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorGradients::Accumulate => f.write_str("accumulate"),
            GeneratorGradients::LatentOnly => f.write_str("latent-only"),
        }
    }
}

impl FromStr for GeneratorGradients {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "accumulate" => Ok(GeneratorGradients::Accumulate),
            "latent-only" => Ok(GeneratorGradients::LatentOnly),
            other => Err(format!(
                "unknown generator gradient policy `{other}`, expected `accumulate` or `latent-only`"
            )),
        }
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Config
#[derive(Config)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    pub dataset_name: String,
    /// Directory holding one sub-directory per dataset.
    pub data_root: String,
    /// Root of `images/`, `saved_models/` and `config.json`.
    pub output_dir: String,

    #[config(default = "LossWeights::new()")]
    pub loss: LossWeights,
    /// Epoch to start from; anything but 0 loads that epoch's checkpoints.
    #[config(default = 0)]
    pub start_epoch: usize,
    #[config(default = 200)]
    pub num_epochs: usize,
    #[config(default = 8)]
    pub batch_size: usize,
    #[config(default = 8)]
    pub val_batch_size: usize,
    #[config(default = 2e-4)]
    pub lr: f64,
    #[config(default = 8)]
    pub num_workers: usize,
    /// Save a sample grid every `sample_interval` batches.
    #[config(default = 400)]
    pub sample_interval: usize,
    /// Save checkpoints every `checkpoint_interval` epochs.
    #[config(default = "None")]
    pub checkpoint_interval: Option<usize>,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = "GeneratorGradients::Accumulate")]
    pub generator_gradients: GeneratorGradients,
}

impl TrainingConfig {
    pub fn validate(&self) -> crate::Result<()> {
        self.model.validate()?;

        let positive = [
            ("batch_size", self.batch_size),
            ("val_batch_size", self.val_batch_size),
            ("sample_interval", self.sample_interval),
            ("checkpoint_interval", self.checkpoint_interval.unwrap_or(1)),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(BicycleError::InvalidConfig(format!("{name} must be positive")));
            }
        }

        Ok(())
    }
}

// ////////////////////////////////////////////////////////////////////////////
// State
/// Per-batch loss values, for logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct LossReport {
    pub generator_encoder: f32,
    pub vae_gan: f32,
    pub lr_gan: f32,
    pub pixel: f32,
    pub kl: f32,
    pub latent: f32,
    pub d_vae: f32,
    pub d_lr: f32,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub losses: LossReport,
    /// Optimizer steps in the order they were applied.
    pub phases: Vec<UpdatePhase>,
}

/// Inputs of the LR branch kept between the joint update and the
/// generator-only update of one batch.
///
/// burn frees a graph on backward, so the generator pass is replayed from
/// these inputs instead of being retained. The generator has not been stepped
/// in between, so the replay computes the same images and gradients.
///
/// The replay runs the generator in training mode again, so its BatchNorm
/// running statistics take two momentum updates per batch from the same
/// activations instead of one. Only inference through `valid()` reads them.
struct LrBranch<B: Backend> {
    source: Tensor<B, 4>,
    latent: Tensor<B, 2>,
}

impl<B: Backend> LrBranch<B> {
    fn replay(&self, generator: &Generator<B>) -> Tensor<B, 4> {
        generator.forward(self.source.clone(), self.latent.clone())
    }
}

impl<B: AutodiffBackend> LrBranch<B> {
    /// L1 distance between the sampled latent and the encoding of the image
    /// generated from it. The encoder is frozen for this pass so only the
    /// generator receives gradients. Consumes the branch.
    fn latent_reconstruction(self, generator: &Generator<B>, encoder: &Encoder<B>) -> Tensor<B, 1> {
        let generated = self.replay(generator);
        let (encoded_mu, _) = encoder.clone().no_grad().forward(generated);

        latent_loss(encoded_mu, self.latent)
    }
}

/// The four networks of a run and the optimizer owning each of them.
pub struct TrainingState<B: AutodiffBackend> {
    pub encoder: Encoder<B>,
    pub generator: Generator<B>,
    pub d_vae: Discriminator<B>,
    pub d_lr: Discriminator<B>,
    optim_encoder: ModuleOptimizer<Encoder<B>, B>,
    optim_generator: ModuleOptimizer<Generator<B>, B>,
    optim_d_vae: ModuleOptimizer<Discriminator<B>, B>,
    optim_d_lr: ModuleOptimizer<Discriminator<B>, B>,
    learning_rate: f64,
    latent_dim: usize,
    weights: LossWeights,
    generator_gradients: GeneratorGradients,
}

fn scalar<B: Backend>(tensor: &Tensor<B, 1>) -> f32 {
    tensor.clone().into_scalar().to_f32()
}

impl<B: AutodiffBackend> TrainingState<B> {
    pub fn new(config: &TrainingConfig, device: &B::Device) -> Self {
        Self {
            encoder: config.model.init_encoder(device),
            generator: config.model.init_generator(device),
            d_vae: config.model.init_discriminator(device),
            d_lr: config.model.init_discriminator(device),
            optim_encoder: config.optimizer.init(),
            optim_generator: config.optimizer.init(),
            optim_d_vae: config.optimizer.init(),
            optim_d_lr: config.optimizer.init(),
            learning_rate: config.lr,
            latent_dim: config.model.latent_dim,
            weights: config.loss.clone(),
            generator_gradients: config.generator_gradients,
        }
    }

    /// Run the four updates of one batch: encoder, generator, D_VAE, D_LR.
    pub fn step(
        &mut self,
        batch: &PairBatch<B>,
        sampler: &mut LatentSampler,
    ) -> crate::Result<BatchReport> {
        let mut schedule = UpdateSchedule::new();
        let mut losses = LossReport::default();
        let real_a = batch.source.clone();
        let real_b = batch.target.clone();

        // ---------------------------------------------------------------
        // Encoder + generator: cVAE-GAN and cLR-GAN branches
        let (mu, logvar) = self.encoder.forward(real_b.clone());
        let encoded_z = reparameterize(mu.clone(), logvar.clone(), sampler);
        let fake_b = self.generator.forward(real_a.clone(), encoded_z);

        let loss_vae_gan = adversarial_loss(self.d_vae.forward(fake_b.clone()), REAL_LABEL);
        let loss_pixel = pixel_loss(fake_b.clone(), real_b.clone());
        let loss_kl = kl_divergence(mu, logvar);

        let sampled_z = sampler.standard_normal::<B>(batch.size, self.latent_dim, &real_a.device());
        let lr_branch = LrBranch {
            source: real_a,
            latent: sampled_z,
        };
        let lr_fake_b = lr_branch.replay(&self.generator);
        let loss_lr_gan = adversarial_loss(self.d_lr.forward(lr_fake_b.clone()), REAL_LABEL);

        let loss_ge = loss_vae_gan.clone()
            + loss_lr_gan.clone()
            + loss_pixel.clone().mul_scalar(self.weights.pixel)
            + loss_kl.clone().mul_scalar(self.weights.kl);

        losses.vae_gan = scalar(&loss_vae_gan);
        losses.lr_gan = scalar(&loss_lr_gan);
        losses.pixel = scalar(&loss_pixel);
        losses.kl = scalar(&loss_kl);
        losses.generator_encoder = scalar(&loss_ge);

        let mut grads = loss_ge.backward();
        let encoder_grads = GradientsParams::from_module(&mut grads, &self.encoder);
        let joint_generator_grads = GradientsParams::from_module(&mut grads, &self.generator);

        schedule.advance(UpdatePhase::Encoder)?;
        self.encoder = self
            .optim_encoder
            .step(self.learning_rate, self.encoder.clone(), encoder_grads);

        // ---------------------------------------------------------------
        // Generator only: latent reconstruction against the updated encoder
        let loss_latent = lr_branch
            .latent_reconstruction(&self.generator, &self.encoder)
            .mul_scalar(self.weights.latent);
        losses.latent = scalar(&loss_latent);

        let mut grads = loss_latent.backward();
        let latent_grads = GradientsParams::from_module(&mut grads, &self.generator);
        let generator_grads = match self.generator_gradients {
            GeneratorGradients::Accumulate => {
                let mut accumulator = GradientsAccumulator::<Generator<B>>::new();
                accumulator.accumulate(&self.generator, joint_generator_grads);
                accumulator.accumulate(&self.generator, latent_grads);
                accumulator.grads()
            }
            GeneratorGradients::LatentOnly => latent_grads,
        };

        schedule.advance(UpdatePhase::Generator)?;
        self.generator = self
            .optim_generator
            .step(self.learning_rate, self.generator.clone(), generator_grads);

        // ---------------------------------------------------------------
        // D_VAE: images generated from encoded latents
        let loss_d_vae = discriminator_loss(
            self.d_vae.forward(real_b.clone()),
            self.d_vae.forward(fake_b.detach()),
        );
        losses.d_vae = scalar(&loss_d_vae);

        let grads = GradientsParams::from_grads(loss_d_vae.backward(), &self.d_vae);
        schedule.advance(UpdatePhase::DiscriminatorVae)?;
        self.d_vae = self
            .optim_d_vae
            .step(self.learning_rate, self.d_vae.clone(), grads);

        // ---------------------------------------------------------------
        // D_LR: images generated from sampled latents
        let loss_d_lr = discriminator_loss(
            self.d_lr.forward(real_b),
            self.d_lr.forward(lr_fake_b.detach()),
        );
        losses.d_lr = scalar(&loss_d_lr);

        let grads = GradientsParams::from_grads(loss_d_lr.backward(), &self.d_lr);
        schedule.advance(UpdatePhase::DiscriminatorLr)?;
        self.d_lr = self
            .optim_d_lr
            .step(self.learning_rate, self.d_lr.clone(), grads);

        Ok(BatchReport {
            losses,
            phases: schedule.finish()?,
        })
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Training
fn format_eta(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn sample_images<B: AutodiffBackend>(
    state: &TrainingState<B>,
    dataloader_valid: &Arc<dyn DataLoader<B::InnerBackend, PairBatch<B::InnerBackend>>>,
    latent_dim: usize,
    path: &Path,
) -> crate::Result<()> {
    match dataloader_valid.iter().next() {
        Some(batch) => {
            let generator = state.generator.valid();
            save_samples(&generator, batch.source, latent_dim, path)?;
            info!("Saved samples to {}", path.display());
        }
        None => warn!("validation loader yielded no batch, skipping samples"),
    }

    Ok(())
}

pub fn train<B: AutodiffBackend>(config: TrainingConfig, device: &B::Device) -> crate::Result<()> {
    config.validate()?;

    let output_dir = PathBuf::from(&config.output_dir);
    let image_dir = output_dir.join("images").join(&config.dataset_name);
    std::fs::create_dir_all(&image_dir)?;
    let checkpoints = CheckpointStore::new(&output_dir, &config.dataset_name)?;
    config.save(output_dir.join("config.json"))?;

    B::seed(config.seed);
    let mut state = TrainingState::<B>::new(&config, device);
    if config.start_epoch != 0 {
        info!("Resuming from epoch {}", config.start_epoch);
        checkpoints.load(&mut state, config.start_epoch, device)?;
    }

    let shape = config.model.image_shape();
    let data_root = Path::new(&config.data_root).join(&config.dataset_name);
    let flips = FlipSchedule::new(config.seed);
    let dataset_train =
        PairedImageDataset::new(&data_root, Split::Train, shape)?.with_random_flip(flips.clone());
    let dataset_valid = PairedImageDataset::new(&data_root, Split::Val, shape)?;
    info!(
        "train pairs -> {}, val pairs -> {}",
        dataset_train.len(),
        dataset_valid.len()
    );

    let dataloader_train: Arc<dyn DataLoader<B, PairBatch<B>>> =
        DataLoaderBuilder::new(PairBatcher::new(shape))
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .set_device(device.clone())
            .build(dataset_train);
    let dataloader_valid: Arc<dyn DataLoader<B::InnerBackend, PairBatch<B::InnerBackend>>> =
        DataLoaderBuilder::new(PairBatcher::new(shape))
            .batch_size(config.val_batch_size)
            .shuffle(config.seed.wrapping_add(1))
            .num_workers(1)
            .set_device(device.clone())
            .build(dataset_valid);

    let latent_dim = config.model.latent_dim;
    let mut sampler = LatentSampler::new(config.seed);
    let batches_per_epoch = dataloader_train.num_items().div_ceil(config.batch_size);
    let total_batches = config.num_epochs * batches_per_epoch;

    let mut prev_time = Instant::now();
    for epoch in config.start_epoch..config.num_epochs {
        flips.set_epoch(epoch);
        let mut yielded = 0;
        for (it, batch) in dataloader_train.iter().enumerate() {
            yielded += batch.size;
            let report = state.step(&batch, &mut sampler)?;
            let losses = report.losses;

            let batches_done = epoch * batches_per_epoch + it;
            let batches_left = total_batches.saturating_sub(batches_done);
            let time_left =
                Duration::from_secs_f64(prev_time.elapsed().as_secs_f64() * batches_left as f64);
            prev_time = Instant::now();

            info!(
                "[Epoch {}/{}] [Batch {}/{}] [D VAE_loss: {:.6}, LR_loss: {:.6}] [G loss: {:.6}, pixel: {:.6}, latent: {:.6}] ETA: {}",
                epoch,
                config.num_epochs,
                it,
                batches_per_epoch,
                losses.d_vae,
                losses.d_lr,
                losses.generator_encoder,
                losses.pixel,
                losses.latent,
                format_eta(time_left),
            );

            if batches_done % config.sample_interval == 0 {
                let path = image_dir.join(format!("{batches_done}.png"));
                sample_images(&state, &dataloader_valid, latent_dim, &path)?;
            }
        }

        // the loader stops at the first pair that fails to decode
        if yielded < dataloader_train.num_items() {
            return Err(BicycleError::ShortEpoch {
                epoch,
                yielded,
                expected: dataloader_train.num_items(),
            });
        }

        if let Some(interval) = config.checkpoint_interval {
            if epoch % interval == 0 {
                checkpoints.save(&state, epoch)?;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn tiny_config(data_root: &str, output_dir: &str) -> TrainingConfig {
    let model = ModelConfig::new()
        .with_img_height(16)
        .with_img_width(16)
        .with_latent_dim(4)
        .with_generator_filters(4)
        .with_generator_depth(3)
        .with_encoder_filters(4)
        .with_discriminator_filters(4);

    TrainingConfig::new(
        model,
        AdamConfig::new().with_beta_1(0.5).with_beta_2(0.999),
        "pairs".to_string(),
        data_root.to_string(),
        output_dir.to_string(),
    )
    .with_batch_size(2)
    .with_val_batch_size(2)
    .with_num_workers(1)
    .with_lr(1e-2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{loss::discriminator_loss, TestAutodiffBackend, TestBackend};
    use burn::tensor::{Distribution, TensorData};
    use image::{Rgb, RgbImage};

    type B = TestAutodiffBackend;

    fn batch(device: &<B as Backend>::Device) -> PairBatch<B> {
        let values = |offset: f32| {
            (0..2 * 3 * 16 * 16)
                .map(|i| (i as f32 * 0.37 + offset).sin())
                .collect::<Vec<_>>()
        };
        PairBatch {
            source: Tensor::from_data(TensorData::new(values(0.0), [2, 3, 16, 16]), device),
            target: Tensor::from_data(TensorData::new(values(1.0), [2, 3, 16, 16]), device),
            size: 2,
        }
    }

    fn snapshot(state: &TrainingState<B>, batch: &PairBatch<B>) -> Vec<Vec<f32>> {
        let device = batch.source.device();
        let z = Tensor::<B, 2>::full([2, 4], 0.5, &device);
        let (mu, _) = state.encoder.forward(batch.target.clone());
        let generated = state.generator.forward(batch.source.clone(), z);
        let d_vae = state.d_vae.forward(batch.target.clone()).fine;
        let d_lr = state.d_lr.forward(batch.target.clone()).coarse;

        vec![
            mu.into_data().to_vec::<f32>().unwrap(),
            generated.into_data().to_vec::<f32>().unwrap(),
            d_vae.into_data().to_vec::<f32>().unwrap(),
            d_lr.into_data().to_vec::<f32>().unwrap(),
        ]
    }

    #[test]
    fn step_applies_updates_in_order() {
        let device = Default::default();
        let config = tiny_config("unused", "unused");
        let mut state = TrainingState::<B>::new(&config, &device);
        let mut sampler = LatentSampler::new(0);

        let report = state.step(&batch(&device), &mut sampler).unwrap();

        assert_eq!(report.phases, UpdatePhase::ORDER.to_vec());
        let losses = report.losses;
        for value in [
            losses.generator_encoder,
            losses.pixel,
            losses.kl,
            losses.latent,
            losses.d_vae,
            losses.d_lr,
        ] {
            assert!(value.is_finite());
            assert!(value >= 0.0);
        }
    }

    #[test]
    fn step_updates_all_four_networks() {
        let device = Default::default();
        let config = tiny_config("unused", "unused");
        let mut state = TrainingState::<B>::new(&config, &device);
        let batch = batch(&device);

        let before = snapshot(&state, &batch);
        state.step(&batch, &mut LatentSampler::new(0)).unwrap();
        let after = snapshot(&state, &batch);

        for (b, a) in before.iter().zip(&after) {
            assert_ne!(b, a);
        }
    }

    #[test]
    fn latent_only_policy_still_trains_the_generator() {
        let device = Default::default();
        let config =
            tiny_config("unused", "unused").with_generator_gradients(GeneratorGradients::LatentOnly);
        let mut state = TrainingState::<B>::new(&config, &device);
        let batch = batch(&device);

        let before = snapshot(&state, &batch);
        let report = state.step(&batch, &mut LatentSampler::new(3)).unwrap();
        let after = snapshot(&state, &batch);

        assert_eq!(report.phases.len(), 4);
        assert_ne!(before[1], after[1]);
    }

    #[test]
    fn replay_reproduces_the_lr_branch_images() {
        let device = Default::default();
        let config = tiny_config("unused", "unused");
        let state = TrainingState::<B>::new(&config, &device);
        let batch = batch(&device);

        let branch = LrBranch {
            source: batch.source.clone(),
            latent: Tensor::full([2, 4], -0.3, &device),
        };
        let first = branch.replay(&state.generator).into_data();
        let second = branch.replay(&state.generator).into_data();

        assert_eq!(first, second);
    }

    #[test]
    fn latent_reconstruction_only_reaches_the_generator() {
        let device = Default::default();
        let config = tiny_config("unused", "unused");
        let state = TrainingState::<B>::new(&config, &device);
        let batch = batch(&device);

        let branch = LrBranch {
            source: batch.source.clone(),
            latent: Tensor::random([2, 4], Distribution::Normal(0.0, 1.0), &device),
        };
        let mut grads = branch
            .latent_reconstruction(&state.generator, &state.encoder)
            .backward();

        assert!(GradientsParams::from_module(&mut grads, &state.encoder).is_empty());
        assert!(!GradientsParams::from_module(&mut grads, &state.generator).is_empty());
    }

    #[test]
    fn discriminator_loss_does_not_reach_the_generator() {
        let device = Default::default();
        let config = tiny_config("unused", "unused");
        let state = TrainingState::<B>::new(&config, &device);
        let batch = batch(&device);

        let z = Tensor::<B, 2>::zeros([2, 4], &device);
        let fake = state.generator.forward(batch.source.clone(), z);
        let loss = discriminator_loss(
            state.d_vae.forward(batch.target.clone()),
            state.d_vae.forward(fake.detach()),
        );
        let mut grads = loss.backward();

        assert!(GradientsParams::from_module(&mut grads, &state.generator).is_empty());
        assert!(!GradientsParams::from_module(&mut grads, &state.d_vae).is_empty());
    }

    #[test]
    fn generator_gradient_policy_parses() {
        assert_eq!(
            "latent-only".parse::<GeneratorGradients>().unwrap(),
            GeneratorGradients::LatentOnly
        );
        assert_eq!(
            GeneratorGradients::Accumulate.to_string().parse::<GeneratorGradients>().unwrap(),
            GeneratorGradients::Accumulate
        );
        assert!("both".parse::<GeneratorGradients>().is_err());
    }

    #[test]
    fn rejects_zero_intervals() {
        let config = tiny_config("unused", "unused").with_sample_interval(0);
        assert!(config.validate().is_err());

        let config = tiny_config("unused", "unused").with_checkpoint_interval(Some(0));
        assert!(config.validate().is_err());
    }

    #[test]
    fn eta_is_hours_minutes_seconds() {
        assert_eq!(format_eta(Duration::from_secs(3725)), "1:02:05");
        assert_eq!(format_eta(Duration::from_secs(59)), "0:00:59");
    }

    fn write_dataset(root: &Path) {
        for (split, count) in [(Split::Train, 4), (Split::Val, 2)] {
            let dir = root.join("pairs").join(split.dir_name());
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let image = RgbImage::from_fn(32, 16, |x, y| {
                    Rgb([(x * 8) as u8, (y * 16) as u8, (i * 60) as u8])
                });
                image.save(dir.join(format!("{i}.jpg"))).unwrap();
            }
        }
    }

    #[test]
    fn train_writes_samples_and_checkpoints_then_resumes() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let data_root = data.path().to_str().unwrap();
        let output_dir = output.path().to_str().unwrap();
        let device = Default::default();

        let config = tiny_config(data_root, output_dir)
            .with_num_epochs(2)
            .with_sample_interval(2)
            .with_checkpoint_interval(Some(1));
        train::<B>(config, &device).unwrap();

        let out = output.path();
        assert!(out.join("config.json").exists());
        assert!(out.join("images/pairs/0.png").exists());
        assert!(out.join("images/pairs/2.png").exists());
        for epoch in [0, 1] {
            for stem in ["generator", "encoder", "D_VAE", "D_LR"] {
                assert!(out
                    .join(format!("saved_models/pairs/{stem}_{epoch}.mpk"))
                    .exists());
            }
        }

        let resumed = tiny_config(data_root, output_dir)
            .with_start_epoch(1)
            .with_num_epochs(2);
        train::<B>(resumed, &device).unwrap();
    }

    /// A png that keeps its header but loses most of its pixel data.
    fn write_truncated_pair(dir: &Path, name: &str) {
        let path = dir.join(name);
        RgbImage::from_fn(32, 16, |x, y| {
            Rgb([
                (x * 53 % 251) as u8,
                (y * 97 % 241) as u8,
                (x * y * 31 % 256) as u8,
            ])
        })
        .save(&path)
        .unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > 60);
        std::fs::write(&path, &bytes[..60]).unwrap();
    }

    fn generator_output(output_dir: &Path, epoch: usize) -> Vec<f32> {
        let device = Default::default();
        let config = tiny_config("unused", "unused");
        let mut state = TrainingState::<B>::new(&config, &device);
        CheckpointStore::new(output_dir, "pairs")
            .unwrap()
            .load(&mut state, epoch, &device)
            .unwrap();

        let values = |offset: f32, len: usize| {
            (0..len)
                .map(|i| (i as f32 * 0.21 + offset).cos())
                .collect::<Vec<_>>()
        };
        let source = Tensor::<TestBackend, 4>::from_data(
            TensorData::new(values(0.0, 2 * 3 * 16 * 16), [2, 3, 16, 16]),
            &device,
        );
        let z = Tensor::<TestBackend, 2>::from_data(TensorData::new(values(0.5, 8), [2, 4]), &device);

        state
            .generator
            .valid()
            .forward(source, z)
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn same_seed_runs_end_with_identical_weights() {
        let data = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let data_root = data.path().to_str().unwrap();
        let device = Default::default();

        // one shared starting point, so parameter init does not depend on the
        // backend RNG that other tests draw from concurrently
        let start = tempfile::tempdir().unwrap();
        let config = tiny_config(data_root, start.path().to_str().unwrap())
            .with_num_epochs(1)
            .with_checkpoint_interval(Some(1));
        train::<B>(config, &device).unwrap();

        let runs = [tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap()];
        for run in &runs {
            let models = run.path().join("saved_models/pairs");
            std::fs::create_dir_all(&models).unwrap();
            for stem in ["generator", "encoder", "D_VAE", "D_LR"] {
                std::fs::copy(
                    start.path().join(format!("saved_models/pairs/{stem}_0.mpk")),
                    models.join(format!("{stem}_1.mpk")),
                )
                .unwrap();
            }

            // epochs 1 and 2 both shuffle and flip the training pairs
            let config = tiny_config(data_root, run.path().to_str().unwrap())
                .with_start_epoch(1)
                .with_num_epochs(3)
                .with_checkpoint_interval(Some(2));
            train::<B>(config, &device).unwrap();
        }

        assert_eq!(
            generator_output(runs[0].path(), 2),
            generator_output(runs[1].path(), 2)
        );
    }

    #[test]
    fn undecodable_pair_aborts_training() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        write_truncated_pair(&data.path().join("pairs/train"), "4.png");
        let device = Default::default();

        let config = tiny_config(
            data.path().to_str().unwrap(),
            output.path().to_str().unwrap(),
        )
        .with_num_epochs(1);

        match train::<B>(config, &device) {
            Err(BicycleError::ShortEpoch {
                epoch,
                yielded,
                expected,
            }) => {
                assert_eq!(epoch, 0);
                assert_eq!(expected, 5);
                assert!(yielded < expected);
            }
            other => panic!("expected a short epoch, got {other:?}"),
        }
    }

    #[test]
    fn epoch_without_batches_is_an_error() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let train_dir = data.path().join("pairs/train");
        for i in 0..4 {
            std::fs::remove_file(train_dir.join(format!("{i}.jpg"))).unwrap();
            write_truncated_pair(&train_dir, &format!("{i}.png"));
        }
        let device = Default::default();

        let config = tiny_config(
            data.path().to_str().unwrap(),
            output.path().to_str().unwrap(),
        )
        .with_num_epochs(1);

        assert!(matches!(
            train::<B>(config, &device),
            Err(BicycleError::ShortEpoch { yielded: 0, .. })
        ));
    }

    #[test]
    fn unsupported_channel_count_stops_before_training() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let device = Default::default();

        let mut config = tiny_config(
            data.path().to_str().unwrap(),
            output.path().to_str().unwrap(),
        );
        config.model = config.model.clone().with_channels(4);

        assert!(matches!(
            train::<B>(config, &device),
            Err(BicycleError::InvalidConfig(_))
        ));
        assert!(!output.path().join("config.json").exists());
    }

    #[test]
    fn resuming_without_checkpoints_fails_fast() {
        let data = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_dataset(data.path());
        let device = Default::default();

        let config = tiny_config(
            data.path().to_str().unwrap(),
            output.path().to_str().unwrap(),
        )
        .with_start_epoch(5);

        assert!(matches!(
            train::<B>(config, &device),
            Err(BicycleError::MissingCheckpoint(_))
        ));
    }
}
