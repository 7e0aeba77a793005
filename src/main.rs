#![recursion_limit = "256"]

use anyhow::Context;
use bicyclegan::{train, GeneratorGradients, ModelConfig, TrainingConfig};
use burn::{backend::Autodiff, optim::AdamConfig};
use clap::Parser;
use log::info;

/// Train BicycleGAN on a paired image-to-image dataset.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Epoch to start training from; anything but 0 resumes from its checkpoints
    #[arg(long, default_value_t = 0)]
    epoch: usize,

    #[arg(long, default_value_t = 200)]
    n_epochs: usize,

    #[arg(long, default_value = "edges2shoes")]
    dataset_name: String,

    #[arg(long, default_value_t = 8)]
    batch_size: usize,

    /// Adam learning rate
    #[arg(long, default_value_t = 0.0002)]
    lr: f64,

    /// Adam decay of first order momentum
    #[arg(long, default_value_t = 0.5)]
    b1: f32,

    /// Adam decay of second order momentum
    #[arg(long, default_value_t = 0.999)]
    b2: f32,

    /// Number of data loading workers
    #[arg(long, default_value_t = 8)]
    n_cpu: usize,

    #[arg(long, default_value_t = 128)]
    img_height: usize,

    #[arg(long, default_value_t = 128)]
    img_width: usize,

    #[arg(long, default_value_t = 3)]
    channels: usize,

    #[arg(long, default_value_t = 8)]
    latent_dim: usize,

    /// Batches between saved sample grids
    #[arg(long, default_value_t = 400)]
    sample_interval: usize,

    /// Epochs between model checkpoints, -1 to disable
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    checkpoint_interval: i64,

    /// Directory holding one sub-directory per dataset
    #[arg(long, default_value = "data")]
    data_root: String,

    #[arg(long, default_value = ".")]
    output_dir: String,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// `accumulate` or `latent-only`
    #[arg(long, default_value_t = GeneratorGradients::Accumulate)]
    generator_gradients: GeneratorGradients,
}

impl Args {
    fn into_config(self) -> TrainingConfig {
        let model = ModelConfig::new()
            .with_channels(self.channels)
            .with_img_height(self.img_height)
            .with_img_width(self.img_width)
            .with_latent_dim(self.latent_dim);
        let optimizer = AdamConfig::new()
            .with_beta_1(self.b1)
            .with_beta_2(self.b2);
        let checkpoint_interval = usize::try_from(self.checkpoint_interval)
            .ok()
            .filter(|interval| *interval > 0);

        TrainingConfig::new(
            model,
            optimizer,
            self.dataset_name,
            self.data_root,
            self.output_dir,
        )
        .with_start_epoch(self.epoch)
        .with_num_epochs(self.n_epochs)
        .with_batch_size(self.batch_size)
        .with_lr(self.lr)
        .with_num_workers(self.n_cpu)
        .with_sample_interval(self.sample_interval)
        .with_checkpoint_interval(checkpoint_interval)
        .with_seed(self.seed)
        .with_generator_gradients(self.generator_gradients)
    }
}

#[cfg(not(feature = "ndarray"))]
type MyBackend = burn::backend::Wgpu<f32>;
#[cfg(feature = "ndarray")]
type MyBackend = burn::backend::NdArray<f32>;

type MyAutodiffBackend = Autodiff<MyBackend>;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    info!("{args:?}");

    let config = args.into_config();
    let device = Default::default();
    train::<MyAutodiffBackend>(config, &device).context("training failed")?;

    Ok(())
}
