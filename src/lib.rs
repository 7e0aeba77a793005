pub mod checkpoint;
pub mod data;
pub mod error;
pub mod latent;
pub mod loss;
pub mod model;
pub mod sampling;
pub mod schedule;
pub mod training;
pub mod utils;

pub use error::{BicycleError, Result};
pub use model::ModelConfig;
pub use training::{train, GeneratorGradients, TrainingConfig, TrainingState};

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;
#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;
