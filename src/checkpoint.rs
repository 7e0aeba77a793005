use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkFileRecorder},
    tensor::backend::{AutodiffBackend, Backend},
};
use log::info;
use std::path::{Path, PathBuf};

use crate::{
    error::{BicycleError, Result},
    training::TrainingState,
};

/// Network a checkpoint file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Generator,
    Encoder,
    DiscriminatorVae,
    DiscriminatorLr,
}

impl Role {
    pub const ALL: [Role; 4] = [
        Role::Generator,
        Role::Encoder,
        Role::DiscriminatorVae,
        Role::DiscriminatorLr,
    ];

    pub fn file_stem(&self) -> &'static str {
        match self {
            Role::Generator => "generator",
            Role::Encoder => "encoder",
            Role::DiscriminatorVae => "D_VAE",
            Role::DiscriminatorLr => "D_LR",
        }
    }
}

/// Per-epoch weights of the four networks under
/// `<output_dir>/saved_models/<dataset_name>/<role>_<epoch>.mpk`.
pub struct CheckpointStore {
    dir: PathBuf,
    recorder: NamedMpkFileRecorder<FullPrecisionSettings>,
}

impl CheckpointStore {
    pub fn new<P: AsRef<Path>>(output_dir: P, dataset_name: &str) -> Result<Self> {
        let dir = output_dir.as_ref().join("saved_models").join(dataset_name);
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            dir,
            recorder: NamedMpkFileRecorder::new(),
        })
    }

    pub fn path(&self, role: Role, epoch: usize) -> PathBuf {
        self.dir.join(format!("{}_{epoch}.mpk", role.file_stem()))
    }

    pub fn save<B: AutodiffBackend>(&self, state: &TrainingState<B>, epoch: usize) -> Result<()> {
        self.save_module::<B, _>(&state.generator, Role::Generator, epoch)?;
        self.save_module::<B, _>(&state.encoder, Role::Encoder, epoch)?;
        self.save_module::<B, _>(&state.d_vae, Role::DiscriminatorVae, epoch)?;
        self.save_module::<B, _>(&state.d_lr, Role::DiscriminatorLr, epoch)?;
        info!("Saved checkpoints for epoch {epoch} to {}", self.dir.display());

        Ok(())
    }

    /// Replace the weights of `state` with the ones saved for `epoch`.
    ///
    /// All four files are checked before anything is loaded, so a missing
    /// file leaves `state` untouched.
    pub fn load<B: AutodiffBackend>(
        &self,
        state: &mut TrainingState<B>,
        epoch: usize,
        device: &B::Device,
    ) -> Result<()> {
        for role in Role::ALL {
            let path = self.path(role, epoch);
            if !path.exists() {
                return Err(BicycleError::MissingCheckpoint(path));
            }
        }

        let generator = state.generator.clone();
        state.generator = self.load_module::<B, _>(generator, Role::Generator, epoch, device)?;
        let encoder = state.encoder.clone();
        state.encoder = self.load_module::<B, _>(encoder, Role::Encoder, epoch, device)?;
        let d_vae = state.d_vae.clone();
        state.d_vae = self.load_module::<B, _>(d_vae, Role::DiscriminatorVae, epoch, device)?;
        let d_lr = state.d_lr.clone();
        state.d_lr = self.load_module::<B, _>(d_lr, Role::DiscriminatorLr, epoch, device)?;
        info!("Loaded checkpoints for epoch {epoch} from {}", self.dir.display());

        Ok(())
    }

    fn save_module<B: Backend, M: Module<B>>(
        &self,
        module: &M,
        role: Role,
        epoch: usize,
    ) -> Result<()> {
        let path = self.path(role, epoch);
        module
            .clone()
            .save_file(path.clone(), &self.recorder)
            .map_err(|source| BicycleError::Checkpoint { path, source })
    }

    fn load_module<B: Backend, M: Module<B>>(
        &self,
        module: M,
        role: Role,
        epoch: usize,
        device: &B::Device,
    ) -> Result<M> {
        let path = self.path(role, epoch);
        module
            .load_file(path.clone(), &self.recorder, device)
            .map_err(|source| BicycleError::Checkpoint { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{training::tiny_config, TestAutodiffBackend, TestBackend};
    use burn::{
        module::AutodiffModule,
        tensor::{Distribution, Tensor},
    };

    type B = TestAutodiffBackend;

    #[test]
    fn file_names_follow_role_and_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "facades").unwrap();

        assert_eq!(
            store.path(Role::DiscriminatorVae, 12),
            dir.path().join("saved_models/facades/D_VAE_12.mpk")
        );
        assert!(dir.path().join("saved_models/facades").is_dir());
    }

    #[test]
    fn save_then_load_restores_weights() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "pairs").unwrap();
        let device = Default::default();
        let config = tiny_config("unused", "unused");

        let saved = TrainingState::<B>::new(&config, &device);
        store.save(&saved, 3).unwrap();

        let mut restored = TrainingState::<B>::new(&config, &device);
        store.load(&mut restored, 3, &device).unwrap();

        let image = Tensor::<TestBackend, 4>::random(
            [2, 3, 16, 16],
            Distribution::Uniform(-1.0, 1.0),
            &device,
        );
        let z = Tensor::<TestBackend, 2>::random([2, 4], Distribution::Normal(0.0, 1.0), &device);
        let generated = |state: &TrainingState<B>| {
            state
                .generator
                .valid()
                .forward(image.clone(), z.clone())
                .into_data()
        };
        let encoded =
            |state: &TrainingState<B>| state.encoder.valid().forward(image.clone()).0.into_data();
        let scored =
            |state: &TrainingState<B>| state.d_lr.valid().forward(image.clone()).fine.into_data();

        assert_eq!(generated(&saved), generated(&restored));
        assert_eq!(encoded(&saved), encoded(&restored));
        assert_eq!(scored(&saved), scored(&restored));
    }

    #[test]
    fn missing_file_fails_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path(), "pairs").unwrap();
        let device = Default::default();
        let config = tiny_config("unused", "unused");

        let state = TrainingState::<B>::new(&config, &device);
        store.save(&state, 1).unwrap();
        std::fs::remove_file(store.path(Role::DiscriminatorLr, 1)).unwrap();

        let mut target = TrainingState::<B>::new(&config, &device);
        let result = store.load(&mut target, 1, &device);
        match result {
            Err(BicycleError::MissingCheckpoint(path)) => {
                assert_eq!(path, store.path(Role::DiscriminatorLr, 1))
            }
            other => panic!("expected a missing checkpoint, got {other:?}"),
        }
    }
}
