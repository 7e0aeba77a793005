use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

use crate::schedule::UpdatePhase;

#[derive(Error, Debug)]
pub enum BicycleError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("checkpoint not found: {}", .0.display())]
    MissingCheckpoint(PathBuf),

    #[error("checkpoint {} could not be read or written: {source}", .path.display())]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: RecorderError,
    },

    #[error("{got} update issued while expecting {}", expected_label(.expected))]
    OutOfOrder {
        expected: Option<UpdatePhase>,
        got: UpdatePhase,
    },

    #[error("batch ended after {completed} of 4 updates")]
    IncompleteBatch { completed: usize },

    #[error("epoch {epoch} yielded {yielded} of {expected} training pairs")]
    ShortEpoch {
        epoch: usize,
        yielded: usize,
        expected: usize,
    },

    #[error("no images found under {}", .0.display())]
    EmptyDataset(PathBuf),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tensor data error: {0}")]
    Data(String),
}

pub type Result<T> = std::result::Result<T, BicycleError>;

fn expected_label(expected: &Option<UpdatePhase>) -> String {
    match expected {
        Some(phase) => phase.to_string(),
        None => "end of batch".to_string(),
    }
}
