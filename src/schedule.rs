use std::fmt;

use crate::error::{BicycleError, Result};

/// One of the four optimizer steps applied to every batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    Encoder,
    Generator,
    DiscriminatorVae,
    DiscriminatorLr,
}

impl UpdatePhase {
    /// The only admissible order within a batch.
    pub const ORDER: [UpdatePhase; 4] = [
        UpdatePhase::Encoder,
        UpdatePhase::Generator,
        UpdatePhase::DiscriminatorVae,
        UpdatePhase::DiscriminatorLr,
    ];
}

impl fmt::Display for UpdatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdatePhase::Encoder => "encoder",
            UpdatePhase::Generator => "generator",
            UpdatePhase::DiscriminatorVae => "D_VAE",
            UpdatePhase::DiscriminatorLr => "D_LR",
        };
        f.write_str(name)
    }
}

/// Tracks the optimizer steps of a single batch and refuses any step that
/// does not follow [`UpdatePhase::ORDER`].
#[derive(Debug, Default)]
pub struct UpdateSchedule {
    completed: Vec<UpdatePhase>,
}

impl UpdateSchedule {
    pub fn new() -> Self {
        Self {
            completed: Vec::with_capacity(UpdatePhase::ORDER.len()),
        }
    }

    pub fn expected(&self) -> Option<UpdatePhase> {
        UpdatePhase::ORDER.get(self.completed.len()).copied()
    }

    /// Record `phase` as the next step. Must be called right before the
    /// matching optimizer step.
    pub fn advance(&mut self, phase: UpdatePhase) -> Result<()> {
        let expected = self.expected();
        if expected != Some(phase) {
            return Err(BicycleError::OutOfOrder {
                expected,
                got: phase,
            });
        }
        self.completed.push(phase);
        Ok(())
    }

    /// Close the batch, returning the phases in the order they ran.
    pub fn finish(self) -> Result<Vec<UpdatePhase>> {
        if self.completed.len() != UpdatePhase::ORDER.len() {
            return Err(BicycleError::IncompleteBatch {
                completed: self.completed.len(),
            });
        }
        Ok(self.completed)
    }
}
