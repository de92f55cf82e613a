use anyhow::{anyhow, Error, Result};

use crate::lambda::InterpolationLambdas;
use crate::lrate::LrPolicy;
use crate::swm::AlignmentCapabilities;

/// Parameters of the translation model and its collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// Order of the target language model
    pub lm_order: u8,
    /// Stop probability of the geometric target length model
    pub word_penalty_p: f64,
    /// Stop probability of the geometric target phrase length model
    pub trg_seg_len_p: f64,
    /// Per-position decay of the source jump model
    pub jump_decay: f64,
    /// Decay of the source phrase length model
    pub src_seg_len_q: f64,
    /// Longest phrase extracted from aligned sentence pairs
    pub max_phrase_len: usize,
    pub lambdas: InterpolationLambdas,
    pub alignment: AlignmentCapabilities,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            lm_order: 3,
            word_penalty_p: 0.1,
            trg_seg_len_p: 0.5,
            jump_decay: 0.5,
            src_seg_len_q: 0.5,
            max_phrase_len: 7,
            lambdas: InterpolationLambdas::default(),
            alignment: AlignmentCapabilities::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnlineAlgorithm {
    /// Retrain an interlaced window of samples after each new pair
    Incremental,
    /// Stepwise EM over each full mini-batch
    MiniBatch,
    /// Retrain everything from scratch after each full batch
    BatchRetraining,
}

impl TryFrom<u32> for OnlineAlgorithm {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        match id {
            0 => Ok(OnlineAlgorithm::Incremental),
            1 => Ok(OnlineAlgorithm::MiniBatch),
            2 => Ok(OnlineAlgorithm::BatchRetraining),
            _ => Err(anyhow!("unknown online training algorithm {}", id)),
        }
    }
}

/// Parameters of online training, fixed for a run.
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineTrainingConfig {
    pub algorithm: OnlineAlgorithm,
    /// Pseudo-count of each new pair in incremental mode
    pub learn_step_size: f64,
    /// Size of a mini-batch, or of a batch for retraining
    pub minibatch_size: usize,
    pub em_iters: usize,
    /// Size of the interlaced retraining window
    pub r_par: usize,
    /// Number of samples retrained in the window
    pub e_par: usize,
    pub lr_policy: LrPolicy,
    pub default_rate: f64,
    pub liang_alpha: f64,
    pub own_par1: f64,
    pub own_par2: f64,
    pub wer_residual: f64,
}

impl Default for OnlineTrainingConfig {
    fn default() -> Self {
        OnlineTrainingConfig {
            algorithm: OnlineAlgorithm::Incremental,
            learn_step_size: 1.0,
            minibatch_size: 10,
            em_iters: 5,
            r_par: 0,
            e_par: 1,
            lr_policy: LrPolicy::Fixed,
            default_rate: 0.5,
            liang_alpha: 0.9,
            own_par1: 0.99,
            own_par2: 10.0,
            wer_residual: 0.1,
        }
    }
}

impl OnlineTrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.e_par == 0 {
            return Err(anyhow!("the number of retrained samples (E) must be positive"));
        }
        if self.minibatch_size == 0 {
            return Err(anyhow!("the mini-batch size must be positive"));
        }
        if self.learn_step_size <= 0.0 {
            return Err(anyhow!("the learn step size must be positive"));
        }
        Ok(())
    }

    /// Number of most recent samples whose expected counts the alignment
    /// models need; 0 keeps all of them.
    pub fn expval_window(&self) -> usize {
        match self.algorithm {
            OnlineAlgorithm::Incremental => self.r_par + 1,
            OnlineAlgorithm::MiniBatch => self.minibatch_size,
            OnlineAlgorithm::BatchRetraining => 0,
        }
    }
}
