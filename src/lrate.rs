use anyhow::{anyhow, Error, Result};

use crate::config::OnlineTrainingConfig;

/// Bounds of the WER-adaptive rate
const MIN_WER_RATE: f64 = 0.001;
const MAX_WER_RATE: f64 = 0.999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LrPolicy {
    /// Constant rate
    Fixed,
    /// `1 / (step + 2)^alpha`
    Liang,
    /// `par1 / (1 + step / par2)`
    Own,
    /// Error rate of the system output on the block, minus a residual
    Wer,
}

impl TryFrom<u32> for LrPolicy {
    type Error = Error;

    fn try_from(id: u32) -> Result<Self> {
        match id {
            0 => Ok(LrPolicy::Fixed),
            1 => Ok(LrPolicy::Liang),
            2 => Ok(LrPolicy::Own),
            3 => Ok(LrPolicy::Wer),
            _ => Err(anyhow!("unknown learning rate policy {}", id)),
        }
    }
}

/// Number of insertions, deletions and substitutions turning `reference`
/// into `hypothesis`.
pub fn edit_ops<T: PartialEq>(reference: &[T], hypothesis: &[T]) -> usize {
    let mut prev: Vec<usize> = (0..=hypothesis.len()).collect();
    let mut curr = vec![0; hypothesis.len() + 1];
    for (i, r) in reference.iter().enumerate() {
        curr[0] = i + 1;
        for (j, h) in hypothesis.iter().enumerate() {
            let sub = prev[j] + usize::from(r != h);
            curr[j + 1] = sub.min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[hypothesis.len()]
}

fn wer_rate(references: &[Vec<String>], outputs: &[Vec<String>], residual: f64) -> f64 {
    let mut ops = 0;
    let mut words = 0;
    for (reference, output) in references.iter().zip(outputs) {
        ops += edit_ops(reference, output);
        words += reference.len();
    }
    let wer = if words == 0 { 0.0 } else { ops as f64 / words as f64 };
    (wer - residual).clamp(MIN_WER_RATE, MAX_WER_RATE)
}

/// Learning rate for training step `step`, given the references and
/// system outputs of the current block.
pub fn learning_rate(
    config: &OnlineTrainingConfig,
    step: usize,
    references: &[Vec<String>],
    outputs: &[Vec<String>],
) -> f64 {
    let rate = match config.lr_policy {
        LrPolicy::Fixed => config.default_rate,
        LrPolicy::Liang => 1.0 / ((step + 2) as f64).powf(config.liang_alpha),
        LrPolicy::Own => config.own_par1 / (1.0 + step as f64 / config.own_par2),
        LrPolicy::Wer => wer_rate(references, outputs, config.wer_residual),
    };
    if rate >= 1.0 {
        log::warn!("learning rate {} at step {} is not below 1", rate, step);
    }
    rate
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize;

    fn config(policy: LrPolicy) -> OnlineTrainingConfig {
        OnlineTrainingConfig {
            lr_policy: policy,
            ..Default::default()
        }
    }

    #[test]
    fn it_counts_edit_operations() {
        assert_eq!(edit_ops(&tokenize("a b c"), &tokenize("a b c")), 0);
        assert_eq!(edit_ops(&tokenize("a b c"), &tokenize("a x c d")), 2);
        assert_eq!(edit_ops(&tokenize("a b"), &[]), 2);
        assert_eq!(edit_ops::<String>(&[], &tokenize("a b")), 2);
    }

    #[test]
    fn it_keeps_the_fixed_rate() {
        let config = config(LrPolicy::Fixed);
        for step in [0, 1, 10, 1000] {
            assert_eq!(learning_rate(&config, step, &[], &[]), 0.5);
        }
    }

    #[test]
    fn it_decays_rates() {
        let liang = config(LrPolicy::Liang);
        assert!((learning_rate(&liang, 0, &[], &[]) - 2f64.powf(-0.9)).abs() < 1e-12);
        assert!(learning_rate(&liang, 5, &[], &[]) < learning_rate(&liang, 4, &[], &[]));
        let own = config(LrPolicy::Own);
        assert!((learning_rate(&own, 0, &[], &[]) - 0.99).abs() < 1e-12);
        assert!((learning_rate(&own, 10, &[], &[]) - 0.495).abs() < 1e-12);
    }

    #[test]
    fn it_bounds_the_wer_rate() {
        let wer = config(LrPolicy::Wer);
        let refs = vec![tokenize("the green house"), tokenize("a flower")];
        let perfect = refs.clone();
        let awful = vec![tokenize("x y z w v u"), tokenize("p q r s")];
        let partial = vec![tokenize("the house"), tokenize("a flower")];
        assert_eq!(learning_rate(&wer, 0, &refs, &perfect), 0.001);
        assert_eq!(learning_rate(&wer, 0, &refs, &awful), 0.999);
        assert!((learning_rate(&wer, 0, &refs, &partial) - 0.1).abs() < 1e-12);
        assert_eq!(learning_rate(&wer, 0, &[], &[]), 0.001);
    }

    #[test]
    fn it_parses_policy_ids() {
        assert_eq!(LrPolicy::try_from(3).unwrap(), LrPolicy::Wer);
        assert!(LrPolicy::try_from(4).is_err());
    }
}
