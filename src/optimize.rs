//! Tuning of the interpolation lambdas on a development corpus.

use anyhow::{anyhow, Result};
use std::path::Path;

use crate::context::ModelSet;
use crate::lambda::InterpolationLambdas;
use crate::phrase::PhrasePair;
use crate::read_parallel_corpus;
use crate::simplex::{Simplex, SimplexOutcome};
use crate::Score;

/// Phrase pairs extracted from a development corpus, without growing
/// the vocabularies.
pub fn dev_phrase_pairs(models: &ModelSet, source: &Path, target: &Path) -> Result<Vec<PhrasePair>> {
    let corpus = read_parallel_corpus(source, target)?;
    let mut pairs = Vec::new();
    for (src, trg) in &corpus {
        if src.is_empty() || trg.is_empty() {
            continue;
        }
        let src_ids = models.src_labels(src);
        let trg_ids = models.trg_labels(trg);
        pairs.extend(models.extract_consistent_phrase_pairs(&src_ids, &trg_ids)?);
    }
    Ok(pairs)
}

/// Negative mean log-likelihood of `pairs` in both directions, using
/// unweighted interpolated scores.
pub fn perplexity(models: &ModelSet, pairs: &[PhrasePair]) -> Score {
    let interp = models.interpolator();
    let total: Score = pairs
        .iter()
        .map(|pair| {
            let direct: Score = interp.trg_given_src(&pair.src, &pair.trg).iter().sum();
            let inverse: Score = interp.src_given_trg(&pair.src, &pair.trg).iter().sum();
            direct + inverse
        })
        .sum();
    -total / pairs.len() as f64
}

fn feasible(x: &[f64]) -> bool {
    x.iter().all(|v| (0.0..1.0).contains(v))
}

/// Minimize the perplexity of `pairs` over both lambdas. Lambdas are
/// left untouched unless the search converges.
pub fn optimize_lambdas(models: &mut ModelSet, pairs: &[PhrasePair], simplex: &Simplex) -> Result<()> {
    if pairs.is_empty() {
        return Err(anyhow!("no phrase pairs to tune the interpolation weights on"));
    }
    let initial = models.lambdas;
    let start = [initial.direct, initial.inverse];
    let outcome = simplex.minimize(&start, |x| {
        models.lambdas = InterpolationLambdas::new(x[0], x[1]);
        if !feasible(x) {
            return Ok(f64::MAX);
        }
        let value = perplexity(models, pairs);
        log::debug!("lambdas {} {}: perplexity {}", x[0], x[1], value);
        Ok(value)
    });
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            models.lambdas = initial;
            return Err(e);
        }
    };
    match outcome {
        SimplexOutcome::Converged { point, value, evals } if value < f64::MAX => {
            models.lambdas = InterpolationLambdas::new(point[0], point[1]);
            log::debug!(
                "lambdas {} {} converged after {} evaluations (perplexity {}, tolerance {})",
                point[0],
                point[1],
                evals,
                value,
                simplex.ftol
            );
        }
        SimplexOutcome::Converged { .. } => {
            log::warn!("no feasible interpolation weights found, keeping the initial ones");
            models.lambdas = initial;
        }
        SimplexOutcome::MaxEvaluations { evals, .. } => {
            log::warn!(
                "interpolation weight tuning stopped after {} evaluations, keeping the initial weights",
                evals
            );
            models.lambdas = initial;
        }
    }
    Ok(())
}

/// Retune both lambdas on a development corpus.
pub fn update_lin_interp_weights(models: &mut ModelSet, source: &Path, target: &Path) -> Result<()> {
    let pairs = dev_phrase_pairs(models, source, target)?;
    optimize_lambdas(models, &pairs, &Simplex::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelConfig, OnlineTrainingConfig};
    use crate::trainer::OnlineTrainer;
    use std::path::PathBuf;

    fn trained() -> ModelSet {
        let mut models = ModelSet::new(ModelConfig::default());
        let mut trainer = OnlineTrainer::new(OnlineTrainingConfig::default()).unwrap();
        let corpus = read_parallel_corpus(
            &PathBuf::from("testdata/train.src"),
            &PathBuf::from("testdata/train.trg"),
        )
        .unwrap();
        for (src, trg) in &corpus {
            trainer.train_sent_pair(&mut models, src, trg, &[]).unwrap();
        }
        models
    }

    fn dev(models: &ModelSet) -> Vec<PhrasePair> {
        dev_phrase_pairs(models, &PathBuf::from("testdata/dev.src"), &PathBuf::from("testdata/dev.trg")).unwrap()
    }

    #[test]
    fn it_lowers_perplexity() {
        let mut models = trained();
        let pairs = dev(&models);
        assert!(!pairs.is_empty());
        let before = perplexity(&models, &pairs);
        update_lin_interp_weights(
            &mut models,
            &PathBuf::from("testdata/dev.src"),
            &PathBuf::from("testdata/dev.trg"),
        )
        .unwrap();
        assert!(feasible(&[models.lambdas.direct, models.lambdas.inverse]));
        assert!(perplexity(&models, &pairs) <= before + 1e-9);
    }

    #[test]
    fn it_restores_lambdas_at_the_evaluation_cap() {
        let mut models = trained();
        let pairs = dev(&models);
        let simplex = Simplex {
            max_evaluations: 4,
            ..Default::default()
        };
        optimize_lambdas(&mut models, &pairs, &simplex).unwrap();
        assert_eq!(models.lambdas, InterpolationLambdas::default());
    }

    #[test]
    fn it_needs_phrase_pairs() {
        let mut models = ModelSet::new(ModelConfig::default());
        assert!(optimize_lambdas(&mut models, &[], &Simplex::default()).is_err());
        let missing = update_lin_interp_weights(
            &mut models,
            &PathBuf::from("testdata/missing.src"),
            &PathBuf::from("testdata/dev.trg"),
        );
        assert!(missing.is_err());
    }
}
