use anyhow::{anyhow, Context, Result};
use rustfst::fst_impls::VectorFst;
use rustfst::semirings::TropicalWeight;
use rustfst::Label;
use std::fs::File;
use std::io::prelude::*;
use std::io::BufReader;
use std::path::Path;

/// rustfst does not define this but we will
type StdVectorFst = VectorFst<TropicalWeight>;

/// Log-domain scores
pub type Score = f64;
/// Index of a word in a vocabulary (label 0 is the NULL word)
pub type WordIndex = Label;
/// 1-based position in a sentence (0 is the NULL word)
pub type PositionIndex = usize;

/// Weighted N-Gram counts
pub mod count;
/// N-Gram language model
pub mod model;
/// Word alignment matrices and their symmetrization
pub mod alignment;
/// Single-word alignment models
pub mod swm;
/// Phrase table and phrase-pair extraction
pub mod phrase;
/// Translation hypotheses
pub mod hypothesis;
/// Log-linear weights
pub mod weights;
/// Interpolation weights and their side-file
pub mod lambda;
/// Interpolation between phrase-table and single-word estimates
pub mod interp;
/// Features of the log-linear model
pub mod feature;
/// Vocabularies and models owned by a translation session
pub mod context;
/// Configuration
pub mod config;
/// Learning rates for online training
pub mod lrate;
/// Online training
pub mod trainer;
/// Downhill simplex minimization
pub mod simplex;
/// Tuning of the interpolation weights
pub mod optimize;
/// Phrase-based translation model
pub mod translation;

pub use config::{ModelConfig, OnlineAlgorithm, OnlineTrainingConfig};
pub use hypothesis::{Hypothesis, HypothesisRecord};
pub use translation::TranslationModel;
pub use weights::WeightVector;

/// Numerically stable `log(exp(a) + exp(b))`.
pub fn log_sum_exp(a: Score, b: Score) -> Score {
    if a == Score::NEG_INFINITY {
        return b;
    }
    if b == Score::NEG_INFINITY {
        return a;
    }
    let max = a.max(b);
    max + ((a - max).exp() + (b - max).exp()).ln()
}

/// Split a sentence into whitespace-separated tokens
pub fn tokenize(sentence: &str) -> Vec<String> {
    sentence.split_whitespace().map(String::from).collect()
}

fn read_lines(input: &Path) -> Result<Vec<Vec<String>>> {
    let fh = File::open(input).with_context(|| format!("cannot open {}", input.display()))?;
    BufReader::new(fh)
        .lines()
        .map(|line| Ok(tokenize(&line?)))
        .collect()
}

/// Read two line-aligned files as a list of tokenized sentence pairs
pub fn read_parallel_corpus(source: &Path, target: &Path) -> Result<Vec<(Vec<String>, Vec<String>)>> {
    let src = read_lines(source)?;
    let trg = read_lines(target)?;
    if src.len() != trg.len() {
        return Err(anyhow!(
            "mismatched corpus lengths: {} has {} lines, {} has {}",
            source.display(),
            src.len(),
            target.display(),
            trg.len()
        ));
    }
    Ok(src.into_iter().zip(trg).collect())
}
