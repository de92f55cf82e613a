use anyhow::{anyhow, Result};
use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::alignment::AlignmentMatrix;
use crate::{log_sum_exp, Score, WordIndex};

/// The NULL word of both vocabularies
pub const NULL_WORD: WordIndex = 0;

/// Additive smoothing of lexical counts
const LEX_ALPHA: f64 = 0.01;
/// Expected counts below this are dropped
const MIN_COUNT: f64 = 1e-9;
/// Smallest mean of the sentence length distribution
const MIN_LENGTH_MEAN: f64 = 0.1;

/// Optional abilities of an alignment model, fixed when it is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentCapabilities {
    /// Accepts a learning rate interpolating old and new statistics
    pub stepwise: bool,
    /// Can run a full EM pass over a range of sentence pairs at once
    pub efficient_batch: bool,
}

impl Default for AlignmentCapabilities {
    fn default() -> Self {
        AlignmentCapabilities {
            stepwise: true,
            efficient_batch: true,
        }
    }
}

/// Single-word alignment model generating a target sentence from a
/// source sentence. Sentence pairs are stored by the model and
/// addressed by their insertion index.
pub trait AlignmentModel {
    fn capabilities(&self) -> AlignmentCapabilities;

    /// Make room for vocabularies of the given sizes.
    fn set_vocab_sizes(&mut self, src_size: usize, trg_size: usize);

    /// Store a sentence pair; returns the range of indices it occupies.
    fn add_sentence_pair(&mut self, src: &[WordIndex], trg: &[WordIndex], count: f64) -> (usize, usize);

    fn num_sentence_pairs(&self) -> usize;

    fn nth_sentence_pair(&self, n: usize) -> Option<(&[WordIndex], &[WordIndex])>;

    /// One incremental EM step over the inclusive range of sentence pairs.
    fn train_sentence_pair_range(&mut self, range: (usize, usize)) -> Result<()>;

    /// Only meaningful when `capabilities().stepwise` holds.
    fn set_learning_rate(&mut self, _rate: f64) {}

    /// Only available when `capabilities().efficient_batch` holds.
    fn efficient_batch_training(&mut self, _range: (usize, usize)) -> Result<()> {
        Err(anyhow!("efficient batch training is not supported by this model"))
    }

    /// Limit the number of sentence pairs whose expected counts are kept.
    fn set_expval_max_size(&mut self, _size: usize) {}

    /// Number of sentence pairs whose expected counts are kept.
    fn num_expvals(&self) -> usize {
        0
    }

    /// Best alignment, `src.len()` rows by `trg.len()` columns.
    fn viterbi_alignment(&self, src: &[WordIndex], trg: &[WordIndex]) -> AlignmentMatrix;

    /// Log-probability of the target phrase given the source phrase.
    fn phrase_log_prob(&self, src: &[WordIndex], trg: &[WordIndex]) -> Score;

    /// Log-probability of a target length given a source length.
    fn sent_len_log_prob(&self, src_len: usize, trg_len: usize) -> Score;

    /// Log-probability of a target length of at least `trg_len`.
    fn sum_sent_len_log_prob(&self, src_len: usize, trg_len: usize) -> Score;

    /// Forget every sentence pair and parameter.
    fn clear(&mut self);
}

#[derive(Debug, Clone)]
struct SentencePair {
    src: Vec<WordIndex>,
    trg: Vec<WordIndex>,
    count: f64,
}

/// Expected counts of `(source word, target word)` links
type ExpectedCounts = Vec<((WordIndex, WordIndex), f64)>;

/// IBM model 1 trained with incremental or stepwise EM, plus a Poisson
/// sentence length model.
#[derive(Debug, Clone)]
pub struct Ibm1Model {
    capabilities: AlignmentCapabilities,
    pairs: Vec<SentencePair>,
    /// Lexical counts, indexed by (source, target)
    lex: HashMap<(WordIndex, WordIndex), f64>,
    /// Lexical counts summed over targets
    lex_totals: HashMap<WordIndex, f64>,
    /// Expected counts last contributed by each sentence pair
    expvals: HashMap<usize, ExpectedCounts>,
    /// 0 keeps every sentence pair
    expval_max_size: usize,
    learning_rate: Option<f64>,
    src_vocab_size: usize,
    trg_vocab_size: usize,
    src_len_total: f64,
    trg_len_total: f64,
}

impl Default for Ibm1Model {
    fn default() -> Self {
        Ibm1Model::new(AlignmentCapabilities::default())
    }
}

impl Ibm1Model {
    pub fn new(capabilities: AlignmentCapabilities) -> Self {
        Ibm1Model {
            capabilities,
            pairs: Vec::new(),
            lex: HashMap::new(),
            lex_totals: HashMap::new(),
            expvals: HashMap::new(),
            expval_max_size: 0,
            learning_rate: None,
            src_vocab_size: 0,
            trg_vocab_size: 0,
            src_len_total: 0.0,
            trg_len_total: 0.0,
        }
    }

    /// Smoothed t(trg | src).
    pub fn trans_prob(&self, src: WordIndex, trg: WordIndex) -> f64 {
        let count = self.lex.get(&(src, trg)).copied().unwrap_or(0.0);
        let total = self.lex_totals.get(&src).copied().unwrap_or(0.0);
        let vocab = self.trg_vocab_size.max(1) as f64;
        (count + LEX_ALPHA) / (total + LEX_ALPHA * vocab)
    }

    /// Sum of all lexical counts.
    pub fn total_count(&self) -> f64 {
        self.lex_totals.values().sum()
    }

    fn check_range(&self, (first, last): (usize, usize)) -> Result<()> {
        if first > last || last >= self.pairs.len() {
            return Err(anyhow!(
                "invalid sentence pair range {}-{} ({} pairs stored)",
                first,
                last,
                self.pairs.len()
            ));
        }
        Ok(())
    }

    fn expected_counts(&self, n: usize) -> ExpectedCounts {
        let pair = &self.pairs[n];
        let mut counts = Vec::with_capacity((pair.src.len() + 1) * pair.trg.len());
        for &t in &pair.trg {
            let probs: Vec<(WordIndex, f64)> = std::iter::once(NULL_WORD)
                .chain(pair.src.iter().copied())
                .map(|s| (s, self.trans_prob(s, t)))
                .collect();
            let z: f64 = probs.iter().map(|(_, p)| p).sum();
            for (s, p) in probs {
                counts.push(((s, t), pair.count * p / z));
            }
        }
        counts
    }

    fn apply(&mut self, counts: &ExpectedCounts, factor: f64) {
        for &(key, c) in counts {
            let entry = self.lex.entry(key).or_insert(0.0);
            *entry += factor * c;
            if *entry < MIN_COUNT {
                self.lex.remove(&key);
            }
            let total = self.lex_totals.entry(key.0).or_insert(0.0);
            *total += factor * c;
            if *total < MIN_COUNT {
                self.lex_totals.remove(&key.0);
            }
        }
    }

    fn scale(&mut self, factor: f64) {
        for count in self.lex.values_mut() {
            *count *= factor;
        }
        for total in self.lex_totals.values_mut() {
            *total *= factor;
        }
        self.lex.retain(|_, c| *c >= MIN_COUNT);
        self.lex_totals.retain(|_, c| *c >= MIN_COUNT);
    }

    fn store_expvals(&mut self, n: usize, counts: ExpectedCounts) {
        self.expvals.insert(n, counts);
        if self.expval_max_size > 0 {
            let max = self.expval_max_size;
            self.expvals.retain(|&k, _| k + max > n);
        }
    }

    fn length_mean(&self, src_len: usize) -> f64 {
        let ratio = (self.trg_len_total + 1.0) / (self.src_len_total + 1.0);
        (ratio * src_len as f64).max(MIN_LENGTH_MEAN)
    }
}

fn poisson_log_pmf(lambda: f64, k: usize) -> f64 {
    let log_fact: f64 = (2..=k).map(|i| (i as f64).ln()).sum();
    -lambda + k as f64 * lambda.ln() - log_fact
}

impl AlignmentModel for Ibm1Model {
    fn capabilities(&self) -> AlignmentCapabilities {
        self.capabilities
    }

    fn set_vocab_sizes(&mut self, src_size: usize, trg_size: usize) {
        self.src_vocab_size = self.src_vocab_size.max(src_size);
        self.trg_vocab_size = self.trg_vocab_size.max(trg_size);
    }

    fn add_sentence_pair(&mut self, src: &[WordIndex], trg: &[WordIndex], count: f64) -> (usize, usize) {
        self.pairs.push(SentencePair {
            src: src.to_vec(),
            trg: trg.to_vec(),
            count,
        });
        self.src_len_total += count * src.len() as f64;
        self.trg_len_total += count * trg.len() as f64;
        let n = self.pairs.len() - 1;
        (n, n)
    }

    fn num_sentence_pairs(&self) -> usize {
        self.pairs.len()
    }

    fn nth_sentence_pair(&self, n: usize) -> Option<(&[WordIndex], &[WordIndex])> {
        self.pairs.get(n).map(|p| (p.src.as_slice(), p.trg.as_slice()))
    }

    fn train_sentence_pair_range(&mut self, range: (usize, usize)) -> Result<()> {
        self.check_range(range)?;
        let (first, last) = range;
        match self.learning_rate {
            Some(nu) => {
                let mut batch = ExpectedCounts::new();
                for n in first..=last {
                    let counts = self.expected_counts(n);
                    batch.extend(counts.iter().copied());
                    self.store_expvals(n, counts);
                }
                self.scale(1.0 - nu);
                self.apply(&batch, nu);
            }
            None => {
                for n in first..=last {
                    let counts = self.expected_counts(n);
                    if let Some(old) = self.expvals.remove(&n) {
                        self.apply(&old, -1.0);
                    }
                    self.apply(&counts, 1.0);
                    self.store_expvals(n, counts);
                }
            }
        }
        Ok(())
    }

    fn set_learning_rate(&mut self, rate: f64) {
        if self.capabilities.stepwise {
            self.learning_rate = Some(rate);
        }
    }

    fn efficient_batch_training(&mut self, range: (usize, usize)) -> Result<()> {
        if !self.capabilities.efficient_batch {
            return Err(anyhow!("efficient batch training is not supported by this model"));
        }
        self.check_range(range)?;
        let (first, last) = range;
        let batch: Vec<(usize, ExpectedCounts)> =
            (first..=last).map(|n| (n, self.expected_counts(n))).collect();
        self.lex.clear();
        self.lex_totals.clear();
        self.expvals.clear();
        for (n, counts) in batch {
            self.apply(&counts, 1.0);
            self.store_expvals(n, counts);
        }
        Ok(())
    }

    fn set_expval_max_size(&mut self, size: usize) {
        self.expval_max_size = size;
    }

    fn num_expvals(&self) -> usize {
        self.expvals.len()
    }

    fn viterbi_alignment(&self, src: &[WordIndex], trg: &[WordIndex]) -> AlignmentMatrix {
        let mut matrix = AlignmentMatrix::new(src.len(), trg.len());
        for (j, &t) in trg.iter().enumerate() {
            // ties go to the leftmost source word
            let best = src
                .iter()
                .enumerate()
                .map(|(i, &s)| (i, self.trans_prob(s, t)))
                .max_by_key(|&(i, p)| (OrderedFloat(p), Reverse(i)));
            if let Some((i, p)) = best {
                if p >= self.trans_prob(NULL_WORD, t) {
                    matrix.set(i, j);
                }
            }
        }
        matrix
    }

    fn phrase_log_prob(&self, src: &[WordIndex], trg: &[WordIndex]) -> Score {
        let norm = (src.len() + 1) as f64;
        trg.iter()
            .map(|&t| {
                let sum: f64 = std::iter::once(NULL_WORD)
                    .chain(src.iter().copied())
                    .map(|s| self.trans_prob(s, t))
                    .sum();
                (sum / norm).ln()
            })
            .sum()
    }

    fn sent_len_log_prob(&self, src_len: usize, trg_len: usize) -> Score {
        poisson_log_pmf(self.length_mean(src_len), trg_len)
    }

    fn sum_sent_len_log_prob(&self, src_len: usize, trg_len: usize) -> Score {
        if trg_len == 0 {
            return 0.0;
        }
        let lambda = self.length_mean(src_len);
        let last = trg_len + 100 + (10.0 * lambda) as usize;
        let mut log_p = poisson_log_pmf(lambda, trg_len);
        let mut tail = log_p;
        for k in trg_len + 1..=last {
            log_p += lambda.ln() - (k as f64).ln();
            tail = log_sum_exp(tail, log_p);
        }
        tail
    }

    fn clear(&mut self) {
        self.pairs.clear();
        self.lex.clear();
        self.lex_totals.clear();
        self.expvals.clear();
        self.learning_rate = None;
        self.src_len_total = 0.0;
        self.trg_len_total = 0.0;
    }
}
