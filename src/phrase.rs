//! Phrase table and consistent phrase-pair extraction.

use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::alignment::AlignmentMatrix;
use crate::{Score, WordIndex};

/// Probability given to phrase pairs the table has never seen
pub const PHRASE_PROB_SMOOTH: f64 = 1e-7;
/// Counts at or below this are treated as zero
const MIN_COUNT: f64 = 1e-9;

/// A source phrase and the target phrase it translates into.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhrasePair {
    pub src: Vec<WordIndex>,
    pub trg: Vec<WordIndex>,
}

/// Weighted counts of phrase pairs with their source and target
/// marginals. Counts can be decremented; a pair whose count drops to
/// zero disappears from the table.
#[derive(Debug, Clone, Default)]
pub struct PhraseTable {
    pairs: HashMap<Vec<WordIndex>, HashMap<Vec<WordIndex>, f64>>,
    src_counts: HashMap<Vec<WordIndex>, f64>,
    trg_counts: HashMap<Vec<WordIndex>, f64>,
}

fn add_marginal(counts: &mut HashMap<Vec<WordIndex>, f64>, key: &[WordIndex], delta: f64) {
    let entry = counts.entry(key.to_vec()).or_insert(0.0);
    *entry += delta;
    if *entry <= MIN_COUNT {
        counts.remove(key);
    }
}

impl PhraseTable {
    pub fn new() -> Self {
        PhraseTable::default()
    }

    /// Add `delta` (possibly negative) to the count of a phrase pair.
    pub fn incr_count(&mut self, src: &[WordIndex], trg: &[WordIndex], delta: f64) {
        let targets = self.pairs.entry(src.to_vec()).or_default();
        let entry = targets.entry(trg.to_vec()).or_insert(0.0);
        let old = *entry;
        let new = old + delta;
        // marginals only move by what the pair actually held
        let applied = if new <= MIN_COUNT {
            targets.remove(trg);
            -old
        } else {
            *entry = new;
            delta
        };
        if targets.is_empty() {
            self.pairs.remove(src);
        }
        if applied != 0.0 {
            add_marginal(&mut self.src_counts, src, applied);
            add_marginal(&mut self.trg_counts, trg, applied);
        }
    }

    pub fn add_pairs(&mut self, pairs: &[PhrasePair], weight: f64) {
        for pair in pairs {
            self.incr_count(&pair.src, &pair.trg, weight);
        }
    }

    pub fn count(&self, src: &[WordIndex], trg: &[WordIndex]) -> f64 {
        self.pairs
            .get(src)
            .and_then(|targets| targets.get(trg))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn src_count(&self, src: &[WordIndex]) -> f64 {
        self.src_counts.get(src).copied().unwrap_or(0.0)
    }

    pub fn trg_count(&self, trg: &[WordIndex]) -> f64 {
        self.trg_counts.get(trg).copied().unwrap_or(0.0)
    }

    /// log p(trg | src)
    pub fn log_p_trg_given_src(&self, src: &[WordIndex], trg: &[WordIndex]) -> Score {
        conditional(self.count(src, trg), self.src_count(src))
    }

    /// log p(src | trg)
    pub fn log_p_src_given_trg(&self, src: &[WordIndex], trg: &[WordIndex]) -> Score {
        conditional(self.count(src, trg), self.trg_count(trg))
    }

    /// Target phrases seen with `src`, most frequent first.
    pub fn translations(&self, src: &[WordIndex]) -> Vec<(Vec<WordIndex>, f64)> {
        let mut options: Vec<(Vec<WordIndex>, f64)> = self
            .pairs
            .get(src)
            .map(|targets| targets.iter().map(|(t, c)| (t.clone(), *c)).collect())
            .unwrap_or_default();
        options.sort_by_key(|(t, c)| (Reverse(OrderedFloat(*c)), t.clone()));
        options
    }

    pub fn num_pairs(&self) -> usize {
        self.pairs.values().map(HashMap::len).sum()
    }

    /// Sum of all pair counts.
    pub fn total_count(&self) -> f64 {
        self.src_counts.values().sum()
    }

    pub fn clear(&mut self) {
        self.pairs.clear();
        self.src_counts.clear();
        self.trg_counts.clear();
    }
}

fn conditional(joint: f64, marginal: f64) -> Score {
    if joint <= 0.0 || marginal <= 0.0 {
        PHRASE_PROB_SMOOTH.ln()
    } else {
        (joint / marginal).ln()
    }
}

/// Extract every phrase pair consistent with `alignment`, whose rows are
/// the words of `trg` and columns the words of `src`. Source phrases are
/// extended over unaligned boundary words. Both sides are limited to
/// `max_len` words.
pub fn extract_consistent_pairs(
    src: &[WordIndex],
    trg: &[WordIndex],
    alignment: &AlignmentMatrix,
    max_len: usize,
) -> Vec<PhrasePair> {
    let mut pairs = Vec::new();
    if src.is_empty() || trg.is_empty() || max_len == 0 {
        return pairs;
    }
    for t_start in 0..trg.len() {
        for t_end in t_start..trg.len().min(t_start + max_len) {
            let mut span: Option<(usize, usize)> = None;
            for t in t_start..=t_end {
                for s in 0..src.len() {
                    if alignment.get(t, s) {
                        span = Some(match span {
                            Some((lo, hi)) => (lo.min(s), hi.max(s)),
                            None => (s, s),
                        });
                    }
                }
            }
            let Some((s_min, s_max)) = span else {
                continue;
            };
            if s_max - s_min + 1 > max_len {
                continue;
            }
            let consistent = (s_min..=s_max).all(|s| {
                (0..trg.len()).all(|t| !alignment.get(t, s) || (t_start..=t_end).contains(&t))
            });
            if !consistent {
                continue;
            }
            let mut s_start = s_min;
            loop {
                let mut s_end = s_max;
                loop {
                    pairs.push(PhrasePair {
                        src: src[s_start..=s_end].to_vec(),
                        trg: trg[t_start..=t_end].to_vec(),
                    });
                    s_end += 1;
                    if s_end >= src.len() || alignment.is_col_aligned(s_end) || s_end - s_start + 1 > max_len {
                        break;
                    }
                }
                if s_start == 0 || alignment.is_col_aligned(s_start - 1) || s_max - s_start + 2 > max_len {
                    break;
                }
                s_start -= 1;
            }
        }
    }
    pairs
}
