use anyhow::Result;
use rustfst::prelude::*;
use std::path::Path;

use crate::count::NGramCounter;
use crate::{Score, StdVectorFst, WordIndex};

/// History state of the language model: a state of the count graph.
pub type LmState = StateId;

/// Floor for probabilities that would otherwise be zero
const KFLOATEPS: f64 = 0.000001;

/// Interpolated (Witten-Bell) N-Gram language model over weighted counts.
///
/// Probabilities are computed on demand from the counts, so the model
/// can be trained sentence by sentence and queried at any point.
#[derive(Debug, Clone)]
pub struct NGramModel {
    /// Underlying counts
    counter: NGramCounter,
}

impl NGramModel {
    pub fn new(order: u8) -> Self {
        Self {
            counter: NGramCounter::new(order),
        }
    }

    pub fn order(&self) -> u8 {
        self.counter.order
    }

    pub fn counter(&self) -> &NGramCounter {
        &self.counter
    }

    pub fn clear(&mut self) {
        self.counter.clear();
    }

    /// State for the begin of a sentence.
    pub fn begin_state(&self) -> LmState {
        self.counter.initial()
    }

    /// Add a sentence to the counts, `weight` being its pseudo-count.
    pub fn train_sentence(&mut self, sentence: &[WordIndex], weight: f64) -> Result<()> {
        self.counter.count_sentence(sentence, weight)
    }

    pub fn train_sentences(&mut self, sentences: &[Vec<WordIndex>], weight: f64) -> Result<()> {
        for sentence in sentences {
            self.train_sentence(sentence, weight)?;
        }
        Ok(())
    }

    /// Vocabulary size used by the uniform distribution at the bottom of
    /// the interpolation (seen types plus one for unknown words).
    fn vocab_size(&self) -> f64 {
        self.counter.state_types(self.counter.backoff()) as f64 + 1.0
    }

    /// Probability of `label` (`None` for the end of sentence) after the
    /// history of `state`.
    fn prob(&self, state: LmState, label: Option<WordIndex>) -> f64 {
        let lower = match self.counter.backoff_of(state) {
            Some(bo) => self.prob(bo, label),
            None => 1.0 / self.vocab_size(),
        };
        let total = self.counter.state_total(state);
        if total <= 0.0 {
            return lower;
        }
        let types = self.counter.state_types(state) as f64;
        let count = match label {
            Some(label) => self.counter.arc_count(state, label),
            None => self.counter.final_count(state),
        };
        (count + types * lower) / (total + types)
    }

    /// Log-probability of `label` after `state`.
    pub fn word_score(&self, state: LmState, label: WordIndex) -> Score {
        self.prob(state, Some(label)).max(KFLOATEPS).ln()
    }

    /// Log-probability of a phrase given the history `state`, together
    /// with the history reached at the end of the phrase. `state` itself
    /// is left untouched.
    pub fn phrase_score(&self, phrase: &[WordIndex], state: LmState) -> (Score, LmState) {
        let mut score = 0.0;
        let mut state = state;
        for &label in phrase {
            score += self.word_score(state, label);
            state = self.counter.next_state(state, label);
        }
        (score, state)
    }

    /// Log-probability of ending the sentence after `state`.
    pub fn end_score(&self, state: LmState) -> Score {
        self.prob(state, None).max(KFLOATEPS).ln()
    }

    /// Log-probability of a whole sentence, end of sentence included.
    pub fn sentence_score(&self, sentence: &[WordIndex]) -> Score {
        let (score, state) = self.phrase_score(sentence, self.begin_state());
        score + self.end_score(state)
    }

    pub fn to_fst(&self, syms: Option<&SymbolTable>) -> Result<StdVectorFst> {
        self.counter.to_fst(syms)
    }

    /// Write the counts as a binary FST.
    pub fn write_counts(&self, path: &Path, syms: Option<&SymbolTable>) -> Result<()> {
        let fst = self.to_fst(syms)?;
        fst.write(path)?;
        Ok(())
    }
}
