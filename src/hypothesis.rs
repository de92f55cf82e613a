//! Translation hypotheses.
//!
//! Source positions and target positions are 1-based: position 0 of the
//! target words always holds the NULL word, so a target segment cut is
//! directly the index of the last word of its phrase.

use anyhow::{anyhow, Result};

use crate::model::LmState;
use crate::swm::NULL_WORD;
use crate::{PositionIndex, Score, WordIndex};

/// Translation state of a search node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypothesisRecord {
    /// Target words, NULL first
    pub target_words: Vec<WordIndex>,
    /// Inclusive source spans, one per target phrase, in emission order
    pub source_coverage: Vec<(PositionIndex, PositionIndex)>,
    /// Index in `target_words` of the last word of each phrase
    pub target_segment_cuts: Vec<PositionIndex>,
}

impl Default for HypothesisRecord {
    fn default() -> Self {
        HypothesisRecord::null()
    }
}

impl HypothesisRecord {
    /// The empty hypothesis search starts from.
    pub fn null() -> Self {
        HypothesisRecord {
            target_words: vec![NULL_WORD],
            source_coverage: Vec::new(),
            target_segment_cuts: Vec::new(),
        }
    }

    /// Number of target words, NULL excluded.
    pub fn target_len(&self) -> usize {
        self.target_words.len().saturating_sub(1)
    }

    pub fn num_segments(&self) -> usize {
        self.source_coverage.len()
    }

    pub fn covered_len(&self) -> usize {
        self.source_coverage.iter().map(|&(l, r)| r - l + 1).sum()
    }

    pub fn uncovered_len(&self, src_len: usize) -> usize {
        src_len.saturating_sub(self.covered_len())
    }

    pub fn is_complete(&self, src_len: usize) -> bool {
        self.covered_len() == src_len
    }

    /// Right edge of the last translated span, 0 for the null hypothesis.
    pub fn last_src_pos_covered(&self) -> PositionIndex {
        self.source_coverage.last().map_or(0, |&(_, r)| r)
    }

    /// Target words of segment `i`.
    pub fn target_phrase(&self, i: usize) -> &[WordIndex] {
        let right = self.target_segment_cuts[i];
        let left = if i == 0 { 1 } else { self.target_segment_cuts[i - 1] + 1 };
        &self.target_words[left..=right]
    }

    /// Whether the target words produced so far start `reference`.
    pub fn is_prefix_of(&self, reference: &[WordIndex]) -> bool {
        let words = &self.target_words[1.min(self.target_words.len())..];
        words.len() <= reference.len() && reference.starts_with(words)
    }

    /// Check the structural invariants against a source sentence length.
    pub fn validate(&self, src_len: usize) -> Result<()> {
        if self.target_words.first() != Some(&NULL_WORD) {
            return Err(anyhow!("hypothesis does not start with the NULL word"));
        }
        if self.source_coverage.len() != self.target_segment_cuts.len() {
            return Err(anyhow!(
                "{} source spans for {} target cuts",
                self.source_coverage.len(),
                self.target_segment_cuts.len()
            ));
        }
        let mut key = CoverageKey::new(src_len);
        for &(l, r) in &self.source_coverage {
            if l == 0 || l > r || r > src_len {
                return Err(anyhow!("span [{}, {}] out of a sentence of {} words", l, r, src_len));
            }
            if key.any_in(l, r) {
                return Err(anyhow!("span [{}, {}] overlaps translated words", l, r));
            }
            key.set_range(l, r);
        }
        let mut prev = 0;
        for &cut in &self.target_segment_cuts {
            if cut <= prev {
                return Err(anyhow!("empty target phrase ending at {}", cut));
            }
            prev = cut;
        }
        if prev != self.target_len() {
            return Err(anyhow!("last cut {} does not end the {} target words", prev, self.target_len()));
        }
        Ok(())
    }

    /// Append the translation of source span `span` into `phrase`.
    pub fn extend(
        &self,
        span: (PositionIndex, PositionIndex),
        phrase: &[WordIndex],
        src_len: usize,
    ) -> Result<HypothesisRecord> {
        let (l, r) = span;
        if phrase.is_empty() {
            return Err(anyhow!("cannot extend a hypothesis with an empty target phrase"));
        }
        if l == 0 || l > r || r > src_len {
            return Err(anyhow!("span [{}, {}] out of a sentence of {} words", l, r, src_len));
        }
        if self.coverage_key(src_len).any_in(l, r) {
            return Err(anyhow!("span [{}, {}] overlaps translated words", l, r));
        }
        let mut next = self.clone();
        next.target_words.extend_from_slice(phrase);
        next.target_segment_cuts.push(next.target_words.len() - 1);
        next.source_coverage.push(span);
        Ok(next)
    }

    /// The record this one was extended from, if any.
    pub fn predecessor(&self) -> Option<HypothesisRecord> {
        if self.target_words.len() <= 1 {
            return None;
        }
        let cuts = &self.target_segment_cuts;
        let phrase_len = match cuts.len() {
            0 => {
                log::warn!("hypothesis data corrupted: target words without segment cuts");
                return None;
            }
            1 => cuts[0],
            n => cuts[n - 1] - cuts[n - 2],
        };
        let mut pred = self.clone();
        pred.target_words.truncate(pred.target_words.len().saturating_sub(phrase_len).max(1));
        pred.target_segment_cuts.pop();
        pred.source_coverage.pop();
        Some(pred)
    }

    pub fn coverage_key(&self, src_len: usize) -> CoverageKey {
        let mut key = CoverageKey::new(src_len);
        for &(l, r) in &self.source_coverage {
            key.set_range(l, r);
        }
        key
    }
}

/// One bit per source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CoverageKey {
    bits: Vec<u64>,
}

impl CoverageKey {
    pub fn new(src_len: usize) -> Self {
        CoverageKey {
            bits: vec![0; src_len / 64 + 1],
        }
    }

    pub fn set(&mut self, pos: PositionIndex) {
        let word = pos / 64;
        if word >= self.bits.len() {
            self.bits.resize(word + 1, 0);
        }
        self.bits[word] |= 1u64 << (pos % 64);
    }

    pub fn set_range(&mut self, left: PositionIndex, right: PositionIndex) {
        for pos in left..=right {
            self.set(pos);
        }
    }

    pub fn test(&self, pos: PositionIndex) -> bool {
        self.bits
            .get(pos / 64)
            .map_or(false, |word| word & (1u64 << (pos % 64)) != 0)
    }

    pub fn any_in(&self, left: PositionIndex, right: PositionIndex) -> bool {
        (left..=right).any(|pos| self.test(pos))
    }

    /// Number of covered positions.
    pub fn count(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// Accumulated score and language model history of a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInfo {
    pub score: Score,
    pub lm_state: LmState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hypothesis {
    pub record: HypothesisRecord,
    pub info: ScoreInfo,
}

impl Hypothesis {
    pub fn score(&self) -> Score {
        self.info.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_extends_and_recovers_predecessors() {
        let null = HypothesisRecord::null();
        let one = null.extend((2, 3), &[7, 8], 4).unwrap();
        let two = one.extend((1, 1), &[9], 4).unwrap();
        assert_eq!(two.target_words, vec![NULL_WORD, 7, 8, 9]);
        assert_eq!(two.target_segment_cuts, vec![2, 3]);
        assert_eq!(two.target_phrase(1), &[9]);
        assert_eq!(two.last_src_pos_covered(), 1);
        assert_eq!(two.uncovered_len(4), 1);
        two.validate(4).unwrap();
        assert_eq!(two.predecessor(), Some(one.clone()));
        assert_eq!(one.predecessor(), Some(null.clone()));
        assert_eq!(null.predecessor(), None);
    }

    #[test]
    fn it_keeps_coverage_disjoint() {
        let one = HypothesisRecord::null().extend((1, 2), &[5], 3).unwrap();
        assert!(one.extend((2, 3), &[6], 3).is_err());
        assert!(one.extend((3, 4), &[6], 3).is_err());
        assert!(one.extend((3, 3), &[], 3).is_err());
        let two = one.extend((3, 3), &[6], 3).unwrap();
        assert_eq!(two.source_coverage.len(), two.target_segment_cuts.len());
        assert!(two.is_complete(3));
        assert!(!one.is_complete(3));
        assert!(two.covered_len() <= 3);
    }

    #[test]
    fn it_detects_corrupted_records() {
        let corrupted = HypothesisRecord {
            target_words: vec![NULL_WORD, 4, 5],
            source_coverage: Vec::new(),
            target_segment_cuts: Vec::new(),
        };
        assert_eq!(corrupted.predecessor(), None);
        assert!(corrupted.validate(2).is_err());
    }

    #[test]
    fn it_matches_prefixes() {
        let hyp = HypothesisRecord::null().extend((1, 1), &[4, 5], 2).unwrap();
        assert!(hyp.is_prefix_of(&[4, 5, 6]));
        assert!(hyp.is_prefix_of(&[4, 5]));
        assert!(!hyp.is_prefix_of(&[4]));
        assert!(!hyp.is_prefix_of(&[5, 4]));
        assert!(HypothesisRecord::null().is_prefix_of(&[]));
    }

    #[test]
    fn it_counts_covered_positions() {
        let mut key = CoverageKey::new(70);
        key.set_range(1, 3);
        key.set(68);
        assert_eq!(key.count(), 4);
        assert!(key.test(68));
        assert!(!key.test(4));
        assert!(key.any_in(3, 5));
        assert!(!key.any_in(4, 67));
    }
}
