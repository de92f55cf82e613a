//! Features of the log-linear translation model.
//!
//! Each feature owns one weight channel; the position of a feature in the
//! list built by [`standard_features`] is the position of its weight in
//! the [`WeightVector`](crate::weights::WeightVector). Scores returned here
//! are unweighted.

use crate::config::ModelConfig;
use crate::context::{ModelSet, SourceSentence};
use crate::hypothesis::CoverageKey;
use crate::model::LmState;
use crate::{PositionIndex, Score, WordIndex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureKind {
    WordPenalty,
    LanguageModel,
    TrgSegmentLength,
    SrcJump,
    SrcSegmentLength,
    DirectTranslation,
    InverseTranslation,
    SentenceLength,
}

/// One target phrase appended to a hypothesis.
pub struct SegmentContext<'a> {
    pub src: &'a SourceSentence,
    /// Inclusive 1-based source span
    pub span: (PositionIndex, PositionIndex),
    pub trg_phrase: &'a [WordIndex],
    /// Target length before the phrase
    pub trg_len: usize,
    /// Right edge of the previous span, 0 for the first segment
    pub prev_end: PositionIndex,
    pub lm_state: LmState,
    pub key_before: &'a CoverageKey,
    pub key_after: &'a CoverageKey,
}

impl<'a> SegmentContext<'a> {
    pub fn src_phrase(&self) -> &'a [WordIndex] {
        self.src.span(self.span.0, self.span.1)
    }
}

/// A hypothesis that just covered its whole source sentence.
pub struct CompletionContext<'a> {
    pub src: &'a SourceSentence,
    pub trg_len: usize,
    pub lm_state: LmState,
    pub key: &'a CoverageKey,
}

pub trait Feature {
    /// Name of the weight of this feature
    fn name(&self) -> &'static str;

    fn kind(&self) -> FeatureKind;

    fn null_hyp_score(&self, _models: &ModelSet, _src: &SourceSentence) -> Score {
        0.0
    }

    fn extension_score(&self, models: &ModelSet, segment: &SegmentContext) -> Score;

    /// Correction applied once, when a hypothesis becomes complete.
    fn completion_score(&self, _models: &ModelSet, _done: &CompletionContext) -> Score {
        0.0
    }

    /// Score of a phrase pair taken on its own.
    fn score_phrase_pair(&self, _models: &ModelSet, _src: &[WordIndex], _trg: &[WordIndex]) -> Score {
        0.0
    }

    fn translation_options(&self, _models: &ModelSet, _src: &[WordIndex]) -> Vec<Vec<WordIndex>> {
        Vec::new()
    }
}

/// Geometric target length: `log P(len >= n)` while translating, exact
/// probability once complete.
pub struct WordPenaltyFeature {
    pub p: f64,
}

impl WordPenaltyFeature {
    pub fn sum_score(&self, len: usize) -> Score {
        len as f64 * (1.0 - self.p).ln()
    }

    pub fn exact_score(&self, len: usize) -> Score {
        self.p.ln() + self.sum_score(len)
    }
}

impl Feature for WordPenaltyFeature {
    fn name(&self) -> &'static str {
        "wpw"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::WordPenalty
    }

    fn null_hyp_score(&self, _models: &ModelSet, _src: &SourceSentence) -> Score {
        self.sum_score(0)
    }

    fn extension_score(&self, _models: &ModelSet, segment: &SegmentContext) -> Score {
        let len = segment.trg_len;
        self.sum_score(len + segment.trg_phrase.len()) - self.sum_score(len)
    }

    fn completion_score(&self, _models: &ModelSet, done: &CompletionContext) -> Score {
        self.exact_score(done.trg_len) - self.sum_score(done.trg_len)
    }

    fn score_phrase_pair(&self, _models: &ModelSet, _src: &[WordIndex], trg: &[WordIndex]) -> Score {
        self.exact_score(trg.len())
    }
}

pub struct LanguageModelFeature;

impl Feature for LanguageModelFeature {
    fn name(&self) -> &'static str {
        "lmw"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::LanguageModel
    }

    fn extension_score(&self, models: &ModelSet, segment: &SegmentContext) -> Score {
        models.lm.phrase_score(segment.trg_phrase, segment.lm_state).0
    }

    fn completion_score(&self, models: &ModelSet, done: &CompletionContext) -> Score {
        models.lm.end_score(done.lm_state)
    }

    fn score_phrase_pair(&self, models: &ModelSet, _src: &[WordIndex], trg: &[WordIndex]) -> Score {
        models.lm.phrase_score(trg, models.lm.begin_state()).0
    }
}

/// Geometric length of target phrases.
pub struct TrgSegmentLengthFeature {
    pub p: f64,
}

impl Feature for TrgSegmentLengthFeature {
    fn name(&self) -> &'static str {
        "tseglenw"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::TrgSegmentLength
    }

    fn extension_score(&self, _models: &ModelSet, segment: &SegmentContext) -> Score {
        let len = segment.trg_phrase.len() as f64;
        self.p.ln() + (len - 1.0) * (1.0 - self.p).ln()
    }
}

/// Exponential distortion on the distance jumped in the source.
pub struct SrcJumpFeature {
    pub decay: f64,
}

impl Feature for SrcJumpFeature {
    fn name(&self) -> &'static str {
        "sjumpw"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::SrcJump
    }

    fn extension_score(&self, _models: &ModelSet, segment: &SegmentContext) -> Score {
        let jump = segment.span.0.abs_diff(segment.prev_end + 1);
        jump as f64 * self.decay.ln()
    }
}

/// Source phrase length given the target phrase length, truncated to
/// the words still uncovered.
pub struct SrcSegmentLengthFeature {
    pub q: f64,
}

impl Feature for SrcSegmentLengthFeature {
    fn name(&self) -> &'static str {
        "sseglenw"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::SrcSegmentLength
    }

    fn extension_score(&self, _models: &ModelSet, segment: &SegmentContext) -> Score {
        let trg_len = segment.trg_phrase.len();
        let src_len = segment.span.1 - segment.span.0 + 1;
        let available = segment.src.len().saturating_sub(segment.key_before.count()).max(src_len);
        let log_q = self.q.ln();
        let norm: f64 = (1..=available)
            .map(|len| (len.abs_diff(trg_len) as f64 * log_q).exp())
            .sum();
        src_len.abs_diff(trg_len) as f64 * log_q - norm.ln()
    }
}

/// Interpolated phrase translation score in one direction, summed over
/// the estimators returned by the interpolator.
pub struct TranslationFeature {
    pub inverse: bool,
}

impl TranslationFeature {
    fn score(&self, models: &ModelSet, src: &[WordIndex], trg: &[WordIndex]) -> Score {
        let interp = models.interpolator();
        let scores = if self.inverse {
            interp.src_given_trg(src, trg)
        } else {
            interp.trg_given_src(src, trg)
        };
        scores.iter().sum()
    }
}

impl Feature for TranslationFeature {
    fn name(&self) -> &'static str {
        if self.inverse {
            "pstw"
        } else {
            "ptsw"
        }
    }

    fn kind(&self) -> FeatureKind {
        if self.inverse {
            FeatureKind::InverseTranslation
        } else {
            FeatureKind::DirectTranslation
        }
    }

    fn extension_score(&self, models: &ModelSet, segment: &SegmentContext) -> Score {
        self.score(models, segment.src_phrase(), segment.trg_phrase)
    }

    fn score_phrase_pair(&self, models: &ModelSet, src: &[WordIndex], trg: &[WordIndex]) -> Score {
        self.score(models, src, trg)
    }

    fn translation_options(&self, models: &ModelSet, src: &[WordIndex]) -> Vec<Vec<WordIndex>> {
        if self.inverse {
            return Vec::new();
        }
        models
            .phrase_table
            .translations(src)
            .into_iter()
            .map(|(trg, _)| trg)
            .collect()
    }
}

/// Sentence length model of the direct alignment model. Partial
/// hypotheses are scored on the number of covered source words.
pub struct SentenceLengthFeature;

impl SentenceLengthFeature {
    fn partial_score(models: &ModelSet, key: &CoverageKey, trg_len: usize) -> Score {
        models.direct.sum_sent_len_log_prob(key.count(), trg_len)
    }
}

impl Feature for SentenceLengthFeature {
    fn name(&self) -> &'static str {
        "swlenliw"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::SentenceLength
    }

    fn null_hyp_score(&self, models: &ModelSet, src: &SourceSentence) -> Score {
        Self::partial_score(models, &CoverageKey::new(src.len()), 0)
    }

    fn extension_score(&self, models: &ModelSet, segment: &SegmentContext) -> Score {
        let after = segment.trg_len + segment.trg_phrase.len();
        Self::partial_score(models, segment.key_after, after)
            - Self::partial_score(models, segment.key_before, segment.trg_len)
    }

    fn completion_score(&self, models: &ModelSet, done: &CompletionContext) -> Score {
        models.direct.sent_len_log_prob(done.src.len(), done.trg_len)
            - Self::partial_score(models, done.key, done.trg_len)
    }
}

/// Features in weight channel order.
pub fn standard_features(config: &ModelConfig) -> Vec<Box<dyn Feature>> {
    vec![
        Box::new(WordPenaltyFeature { p: config.word_penalty_p }),
        Box::new(LanguageModelFeature),
        Box::new(TrgSegmentLengthFeature { p: config.trg_seg_len_p }),
        Box::new(SrcJumpFeature { decay: config.jump_decay }),
        Box::new(SrcSegmentLengthFeature { q: config.src_seg_len_q }),
        Box::new(TranslationFeature { inverse: false }),
        Box::new(TranslationFeature { inverse: true }),
        Box::new(SentenceLengthFeature),
    ]
}
