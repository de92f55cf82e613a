//! Phrase-based translation model: incremental hypothesis scoring,
//! online training and interpolation weight tuning over one
//! [`ModelSet`].

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};

use crate::config::{ModelConfig, OnlineTrainingConfig};
use crate::context::{ModelSet, SourceSentence};
use crate::feature::{standard_features, CompletionContext, Feature, SegmentContext};
use crate::hypothesis::{Hypothesis, HypothesisRecord, ScoreInfo};
use crate::optimize;
use crate::trainer::OnlineTrainer;
use crate::weights::WeightVector;
use crate::{read_parallel_corpus, tokenize, PositionIndex, Score, WordIndex};

fn lambda_path(prefix: &Path) -> PathBuf {
    let mut path = prefix.as_os_str().to_owned();
    path.push(".lambda");
    PathBuf::from(path)
}

pub struct TranslationModel {
    models: ModelSet,
    features: Vec<Box<dyn Feature>>,
    weights: WeightVector,
    source: SourceSentence,
    trainer: OnlineTrainer,
}

impl Default for TranslationModel {
    fn default() -> Self {
        TranslationModel::new(ModelConfig::default())
    }
}

impl TranslationModel {
    pub fn new(config: ModelConfig) -> Self {
        TranslationModel::with_models(ModelSet::new(config))
    }

    pub fn with_models(mut models: ModelSet) -> Self {
        let features = standard_features(&models.config);
        let trainer = OnlineTrainer::default();
        trainer.attach(&mut models);
        TranslationModel {
            models,
            features,
            weights: WeightVector::default(),
            source: SourceSentence::default(),
            trainer,
        }
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelSet {
        &mut self.models
    }

    pub fn trainer(&self) -> &OnlineTrainer {
        &self.trainer
    }

    /// Sentence subsequent hypotheses translate.
    pub fn set_source_sentence(&mut self, sentence: &str) {
        self.source = self.models.source_sentence(sentence);
    }

    pub fn source(&self) -> &SourceSentence {
        &self.source
    }

    pub fn weights(&self) -> &WeightVector {
        &self.weights
    }

    /// Set weights by channel position; missing trailing values are kept.
    pub fn set_weights(&mut self, values: &[Score]) {
        self.weights.set_from_slice(values);
    }

    pub fn print_weights(&self) -> String {
        self.weights.to_string()
    }

    pub fn null_hypothesis(&self) -> Hypothesis {
        let comps: Vec<Score> = self
            .features
            .iter()
            .map(|f| f.null_hyp_score(&self.models, &self.source))
            .collect();
        Hypothesis {
            record: HypothesisRecord::null(),
            info: ScoreInfo {
                score: self.weights.dot(&comps),
                lm_state: self.models.lm.begin_state(),
            },
        }
    }

    /// Score the segments `next` adds to `pred`. Returns the new
    /// hypothesis, the unweighted score of each channel and the new
    /// accumulated score.
    pub fn incr_score(&self, pred: &Hypothesis, next: &HypothesisRecord) -> Result<(Hypothesis, Vec<Score>, Score)> {
        let src_len = self.source.len();
        next.validate(src_len)?;
        let first = pred.record.num_segments();
        if next.num_segments() < first
            || !next.source_coverage.starts_with(&pred.record.source_coverage)
            || !next.target_words.starts_with(&pred.record.target_words)
        {
            return Err(anyhow!("hypothesis does not extend its predecessor"));
        }

        let mut comps = vec![0.0; self.features.len()];
        let mut trg_len = pred.record.target_len();
        let mut lm_state = pred.info.lm_state;
        let mut key = pred.record.coverage_key(src_len);
        for i in first..next.num_segments() {
            let span = next.source_coverage[i];
            let trg_phrase = next.target_phrase(i);
            let mut key_after = key.clone();
            key_after.set_range(span.0, span.1);
            let segment = SegmentContext {
                src: &self.source,
                span,
                trg_phrase,
                trg_len,
                prev_end: if i > 0 { next.source_coverage[i - 1].1 } else { 0 },
                lm_state,
                key_before: &key,
                key_after: &key_after,
            };
            for (comp, feature) in comps.iter_mut().zip(&self.features) {
                *comp += feature.extension_score(&self.models, &segment);
            }
            lm_state = self.models.lm.phrase_score(trg_phrase, lm_state).1;
            trg_len += trg_phrase.len();
            key = key_after;
        }

        if next.is_complete(src_len) && !pred.record.is_complete(src_len) {
            let done = CompletionContext {
                src: &self.source,
                trg_len,
                lm_state,
                key: &key,
            };
            for (comp, feature) in comps.iter_mut().zip(&self.features) {
                *comp += feature.completion_score(&self.models, &done);
            }
        }

        let score = pred.info.score + self.weights.dot(&comps);
        let hyp = Hypothesis {
            record: next.clone(),
            info: ScoreInfo { score, lm_state },
        };
        Ok((hyp, comps, score))
    }

    /// Translate source span `span` into `phrase` on top of `pred`.
    pub fn extend(
        &self,
        pred: &Hypothesis,
        span: (PositionIndex, PositionIndex),
        phrase: &[WordIndex],
    ) -> Result<Hypothesis> {
        let next = pred.record.extend(span, phrase, self.source.len())?;
        Ok(self.incr_score(pred, &next)?.0)
    }

    /// Score a record from scratch.
    pub fn score_record(&self, record: &HypothesisRecord) -> Result<Hypothesis> {
        Ok(self.incr_score(&self.null_hypothesis(), record)?.0)
    }

    pub fn predecessor(&self, hyp: &Hypothesis) -> Option<HypothesisRecord> {
        hyp.record.predecessor()
    }

    pub fn is_complete(&self, hyp: &Hypothesis) -> bool {
        hyp.record.is_complete(self.source.len())
    }

    /// Score of a phrase pair on its own, weighted: word penalty, language
    /// model from the sentence start and both translation directions.
    pub fn nbest_trans_score(&self, src: &[WordIndex], trg: &[WordIndex]) -> Score {
        self.weights.dot(&self.score_phrase_pair(src, trg))
    }

    /// Unweighted score of each channel for a phrase pair on its own.
    pub fn score_phrase_pair(&self, src: &[WordIndex], trg: &[WordIndex]) -> Vec<Score> {
        self.features
            .iter()
            .map(|f| f.score_phrase_pair(&self.models, src, trg))
            .collect()
    }

    /// Known translations of a source phrase, most frequent first.
    pub fn translation_options(&self, src: &[WordIndex]) -> Vec<Vec<WordIndex>> {
        let mut options = Vec::new();
        for feature in &self.features {
            for option in feature.translation_options(&self.models, src) {
                if !options.contains(&option) {
                    options.push(option);
                }
            }
        }
        options
    }

    pub fn load_lambdas(&mut self, path: &Path) -> Result<()> {
        self.models.lambdas.load(path)
    }

    pub fn print_lambdas(&self, path: &Path) -> Result<()> {
        self.models.lambdas.save(path)
    }

    /// Load the interpolation lambdas stored with the model at `prefix`.
    pub fn load_alig_model(&mut self, prefix: &Path) -> Result<()> {
        self.load_lambdas(&lambda_path(prefix))
    }

    pub fn print_alig_model(&self, prefix: &Path) -> Result<()> {
        self.print_lambdas(&lambda_path(prefix))
    }

    /// Write the language model counts as an FST.
    pub fn write_lm(&self, path: &Path) -> Result<()> {
        self.models.lm.write_counts(path, Some(&self.models.trg_vocab))
    }

    pub fn set_online_config(&mut self, config: OnlineTrainingConfig) -> Result<()> {
        self.trainer.set_config(config, &mut self.models)
    }

    /// Learn from a sentence pair; `sys` is the system translation of
    /// `src`, possibly empty.
    pub fn online_train_sent_pair(&mut self, src: &str, trg: &str, sys: &str) -> Result<()> {
        self.trainer
            .train_sent_pair(&mut self.models, &tokenize(src), &tokenize(trg), &tokenize(sys))
    }

    /// Learn from every pair of two line-aligned files.
    pub fn online_train_corpus(&mut self, source: &Path, target: &Path) -> Result<()> {
        let corpus = read_parallel_corpus(source, target)?;
        for (n, (src, trg)) in corpus.iter().enumerate() {
            self.trainer
                .train_sent_pair(&mut self.models, src, trg, &[])
                .map_err(|e| anyhow!("sentence pair {}: {}", n + 1, e))?;
        }
        log::info!("trained on {} sentence pairs", corpus.len());
        Ok(())
    }

    /// Retune the interpolation lambdas on a development corpus.
    pub fn update_lin_interp_weights(&mut self, source: &Path, target: &Path) -> Result<()> {
        optimize::update_lin_interp_weights(&mut self.models, source, target)
    }

    /// Forget all learned parameters and training state.
    pub fn clear(&mut self) {
        self.models.clear_models();
        self.trainer.clear();
        self.source = SourceSentence::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{LMODEL, PST, PTS, SJUMP, WPEN};

    fn trained() -> TranslationModel {
        let mut model = TranslationModel::default();
        model
            .online_train_corpus(&PathBuf::from("testdata/train.src"), &PathBuf::from("testdata/train.trg"))
            .unwrap();
        model.set_source_sentence("la casa verde");
        model
    }

    fn labels(model: &TranslationModel, s: &str) -> Vec<WordIndex> {
        model.models().trg_labels(&tokenize(s))
    }

    #[test]
    fn it_adds_up_incremental_scores() {
        let model = trained();
        let null = model.null_hypothesis();
        let green = labels(&model, "green");
        let the_house = labels(&model, "the house");
        let one = model.extend(&null, (3, 3), &green).unwrap();
        let two = model.extend(&one, (1, 2), &the_house).unwrap();
        assert!(model.is_complete(&two));
        let direct = model.score_record(&two.record).unwrap();
        assert!((direct.score() - two.score()).abs() < 1e-9);
        assert_eq!(direct.info.lm_state, two.info.lm_state);
    }

    #[test]
    fn it_scores_the_whole_sentence_in_one_segment() {
        let mut model = TranslationModel::default();
        model.online_train_sent_pair("a b c", "x y", "").unwrap();
        model.set_source_sentence("a b c");
        let null = model.null_hypothesis();
        let xy = labels(&model, "x y");
        let next = null.record.extend((1, 3), &xy, 3).unwrap();
        let (hyp, comps, score) = model.incr_score(&null, &next).unwrap();
        assert!(model.is_complete(&hyp));
        assert_eq!(comps.len(), 8);
        assert_eq!(comps[SJUMP], 0.0);
        let wp = crate::feature::WordPenaltyFeature { p: model.models().config.word_penalty_p };
        assert!((comps[WPEN] - wp.exact_score(2)).abs() < 1e-12);
        let lm = &model.models().lm;
        assert!((comps[LMODEL] - lm.sentence_score(&xy)).abs() < 1e-9);
        let weights = model.weights();
        assert!(comps[PTS] < 0.0);
        assert!(comps[PST] < 0.0);
        assert!((score - null.score() - weights.dot(&comps)).abs() < 1e-12);
    }

    #[test]
    fn it_applies_completion_once() {
        let model = trained();
        let null = model.null_hypothesis();
        let the_green_house = labels(&model, "the green house");
        let done = model.extend(&null, (1, 3), &the_green_house).unwrap();
        // rescoring a complete hypothesis against itself adds nothing
        let (same, comps, _) = model.incr_score(&done, &done.record).unwrap();
        assert!(comps.iter().all(|c| *c == 0.0));
        assert_eq!(same.score(), done.score());
    }

    #[test]
    fn it_handles_an_empty_source_sentence() {
        let mut model = trained();
        model.set_source_sentence("");
        let null = model.null_hypothesis();
        assert!(model.is_complete(&null));
        assert_eq!(null.score(), 0.0);
        // already complete, so rescoring adds no completion terms
        let (rescored, comps, score) = model.incr_score(&null, &null.record).unwrap();
        assert!(comps.iter().all(|c| *c == 0.0));
        assert_eq!(score, 0.0);
        assert_eq!(model.score_record(&null.record).unwrap(), rescored);
    }

    #[test]
    fn it_bounds_expected_counts_of_the_default_trainer() {
        let model = trained();
        assert_eq!(model.models().direct.num_sentence_pairs(), 6);
        assert_eq!(model.models().direct.num_expvals(), 1);
        assert_eq!(model.models().inverse.num_expvals(), 1);
    }

    #[test]
    fn it_rejects_unrelated_records() {
        let model = trained();
        let null = model.null_hypothesis();
        let one = model.extend(&null, (1, 1), &labels(&model, "the")).unwrap();
        let other = null.record.extend((2, 2), &labels(&model, "house"), 3).unwrap();
        assert!(model.incr_score(&one, &other).is_err());
        assert!(model.extend(&one, (1, 2), &labels(&model, "house")).is_err());
        assert_eq!(model.predecessor(&one), Some(null.record));
    }

    #[test]
    fn it_scores_phrase_pairs() {
        let model = trained();
        // whole training sentences always yield a phrase pair
        let casa = model.models().src_labels(&tokenize("la casa"));
        let options = model.translation_options(&casa);
        assert!(!options.is_empty());
        let best = model.nbest_trans_score(&casa, &options[0]);
        let comps = model.score_phrase_pair(&casa, &options[0]);
        assert!((best - model.weights().dot(&comps)).abs() < 1e-12);
        assert_eq!(comps[SJUMP], 0.0);
    }

    #[test]
    fn it_persists_lambdas_with_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("model");
        let mut model = TranslationModel::default();
        model.models_mut().lambdas = crate::lambda::InterpolationLambdas::new(0.3, 0.7);
        model.print_alig_model(&prefix).unwrap();
        assert!(dir.path().join("model.lambda").exists());
        let mut loaded = TranslationModel::default();
        loaded.load_alig_model(&prefix).unwrap();
        assert_eq!(loaded.models().lambdas, model.models().lambdas);
    }

    #[test]
    fn it_sets_weights_and_clears() {
        let mut model = trained();
        model.set_weights(&[0.5, 2.0]);
        assert!(model.print_weights().starts_with("wpw: 0.5 , lmw: 2 , tseglenw: 1"));
        assert!(model.trainer().config().validate().is_ok());
        model.clear();
        assert_eq!(model.models().phrase_table.num_pairs(), 0);
        assert_eq!(model.models().direct.num_sentence_pairs(), 0);
        assert!(model.source().is_empty());
    }

    #[test]
    fn it_rejects_bad_corpora() {
        let mut model = TranslationModel::default();
        let res = model.online_train_corpus(&PathBuf::from("testdata/train.src"), &PathBuf::from("testdata/short.trg"));
        assert!(res.is_err());
        assert_eq!(model.models().direct.num_sentence_pairs(), 0);
        assert!(model.online_train_sent_pair("la casa", "", "").is_err());
    }
}
