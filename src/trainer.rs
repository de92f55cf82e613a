//! Online training of the translation model from a stream of sentence
//! pairs.

use anyhow::{anyhow, Result};

use crate::config::{OnlineAlgorithm, OnlineTrainingConfig};
use crate::context::ModelSet;
use crate::lrate::learning_rate;
use crate::phrase::PhrasePair;
use crate::WordIndex;

/// Phrase pairs last contributed to the phrase table by each sample.
#[derive(Debug, Clone, Default)]
pub struct SufficientStatistics {
    entries: Vec<Vec<PhrasePair>>,
}

impl SufficientStatistics {
    pub fn get(&self, index: usize) -> &[PhrasePair] {
        self.entries.get(index).map_or(&[], Vec::as_slice)
    }

    /// Store the pairs of a sample, returning the ones they replace.
    pub fn replace(&mut self, index: usize, pairs: Vec<PhrasePair>) -> Vec<PhrasePair> {
        if index >= self.entries.len() {
            self.entries.resize_with(index + 1, Vec::new);
        }
        std::mem::replace(&mut self.entries[index], pairs)
    }

    pub fn clear_entry(&mut self, index: usize) {
        if let Some(entry) = self.entries.get_mut(index) {
            entry.clear();
        }
    }

    /// Number of samples holding pairs.
    pub fn num_cached(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_empty()).count()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Sentences waiting for the next (mini-)batch.
#[derive(Debug, Clone, Default)]
struct SentenceBuffer {
    src: Vec<Vec<String>>,
    trg: Vec<Vec<String>>,
    sys: Vec<Vec<String>>,
}

impl SentenceBuffer {
    fn push(&mut self, src: &[String], trg: &[String], sys: &[String]) {
        self.src.push(src.to_vec());
        self.trg.push(trg.to_vec());
        self.sys.push(sys.to_vec());
    }

    fn len(&self) -> usize {
        self.src.len()
    }

    fn clear(&mut self) {
        self.src.clear();
        self.trg.clear();
        self.sys.clear();
    }
}

fn identity(index: usize) -> usize {
    index
}

pub struct OnlineTrainer {
    config: OnlineTrainingConfig,
    stats: SufficientStatistics,
    buffer: SentenceBuffer,
    step_num: usize,
    /// Where the statistics of a sample are stored
    index_map: fn(usize) -> usize,
}

impl Default for OnlineTrainer {
    fn default() -> Self {
        OnlineTrainer {
            config: OnlineTrainingConfig::default(),
            stats: SufficientStatistics::default(),
            buffer: SentenceBuffer::default(),
            step_num: 0,
            index_map: identity,
        }
    }
}

impl OnlineTrainer {
    pub fn new(config: OnlineTrainingConfig) -> Result<Self> {
        config.validate()?;
        Ok(OnlineTrainer {
            config,
            ..Default::default()
        })
    }

    pub fn config(&self) -> &OnlineTrainingConfig {
        &self.config
    }

    /// Change the configuration and resize the expected count caches of
    /// the alignment models to match.
    pub fn set_config(&mut self, config: OnlineTrainingConfig, models: &mut ModelSet) -> Result<()> {
        config.validate()?;
        self.config = config;
        self.attach(models);
        Ok(())
    }

    /// Bound the expected count caches of `models` to what this trainer
    /// will revisit.
    pub fn attach(&self, models: &mut ModelSet) {
        let window = self.config.expval_window();
        models.direct.set_expval_max_size(window);
        models.inverse.set_expval_max_size(window);
    }

    pub fn set_index_map(&mut self, index_map: fn(usize) -> usize) {
        self.index_map = index_map;
    }

    pub fn stats(&self) -> &SufficientStatistics {
        &self.stats
    }

    pub fn step_num(&self) -> usize {
        self.step_num
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.stats.clear();
        self.buffer.clear();
        self.step_num = 0;
    }

    /// Learn from one sentence pair; `sys` is the system translation of
    /// `src`, used by the WER-adaptive learning rate.
    pub fn train_sent_pair(&mut self, models: &mut ModelSet, src: &[String], trg: &[String], sys: &[String]) -> Result<()> {
        if src.is_empty() || trg.is_empty() {
            return Err(anyhow!("cannot train on a sentence pair with an empty side"));
        }
        match self.config.algorithm {
            OnlineAlgorithm::Incremental => self.train_incremental(models, src, trg),
            OnlineAlgorithm::MiniBatch => self.train_minibatch(models, src, trg, sys),
            OnlineAlgorithm::BatchRetraining => self.train_batch(models, src, trg, sys),
        }
    }

    fn train_incremental(&mut self, models: &mut ModelSet, src: &[String], trg: &[String]) -> Result<()> {
        let step = self.config.learn_step_size;
        let (src_ids, trg_ids) = models.update_vocabularies(src, trg);
        models.lm.train_sentence(&trg_ids, step)?;
        let (curr, _) = models.direct.add_sentence_pair(&src_ids, &trg_ids, step);
        models.inverse.add_sentence_pair(&trg_ids, &src_ids, step);

        // interlaced window: E samples spread over the last R
        let curr = curr as i64;
        let r = self.config.r_par as i64;
        let e = self.config.e_par as i64;
        let stride = r / e;
        let oldest = curr - r;
        for i in 1..=e {
            let n = oldest + i * stride;
            if n < 0 {
                continue;
            }
            let n = n as usize;
            models.direct.train_sentence_pair_range((n, n))?;
            models.inverse.train_sentence_pair_range((n, n))?;
            self.add_new_trans_opts(models, n)?;
        }

        // the lowest sample retrained here falls out of the next window
        let last = oldest + stride;
        if last >= 0 {
            self.stats.clear_entry((self.index_map)(last as usize));
        }
        log::debug!("incremental training: sample {} done", curr);
        Ok(())
    }

    /// Replace the phrase pairs of sample `n` in the phrase table with
    /// freshly extracted ones.
    fn add_new_trans_opts(&mut self, models: &mut ModelSet, n: usize) -> Result<()> {
        let (src, trg) = models
            .direct
            .nth_sentence_pair(n)
            .map(|(s, t)| (s.to_vec(), t.to_vec()))
            .ok_or_else(|| anyhow!("no sentence pair {} in the alignment model", n))?;
        let pairs = models.extract_consistent_phrase_pairs(&src, &trg)?;
        let old = self.stats.replace((self.index_map)(n), pairs.clone());
        models.phrase_table.add_pairs(&old, -1.0);
        models.phrase_table.add_pairs(&pairs, 1.0);
        Ok(())
    }

    /// Push the buffered pairs into both alignment models.
    fn add_buffered_pairs(&self, models: &mut ModelSet, count: f64) -> Vec<(Vec<WordIndex>, Vec<WordIndex>)> {
        let mut ids = Vec::with_capacity(self.buffer.len());
        for (src, trg) in self.buffer.src.iter().zip(&self.buffer.trg) {
            let (src_ids, trg_ids) = models.update_vocabularies(src, trg);
            models.direct.add_sentence_pair(&src_ids, &trg_ids, count);
            models.inverse.add_sentence_pair(&trg_ids, &src_ids, count);
            ids.push((src_ids, trg_ids));
        }
        ids
    }

    /// Add the phrase pairs and target sentences of `ids` to the phrase
    /// table and language model with pseudo-count `weight`.
    fn update_phrase_and_lm(
        &self,
        models: &mut ModelSet,
        ids: &[(Vec<WordIndex>, Vec<WordIndex>)],
        weight: f64,
    ) -> Result<()> {
        for (src, trg) in ids {
            let pairs = models.extract_consistent_phrase_pairs(src, trg)?;
            models.phrase_table.add_pairs(&pairs, weight);
            models.lm.train_sentence(trg, weight)?;
        }
        Ok(())
    }

    fn batch_ready(&mut self, src: &[String], trg: &[String], sys: &[String]) -> bool {
        self.buffer.push(src, trg, sys);
        self.buffer.len() % self.config.minibatch_size == 0
    }

    fn train_minibatch(&mut self, models: &mut ModelSet, src: &[String], trg: &[String], sys: &[String]) -> Result<()> {
        if !self.batch_ready(src, trg, sys) {
            return Ok(());
        }
        let rate = learning_rate(&self.config, self.step_num, &self.buffer.trg, &self.buffer.sys);
        let ids = self.add_buffered_pairs(models, 1.0);
        let last = models.direct.num_sentence_pairs() - 1;
        let range = (last + 1 - ids.len(), last);
        for model in [&mut models.direct, &mut models.inverse] {
            if model.capabilities().stepwise {
                model.set_learning_rate(rate);
            }
            for _ in 0..self.config.em_iters {
                model.train_sentence_pair_range(range)?;
            }
        }
        self.update_phrase_and_lm(models, &ids, rate)?;
        log::info!(
            "mini-batch {} trained on samples {}-{} with learning rate {}",
            self.step_num,
            range.0,
            range.1,
            rate
        );
        self.buffer.clear();
        self.step_num += 1;
        Ok(())
    }

    fn train_batch(&mut self, models: &mut ModelSet, src: &[String], trg: &[String], sys: &[String]) -> Result<()> {
        if !self.batch_ready(src, trg, sys) {
            return Ok(());
        }
        models.clear_models();
        let ids = self.add_buffered_pairs(models, 1.0);
        let range = (0, ids.len() - 1);
        for model in [&mut models.direct, &mut models.inverse] {
            let efficient = model.capabilities().efficient_batch;
            for _ in 0..self.config.em_iters {
                if efficient {
                    model.efficient_batch_training(range)?;
                } else {
                    model.train_sentence_pair_range(range)?;
                }
            }
        }
        self.update_phrase_and_lm(models, &ids, 1.0)?;
        log::info!("batch retraining {} on {} samples", self.step_num, ids.len());
        self.step_num += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::tokenize;

    fn train(trainer: &mut OnlineTrainer, models: &mut ModelSet, src: &str, trg: &str) -> Result<()> {
        trainer.train_sent_pair(models, &tokenize(src), &tokenize(trg), &[])
    }

    fn batch_config(algorithm: OnlineAlgorithm) -> OnlineTrainingConfig {
        OnlineTrainingConfig {
            algorithm,
            minibatch_size: 2,
            em_iters: 2,
            ..Default::default()
        }
    }

    #[test]
    fn it_rejects_empty_sentences() {
        let mut models = ModelSet::new(ModelConfig::default());
        let mut trainer = OnlineTrainer::default();
        let lm_states = models.lm.counter().num_states();
        assert!(train(&mut trainer, &mut models, "", "the house").is_err());
        assert!(train(&mut trainer, &mut models, "la casa", "  ").is_err());
        assert_eq!(models.direct.num_sentence_pairs(), 0);
        assert_eq!(models.phrase_table.num_pairs(), 0);
        assert_eq!(models.lm.counter().num_states(), lm_states);
        assert_eq!(models.src_vocab.len(), 2);
    }

    #[test]
    fn it_trains_incrementally() {
        let mut models = ModelSet::new(ModelConfig::default());
        let mut trainer = OnlineTrainer::default();
        train(&mut trainer, &mut models, "la casa", "the house").unwrap();
        train(&mut trainer, &mut models, "la flor", "the flower").unwrap();
        assert_eq!(models.direct.num_sentence_pairs(), 2);
        assert_eq!(models.inverse.num_sentence_pairs(), 2);
        assert!(models.phrase_table.total_count() > 0.0);
        let la = models.src_labels(&tokenize("la"));
        assert!(!models.phrase_table.translations(&la).is_empty());
        // R = 0: samples are never revisited, so nothing stays cached
        assert_eq!(trainer.stats().num_cached(), 0);
    }

    #[test]
    fn it_refreshes_cached_pairs_in_the_window() {
        let mut models = ModelSet::new(ModelConfig::default());
        let config = OnlineTrainingConfig {
            r_par: 2,
            e_par: 2,
            ..Default::default()
        };
        let mut trainer = OnlineTrainer::default();
        trainer.set_config(config, &mut models).unwrap();
        for (src, trg) in [("la casa", "the house"), ("la flor", "the flower"), ("una casa", "a house")] {
            train(&mut trainer, &mut models, src, trg).unwrap();
        }
        // sample 2 was retrained at offsets 1 and 2, then sample 1 dropped out
        assert!(trainer.stats().get(1).is_empty());
        assert!(!trainer.stats().get(2).is_empty());
        // the table holds exactly the cached pairs plus those of dropped samples
        assert!(models.phrase_table.total_count() >= trainer.stats().get(2).len() as f64);
    }

    #[test]
    fn it_counts_each_sample_once_when_strata_are_uneven() {
        let mut models = ModelSet::new(ModelConfig::default());
        let config = OnlineTrainingConfig {
            r_par: 3,
            e_par: 2,
            ..Default::default()
        };
        let mut trainer = OnlineTrainer::default();
        trainer.set_config(config, &mut models).unwrap();
        let pairs = [("a", "x"), ("b", "y"), ("c", "z"), ("d", "w"), ("e", "v")];
        for (src, trg) in pairs {
            train(&mut trainer, &mut models, src, trg).unwrap();
        }
        // the last sample has not been reached by the window yet
        for (src, trg) in &pairs[..4] {
            let src = models.src_labels(&tokenize(src));
            let trg = models.trg_labels(&tokenize(trg));
            assert_eq!(models.phrase_table.count(&src, &trg), 1.0);
        }
        assert!(models.direct.num_expvals() <= 4);
    }

    #[test]
    fn it_waits_for_full_minibatches() {
        let mut models = ModelSet::new(ModelConfig::default());
        let mut trainer = OnlineTrainer::new(batch_config(OnlineAlgorithm::MiniBatch)).unwrap();
        train(&mut trainer, &mut models, "a", "x").unwrap();
        assert_eq!(trainer.buffered(), 1);
        assert_eq!(models.direct.num_sentence_pairs(), 0);
        train(&mut trainer, &mut models, "b", "y").unwrap();
        assert_eq!(trainer.buffered(), 0);
        assert_eq!(trainer.step_num(), 1);
        assert_eq!(models.direct.num_sentence_pairs(), 2);
    }

    #[test]
    fn it_diverges_between_minibatch_and_batch_retraining() {
        let stream = [("a", "x"), ("b", "y"), ("a", "x"), ("b", "y")];
        let mut totals = Vec::new();
        for algorithm in [OnlineAlgorithm::MiniBatch, OnlineAlgorithm::BatchRetraining] {
            let mut models = ModelSet::new(ModelConfig::default());
            let mut trainer = OnlineTrainer::new(batch_config(algorithm)).unwrap();
            for (src, trg) in stream {
                train(&mut trainer, &mut models, src, trg).unwrap();
            }
            assert_eq!(trainer.step_num(), 2);
            totals.push(models.phrase_table.total_count());
        }
        // one pair per sentence: weighted by the fixed rate 0.5 without
        // clearing, or re-counted from scratch with weight 1
        assert!((totals[0] - 2.0).abs() < 1e-9);
        assert!((totals[1] - 4.0).abs() < 1e-9);
    }

    #[test]
    fn it_retrains_without_efficient_batch_support() {
        let config = ModelConfig {
            alignment: crate::swm::AlignmentCapabilities {
                stepwise: false,
                efficient_batch: false,
            },
            ..Default::default()
        };
        let mut models = ModelSet::new(config);
        let mut trainer = OnlineTrainer::new(batch_config(OnlineAlgorithm::BatchRetraining)).unwrap();
        train(&mut trainer, &mut models, "la casa", "the house").unwrap();
        train(&mut trainer, &mut models, "la flor", "the flower").unwrap();
        assert_eq!(models.direct.num_sentence_pairs(), 2);
        assert_eq!(trainer.buffered(), 2);
        assert!(models.phrase_table.total_count() > 0.0);
    }
}
