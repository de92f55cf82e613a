//! Models and vocabularies owned by a translation session.

use anyhow::Result;
use rustfst::SymbolTable;

use crate::alignment::AlignmentMatrix;
use crate::config::ModelConfig;
use crate::interp::Interpolator;
use crate::lambda::InterpolationLambdas;
use crate::model::NGramModel;
use crate::phrase::{extract_consistent_pairs, PhrasePair, PhraseTable};
use crate::swm::{AlignmentModel, Ibm1Model, NULL_WORD};
use crate::{tokenize, WordIndex};

/// Symbol of words missing from a vocabulary
pub const UNK_SYMBOL: &str = "<unk>";

/// A sentence to translate, with its source vocabulary indices. Index 0
/// holds the NULL word so that positions are 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSentence {
    pub words: Vec<String>,
    pub ids: Vec<WordIndex>,
}

impl Default for SourceSentence {
    fn default() -> Self {
        SourceSentence {
            words: Vec::new(),
            ids: vec![NULL_WORD],
        }
    }
}

impl SourceSentence {
    /// Number of words, NULL excluded.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Indices of the inclusive 1-based span `[left, right]`.
    pub fn span(&self, left: usize, right: usize) -> &[WordIndex] {
        &self.ids[left..=right]
    }
}

fn vocabulary() -> SymbolTable {
    let mut syms = SymbolTable::new();
    syms.add_symbol(UNK_SYMBOL);
    syms
}

/// Vocabularies, language model, phrase table and both single-word
/// alignment models (source to target and target to source).
pub struct ModelSet {
    pub src_vocab: SymbolTable,
    pub trg_vocab: SymbolTable,
    pub lm: NGramModel,
    pub phrase_table: PhraseTable,
    pub direct: Box<dyn AlignmentModel>,
    pub inverse: Box<dyn AlignmentModel>,
    pub lambdas: InterpolationLambdas,
    pub config: ModelConfig,
}

impl ModelSet {
    pub fn new(config: ModelConfig) -> Self {
        let direct = Box::new(Ibm1Model::new(config.alignment));
        let inverse = Box::new(Ibm1Model::new(config.alignment));
        ModelSet::with_alignment_models(config, direct, inverse)
    }

    pub fn with_alignment_models(
        config: ModelConfig,
        direct: Box<dyn AlignmentModel>,
        inverse: Box<dyn AlignmentModel>,
    ) -> Self {
        ModelSet {
            src_vocab: vocabulary(),
            trg_vocab: vocabulary(),
            lm: NGramModel::new(config.lm_order),
            phrase_table: PhraseTable::new(),
            direct,
            inverse,
            lambdas: config.lambdas,
            config,
        }
    }

    fn lookup(syms: &SymbolTable, word: &str) -> WordIndex {
        syms.get_label(word)
            .or_else(|| syms.get_label(UNK_SYMBOL))
            .unwrap_or(NULL_WORD)
    }

    /// Source indices, unknown words mapped to `<unk>`.
    pub fn src_labels(&self, words: &[String]) -> Vec<WordIndex> {
        words.iter().map(|w| Self::lookup(&self.src_vocab, w)).collect()
    }

    /// Target indices, unknown words mapped to `<unk>`.
    pub fn trg_labels(&self, words: &[String]) -> Vec<WordIndex> {
        words.iter().map(|w| Self::lookup(&self.trg_vocab, w)).collect()
    }

    /// Add the words of a sentence pair to the vocabularies and let the
    /// alignment models know about the new sizes.
    pub fn update_vocabularies(&mut self, src: &[String], trg: &[String]) -> (Vec<WordIndex>, Vec<WordIndex>) {
        let src_ids: Vec<WordIndex> = src.iter().map(|w| self.src_vocab.add_symbol(w.as_str())).collect();
        let trg_ids: Vec<WordIndex> = trg.iter().map(|w| self.trg_vocab.add_symbol(w.as_str())).collect();
        let (src_size, trg_size) = (self.src_vocab.len(), self.trg_vocab.len());
        self.direct.set_vocab_sizes(src_size, trg_size);
        self.inverse.set_vocab_sizes(trg_size, src_size);
        (src_ids, trg_ids)
    }

    /// Tokenize and index a sentence to translate, without growing the
    /// vocabulary.
    pub fn source_sentence(&self, sentence: &str) -> SourceSentence {
        let words = tokenize(sentence);
        let mut ids = vec![NULL_WORD];
        ids.extend(self.src_labels(&words));
        SourceSentence { words, ids }
    }

    pub fn interpolator(&self) -> Interpolator<'_> {
        Interpolator {
            table: &self.phrase_table,
            direct: self.direct.as_ref(),
            inverse: self.inverse.as_ref(),
            lambdas: self.lambdas,
        }
    }

    /// Symmetrized word alignment of a sentence pair, one row per target
    /// word and one column per source word.
    pub fn alignment(&self, src: &[WordIndex], trg: &[WordIndex]) -> Result<AlignmentMatrix> {
        let mut alignment = self.direct.viterbi_alignment(src, trg).transpose();
        let inverse = self.inverse.viterbi_alignment(trg, src);
        alignment.symmetr1(&inverse)?;
        Ok(alignment)
    }

    pub fn extract_consistent_phrase_pairs(&self, src: &[WordIndex], trg: &[WordIndex]) -> Result<Vec<PhrasePair>> {
        let alignment = self.alignment(src, trg)?;
        Ok(extract_consistent_pairs(src, trg, &alignment, self.config.max_phrase_len))
    }

    /// Forget everything learned by the four models; vocabularies and
    /// lambdas are kept.
    pub fn clear_models(&mut self) {
        self.lm.clear();
        self.phrase_table.clear();
        self.direct.clear();
        self.inverse.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        tokenize(s)
    }

    #[test]
    fn it_maps_unknown_words() {
        let mut models = ModelSet::new(ModelConfig::default());
        let (src, trg) = models.update_vocabularies(&words("la casa"), &words("the house"));
        assert_eq!(src, vec![2, 3]);
        assert_eq!(trg, vec![2, 3]);
        assert_eq!(models.src_labels(&words("casa verde")), vec![3, 1]);
        let sentence = models.source_sentence("la verde");
        assert_eq!(sentence.ids, vec![NULL_WORD, 2, 1]);
        assert_eq!(sentence.len(), 2);
        assert_eq!(sentence.span(1, 2), &[2, 1]);
    }

    #[test]
    fn it_extracts_pairs_from_untrained_models() {
        let mut models = ModelSet::new(ModelConfig::default());
        let (src, trg) = models.update_vocabularies(&words("a b"), &words("x y"));
        let alignment = models.alignment(&src, &trg).unwrap();
        assert_eq!(alignment.rows(), 2);
        assert_eq!(alignment.cols(), 2);
        let pairs = models.extract_consistent_phrase_pairs(&src, &trg).unwrap();
        assert!(!pairs.is_empty());
        assert!(pairs.iter().any(|p| p.src == src && p.trg == trg));
    }
}
