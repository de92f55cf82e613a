//! Interpolation of phrase-table and single-word model estimates.

use crate::lambda::InterpolationLambdas;
use crate::phrase::{PhraseTable, PHRASE_PROB_SMOOTH};
use crate::swm::AlignmentModel;
use crate::{log_sum_exp, Score, WordIndex};

/// Stands in for the phrase-table term when it falls below the smoothing floor
pub const LGPROB_SMOOTH: Score = -9999999.0;

/// `log(lambda * p_table + (1 - lambda) * p_sw)` from log-probabilities.
pub fn interpolate(lambda: f64, table_logp: Score, sw_logp: Score) -> Score {
    if lambda == 1.0 {
        return table_logp;
    }
    let mut table_term = lambda.ln() + table_logp;
    if table_term <= PHRASE_PROB_SMOOTH.ln() {
        table_term = LGPROB_SMOOTH;
    }
    let sw_term = (1.0 - lambda).ln() + sw_logp;
    log_sum_exp(table_term, sw_term)
}

/// Smoothed phrase scores in both directions. Scores are unweighted and
/// come one per phrase-probability estimator.
pub struct Interpolator<'a> {
    pub table: &'a PhraseTable,
    pub direct: &'a dyn AlignmentModel,
    pub inverse: &'a dyn AlignmentModel,
    pub lambdas: InterpolationLambdas,
}

impl<'a> Interpolator<'a> {
    /// log p(trg | src)
    pub fn trg_given_src(&self, src: &[WordIndex], trg: &[WordIndex]) -> Vec<Score> {
        vec![interpolate(
            self.lambdas.direct,
            self.table.log_p_trg_given_src(src, trg),
            self.direct.phrase_log_prob(src, trg),
        )]
    }

    /// log p(src | trg)
    pub fn src_given_trg(&self, src: &[WordIndex], trg: &[WordIndex]) -> Vec<Score> {
        vec![interpolate(
            self.lambdas.inverse,
            self.table.log_p_src_given_trg(src, trg),
            self.inverse.phrase_log_prob(trg, src),
        )]
    }
}
