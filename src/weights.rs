use anyhow::{anyhow, Result};
use std::fmt;

use crate::Score;

/// Word penalty
pub const WPEN: usize = 0;
/// Language model
pub const LMODEL: usize = 1;
/// Target segment length
pub const TSEGMLEN: usize = 2;
/// Source jump
pub const SJUMP: usize = 3;
/// Source segment length
pub const SSEGMLEN: usize = 4;
/// Phrase table, target given source
pub const PTS: usize = 5;
/// Phrase table, source given target
pub const PST: usize = 6;
/// Sentence length model
pub const SWLENLI: usize = 7;

const NAMES: [&str; 8] = [
    "wpw", "lmw", "tseglenw", "sjumpw", "sseglenw", "ptsw", "pstw", "swlenliw",
];

/// Log-linear weights, one per channel: `wpw, lmw, tseglenw, sjumpw,
/// sseglenw, ptsw, pstw, swlenliw`.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightVector {
    weights: Vec<Score>,
}

impl Default for WeightVector {
    /// All weights set to 1.
    fn default() -> Self {
        WeightVector {
            weights: vec![1.0; NAMES.len()],
        }
    }
}

impl WeightVector {
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn get(&self, channel: usize) -> Score {
        self.weights[channel]
    }

    pub fn as_slice(&self) -> &[Score] {
        &self.weights
    }

    pub fn names(&self) -> Vec<&'static str> {
        NAMES.to_vec()
    }

    /// Overwrite weights by position; entries past the end of `values`
    /// keep their value, extra values are ignored.
    pub fn set_from_slice(&mut self, values: &[Score]) {
        for (w, v) in self.weights.iter_mut().zip(values) {
            *w = *v;
        }
    }

    /// Weighted sum of per-channel scores.
    pub fn dot(&self, scores: &[Score]) -> Score {
        self.weights.iter().zip(scores).map(|(w, s)| w * s).sum()
    }

    /// Read back the output of `Display`.
    pub fn parse_report(report: &str) -> Result<WeightVector> {
        let mut names = Vec::new();
        let mut values = Vec::new();
        for field in report.trim().split(',') {
            let (name, value) = field
                .split_once(':')
                .ok_or_else(|| anyhow!("malformed weight entry '{}'", field.trim()))?;
            names.push(name.trim().to_string());
            values.push(
                value
                    .trim()
                    .parse::<Score>()
                    .map_err(|e| anyhow!("bad value for {}: {}", name.trim(), e))?,
            );
        }
        if names != NAMES {
            return Err(anyhow!("unexpected weight names: {}", names.join(", ")));
        }
        let mut weights = WeightVector::default();
        weights.set_from_slice(&values);
        Ok(weights)
    }
}

impl fmt::Display for WeightVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = self
            .names()
            .iter()
            .zip(&self.weights)
            .map(|(name, w)| format!("{}: {}", name, w))
            .collect();
        write!(f, "{}", fields.join(" , "))
    }
}
