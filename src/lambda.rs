use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

/// Default weight of the phrase table against the single-word model
pub const DEFAULT_LAMBDA: f64 = 0.9;

/// Per-direction weight of the phrase-table estimate in the
/// interpolation with the single-word alignment model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationLambdas {
    /// Weight for p(t|s)
    pub direct: f64,
    /// Weight for p(s|t)
    pub inverse: f64,
}

impl Default for InterpolationLambdas {
    fn default() -> Self {
        InterpolationLambdas {
            direct: DEFAULT_LAMBDA,
            inverse: DEFAULT_LAMBDA,
        }
    }
}

impl InterpolationLambdas {
    pub fn new(direct: f64, inverse: f64) -> Self {
        InterpolationLambdas { direct, inverse }
    }

    /// Parse a lambda line: one value for both directions, or the direct
    /// then the inverse value.
    pub fn parse(line: &str) -> Result<Self> {
        let values = line
            .split_whitespace()
            .map(|field| field.parse::<f64>().map_err(|e| anyhow!("bad lambda '{}': {}", field, e)))
            .collect::<Result<Vec<f64>>>()?;
        match values[..] {
            [both] => Ok(InterpolationLambdas::new(both, both)),
            [direct, inverse] => Ok(InterpolationLambdas::new(direct, inverse)),
            _ => Err(anyhow!("expected 1 or 2 lambda values, found {}", values.len())),
        }
    }

    /// Replace the lambdas with the content of `path`. A missing file
    /// keeps the current values.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::warn!(
                    "lambda file {} not found, keeping {} {}",
                    path.display(),
                    self.direct,
                    self.inverse
                );
                return Ok(());
            }
            Err(e) => return Err(e).with_context(|| format!("cannot read {}", path.display())),
        };
        let line = text.lines().next().unwrap_or("");
        *self = InterpolationLambdas::parse(line).with_context(|| format!("malformed lambda file {}", path.display()))?;
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, format!("{} {}\n", self.direct, self.inverse))
            .with_context(|| format!("cannot write {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_parses_one_or_two_values() {
        assert_eq!(InterpolationLambdas::parse("0.7").unwrap(), InterpolationLambdas::new(0.7, 0.7));
        assert_eq!(
            InterpolationLambdas::parse(" 0.3\t0.6 ").unwrap(),
            InterpolationLambdas::new(0.3, 0.6)
        );
        assert!(InterpolationLambdas::parse("").is_err());
        assert!(InterpolationLambdas::parse("0.1 0.2 0.3").is_err());
        assert!(InterpolationLambdas::parse("high").is_err());
    }

    #[test]
    fn it_round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.lambda");
        let lambdas = InterpolationLambdas::new(0.123456789, 0.75);
        lambdas.save(&path).unwrap();
        let mut loaded = InterpolationLambdas::default();
        loaded.load(&path).unwrap();
        assert!((loaded.direct - lambdas.direct).abs() < 1e-12);
        assert!((loaded.inverse - lambdas.inverse).abs() < 1e-12);
    }

    #[test]
    fn it_keeps_values_without_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut lambdas = InterpolationLambdas::new(0.2, 0.4);
        lambdas.load(&dir.path().join("missing.lambda")).unwrap();
        assert_eq!(lambdas, InterpolationLambdas::new(0.2, 0.4));
    }

    #[test]
    fn it_rejects_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.lambda");
        std::fs::write(&path, "0.1 0.2 0.3\n").unwrap();
        let mut lambdas = InterpolationLambdas::default();
        assert!(lambdas.load(&path).is_err());
        assert_eq!(lambdas, InterpolationLambdas::default());
    }
}
