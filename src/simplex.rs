//! Downhill simplex (Nelder-Mead) minimization.
//!
//! The objective is a plain callback evaluated synchronously at each
//! point the simplex visits.

use anyhow::{anyhow, Result};
use ordered_float::OrderedFloat;

/// Relative tolerance on the objective
pub const FTOL: f64 = 1e-4;
/// Offset of the initial vertices from the starting point
pub const INITIAL_STEP: f64 = 0.1;
/// Cap on the number of objective evaluations
pub const MAX_EVALUATIONS: usize = 5000;
const TINY: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub enum SimplexOutcome {
    Converged { point: Vec<f64>, value: f64, evals: usize },
    /// Gave up; the best point seen so far is reported.
    MaxEvaluations { point: Vec<f64>, value: f64, evals: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct Simplex {
    pub ftol: f64,
    pub initial_step: f64,
    pub max_evaluations: usize,
}

impl Default for Simplex {
    fn default() -> Self {
        Simplex {
            ftol: FTOL,
            initial_step: INITIAL_STEP,
            max_evaluations: MAX_EVALUATIONS,
        }
    }
}

fn along(from: &[f64], to: &[f64], factor: f64) -> Vec<f64> {
    from.iter().zip(to).map(|(f, t)| f + factor * (t - f)).collect()
}

impl Simplex {
    pub fn minimize<F>(&self, start: &[f64], mut objective: F) -> Result<SimplexOutcome>
    where
        F: FnMut(&[f64]) -> Result<f64>,
    {
        let dim = start.len();
        if dim == 0 {
            return Err(anyhow!("cannot minimize over zero dimensions"));
        }
        let mut evals = 0;
        let mut eval = |x: &[f64], evals: &mut usize| -> Result<f64> {
            *evals += 1;
            let y = objective(x)?;
            if y.is_nan() {
                return Err(anyhow!("objective is not a number at {:?}", x));
            }
            Ok(y)
        };

        let mut vertices: Vec<(Vec<f64>, f64)> = Vec::with_capacity(dim + 1);
        let y = eval(start, &mut evals)?;
        vertices.push((start.to_vec(), y));
        for i in 0..dim {
            let mut x = start.to_vec();
            x[i] += self.initial_step;
            let y = eval(&x, &mut evals)?;
            vertices.push((x, y));
        }

        loop {
            vertices.sort_by_key(|(_, y)| OrderedFloat(*y));
            let (best, worst) = (vertices[0].1, vertices[dim].1);
            let rtol = 2.0 * (worst - best).abs() / (worst.abs() + best.abs() + TINY);
            if rtol < self.ftol {
                let (point, value) = vertices.swap_remove(0);
                return Ok(SimplexOutcome::Converged { point, value, evals });
            }
            if evals >= self.max_evaluations {
                let (point, value) = vertices.swap_remove(0);
                return Ok(SimplexOutcome::MaxEvaluations { point, value, evals });
            }

            let mut centroid = vec![0.0; dim];
            for (x, _) in &vertices[..dim] {
                for (c, xi) in centroid.iter_mut().zip(x) {
                    *c += xi / dim as f64;
                }
            }
            let second_worst = vertices[dim - 1].1;
            let worst_x = vertices[dim].0.clone();

            let reflected = along(&centroid, &worst_x, -1.0);
            let yr = eval(&reflected, &mut evals)?;
            if yr < best {
                let expanded = along(&centroid, &worst_x, -2.0);
                let ye = eval(&expanded, &mut evals)?;
                vertices[dim] = if ye < yr { (expanded, ye) } else { (reflected, yr) };
                continue;
            }
            if yr < second_worst {
                vertices[dim] = (reflected, yr);
                continue;
            }
            let (contracted, yc) = if yr < worst {
                let x = along(&centroid, &reflected, 0.5);
                let y = eval(&x, &mut evals)?;
                (x, y)
            } else {
                let x = along(&centroid, &worst_x, 0.5);
                let y = eval(&x, &mut evals)?;
                (x, y)
            };
            if yc < yr.min(worst) {
                vertices[dim] = (contracted, yc);
                continue;
            }
            let best_x = vertices[0].0.clone();
            for vertex in vertices.iter_mut().skip(1) {
                let x = along(&best_x, &vertex.0, 0.5);
                let y = eval(&x, &mut evals)?;
                *vertex = (x, y);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bowl(x: &[f64]) -> Result<f64> {
        Ok((x[0] - 0.3).powi(2) + (x[1] - 0.6).powi(2) + 1.0)
    }

    #[test]
    fn it_finds_the_minimum() {
        match Simplex::default().minimize(&[0.9, 0.9], bowl).unwrap() {
            SimplexOutcome::Converged { point, value, .. } => {
                assert!((point[0] - 0.3).abs() < 0.05);
                assert!((point[1] - 0.6).abs() < 0.05);
                assert!(value < 1.01);
            }
            other => panic!("did not converge: {:?}", other),
        }
    }

    #[test]
    fn it_avoids_infeasible_points() {
        let objective = |x: &[f64]| {
            if x.iter().any(|v| *v < 0.0 || *v >= 1.0) {
                Ok(f64::MAX)
            } else {
                bowl(x)
            }
        };
        match Simplex::default().minimize(&[0.9, 0.9], objective).unwrap() {
            SimplexOutcome::Converged { point, .. } => {
                assert!(point.iter().all(|v| (0.0..1.0).contains(v)));
            }
            other => panic!("did not converge: {:?}", other),
        }
    }

    #[test]
    fn it_stops_at_the_evaluation_cap() {
        let simplex = Simplex {
            max_evaluations: 5,
            ..Default::default()
        };
        match simplex.minimize(&[0.9, 0.9], bowl).unwrap() {
            SimplexOutcome::MaxEvaluations { evals, .. } => assert!(evals >= 5),
            other => panic!("converged too early: {:?}", other),
        }
    }

    #[test]
    fn it_propagates_objective_errors() {
        let res = Simplex::default().minimize(&[0.5], |_| Err(anyhow!("broken model")));
        assert!(res.is_err());
    }
}
