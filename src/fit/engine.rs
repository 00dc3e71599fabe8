//! The fixed-point iteration.
//!
//! Works entirely in aligned space: every factor and target is held as a
//! full-rank array with length-1 extents on its complement axes, so the
//! sweep is a sequence of broadcast multiplies and axis reductions with no
//! index bookkeeping. Squeezing factors back to their declared shapes is
//! the caller's job (see [`super::ipf`]).

use ndarray::{ArrayD, Zip};

use crate::align::{aligned_marginal_sum, aligned_view};
use crate::error::{RakingError, Result};
use crate::margins::ArrayMargins;
use crate::Real;

/// Whether the sweep stopped because the factors settled or because the
/// iteration budget ran out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Convergence {
    Converged,
    MaxIterReached,
}

/// Raw outcome of the sweep: factors still in aligned (full-rank,
/// sorted-axis) form, plus diagnostics for the caller to report.
#[derive(Debug)]
pub(crate) struct Outcome<F> {
    pub factors: Vec<ArrayD<F>>,
    pub iterations: usize,
    pub convergence: Convergence,
    pub crit: F,
}

/// Run the fitting iteration for a seed already normalized and checked by
/// the caller.
///
/// Factors are initialized to `target / seed_marginal` and refreshed one
/// margin at a time, in declared order: the seed is scaled by every *other*
/// factor, reduced onto the margin's axes, and the factor is set to the
/// target over that reduction. The stopping criterion is the largest
/// absolute elementwise change across all factors in one full sweep.
///
/// With `max_iter == 0` the initialization factors are returned as-is and
/// counted as converged; the criterion is not evaluable without a previous
/// iterate.
pub(crate) fn solve<F: Real>(
    x: &ArrayD<F>,
    targets: &ArrayMargins<F>,
    tol: F,
    max_iter: usize,
) -> Result<Outcome<F>> {
    let indices = targets.indices();
    let rank = indices.rank();
    let count = indices.len();

    let sorted_groups: Vec<Vec<usize>> = (0..count)
        .map(|j| {
            let mut group: Vec<usize> = indices.group(j).to_vec();
            group.sort_unstable();
            group
        })
        .collect();
    let aligned_targets: Vec<ArrayD<F>> = (0..count)
        .map(|j| aligned_view(targets.get(j), indices.group(j), rank).to_owned())
        .collect();

    let mut factors = Vec::with_capacity(count);
    for j in 0..count {
        let seed_marginal = aligned_marginal_sum(x.view(), &sorted_groups[j]);
        factors.push(refresh_factor(&aligned_targets[j], &seed_marginal, j)?);
    }

    let mut iterations = 0;
    let mut crit = F::zero();
    let mut convergence = if max_iter == 0 {
        Convergence::Converged
    } else {
        Convergence::MaxIterReached
    };

    for iter in 1..=max_iter {
        let previous = factors.clone();
        for j in 0..count {
            let mut scaled = x.clone();
            for (k, factor) in factors.iter().enumerate() {
                if k != j {
                    scaled *= factor;
                }
            }
            let marginal = aligned_marginal_sum(scaled.view(), &sorted_groups[j]);
            factors[j] = refresh_factor(&aligned_targets[j], &marginal, j)?;
        }
        crit = max_delta(&factors, &previous);
        iterations = iter;
        if crit < tol {
            convergence = Convergence::Converged;
            break;
        }
    }

    Ok(Outcome {
        factors,
        iterations,
        convergence,
        crit,
    })
}

/// `target / marginal` elementwise, with the zero-handling the iteration
/// relies on: a zero marginal under a zero target contributes nothing
/// (factor 0), while a zero marginal under a nonzero target admits no
/// finite factor and fails the whole fit.
fn refresh_factor<F: Real>(
    target: &ArrayD<F>,
    marginal: &ArrayD<F>,
    margin: usize,
) -> Result<ArrayD<F>> {
    let mut degenerate = false;
    let factor = Zip::from(target).and(marginal).map_collect(|&t, &m| {
        if m.is_zero() {
            if !t.is_zero() {
                degenerate = true;
            }
            F::zero()
        } else {
            t / m
        }
    });
    if degenerate {
        Err(RakingError::DegenerateSeed { margin })
    } else {
        Ok(factor)
    }
}

/// Largest absolute elementwise change between two snapshots of the factor
/// list.
fn max_delta<F: Real>(current: &[ArrayD<F>], previous: &[ArrayD<F>]) -> F {
    let mut worst = F::zero();
    for (f, p) in current.iter().zip(previous) {
        for (&a, &b) in f.iter().zip(p.iter()) {
            worst = worst.max((a - b).abs());
        }
    }
    worst
}
