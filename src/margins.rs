//! Bundles of target marginal sums.
//!
//! An [`ArrayMargins`] pairs `J` real-valued arrays with the
//! [`DimIndices`] declaring which axes of the full array each one ranges
//! over. Margins are what the fitting engine adjusts a seed towards; they
//! can be supplied directly or read off an existing array with
//! [`ArrayMargins::from_array`].
//!
//! Shape agreement across margins is a hard error at construction. The two
//! softer consistency notions, equal totals and agreement on shared axis
//! subsets, are *checked* here but *reacted to* by the engine, which
//! normalizes to proportions or averages the shared reductions as
//! configured.

use ndarray::{ArrayD, ArrayViewD, Zip};
use tracing::warn;

use crate::align::{
    derive_shape, marginal_sum, reduce_to_subset, subset_aligned_view, to_declared_order,
};
use crate::error::{RakingError, Result};
use crate::indices::DimIndices;
use crate::Real;

/// Target marginal sums tagged with their dimension groups.
///
/// Owns its arrays and its [`DimIndices`]; the derived full shape is
/// computed once at construction.
#[derive(Clone, Debug)]
pub struct ArrayMargins<F> {
    margins: Vec<ArrayD<F>>,
    indices: DimIndices,
    shape: Vec<usize>,
}

impl<F: Real> ArrayMargins<F> {
    /// Bundle explicit margin arrays with their dimension groups.
    ///
    /// # Errors
    ///
    /// Shape-consistency violations: wrong array count, a margin whose rank
    /// differs from its group, or two margins disagreeing on a shared
    /// axis's extent.
    pub fn new(margins: Vec<ArrayD<F>>, indices: DimIndices) -> Result<Self> {
        let shape = derive_shape(&margins, &indices)?;
        Ok(Self {
            margins,
            indices,
            shape,
        })
    }

    /// Bundle margin arrays under the default non-overlapping declaration,
    /// each array claiming the next `rank` consecutive axes.
    pub fn with_default_indices(margins: Vec<ArrayD<F>>) -> Result<Self> {
        let ranks: Vec<usize> = margins.iter().map(|m| m.ndim()).collect();
        let indices = DimIndices::default_for(&ranks)?;
        Self::new(margins, indices)
    }

    /// Read the margins of an existing array.
    ///
    /// Each margin is the sum of `x` over the complement of its group; when
    /// a group's axes are declared out of order, the margin's axes are
    /// permuted to match the declared order, not the sorted one.
    pub fn from_array(x: ArrayViewD<'_, F>, indices: DimIndices) -> Result<Self> {
        if x.ndim() != indices.rank() {
            return Err(RakingError::SeedRankMismatch {
                expected: indices.rank(),
                got: x.ndim(),
            });
        }
        let margins = (0..indices.len())
            .map(|j| {
                let group = indices.group(j);
                let mut sorted: Vec<usize> = group.to_vec();
                sorted.sort_unstable();
                to_declared_order(marginal_sum(x.view(), &sorted), group)
            })
            .collect();
        Ok(Self {
            margins,
            shape: x.shape().to_vec(),
            indices,
        })
    }

    /// The dimension groups.
    pub fn indices(&self) -> &DimIndices {
        &self.indices
    }

    /// The derived shape of the full array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of margins.
    pub fn len(&self) -> usize {
        self.margins.len()
    }

    /// Always false after construction; present for API completeness.
    pub fn is_empty(&self) -> bool {
        self.margins.is_empty()
    }

    /// Margin `j`.
    pub fn get(&self, j: usize) -> &ArrayD<F> {
        &self.margins[j]
    }

    /// All margins in declaration order.
    pub fn arrays(&self) -> &[ArrayD<F>] {
        &self.margins
    }

    /// Consume the bundle, keeping the arrays.
    pub fn into_arrays(self) -> Vec<ArrayD<F>> {
        self.margins
    }

    /// The total sum of each margin.
    pub fn totals(&self) -> Vec<F> {
        self.margins.iter().map(|m| m.sum()).collect()
    }

    /// True iff the largest and smallest margin totals differ by less than
    /// `tol`.
    pub fn is_scalar_consistent(&self, tol: F) -> bool {
        let totals = self.totals();
        let mut lo = totals[0];
        let mut hi = totals[0];
        for &t in &totals[1..] {
            lo = lo.min(t);
            hi = hi.max(t);
        }
        (hi - lo) < tol
    }

    /// A new bundle in which each margin is divided by its own total, so
    /// every margin sums to one.
    ///
    /// A margin whose total is zero has no proportional form; the engine
    /// rejects such inputs earlier (any nonzero target over a zero marginal
    /// is degenerate), so this method assumes nonzero totals.
    pub fn to_proportions(&self) -> Self {
        let margins = self
            .margins
            .iter()
            .map(|m| {
                let total = m.sum();
                m.mapv(|v| v / total)
            })
            .collect();
        Self {
            margins,
            indices: self.indices.clone(),
            shape: self.shape.clone(),
        }
    }

    /// The shared subsets on which the margins' reductions disagree by
    /// `tol` or more.
    ///
    /// A subset participates only when at least two margins contain it;
    /// each participating margin is reduced onto the subset (axes in
    /// ascending order) and all reductions are compared elementwise.
    pub fn overlap_violations(&self, tol: F) -> Vec<Vec<usize>> {
        let mut violations = Vec::new();
        for subset in self.indices.shared_subsets() {
            let reductions = self.subset_reductions(&subset);
            if reductions.len() < 2 {
                continue;
            }
            let worst = reductions[1..]
                .iter()
                .map(|r| max_abs_diff(&reductions[0], r))
                .fold(F::zero(), F::max);
            if worst >= tol {
                violations.push(subset);
            }
        }
        violations
    }

    /// True iff every shared subset's reductions agree within `tol`.
    ///
    /// Emits a warning per offending subset; the caller decides whether to
    /// fail or to average (see
    /// [`make_overlap_consistent`](Self::make_overlap_consistent)).
    pub fn is_overlap_consistent(&self, tol: F) -> bool {
        let violations = self.overlap_violations(tol);
        for subset in &violations {
            warn!("margins disagree on shared axes {:?}", subset);
        }
        violations.is_empty()
    }

    /// A new bundle whose margins agree on every shared subset.
    ///
    /// For each shared subset, the participating margins' reductions are
    /// replaced by their arithmetic mean: each margin is rescaled along the
    /// subset's axes by `mean / reduction`. Zero reduction entries are left
    /// untouched (a zero slice cannot be rescaled to a nonzero mean).
    /// Idempotent on already-consistent inputs.
    pub fn make_overlap_consistent(&self) -> Self {
        let mut margins = self.margins.clone();
        for subset in self.indices.shared_subsets() {
            let participants: Vec<usize> = (0..self.indices.len())
                .filter(|&j| subset.iter().all(|d| self.indices.group(j).contains(d)))
                .collect();
            if participants.len() < 2 {
                continue;
            }
            let reductions: Vec<ArrayD<F>> = participants
                .iter()
                .map(|&j| reduce_to_subset(margins[j].view(), self.indices.group(j), &subset))
                .collect();
            let mut mean = reductions[0].clone();
            for r in &reductions[1..] {
                mean = mean + r;
            }
            let count =
                F::from_usize(participants.len()).expect("participant count fits in a float");
            let mean = mean.mapv(|v| v / count);
            for (i, &j) in participants.iter().enumerate() {
                let ratio = Zip::from(&mean).and(&reductions[i]).map_collect(|&m, &r| {
                    if r.is_zero() {
                        F::one()
                    } else {
                        m / r
                    }
                });
                let aligned = subset_aligned_view(&ratio, &subset, self.indices.group(j));
                margins[j] *= &aligned;
            }
        }
        Self {
            margins,
            indices: self.indices.clone(),
            shape: self.shape.clone(),
        }
    }

    /// Reductions onto `subset` of every margin containing it.
    fn subset_reductions(&self, subset: &[usize]) -> Vec<ArrayD<F>> {
        (0..self.indices.len())
            .filter(|&j| subset.iter().all(|d| self.indices.group(j).contains(d)))
            .map(|j| reduce_to_subset(self.margins[j].view(), self.indices.group(j), subset))
            .collect()
    }
}

fn max_abs_diff<F: Real>(a: &ArrayD<F>, b: &ArrayD<F>) -> F {
    a.iter()
        .zip(b.iter())
        .fold(F::zero(), |worst, (&x, &y)| worst.max((x - y).abs()))
}
