//! Bundles of multiplicative adjustment factors.
//!
//! An [`ArrayFactors`] is the result of a fit: `J` factor arrays tagged
//! with the same dimension groups as the targets. The outer product of the
//! factors, aligned on the declared axes, is the elementwise adjustment
//! that carries the seed onto the targets.
//!
//! Factors can be [`materialize`](ArrayFactors::materialize)d into a
//! full-rank array, or folded directly into a caller-owned seed with
//! [`apply_in_place`](ArrayFactors::apply_in_place), which allocates no
//! full-rank scratch.

use ndarray::{ArrayD, IxDyn};
use num_traits::NumCast;

use crate::align::{aligned_view, derive_shape};
use crate::error::{RakingError, Result};
use crate::indices::DimIndices;
use crate::Real;

/// Multiplicative factors tagged with their dimension groups.
///
/// Shape policy is identical to [`ArrayMargins`](crate::ArrayMargins):
/// every shared axis must be reported with one extent, checked at
/// construction. When a group's axes are declared out of order, the
/// factor's shape follows the declared order.
#[derive(Clone, Debug)]
pub struct ArrayFactors<F> {
    factors: Vec<ArrayD<F>>,
    indices: DimIndices,
    shape: Vec<usize>,
}

impl<F: Real> ArrayFactors<F> {
    /// Bundle explicit factor arrays with their dimension groups.
    ///
    /// # Errors
    ///
    /// Same shape-consistency policy as
    /// [`ArrayMargins::new`](crate::ArrayMargins::new).
    pub fn new(factors: Vec<ArrayD<F>>, indices: DimIndices) -> Result<Self> {
        let shape = derive_shape(&factors, &indices)?;
        Ok(Self {
            factors,
            indices,
            shape,
        })
    }

    /// Bundle factor arrays under the default non-overlapping declaration.
    pub fn with_default_indices(factors: Vec<ArrayD<F>>) -> Result<Self> {
        let ranks: Vec<usize> = factors.iter().map(|f| f.ndim()).collect();
        let indices = DimIndices::default_for(&ranks)?;
        Self::new(factors, indices)
    }

    /// The dimension groups.
    pub fn indices(&self) -> &DimIndices {
        &self.indices
    }

    /// The derived shape of the full array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of factors.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    /// Always false after construction; present for API completeness.
    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Factor `j`, in its declared shape.
    pub fn get(&self, j: usize) -> &ArrayD<F> {
        &self.factors[j]
    }

    /// All factors in declaration order.
    pub fn arrays(&self) -> &[ArrayD<F>] {
        &self.factors
    }

    /// Consume the bundle, keeping the arrays.
    pub fn into_arrays(self) -> Vec<ArrayD<F>> {
        self.factors
    }

    /// The full-rank array `M[i] = ∏_j factor_j[i_{S_j}]`.
    ///
    /// Starts from an all-ones array of the derived shape and multiplies
    /// each factor in through a broadcast-aligned view.
    pub fn materialize(&self) -> ArrayD<F> {
        let mut out = ArrayD::ones(IxDyn(&self.shape));
        for (j, f) in self.factors.iter().enumerate() {
            out *= &aligned_view(f, self.indices.group(j), self.indices.rank());
        }
        out
    }

    /// Multiply the factors into `x` elementwise, mutating it in place.
    ///
    /// Unlike [`materialize`](Self::materialize), no full-rank scratch is
    /// allocated: each factor is folded in through a broadcast view.
    ///
    /// # Errors
    ///
    /// [`RakingError::SeedShapeMismatch`] when `x`'s shape differs from the
    /// factors' derived shape.
    pub fn apply_in_place(&self, x: &mut ArrayD<F>) -> Result<()> {
        if x.shape() != self.shape.as_slice() {
            return Err(RakingError::SeedShapeMismatch {
                expected: self.shape.clone(),
                got: x.shape().to_vec(),
            });
        }
        for (j, f) in self.factors.iter().enumerate() {
            *x *= &aligned_view(f, self.indices.group(j), self.indices.rank());
        }
        Ok(())
    }

    /// Multiply the factors into an array of another element type, checking
    /// that every product is exactly representable in that type.
    ///
    /// Each element is widened to `F`, scaled by the materialized factor,
    /// and cast back; if any product fails to round-trip (an integer seed
    /// scaled to a fractional or out-of-range value), the whole operation
    /// is rejected and `x` is left untouched.
    ///
    /// # Errors
    ///
    /// [`RakingError::SeedShapeMismatch`] on shape disagreement, or
    /// [`RakingError::Unrepresentable`] naming the first offending value.
    pub fn apply_in_place_checked<T>(&self, x: &mut ArrayD<T>) -> Result<()>
    where
        T: Copy + NumCast,
    {
        if x.shape() != self.shape.as_slice() {
            return Err(RakingError::SeedShapeMismatch {
                expected: self.shape.clone(),
                got: x.shape().to_vec(),
            });
        }
        let scale = self.materialize();
        let mut scaled: Vec<T> = Vec::with_capacity(x.len());
        for (&xv, &fv) in x.iter().zip(scale.iter()) {
            let wide = <F as NumCast>::from(xv).ok_or(RakingError::Unrepresentable {
                value: xv.to_f64().unwrap_or(f64::NAN),
            })?;
            let product = wide * fv;
            let narrow = T::from(product).ok_or(RakingError::Unrepresentable {
                value: product.to_f64().unwrap_or(f64::NAN),
            })?;
            if <F as NumCast>::from(narrow) != Some(product) {
                return Err(RakingError::Unrepresentable {
                    value: product.to_f64().unwrap_or(f64::NAN),
                });
            }
            scaled.push(narrow);
        }
        for (slot, v) in x.iter_mut().zip(scaled) {
            *slot = v;
        }
        Ok(())
    }
}
