//! Multidimensional iterative proportional fitting (IPF), also known as
//! raking, RAS, or matrix scaling.
//!
//! Given a non-negative seed array `X` of arbitrary rank and a collection
//! of target marginal sums over (possibly overlapping) subsets of its
//! dimensions, the crate computes per-margin **adjustment factors** whose
//! aligned outer product scales `X` elementwise to an array whose margins
//! match the targets. The ratio of the fitted array to the seed is, by
//! construction, of rank-1 tensor-product form over each declared margin's
//! dimensions.
//!
//! # Module structure
//!
//! - [`indices`]: [`DimIndices`], which axes each margin/factor ranges
//!   over, validated as a covering of the array's axes.
//! - [`margins`]: [`ArrayMargins`], target marginal sums, consistency
//!   checks, and the averaging repair for disagreeing overlaps.
//! - [`factors`]: [`ArrayFactors`], the fit result; materialization and
//!   in-place application.
//! - [`align`]: broadcast alignment of lower-rank tagged arrays.
//! - [`fit`]: the fitting engine and its entry points ([`ipf`] and
//!   friends).
//!
//! # Example
//!
//! ```
//! use ndarray::array;
//! use raking::{ipf_from_vectors, IpfConfig};
//!
//! let seed = array![[40.0f64, 30.0], [35.0, 50.0]].into_dyn();
//! let factors = ipf_from_vectors(
//!     &seed,
//!     vec![array![80.0, 70.0], array![60.0, 90.0]],
//!     &IpfConfig::default(),
//! )
//! .unwrap();
//!
//! let mut fitted = seed.clone();
//! factors.apply_in_place(&mut fitted).unwrap();
//! let top_row = fitted.index_axis(ndarray::Axis(0), 0).sum();
//! assert!((top_row - 80.0).abs() < 1e-8);
//! ```
//!
//! # Algorithm
//!
//! The classical fixed-point iteration of Deming & Stephan (1940): each
//! margin's factor is repeatedly refreshed as `target / current_marginal`
//! of the scaled seed, cycling through the margins in declared order until
//! the largest factor change falls below the tolerance. Margins whose
//! totals disagree are rescaled to proportions first; margins that
//! disagree on shared dimension subsets are rejected unless the caller
//! opts into averaging. Diagnostics are reported through [`tracing`].
//!
//! # References
//!
//! - Deming & Stephan (1940): "On a least squares adjustment of a sampled
//!   frequency table when the expected marginal totals are known"
//! - Bishop, Fienberg & Holland (1975): "Discrete Multivariate Analysis"

use std::fmt;
use std::ops::MulAssign;

use num_traits::{Float, FromPrimitive};

pub mod align;
pub mod error;
pub mod factors;
pub mod fit;
pub mod indices;
pub mod margins;

pub use error::{RakingError, Result};
pub use factors::ArrayFactors;
pub use fit::{
    ipf, ipf_from_vectors, ipf_uniform, ipf_uniform_from_vectors, widen_seed, IpfConfig,
};
pub use indices::{AxisGroup, DimIndices};
pub use margins::ArrayMargins;

/// Floating-point element types the fitting engine can operate on.
///
/// This is the precision knob: choose `f32` or `f64` through the type
/// parameter of the entry points. Blanket-implemented; callers never
/// implement this by hand.
pub trait Real:
    Float + FromPrimitive + MulAssign + fmt::Debug + fmt::Display + 'static
{
}

impl<T> Real for T where
    T: Float + FromPrimitive + MulAssign + fmt::Debug + fmt::Display + 'static
{
}
