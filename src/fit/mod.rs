//! Iterative proportional fitting.
//!
//! The entry points here take a non-negative seed array and a bundle of
//! target margins, and produce the [`ArrayFactors`] whose aligned outer
//! product scales the seed onto the targets:
//!
//! - [`ipf`]: seed + [`ArrayMargins`], the general form.
//! - [`ipf_from_vectors`]: seed + one 1-D target per axis.
//! - [`ipf_uniform`]: targets only, against an all-ones seed.
//! - [`ipf_uniform_from_vectors`]: both conveniences composed.
//!
//! # Consistency handling
//!
//! Margins whose totals disagree are rescaled to proportions (along with
//! the seed) and an informational message is logged; the returned factors
//! then fit the proportion-normalized targets. Margins that disagree on a
//! shared dimension subset are a hard error unless
//! [`IpfConfig::force_consistency`] is set, in which case the shared
//! reductions are averaged first.
//!
//! # Module structure
//!
//! The aligned-space sweep lives in the private `engine` submodule; this
//! module owns the preconditions, the normalization pipeline, and the
//! squeeze back to declared factor shapes.

mod engine;

use ndarray::{Array1, ArrayD, Axis, IxDyn};
use num_traits::NumCast;
use tracing::{info, warn};

use crate::align::to_declared_order;
use crate::error::{RakingError, Result};
use crate::factors::ArrayFactors;
use crate::margins::ArrayMargins;
use crate::Real;
use engine::Convergence;

/// Fitting parameters.
///
/// Use struct-update syntax for overrides:
///
/// ```
/// use raking::IpfConfig;
/// let config = IpfConfig { max_iter: 5000, ..IpfConfig::<f64>::default() };
/// assert_eq!(config.max_iter, 5000);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct IpfConfig<F> {
    /// Maximum number of full sweeps before giving up.
    pub max_iter: usize,

    /// Convergence tolerance on the largest absolute factor change per
    /// sweep. Clamped from below to the element type's machine epsilon.
    pub tol: F,

    /// Average the margins' shared reductions instead of failing when they
    /// disagree on a shared dimension subset.
    pub force_consistency: bool,
}

impl<F: Real> Default for IpfConfig<F> {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tol: F::from_f64(1e-10).unwrap_or_else(F::epsilon),
            force_consistency: false,
        }
    }
}

/// Fit `seed` to `targets`, returning the per-margin adjustment factors.
///
/// The seed is never mutated; apply the returned factors with
/// [`ArrayFactors::apply_in_place`] or materialize them. Factors come back
/// in each margin's declared shape: when a dimension group lists its axes
/// out of order, the factor's axes follow the declared order.
///
/// Non-convergence within [`IpfConfig::max_iter`] sweeps is a warning, not
/// an error: the last-iteration factors are returned.
///
/// # Errors
///
/// - [`RakingError::SeedRankMismatch`] / [`RakingError::SeedShapeMismatch`]
///   when the seed does not fit the margins' declaration.
/// - [`RakingError::InconsistentOverlap`] when margins disagree on a shared
///   dimension subset and `force_consistency` is unset.
/// - [`RakingError::DegenerateSeed`] when a seed marginal is zero under a
///   nonzero target.
pub fn ipf<F: Real>(
    seed: &ArrayD<F>,
    targets: ArrayMargins<F>,
    config: &IpfConfig<F>,
) -> Result<ArrayFactors<F>> {
    let rank = targets.indices().rank();
    if seed.ndim() != rank {
        return Err(RakingError::SeedRankMismatch {
            expected: rank,
            got: seed.ndim(),
        });
    }
    if seed.shape() != targets.shape() {
        return Err(RakingError::SeedShapeMismatch {
            expected: targets.shape().to_vec(),
            got: seed.shape().to_vec(),
        });
    }

    let tol = config.tol.max(F::epsilon());
    let mut targets = targets;
    let mut x = seed.clone();
    let mut seed_total = None;

    if !targets.is_scalar_consistent(tol) {
        info!("margin totals differ; rescaling seed and targets to proportions");
        let total = x.sum();
        x.mapv_inplace(|v| v / total);
        targets = targets.to_proportions();
        seed_total = Some(total);
    }

    if !targets.is_overlap_consistent(tol) {
        if config.force_consistency {
            warn!("margins disagree on shared axes; averaging shared reductions");
            targets = targets.make_overlap_consistent();
        } else {
            let axes = targets
                .overlap_violations(tol)
                .into_iter()
                .next()
                .unwrap_or_default();
            return Err(RakingError::InconsistentOverlap { axes });
        }
    }

    let outcome = engine::solve(&x, &targets, tol, config.max_iter)?;
    match outcome.convergence {
        Convergence::Converged if config.max_iter == 0 => {
            info!("max_iter is 0; returning initialization factors");
        }
        Convergence::Converged => {
            info!("converged in {} iterations", outcome.iterations);
        }
        Convergence::MaxIterReached => {
            warn!(
                "did not converge in {} iterations (max factor change {})",
                config.max_iter, outcome.crit
            );
        }
    }

    let indices = targets.indices().clone();
    let mut declared: Vec<ArrayD<F>> = outcome
        .factors
        .into_iter()
        .enumerate()
        .map(|(j, aligned)| {
            let group = indices.group(j);
            let mut squeezed = aligned;
            for d in (0..rank).rev() {
                if !group.contains(&d) {
                    squeezed = squeezed.index_axis_move(Axis(d), 0);
                }
            }
            to_declared_order(squeezed, group)
        })
        .collect();

    // Factors were fit against the proportion-normalized seed; fold the
    // normalization into the first factor so they apply to the caller's
    // original seed.
    if let Some(total) = seed_total {
        declared[0].mapv_inplace(|v| v / total);
    }

    ArrayFactors::new(declared, indices)
}

/// Fit `seed` to one 1-D target per axis.
///
/// `targets[d]` is the desired marginal sum along axis `d`; the margins are
/// bundled under the one-axis-per-margin declaration.
pub fn ipf_from_vectors<F: Real>(
    seed: &ArrayD<F>,
    targets: Vec<Array1<F>>,
    config: &IpfConfig<F>,
) -> Result<ArrayFactors<F>> {
    let margins = vectors_to_margins(targets)?;
    ipf(seed, margins, config)
}

/// Fit an all-ones seed of the margins' inferred shape to `targets`.
pub fn ipf_uniform<F: Real>(
    targets: ArrayMargins<F>,
    config: &IpfConfig<F>,
) -> Result<ArrayFactors<F>> {
    let seed = ArrayD::ones(IxDyn(targets.shape()));
    ipf(&seed, targets, config)
}

/// Fit an all-ones seed to one 1-D target per axis.
pub fn ipf_uniform_from_vectors<F: Real>(
    targets: Vec<Array1<F>>,
    config: &IpfConfig<F>,
) -> Result<ArrayFactors<F>> {
    let margins = vectors_to_margins(targets)?;
    ipf_uniform(margins, config)
}

/// Widen a seed of any numeric element type to the engine's float type.
///
/// Every element must survive the conversion exactly: a value that rounds
/// on the way to `F` (an integer beyond the float's mantissa range) is
/// rejected rather than silently altered, the same policy as
/// [`ArrayFactors::apply_in_place_checked`].
///
/// # Errors
///
/// [`RakingError::Unrepresentable`] naming the first value that does not
/// round-trip through `F`.
pub fn widen_seed<T, F>(seed: &ArrayD<T>) -> Result<ArrayD<F>>
where
    T: Copy + NumCast + PartialEq,
    F: Real,
{
    let mut widened = Vec::with_capacity(seed.len());
    for &v in seed.iter() {
        let wide = <F as NumCast>::from(v).ok_or(RakingError::Unrepresentable {
            value: v.to_f64().unwrap_or(f64::NAN),
        })?;
        if T::from(wide) != Some(v) {
            return Err(RakingError::Unrepresentable {
                value: wide.to_f64().unwrap_or(f64::NAN),
            });
        }
        widened.push(wide);
    }
    Ok(ArrayD::from_shape_vec(IxDyn(seed.shape()), widened)
        .expect("shape matches element count"))
}

fn vectors_to_margins<F: Real>(targets: Vec<Array1<F>>) -> Result<ArrayMargins<F>> {
    let indices = crate::DimIndices::singletons(targets.len())?;
    ArrayMargins::new(targets.into_iter().map(|t| t.into_dyn()).collect(), indices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DimIndices;
    use approx::assert_relative_eq;
    use ndarray::array;

    fn four_by_four() -> ArrayD<f64> {
        array![
            [40.0, 30.0, 20.0, 10.0],
            [35.0, 50.0, 100.0, 75.0],
            [30.0, 80.0, 70.0, 120.0],
            [20.0, 30.0, 40.0, 50.0]
        ]
        .into_dyn()
    }

    fn fitted(seed: &ArrayD<f64>, factors: &ArrayFactors<f64>) -> ArrayD<f64> {
        let mut z = seed.clone();
        factors.apply_in_place(&mut z).unwrap();
        z
    }

    fn assert_margins_match(z: &ArrayD<f64>, targets: &ArrayMargins<f64>, eps: f64) {
        let achieved =
            ArrayMargins::from_array(z.view(), targets.indices().clone()).unwrap();
        for j in 0..targets.len() {
            for (&a, &t) in achieved.get(j).iter().zip(targets.get(j).iter()) {
                assert_relative_eq!(a, t, epsilon = eps);
            }
        }
    }

    #[test]
    fn two_axis_integer_seed() {
        let counts = array![
            [40i64, 30, 20, 10],
            [35, 50, 100, 75],
            [30, 80, 70, 120],
            [20, 30, 40, 50]
        ]
        .into_dyn();
        let seed: ArrayD<f64> = widen_seed(&counts).unwrap();
        let u = array![150.0, 300.0, 400.0, 150.0];
        let v = array![200.0, 300.0, 400.0, 100.0];
        let factors =
            ipf_from_vectors(&seed, vec![u.clone(), v.clone()], &IpfConfig::default()).unwrap();
        let z = fitted(&seed, &factors);

        assert_relative_eq!(z[[0, 0]], 64.5585, epsilon = 1e-3);
        for i in 0..4 {
            let row: f64 = (0..4).map(|j| z[[i, j]]).sum();
            let col: f64 = (0..4).map(|j| z[[j, i]]).sum();
            assert_relative_eq!(row, u[i], epsilon = 1e-6);
            assert_relative_eq!(col, v[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn three_axis_small() {
        let seed =
            ArrayD::from_shape_vec(IxDyn(&[2, 3, 2]), (1..=12).map(|v: i32| v as f64).collect())
                .unwrap();
        let targets = vec![
            array![48.0, 60.0],
            array![28.0, 36.0, 44.0],
            array![34.0, 74.0],
        ];
        let factors =
            ipf_from_vectors(&seed, targets.clone(), &IpfConfig::default()).unwrap();
        let z = fitted(&seed, &factors);
        let margins = vectors_to_margins(targets).unwrap();
        assert_margins_match(&z, &margins, 1e-6);
    }

    #[test]
    fn inconsistent_totals_fit_proportions() {
        let seed = four_by_four();
        let w = array![15.0, 30.0, 40.0, 15.0]; // sums to 100
        let v = array![200.0, 300.0, 400.0, 100.0]; // sums to 1000
        let factors =
            ipf_from_vectors(&seed, vec![w.clone(), v.clone()], &IpfConfig::default()).unwrap();
        let z = fitted(&seed, &factors);

        // the fitted array carries the proportion-normalized targets
        for i in 0..4 {
            let row: f64 = (0..4).map(|j| z[[i, j]]).sum();
            let col: f64 = (0..4).map(|j| z[[j, i]]).sum();
            assert_relative_eq!(row, w[i] / 100.0, epsilon = 1e-8);
            assert_relative_eq!(col, v[i] / 1000.0, epsilon = 1e-8);
        }
        let total = z.sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn multidimensional_margins_sharing_an_axis() {
        let reference = ArrayD::from_shape_fn(IxDyn(&[2, 3, 4]), |idx| {
            (idx[0] + 2 * idx[1] + idx[2] + 1) as f64
        });
        let di = DimIndices::new([vec![0, 2], vec![1, 2]]).unwrap();
        let targets = ArrayMargins::from_array(reference.view(), di).unwrap();

        let factors = ipf_uniform(targets.clone(), &IpfConfig::default()).unwrap();
        let seed = ArrayD::<f64>::ones(IxDyn(&[2, 3, 4]));
        let z = fitted(&seed, &factors);
        assert_margins_match(&z, &targets, 1e-7);
    }

    #[test]
    fn unordered_indices_keep_declared_factor_shape() {
        let seed =
            ArrayD::from_shape_vec(IxDyn(&[2, 3, 2]), (1..=12).map(|v: i32| v as f64).collect())
                .unwrap();
        let reference = ArrayD::from_shape_fn(IxDyn(&[2, 3, 2]), |idx| {
            (3 * idx[0] + idx[1] + 2 * idx[2] + 1) as f64
        });
        let di = DimIndices::new([vec![0], vec![2, 1]]).unwrap();
        let targets = ArrayMargins::from_array(reference.view(), di.clone()).unwrap();
        assert_eq!(targets.get(1).shape(), &[2, 3]);

        let factors = ipf(&seed, targets.clone(), &IpfConfig::default()).unwrap();
        assert_eq!(
            factors.get(1).shape(),
            &[2, 3],
            "factor shape must follow the declared (axis2, axis1) order"
        );
        let z = fitted(&seed, &factors);
        assert_margins_match(&z, &targets, 1e-7);
    }

    #[test]
    fn degenerate_seed_is_rejected() {
        let seed = array![[0.0, 0.0], [1.0, 1.0]].into_dyn();
        let err = ipf_from_vectors(
            &seed,
            vec![array![5.0, 5.0], array![5.0, 5.0]],
            &IpfConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, RakingError::DegenerateSeed { margin: 0 }));
    }

    #[test]
    fn inconsistent_overlap_fails_without_forcing() {
        let di = DimIndices::new([vec![0, 2], vec![1, 2]]).unwrap();
        let a = array![[1.0, 3.0], [3.0, 3.0]].into_dyn();
        let b = array![[1.0, 1.0], [2.0, 2.0], [2.0, 2.0]].into_dyn();
        let targets = ArrayMargins::new(vec![a, b], di).unwrap();
        let seed = ArrayD::<f64>::ones(IxDyn(&[2, 3, 2]));

        let err = ipf(&seed, targets.clone(), &IpfConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            RakingError::InconsistentOverlap { ref axes } if axes == &vec![2]
        ));

        let forced = IpfConfig {
            force_consistency: true,
            ..IpfConfig::default()
        };
        let factors = ipf(&seed, targets.clone(), &forced).unwrap();
        let z = fitted(&seed, &factors);
        let averaged = targets.make_overlap_consistent();
        assert_margins_match(&z, &averaged, 1e-7);
    }

    #[test]
    fn zero_sweeps_return_seed_margin_ratios() {
        let seed = four_by_four();
        let u = array![150.0, 300.0, 400.0, 150.0];
        let v = array![200.0, 300.0, 400.0, 100.0];
        let config = IpfConfig {
            max_iter: 0,
            ..IpfConfig::default()
        };
        let factors = ipf_from_vectors(&seed, vec![u.clone(), v.clone()], &config).unwrap();
        assert_eq!(factors.get(0).shape(), &[4]);
        let row_sums = [100.0, 260.0, 300.0, 140.0];
        let col_sums = [125.0, 190.0, 230.0, 255.0];
        for i in 0..4 {
            assert_relative_eq!(factors.get(0)[[i]], u[i] / row_sums[i], epsilon = 1e-12);
            assert_relative_eq!(factors.get(1)[[i]], v[i] / col_sums[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn zero_tolerance_still_produces_valid_factors() {
        let seed = four_by_four();
        let u = array![150.0, 300.0, 400.0, 150.0];
        let v = array![200.0, 300.0, 400.0, 100.0];
        let config = IpfConfig {
            tol: 0.0,
            max_iter: 200,
            ..IpfConfig::default()
        };
        let factors = ipf_from_vectors(&seed, vec![u.clone(), v.clone()], &config).unwrap();
        let z = fitted(&seed, &factors);
        for i in 0..4 {
            let row: f64 = (0..4).map(|j| z[[i, j]]).sum();
            assert_relative_eq!(row, u[i], epsilon = 1e-6);
        }
    }

    #[test]
    fn satisfied_targets_leave_the_seed_unchanged() {
        let seed = four_by_four();
        let targets =
            ArrayMargins::from_array(seed.view(), DimIndices::singletons(2).unwrap()).unwrap();
        let factors = ipf(&seed, targets, &IpfConfig::default()).unwrap();
        let m = factors.materialize();
        for &v in m.iter() {
            assert_relative_eq!(v, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn margin_order_does_not_change_the_fit() {
        let seed = four_by_four();
        let u = array![150.0, 300.0, 400.0, 150.0].into_dyn();
        let v = array![200.0, 300.0, 400.0, 100.0].into_dyn();

        let forward = ArrayMargins::new(
            vec![u.clone(), v.clone()],
            DimIndices::new([vec![0], vec![1]]).unwrap(),
        )
        .unwrap();
        let reversed = ArrayMargins::new(
            vec![v, u],
            DimIndices::new([vec![1], vec![0]]).unwrap(),
        )
        .unwrap();

        let z1 = fitted(&seed, &ipf(&seed, forward, &IpfConfig::default()).unwrap());
        let z2 = fitted(&seed, &ipf(&seed, reversed, &IpfConfig::default()).unwrap());
        for (&a, &b) in z1.iter().zip(z2.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-8);
        }
    }

    #[test]
    fn scaling_all_targets_scales_the_fit() {
        let seed = four_by_four();
        let u = array![150.0, 300.0, 400.0, 150.0];
        let v = array![200.0, 300.0, 400.0, 100.0];
        let z1 = fitted(
            &seed,
            &ipf_from_vectors(&seed, vec![u.clone(), v.clone()], &IpfConfig::default()).unwrap(),
        );
        let z10 = fitted(
            &seed,
            &ipf_from_vectors(
                &seed,
                vec![u.mapv(|t| t * 10.0), v.mapv(|t| t * 10.0)],
                &IpfConfig::default(),
            )
            .unwrap(),
        );
        let (s1, s10) = (z1.sum(), z10.sum());
        for (&a, &b) in z1.iter().zip(z10.iter()) {
            assert_relative_eq!(a / s1, b / s10, epsilon = 1e-9);
        }
    }

    #[test]
    fn uniform_seed_from_vectors() {
        let factors = ipf_uniform_from_vectors(
            vec![array![6.0, 2.0], array![3.0, 5.0]],
            &IpfConfig::default(),
        )
        .unwrap();
        let seed = ArrayD::<f64>::ones(IxDyn(&[2, 2]));
        let z = fitted(&seed, &factors);
        assert_relative_eq!(z[[0, 0]] + z[[0, 1]], 6.0, epsilon = 1e-8);
        assert_relative_eq!(z[[0, 0]] + z[[1, 0]], 3.0, epsilon = 1e-8);
    }

    #[test]
    fn single_precision_fit() {
        let seed = array![[40.0f32, 30.0], [35.0, 50.0]].into_dyn();
        let factors = ipf_from_vectors(
            &seed,
            vec![array![80.0f32, 70.0], array![60.0, 90.0]],
            &IpfConfig::<f32>::default(),
        )
        .unwrap();
        let mut z = seed.clone();
        factors.apply_in_place(&mut z).unwrap();
        assert_relative_eq!(z[[0, 0]] + z[[0, 1]], 80.0f32, epsilon = 1e-3);
        assert_relative_eq!(z[[0, 0]] + z[[1, 0]], 60.0f32, epsilon = 1e-3);
    }

    #[test]
    fn seed_shape_preconditions() {
        let seed = ArrayD::<f64>::ones(IxDyn(&[2, 2, 2]));
        let targets = vectors_to_margins(vec![array![1.0, 1.0], array![1.0, 1.0]]).unwrap();
        assert!(matches!(
            ipf(&seed, targets, &IpfConfig::default()),
            Err(RakingError::SeedRankMismatch {
                expected: 2,
                got: 3
            })
        ));

        let seed = ArrayD::<f64>::ones(IxDyn(&[3, 2]));
        let targets = vectors_to_margins(vec![array![1.0, 1.0], array![1.0, 1.0]]).unwrap();
        assert!(matches!(
            ipf(&seed, targets, &IpfConfig::default()),
            Err(RakingError::SeedShapeMismatch { .. })
        ));
    }

    #[test]
    fn widen_seed_preserves_values() {
        let counts = array![[1u32, 2], [3, 4]].into_dyn();
        let wide: ArrayD<f64> = widen_seed(&counts).unwrap();
        assert_eq!(wide, array![[1.0, 2.0], [3.0, 4.0]].into_dyn());
    }

    #[test]
    fn widen_seed_rejects_values_that_round() {
        // 2^24 + 1 has no exact f32 representation
        let counts = array![[16_777_217i64, 1], [2, 3]].into_dyn();
        let err = widen_seed::<i64, f32>(&counts).unwrap_err();
        assert!(matches!(err, RakingError::Unrepresentable { .. }));
    }
}
