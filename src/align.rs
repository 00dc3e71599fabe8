//! Alignment and reduction utilities.
//!
//! Margins and factors are lower-rank arrays tagged with the axes they
//! range over. Everything the engine does with them (elementwise
//! multiplication against the full-rank seed, marginal sums, the
//! shared-subset algebra behind overlap checks) goes through the helpers
//! in this module:
//!
//! - [`aligned_view`]: permute an unsorted-label array into ascending axis
//!   order and insert length-1 axes, producing a full-rank broadcastable
//!   view without copying.
//! - [`marginal_sum`] / [`aligned_marginal_sum`]: sum a full-rank array
//!   over the complement of a set of axes.
//! - [`reduce_to_subset`] / [`subset_aligned_view`]: the same operations
//!   relative to a tagged array's own frame, used when two margins are
//!   compared on the axes they share.

use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use num_traits::Zero;
use std::ops::Add;

use crate::error::{RakingError, Result};
use crate::indices::DimIndices;

/// True if `axes` is strictly ascending.
pub(crate) fn is_sorted(axes: &[usize]) -> bool {
    axes.windows(2).all(|w| w[0] < w[1])
}

/// The permutation that rearranges `axes` into ascending order.
///
/// `perm[i]` is the position within `axes` of the `i`-th smallest label, so
/// `permuted_axes(perm)` on an array whose axes carry those labels yields
/// ascending label order.
pub(crate) fn sort_permutation(axes: &[usize]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..axes.len()).collect();
    perm.sort_by_key(|&i| axes[i]);
    perm
}

/// View `a`, whose axes carry the labels in `labels` in declared order,
/// as a `rank`-dimensional broadcastable array.
///
/// Unsorted labels are permuted into ascending order first; every axis of
/// the full array not named in `labels` becomes a length-1 axis. The result
/// is a reshape/transpose chain over `a`'s storage; no elements are copied.
pub fn aligned_view<'a, F>(a: &'a ArrayD<F>, labels: &[usize], rank: usize) -> ArrayViewD<'a, F> {
    let mut view = a.view();
    if !is_sorted(labels) {
        view = view.permuted_axes(IxDyn(&sort_permutation(labels)));
    }
    let mut sorted: Vec<usize> = labels.to_vec();
    sorted.sort_unstable();
    let mut next = sorted.iter().peekable();
    for d in 0..rank {
        if next.peek() == Some(&&d) {
            next.next();
        } else {
            view = view.insert_axis(Axis(d));
        }
    }
    view
}

/// Full-rank broadcastable views of every component of a bundle.
pub fn aligned_views<'a, F>(
    arrays: &'a [ArrayD<F>],
    indices: &DimIndices,
) -> Vec<ArrayViewD<'a, F>> {
    arrays
        .iter()
        .enumerate()
        .map(|(j, a)| aligned_view(a, indices.group(j), indices.rank()))
        .collect()
}

/// Sum `a` over every axis not named in `keep` (which must be ascending).
///
/// The result's axes follow `keep`'s order.
pub(crate) fn marginal_sum<F>(a: ArrayViewD<'_, F>, keep: &[usize]) -> ArrayD<F>
where
    F: Clone + Zero + Add<Output = F>,
{
    let summed_out: Vec<usize> = (0..a.ndim()).rev().filter(|d| !keep.contains(d)).collect();
    match summed_out.split_first() {
        None => a.to_owned(),
        Some((&first, rest)) => {
            let mut out = a.sum_axis(Axis(first));
            for &d in rest {
                out = out.sum_axis(Axis(d));
            }
            out
        }
    }
}

/// Like [`marginal_sum`] but keeping the full rank: summed-out axes remain
/// as length-1 axes, so the result broadcasts against the original shape.
pub(crate) fn aligned_marginal_sum<F>(a: ArrayViewD<'_, F>, keep: &[usize]) -> ArrayD<F>
where
    F: Clone + Zero + Add<Output = F>,
{
    let rank = a.ndim();
    let mut out = marginal_sum(a, keep);
    for d in 0..rank {
        if !keep.contains(&d) {
            out = out.insert_axis(Axis(d));
        }
    }
    out
}

/// Reduce a tagged array onto the axes named in `subset`.
///
/// `labels` gives `a`'s axis labels in declared order; `subset` must be
/// ascending. Positions whose label is outside `subset` are summed out, and
/// the surviving axes are permuted into ascending label order.
pub(crate) fn reduce_to_subset<F>(
    a: ArrayViewD<'_, F>,
    labels: &[usize],
    subset: &[usize],
) -> ArrayD<F>
where
    F: Clone + Zero + Add<Output = F>,
{
    let summed_out: Vec<usize> = (0..labels.len())
        .rev()
        .filter(|&p| !subset.contains(&labels[p]))
        .collect();
    let mut out = match summed_out.split_first() {
        None => a.to_owned(),
        Some((&first, rest)) => {
            let mut out = a.sum_axis(Axis(first));
            for &p in rest {
                out = out.sum_axis(Axis(p));
            }
            out
        }
    };
    let kept: Vec<usize> = labels
        .iter()
        .copied()
        .filter(|l| subset.contains(l))
        .collect();
    if !is_sorted(&kept) {
        out = out.permuted_axes(IxDyn(&sort_permutation(&kept)));
    }
    out
}

/// View `sub`, whose axes carry the ascending labels in `subset`, in the
/// frame of an array whose axes carry `labels` (declared order), ready for
/// broadcasting against it.
pub(crate) fn subset_aligned_view<'a, F>(
    sub: &'a ArrayD<F>,
    subset: &[usize],
    labels: &[usize],
) -> ArrayViewD<'a, F> {
    let kept: Vec<usize> = labels
        .iter()
        .copied()
        .filter(|l| subset.contains(l))
        .collect();
    let perm: Vec<usize> = kept
        .iter()
        .map(|l| {
            subset
                .binary_search(l)
                .expect("kept labels are drawn from subset")
        })
        .collect();
    let mut view = sub.view();
    if !perm.iter().enumerate().all(|(i, &p)| i == p) {
        view = view.permuted_axes(IxDyn(&perm));
    }
    for (p, l) in labels.iter().enumerate() {
        if !subset.contains(l) {
            view = view.insert_axis(Axis(p));
        }
    }
    view
}

/// Permute an array whose axes are in ascending label order back into the
/// declared order of `labels`.
pub(crate) fn to_declared_order<F>(a: ArrayD<F>, labels: &[usize]) -> ArrayD<F> {
    if is_sorted(labels) {
        return a;
    }
    let mut sorted: Vec<usize> = labels.to_vec();
    sorted.sort_unstable();
    let perm: Vec<usize> = labels
        .iter()
        .map(|l| {
            sorted
                .binary_search(l)
                .expect("labels and their sorted copy hold the same values")
        })
        .collect();
    a.permuted_axes(IxDyn(&perm))
}

/// Derive the full shape implied by a bundle of tagged arrays, enforcing
/// that every shared axis is reported with one extent.
///
/// Shared shape policy for [`ArrayMargins`](crate::ArrayMargins) and
/// [`ArrayFactors`](crate::ArrayFactors).
pub(crate) fn derive_shape<F>(arrays: &[ArrayD<F>], indices: &DimIndices) -> Result<Vec<usize>> {
    if arrays.len() != indices.len() {
        return Err(RakingError::GroupCountMismatch {
            expected: indices.len(),
            got: arrays.len(),
        });
    }
    let mut shape = vec![0usize; indices.rank()];
    let mut seen = vec![false; indices.rank()];
    for (j, a) in arrays.iter().enumerate() {
        let group = indices.group(j);
        if a.ndim() != group.len() {
            return Err(RakingError::MarginRankMismatch {
                margin: j,
                expected: group.len(),
                got: a.ndim(),
            });
        }
        for (p, &axis) in group.iter().enumerate() {
            let extent = a.shape()[p];
            if seen[axis] && shape[axis] != extent {
                return Err(RakingError::ExtentMismatch {
                    margin: j,
                    axis,
                    expected: shape[axis],
                    got: extent,
                });
            }
            shape[axis] = extent;
            seen[axis] = true;
        }
    }
    Ok(shape)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn aligned_view_inserts_unit_axes() {
        let a = array![1.0, 2.0, 3.0].into_dyn();
        let v = aligned_view(&a, &[1], 3);
        assert_eq!(v.shape(), &[1, 3, 1]);
        assert_eq!(v[[0, 2, 0]], 3.0);
    }

    #[test]
    fn aligned_view_sorts_declared_labels() {
        // axes labelled [2, 1]: shape (n2, n1) = (2, 3)
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        let v = aligned_view(&a, &[2, 1], 3);
        assert_eq!(v.shape(), &[1, 3, 2]);
        // element at (axis1 = i, axis2 = k) is a[[k, i]]
        assert_eq!(v[[0, 1, 1]], 5.0);
        assert_eq!(v[[0, 2, 0]], 3.0);
    }

    #[test]
    fn marginal_sum_drops_complement_axes() {
        let a = ArrayD::from_shape_vec(IxDyn(&[2, 3]), (1..=6).map(f64::from).collect()).unwrap();
        let rows = marginal_sum(a.view(), &[0]);
        assert_eq!(rows.shape(), &[2]);
        assert_eq!(rows[[0]], 6.0);
        assert_eq!(rows[[1]], 15.0);
        let cols = marginal_sum(a.view(), &[1]);
        assert_eq!(cols.shape(), &[3]);
        assert_eq!(cols[[0]], 5.0);
    }

    #[test]
    fn marginal_sum_keep_all_is_identity() {
        let a = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        let same = marginal_sum(a.view(), &[0, 1]);
        assert_eq!(same, a);
    }

    #[test]
    fn aligned_marginal_sum_broadcasts_back() {
        let a = ArrayD::from_shape_vec(IxDyn(&[2, 3, 2]), (1..=12).map(f64::from).collect())
            .unwrap();
        let m = aligned_marginal_sum(a.view(), &[1]);
        assert_eq!(m.shape(), &[1, 3, 1]);
        // axis-1 slice 0: 1 + 2 + 7 + 8
        assert_eq!(m[[0, 0, 0]], 18.0);
    }

    #[test]
    fn reduce_to_subset_handles_unsorted_labels() {
        // array labelled [2, 1], shape (n2, n1) = (2, 3)
        let a = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]].into_dyn();
        // reduce onto [1]: sum out the axis labelled 2
        let r = reduce_to_subset(a.view(), &[2, 1], &[1]);
        assert_eq!(r.shape(), &[3]);
        assert_eq!(r[[0]], 5.0);
        assert_eq!(r[[2]], 9.0);
        // reduce onto [1, 2]: nothing summed, axes reordered ascending
        let r = reduce_to_subset(a.view(), &[2, 1], &[1, 2]);
        assert_eq!(r.shape(), &[3, 2]);
        assert_eq!(r[[2, 0]], 3.0);
    }

    #[test]
    fn subset_aligned_view_matches_target_frame() {
        // ratio over subset [2] viewed in the frame of an array labelled [2, 1]
        let ratio = array![10.0, 20.0].into_dyn();
        let v = subset_aligned_view(&ratio, &[2], &[2, 1]);
        assert_eq!(v.shape(), &[2, 1]);
        assert_eq!(v[[1, 0]], 20.0);
    }

    #[test]
    fn subset_aligned_view_permutes_into_declared_order() {
        // sub labelled [1, 2] ascending, target frame labelled [2, 1]
        let sub = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn(); // (n1, n2)
        let v = subset_aligned_view(&sub, &[1, 2], &[2, 1]);
        assert_eq!(v.shape(), &[2, 3]);
        assert_eq!(v[[1, 0]], 2.0); // (axis2 = 1, axis1 = 0)
    }

    #[test]
    fn declared_order_round_trip() {
        let sorted = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn(); // labels [1, 2]
        let declared = to_declared_order(sorted.clone(), &[2, 1]);
        assert_eq!(declared.shape(), &[2, 3]);
        assert_eq!(declared[[0, 2]], 5.0);
        let back = to_declared_order(declared, &[2, 1]);
        // applying the same permutation to already-declared data is not an
        // involution in general, so only check the sorted path is identity
        let same = to_declared_order(sorted.clone(), &[1, 2]);
        assert_eq!(same, sorted);
        assert_eq!(back.ndim(), 2);
    }

    #[test]
    fn derive_shape_agrees_across_margins() {
        let di = DimIndices::new([vec![0, 2], vec![1, 2]]).unwrap();
        let a = ArrayD::<f64>::zeros(IxDyn(&[2, 4]));
        let b = ArrayD::<f64>::zeros(IxDyn(&[3, 4]));
        let shape = derive_shape(&[a, b], &di).unwrap();
        assert_eq!(shape, vec![2, 3, 4]);
    }

    #[test]
    fn derive_shape_rejects_extent_conflicts() {
        let di = DimIndices::new([vec![0, 2], vec![1, 2]]).unwrap();
        let a = ArrayD::<f64>::zeros(IxDyn(&[2, 4]));
        let b = ArrayD::<f64>::zeros(IxDyn(&[3, 5]));
        let err = derive_shape(&[a, b], &di).unwrap_err();
        assert!(matches!(
            err,
            RakingError::ExtentMismatch {
                margin: 1,
                axis: 2,
                expected: 4,
                got: 5
            }
        ));
    }

    #[test]
    fn derive_shape_rejects_rank_and_count_mismatches() {
        let di = DimIndices::new([vec![0], vec![1]]).unwrap();
        let a = ArrayD::<f64>::zeros(IxDyn(&[2]));
        assert!(matches!(
            derive_shape(&[a.clone()], &di),
            Err(RakingError::GroupCountMismatch {
                expected: 2,
                got: 1
            })
        ));
        let b = ArrayD::<f64>::zeros(IxDyn(&[2, 2]));
        assert!(matches!(
            derive_shape(&[a, b], &di),
            Err(RakingError::MarginRankMismatch {
                margin: 1,
                expected: 1,
                got: 2
            })
        ));
    }
}
