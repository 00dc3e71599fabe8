//! Dimension-group declarations.
//!
//! A [`DimIndices`] records, for each margin or factor, which axes of the
//! full array it ranges over and in what internal order. It is the piece of
//! shared vocabulary between [`ArrayMargins`](crate::ArrayMargins),
//! [`ArrayFactors`](crate::ArrayFactors), and the fitting engine: every
//! bundle of arrays is interpreted against one of these declarations.
//!
//! Groups may overlap (`[[0, 2], [1, 2]]` is the classic two-margin case
//! sharing axis 2), but two groups may never cover the *same* set of axes,
//! and together the groups must cover every axis of the array.

use smallvec::SmallVec;

use crate::error::{RakingError, Result};

/// Axis labels for one margin, in declared order.
///
/// Inline storage covers the common case of a handful of axes per margin.
pub type AxisGroup = SmallVec<[usize; 4]>;

/// An ordered collection of axis groups, one per margin/factor.
///
/// Validated on construction and immutable afterwards; both
/// [`ArrayMargins`](crate::ArrayMargins) and
/// [`ArrayFactors`](crate::ArrayFactors) carry their own copy.
///
/// Axis labels are 0-based, matching [`ndarray::Axis`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DimIndices {
    groups: Vec<AxisGroup>,
    rank: usize,
}

impl DimIndices {
    /// Build a declaration from explicit axis groups.
    ///
    /// The rank of the system is inferred as the largest axis label plus
    /// one. Validation enforces:
    ///
    /// - at least one non-empty group,
    /// - no axis repeated within a group,
    /// - no two groups covering the same axis set (declared order aside),
    /// - every axis `0..rank` covered by at least one group.
    ///
    /// # Errors
    ///
    /// One of the `InvalidDimIndices`-family variants of [`RakingError`],
    /// naming the offending group or axes.
    pub fn new<I, G>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = G>,
        G: IntoIterator<Item = usize>,
    {
        let groups: Vec<AxisGroup> = groups
            .into_iter()
            .map(|g| g.into_iter().collect())
            .collect();

        if groups.is_empty() {
            return Err(RakingError::NoGroups);
        }
        for (j, group) in groups.iter().enumerate() {
            if group.is_empty() {
                return Err(RakingError::EmptyGroup { group: j });
            }
            for (p, &axis) in group.iter().enumerate() {
                if group[..p].contains(&axis) {
                    return Err(RakingError::RepeatedAxis { group: j, axis });
                }
            }
        }

        let sets: Vec<Vec<usize>> = groups
            .iter()
            .map(|g| {
                let mut set: Vec<usize> = g.iter().copied().collect();
                set.sort_unstable();
                set
            })
            .collect();
        for i in 0..sets.len() {
            for j in (i + 1)..sets.len() {
                if sets[i] == sets[j] {
                    return Err(RakingError::DuplicateGroup { first: i, second: j });
                }
            }
        }

        let rank = groups
            .iter()
            .flat_map(|g| g.iter().copied())
            .max()
            .expect("groups validated non-empty")
            + 1;

        let mut covered = vec![false; rank];
        for group in &groups {
            for &axis in group {
                covered[axis] = true;
            }
        }
        let missing: Vec<usize> = covered
            .iter()
            .enumerate()
            .filter(|&(_, &c)| !c)
            .map(|(d, _)| d)
            .collect();
        if !missing.is_empty() {
            return Err(RakingError::MissingAxes { missing });
        }

        Ok(Self { groups, rank })
    }

    /// One group per axis: `[[0], [1], ..., [rank - 1]]`.
    ///
    /// This is the declaration behind the flat list-of-vectors entry points.
    pub fn singletons(rank: usize) -> Result<Self> {
        Self::new((0..rank).map(|d| [d]))
    }

    /// Non-overlapping groups assigned in traversal order, each margin
    /// contributing `ranks[j]` consecutive axes.
    ///
    /// Used when the caller supplies margin arrays without an explicit
    /// declaration.
    pub fn default_for(ranks: &[usize]) -> Result<Self> {
        let mut next = 0;
        Self::new(ranks.iter().map(|&r| {
            let group: Vec<usize> = (next..next + r).collect();
            next += r;
            group
        }))
    }

    /// The rank `D` of the full array.
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// The number of margins/factors `J`.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Always false after construction; present for API completeness.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// The axis labels of group `j`, in declared order.
    pub fn group(&self, j: usize) -> &[usize] {
        &self.groups[j]
    }

    /// Iterate over all groups in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.groups.iter().map(|g| g.as_slice())
    }

    /// Axes of the full array *not* named by group `j`, ascending.
    pub fn complement(&self, j: usize) -> Vec<usize> {
        (0..self.rank)
            .filter(|d| !self.groups[j].contains(d))
            .collect()
    }

    /// Every singleton `[d]` together with every non-empty pairwise
    /// intersection of two groups, deduplicated, each in ascending order.
    ///
    /// These are the subsets on which overlapping margins must agree; the
    /// overlap-consistency check and the averaging repair both iterate over
    /// this list.
    pub fn shared_subsets(&self) -> Vec<Vec<usize>> {
        let mut subsets: Vec<Vec<usize>> = (0..self.rank).map(|d| vec![d]).collect();
        for i in 0..self.groups.len() {
            for j in (i + 1)..self.groups.len() {
                let mut shared: Vec<usize> = self.groups[i]
                    .iter()
                    .copied()
                    .filter(|d| self.groups[j].contains(d))
                    .collect();
                shared.sort_unstable();
                if !shared.is_empty() && !subsets.contains(&shared) {
                    subsets.push(shared);
                }
            }
        }
        subsets
    }
}
