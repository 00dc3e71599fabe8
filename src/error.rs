//! Error types shared across the crate.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RakingError>;

/// Everything that can go wrong while declaring dimension groups, bundling
/// margins or factors, or running the fitting engine.
///
/// Each variant carries enough context to identify the offending margin or
/// axis at the call site. Non-fatal conditions (non-convergence, proportion
/// normalization, overlap averaging under `force_consistency`) are reported
/// through `tracing` instead of this enum.
#[derive(Debug, Error)]
pub enum RakingError {
    /// At least one dimension group is required.
    #[error("at least one dimension group is required")]
    NoGroups,

    /// A dimension group names no axes.
    #[error("dimension group {group} is empty")]
    EmptyGroup { group: usize },

    /// Some axes below the largest label are covered by no group.
    #[error("axes {missing:?} are not covered by any dimension group")]
    MissingAxes { missing: Vec<usize> },

    /// An axis occurs twice within one group.
    #[error("axis {axis} appears more than once in dimension group {group}")]
    RepeatedAxis { group: usize, axis: usize },

    /// Two groups cover the same set of axes (order aside).
    #[error("dimension groups {first} and {second} cover the same axes")]
    DuplicateGroup { first: usize, second: usize },

    /// The number of arrays does not match the number of dimension groups.
    #[error("expected {expected} arrays for {expected} dimension groups, got {got}")]
    GroupCountMismatch { expected: usize, got: usize },

    /// A margin or factor array has a different rank than its group.
    #[error("margin {margin} has rank {got} but its dimension group names {expected} axes")]
    MarginRankMismatch {
        margin: usize,
        expected: usize,
        got: usize,
    },

    /// Two arrays disagree on the extent of a shared axis.
    #[error("margin {margin} has extent {got} along axis {axis}, which was previously seen with extent {expected}")]
    ExtentMismatch {
        margin: usize,
        axis: usize,
        expected: usize,
        got: usize,
    },

    /// The seed's rank does not match the rank spanned by the groups.
    #[error("seed has rank {got} but the dimension groups span rank {expected}")]
    SeedRankMismatch { expected: usize, got: usize },

    /// The seed's shape does not match the margins' derived shape.
    #[error("seed shape {got:?} does not match the margins' shape {expected:?}")]
    SeedShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Margins disagree on a shared dimension subset and averaging was not
    /// requested.
    #[error("margins disagree on shared axes {axes:?}; set force_consistency to average them")]
    InconsistentOverlap { axes: Vec<usize> },

    /// A seed marginal is zero where the corresponding target is non-zero,
    /// so no finite factor exists.
    #[error("margin {margin}: seed marginal is zero where the target is non-zero")]
    DegenerateSeed { margin: usize },

    /// A scaled value cannot be represented exactly in the requested element
    /// type.
    #[error("scaled value {value} is not exactly representable in the requested element type")]
    Unrepresentable { value: f64 },
}
