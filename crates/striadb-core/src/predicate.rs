//! Range predicates over a single column.
//!
//! These trees are produced by an external WHERE-clause parser; only the
//! types live here. A continuous range has the shape `[a op1] col [op2 b]`
//! with either side optionally undefined; a discrete range is an `IN` set
//! of sorted distinct values.

use std::fmt;

/// Comparison operator of one side of a continuous range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangeOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `=`
    Eq,
    /// No constraint on this side.
    #[default]
    Undefined,
}

impl RangeOp {
    /// Returns true unless the operator is [`RangeOp::Undefined`].
    #[must_use]
    pub fn is_defined(self) -> bool {
        self != Self::Undefined
    }

    fn symbol(self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Eq => "==",
            Self::Undefined => "??",
        }
    }
}

/// A continuous range condition `left_bound op1 col op2 right_bound`.
///
/// The operators read left to right: `3 < col <= 8` keeps values in
/// `(3, 8]`. Bounds are carried as `f64` regardless of the column type;
/// the evaluation paths snap them onto the column's value grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContinuousRange {
    /// Left bound `a`.
    pub left_bound: f64,
    /// Operator between `a` and the column.
    pub left_op: RangeOp,
    /// Operator between the column and `b`.
    pub right_op: RangeOp,
    /// Right bound `b`.
    pub right_bound: f64,
}

impl ContinuousRange {
    /// Builds a two-sided range.
    #[must_use]
    pub fn new(left_bound: f64, left_op: RangeOp, right_op: RangeOp, right_bound: f64) -> Self {
        Self {
            left_bound,
            left_op,
            right_op,
            right_bound,
        }
    }

    /// `col < b`
    #[must_use]
    pub fn less_than(b: f64) -> Self {
        Self::new(0.0, RangeOp::Undefined, RangeOp::Lt, b)
    }

    /// `col <= b`
    #[must_use]
    pub fn at_most(b: f64) -> Self {
        Self::new(0.0, RangeOp::Undefined, RangeOp::Le, b)
    }

    /// `col > b`
    #[must_use]
    pub fn greater_than(b: f64) -> Self {
        Self::new(0.0, RangeOp::Undefined, RangeOp::Gt, b)
    }

    /// `col >= b`
    #[must_use]
    pub fn at_least(b: f64) -> Self {
        Self::new(0.0, RangeOp::Undefined, RangeOp::Ge, b)
    }

    /// `col = v`
    #[must_use]
    pub fn equals(v: f64) -> Self {
        Self::new(0.0, RangeOp::Undefined, RangeOp::Eq, v)
    }

    /// `a <= col <= b`
    #[must_use]
    pub fn between(a: f64, b: f64) -> Self {
        Self::new(a, RangeOp::Le, RangeOp::Le, b)
    }

    /// Returns true if neither side carries a constraint.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        !self.left_op.is_defined() && !self.right_op.is_defined()
    }

    /// Tests a single value against the condition.
    ///
    /// Comparisons run in `f64`; a NaN value fails every defined operator.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn contains(&self, v: f64) -> bool {
        let left_ok = match self.left_op {
            RangeOp::Lt => self.left_bound < v,
            RangeOp::Le => self.left_bound <= v,
            RangeOp::Gt => self.left_bound > v,
            RangeOp::Ge => self.left_bound >= v,
            RangeOp::Eq => self.left_bound == v,
            RangeOp::Undefined => true,
        };
        let right_ok = match self.right_op {
            RangeOp::Lt => v < self.right_bound,
            RangeOp::Le => v <= self.right_bound,
            RangeOp::Gt => v > self.right_bound,
            RangeOp::Ge => v >= self.right_bound,
            RangeOp::Eq => v == self.right_bound,
            RangeOp::Undefined => true,
        };
        left_ok && right_ok
    }
}

impl fmt::Display for ContinuousRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.left_op.is_defined(), self.right_op.is_defined()) {
            (true, true) => write!(
                f,
                "{} {} col {} {}",
                self.left_bound,
                self.left_op.symbol(),
                self.right_op.symbol(),
                self.right_bound
            ),
            (true, false) => write!(f, "{} {} col", self.left_bound, self.left_op.symbol()),
            (false, _) => write!(f, "col {} {}", self.right_op.symbol(), self.right_bound),
        }
    }
}

/// A discrete range condition `col IN {v1, v2, ...}`.
///
/// Values are kept sorted and distinct.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscreteRange {
    values: Vec<f64>,
}

impl DiscreteRange {
    /// Builds the set, sorting and deduplicating the input.
    ///
    /// NaN values are discarded: no stored value compares equal to them.
    #[must_use]
    pub fn new(mut values: Vec<f64>) -> Self {
        values.retain(|v| !v.is_nan());
        values.sort_by(f64::total_cmp);
        values.dedup();
        Self { values }
    }

    /// The sorted distinct member values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Number of member values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true for the empty set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Tests membership of a single value.
    #[must_use]
    pub fn contains(&self, v: f64) -> bool {
        self.values
            .binary_search_by(|probe| probe.total_cmp(&v))
            .is_ok()
    }

    /// Returns `Some((min, max))` when the members form a dense integer
    /// interval, i.e. `max - min + 1 == len`.
    ///
    /// Such a set is equivalent to the continuous range `[min, max]` on an
    /// integer column.
    #[must_use]
    pub fn as_dense_interval(&self) -> Option<(f64, f64)> {
        let (first, last) = (*self.values.first()?, *self.values.last()?);
        #[allow(clippy::cast_precision_loss)]
        if last - first + 1.0 == self.values.len() as f64 {
            Some((first, last))
        } else {
            None
        }
    }
}

impl fmt::Display for DiscreteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "col IN {{{} values}}", self.values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_two_sided() {
        let rng = ContinuousRange::new(3.0, RangeOp::Lt, RangeOp::Le, 8.0);
        assert!(!rng.contains(3.0));
        assert!(rng.contains(3.5));
        assert!(rng.contains(8.0));
        assert!(!rng.contains(8.5));
    }

    #[test]
    fn test_contains_rejects_nan() {
        let rng = ContinuousRange::less_than(10.0);
        assert!(!rng.contains(f64::NAN));
    }

    #[test]
    fn test_equality_side() {
        let rng = ContinuousRange::equals(5.0);
        assert!(rng.contains(5.0));
        assert!(!rng.contains(5.1));
    }

    #[test]
    fn test_left_operator_reads_left_to_right() {
        // 7 > col means col < 7.
        let rng = ContinuousRange::new(7.0, RangeOp::Gt, RangeOp::Undefined, 0.0);
        assert!(rng.contains(6.0));
        assert!(!rng.contains(7.0));
    }

    #[test]
    fn test_discrete_sorts_and_dedups() {
        let set = DiscreteRange::new(vec![5.0, 2.0, 5.0, 1.0]);
        assert_eq!(set.values(), &[1.0, 2.0, 5.0]);
        assert!(set.contains(2.0));
        assert!(!set.contains(3.0));
    }

    #[test]
    fn test_dense_interval_detection() {
        assert_eq!(
            DiscreteRange::new(vec![4.0, 5.0, 6.0]).as_dense_interval(),
            Some((4.0, 6.0))
        );
        assert_eq!(DiscreteRange::new(vec![4.0, 6.0]).as_dense_interval(), None);
    }
}
