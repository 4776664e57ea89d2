pub mod iterators;

pub use iterators::QueryIter;

use crate::key::SecondaryKey;
use zerocopy::IntoBytes;

//------------ Operand -------------------------------------------------------

/// One (predicate, key-set) pair of a query, with the keys already
/// erased to bytes.
///
/// Build operands through [operand](crate::SubsetHashIndex::operand) so
/// the handle and key type are validated against the index; then compose
/// them into operand groups for [query](crate::SubsetHashIndex::query).
/// An operand with several keys matches a record id when any of its
/// keys' chains holds a live entry for it.
#[derive(Debug, Clone)]
pub struct Operand {
    pub(crate) instance: u64,
    pub(crate) group: u32,
    pub(crate) ordinal: u8,
    pub(crate) keys: Vec<Box<[u8]>>,
}

impl Operand {
    pub(crate) fn new<K: SecondaryKey>(
        instance: u64,
        group: u32,
        ordinal: u8,
        keys: &[K],
    ) -> Self {
        Self {
            instance,
            group,
            ordinal,
            keys: keys
                .iter()
                .map(|k| k.as_bytes().to_vec().into_boxed_slice())
                .collect(),
        }
    }
}

//------------ BoolMatrix ----------------------------------------------------

/// The per-step match matrix handed to a query's combinator.
///
/// Row `i` stands for operand group `i`; entry `(i, j)` is true when some
/// chain of operand `j` in that group holds a live entry for the record
/// id currently under consideration.
#[derive(Debug, Clone)]
pub struct BoolMatrix {
    starts: Vec<usize>,
    bits: Vec<bool>,
}

impl BoolMatrix {
    pub(crate) fn new(row_widths: &[usize]) -> Self {
        let mut starts = Vec::with_capacity(row_widths.len() + 1);
        let mut total = 0;
        for width in row_widths {
            starts.push(total);
            total += width;
        }
        starts.push(total);
        Self {
            starts,
            bits: vec![false; total],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.bits.fill(false);
    }

    pub(crate) fn set(&mut self, row: usize, col: usize) {
        let idx = self.starts[row] + col;
        self.bits[idx] = true;
    }

    pub fn rows(&self) -> usize {
        self.starts.len() - 1
    }

    pub fn row(&self, row: usize) -> &[bool] {
        &self.bits[self.starts[row]..self.starts[row + 1]]
    }

    pub fn get(&self, row: usize, col: usize) -> bool {
        self.bits[self.starts[row] + col]
    }

    /// True when every entry of the row is set.
    pub fn row_all(&self, row: usize) -> bool {
        self.row(row).iter().all(|b| *b)
    }

    /// True when at least one entry of the row is set.
    pub fn row_any(&self, row: usize) -> bool {
        self.row(row).iter().any(|b| *b)
    }
}

//------------ BoolOp / MatchFn ----------------------------------------------

/// The boxed combinator the convenience query shapes produce.
pub type MatchFn = Box<dyn Fn(&BoolMatrix) -> bool + Send + Sync>;

/// Logical combinators for the fixed-arity query shapes: each operand
/// group must match (`And`), or at least one must (`Or`). Arbitrary
/// combinators go through [query](crate::SubsetHashIndex::query) with a
/// custom closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    pub fn matcher(self) -> MatchFn {
        match self {
            BoolOp::And => Box::new(|m: &BoolMatrix| {
                (0..m.rows()).all(|row| m.row_all(row))
            }),
            BoolOp::Or => Box::new(|m: &BoolMatrix| {
                (0..m.rows()).any(|row| m.row_any(row))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matrix_rows_are_independent() {
        let mut m = BoolMatrix::new(&[2, 1]);
        assert_eq!(m.rows(), 2);
        m.set(0, 1);
        m.set(1, 0);
        assert!(!m.get(0, 0));
        assert!(m.get(0, 1));
        assert!(m.row_any(0));
        assert!(!m.row_all(0));
        assert!(m.row_all(1));

        m.reset();
        assert!(!m.row_any(0) && !m.row_any(1));
    }

    #[test]
    fn and_or_matchers() {
        let mut m = BoolMatrix::new(&[1, 1]);
        m.set(0, 0);
        assert!(!BoolOp::And.matcher()(&m));
        assert!(BoolOp::Or.matcher()(&m));
        m.set(1, 0);
        assert!(BoolOp::And.matcher()(&m));
    }
}
