use log::trace;

use crate::group::chain::ChainWalk;
use crate::liveness::Liveness;
use crate::query::BoolMatrix;
use crate::types::errors::{FatalResult, IndexError};
use crate::types::query_options::QueryOptions;
use crate::types::RecordId;

//------------ MergedWalk ----------------------------------------------------

// The chains of one operand's key set, advanced as one walk. Each chain
// runs newest-first, so the union's newest entry is always one of the
// fronts.
pub(crate) struct MergedWalk<'g> {
    walks: Vec<ChainWalk<'g>>,
}

impl<'g> MergedWalk<'g> {
    pub(crate) fn new(walks: Vec<ChainWalk<'g>>) -> Self {
        Self { walks }
    }

    fn front(&self) -> Option<RecordId> {
        self.walks.iter().filter_map(ChainWalk::front).max()
    }

    // Consumes `id` from every chain whose front carries it.
    fn advance_past(&mut self, id: RecordId) -> FatalResult<()> {
        for walk in &mut self.walks {
            if walk.front() == Some(id) {
                walk.advance()?;
            }
        }
        Ok(())
    }
}

//------------ PairState -----------------------------------------------------

pub(crate) struct PairState<'g> {
    pub(crate) row: usize,
    pub(crate) col: usize,
    pub(crate) walk: MergedWalk<'g>,
}

//------------ QueryIter -----------------------------------------------------

/// The lazy result stream of a query: record ids for which the
/// combinator matched and the liveness check passed, in strictly
/// decreasing order, without duplicates.
///
/// The iterator advances all chain walks in interleaved fashion. Record
/// ids are monotone in provider write order and every chain runs
/// newest-first, so the greatest front across all walks is the next id
/// to consider; walks whose front carries it contribute their matrix
/// entry and move on, walks with older fronts stay put.
///
/// Cancellation and the deadline are checked at every step; when they
/// trip, the iterator yields one
/// [Cancelled](crate::IndexError::Cancelled) error and ends.
pub struct QueryIter<'g, L, F> {
    pairs: Vec<PairState<'g>>,
    matrix: BoolMatrix,
    match_fn: F,
    live: L,
    opts: QueryOptions,
    last_emitted: Option<RecordId>,
    yielded: usize,
    done: bool,
}

impl<'g, L, F> QueryIter<'g, L, F>
where
    L: Liveness,
    F: Fn(&BoolMatrix) -> bool,
{
    pub(crate) fn new(
        pairs: Vec<PairState<'g>>,
        row_widths: &[usize],
        match_fn: F,
        live: L,
        opts: QueryOptions,
    ) -> Self {
        Self {
            pairs,
            matrix: BoolMatrix::new(row_widths),
            match_fn,
            live,
            opts,
            last_emitted: None,
            yielded: 0,
            done: false,
        }
    }

    fn step(&mut self) -> Option<Result<RecordId, IndexError>> {
        loop {
            if self.opts.interrupted() {
                trace!("query: cancelled");
                self.done = true;
                return Some(Err(IndexError::Cancelled));
            }

            // The greatest front over all active walks is the next
            // candidate.
            let candidate = self
                .pairs
                .iter()
                .filter_map(|p| p.walk.front())
                .max()?;

            self.matrix.reset();
            for pair in &mut self.pairs {
                if pair.walk.front() == Some(candidate) {
                    self.matrix.set(pair.row, pair.col);
                    if let Err(err) = pair.walk.advance_past(candidate) {
                        self.done = true;
                        return Some(Err(err.into()));
                    }
                }
            }

            if !(self.match_fn)(&self.matrix) {
                continue;
            }
            if self.last_emitted == Some(candidate) {
                continue;
            }
            if !self.live.is_live(candidate) {
                trace!("query: {} no longer live", candidate);
                continue;
            }

            self.last_emitted = Some(candidate);
            self.yielded += 1;
            if let Some(limit) = self.opts.limit {
                if self.yielded >= limit {
                    self.done = true;
                }
            }
            return Some(Ok(candidate));
        }
    }
}

impl<L, F> Iterator for QueryIter<'_, L, F>
where
    L: Liveness,
    F: Fn(&BoolMatrix) -> bool,
{
    type Item = Result<RecordId, IndexError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Some(item) => Some(item),
            None => {
                self.done = true;
                None
            }
        }
    }
}
