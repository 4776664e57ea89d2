#![allow(clippy::type_complexity)]

pub use crossbeam_epoch as epoch;
pub use crossbeam_epoch::Guard;

pub use crate::index::session::IndexSession;
pub use crate::index::SubsetHashIndex;
pub use crate::indexed::IndexedKv;
pub use crate::key::SecondaryKey;
pub use crate::liveness::{AssumeLive, Liveness, LivenessFilter, Provider};
pub use crate::predicate::{GroupSpec, PredicateHandle, PredicateSpec};
pub use crate::query::{BoolMatrix, BoolOp, MatchFn, Operand, QueryIter};
pub use crate::stats::{Counters, GroupStats, MutationReport};
pub use crate::tracker::{ChangeTracker, UpdateOp};
pub use crate::types::errors::{FatalError, FatalResult, IndexError};
pub use crate::types::query_options::{CancelToken, QueryOptions};
pub use crate::types::RecordId;

pub mod index;
pub mod indexed;
pub mod key;
pub mod liveness;
pub mod predicate;
pub mod query;
pub mod stats;
pub mod tracker;
pub mod types;

pub(crate) mod group;
pub(crate) mod log;
pub(crate) mod persist;
