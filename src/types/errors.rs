use std::fmt;

/// Possible errors returned by methods on a [SubsetHashIndex](
/// crate::SubsetHashIndex) and its sessions.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum IndexError {
    /// A predicate with this name is already registered somewhere in this
    /// index. Predicate names are unique across all groups.
    DuplicatePredicateName,
    /// A group can hold at most 255 predicates.
    TooManyPredicates,
    /// The secondary-key type of the group is larger than 256 bytes.
    OversizedSecondaryKey,
    /// The packed composite key for this group would not fit the slot
    /// offset arithmetic, or does not fit inside a single log page.
    CompositeKeyTooLarge,
    /// The group geometry is unusable: the hash-table size is not a power
    /// of two, the page size is not a power of two, the segment size is
    /// not a multiple of the page size, or the predicate vector is empty.
    InvalidGroupGeometry,
    /// The log settings ask for a read cache or copy-reads-to-tail, which
    /// a secondary store does not support.
    UnsupportedLogSettings,
    /// The index has reached its fixed group capacity.
    TooManyGroups,
    /// The predicate handle was issued by a different index instance, or
    /// refers to a group this index does not know about.
    ForeignPredicateHandle,
    /// The provider reported that its pending-operation limit is reached.
    /// Retry through the provider's completion mechanism.
    OperationPending,
    /// The secondary log has reached its configured memory size. The
    /// mutation was not applied.
    LogFull,
    /// A predicate function panicked while evaluating a record. The
    /// mutation was aborted before any chain was touched.
    PredicateFailed,
    /// Writing a checkpoint failed. The previous checkpoint, if any, is
    /// still intact. Details are logged.
    PersistFailed,
    /// A recovered manifest does not agree with the registered group:
    /// a predicate name is bound to a different ordinal, or the geometry
    /// differs from the checkpointed one.
    RecoveryMismatch,
    /// A mutation was attempted on a tracker that is not in the right
    /// stage, e.g. an update without an after-image.
    TrackerNotReady,
    /// The query was cancelled, or its deadline expired.
    Cancelled,
    /// Unexpected internal state while retrying an operation. The index
    /// must be considered corrupted.
    InternalInvariantViolation,
}

impl std::error::Error for IndexError {}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            IndexError::DuplicatePredicateName => {
                write!(f, "Error: A predicate with this name already exists.")
            }
            IndexError::TooManyPredicates => {
                write!(
                    f,
                    "Error: A group can index at most 255 predicates."
                )
            }
            IndexError::OversizedSecondaryKey => {
                write!(
                    f,
                    "Error: The secondary-key type exceeds 256 bytes."
                )
            }
            IndexError::CompositeKeyTooLarge => {
                write!(
                    f,
                    "Error: The composite key for this group is too large \
                    for its slot layout."
                )
            }
            IndexError::InvalidGroupGeometry => {
                write!(
                    f,
                    "Error: The group geometry (hash-table size, log page \
                    or segment size, predicate count) is invalid."
                )
            }
            IndexError::UnsupportedLogSettings => {
                write!(
                    f,
                    "Error: Read-cache and copy-reads-to-tail settings are \
                    not supported for secondary stores."
                )
            }
            IndexError::TooManyGroups => {
                write!(
                    f,
                    "Error: The index cannot register any more groups."
                )
            }
            IndexError::ForeignPredicateHandle => {
                write!(
                    f,
                    "Error: The predicate handle does not belong to this \
                    index."
                )
            }
            IndexError::OperationPending => {
                write!(
                    f,
                    "Error: The provider's pending-operation limit was \
                    reached. Retry via its completion mechanism."
                )
            }
            IndexError::LogFull => {
                write!(
                    f,
                    "Error: The secondary log reached its configured \
                    memory size."
                )
            }
            IndexError::PredicateFailed => {
                write!(
                    f,
                    "Error: A predicate function failed; the mutation was \
                    aborted."
                )
            }
            IndexError::PersistFailed => {
                write!(f, "Error: The checkpoint could not be written.")
            }
            IndexError::RecoveryMismatch => {
                write!(
                    f,
                    "Error: The checkpoint manifest does not match the \
                    registered group."
                )
            }
            IndexError::TrackerNotReady => {
                write!(
                    f,
                    "Error: The change tracker is missing a before- or \
                    after-image for this operation."
                )
            }
            IndexError::Cancelled => {
                write!(f, "Error: The query was cancelled.")
            }
            IndexError::InternalInvariantViolation => {
                write!(
                    f,
                    "Error: Unexpected internal state. The index must be \
                    considered corrupted."
                )
            }
        }
    }
}

//------------ FatalError ----------------------------------------------------

#[derive(Debug, Copy, Clone)]
pub struct FatalError;

impl std::fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Error: A fatal error has occurred. The secondary store must \
             be considered corrupted. The application should terminate."
        )
    }
}

impl std::error::Error for FatalError {}

impl From<FatalError> for IndexError {
    fn from(_: FatalError) -> Self {
        IndexError::InternalInvariantViolation
    }
}

pub type FatalResult<T> = Result<T, FatalError>;
