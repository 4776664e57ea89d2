use std::path::PathBuf;
use std::sync::Arc;

use rand::prelude::*;

use crate::key::key_pointer::{record_size, slot_size};
use crate::key::{SecondaryKey, MAX_KEY_SIZE, MAX_PREDICATES};
use crate::types::errors::IndexError;

//------------ PredicateFn ---------------------------------------------------

/// The user function behind a predicate: a total, side-effect-free map
/// from a provider record to an optional secondary key.
///
/// Records for which the function returns `None` are absent from that
/// predicate's chains. The function is invoked inside mutations and must
/// not block.
pub type PredicateFn<D, K> = Arc<dyn Fn(&D) -> Option<K> + Send + Sync>;

//------------ PredicateSpec -------------------------------------------------

/// One predicate to register: a globally unique name plus its function.
#[derive(Clone)]
pub struct PredicateSpec<D, K: SecondaryKey> {
    pub(crate) name: String,
    pub(crate) f: PredicateFn<D, K>,
}

impl<D, K: SecondaryKey> PredicateSpec<D, K> {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&D) -> Option<K> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<D, K: SecondaryKey> std::fmt::Debug for PredicateSpec<D, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateSpec")
            .field("name", &self.name)
            .finish()
    }
}

//------------ Predicate -----------------------------------------------------

// A registered predicate, bound to its ordinal within its group.
pub(crate) struct Predicate<D, K: SecondaryKey> {
    pub(crate) name: Arc<str>,
    pub(crate) ordinal: u8,
    pub(crate) f: PredicateFn<D, K>,
}

impl<D, K: SecondaryKey> std::fmt::Debug for Predicate<D, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predicate")
            .field("name", &self.name)
            .field("ordinal", &self.ordinal)
            .finish()
    }
}

//------------ PredicateHandle -----------------------------------------------

/// The caller's reference to a registered predicate.
///
/// Handles are issued by [register_group](
/// crate::SubsetHashIndex::register_group) in input order and are the
/// only way to name a predicate in queries. A handle is bound to the
/// index instance that issued it; using it on another instance fails
/// with [IndexError::ForeignPredicateHandle].
#[derive(Clone, Debug)]
pub struct PredicateHandle {
    pub(crate) instance: u64,
    pub(crate) group: u32,
    pub(crate) ordinal: u8,
    pub(crate) name: Arc<str>,
}

impl PredicateHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn group_id(&self) -> u32 {
        self.group
    }

    pub fn ordinal(&self) -> u8 {
        self.ordinal
    }
}

impl std::fmt::Display for PredicateHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@g{}/{}", self.name, self.group, self.ordinal)
    }
}

//------------ GroupSpec -----------------------------------------------------

/// The geometry and storage settings of one group.
///
/// A group is immutable once registered; the spec is consumed at
/// registration and checked against the manifest at recovery. The
/// default spec is sized for tests and small stores: a 64Ki-bucket
/// table, 64KiB pages, 1MiB segments and a 64MiB memory budget, with a
/// uniquely suffixed checkpoint directory under the system temp dir.
#[derive(Clone, Debug)]
pub struct GroupSpec {
    /// Number of buckets in the hash table. Must be a power of two.
    pub hash_table_size: usize,
    /// Size of one log page in bytes. Must be a power of two; one
    /// composite record must fit in a page.
    pub log_page_size: usize,
    /// Size of one log segment in bytes. Must be a multiple of the page
    /// size.
    pub log_segment_size: usize,
    /// Total memory budget for the secondary log. Appends beyond it fail
    /// with [IndexError::LogFull].
    pub log_memory_size: usize,
    /// Where this group writes its checkpoints.
    pub checkpoint_dir: PathBuf,
    /// Unsupported for secondary stores; must stay `false`.
    pub read_cache: bool,
    /// Unsupported for secondary stores; must stay `false`.
    pub copy_reads_to_tail: bool,
}

impl Default for GroupSpec {
    fn default() -> Self {
        let rng = rand::rng();
        let uuid: String = rng
            .sample_iter(rand::distr::Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        Self {
            hash_table_size: 1 << 16,
            log_page_size: 1 << 16,
            log_segment_size: 1 << 20,
            log_memory_size: 1 << 26,
            checkpoint_dir: std::env::temp_dir()
                .join("subset-store")
                .join(uuid),
            read_cache: false,
            copy_reads_to_tail: false,
        }
    }
}

impl GroupSpec {
    pub(crate) fn validate(
        &self,
        key_size: usize,
        predicates: usize,
    ) -> Result<(), IndexError> {
        if self.read_cache || self.copy_reads_to_tail {
            return Err(IndexError::UnsupportedLogSettings);
        }
        if self.hash_table_size == 0
            || !self.hash_table_size.is_power_of_two()
            || self.log_page_size < 64
            || !self.log_page_size.is_power_of_two()
            || self.log_segment_size == 0
            || self.log_segment_size % self.log_page_size != 0
            || self.log_memory_size < self.log_segment_size
            || predicates == 0
        {
            return Err(IndexError::InvalidGroupGeometry);
        }
        if predicates > MAX_PREDICATES {
            return Err(IndexError::TooManyPredicates);
        }
        if key_size == 0 || key_size > MAX_KEY_SIZE {
            return Err(IndexError::OversizedSecondaryKey);
        }
        // Slot offsets are u16 and a record must fit one page.
        if predicates * slot_size(key_size) > u16::MAX as usize
            || record_size(key_size, predicates) > self.log_page_size
        {
            return Err(IndexError::CompositeKeyTooLarge);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_spec_validates() {
        let spec = GroupSpec::default();
        assert_eq!(spec.validate(8, 4), Ok(()));
    }

    #[test]
    fn unsupported_settings_are_rejected() {
        let spec = GroupSpec {
            read_cache: true,
            ..Default::default()
        };
        assert_eq!(
            spec.validate(8, 1),
            Err(IndexError::UnsupportedLogSettings)
        );
    }

    #[test]
    fn geometry_is_checked() {
        let spec = GroupSpec {
            hash_table_size: 1000,
            ..Default::default()
        };
        assert_eq!(spec.validate(8, 1), Err(IndexError::InvalidGroupGeometry));

        let spec = GroupSpec::default();
        assert_eq!(
            spec.validate(512, 1),
            Err(IndexError::OversizedSecondaryKey)
        );
        assert_eq!(spec.validate(8, 0), Err(IndexError::InvalidGroupGeometry));
        assert_eq!(spec.validate(8, 300), Err(IndexError::TooManyPredicates));
        // 255 slots of 256-byte keys overflow the u16 slot offsets.
        assert_eq!(
            spec.validate(256, 255),
            Err(IndexError::CompositeKeyTooLarge)
        );
    }
}
