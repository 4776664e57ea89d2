//! Data types for tests and examples: a small pet record, fixed-size
//! secondary-key types over it, and a minimal log-structured provider.

use std::collections::HashMap;
use std::sync::Mutex;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::liveness::Provider;
use crate::types::errors::IndexError;
use crate::types::RecordId;

//------------ Secondary-key types -------------------------------------------

/// A fixed-size, zero-padded species name.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(transparent)]
pub struct Species(pub [u8; 12]);

impl From<&str> for Species {
    fn from(value: &str) -> Self {
        let mut bytes = [0u8; 12];
        let len = value.len().min(12);
        bytes[..len].copy_from_slice(&value.as_bytes()[..len]);
        Species(bytes)
    }
}

/// An age in years.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(transparent)]
pub struct Age(pub u8);

/// A fixed-size, zero-padded size class. A different width than
/// [Species], so multi-group tests cross key types.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(transparent)]
pub struct SizeClass(pub [u8; 8]);

impl From<&str> for SizeClass {
    fn from(value: &str) -> Self {
        let mut bytes = [0u8; 8];
        let len = value.len().min(8);
        bytes[..len].copy_from_slice(&value.as_bytes()[..len]);
        SizeClass(bytes)
    }
}

/// The shared key type for groups that index several pet predicates:
/// all predicates of one group use one key type, so species and age
/// project into the same 12-byte space. The per-ordinal hash seed keeps
/// their chains apart even on equal bytes.
#[derive(
    Clone,
    Copy,
    Debug,
    Hash,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(transparent)]
pub struct PetKey(pub [u8; 12]);

impl PetKey {
    pub fn species(value: &str) -> Self {
        let mut bytes = [0u8; 12];
        let len = value.len().min(12);
        bytes[..len].copy_from_slice(&value.as_bytes()[..len]);
        PetKey(bytes)
    }

    pub fn age(value: u8) -> Self {
        let mut bytes = [0u8; 12];
        bytes[0] = value;
        PetKey(bytes)
    }
}

//------------ Pet -----------------------------------------------------------

/// The provider record the tests index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pet {
    pub id: u64,
    pub species: String,
    pub age: u8,
    pub size: String,
}

impl Pet {
    pub fn new(
        id: u64,
        species: impl Into<String>,
        age: u8,
        size: impl Into<String>,
    ) -> Self {
        Self {
            id,
            species: species.into(),
            age,
            size: size.into(),
        }
    }
}

//------------ TestKv --------------------------------------------------------

/// A minimal log-structured provider: an append-only version log plus a
/// key to newest-version map. Record ids are log positions, so they are
/// unique per write and monotone, as the index requires.
#[derive(Debug, Default)]
pub struct TestKv {
    in_place: bool,
    inner: Mutex<TestKvInner>,
}

#[derive(Debug, Default)]
struct TestKvInner {
    log: Vec<LogEntry>,
    current: HashMap<u64, usize>,
}

#[derive(Debug, Clone)]
struct LogEntry {
    key: u64,
    data: Pet,
}

impl TestKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that updates existing keys in place, keeping their record
    /// id, the way a blittable-value store would.
    pub fn with_in_place_updates() -> Self {
        Self {
            in_place: true,
            inner: Mutex::default(),
        }
    }

    /// All live records, for brute-force comparison in property tests.
    pub fn live_records(&self) -> Vec<(RecordId, Pet)> {
        #[allow(clippy::unwrap_used)]
        let inner = self.inner.lock().unwrap();
        inner
            .current
            .values()
            .map(|idx| {
                (RecordId::new(*idx as u64), inner.log[*idx].data.clone())
            })
            .collect()
    }
}

#[allow(clippy::unwrap_used)]
impl Provider for TestKv {
    type Key = u64;
    type Data = Pet;

    fn current_record_id(&self, key: &u64) -> Option<RecordId> {
        let inner = self.inner.lock().unwrap();
        inner.current.get(key).map(|idx| RecordId::new(*idx as u64))
    }

    fn primary_key_of(&self, id: RecordId) -> Option<u64> {
        let inner = self.inner.lock().unwrap();
        inner.log.get(id.as_u64() as usize).map(|e| e.key)
    }

    fn read(&self, id: RecordId) -> Option<Pet> {
        let inner = self.inner.lock().unwrap();
        inner.log.get(id.as_u64() as usize).map(|e| e.data.clone())
    }

    fn write(&self, key: u64, data: Pet) -> Result<RecordId, IndexError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.log.len();
        inner.log.push(LogEntry { key, data });
        inner.current.insert(key, idx);
        Ok(RecordId::new(idx as u64))
    }

    fn write_in_place(
        &self,
        key: &u64,
        data: Pet,
    ) -> Result<Option<RecordId>, IndexError> {
        if !self.in_place {
            return Ok(None);
        }
        let mut inner = self.inner.lock().unwrap();
        match inner.current.get(key).copied() {
            Some(idx) => {
                inner.log[idx].data = data;
                Ok(Some(RecordId::new(idx as u64)))
            }
            None => Ok(None),
        }
    }

    fn remove(
        &self,
        key: &u64,
    ) -> Result<Option<(Pet, RecordId)>, IndexError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.current.remove(key) {
            Some(idx) => Ok(Some((
                inner.log[idx].data.clone(),
                RecordId::new(idx as u64),
            ))),
            None => Ok(None),
        }
    }
}
