pub mod accessor;
pub mod key_pointer;

use std::fmt::Debug;
use std::hash::Hash;

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

//------------ SecondaryKey --------------------------------------------------

/// Trait for types that can be used as the secondary key of a group.
///
/// A secondary key is a fixed-size, memcpy-safe value: it is embedded
/// verbatim inside the packed slots of a composite key, compared by its
/// bytes, and hashed over its bytes. All predicates within one group
/// share one key type; different groups may use different key types.
///
/// The zerocopy bounds are the whole contract: any `Copy` type that
/// derives `FromBytes`, `IntoBytes`, `KnownLayout`, `Immutable` and
/// `Unaligned` is a valid key. Keys larger than 256 bytes are rejected
/// at registration.
pub trait SecondaryKey:
    Copy
    + Eq
    + Hash
    + Debug
    + Send
    + Sync
    + FromBytes
    + IntoBytes
    + KnownLayout
    + Immutable
    + Unaligned
    + 'static
{
}

impl<T> SecondaryKey for T where
    T: Copy
        + Eq
        + Hash
        + Debug
        + Send
        + Sync
        + FromBytes
        + IntoBytes
        + KnownLayout
        + Immutable
        + Unaligned
        + 'static
{
}

/// The largest secondary-key size a group will accept, in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// The largest number of predicates one group can index.
pub const MAX_PREDICATES: usize = 255;
