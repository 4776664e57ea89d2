use zerocopy::byteorder::{NativeEndian, U16, U64};
use zerocopy::{
    FromBytes, Immutable, IntoBytes, KnownLayout, TryFromBytes, Unaligned,
};

use crate::types::errors::FatalError;
use crate::types::record_id::{LogAddress, INVALID_ADDRESS};
use crate::types::RecordId;

//------------ Slot flags ----------------------------------------------------

/// The slot occupies its position but its predicate produced no key; it
/// is never linked into a chain.
pub(crate) const FLAG_NULL: u8 = 0b0000_0001;
/// The slot's record has been appended but the slot is not linked into
/// its bucket chain yet. Cleared immediately before the bucket
/// compare-and-swap that publishes the slot.
pub(crate) const FLAG_TENTATIVE: u8 = 0b0000_0010;
/// The slot withdraws its record identifier from the chain of its key.
pub(crate) const FLAG_TOMBSTONE: u8 = 0b0000_0100;

//------------ Layout constants ----------------------------------------------

// A secondary record is an 8-byte header carrying the provider RecordId,
// followed by exactly one slot per predicate ordinal. All offsets below
// are fixed by the packed layout of KeyPointer; slot_size() depends only
// on the group's key size, so every address computation is closed-form.

pub(crate) const RECORD_HEADER_SIZE: usize = 8;
pub(crate) const SLOT_FIXED_SIZE: usize = 12;
pub(crate) const SLOT_FLAGS_OFFSET: usize = 1;
pub(crate) const SLOT_PREVIOUS_OFFSET: usize = 4;

pub(crate) const fn slot_size(key_size: usize) -> usize {
    SLOT_FIXED_SIZE + key_size
}

pub(crate) const fn record_size(key_size: usize, slots: usize) -> usize {
    RECORD_HEADER_SIZE + slots * slot_size(key_size)
}

//------------ RecordHeader --------------------------------------------------

#[derive(KnownLayout, Immutable, Unaligned, IntoBytes, FromBytes)]
#[repr(C, packed)]
pub(crate) struct RecordHeader {
    record_id: U64<NativeEndian>,
}

impl RecordHeader {
    pub(crate) fn from_bytes(b: &[u8]) -> Result<&Self, FatalError> {
        Self::ref_from_bytes(b).map_err(|_| FatalError)
    }

    pub(crate) fn record_id(&self) -> RecordId {
        RecordId::new(self.record_id.get())
    }
}

//------------ KeyPointer ----------------------------------------------------

// One slot of a composite key: the per-predicate ordinal, the slot flags,
// the byte distance back to slot 0 of its composite key, the address of
// the previous same-bucket slot, and the key bytes themselves. The key is
// kept as a byte slice so chain walks can run without knowing the group's
// key type; keys are memcpy-safe by contract, which makes byte equality
// the key equality.
#[derive(KnownLayout, Immutable, Unaligned, TryFromBytes)]
#[repr(C, packed)]
pub(crate) struct KeyPointer {
    ordinal: u8,
    flags: u8,
    offset_to_start: U16<NativeEndian>,
    previous: U64<NativeEndian>,
    key: [u8],
}

impl KeyPointer {
    // `b` must be exactly slot_size(key_size) bytes.
    pub(crate) fn from_bytes(b: &[u8]) -> Result<&Self, FatalError> {
        Self::try_ref_from_bytes(b).map_err(|_| FatalError)
    }

    pub(crate) fn ordinal(&self) -> u8 {
        self.ordinal
    }

    pub(crate) fn is_null(&self) -> bool {
        self.flags & FLAG_NULL != 0
    }

    pub(crate) fn is_tentative(&self) -> bool {
        self.flags & FLAG_TENTATIVE != 0
    }

    pub(crate) fn is_tombstone(&self) -> bool {
        self.flags & FLAG_TOMBSTONE != 0
    }

    pub(crate) fn offset_to_start(&self) -> usize {
        self.offset_to_start.get() as usize
    }

    pub(crate) fn previous(&self) -> LogAddress {
        self.previous.get()
    }

    pub(crate) fn key(&self) -> &[u8] {
        &self.key
    }
}

//------------ SlotState / record images -------------------------------------

// The shape of one slot in a record image about to be appended. Live and
// tombstone slots carry the key bytes they link under; a null slot only
// occupies its fixed position.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotState<'a> {
    Null,
    Live(&'a [u8]),
    Tombstone(&'a [u8]),
}

impl SlotState<'_> {
    pub(crate) fn is_linked(&self) -> bool {
        !matches!(self, SlotState::Null)
    }

    pub(crate) fn key(&self) -> Option<&[u8]> {
        match self {
            SlotState::Null => None,
            SlotState::Live(k) | SlotState::Tombstone(k) => Some(k),
        }
    }
}

// Builds the append image of one composite record: header plus one slot
// per ordinal. Every `previous` field starts out as the invalid sentinel
// and is patched in place during the bucket install of its slot.
pub(crate) fn build_record_image(
    id: RecordId,
    key_size: usize,
    slots: &[SlotState<'_>],
    image: &mut Vec<u8>,
) {
    let slot_size = slot_size(key_size);
    image.clear();
    image.reserve(record_size(key_size, slots.len()));

    let header = RecordHeader {
        record_id: U64::new(id.as_u64()),
    };
    image.extend_from_slice(header.as_bytes());

    for (ordinal, slot) in slots.iter().enumerate() {
        let flags = match slot {
            SlotState::Null => FLAG_NULL,
            // Linked slots stay tentative until their bucket install.
            SlotState::Live(_) => FLAG_TENTATIVE,
            SlotState::Tombstone(_) => FLAG_TENTATIVE | FLAG_TOMBSTONE,
        };
        let mut fixed = [0u8; SLOT_FIXED_SIZE];
        fixed[0] = ordinal as u8;
        fixed[SLOT_FLAGS_OFFSET] = flags;
        fixed[2..4]
            .copy_from_slice(&((ordinal * slot_size) as u16).to_ne_bytes());
        fixed[SLOT_PREVIOUS_OFFSET..SLOT_FIXED_SIZE]
            .copy_from_slice(&INVALID_ADDRESS.to_ne_bytes());
        image.extend_from_slice(&fixed);
        match slot.key() {
            Some(k) => {
                debug_assert_eq!(k.len(), key_size);
                image.extend_from_slice(k);
            }
            None => image.resize(image.len() + key_size, 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_layout_round_trips_through_key_pointer() {
        let key_a = [7u8; 4];
        let key_b = [9u8; 4];
        let slots = [
            SlotState::Live(&key_a),
            SlotState::Null,
            SlotState::Tombstone(&key_b),
        ];
        let mut image = Vec::new();
        build_record_image(RecordId::new(42), 4, &slots, &mut image);

        assert_eq!(image.len(), record_size(4, 3));
        let header =
            RecordHeader::from_bytes(&image[..RECORD_HEADER_SIZE]).unwrap();
        assert_eq!(header.record_id(), RecordId::new(42));

        let ss = slot_size(4);
        for ordinal in 0..3 {
            let start = RECORD_HEADER_SIZE + ordinal * ss;
            let slot =
                KeyPointer::from_bytes(&image[start..start + ss]).unwrap();
            assert_eq!(slot.ordinal() as usize, ordinal);
            assert_eq!(slot.offset_to_start(), ordinal * ss);
            assert_eq!(slot.previous(), INVALID_ADDRESS);
        }

        let slot0 = KeyPointer::from_bytes(&image[8..8 + ss]).unwrap();
        assert!(!slot0.is_null() && !slot0.is_tombstone());
        assert!(slot0.is_tentative());
        assert_eq!(slot0.key(), &key_a);

        let slot1 =
            KeyPointer::from_bytes(&image[8 + ss..8 + 2 * ss]).unwrap();
        assert!(slot1.is_null());

        let slot2 =
            KeyPointer::from_bytes(&image[8 + 2 * ss..8 + 3 * ss]).unwrap();
        assert!(slot2.is_tombstone());
        assert_eq!(slot2.key(), &key_b);
    }
}
