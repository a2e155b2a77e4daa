//! On-device records of the state storage region.
//!
//! ```text
//! reserved offset
//! ├─ Preamble           8 B  tag "SUPLA", version u16, section count u8
//! ├─ SectionPreamble    7 B  type u8, size u16, crc1 u16, crc2 u16
//! ├─ StateEntryAddress  8 B  main copy
//! ├─ StateEntryAddress  8 B  backup copy
//! └─ slots              ring of { SlotHeader 6 B, payload }
//! ```
//!
//! Everything is packed and little-endian.

use crate::crc16::crc16;
use core::mem::size_of;

pub const SUPLA_TAG: [u8; 5] = *b"SUPLA";
pub const STORAGE_VERSION: u16 = 1;

pub const PREAMBLE_SIZE: usize = 8;
pub const SECTION_PREAMBLE_SIZE: usize = 7;
pub const STATE_ENTRY_ADDRESS_SIZE: usize = 8;
pub const SLOT_HEADER_SIZE: usize = 6;
pub const SECTION_CRC_SIZE: usize = size_of::<u16>();

/// Offset of the first slot relative to the start of the log section (right after the Preamble).
pub const FIRST_SLOT_OFFSET: usize = SECTION_PREAMBLE_SIZE + 2 * STATE_ENTRY_ADDRESS_SIZE;

/// Smallest reservation that can hold the headers and at least the header of a single slot.
pub const MIN_RESERVED_SIZE: usize = PREAMBLE_SIZE + FIRST_SLOT_OFFSET + SLOT_HEADER_SIZE;

// Compile-time assertions to keep the encoders below in sync with the field widths
const _: () = assert!(PREAMBLE_SIZE == SUPLA_TAG.len() + size_of::<u16>() + size_of::<u8>());
const _: () = assert!(SECTION_PREAMBLE_SIZE == size_of::<u8>() + 3 * size_of::<u16>());
const _: () = assert!(STATE_ENTRY_ADDRESS_SIZE == size_of::<u32>() + 2 * size_of::<u16>());
const _: () = assert!(SLOT_HEADER_SIZE == size_of::<u32>() + size_of::<u16>());

#[derive(strum::FromRepr, strum::Display, Debug, Eq, PartialEq, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum SectionType {
    Uninitialized = 0,
    DeviceConfig = 1,
    ElementConfig = 2,
    ElementState = 3,
    ElementStateWlByte = 4,
    ElementStateWlSector = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Preamble {
    pub tag: [u8; 5],
    pub version: u16,
    pub section_count: u8,
}

impl Preamble {
    pub const fn new(section_count: u8) -> Self {
        Self {
            tag: SUPLA_TAG,
            version: STORAGE_VERSION,
            section_count,
        }
    }

    pub fn has_tag(&self) -> bool {
        self.tag == SUPLA_TAG
    }

    pub fn to_bytes(&self) -> [u8; PREAMBLE_SIZE] {
        let mut buf = [0u8; PREAMBLE_SIZE];
        buf[..5].copy_from_slice(&self.tag);
        buf[5..7].copy_from_slice(&self.version.to_le_bytes());
        buf[7] = self.section_count;
        buf
    }

    pub fn from_bytes(buf: &[u8; PREAMBLE_SIZE]) -> Self {
        let mut tag = [0u8; 5];
        tag.copy_from_slice(&buf[..5]);
        Self {
            tag,
            version: u16::from_le_bytes([buf[5], buf[6]]),
            section_count: buf[7],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SectionPreamble {
    /// Raw section type, see [`SectionType`]. `0` means uninitialized.
    pub type_: u8,
    /// Bytes owned by the section, counted from the start of this preamble.
    pub size: u16,
    pub crc1: u16,
    pub crc2: u16,
}

impl SectionPreamble {
    pub fn section_type(&self) -> Option<SectionType> {
        SectionType::from_repr(self.type_)
    }

    pub fn to_bytes(&self) -> [u8; SECTION_PREAMBLE_SIZE] {
        let mut buf = [0u8; SECTION_PREAMBLE_SIZE];
        buf[0] = self.type_;
        buf[1..3].copy_from_slice(&self.size.to_le_bytes());
        buf[3..5].copy_from_slice(&self.crc1.to_le_bytes());
        buf[5..7].copy_from_slice(&self.crc2.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SECTION_PREAMBLE_SIZE]) -> Self {
        Self {
            type_: buf[0],
            size: u16::from_le_bytes([buf[1], buf[2]]),
            crc1: u16::from_le_bytes([buf[3], buf[4]]),
            crc2: u16::from_le_bytes([buf[5], buf[6]]),
        }
    }
}

/// Pointer to the most recently written slot. Stored twice, each copy protected by its own CRC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StateEntryAddress {
    pub address: u32,
    pub element_state_size: u16,
    pub crc: u16,
}

impl StateEntryAddress {
    /// Creates an entry with a matching CRC.
    pub fn new(address: u32, element_state_size: u16) -> Self {
        let mut entry = Self {
            address,
            element_state_size,
            crc: 0,
        };
        entry.crc = entry.calculate_crc16();
        entry
    }

    pub fn calculate_crc16(&self) -> u16 {
        crc16(&self.to_bytes()[..STATE_ENTRY_ADDRESS_SIZE - 2])
    }

    pub fn is_valid(&self) -> bool {
        self.crc == self.calculate_crc16()
    }

    pub fn to_bytes(&self) -> [u8; STATE_ENTRY_ADDRESS_SIZE] {
        let mut buf = [0u8; STATE_ENTRY_ADDRESS_SIZE];
        buf[..4].copy_from_slice(&self.address.to_le_bytes());
        buf[4..6].copy_from_slice(&self.element_state_size.to_le_bytes());
        buf[6..8].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; STATE_ENTRY_ADDRESS_SIZE]) -> Self {
        Self {
            address: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            element_state_size: u16::from_le_bytes([buf[4], buf[5]]),
            crc: u16::from_le_bytes([buf[6], buf[7]]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotHeader {
    pub write_count: u32,
    /// CRC16 of the payload that follows the header.
    pub crc: u16,
}

impl SlotHeader {
    pub fn to_bytes(&self) -> [u8; SLOT_HEADER_SIZE] {
        let mut buf = [0u8; SLOT_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.write_count.to_le_bytes());
        buf[4..6].copy_from_slice(&self.crc.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; SLOT_HEADER_SIZE]) -> Self {
        Self {
            write_count: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            crc: u16::from_le_bytes([buf[4], buf[5]]),
        }
    }
}

/// Write counters wrap around, `a` is newer than `b` if it is less than half the counter range
/// ahead of it.
#[inline]
pub fn is_newer(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) > 0
}

/// Number of slots that physically fit into a log section of `section_size` bytes.
pub fn ring_capacity(section_size: u16, element_state_size: u16) -> u32 {
    let space = (section_size as usize).saturating_sub(FIRST_SLOT_OFFSET);
    (space / (SLOT_HEADER_SIZE + element_state_size as usize)) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preamble_layout() {
        let raw = Preamble::new(1).to_bytes();
        assert_eq!(&raw, b"SUPLA\x01\x00\x01");
        assert!(Preamble::from_bytes(&raw).has_tag());
        assert!(!Preamble::from_bytes(&[0u8; PREAMBLE_SIZE]).has_tag());
    }

    #[test]
    fn section_preamble_layout() {
        let preamble = SectionPreamble {
            type_: SectionType::ElementStateWlByte as u8,
            size: 92,
            crc1: 0,
            crc2: 0,
        };
        assert_eq!(preamble.to_bytes(), [4, 92, 0, 0, 0, 0, 0]);
        assert_eq!(
            preamble.section_type(),
            Some(SectionType::ElementStateWlByte)
        );
        assert_eq!(SectionPreamble::from_bytes(&[9, 0, 0, 0, 0, 0, 0]).section_type(), None);
    }

    #[test]
    fn state_entry_address_crc_covers_address_and_size() {
        let entry = StateEntryAddress::new(31, 8);
        assert!(entry.is_valid());
        assert_eq!(entry.crc, crc16(&[31, 0, 0, 0, 8, 0]));

        let mut tampered = entry;
        tampered.element_state_size = 9;
        assert!(!tampered.is_valid());

        // blank memory must never look like a valid pointer
        assert!(!StateEntryAddress::from_bytes(&[0u8; STATE_ENTRY_ADDRESS_SIZE]).is_valid());
    }

    #[test]
    fn wraparound_ordering() {
        assert!(is_newer(2, 1));
        assert!(!is_newer(1, 2));
        assert!(!is_newer(5, 5));
        assert!(is_newer(0, u32::MAX));
        assert!(is_newer(3, u32::MAX - 3));
    }

    #[test]
    fn capacity_counts_whole_slots_only() {
        // 92 - 23 = 69 bytes of ring, 14 byte slots
        assert_eq!(ring_capacity(92, 8), 4);
        assert_eq!(ring_capacity(112, 8), 6);
        assert_eq!(ring_capacity(10, 8), 0);
    }
}
