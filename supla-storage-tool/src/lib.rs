//! Host side helpers for supla-storage EEPROM images: format blank images, inspect the
//! wear-leveling state log and read sections.

pub mod error;
mod image;

use std::fmt;

use supla_storage::crc16::crc16;
use supla_storage::layout::{
    FIRST_SLOT_OFFSET, PREAMBLE_SIZE, Preamble, SECTION_PREAMBLE_SIZE, SLOT_HEADER_SIZE,
    STATE_ENTRY_ADDRESS_SIZE, SectionPreamble, SlotHeader, StateEntryAddress,
};
use supla_storage::{SectionRegistry, Storage};

pub use error::Error;
pub use image::Image;

/// Creates a blank image of `size` bytes and formats a state log in it.
///
/// A `reserved_size` of zero only writes the preamble, like a device without state storage.
pub fn format_image(size: usize, reserved_offset: u32, reserved_size: u32) -> Result<Image, Error> {
    let needed = (reserved_offset as usize)
        + (reserved_size as usize).max(PREAMBLE_SIZE + SECTION_PREAMBLE_SIZE);
    if size < needed {
        return Err(Error::ImageTooSmall(size));
    }

    let mut storage = Storage::new(Image::blank(size), SectionRegistry::new());
    storage.init(reserved_offset, reserved_size)?;
    Ok(storage.into_inner())
}

/// Reads a single section the same way the device does, falling back to the backup copy.
pub fn read_section(
    image: &Image,
    offset: u32,
    size: u16,
    crc: bool,
    backup: bool,
) -> Result<Vec<u8>, Error> {
    let mut sections = SectionRegistry::new();
    sections.register(0, offset, size, crc, backup)?;

    let mut storage = Storage::new(image.clone(), sections);
    let mut buf = vec![0u8; size as usize];
    storage.read_section(0, &mut buf)?;
    Ok(buf)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub entry: StateEntryAddress,
    pub valid: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotReport {
    pub index: u32,
    pub address: u32,
    pub write_count: u32,
    pub crc_valid: bool,
    pub latest: bool,
}

/// Everything stored in the state log region of an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateLogReport {
    pub reserved_offset: u32,
    pub preamble: Preamble,
    pub section: SectionPreamble,
    pub main: EntryReport,
    pub backup: EntryReport,
    pub element_state_size: u16,
    pub ring_capacity: u32,
    pub slots: Vec<SlotReport>,
}

impl StateLogReport {
    pub fn latest(&self) -> Option<&SlotReport> {
        self.slots.iter().find(|slot| slot.latest)
    }
}

/// Decodes the state log at `reserved_offset` without modifying the image.
pub fn inspect(image: &Image, reserved_offset: u32) -> Result<StateLogReport, Error> {
    let preamble = Preamble::from_bytes(&fixed(image, reserved_offset)?);
    if !preamble.has_tag() {
        return Err(Error::NotFormatted(reserved_offset));
    }

    let section_offset = reserved_offset + PREAMBLE_SIZE as u32;
    let section = SectionPreamble::from_bytes(&fixed(image, section_offset)?);
    let entry_offset = section_offset + SECTION_PREAMBLE_SIZE as u32;
    let main = entry_report(image, entry_offset)?;
    let backup = entry_report(image, entry_offset + STATE_ENTRY_ADDRESS_SIZE as u32)?;

    let mut report = StateLogReport {
        reserved_offset,
        preamble,
        section,
        main,
        backup,
        element_state_size: 0,
        ring_capacity: 0,
        slots: Vec::new(),
    };

    // a log without sections would be formatted by init, nothing to show
    if preamble.section_count == 0 {
        return Ok(report);
    }

    // run the device side lookup on a copy, init doesn't write to a formatted log
    let reserved_size = section.size as u32 + PREAMBLE_SIZE as u32;
    let mut storage = Storage::new(image.clone(), SectionRegistry::new());
    storage.init(reserved_offset, reserved_size)?;
    let info = storage.state_info();

    report.element_state_size = info.element_state_size;
    report.ring_capacity = info.ring_capacity;

    let slot_size = (SLOT_HEADER_SIZE + info.element_state_size as usize) as u32;
    let first_slot = section_offset + FIRST_SLOT_OFFSET as u32;
    for index in 0..info.ring_capacity {
        let address = first_slot + index * slot_size;
        let header = SlotHeader::from_bytes(&fixed(image, address)?);
        let payload = image.slice(
            address + SLOT_HEADER_SIZE as u32,
            info.element_state_size as usize,
        )?;

        report.slots.push(SlotReport {
            index,
            address,
            write_count: header.write_count,
            crc_valid: crc16(payload) == header.crc,
            latest: info.latest_slot_address == Some(address),
        });
    }

    Ok(report)
}

fn fixed<const N: usize>(image: &Image, offset: u32) -> Result<[u8; N], Error> {
    let mut raw = [0u8; N];
    raw.copy_from_slice(image.slice(offset, N)?);
    Ok(raw)
}

fn entry_report(image: &Image, offset: u32) -> Result<EntryReport, Error> {
    let entry = StateEntryAddress::from_bytes(&fixed(image, offset)?);
    Ok(EntryReport {
        valid: entry.is_valid(),
        entry,
    })
}

fn validity(valid: bool) -> &'static str {
    if valid { "ok" } else { "INVALID" }
}

impl fmt::Display for StateLogReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "preamble @{:#06x}: version {}, {} section(s)",
            self.reserved_offset, self.preamble.version, self.preamble.section_count
        )?;
        writeln!(
            f,
            "section: type {}, size {}, crc1 {:#06x}, crc2 {:#06x}",
            self.section.type_, self.section.size, self.section.crc1, self.section.crc2
        )?;
        for (name, report) in [("main", &self.main), ("backup", &self.backup)] {
            writeln!(
                f,
                "{name:>6} entry: address {:#06x}, state size {}, crc {:#06x} {}",
                report.entry.address,
                report.entry.element_state_size,
                report.entry.crc,
                validity(report.valid)
            )?;
        }
        writeln!(
            f,
            "ring: {} slot(s) of {} byte(s)",
            self.ring_capacity, self.element_state_size
        )?;
        for slot in &self.slots {
            writeln!(
                f,
                "  [{:>3}] @{:#06x} write count {:>10} crc {}{}",
                slot.index,
                slot.address,
                slot.write_count,
                validity(slot.crc_valid),
                if slot.latest { "  <- latest" } else { "" }
            )?;
        }
        Ok(())
    }
}
