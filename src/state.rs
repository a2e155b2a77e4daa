use crate::crc16::crc16;
use crate::element::{self, StateElement};
use crate::error::Error;
use crate::layout::{
    FIRST_SLOT_OFFSET, MIN_RESERVED_SIZE, PREAMBLE_SIZE, Preamble, SECTION_PREAMBLE_SIZE,
    SLOT_HEADER_SIZE, STATE_ENTRY_ADDRESS_SIZE, STORAGE_VERSION, SectionPreamble, SectionType,
    SlotHeader, StateEntryAddress, is_newer, ring_capacity,
};
use crate::platform::{DeviceOps, Platform};
use crate::{StateStorageInfo, Storage};
use alloc::vec;
use alloc::vec::Vec;
#[cfg(feature = "defmt")]
use defmt::{debug, trace, warn};

const WL_BYTE_TYPE: u8 = SectionType::ElementStateWlByte as u8;

#[derive(Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "debug-logs", derive(Debug))]
enum EntryCopy {
    Main = 0,
    Backup = 1,
}

#[derive(Clone, Copy)]
#[cfg_attr(feature = "debug-logs", derive(Debug))]
pub(crate) struct LatestSlot {
    index: u32,
    write_count: u32,
}

struct SlotCandidate {
    index: u32,
    write_count: u32,
    payload: Vec<u8>,
}

/// In-memory view of the wear-leveling state log. Only the position of the latest snapshot is
/// cached, slot contents are always read from the device.
pub(crate) struct StateLog {
    reserved_offset: u32,
    reserved_size: u32,
    section: SectionPreamble,
    element_state_size: u16,
    latest: Option<LatestSlot>,
}

impl StateLog {
    pub(crate) fn uninitialized(reserved_offset: u32, reserved_size: u32) -> Self {
        Self {
            reserved_offset,
            reserved_size,
            section: SectionPreamble::default(),
            element_state_size: 0,
            latest: None,
        }
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.section.type_ == WL_BYTE_TYPE && self.section.size > 0
    }

    fn section_offset(&self) -> u32 {
        self.reserved_offset + PREAMBLE_SIZE as u32
    }

    fn entry_address_offset(&self, copy: EntryCopy) -> u32 {
        self.section_offset()
            + SECTION_PREAMBLE_SIZE as u32
            + copy as u32 * STATE_ENTRY_ADDRESS_SIZE as u32
    }

    fn first_slot_address(&self) -> u32 {
        self.section_offset() + FIRST_SLOT_OFFSET as u32
    }

    fn slot_address(&self, index: u32, element_state_size: u16) -> u32 {
        self.first_slot_address() + index * (SLOT_HEADER_SIZE as u32 + element_state_size as u32)
    }

    fn capacity(&self, element_state_size: u16) -> u32 {
        ring_capacity(self.section.size, element_state_size)
    }

    /// Maps an absolute slot address back to its ring index. Addresses that don't point at the
    /// start of a slot are rejected.
    fn slot_index(&self, address: u32, element_state_size: u16) -> Option<u32> {
        let slot_size = SLOT_HEADER_SIZE as u32 + element_state_size as u32;
        let relative = address.checked_sub(self.first_slot_address())?;
        if relative % slot_size != 0 {
            return None;
        }
        let index = relative / slot_size;
        (index < self.capacity(element_state_size)).then_some(index)
    }

    pub(crate) fn info(&self) -> StateStorageInfo {
        let ring_capacity = if self.element_state_size > 0 {
            self.capacity(self.element_state_size)
        } else {
            0
        };

        StateStorageInfo {
            section: self.section,
            element_state_size: self.element_state_size,
            ring_capacity,
            latest_slot_address: self
                .latest
                .map(|latest| self.slot_address(latest.index, self.element_state_size)),
            write_count: self.latest.map(|latest| latest.write_count),
        }
    }
}

impl<T: Platform> Storage<T> {
    pub(crate) fn init_state_log(
        &mut self,
        reserved_offset: u32,
        reserved_size: u32,
    ) -> Result<(), Error> {
        #[cfg(feature = "defmt")]
        trace!("init_state_log: @{:#08x}[{}]", reserved_offset, reserved_size);

        self.state = StateLog::uninitialized(reserved_offset, reserved_size);

        let mut raw = [0u8; PREAMBLE_SIZE];
        self.hal
            .read(reserved_offset, &mut raw)
            .map_err(|_| Error::DeviceError)?;
        let preamble = Preamble::from_bytes(&raw);

        if !preamble.has_tag() {
            #[cfg(feature = "defmt")]
            debug!("storage: missing tag, formatting");

            return self.format_state_log();
        }

        // a foreign version is never overwritten, not even without sections
        if preamble.version != STORAGE_VERSION {
            #[cfg(feature = "defmt")]
            warn!("storage: version {} not supported", preamble.version);

            return Err(Error::UnsupportedVersion(preamble.version));
        }

        if preamble.section_count == 0 {
            #[cfg(feature = "defmt")]
            debug!("storage: no sections, formatting");

            return self.format_state_log();
        }

        let mut raw = [0u8; SECTION_PREAMBLE_SIZE];
        self.hal
            .read(self.state.section_offset(), &mut raw)
            .map_err(|_| Error::DeviceError)?;
        let section = SectionPreamble::from_bytes(&raw);

        #[cfg(feature = "defmt")]
        debug!("storage: section type {}, size {}", section.type_, section.size);

        if section.crc1 != section.crc2 {
            #[cfg(feature = "defmt")]
            warn!("storage: section crc copies differ, check the storage hardware");
        }

        match section.section_type() {
            Some(SectionType::ElementStateWlByte) => {
                self.state.section = section;
            }
            Some(SectionType::Uninitialized) => return Ok(()),
            _ => return Err(Error::SectionTypeMismatch(section.type_)),
        }

        if !self.state.is_valid() {
            return Ok(());
        }

        if let Some(candidate) = self.find_latest_slot()? {
            self.state.latest = Some(LatestSlot {
                index: candidate.index,
                write_count: candidate.write_count,
            });
        }

        Ok(())
    }

    /// Writes a fresh preamble and section preamble, skipping bytes that already match. The tag is
    /// written last, an interrupted format is simply repeated on the next boot.
    fn format_state_log(&mut self) -> Result<(), Error> {
        let reserved_size = self.state.reserved_size;

        let (section, section_count) = if reserved_size == 0 {
            (SectionPreamble::default(), 0)
        } else {
            let size = reserved_size
                .checked_sub(PREAMBLE_SIZE as u32)
                .and_then(|size| u16::try_from(size).ok())
                .ok_or(Error::InsufficientCapacity)?;
            if (reserved_size as usize) < MIN_RESERVED_SIZE {
                return Err(Error::InsufficientCapacity);
            }

            let section = SectionPreamble {
                type_: WL_BYTE_TYPE,
                size,
                crc1: 0,
                crc2: 0,
            };
            (section, 1)
        };

        let mut written = self
            .hal
            .update(self.state.section_offset(), &section.to_bytes())
            .map_err(|_| Error::DeviceError)?;

        self.state.section = section;

        if self.state.is_valid() {
            let entry = StateEntryAddress::new(self.state.first_slot_address(), 0);
            for copy in [EntryCopy::Backup, EntryCopy::Main] {
                written |= self
                    .hal
                    .update(self.state.entry_address_offset(copy), &entry.to_bytes())
                    .map_err(|_| Error::DeviceError)?;
            }
        }

        written |= self
            .hal
            .update(
                self.state.reserved_offset,
                &Preamble::new(section_count).to_bytes(),
            )
            .map_err(|_| Error::DeviceError)?;

        // an already formatted device without sections costs nothing on boot
        if written {
            self.hal.commit().map_err(|_| Error::DeviceError)?;
        }
        Ok(())
    }

    fn read_entry_address(&mut self, copy: EntryCopy) -> Result<StateEntryAddress, Error> {
        let mut raw = [0u8; STATE_ENTRY_ADDRESS_SIZE];
        self.hal
            .read_quiet(self.state.entry_address_offset(copy), &mut raw)
            .map_err(|_| Error::DeviceError)?;
        Ok(StateEntryAddress::from_bytes(&raw))
    }

    /// Reads a slot and returns it if the payload matches the CRC in its header.
    fn read_slot(
        &mut self,
        index: u32,
        element_state_size: u16,
    ) -> Result<Option<SlotCandidate>, Error> {
        let address = self.state.slot_address(index, element_state_size);

        let mut raw = [0u8; SLOT_HEADER_SIZE];
        self.hal
            .read_quiet(address, &mut raw)
            .map_err(|_| Error::DeviceError)?;
        let header = SlotHeader::from_bytes(&raw);

        let mut payload = vec![0u8; element_state_size as usize];
        self.hal
            .read_quiet(address + SLOT_HEADER_SIZE as u32, &mut payload)
            .map_err(|_| Error::DeviceError)?;

        if crc16(&payload) != header.crc {
            #[cfg(feature = "defmt")]
            trace!("read_slot: crc mismatch in slot {}", index);

            return Ok(None);
        }

        Ok(Some(SlotCandidate {
            index,
            write_count: header.write_count,
            payload,
        }))
    }

    /// Locates the newest intact snapshot using the entry addresses.
    ///
    /// Every CRC-valid entry address contributes the slot it names plus the slot after it: the
    /// addresses are updated after the slot itself, so they may lag one write behind.
    fn find_latest_slot(&mut self) -> Result<Option<SlotCandidate>, Error> {
        let main = self.read_entry_address(EntryCopy::Main)?;
        let backup = self.read_entry_address(EntryCopy::Backup)?;

        let mut entries: Vec<StateEntryAddress> = Vec::with_capacity(2);
        for entry in [main, backup] {
            if !entry.is_valid() {
                #[cfg(feature = "defmt")]
                warn!("storage: invalid state entry address crc");
                continue;
            }
            if !entries.contains(&entry) {
                entries.push(entry);
            }
        }

        let mut best: Option<SlotCandidate> = None;
        for entry in entries {
            // never written so far
            if entry.element_state_size == 0 {
                continue;
            }

            let Some(index) = self
                .state
                .slot_index(entry.address, entry.element_state_size)
            else {
                #[cfg(feature = "defmt")]
                warn!("storage: entry address {:#08x} outside of ring", entry.address);
                continue;
            };

            let capacity = self.state.capacity(entry.element_state_size);
            for candidate_index in [index, (index + 1) % capacity] {
                let Some(candidate) = self.read_slot(candidate_index, entry.element_state_size)?
                else {
                    continue;
                };

                #[cfg(feature = "debug-logs")]
                println!(
                    "  state: candidate slot {candidate_index}, write count {}",
                    candidate.write_count
                );

                if best
                    .as_ref()
                    .is_none_or(|best| is_newer(candidate.write_count, best.write_count))
                {
                    self.state.element_state_size = entry.element_state_size;
                    best = Some(candidate);
                }
            }
        }

        // keep the size fixed by an earlier write even if all of its slots are damaged
        if best.is_none() && self.state.element_state_size == 0 {
            if let Some(entry) = [main, backup]
                .into_iter()
                .find(|entry| entry.is_valid() && entry.element_state_size > 0)
            {
                self.state.element_state_size = entry.element_state_size;
            }
        }

        Ok(best)
    }

    /// Scans every slot of the ring for the newest intact one. Only used to pick up the write
    /// counter after the entry addresses lost track of the latest slot.
    fn scan_ring(&mut self, element_state_size: u16) -> Result<Option<SlotCandidate>, Error> {
        let mut best: Option<SlotCandidate> = None;
        for index in 0..self.state.capacity(element_state_size) {
            if let Some(candidate) = self.read_slot(index, element_state_size)? {
                if best
                    .as_ref()
                    .is_none_or(|best| is_newer(candidate.write_count, best.write_count))
                {
                    best = Some(candidate);
                }
            }
        }
        Ok(best)
    }

    /// Updates both entry addresses so that at least one of them is valid at any time: the backup
    /// copy is written and verified before the main copy is touched.
    fn update_entry_addresses(&mut self, entry: StateEntryAddress) -> Result<(), Error> {
        let raw = entry.to_bytes();

        self.hal
            .update(self.state.entry_address_offset(EntryCopy::Backup), &raw)
            .map_err(|_| Error::DeviceError)?;

        if self.read_entry_address(EntryCopy::Backup)? != entry {
            #[cfg(feature = "defmt")]
            warn!("storage: backup state entry address verification failed");

            return Err(Error::DeviceError);
        }

        self.hal
            .update(self.state.entry_address_offset(EntryCopy::Main), &raw)
            .map_err(|_| Error::DeviceError)?;

        Ok(())
    }

    pub(crate) fn write_state_log(&mut self, elements: &[&dyn StateElement]) -> Result<(), Error> {
        if !self.state.is_valid() {
            return Ok(());
        }

        let payload = element::serialize(elements);
        let element_state_size =
            u16::try_from(payload.len()).map_err(|_| Error::InsufficientCapacity)?;

        if self.state.element_state_size != 0 && self.state.element_state_size != element_state_size
        {
            #[cfg(feature = "defmt")]
            warn!(
                "storage: state size {} doesn't match stored size {}",
                element_state_size, self.state.element_state_size
            );

            return Err(Error::StateSizeMismatch);
        }

        let capacity = self.state.capacity(element_state_size);
        if capacity < 2 {
            return Err(Error::InsufficientCapacity);
        }

        let previous = match self.state.latest {
            Some(latest) => Some(latest),
            None => self
                .scan_ring(element_state_size)?
                .map(|candidate| LatestSlot {
                    index: candidate.index,
                    write_count: candidate.write_count,
                }),
        };
        let next = match previous {
            Some(previous) => LatestSlot {
                index: (previous.index + 1) % capacity,
                write_count: previous.write_count.wrapping_add(1),
            },
            None => LatestSlot {
                index: 0,
                write_count: 1,
            },
        };

        let address = self.state.slot_address(next.index, element_state_size);

        #[cfg(feature = "defmt")]
        trace!(
            "write_state_log: slot {} @{:#08x}, write count {}",
            next.index, address, next.write_count
        );

        #[cfg(feature = "debug-logs")]
        println!(
            "  state: write slot {} @{address:#08x}, write count {}",
            next.index, next.write_count
        );

        // payload before header: a torn header never validates a payload from an older lap
        self.hal
            .update(address + SLOT_HEADER_SIZE as u32, &payload)
            .map_err(|_| Error::DeviceError)?;
        let header = SlotHeader {
            write_count: next.write_count,
            crc: crc16(&payload),
        };
        self.hal
            .write(address, &header.to_bytes())
            .map_err(|_| Error::DeviceError)?;

        self.update_entry_addresses(StateEntryAddress::new(address, element_state_size))?;

        self.hal.commit().map_err(|_| Error::DeviceError)?;

        self.state.element_state_size = element_state_size;
        self.state.latest = Some(next);

        Ok(())
    }

    pub(crate) fn load_state_log(
        &mut self,
        elements: &mut [&mut dyn StateElement],
    ) -> Result<bool, Error> {
        if !self.state.is_valid() {
            return Ok(false);
        }

        let Some(candidate) = self.find_latest_slot()? else {
            #[cfg(feature = "defmt")]
            warn!("storage: no valid state snapshot found");

            // elements keep their defaults, the next write starts over
            self.state.latest = None;
            if !self.faulted {
                self.hal.commit().map_err(|_| Error::DeviceError)?;
            }
            return Ok(false);
        };

        if !element::deserialize(&candidate.payload, elements) {
            return Err(Error::StateSizeMismatch);
        }

        #[cfg(feature = "defmt")]
        debug!(
            "storage: loaded state from slot {}, write count {}",
            candidate.index, candidate.write_count
        );

        self.state.latest = Some(LatestSlot {
            index: candidate.index,
            write_count: candidate.write_count,
        });

        Ok(true)
    }

    pub(crate) fn erase_state_log(&mut self) -> Result<(), Error> {
        let offset = self.state.reserved_offset;
        let len = (self.state.reserved_size as usize).max(PREAMBLE_SIZE + SECTION_PREAMBLE_SIZE);

        #[cfg(feature = "defmt")]
        debug!("storage: erasing state storage @{:#08x}[{}]", offset, len);

        self.hal
            .update(offset, &vec![0u8; len])
            .map_err(|_| Error::DeviceError)?;
        self.hal.commit().map_err(|_| Error::DeviceError)?;

        self.state = StateLog::uninitialized(offset, self.state.reserved_size);
        Ok(())
    }
}
