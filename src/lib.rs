#![doc = include_str ! ("../README.md")]
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

pub mod crc16;
mod element;
pub mod error;
pub mod layout;
pub mod platform;
mod schedule;
mod section;
mod state;

pub use element::StateElement;
pub use schedule::StateSaveTimer;
pub use section::{Section, SectionRegistry};

extern crate alloc;

use crate::error::Error;
use crate::layout::SectionPreamble;
use crate::platform::Platform;
use crate::state::StateLog;

/// Snapshot of the in-memory view of the wear-leveling state log.
#[derive(Debug, Clone, PartialEq)]
pub struct StateStorageInfo {
    pub section: SectionPreamble,
    /// Size of a single snapshot, `0` until the first write.
    pub element_state_size: u16,
    /// Number of slots in the ring, `0` while the snapshot size is unknown.
    pub ring_capacity: u32,
    /// Absolute device offset of the most recently written slot.
    pub latest_slot_address: Option<u32>,
    pub write_count: Option<u32>,
}

/// The Storage struct owns the device and the section table. It keeps the position of the latest
/// state snapshot in memory, everything else is read from the device on demand.
pub struct Storage<T: Platform> {
    pub(crate) hal: T,
    pub(crate) sections: SectionRegistry,
    pub(crate) state: StateLog,
    pub(crate) faulted: bool,
}

impl<T: Platform> Storage<T> {
    /// Takes ownership of the device and the fully populated section table. The table can't be
    /// changed afterwards.
    ///
    /// The state log stays unusable until [`Storage::init`] is called.
    pub fn new(hal: T, sections: SectionRegistry) -> Self {
        Self {
            hal,
            sections,
            state: StateLog::uninitialized(0, 0),
            faulted: false,
        }
    }

    /// Formats blank memory or picks up an existing state log at `reserved_offset`.
    ///
    /// 1. Without the "SUPLA" tag the preamble is written. A `reserved_size` of zero formats the
    ///    memory but leaves the state log disabled.
    /// 2. A tag with another version fails with [`Error::UnsupportedVersion`], nothing is written.
    /// 3. A preamble without sections is formatted again; only bytes that differ are written.
    /// 4. Otherwise the stored section preamble and both entry addresses are read to locate the
    ///    latest snapshot. Nothing is written in this case.
    pub fn init(&mut self, reserved_offset: u32, reserved_size: u32) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::DeviceError);
        }

        let result = self.init_state_log(reserved_offset, reserved_size);
        self.track_fault(result)
    }

    /// True if the state log is formatted and has space reserved. This doesn't tell whether a
    /// snapshot was ever written.
    pub fn is_state_storage_valid(&self) -> bool {
        self.state.is_valid()
    }

    /// Appends a snapshot of all `elements` (in the given order) to the ring. Does nothing if the
    /// state log is not valid.
    ///
    /// The first write fixes the snapshot size, later writes with a different size are rejected
    /// with [`Error::StateSizeMismatch`].
    pub fn write_state_storage(&mut self, elements: &[&dyn StateElement]) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::DeviceError);
        }

        let result = self.write_state_log(elements);
        self.track_fault(result)
    }

    /// Loads the latest valid snapshot and hands each element its part, in the same order that
    /// was used for writing.
    ///
    /// Returns `Ok(false)` if the log is not valid or no intact snapshot was found. The elements
    /// are left untouched in that case. Loading works on a faulted storage but never commits.
    pub fn load_state_storage(
        &mut self,
        elements: &mut [&mut dyn StateElement],
    ) -> Result<bool, Error> {
        let result = self.load_state_log(elements);
        self.track_fault(result)
    }

    /// Zeroes the whole reserved state region. The next [`Storage::init`] formats it from scratch,
    /// which is the only way to change the snapshot size.
    pub fn erase_state_storage(&mut self) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::DeviceError);
        }

        let result = self.erase_state_log();
        self.track_fault(result)
    }

    /// Write a registered section. `data` must be exactly as long as the registered size.
    ///
    /// Bytes (data, CRC trailer and backup copy) are only written if they differ from what is
    /// already stored.
    pub fn write_section(&mut self, id: u16, data: &[u8]) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::DeviceError);
        }

        let result = self.write_section_copies(id, data);
        self.track_fault(result)
    }

    /// Read a registered section into `buf`, which must be exactly as long as the registered size.
    ///
    /// Falls back to the backup copy if the primary fails its CRC check. `buf` is only modified on
    /// success.
    pub fn read_section(&mut self, id: u16, buf: &mut [u8]) -> Result<(), Error> {
        let result = self.read_section_copies(id, buf);
        self.track_fault(result)
    }

    /// Zeroes a registered section including its CRC trailer and backup copy.
    pub fn delete_section(&mut self, id: u16) -> Result<(), Error> {
        if self.faulted {
            return Err(Error::DeviceError);
        }

        let result = self.delete_section_copies(id);
        self.track_fault(result)
    }

    pub fn sections(&self) -> &SectionRegistry {
        &self.sections
    }

    pub fn state_info(&self) -> StateStorageInfo {
        self.state.info()
    }

    pub fn platform(&self) -> &T {
        &self.hal
    }

    pub fn platform_mut(&mut self) -> &mut T {
        &mut self.hal
    }

    /// Gives back the device, e.g. to rebuild the storage after a device error.
    pub fn into_inner(self) -> T {
        self.hal
    }

    fn track_fault<R>(&mut self, result: Result<R, Error>) -> Result<R, Error> {
        if let Err(Error::DeviceError) = result {
            self.faulted = true;
        }
        result
    }
}
