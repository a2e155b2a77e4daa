use crate::crc16::crc16;
use crate::error::Error;
use crate::layout::SECTION_CRC_SIZE;
use crate::platform::{DeviceOps, Platform};
use crate::Storage;
use alloc::collections::BTreeMap;
use alloc::vec;
use core::iter;
#[cfg(feature = "defmt")]
use defmt::{trace, warn};

/// A caller declared, fixed size region of the device.
///
/// On the device a section occupies `[data][crc16?][backup data?][backup crc16?]` starting at
/// `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Section {
    pub offset: u32,
    pub size: u16,
    pub crc: bool,
    pub backup: bool,
}

impl Section {
    fn trailer_size(&self) -> u32 {
        if self.crc { SECTION_CRC_SIZE as u32 } else { 0 }
    }

    /// Size of one copy including its CRC trailer.
    fn copy_size(&self) -> u32 {
        self.size as u32 + self.trailer_size()
    }

    /// Total bytes used on the device.
    pub fn footprint(&self) -> u32 {
        if self.backup {
            2 * self.copy_size()
        } else {
            self.copy_size()
        }
    }

    /// Data offsets of the primary and, if configured, the backup copy. The primary always comes
    /// first.
    fn copies(&self) -> impl Iterator<Item = u32> {
        iter::once(self.offset).chain(self.backup.then(|| self.offset + self.copy_size()))
    }

    fn crc_offset(&self, copy_offset: u32) -> u32 {
        copy_offset + self.size as u32
    }
}

/// Section table populated once during startup, before it is handed over to [`Storage::new`].
#[derive(Debug, Default, Clone)]
pub struct SectionRegistry {
    sections: BTreeMap<u16, Section>,
}

impl SectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a section.
    ///
    /// `offset` is absolute. Make sure the section doesn't overlap with other sections or the
    /// state storage region, this is not checked. With `crc` a 2 byte CRC16 trailer follows the
    /// data; `backup` adds a second copy right after it and requires `crc`.
    pub fn register(
        &mut self,
        id: u16,
        offset: u32,
        size: u16,
        crc: bool,
        backup: bool,
    ) -> Result<(), Error> {
        if self.sections.contains_key(&id) {
            return Err(Error::DuplicateSection);
        }

        if backup && !crc {
            return Err(Error::BackupWithoutCrc);
        }

        let section = Section {
            offset,
            size,
            crc,
            backup,
        };
        if offset.checked_add(section.footprint()).is_none() {
            return Err(Error::InvalidSectionRange);
        }

        #[cfg(feature = "defmt")]
        trace!("register section {}: {:?}", id, section);

        self.sections.insert(id, section);
        Ok(())
    }

    pub fn get(&self, id: u16) -> Option<&Section> {
        self.sections.get(&id)
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &Section)> {
        self.sections.iter().map(|(&id, section)| (id, section))
    }
}

impl<T: Platform> Storage<T> {
    fn lookup_section(&self, id: u16, len: usize) -> Result<Section, Error> {
        let section = *self.sections.get(id).ok_or(Error::SectionNotFound)?;
        if len != section.size as usize {
            return Err(Error::SizeMismatch);
        }
        Ok(section)
    }

    pub(crate) fn write_section_copies(&mut self, id: u16, data: &[u8]) -> Result<(), Error> {
        let section = self.lookup_section(id, data.len())?;
        let crc = section.crc.then(|| crc16(data));

        for copy in section.copies() {
            #[cfg(feature = "debug-logs")]
            println!("  section {id}: write copy @{copy:#08x}[{}]", data.len());

            self.hal
                .update(copy, data)
                .map_err(|_| Error::DeviceError)?;

            if let Some(crc) = crc {
                self.hal
                    .update(section.crc_offset(copy), &crc.to_le_bytes())
                    .map_err(|_| Error::DeviceError)?;
            }
        }

        Ok(())
    }

    pub(crate) fn read_section_copies(&mut self, id: u16, buf: &mut [u8]) -> Result<(), Error> {
        let section = self.lookup_section(id, buf.len())?;
        let mut data = vec![0u8; buf.len()];

        for copy in section.copies() {
            self.hal
                .read(copy, &mut data)
                .map_err(|_| Error::DeviceError)?;

            if section.crc {
                let mut raw = [0u8; SECTION_CRC_SIZE];
                self.hal
                    .read(section.crc_offset(copy), &mut raw)
                    .map_err(|_| Error::DeviceError)?;

                if u16::from_le_bytes(raw) != crc16(&data) {
                    #[cfg(feature = "defmt")]
                    warn!("section {}: crc mismatch @{:#08x}", id, copy);

                    #[cfg(feature = "debug-logs")]
                    println!("  section {id}: crc mismatch @{copy:#08x}");

                    continue;
                }
            }

            buf.copy_from_slice(&data);
            return Ok(());
        }

        Err(Error::CorruptedData)
    }

    pub(crate) fn delete_section_copies(&mut self, id: u16) -> Result<(), Error> {
        let section = *self.sections.get(id).ok_or(Error::SectionNotFound)?;

        #[cfg(feature = "defmt")]
        trace!("delete section {}", id);

        for copy in section.copies() {
            self.hal
                .zero_bytewise(copy, section.size as usize)
                .map_err(|_| Error::DeviceError)?;

            if section.crc {
                self.hal
                    .write(section.crc_offset(copy), &[0u8; SECTION_CRC_SIZE])
                    .map_err(|_| Error::DeviceError)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_is_exclusive() {
        let mut registry = SectionRegistry::new();
        assert_eq!(registry.register(1, 10, 20, false, false), Ok(()));
        assert_eq!(
            registry.register(1, 10, 20, false, false),
            Err(Error::DuplicateSection)
        );
        assert_eq!(registry.register(2, 10, 20, true, true), Ok(()));
        assert_eq!(
            registry.register(2, 10, 20, false, false),
            Err(Error::DuplicateSection)
        );
        assert_eq!(registry.register(10, 10, 20, true, false), Ok(()));
        assert_eq!(registry.register(11, 10, 20, true, true), Ok(()));
        assert_eq!(
            registry.register(12, 10, 20, false, true),
            Err(Error::BackupWithoutCrc)
        );
        assert!(registry.get(12).is_none());
        assert_eq!(registry.len(), 4);
    }

    #[test]
    fn footprint_and_copies() {
        let plain = Section {
            offset: 10,
            size: 6,
            crc: false,
            backup: false,
        };
        assert_eq!(plain.footprint(), 6);
        assert_eq!(plain.copies().collect::<alloc::vec::Vec<_>>(), [10]);

        let mirrored = Section {
            offset: 10,
            size: 6,
            crc: true,
            backup: true,
        };
        assert_eq!(mirrored.footprint(), 16);
        assert_eq!(mirrored.copies().collect::<alloc::vec::Vec<_>>(), [10, 18]);
        assert_eq!(mirrored.crc_offset(18), 24);
    }

    #[test]
    fn range_must_fit_address_space() {
        let mut registry = SectionRegistry::new();
        assert_eq!(
            registry.register(1, u32::MAX - 4, 6, false, false),
            Err(Error::InvalidSectionRange)
        );
        assert_eq!(registry.register(1, u32::MAX - 6, 6, false, false), Ok(()));
    }
}
