use std::fs;
use std::io::Write;
use std::path::Path;

use embedded_storage::{ReadStorage, Storage};
use supla_storage::platform::Platform;

use crate::error::Error;

/// An EEPROM image held in memory, usable as a storage device on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    data: Vec<u8>,
}

impl Image {
    /// Blank image, all bytes zero like a fresh EEPROM.
    pub fn blank(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        fs::File::create(path)?.write_all(&self.data)?;
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrows `len` bytes at `offset`, failing instead of panicking on short images.
    pub fn slice(&self, offset: u32, len: usize) -> Result<&[u8], Error> {
        let start = offset as usize;
        start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or(Error::OutOfBounds { offset, len })
    }
}

impl ReadStorage for Image {
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        bytes.copy_from_slice(self.slice(offset, bytes.len())?);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Storage for Image {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let target = start
            .checked_add(bytes.len())
            .and_then(|end| self.data.get_mut(start..end))
            .ok_or(Error::OutOfBounds {
                offset,
                len: bytes.len(),
            })?;
        target.copy_from_slice(bytes);
        Ok(())
    }
}

impl Platform for Image {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_bounds_access_fails() {
        let mut image = Image::blank(16);
        let mut buf = [0u8; 4];
        assert!(image.read(12, &mut buf).is_ok());
        assert!(matches!(
            image.read(13, &mut buf),
            Err(Error::OutOfBounds { offset: 13, len: 4 })
        ));
        assert!(image.write(u32::MAX, &buf).is_err());
        assert!(image.write(0, &[1, 2]).is_ok());
        assert_eq!(&image.as_bytes()[..3], &[1, 2, 0]);
    }
}
