use alloc::vec;
use embedded_storage::Storage as ByteStorage;

/// Byte addressable non-volatile memory. See README.md for an example implementation.
///
/// Writes of any length at any offset must be possible, but the storage never assumes that a
/// multi-byte write is atomic.
pub trait Platform: ByteStorage {
    /// Same as `read`, used for reads whose only purpose is comparing against data that is about
    /// to be written. Implementations may suppress their diagnostics here.
    fn read_quiet(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.read(offset, bytes)
    }

    /// Flushes buffered writes to the physical memory. EEPROM emulations on top of flash
    /// typically need this, true EEPROMs don't.
    fn commit(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub trait DeviceOps: Platform {
    /// Reads the current content quietly and only writes `bytes` if anything differs.
    /// Returns whether a physical write was issued.
    fn update(&mut self, offset: u32, bytes: &[u8]) -> Result<bool, Self::Error> {
        if bytes.is_empty() {
            return Ok(false);
        }

        let mut current = vec![0u8; bytes.len()];
        self.read_quiet(offset, &mut current)?;
        if current == bytes {
            return Ok(false);
        }

        self.write(offset, bytes)?;
        Ok(true)
    }

    /// Writes `len` zero bytes starting at `offset`, one byte per write. This matches the smallest
    /// erase granularity of the devices we have to support.
    fn zero_bytewise(&mut self, offset: u32, len: usize) -> Result<(), Self::Error> {
        for i in 0..len as u32 {
            self.write(offset + i, &[0])?;
        }
        Ok(())
    }
}

impl<T: Platform> DeviceOps for T {}

#[cfg(any(
    feature = "esp32",
    feature = "esp32s2",
    feature = "esp32s3",
    feature = "esp32c2",
    feature = "esp32c3",
    feature = "esp32c6",
    feature = "esp32h2",
))]
mod chip {
    use esp_storage::FlashStorage;

    use crate::platform::Platform;

    // FlashStorage does read-modify-write of whole sectors internally, every write is durable
    // once it returns.
    impl Platform for FlashStorage<'_> {}
}
