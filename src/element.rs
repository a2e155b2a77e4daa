use alloc::vec;
use alloc::vec::Vec;

/// A runtime element whose volatile state (output level, counter, timer…) is snapshotted into the
/// wear-leveling state log.
///
/// The size must not change over the lifetime of a formatted storage: the log fixes the snapshot
/// size on its first write.
pub trait StateElement {
    /// Number of bytes produced by [`StateElement::save_state`].
    fn state_size(&self) -> usize;

    /// Serializes the current state into `buf`, which is exactly `state_size()` bytes long.
    fn save_state(&self, buf: &mut [u8]);

    /// Restores the state from `buf`, which is exactly `state_size()` bytes long.
    fn load_state(&mut self, buf: &[u8]);
}

/// Concatenates the state of all elements in registration order.
pub(crate) fn serialize(elements: &[&dyn StateElement]) -> Vec<u8> {
    let total: usize = elements.iter().map(|e| e.state_size()).sum();
    let mut payload = vec![0u8; total];

    let mut offset = 0;
    for element in elements {
        let size = element.state_size();
        element.save_state(&mut payload[offset..offset + size]);
        offset += size;
    }
    payload
}

/// Splits `payload` across the elements in registration order. Returns `false` without touching
/// any element if the element sizes don't add up to the payload length.
pub(crate) fn deserialize(payload: &[u8], elements: &mut [&mut dyn StateElement]) -> bool {
    let total: usize = elements.iter().map(|e| e.state_size()).sum();
    if total != payload.len() {
        return false;
    }

    let mut offset = 0;
    for element in elements.iter_mut() {
        let size = element.state_size();
        element.load_state(&payload[offset..offset + size]);
        offset += size;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u32);

    impl StateElement for Counter {
        fn state_size(&self) -> usize {
            4
        }

        fn save_state(&self, buf: &mut [u8]) {
            buf.copy_from_slice(&self.0.to_le_bytes());
        }

        fn load_state(&mut self, buf: &[u8]) {
            self.0 = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        }
    }

    struct Stateless;

    impl StateElement for Stateless {
        fn state_size(&self) -> usize {
            0
        }

        fn save_state(&self, _buf: &mut [u8]) {}

        fn load_state(&mut self, _buf: &[u8]) {}
    }

    #[test]
    fn payload_keeps_registration_order() {
        let a = Counter(1);
        let b = Stateless;
        let c = Counter(0x0A0B0C0D);
        let payload = serialize(&[&a, &b, &c]);
        assert_eq!(payload, [1, 0, 0, 0, 0x0D, 0x0C, 0x0B, 0x0A]);

        let mut a = Counter(0);
        let mut b = Stateless;
        let mut c = Counter(0);
        assert!(deserialize(&payload, &mut [&mut a, &mut b, &mut c]));
        assert_eq!(a.0, 1);
        assert_eq!(c.0, 0x0A0B0C0D);
    }

    #[test]
    fn size_mismatch_leaves_elements_alone() {
        let mut a = Counter(7);
        assert!(!deserialize(&[1, 2, 3], &mut [&mut a]));
        assert_eq!(a.0, 7);
    }
}
