//! Receiving side of a firmware transfer
//!
//! Chunks are appended in arrival order. There is no reordering and no
//! retransmission request; a missing index is only counted. A chunk that
//! would overflow the reassembly buffer is dropped and the session is
//! marked degraded, but it keeps running until `OTA_END` or its deadline.

use crate::config::cascade::BUFFER_CAPACITY;
use crate::firmware::image_checksum;
use heapless::Vec;
use log::warn;

/// Why verification refused a finished transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// Fewer bytes arrived than `OTA_START` announced
    Incomplete { received: u32, expected: u32 },
    /// The image CRC-32 did not match `OTA_END`
    Checksum,
}

/// In-progress reassembly state
pub struct CascadeSession {
    expected_size: u32,
    received_size: u32,
    buffer: Vec<u8, BUFFER_CAPACITY>,
    deadline_ms: u64,
    degraded: bool,
    next_index: u32,
    gaps: u32,
}

impl CascadeSession {
    /// Open a session for `expected_size` bytes that must finish by `now + timeout`
    pub fn new(expected_size: u32, timeout_ms: u32, now_ms: u64) -> Self {
        if expected_size as usize > BUFFER_CAPACITY {
            warn!(
                "Cascade: announced image ({} bytes) exceeds buffer ({} bytes)",
                expected_size, BUFFER_CAPACITY
            );
        }
        Self {
            expected_size,
            received_size: 0,
            buffer: Vec::new(),
            deadline_ms: now_ms.saturating_add(timeout_ms as u64),
            degraded: false,
            next_index: 0,
            gaps: 0,
        }
    }

    /// Append one chunk; returns false if it was dropped for lack of space
    pub fn append(&mut self, index: u32, payload: &[u8]) -> bool {
        if index != self.next_index {
            self.gaps = self.gaps.wrapping_add(1);
            warn!(
                "Cascade: chunk {} arrived, expected {}",
                index, self.next_index
            );
        }
        self.next_index = index.wrapping_add(1);

        if self.buffer.extend_from_slice(payload).is_err() {
            self.degraded = true;
            warn!(
                "Cascade: chunk {} ({} bytes) dropped, buffer full",
                index,
                payload.len()
            );
            return false;
        }
        self.received_size = self.received_size.saturating_add(payload.len() as u32);
        true
    }

    /// Check a finished transfer against the announced size and checksum
    pub fn verify(&self, checksum: Option<u32>) -> Result<&[u8], VerifyError> {
        if self.received_size < self.expected_size {
            return Err(VerifyError::Incomplete {
                received: self.received_size,
                expected: self.expected_size,
            });
        }
        if let Some(expected) = checksum {
            if image_checksum(&self.buffer) != expected {
                return Err(VerifyError::Checksum);
            }
        }
        Ok(&self.buffer)
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.deadline_ms
    }

    pub fn expected_size(&self) -> u32 {
        self.expected_size
    }

    pub fn received_size(&self) -> u32 {
        self.received_size
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Number of out-of-sequence chunk indices seen
    pub fn gaps(&self) -> u32 {
        self.gaps
    }

    /// Percentage of the announced size received so far, capped at 100
    pub fn percent(&self) -> u8 {
        if self.expected_size == 0 {
            return 100;
        }
        let pct = (self.received_size as u64 * 100) / self.expected_size as u64;
        pct.min(100) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_verify() {
        let mut session = CascadeSession::new(5, 1000, 0);
        assert!(session.append(0, b"abc"));
        assert!(session.append(1, b"de"));
        assert_eq!(session.received_size(), 5);
        assert_eq!(session.percent(), 100);
        assert_eq!(session.verify(None), Ok(&b"abcde"[..]));
        assert_eq!(session.verify(Some(image_checksum(b"abcde"))), Ok(&b"abcde"[..]));
        assert_eq!(session.gaps(), 0);
    }

    #[test]
    fn test_incomplete() {
        let mut session = CascadeSession::new(10, 1000, 0);
        session.append(0, b"abc");
        assert_eq!(
            session.verify(None),
            Err(VerifyError::Incomplete {
                received: 3,
                expected: 10
            })
        );
        assert_eq!(session.percent(), 30);
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut session = CascadeSession::new(3, 1000, 0);
        session.append(0, b"abc");
        assert_eq!(session.verify(Some(0x1234_5678)), Err(VerifyError::Checksum));
    }

    #[test]
    fn test_overflow_drops_chunk_and_degrades() {
        let mut session = CascadeSession::new(BUFFER_CAPACITY as u32, 1000, 0);
        let chunk = [0x55u8; 200];
        let mut index = 0;
        while session.received_size() as usize + chunk.len() <= BUFFER_CAPACITY {
            assert!(session.append(index, &chunk));
            index += 1;
        }
        assert!(!session.is_degraded());

        let before = session.received_size();
        assert!(!session.append(index, &chunk));
        assert!(session.is_degraded());
        assert_eq!(session.received_size(), before);

        // Still accepting chunks that fit
        let remaining = BUFFER_CAPACITY - before as usize;
        assert!(session.append(index + 1, &chunk[..remaining]));
    }

    #[test]
    fn test_gap_counted_not_reordered() {
        let mut session = CascadeSession::new(6, 1000, 0);
        session.append(0, b"ab");
        session.append(2, b"ef");
        session.append(1, b"cd");
        assert_eq!(session.gaps(), 2);
        assert_eq!(session.verify(None), Ok(&b"abefcd"[..]));
    }

    #[test]
    fn test_deadline() {
        let session = CascadeSession::new(10, 1000, 5000);
        assert!(!session.is_expired(5999));
        assert!(session.is_expired(6000));
    }
}
