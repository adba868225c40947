//! Encoded media frames.
//!
//! The capture/encode collaborator produces a continuous sequence of
//! [`EncodedFrame`]s.  The server never inspects the payload; it only fans the
//! frames out to every attached peer.

use std::sync::Arc;
use std::time::Duration;

/// One encoded video sample.
///
/// The payload is reference counted so that fanning a frame out to N peers
/// clones a pointer, not the bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    /// Producer-assigned sequence number, used to detect drops downstream.
    pub sequence: u64,
    /// Presentation duration of this sample.
    pub duration: Duration,
    /// `true` if the sample can be decoded without earlier samples.
    pub keyframe: bool,
    /// Opaque encoded bytes.
    pub data: Arc<[u8]>,
}

impl EncodedFrame {
    pub fn new(sequence: u64, duration: Duration, keyframe: bool, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            sequence,
            duration,
            keyframe,
            data: data.into(),
        }
    }

    /// Length of the encoded payload in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let frame = EncodedFrame::new(1, Duration::from_millis(33), true, vec![1u8, 2, 3]);
        let copy = frame.clone();
        assert!(Arc::ptr_eq(&frame.data, &copy.data));
        assert_eq!(copy.len(), 3);
    }
}
