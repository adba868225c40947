//! Synthetic frame source.
//!
//! Real deployments plug a screen grabber and video encoder in behind
//! [`FrameSource`].  `SyntheticCapture` stands in for that pipeline: it emits
//! small sequence-numbered frames at a fixed rate, with a keyframe every
//! `keyframe_interval` frames, so the whole media path can be exercised
//! without a display or an encoder.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{interval, Interval, MissedTickBehavior};

use deskcast_core::protocol::SequenceCounter;
use deskcast_core::EncodedFrame;

use crate::application::media_bridge::FrameSource;

/// Bytes in every synthetic frame payload.
const FRAME_LEN: usize = 64;

/// Fixed-rate generator of placeholder frames.
pub struct SyntheticCapture {
    period: Duration,
    ticker: Option<Interval>,
    sequence: SequenceCounter,
    keyframe_interval: u64,
    limit: Option<u64>,
}

impl SyntheticCapture {
    /// Emits `fps` frames per second, forever.  `fps` of 0 is treated as 1.
    pub fn new(fps: u32) -> Self {
        Self {
            period: Duration::from_secs(1) / fps.max(1),
            ticker: None,
            sequence: SequenceCounter::new(),
            keyframe_interval: u64::from(fps.max(1)),
            limit: None,
        }
    }

    /// Stops after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

#[async_trait]
impl FrameSource for SyntheticCapture {
    async fn next_frame(&mut self) -> Option<EncodedFrame> {
        if self.limit.is_some_and(|limit| self.sequence.peek() >= limit) {
            return None;
        }
        let period = self.period;
        let ticker = self.ticker.get_or_insert_with(|| {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker
        });
        ticker.tick().await;

        let sequence = self.sequence.next();
        let keyframe = sequence % self.keyframe_interval == 0;
        let mut data = vec![0u8; FRAME_LEN];
        data[..8].copy_from_slice(&sequence.to_be_bytes());
        data[8] = u8::from(keyframe);
        Some(EncodedFrame::new(sequence, period, keyframe, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_numbered_and_keyframed() {
        let mut capture = SyntheticCapture::new(2).with_limit(4);

        let mut frames = Vec::new();
        while let Some(frame) = capture.next_frame().await {
            frames.push(frame);
        }

        let sequences: Vec<u64> = frames.iter().map(|f| f.sequence).collect();
        let keyframes: Vec<bool> = frames.iter().map(|f| f.keyframe).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(keyframes, vec![true, false, true, false]);
        assert_eq!(frames[0].duration, Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_rate_is_respected() {
        let mut capture = SyntheticCapture::new(10).with_limit(3);
        let start = tokio::time::Instant::now();

        while capture.next_frame().await.is_some() {}

        // First tick fires immediately, the next two after 100 ms each.
        assert_eq!(start.elapsed(), Duration::from_millis(200));
    }

    #[test]
    fn test_zero_fps_is_clamped() {
        assert_eq!(SyntheticCapture::new(0).period(), Duration::from_secs(1));
    }
}
