use std::time::Instant;

use crate::ring_buffer::AudioConsumer;

/// A raw block pulled off the capture ring, still at device rate/layout.
#[derive(Debug, Clone)]
pub struct RawBlock {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    pub timestamp: Instant,
}

/// Drains the capture ring and reconstructs block metadata from the running
/// sample count (the ring itself carries bare samples).
pub struct FrameReader {
    consumer: AudioConsumer,
    sample_rate: u32,
    channels: u16,
    samples_read: u64,
    start_time: Instant,
}

impl FrameReader {
    pub fn new(consumer: AudioConsumer, sample_rate: u32, channels: u16) -> Self {
        Self {
            consumer,
            sample_rate,
            channels,
            samples_read: 0,
            start_time: Instant::now(),
        }
    }

    /// Apply a device hot-swap: subsequent blocks carry the new layout.
    pub fn update_device_config(&mut self, sample_rate: u32, channels: u16) {
        if self.sample_rate != sample_rate || self.channels != channels {
            tracing::info!(
                "Capture source changed: {}Hz {}ch -> {}Hz {}ch",
                self.sample_rate,
                self.channels,
                sample_rate,
                channels
            );
            self.sample_rate = sample_rate;
            self.channels = channels;
        }
    }

    pub fn read_block(&mut self, max_samples: usize) -> Option<RawBlock> {
        let mut buffer = vec![0f32; max_samples];
        let samples_read = self.consumer.read(&mut buffer);

        if samples_read == 0 {
            return None;
        }
        buffer.truncate(samples_read);

        let frames = self.samples_read / self.channels.max(1) as u64;
        let elapsed_ms = frames * 1000 / self.sample_rate as u64;
        let timestamp = self.start_time + std::time::Duration::from_millis(elapsed_ms);

        self.samples_read += samples_read as u64;

        Some(RawBlock {
            samples: buffer,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp,
        })
    }

    pub fn available_samples(&self) -> usize {
        self.consumer.slots()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring_buffer::AudioRingBuffer;

    #[test]
    fn empty_ring_yields_no_block() {
        let (_prod, cons) = AudioRingBuffer::new(64).split();
        let mut reader = FrameReader::new(cons, 16_000, 1);
        assert!(reader.read_block(32).is_none());
    }

    #[test]
    fn blocks_carry_the_current_device_layout() {
        let (mut prod, cons) = AudioRingBuffer::new(1024).split();
        let mut reader = FrameReader::new(cons, 48_000, 2);

        prod.write(&[0.5; 100]).unwrap();
        let block = reader.read_block(512).unwrap();
        assert_eq!(block.samples.len(), 100);
        assert_eq!(block.sample_rate, 48_000);
        assert_eq!(block.channels, 2);

        reader.update_device_config(16_000, 1);
        prod.write(&[0.5; 50]).unwrap();
        let block = reader.read_block(512).unwrap();
        assert_eq!(block.sample_rate, 16_000);
        assert_eq!(block.channels, 1);
    }
}
