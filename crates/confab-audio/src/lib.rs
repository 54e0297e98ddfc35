pub mod capture;
pub mod codec;
pub mod constants;
pub mod detector;
pub mod device;
pub mod frame_reader;
pub mod gain;
pub mod pipeline;
pub mod playback;
pub mod profiler;
pub mod resampler;
pub mod ring_buffer;
pub mod sizer;
pub mod splitter;
pub mod watchdog;

// Public API
pub use capture::{CaptureEvent, CaptureStats, CaptureThread, DeviceConfig};
pub use codec::{decode_base64, decode_pcm, encode_base64, encode_frame};
pub use detector::SilenceDetector;
pub use device::{DeviceInfo, DeviceManager};
pub use frame_reader::FrameReader;
pub use gain::{calibration_gain, GainControl};
pub use pipeline::{AudioPipeline, PipelineConfig};
pub use playback::{PlaybackChunk, PlaybackClock, PlaybackScheduler, PlaybackSink};
pub use profiler::{DeviceProbe, DeviceProfile, GpuTier, Quality};
pub use resampler::{ResamplerQuality, StreamResampler};
pub use ring_buffer::AudioRingBuffer;
pub use sizer::{snap_to_power_of_two, AdaptiveBufferSizer};
pub use splitter::{AudioFrame, FrameSplitter, SplitterConfig};
pub use watchdog::WatchdogTimer;
