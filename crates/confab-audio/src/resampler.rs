use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

#[derive(Debug, Clone, Copy)]
pub enum ResamplerQuality {
    /// Lower quality, lower CPU usage.
    Fast,
    /// Default quality/performance balance for speech.
    Balanced,
    /// Higher quality, higher CPU usage.
    Quality,
}

/// Streaming mono f32 resampler on Rubato's sinc interpolation.
///
/// Accepts arbitrary-sized input chunks and internally buffers to satisfy
/// Rubato's fixed chunk requirement.
pub struct StreamResampler {
    in_rate: u32,
    out_rate: u32,
    resampler: SincFixedIn<f32>,
    input_buffer: Vec<f32>,
    chunk_size: usize,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Self {
        Self::new_with_quality(in_rate, out_rate, ResamplerQuality::Balanced)
    }

    pub fn new_with_quality(in_rate: u32, out_rate: u32, quality: ResamplerQuality) -> Self {
        // Small chunks keep added latency low; 512 samples at 16 kHz is 32 ms.
        let chunk_size = 512;

        let sinc_params = match quality {
            ResamplerQuality::Fast => SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 0.92,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 64,
                window: WindowFunction::Blackman,
            },
            ResamplerQuality::Balanced => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 128,
                window: WindowFunction::Blackman2,
            },
            ResamplerQuality::Quality => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.97,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
        };

        let resampler = SincFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            2.0,
            sinc_params,
            chunk_size,
            1,
        )
        .expect("resampler construction with fixed presets cannot fail");

        Self {
            in_rate,
            out_rate,
            resampler,
            input_buffer: Vec::with_capacity(chunk_size * 2),
            chunk_size,
        }
    }

    /// Process an arbitrary chunk of mono samples, returning whatever output
    /// is ready. Samples short of a full internal chunk stay buffered.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.in_rate == self.out_rate {
            return input.to_vec();
        }

        self.input_buffer.extend_from_slice(input);

        let mut output = Vec::new();
        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            match self.resampler.process(&[chunk], None) {
                Ok(mut frames) => {
                    if let Some(channel) = frames.pop() {
                        output.extend(channel);
                    }
                }
                Err(e) => {
                    tracing::warn!("Resampler error, dropping chunk: {}", e);
                }
            }
        }
        output
    }

    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.resampler.reset();
    }

    pub fn input_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.out_rate
    }
}
