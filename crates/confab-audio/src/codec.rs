//! Stateless PCM conversion between the f32 sample domain and the 16-bit
//! little-endian wire format, plus the base64 wrappers used for transport.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use confab_foundation::AudioError;

/// Float samples to 16-bit signed PCM.
///
/// Negative values scale by 32768 and non-negative by 32767 so that +1.0
/// cannot overflow; the fractional part is truncated. Lossy, deterministic,
/// never fails.
pub fn encode_frame(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let clamped = s.clamp(-1.0, 1.0);
            let scale = if clamped < 0.0 { 32768.0 } else { 32767.0 };
            (clamped * scale) as i16
        })
        .collect()
}

/// Pack encoded samples little-endian and base64 them for the wire.
pub fn encode_base64(samples: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

pub fn decode_base64(data: &str) -> Result<Vec<u8>, AudioError> {
    BASE64
        .decode(data)
        .map_err(|e| AudioError::Codec(format!("invalid base64 payload: {e}")))
}

/// 16-bit little-endian PCM bytes back to per-channel f32 buffers.
///
/// Interleaved input is split by sample index modulo the channel count; mono
/// input is a direct copy. Each channel gets exactly `bytes/2/channels`
/// samples. Stored values are clamped to [-1, 1] on the way out.
pub fn decode_pcm(bytes: &[u8], channels: usize) -> Result<Vec<Vec<f32>>, AudioError> {
    if channels == 0 {
        return Err(AudioError::Codec("zero channels".into()));
    }
    if bytes.len() % 2 != 0 {
        return Err(AudioError::Codec(format!(
            "odd PCM byte length {}",
            bytes.len()
        )));
    }

    let total_samples = bytes.len() / 2;
    let per_channel = total_samples / channels;
    let mut out = vec![Vec::with_capacity(per_channel); channels];

    for (i, pair) in bytes.chunks_exact(2).enumerate() {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        let sample = (value as f32 / 32768.0).clamp(-1.0, 1.0);
        out[i % channels].push(sample);
    }

    // Interleaving remainders (a trailing partial frame) are dropped so all
    // channels stay the same length.
    for channel in &mut out {
        channel.truncate(per_channel);
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn encode_saturates_at_full_scale() {
        let encoded = encode_frame(&[1.0, -1.0, 2.0, -2.0]);
        assert_eq!(encoded, vec![32767, -32768, 32767, -32768]);
    }

    #[test]
    fn encode_truncates_toward_zero() {
        // 0.5 * 32767 = 16383.5 -> 16383; -0.5 * 32768 = -16384 exactly.
        assert_eq!(encode_frame(&[0.5, -0.5]), vec![16383, -16384]);
    }

    #[test]
    fn decode_mono_is_direct_copy() {
        let bytes: Vec<u8> = [0i16, 16384, -16384]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let channels = decode_pcm(&bytes, 1).unwrap();
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0], vec![0.0, 0.5, -0.5]);
    }

    #[test]
    fn decode_deinterleaves_stereo() {
        let bytes: Vec<u8> = [100i16, -100, 200, -200]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let channels = decode_pcm(&bytes, 2).unwrap();
        assert_eq!(channels[0].len(), 2);
        assert_eq!(channels[1].len(), 2);
        assert!(channels[0][0] > 0.0 && channels[0][1] > 0.0);
        assert!(channels[1][0] < 0.0 && channels[1][1] < 0.0);
    }

    #[test]
    fn decode_rejects_odd_byte_length() {
        assert!(matches!(
            decode_pcm(&[0u8, 1, 2], 1),
            Err(AudioError::Codec(_))
        ));
    }

    #[test]
    fn base64_round_trip() {
        let samples = vec![0i16, 1, -1, 32767, -32768];
        let encoded = encode_base64(&samples);
        let bytes = decode_base64(&encoded).unwrap();
        let decoded = decode_pcm(&bytes, 1).unwrap();
        assert_eq!(decoded[0].len(), samples.len());
    }

    #[test]
    fn malformed_base64_is_a_codec_error() {
        assert!(matches!(
            decode_base64("not$valid!"),
            Err(AudioError::Codec(_))
        ));
    }

    proptest! {
        #[test]
        fn round_trip_within_quantization_error(x in -1.0f32..=1.0f32) {
            let encoded = encode_frame(&[x]);
            let bytes: Vec<u8> = encoded.iter().flat_map(|s| s.to_le_bytes()).collect();
            let decoded = decode_pcm(&bytes, 1).unwrap();
            let y = decoded[0][0];
            prop_assert!((x - y).abs() <= 1.0 / 32768.0, "x={x} y={y}");
        }
    }
}
