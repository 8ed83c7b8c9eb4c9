//! 16-bit PCM helpers shared by the local providers.

/// Convert f32 samples in [-1.0, 1.0] to mono 16-bit little-endian PCM.
pub fn samples_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::<u8>::with_capacity(samples.len() * 2);
    for &s in samples {
        let clamped = s.clamp(-1.0, 1.0);
        out.extend_from_slice(&((clamped * i16::MAX as f32) as i16).to_le_bytes());
    }
    out
}

/// Mono 16-bit PCM silence lasting `duration_ms`.
pub fn silence_pcm16(duration_ms: u64, sample_rate: u32) -> Vec<u8> {
    let samples = duration_ms * sample_rate as u64 / 1000;
    vec![0u8; samples as usize * 2]
}
