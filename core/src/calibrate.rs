//! One-shot sensitivity calibration from a recording of the device
//!
//! Picks a threshold about halfway between the noise floor and the loudest
//! sample.

use crate::error::{LinkError, Result};
use crate::MAX_SHORT;

const NUM_BUCKETS: usize = 32;
const FLOOR_RATIO: f64 = 0.0001;

/// Compute a receive sensitivity in `[0, 1]` from raw samples. The first
/// half second is skipped since it may hold transients.
pub fn compute_sensitivity(samples: &[i16], framerate: u32) -> Result<f64> {
    let skip = framerate as usize / 2;
    if samples.len() <= skip {
        return Err(LinkError::InsufficientData);
    }
    let working = &samples[skip..];

    let max_val = working.iter().copied().max().unwrap_or(0).max(0) as usize;
    let bucket_size = max_val / NUM_BUCKETS;
    if bucket_size == 0 {
        return Err(LinkError::InsufficientData);
    }

    let mut buckets = [0usize; NUM_BUCKETS];
    for &sample in working {
        let index = (sample.max(0) as usize / bucket_size).min(NUM_BUCKETS - 1);
        buckets[index] += 1;
    }

    let mut floor_index = 0;
    for i in 0..NUM_BUCKETS - 1 {
        let ratio = (buckets[i + 1] + 1) as f64 / (buckets[i] + 1) as f64;
        if ratio < FLOOR_RATIO {
            floor_index = i;
        }
    }

    let bottom = floor_index + 1;
    let top = NUM_BUCKETS - 1;
    let half_span = (bucket_size * (top - bottom)) / 2;
    Ok(half_span as f64 / MAX_SHORT as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::PulseEncoder;
    use crate::DEFAULT_FRAMERATE;

    #[test]
    fn test_too_short() {
        let samples = vec![0i16; 100];
        assert!(matches!(
            compute_sensitivity(&samples, DEFAULT_FRAMERATE),
            Err(LinkError::InsufficientData)
        ));
    }

    #[test]
    fn test_silence_rejected() {
        let samples = vec![0i16; DEFAULT_FRAMERATE as usize];
        assert!(compute_sensitivity(&samples, DEFAULT_FRAMERATE).is_err());
    }

    #[test]
    fn test_clean_pulses() {
        // Silence lands in bucket 0 and full-scale pulses in bucket 31, so
        // the only steep drop is from bucket 0 to bucket 1.
        let mut samples = vec![0i16; DEFAULT_FRAMERATE as usize];
        let encoder = PulseEncoder::new(DEFAULT_FRAMERATE);
        samples.extend(encoder.encode_padded(&[0u8; 2000]));

        let sens = compute_sensitivity(&samples, DEFAULT_FRAMERATE).expect("Failed to calibrate");
        let bucket_size = MAX_SHORT as usize / 32;
        let expected = ((bucket_size * (31 - 1)) / 2) as f64 / MAX_SHORT as f64;
        assert_eq!(sens, expected);

        // the computed threshold still decodes the recording
        let decoded = crate::decoder::StreamDecoder::new(DEFAULT_FRAMERATE, sens)
            .decode_samples(&samples);
        assert_eq!(decoded, vec![0u8; 2000]);
    }
}
