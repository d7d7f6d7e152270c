//! Energy-based silence detection

use super::AudioFrame;

/// Default RMS threshold below which a frame counts as silent (16-bit PCM units)
pub const DEFAULT_SILENCE_THRESHOLD: f64 = 500.0;

/// Calculate RMS amplitude of PCM samples
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[i16]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let s = f64::from(s);
            s * s
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt()
}

/// Whether a frame's RMS amplitude is below `threshold`
#[must_use]
pub fn is_silent(frame: &AudioFrame, threshold: f64) -> bool {
    rms(frame.samples()) < threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rms_calculation() {
        assert!(rms(&[0; 100]) < f64::EPSILON);
        assert!((rms(&[1000; 100]) - 1000.0).abs() < 1e-9);
        assert!((rms(&[3, -3, 3, -3]) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_frame_is_silent() {
        assert!(is_silent(&AudioFrame::new(Vec::new()), DEFAULT_SILENCE_THRESHOLD));
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let frame = AudioFrame::new(vec![500; 64]);
        assert!(!is_silent(&frame, 500.0));
        assert!(is_silent(&frame, 500.5));
    }

    #[test]
    fn test_loud_frame() {
        let frame = AudioFrame::new(vec![i16::MAX, i16::MIN].repeat(640));
        assert!(!is_silent(&frame, DEFAULT_SILENCE_THRESHOLD));
    }
}
