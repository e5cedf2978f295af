//! Gain conversions and small sample-buffer helpers

/// Convert decibels to a linear gain.
///
/// 12 dB and 14 dB map to exactly 4.0 and 5.0; stored settings rely on that.
pub fn db_to_gain(db: f64) -> f64 {
    if db == 14.0 {
        5.0
    } else if db == 12.0 {
        4.0
    } else {
        10f64.powf(db / 20.0)
    }
}

/// Convert a linear gain to decibels; non-positive gains map to 0 dB
pub fn gain_to_db(gain: f64) -> f64 {
    if gain == 5.0 {
        14.0
    } else if gain > 0.0 {
        20.0 * gain.log10()
    } else {
        0.0
    }
}

/// Gain as integer thousandths, for config storage
pub fn gain_to_long(gain: f64) -> i64 {
    if gain > 0.0 {
        (gain * 1000.0) as i64
    } else {
        0
    }
}

pub fn long_to_gain(value: i64) -> f64 {
    value as f64 / 1000.0
}

/// Multiply every subsample by `gain`
pub fn apply_volume(buffer: &mut [f32], gain: f32) {
    for sample in buffer.iter_mut() {
        *sample *= gain;
    }
}

/// Fold an interleaved buffer of `channels` channels down to `dest_channels`.
///
/// Source channel `c` is added to destination channel `c % dest_channels`,
/// then each destination channel is divided by the number of sources folded
/// into it. The result is written to the front of `buffer`; returns the number
/// of subsamples now valid.
pub fn mixdown_channels(buffer: &mut [f32], channels: usize, dest_channels: usize) -> usize {
    if channels == 0 || dest_channels == 0 || dest_channels >= channels {
        return buffer.len();
    }

    let frames = buffer.len() / channels;
    let mut sums = [0f32; crate::constants::MAX_CHANNELS];
    let mut counts = [0usize; crate::constants::MAX_CHANNELS];
    let dest_channels = dest_channels.min(crate::constants::MAX_CHANNELS);

    for c in 0..channels {
        counts[c % dest_channels] += 1;
    }

    for frame in 0..frames {
        sums[..dest_channels].fill(0.0);
        let src = &buffer[frame * channels..(frame + 1) * channels];
        for (c, sample) in src.iter().enumerate() {
            sums[c % dest_channels] += sample;
        }
        for d in 0..dest_channels {
            // frame * dest_channels + d <= frame * channels + d, so reads stay ahead of writes
            buffer[frame * dest_channels + d] = sums[d] / counts[d] as f32;
        }
    }

    frames * dest_channels
}

/// Count silent subsamples at the start (or end) of an interleaved buffer.
///
/// Silence is any whole frame whose subsamples all stay within
/// `threshold`. The count is always a multiple of `channels`.
pub fn silent_subsamples(buffer: &[f32], channels: usize, from_end: bool, threshold: f32) -> usize {
    if channels == 0 {
        return 0;
    }

    let is_silent = |frame: &[f32]| frame.iter().all(|s| s.abs() <= threshold);
    let frames = buffer.chunks_exact(channels);

    let silent = if from_end {
        frames.rev().take_while(|f| is_silent(f)).count()
    } else {
        frames.take_while(|f| is_silent(f)).count()
    };

    silent * channels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_gain_conversions() {
        assert_eq!(db_to_gain(12.0), 4.0);
        assert_eq!(db_to_gain(14.0), 5.0);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 0.001);
        assert_eq!(gain_to_db(5.0), 14.0);
        assert_eq!(gain_to_db(0.0), 0.0);
        assert!((gain_to_db(0.5) + 6.02).abs() < 0.01);
    }

    #[test]
    fn test_long_gain() {
        assert_eq!(gain_to_long(1.25), 1250);
        assert_eq!(gain_to_long(-1.0), 0);
        assert_eq!(long_to_gain(500), 0.5);
    }

    #[test]
    fn test_mixdown_stereo_to_mono() {
        let mut buffer = vec![1.0, 0.0, 0.5, 0.5, -1.0, 1.0];
        let len = mixdown_channels(&mut buffer, 2, 1);
        assert_eq!(len, 3);
        assert_eq!(&buffer[..3], &[0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_mixdown_quad_to_stereo() {
        let mut buffer = vec![1.0, 0.0, 1.0, 0.0, 0.2, 0.4, 0.0, 0.0];
        let len = mixdown_channels(&mut buffer, 4, 2);
        assert_eq!(len, 4);
        assert_eq!(&buffer[..4], &[1.0, 0.0, 0.1, 0.2]);
    }

    #[test]
    fn test_silent_subsamples() {
        let buffer = [0.0, 0.001, 0.0, 0.0, 0.5, 0.0, 0.0, 0.0];
        assert_eq!(silent_subsamples(&buffer, 2, false, 0.01), 4);
        assert_eq!(silent_subsamples(&buffer, 2, true, 0.01), 2);
        assert_eq!(silent_subsamples(&[0.0; 6], 2, true, 0.0), 6);
    }
}
