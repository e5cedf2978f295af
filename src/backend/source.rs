//! Media sources
//!
//! Decoding is not part of this crate; backends get their samples from a
//! [`SourceResolver`] supplied by the application. [`SignalResolver`]
//! produces synthetic signals and is enough for measurements and tests.

use crate::error::BackendError;

/// Sample format of a source: interleaved `f32`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    /// Subsamples per second
    pub fn subsamples_per_sec(&self) -> u64 {
        u64::from(self.sample_rate) * u64::from(self.channels)
    }

    pub fn ms_to_frames(&self, ms: i64) -> u64 {
        (ms.max(0) as u64) * u64::from(self.sample_rate) / 1000
    }

    pub fn frames_to_ms(&self, frames: u64) -> i64 {
        if self.sample_rate == 0 {
            return -1;
        }
        (frames * 1000 / u64::from(self.sample_rate)) as i64
    }
}

/// A decoded audio source
pub trait MediaSource: Send {
    fn format(&self) -> StreamFormat;

    /// Fill `buffer` with whole frames; returns the number of subsamples
    /// written, 0 at the end of the source
    fn read(&mut self, buffer: &mut [f32]) -> Result<usize, BackendError>;

    /// Jump to an absolute position
    fn seek(&mut self, ms: i64) -> Result<(), BackendError>;

    /// Total length, if known
    fn duration_ms(&self) -> Option<i64>;

    fn has_video(&self) -> bool {
        false
    }
}

/// Opens sources for locators
pub trait SourceResolver: Send + Sync {
    /// Open `locator`. `preferred` is the device format; sources that can
    /// produce any format should use it.
    fn open(
        &self,
        locator: &str,
        preferred: StreamFormat,
    ) -> Result<Box<dyn MediaSource>, BackendError>;
}

/// Resolves synthetic signal locators:
///
/// - `silence:<ms>`
/// - `tone:<hz>:<ms>`
/// - `video+tone:<hz>:<ms>`, a tone that reports carrying video
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalResolver;

impl SignalResolver {
    pub fn new() -> Self {
        Self
    }
}

impl SourceResolver for SignalResolver {
    fn open(
        &self,
        locator: &str,
        preferred: StreamFormat,
    ) -> Result<Box<dyn MediaSource>, BackendError> {
        let invalid = |reason: &str| BackendError::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = locator
            .split_once(':')
            .ok_or_else(|| BackendError::UnsupportedLocator(locator.to_string()))?;

        let (freq, video, ms) = match scheme {
            "silence" => (None, false, rest),
            "tone" | "video+tone" => {
                let (hz, ms) = rest.split_once(':').ok_or_else(|| invalid("expected <hz>:<ms>"))?;
                let hz: f32 = hz.parse().map_err(|_| invalid("bad frequency"))?;
                if hz.is_nan() || hz <= 0.0 {
                    return Err(invalid("frequency must be positive"));
                }
                (Some(hz), scheme == "video+tone", ms)
            }
            _ => return Err(BackendError::UnsupportedLocator(locator.to_string())),
        };

        let ms: i64 = ms.parse().map_err(|_| invalid("bad duration"))?;
        if ms < 0 {
            return Err(invalid("negative duration"));
        }
        if preferred.sample_rate == 0 || preferred.channels == 0 {
            return Err(BackendError::UnsupportedFormat(format!("{:?}", preferred)));
        }

        Ok(Box::new(SignalSource::new(preferred, ms, freq, video)))
    }
}

/// Amplitude of generated tones
const TONE_AMPLITUDE: f32 = 0.25;

/// Synthetic source: silence or a sine tone of fixed length
#[derive(Debug)]
pub struct SignalSource {
    format: StreamFormat,
    total_frames: u64,
    pos: u64,
    freq: Option<f32>,
    video: bool,
}

impl SignalSource {
    pub fn new(format: StreamFormat, ms: i64, freq: Option<f32>, video: bool) -> Self {
        Self {
            format,
            total_frames: format.ms_to_frames(ms),
            pos: 0,
            freq,
            video,
        }
    }
}

impl MediaSource for SignalSource {
    fn format(&self) -> StreamFormat {
        self.format
    }

    fn read(&mut self, buffer: &mut [f32]) -> Result<usize, BackendError> {
        let channels = self.format.channels as usize;
        let frames = ((buffer.len() / channels) as u64).min(self.total_frames - self.pos);
        let rate = self.format.sample_rate as f64;

        for (i, frame) in buffer
            .chunks_exact_mut(channels)
            .take(frames as usize)
            .enumerate()
        {
            let value = match self.freq {
                Some(hz) => {
                    let t = (self.pos + i as u64) as f64 / rate;
                    (2.0 * std::f64::consts::PI * f64::from(hz) * t).sin() as f32 * TONE_AMPLITUDE
                }
                None => 0.0,
            };
            frame.fill(value);
        }

        self.pos += frames;
        Ok(frames as usize * channels)
    }

    fn seek(&mut self, ms: i64) -> Result<(), BackendError> {
        self.pos = self.format.ms_to_frames(ms).min(self.total_frames);
        Ok(())
    }

    fn duration_ms(&self) -> Option<i64> {
        Some(self.format.frames_to_ms(self.total_frames))
    }

    fn has_video(&self) -> bool {
        self.video
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FORMAT: StreamFormat = StreamFormat {
        sample_rate: 1000,
        channels: 2,
    };

    #[test]
    fn test_parse_locators() {
        let resolver = SignalResolver::new();

        let silence = resolver.open("silence:250", FORMAT).unwrap();
        assert_eq!(silence.duration_ms(), Some(250));
        assert!(!silence.has_video());

        let video = resolver.open("video+tone:440:100", FORMAT).unwrap();
        assert!(video.has_video());

        assert!(matches!(
            resolver.open("file:///song.mp3", FORMAT),
            Err(BackendError::UnsupportedLocator(_))
        ));
        assert!(matches!(
            resolver.open("tone:abc:100", FORMAT),
            Err(BackendError::InvalidLocator { .. })
        ));
        assert!(matches!(
            resolver.open("tone:440", FORMAT),
            Err(BackendError::InvalidLocator { .. })
        ));
        assert!(matches!(
            resolver.open("nothing", FORMAT),
            Err(BackendError::UnsupportedLocator(_))
        ));
    }

    #[test]
    fn test_read_to_end() {
        let mut source = SignalResolver.open("tone:100:10", FORMAT).unwrap();
        let mut buffer = vec![0.0f32; 16];

        assert_eq!(source.read(&mut buffer).unwrap(), 16);
        assert_eq!(source.read(&mut buffer).unwrap(), 4);
        assert_eq!(source.read(&mut buffer).unwrap(), 0);

        source.seek(5).unwrap();
        assert_eq!(source.read(&mut buffer).unwrap(), 10);
    }

    #[test]
    fn test_tone_amplitude() {
        let mut source = SignalResolver.open("tone:250:1000", FORMAT).unwrap();
        let mut buffer = vec![0.0f32; 2000];
        source.read(&mut buffer).unwrap();
        let peak = buffer.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!((peak - TONE_AMPLITUDE).abs() < 1e-3);
        // both channels carry the same signal
        assert!(buffer.chunks_exact(2).all(|f| f[0] == f[1]));
    }
}
