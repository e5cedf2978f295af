//! 18-band graphic equalizer over interleaved `f32` buffers
//!
//! Settings live in [`EqSettings`], which the UI thread updates and any number
//! of [`Equalizer`] processors share. Each processor keeps its own filter
//! history and rebuilds it lazily whenever the sample rate, channel count or
//! settings version changes.

use std::sync::Arc;

use parking_lot::Mutex;

use super::filter::BandChain;
use super::param::EqParam;
use crate::constants::MAX_CHANNELS;

#[derive(Debug, Clone, Copy)]
struct Snapshot {
    enabled: bool,
    param: EqParam,
    version: u64,
}

/// Equalizer settings shared between the UI and the audio threads
#[derive(Debug, Clone)]
pub struct EqSettings {
    inner: Arc<Mutex<Snapshot>>,
}

impl EqSettings {
    pub fn new(enabled: bool, param: EqParam) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Snapshot {
                enabled,
                param,
                version: 0,
            })),
        }
    }

    /// Replace the parameters; processors pick them up on their next buffer
    pub fn set_param(&self, enabled: bool, param: EqParam) {
        let mut inner = self.inner.lock();
        if inner.enabled == enabled && inner.param == param {
            return;
        }
        inner.enabled = enabled;
        inner.param = param;
        inner.version += 1;
    }

    pub fn param(&self) -> EqParam {
        self.inner.lock().param
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    fn snapshot(&self) -> Snapshot {
        *self.inner.lock()
    }
}

impl Default for EqSettings {
    fn default() -> Self {
        Self::new(false, EqParam::default())
    }
}

/// Cache key of the built filter table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FilterKey {
    sample_rate: u32,
    channels: usize,
    version: u64,
}

/// Equalizer processor for one audio stream
#[derive(Debug)]
pub struct Equalizer {
    settings: EqSettings,
    key: Option<FilterKey>,
    active: bool,
    chains: Vec<BandChain>,
    /// Deinterlace buffer; grows, never shrinks
    scratch: Vec<f32>,
}

impl Equalizer {
    /// Create a processor with its own, disabled settings
    pub fn new() -> Self {
        Self::with_settings(EqSettings::default())
    }

    pub fn with_settings(settings: EqSettings) -> Self {
        Self {
            settings,
            key: None,
            active: false,
            chains: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn settings(&self) -> &EqSettings {
        &self.settings
    }

    pub fn set_param(&self, enabled: bool, param: EqParam) {
        self.settings.set_param(enabled, param);
    }

    /// Equalize an interleaved buffer in place.
    ///
    /// Invalid formats (no samples, zero rate, no or too many channels) are
    /// ignored.
    pub fn adjust_buffer(&mut self, buffer: &mut [f32], sample_rate: u32, channels: u16) {
        let channels = channels as usize;
        if buffer.is_empty() || sample_rate == 0 || channels == 0 || channels > MAX_CHANNELS {
            return;
        }

        let snapshot = self.settings.snapshot();
        let key = FilterKey {
            sample_rate,
            channels,
            version: snapshot.version,
        };
        if self.key != Some(key) {
            self.rebuild(&snapshot, key);
        }

        if !self.active {
            return;
        }

        let frames = buffer.len() / channels;
        if self.scratch.len() < frames {
            self.scratch.resize(frames, 0.0);
        }
        let scratch = &mut self.scratch[..frames];

        for (c, chain) in self.chains.iter_mut().enumerate() {
            for (dst, frame) in scratch.iter_mut().zip(buffer.chunks_exact(channels)) {
                *dst = frame[c];
            }
            chain.process(scratch);
            for (src, frame) in scratch.iter().zip(buffer.chunks_exact_mut(channels)) {
                frame[c] = *src;
            }
        }
    }

    fn rebuild(&mut self, snapshot: &Snapshot, key: FilterKey) {
        self.key = Some(key);
        self.active = snapshot.enabled && !snapshot.param.is_flat();
        self.chains.clear();

        if self.active {
            let chain = BandChain::new(&snapshot.param.bands, key.sample_rate);
            self.active = !chain.is_identity();
            self.chains.resize(key.channels, chain);
        }

        tracing::debug!(
            "Equalizer rebuilt for {} Hz, {} channels (active: {})",
            key.sample_rate,
            key.channels,
            self.active
        );
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eq::param::EQ_BANDS;

    fn noise(len: usize) -> Vec<f32> {
        (0..len).map(|i| ((i * 7919 % 1000) as f32 / 500.0) - 1.0).collect()
    }

    #[test]
    fn test_flat_is_identity() {
        let mut eq = Equalizer::new();
        eq.set_param(true, EqParam::new());

        let input = noise(1024);
        let mut buffer = input.clone();
        eq.adjust_buffer(&mut buffer, 44100, 2);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_near_flat_filter_stays_close() {
        let mut bands = [0.0; EQ_BANDS];
        bands[5] = 0.01;
        let mut eq = Equalizer::new();
        eq.set_param(true, EqParam::from_bands(bands));

        let input = noise(4096);
        let mut buffer = input.clone();
        eq.adjust_buffer(&mut buffer, 44100, 2);

        assert!(eq.active);
        assert_ne!(buffer, input);
        for (out, inp) in buffer.iter().zip(&input) {
            assert!((out - inp).abs() < 0.01, "{} vs {}", out, inp);
        }
    }

    #[test]
    fn test_disabled_is_identity() {
        let mut eq = Equalizer::new();
        eq.set_param(false, EqParam::from_bands([10.0; EQ_BANDS]));

        let input = noise(512);
        let mut buffer = input.clone();
        eq.adjust_buffer(&mut buffer, 48000, 2);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_invalid_formats_ignored() {
        let mut eq = Equalizer::new();
        eq.set_param(true, EqParam::from_bands([10.0; EQ_BANDS]));

        let input = noise(130);
        let mut buffer = input.clone();
        eq.adjust_buffer(&mut buffer, 0, 2);
        eq.adjust_buffer(&mut buffer, 44100, 0);
        eq.adjust_buffer(&mut buffer, 44100, 65);
        assert_eq!(buffer, input);
    }

    #[test]
    fn test_boost_changes_signal_and_channels_stay_separate() {
        let mut eq = Equalizer::new();
        let mut param = EqParam::new();
        param.bands[6] = 12.0;
        eq.set_param(true, param);

        // left carries a signal, right is silent
        let mut buffer: Vec<f32> = (0..2048)
            .flat_map(|i| [(i as f32 * 0.06).sin() * 0.2, 0.0])
            .collect();
        let original = buffer.clone();
        eq.adjust_buffer(&mut buffer, 44100, 2);

        assert!(buffer.iter().step_by(2).zip(original.iter().step_by(2)).any(|(a, b)| a != b));
        assert!(buffer.iter().skip(1).step_by(2).all(|&s| s == 0.0));
    }

    #[test]
    fn test_settings_shared_between_processors() {
        let settings = EqSettings::default();
        let mut a = Equalizer::with_settings(settings.clone());
        let mut b = Equalizer::with_settings(settings.clone());

        let mut param = EqParam::new();
        param.bands[8] = -12.0;
        settings.set_param(true, param);

        let input: Vec<f32> = (0..1024).map(|i| (i as f32 * 0.125).sin()).collect();
        let mut out_a = input.clone();
        let mut out_b = input.clone();
        a.adjust_buffer(&mut out_a, 44100, 1);
        b.adjust_buffer(&mut out_b, 44100, 1);
        assert_ne!(out_a, input);
        assert_eq!(out_a, out_b);

        settings.set_param(false, param);
        let mut again = input.clone();
        a.adjust_buffer(&mut again, 44100, 1);
        assert_eq!(again, input);
    }
}
