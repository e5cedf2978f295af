//! Peaking biquad filters for the graphic equalizer

use super::param::EQ_BANDS;

/// Center frequency of each band in Hz
pub const BAND_FREQUENCIES: [f32; EQ_BANDS] = [
    55.0, 77.0, 110.0, 156.0, 220.0, 311.0, 440.0, 622.0, 880.0, 1200.0, 1800.0, 2500.0, 3500.0,
    5000.0, 7000.0, 10000.0, 14000.0, 20000.0,
];

/// Bands are half an octave apart
const BAND_Q: f32 = 2.0;

/// Biquad filter coefficients, normalized so a0 == 1
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    /// Peaking EQ coefficients.
    ///
    /// At 0 dB the numerator equals the denominator, so the filter passes the
    /// signal through unchanged.
    pub fn peaking(freq: f32, gain_db: f32, q: f32, sample_rate: f32) -> Self {
        let a = 10.0_f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sample_rate;
        let cos_w0 = w0.cos();
        let sin_w0 = w0.sin();
        let alpha = sin_w0 / (2.0 * q);

        let a0 = 1.0 + alpha / a;
        Self {
            b0: (1.0 + alpha * a) / a0,
            b1: (-2.0 * cos_w0) / a0,
            b2: (1.0 - alpha * a) / a0,
            a1: (-2.0 * cos_w0) / a0,
            a2: (1.0 - alpha / a) / a0,
        }
    }
}

/// One biquad section with its own history (direct form I)
#[derive(Debug, Clone, Copy)]
pub struct Biquad {
    coeffs: BiquadCoeffs,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn new(coeffs: BiquadCoeffs) -> Self {
        Self {
            coeffs,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    /// Filter a mono buffer in place
    pub fn process(&mut self, samples: &mut [f32]) {
        let c = self.coeffs;
        for sample in samples.iter_mut() {
            let input = *sample;
            let out = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;
            self.x2 = self.x1;
            self.x1 = input;
            self.y2 = self.y1;
            self.y1 = out;
            *sample = out;
        }
    }
}

/// The filter chain of one channel: one section per band that is not at 0 dB
#[derive(Debug, Clone, Default)]
pub struct BandChain {
    sections: Vec<Biquad>,
}

impl BandChain {
    pub fn new(bands_db: &[f32; EQ_BANDS], sample_rate: u32) -> Self {
        let rate = sample_rate as f32;
        let nyquist = rate / 2.0;

        let sections = BAND_FREQUENCIES
            .iter()
            .zip(bands_db.iter())
            .filter(|(&freq, &db)| db != 0.0 && freq < nyquist * 0.95)
            .map(|(&freq, &db)| Biquad::new(BiquadCoeffs::peaking(freq, db, BAND_Q, rate)))
            .collect();

        Self { sections }
    }

    pub fn is_identity(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for section in &mut self.sections {
            section.process(samples);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_db_peaking_is_identity() {
        let mut biquad = Biquad::new(BiquadCoeffs::peaking(1000.0, 0.0, BAND_Q, 44100.0));
        let input: Vec<f32> = (0..256).map(|i| ((i as f32) * 0.37).sin()).collect();
        let mut output = input.clone();
        biquad.process(&mut output);
        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_boost_raises_band_level() {
        let rate = 44100.0;
        let mut biquad = Biquad::new(BiquadCoeffs::peaking(1000.0, 12.0, BAND_Q, rate));
        let mut tone: Vec<f32> = (0..8820)
            .map(|i| (2.0 * std::f32::consts::PI * 1000.0 * i as f32 / rate).sin() * 0.1)
            .collect();
        biquad.process(&mut tone);

        // skip the transient, then the peak should be close to 0.1 * 4
        let peak = tone[4410..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak > 0.35 && peak < 0.45, "peak {}", peak);
    }

    #[test]
    fn test_chain_skips_flat_and_unreachable_bands() {
        let mut bands = [0.0; EQ_BANDS];
        assert!(BandChain::new(&bands, 44100).is_identity());

        bands[17] = 6.0; // 20 kHz
        assert!(BandChain::new(&bands, 22050).is_identity());
        assert!(!BandChain::new(&bands, 48000).is_identity());
    }
}
