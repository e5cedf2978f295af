//! Loudness analysis for automatic volume
//!
//! Every 1/100 second the RMS level of each channel is recorded; once 100 of
//! these slices are collected their mean is compared against the loudest mean
//! seen so far, and the gain is derived from that maximum. Before the first
//! full second an estimate from the slices collected so far is used.

use crate::constants::MAX_CHANNELS;

/// Target RMS level; stored gains were computed against this value
const DEF_LEVEL: f64 = 0.25;
/// Slices per second
const SMOOTH_SIZE: usize = 100;
/// Incoming samples are clamped to this magnitude
const TOLERANCE: f64 = 1.4;
/// Gain cap for tracks without a stored gain
const MAX_UNKNOWN_GAIN: f32 = 3.1;
const MIN_GAIN: f32 = 0.5;

/// Per-stream loudness analyser
#[derive(Debug)]
pub struct VolumeCalc {
    initialized: bool,
    precalculated_gain: f32,
    gain: f64,
    max_level: f64,
    /// Subsample frames left in the current slice
    slice_frames_left: usize,
    slice_frames: usize,
    sums: [f64; MAX_CHANNELS],
    smooth: Vec<[f64; SMOOTH_SIZE]>,
    smooth_n: [usize; MAX_CHANNELS],
}

impl VolumeCalc {
    pub fn new() -> Self {
        Self {
            initialized: false,
            precalculated_gain: 0.0,
            gain: 1.0,
            max_level: -1.0,
            slice_frames_left: 0,
            slice_frames: 0,
            sums: [0.0; MAX_CHANNELS],
            smooth: Vec::new(),
            smooth_n: [0; MAX_CHANNELS],
        }
    }

    /// Use a stored gain; the applied gain will never exceed it.
    ///
    /// A value `<= 0` means no stored gain is known.
    pub fn set_precalculated_gain(&mut self, gain: f32) {
        self.precalculated_gain = gain;
    }

    fn init(&mut self, sample_rate: u32, channels: usize) {
        self.slice_frames = (sample_rate as usize / SMOOTH_SIZE).max(1);
        self.slice_frames_left = self.slice_frames;
        self.sums = [0.0; MAX_CHANNELS];
        self.smooth_n = [0; MAX_CHANNELS];
        self.smooth = vec![[0.0; SMOOTH_SIZE]; channels];
        self.initialized = true;
    }

    /// Feed an interleaved buffer into the analysis
    pub fn add_buffer(&mut self, data: &[f32], sample_rate: u32, channels: u16) {
        let channels = channels as usize;
        if channels == 0 || channels > MAX_CHANNELS || sample_rate == 0 {
            return;
        }

        // the format is not known before the first buffer
        if !self.initialized || self.smooth.len() != channels {
            self.init(sample_rate, channels);
        }

        let mut slice_done = false;
        // levels are normalised by the channel count as well
        let channel_length = 1.0 / (self.slice_frames * channels) as f64;

        for frame in data.chunks_exact(channels) {
            for (c, &sample) in frame.iter().enumerate() {
                let sample = f64::from(sample).clamp(-TOLERANCE, TOLERANCE);
                self.sums[c] += sample * sample;
            }

            self.slice_frames_left -= 1;
            if self.slice_frames_left == 0 {
                for c in 0..channels {
                    let level = (self.sums[c] * channel_length).sqrt();

                    self.smooth[c][self.smooth_n[c]] = level;
                    self.smooth_n[c] += 1;

                    if self.smooth_n[c] == SMOOTH_SIZE {
                        self.smooth_n[c] = 0;
                        let level = mean(&self.smooth[c]);
                        if level > self.max_level {
                            self.max_level = level;
                            self.gain = DEF_LEVEL / self.max_level;
                        }
                    }

                    self.sums[c] = 0.0;
                }

                self.slice_frames_left = self.slice_frames;
                slice_done = true;
            }
        }

        if self.max_level < 0.0 && slice_done {
            // estimate from the first slices
            let level = (0..channels)
                .map(|c| mean(&self.smooth[c][..self.smooth_n[c]]))
                .fold(-1.0f64, f64::max);
            if level > 0.0 {
                self.gain = DEF_LEVEL / level;
            }
        }
    }

    /// Gain to apply for the given desired volume (normally 1.0) and cap
    pub fn effective_gain(&self, desired_gain: f32, max_gain: f32) -> f32 {
        let mut gain = self.gain as f32;
        let mut max_gain = max_gain;

        if self.precalculated_gain > 0.0 {
            gain = gain.min(self.precalculated_gain);
        } else {
            // unknown tracks must not start much too loud
            max_gain = max_gain.min(MAX_UNKNOWN_GAIN);
        }

        gain *= desired_gain;
        gain.min(max_gain).max(MIN_GAIN)
    }

    /// Apply the calculated gain to a buffer
    pub fn adjust_buffer(&self, data: &mut [f32], desired_gain: f32, max_gain: f32) {
        crate::audio::wave::apply_volume(data, self.effective_gain(desired_gain, max_gain));
    }

    /// Calculated gain, without desired volume or caps applied
    pub fn gain(&self) -> f32 {
        self.gain as f32
    }

    /// True once at least one full second was analysed
    pub fn is_gain_worth_saving(&self) -> bool {
        self.max_level > 0.0
    }
}

impl Default for VolumeCalc {
    fn default() -> Self {
        Self::new()
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return -1.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
