//! Sample-accurate volume fader
//!
//! Slides are specified in milliseconds but executed in subsamples (one
//! `f32` of one channel). The subsample count depends on the stream format,
//! which is only known once audio flows, so it is computed on the first
//! [`VolumeFader::adjust_buffer`] call after a slide was requested.

use parking_lot::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
enum SlideLength {
    /// Format not known yet; computed on the next buffer
    Pending { ms: u64 },
    Subsamples(u64),
}

#[derive(Debug, Clone, Copy)]
struct Slide {
    length: SlideLength,
    /// Subsamples already processed
    pos: u64,
}

#[derive(Debug)]
struct FadeState {
    start_gain: f32,
    dest_gain: f32,
    slide: Option<Slide>,
}

/// Linear gain ramp applied to interleaved `f32` buffers
#[derive(Debug)]
pub struct VolumeFader {
    state: Mutex<FadeState>,
}

impl VolumeFader {
    /// Create a fader at unity gain
    pub fn new() -> Self {
        Self::with_gain(1.0)
    }

    pub fn with_gain(gain: f32) -> Self {
        Self {
            state: Mutex::new(FadeState {
                start_gain: gain,
                dest_gain: gain,
                slide: None,
            }),
        }
    }

    /// Set the gain immediately, cancelling any slide
    pub fn set_volume(&self, gain: f32) {
        let mut state = self.state.lock();
        state.start_gain = gain;
        state.dest_gain = gain;
        state.slide = None;
    }

    /// Slide from the current destination gain to `gain` over `ms` milliseconds
    pub fn slide_volume(&self, gain: f32, ms: u64) {
        let mut state = self.state.lock();
        state.start_gain = state.dest_gain;
        state.dest_gain = gain;
        state.slide = Some(Slide {
            length: SlideLength::Pending { ms },
            pos: 0,
        });
    }

    /// Gain the fader settles at once any slide is done
    pub fn destination_gain(&self) -> f32 {
        self.state.lock().dest_gain
    }

    pub fn is_sliding(&self) -> bool {
        self.state.lock().slide.is_some()
    }

    /// Apply the fader to an interleaved buffer.
    ///
    /// Returns `true` if a slide was in progress for this buffer.
    pub fn adjust_buffer(&self, buffer: &mut [f32], sample_rate: u32, channels: u16) -> bool {
        let mut rest = buffer;
        let mut slid = false;

        let gain = {
            let mut state = self.state.lock();

            if let Some(mut slide) = state.slide {
                slid = true;

                let total = match slide.length {
                    SlideLength::Pending { ms } => {
                        let total = ms * u64::from(channels) * u64::from(sample_rate) / 1000;
                        slide.length = SlideLength::Subsamples(total);
                        total
                    }
                    SlideLength::Subsamples(total) => total,
                };

                let now = (total.saturating_sub(slide.pos)).min(rest.len() as u64) as usize;
                let start_gain = state.start_gain;
                let gain_diff = state.dest_gain - state.start_gain;
                let total_f = total as f32;

                let (sliding, flat) = std::mem::take(&mut rest).split_at_mut(now);
                for (i, sample) in sliding.iter_mut().enumerate() {
                    let slider_pos = (slide.pos + i as u64 + 1) as f32 / total_f;
                    *sample *= start_gain + gain_diff * slider_pos;
                }
                rest = flat;

                slide.pos += now as u64;
                state.slide = (slide.pos < total).then_some(slide);
            }

            state.dest_gain
        };

        // bulk multiply without holding the lock
        if gain != 1.0 {
            for sample in rest.iter_mut() {
                *sample *= gain;
            }
        }

        slid
    }
}

impl Default for VolumeFader {
    fn default() -> Self {
        Self::new()
    }
}
