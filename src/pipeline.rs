//! Player glue between a backend and the DSP components
//!
//! Every stream gets its own [`StreamDsp`] as userdata. The `Dsp` callback
//! runs equalizer, loudness analysis, auto volume and fader in that order.
//! Video and end-of-stream notifications are forwarded to the thread owning
//! the [`Pipeline`] as [`PlayerEvent`]s.

use std::sync::Arc;

use crossbeam::atomic::AtomicCell;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;

use crate::audio::{VolumeCalc, VolumeFader};
use crate::backend::{
    Backend, BackendMsg, BackendStream, CallbackParam, DeviceState, StreamCallback, StreamId,
    Userdata,
};
use crate::config::AppConfig;
use crate::constants::{
    DEFAULT_CROSSFADE_MS, DEFAULT_DESIRED_GAIN, DEFAULT_MAIN_VOLUME, DEFAULT_MAX_GAIN,
    MUTE_RESTORE_THRESHOLD,
};
use crate::eq::{EqParam, EqSettings, Equalizer};
use crate::error::BackendError;

const EVENT_QUEUE: usize = 64;

/// Notification for the owner of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    VideoDetected(StreamId),
    EndOfStream(StreamId),
}

/// Auto volume settings read by every `Dsp` callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoVolume {
    pub enabled: bool,
    pub desired_gain: f32,
    pub max_gain: f32,
    /// Prefer the album gain over the track gain when both are stored
    pub use_album_vol: bool,
}

impl Default for AutoVolume {
    fn default() -> Self {
        Self {
            enabled: true,
            desired_gain: DEFAULT_DESIRED_GAIN,
            max_gain: DEFAULT_MAX_GAIN,
            use_album_vol: false,
        }
    }
}

/// How a stream should start
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlayOptions {
    /// Seek position in milliseconds
    pub seek_ms: i64,
    /// Stored gain of the track, `<= 0` if unknown
    pub precalculated_gain: f32,
    /// Stored gain of the album, `<= 0` if unknown
    pub album_gain: f32,
    /// Fade in from silence; 0 starts at full volume
    pub fade_in_ms: u64,
}

impl PlayOptions {
    /// Stored gain to limit the auto volume with
    pub fn stored_gain(&self, use_album_vol: bool) -> f32 {
        if use_album_vol && self.album_gain > 0.0 {
            self.album_gain
        } else {
            self.precalculated_gain
        }
    }
}

/// Per-stream state living in the stream's userdata
struct StreamDsp {
    volcalc: VolumeCalc,
    fader: Arc<VolumeFader>,
    equalizer: Equalizer,
    precalculated_gain: f32,
    fade_in_ms: u64,
    calculated_gain: Arc<AtomicCell<f32>>,
}

impl StreamDsp {
    fn on_create(&mut self) {
        self.volcalc.set_precalculated_gain(self.precalculated_gain);
        if self.fade_in_ms > 0 {
            self.fader.set_volume(0.0);
            self.fader.slide_volume(1.0, self.fade_in_ms);
        }
    }

    fn process(&mut self, buffer: &mut [f32], sample_rate: u32, channels: u16, autovol: AutoVolume) {
        self.equalizer.adjust_buffer(buffer, sample_rate, channels);

        self.volcalc.add_buffer(buffer, sample_rate, channels);
        if autovol.enabled {
            self.volcalc
                .adjust_buffer(buffer, autovol.desired_gain, autovol.max_gain);
        }
        self.calculated_gain.store(self.volcalc.gain());

        self.fader.adjust_buffer(buffer, sample_rate, channels);
    }
}

fn dsp_callback(autovol: Arc<AtomicCell<AutoVolume>>, events: Sender<PlayerEvent>) -> StreamCallback {
    Box::new(move |param: &mut CallbackParam<'_>| {
        let CallbackParam {
            msg,
            sample_rate,
            channels,
            stream,
            userdata,
            ..
        } = param;

        let event = match msg {
            BackendMsg::VideoDetected => Some(PlayerEvent::VideoDetected(*stream)),
            BackendMsg::EndOfStream => Some(PlayerEvent::EndOfStream(*stream)),
            _ => None,
        };
        if let Some(event) = event {
            if let Err(TrySendError::Full(_)) = events.try_send(event) {
                tracing::warn!("Player event queue full, dropping {:?}", event);
            }
            return;
        }

        let Some(dsp) = userdata
            .as_deref_mut()
            .and_then(|data| data.downcast_mut::<StreamDsp>())
        else {
            return;
        };

        match msg {
            BackendMsg::Create => dsp.on_create(),
            BackendMsg::Dsp { buffer } => dsp.process(buffer, *sample_rate, *channels, autovol.load()),
            _ => {}
        }
    })
}

/// A stream started by the pipeline
pub struct PlayingStream {
    stream: BackendStream,
    fader: Arc<VolumeFader>,
    calculated_gain: Arc<AtomicCell<f32>>,
}

impl PlayingStream {
    pub fn id(&self) -> StreamId {
        self.stream.id()
    }

    pub fn stream(&self) -> &BackendStream {
        &self.stream
    }

    /// Fader of this stream, for crossfades and fade-outs
    pub fn fader(&self) -> &Arc<VolumeFader> {
        &self.fader
    }

    /// Gain found by the loudness analysis so far
    pub fn calculated_gain(&self) -> f32 {
        self.calculated_gain.load()
    }

    /// `(total_ms, elapsed_ms)`; -1 means unknown
    pub fn time(&self) -> (i64, i64) {
        self.stream.time()
    }

    pub fn has_ended(&self) -> bool {
        self.stream.has_ended()
    }

    pub fn fade_out(&self, ms: u64) {
        self.fader.slide_volume(0.0, ms);
    }

    pub fn destroy(self) {
        self.stream.destroy();
    }
}

#[derive(Debug, Clone, Copy)]
struct MainVolume {
    volume: u8,
    muted: bool,
    backup: u8,
}

/// Plays streams on one backend with shared volume and EQ settings
pub struct Pipeline {
    backend: Arc<dyn Backend>,
    eq: EqSettings,
    autovol: Arc<AtomicCell<AutoVolume>>,
    volume: Mutex<MainVolume>,
    crossfade_ms: AtomicCell<u64>,
    event_tx: Sender<PlayerEvent>,
    event_rx: Receiver<PlayerEvent>,
}

impl Pipeline {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let (event_tx, event_rx) = bounded(EVENT_QUEUE);
        Self {
            backend,
            eq: EqSettings::default(),
            autovol: Arc::new(AtomicCell::new(AutoVolume::default())),
            volume: Mutex::new(MainVolume {
                volume: DEFAULT_MAIN_VOLUME,
                muted: false,
                backup: DEFAULT_MAIN_VOLUME,
            }),
            crossfade_ms: AtomicCell::new(DEFAULT_CROSSFADE_MS),
            event_tx,
            event_rx,
        }
    }

    /// Pipeline with volume, auto volume and EQ taken from `config`
    pub fn with_config(backend: Arc<dyn Backend>, config: &AppConfig) -> Self {
        let pipeline = Self::new(backend);
        pipeline.set_auto_volume(AutoVolume {
            enabled: config.autovol.enabled,
            desired_gain: config.autovol.desired_gain(),
            max_gain: config.autovol.max_gain(),
            use_album_vol: config.autovol.use_album_vol,
        });
        pipeline.set_crossfade_ms(config.playback.crossfade_ms);
        pipeline.set_equalizer(config.equalizer.enabled, config.equalizer.param());
        pipeline.set_main_volume(config.playback.main_volume);
        pipeline
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Receiver for video and end-of-stream notifications
    pub fn events(&self) -> Receiver<PlayerEvent> {
        self.event_rx.clone()
    }

    /// Start `locator` on the backend
    pub fn play(&self, locator: &str, options: PlayOptions) -> Result<PlayingStream, BackendError> {
        let fader = Arc::new(VolumeFader::new());
        let calculated_gain = Arc::new(AtomicCell::new(1.0f32));

        let dsp = StreamDsp {
            volcalc: VolumeCalc::new(),
            fader: fader.clone(),
            equalizer: Equalizer::with_settings(self.eq.clone()),
            precalculated_gain: options.stored_gain(self.autovol.load().use_album_vol),
            fade_in_ms: options.fade_in_ms,
            calculated_gain: calculated_gain.clone(),
        };
        let userdata: Userdata = Box::new(dsp);

        let stream = self.backend.create_stream(
            locator,
            options.seek_ms,
            dsp_callback(self.autovol.clone(), self.event_tx.clone()),
            Some(userdata),
        )?;

        // the device may have been opened just now
        self.apply_volume();

        tracing::info!("Playing {} as stream {}", locator, stream.id());
        Ok(PlayingStream {
            stream,
            fader,
            calculated_gain,
        })
    }

    /// Fade `current` out and start `locator` fading in over the crossfade time
    pub fn crossfade_to(
        &self,
        current: &PlayingStream,
        locator: &str,
        options: PlayOptions,
    ) -> Result<PlayingStream, BackendError> {
        let ms = self.crossfade_ms();
        let next = self.play(
            locator,
            PlayOptions {
                fade_in_ms: ms,
                ..options
            },
        )?;
        current.fade_out(ms);
        Ok(next)
    }

    pub fn crossfade_ms(&self) -> u64 {
        self.crossfade_ms.load()
    }

    pub fn set_crossfade_ms(&self, ms: u64) {
        self.crossfade_ms.store(ms);
    }

    /// Main volume, 0..=255
    pub fn main_volume(&self) -> u8 {
        self.volume.lock().volume
    }

    pub fn set_main_volume(&self, volume: u8) {
        {
            let mut state = self.volume.lock();
            state.volume = volume;
            state.muted = false;
        }
        self.apply_volume();
    }

    pub fn is_muted(&self) -> bool {
        self.volume.lock().muted
    }

    pub fn mute(&self) {
        {
            let mut state = self.volume.lock();
            if state.muted {
                return;
            }
            state.backup = state.volume;
            state.volume = 0;
            state.muted = true;
        }
        self.apply_volume();
    }

    /// Restore the volume from before muting, or the default if that was
    /// (almost) silent
    pub fn unmute(&self) {
        {
            let mut state = self.volume.lock();
            if !state.muted {
                return;
            }
            state.volume = if state.backup > MUTE_RESTORE_THRESHOLD {
                state.backup
            } else {
                DEFAULT_MAIN_VOLUME
            };
            state.muted = false;
        }
        self.apply_volume();
    }

    fn apply_volume(&self) {
        if self.backend.device_state() == DeviceState::Closed {
            return;
        }
        let volume = self.volume.lock().volume;
        self.backend.set_device_vol(f32::from(volume) / 255.0);
    }

    pub fn auto_volume(&self) -> AutoVolume {
        self.autovol.load()
    }

    /// Takes effect with the next buffer of every stream
    pub fn set_auto_volume(&self, autovol: AutoVolume) {
        self.autovol.store(autovol);
    }

    pub fn equalizer(&self) -> &EqSettings {
        &self.eq
    }

    /// Takes effect with the next buffer of every stream
    pub fn set_equalizer(&self, enabled: bool, param: EqParam) {
        self.eq.set_param(enabled, param);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{NullBackend, SignalResolver};
    use crate::config::BackendConfig;
    use std::time::Duration;

    fn pipeline() -> (Arc<NullBackend>, Pipeline) {
        let null = Arc::new(NullBackend::new(
            &BackendConfig::null(),
            Arc::new(SignalResolver::new()),
        ));
        let backend: Arc<dyn Backend> = null.clone();
        (null, Pipeline::new(backend))
    }

    fn wait_event(rx: &Receiver<PlayerEvent>) -> PlayerEvent {
        rx.recv_timeout(Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn test_end_of_stream_event_and_gain() {
        let (_null, pipeline) = pipeline();
        let events = pipeline.events();

        let stream = pipeline.play("tone:440:1500", PlayOptions::default()).unwrap();
        assert_eq!(wait_event(&events), PlayerEvent::EndOfStream(stream.id()));

        // stereo sine at 0.25 peak: 0.177 RMS per channel, 0.125 after
        // normalising by the channel count
        let gain = stream.calculated_gain();
        assert!((gain - 2.0).abs() < 0.05, "gain {}", gain);
    }

    #[test]
    fn test_video_event_before_end() {
        let (_null, pipeline) = pipeline();
        let events = pipeline.events();

        let stream = pipeline.play("video+tone:440:100", PlayOptions::default()).unwrap();
        assert_eq!(wait_event(&events), PlayerEvent::VideoDetected(stream.id()));
        assert_eq!(wait_event(&events), PlayerEvent::EndOfStream(stream.id()));
    }

    #[test]
    fn test_fade_in_starts_slide() {
        let (_null, pipeline) = pipeline();
        let options = PlayOptions {
            fade_in_ms: 60_000,
            ..PlayOptions::default()
        };

        let stream = pipeline.play("silence:100", options).unwrap();
        assert_eq!(stream.fader().destination_gain(), 1.0);
        assert!(stream.fader().is_sliding());

        stream.fade_out(10);
        assert_eq!(stream.fader().destination_gain(), 0.0);
    }

    #[test]
    fn test_crossfade_from_config() {
        let null = Arc::new(NullBackend::new(
            &BackendConfig::null(),
            Arc::new(SignalResolver::new()),
        ));
        let mut config = AppConfig::default();
        config.playback.crossfade_ms = 45_000;
        config.autovol.use_album_vol = true;
        let pipeline = Pipeline::with_config(null, &config);
        assert_eq!(pipeline.crossfade_ms(), 45_000);
        assert!(pipeline.auto_volume().use_album_vol);

        let first = pipeline.play("silence:100", PlayOptions::default()).unwrap();
        let second = pipeline
            .crossfade_to(&first, "silence:100", PlayOptions::default())
            .unwrap();

        assert_eq!(first.fader().destination_gain(), 0.0);
        assert!(first.fader().is_sliding());
        assert_eq!(second.fader().destination_gain(), 1.0);
        assert!(second.fader().is_sliding());
    }

    #[test]
    fn test_stored_gain_selection() {
        let options = PlayOptions {
            precalculated_gain: 1.5,
            album_gain: 1.2,
            ..PlayOptions::default()
        };
        assert_eq!(options.stored_gain(false), 1.5);
        assert_eq!(options.stored_gain(true), 1.2);

        let no_album = PlayOptions {
            precalculated_gain: 1.5,
            ..PlayOptions::default()
        };
        assert_eq!(no_album.stored_gain(true), 1.5);
    }

    #[test]
    fn test_main_volume_reaches_open_device() {
        let (null, pipeline) = pipeline();

        // device closed, nothing is forwarded
        pipeline.set_main_volume(128);
        assert_eq!(null.device_vol(), 1.0);

        let stream = pipeline.play("silence:100000", PlayOptions::default()).unwrap();
        assert!((null.device_vol() - 128.0 / 255.0).abs() < 1e-6);

        pipeline.set_main_volume(255);
        assert_eq!(null.device_vol(), 1.0);
        drop(stream);
    }

    #[test]
    fn test_mute_and_unmute() {
        let (null, pipeline) = pipeline();
        let _stream = pipeline.play("silence:100000", PlayOptions::default()).unwrap();

        pipeline.set_main_volume(100);
        pipeline.mute();
        assert!(pipeline.is_muted());
        assert_eq!(pipeline.main_volume(), 0);
        assert_eq!(null.device_vol(), 0.0);

        pipeline.unmute();
        assert_eq!(pipeline.main_volume(), 100);

        // nearly silent before muting: back to the default
        pipeline.set_main_volume(5);
        pipeline.mute();
        pipeline.unmute();
        assert_eq!(pipeline.main_volume(), DEFAULT_MAIN_VOLUME);
    }

    #[test]
    fn test_failed_play_leaves_device_closed() {
        let (null, pipeline) = pipeline();
        assert!(pipeline.play("nosuchscheme:1", PlayOptions::default()).is_err());
        assert_eq!(null.device_state(), DeviceState::Closed);
    }
}
