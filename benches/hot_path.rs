// Per-buffer cost of the components running on audio threads

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use jukebox_audio::audio::{RingBuffer, VolumeCalc, VolumeFader};
use jukebox_audio::eq::{EqParam, EqSettings, Equalizer};

const FRAMES: usize = 1024;
const CHANNELS: u16 = 2;
const RATE: u32 = 44100;

fn test_signal() -> Vec<f32> {
    (0..FRAMES * CHANNELS as usize)
        .map(|i| ((i as f32) * 0.01).sin() * 0.5)
        .collect()
}

fn bench_ring_buffer(c: &mut Criterion) {
    let mut rb = RingBuffer::with_capacity(64 * 1024).unwrap();
    let chunk = vec![0x5au8; 4096];
    let mut out = vec![0u8; 4096];

    c.bench_function("ring_buffer_push_peek_remove_4k", |b| {
        b.iter(|| {
            rb.push_to_end(black_box(&chunk));
            rb.peek_from_beg(&mut out, 0);
            rb.remove_from_beg(out.len());
        })
    });
}

fn bench_fader(c: &mut Criterion) {
    let fader = VolumeFader::new();
    let mut buffer = test_signal();

    c.bench_function("fader_slide_1024_frames", |b| {
        b.iter(|| {
            fader.slide_volume(0.5, 10_000);
            fader.adjust_buffer(black_box(&mut buffer), RATE, CHANNELS);
        })
    });
}

fn bench_equalizer(c: &mut Criterion) {
    let mut param = EqParam::new();
    for (i, band) in param.bands.iter_mut().enumerate() {
        *band = if i % 2 == 0 { 6.0 } else { -6.0 };
    }
    let mut eq = Equalizer::with_settings(EqSettings::new(true, param));
    let mut buffer = test_signal();

    c.bench_function("equalizer_18_bands_1024_frames", |b| {
        b.iter(|| eq.adjust_buffer(black_box(&mut buffer), RATE, CHANNELS))
    });
}

fn bench_volcalc(c: &mut Criterion) {
    let mut calc = VolumeCalc::new();
    let mut buffer = test_signal();

    c.bench_function("volcalc_add_adjust_1024_frames", |b| {
        b.iter(|| {
            calc.add_buffer(black_box(&buffer), RATE, CHANNELS);
            calc.adjust_buffer(&mut buffer, 1.0, 5.0);
        })
    });
}

criterion_group!(
    benches,
    bench_ring_buffer,
    bench_fader,
    bench_equalizer,
    bench_volcalc
);
criterion_main!(benches);
