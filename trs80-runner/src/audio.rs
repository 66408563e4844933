//! Host audio output.
//!
//! A cpal stream pulls from a ring buffer the frame loop pushes into. The
//! ring holds at most four frames (~67 ms); pushing beyond that drops the
//! excess, bounding latency without stalling emulation.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapRb,
};

use machine_trs80::audio::SAMPLE_RATE;

/// Samples per 60 Hz frame.
const SAMPLES_PER_FRAME: usize = (SAMPLE_RATE as usize) / 60;

/// Maximum queued audio, in frames.
const MAX_QUEUED_FRAMES: usize = 4;

pub struct AudioOutput {
    _stream: Stream,
    producer: ringbuf::HeapProd<f32>,
}

impl AudioOutput {
    /// Open the default output device. Returns None when no device is
    /// available; the emulator then runs silent.
    pub fn new() -> Option<Self> {
        let host = cpal::default_host();
        let device = host.default_output_device()?;

        let config = StreamConfig {
            channels: 1,
            sample_rate: SampleRate(SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Default,
        };

        let ring = HeapRb::<f32>::new(SAMPLES_PER_FRAME * MAX_QUEUED_FRAMES);
        let (mut producer, mut consumer) = ring.split();

        // Pre-fill half the ring with silence against startup underrun.
        for _ in 0..SAMPLES_PER_FRAME * MAX_QUEUED_FRAMES / 2 {
            let _ = producer.try_push(0.0);
        }

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for sample in data.iter_mut() {
                        *sample = consumer.try_pop().unwrap_or(0.0);
                    }
                },
                |err| eprintln!("Audio stream error: {err}"),
                None,
            )
            .ok()?;

        stream.play().ok()?;

        Some(Self {
            _stream: stream,
            producer,
        })
    }

    /// Queue a frame of samples. Anything past the ring's capacity is
    /// dropped; wall-clock pacing, not audio back-pressure, sets the speed.
    pub fn push_samples(&mut self, samples: &[i16]) {
        for &sample in samples {
            if self
                .producer
                .try_push(f32::from(sample) / 32_768.0)
                .is_err()
            {
                break;
            }
        }
    }
}
