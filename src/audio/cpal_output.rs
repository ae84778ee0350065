//! Default output device via cpal
//!
//! The device callback pulls from a shared queue; `write` pushes and blocks
//! while more than ~100ms is queued.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{debug, error};

use super::{AudioOutput, OutputFactory};
use crate::entities::decoder::AudioError;

type Queue = Arc<Mutex<VecDeque<i16>>>;

pub struct CpalOutput {
    queue: Queue,
    high_water: usize,
    sample_rate: u32,
    channels: u16,
    _stream: Stream,
}

impl CpalOutput {
    pub fn open(sample_rate: u32, channels: u16) -> Result<Self, AudioError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| AudioError::Output("no output device".into()))?;
        let supported = device
            .default_output_config()
            .map_err(|e| AudioError::Output(e.to_string()))?;

        let config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };
        let queue: Queue = Arc::new(Mutex::new(VecDeque::new()));
        let err_fn = |e| error!("Audio stream error: {}", e);

        let stream = match supported.sample_format() {
            SampleFormat::F32 => {
                let q = Arc::clone(&queue);
                device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut q = q.lock().unwrap_or_else(|e| e.into_inner());
                        for out in data.iter_mut() {
                            *out = q.pop_front().map_or(0.0, |s| s as f32 / i16::MAX as f32);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::I16 => {
                let q = Arc::clone(&queue);
                device.build_output_stream(
                    &config,
                    move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                        let mut q = q.lock().unwrap_or_else(|e| e.into_inner());
                        for out in data.iter_mut() {
                            *out = q.pop_front().unwrap_or(0);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            SampleFormat::U16 => {
                let q = Arc::clone(&queue);
                device.build_output_stream(
                    &config,
                    move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                        let mut q = q.lock().unwrap_or_else(|e| e.into_inner());
                        for out in data.iter_mut() {
                            *out = q.pop_front().map_or(u16::MAX / 2 + 1, |s| (s as i32 + 32768) as u16);
                        }
                    },
                    err_fn,
                    None,
                )
            }
            other => return Err(AudioError::Output(format!("unsupported sample format {:?}", other))),
        }
        .map_err(|e| AudioError::Output(e.to_string()))?;

        stream.play().map_err(|e| AudioError::Output(e.to_string()))?;
        debug!("cpal output opened: {} Hz, {} ch", sample_rate, channels);

        Ok(Self {
            queue,
            high_water: (sample_rate as usize * channels as usize) / 10,
            sample_rate,
            channels,
            _stream: stream,
        })
    }

    pub fn factory() -> OutputFactory {
        Arc::new(|sr, ch| Ok(Box::new(CpalOutput::open(sr, ch)?) as Box<dyn AudioOutput>))
    }

    fn queued(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl AudioOutput for CpalOutput {
    fn write(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(samples.iter().copied());
        while self.queued() > self.high_water {
            thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }

    fn finish(&mut self) {
        let queued = self.queued();
        let budget = queued as f64 / (self.sample_rate.max(1) as f64 * self.channels.max(1) as f64);
        let deadline = Instant::now() + Duration::from_secs_f64(budget + 0.25);
        while self.queued() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(2));
        }
    }
}
