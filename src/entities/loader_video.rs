//! FFmpeg decode backend (feature `ffmpeg`)
//!
//! Keeps one demuxer + decoder open per stream so consecutive indices are
//! plain packet reads. Seeks go back to the nearest keyframe
//! (AVSEEK_FLAG_BACKWARD) and decode forward to the target pts.

use std::path::Path;
use std::sync::{Arc, Once};

use log::{debug, warn};
use playa_ffmpeg as ffmpeg;

use super::decoder::{AudioError, AudioTrack, DecodeService, OpenError, VideoSource};
use super::frame::Frame;
use super::stream::StreamInfo;

/// Audio is extracted at this rate, stereo s16
pub const AUDIO_SAMPLE_RATE: u32 = 44_100;

static FFMPEG_INIT: Once = Once::new();

fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        let _ = ffmpeg::init();
        unsafe {
            // AV_LOG_QUIET: decode errors are reported through our own log
            ffmpeg::ffi::av_log_set_level(ffmpeg::ffi::AV_LOG_QUIET);
        }
    });
}

fn open_input(path: &Path) -> Result<ffmpeg::format::context::Input, OpenError> {
    init_ffmpeg();
    if !path.exists() {
        return Err(OpenError::NotFound(path.display().to_string()));
    }
    ffmpeg::format::input(path).map_err(|e| OpenError::Unreadable(format!("{}: {}", path.display(), e)))
}

struct FfmpegSource {
    ictx: ffmpeg::format::context::Input,
    stream_idx: usize,
    decoder: ffmpeg::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    info: StreamInfo,
    frame_tb: ffmpeg::ffi::AVRational,
    stream_tb: ffmpeg::ffi::AVRational,
    eof: bool,
}

// SAFETY: the source is owned by exactly one DecodeAdapter, which callers
// serialize behind a mutex; no FFmpeg handle is ever shared between threads.
unsafe impl Send for FfmpegSource {}

impl FfmpegSource {
    fn open(path: &Path) -> Result<Self, OpenError> {
        let ictx = open_input(path)?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| OpenError::NoVideoStream(path.display().to_string()))?;
        let stream_idx = stream.index();
        let has_audio = ictx.streams().best(ffmpeg::media::Type::Audio).is_some();

        let fps_rational = stream.avg_frame_rate();
        let time_base = stream.time_base();
        let fps = if fps_rational.denominator() != 0 {
            fps_rational.numerator() as f64 / fps_rational.denominator() as f64
        } else {
            0.0
        };
        if fps <= 0.0 {
            return Err(OpenError::Unreadable(format!("{}: unknown frame rate", path.display())));
        }

        let frame_count = if stream.frames() > 0 {
            stream.frames() as usize
        } else {
            let duration_secs = stream.duration() as f64 * time_base.numerator() as f64
                / time_base.denominator().max(1) as f64;
            (duration_secs * fps) as usize
        };

        let mut decoder_ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| OpenError::UnsupportedCodec(e.to_string()))?;
        unsafe {
            (*decoder_ctx.as_mut_ptr()).thread_type = ffmpeg::ffi::FF_THREAD_FRAME;
            (*decoder_ctx.as_mut_ptr()).thread_count = 0;
        }
        let decoder = decoder_ctx
            .decoder()
            .video()
            .map_err(|e| OpenError::UnsupportedCodec(e.to_string()))?;

        let (width, height) = (decoder.width(), decoder.height());
        let scaler = ffmpeg::software::scaling::Context::get(
            decoder.format(),
            width,
            height,
            ffmpeg::format::Pixel::RGBA,
            width,
            height,
            ffmpeg::software::scaling::Flags::BILINEAR,
        )
        .map_err(|e| OpenError::UnsupportedCodec(format!("scaler: {}", e)))?;

        debug!(
            "Opened {}: {}x{} @ {:.3} fps, {} frames, audio={}",
            path.display(),
            width,
            height,
            fps,
            frame_count,
            has_audio
        );

        Ok(Self {
            stream_idx,
            decoder,
            scaler,
            info: StreamInfo {
                frame_rate: fps,
                frame_count,
                width: width as usize,
                height: height as usize,
                has_audio,
            },
            frame_tb: ffmpeg::ffi::AVRational {
                num: fps_rational.denominator(),
                den: fps_rational.numerator(),
            },
            stream_tb: ffmpeg::ffi::AVRational {
                num: time_base.numerator(),
                den: time_base.denominator(),
            },
            ictx,
            eof: false,
        })
    }

    /// Pull the next decoded picture, feeding packets as needed
    fn next_picture(&mut self) -> Result<ffmpeg::util::frame::video::Video, String> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return Ok(decoded);
            }
            if self.eof {
                return Err("end of stream".to_string());
            }
            match self.ictx.packets().next() {
                Some((stream, packet)) => {
                    if stream.index() == self.stream_idx {
                        self.decoder
                            .send_packet(&packet)
                            .map_err(|e| format!("send packet: {}", e))?;
                    }
                }
                None => {
                    self.eof = true;
                    let _ = self.decoder.send_eof();
                }
            }
        }
    }

    fn to_frame(&mut self, decoded: &ffmpeg::util::frame::video::Video) -> Result<Frame, String> {
        let mut rgba = ffmpeg::util::frame::video::Video::empty();
        self.scaler
            .run(decoded, &mut rgba)
            .map_err(|e| format!("scale: {}", e))?;

        let (width, height) = (self.info.width, self.info.height);
        let data = rgba.data(0);
        let stride = rgba.stride(0);
        let row_bytes = width * 4;
        let mut output = vec![0u8; row_bytes * height];
        for y in 0..height {
            let src = y * stride;
            let dst = y * row_bytes;
            output[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
        }
        Ok(Frame::from_u8_buffer(output, width, height))
    }
}

impl VideoSource for FfmpegSource {
    fn info(&self) -> StreamInfo {
        self.info.clone()
    }

    fn seek_decode(&mut self, index: usize) -> Result<Frame, String> {
        let target_ts = unsafe { ffmpeg::ffi::av_rescale_q(index as i64, self.frame_tb, self.stream_tb) };
        let ret = unsafe {
            ffmpeg::ffi::av_seek_frame(
                self.ictx.as_mut_ptr(),
                self.stream_idx as i32,
                target_ts,
                ffmpeg::ffi::AVSEEK_FLAG_BACKWARD,
            )
        };
        if ret < 0 {
            warn!("Seek to frame {} failed (ret={})", index, ret);
            return Err(format!("seek failed (ret={})", ret));
        }
        self.decoder.flush();
        self.eof = false;

        loop {
            let decoded = self.next_picture()?;
            if decoded.pts().is_none_or(|pts| pts >= target_ts) {
                return self.to_frame(&decoded);
            }
        }
    }

    fn read_next(&mut self) -> Result<Frame, String> {
        let decoded = self.next_picture()?;
        self.to_frame(&decoded)
    }
}

/// Sample frames per resampler flush call
const FLUSH_CHUNK: usize = 4096;
const MAX_FLUSH_ROUNDS: usize = 16;

/// Append a packed stereo s16 frame to `samples`
fn append_s16_stereo(frame: &ffmpeg::util::frame::audio::Audio, samples: &mut Vec<i16>) {
    let bytes = &frame.data(0)[..frame.samples() * 2 * 2];
    samples.extend(bytes.chunks_exact(2).map(|b| i16::from_ne_bytes([b[0], b[1]])));
}

/// Whole audio track decoded into memory as stereo s16 @ 44.1 kHz
pub struct FfmpegAudioTrack {
    samples: Vec<i16>,
}

impl FfmpegAudioTrack {
    fn extract(path: &Path) -> Result<Self, AudioError> {
        let mut ictx = open_input(path).map_err(|e| AudioError::Decode(e.to_string()))?;
        let stream = ictx
            .streams()
            .best(ffmpeg::media::Type::Audio)
            .ok_or(AudioError::NoTrack)?;
        let stream_idx = stream.index();
        let ctx = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| AudioError::Decode(e.to_string()))?;
        let mut decoder = ctx.decoder().audio().map_err(|e| AudioError::Decode(e.to_string()))?;
        let mut resampler = decoder
            .resampler(
                ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
                ffmpeg::ChannelLayout::STEREO,
                AUDIO_SAMPLE_RATE,
            )
            .map_err(|e| AudioError::Decode(format!("resampler: {}", e)))?;

        let mut samples = Vec::new();
        let mut decoded = ffmpeg::util::frame::audio::Audio::empty();
        let mut drain = |decoder: &mut ffmpeg::decoder::Audio, samples: &mut Vec<i16>| -> Result<(), AudioError> {
            while decoder.receive_frame(&mut decoded).is_ok() {
                let mut out = ffmpeg::util::frame::audio::Audio::empty();
                resampler
                    .run(&decoded, &mut out)
                    .map_err(|e| AudioError::Decode(format!("resample: {}", e)))?;
                append_s16_stereo(&out, samples);
            }
            Ok(())
        };

        for (stream, packet) in ictx.packets() {
            if stream.index() != stream_idx {
                continue;
            }
            decoder
                .send_packet(&packet)
                .map_err(|e| AudioError::Decode(e.to_string()))?;
            drain(&mut decoder, &mut samples)?;
        }
        let _ = decoder.send_eof();
        drain(&mut decoder, &mut samples)?;

        // swr holds back a few ms of delayed output until flushed
        for _ in 0..MAX_FLUSH_ROUNDS {
            let mut out = ffmpeg::util::frame::audio::Audio::new(
                ffmpeg::format::Sample::I16(ffmpeg::format::sample::Type::Packed),
                FLUSH_CHUNK,
                ffmpeg::ChannelLayout::STEREO,
            );
            match resampler.flush(&mut out) {
                Ok(_) if out.samples() > 0 => append_s16_stereo(&out, &mut samples),
                Ok(_) => break,
                Err(e) => {
                    warn!("Resampler flush failed for {}: {}", path.display(), e);
                    break;
                }
            }
        }

        debug!(
            "Extracted audio from {}: {} sample frames",
            path.display(),
            samples.len() / 2
        );
        Ok(Self { samples })
    }
}

impl AudioTrack for FfmpegAudioTrack {
    fn sample_rate(&self) -> u32 {
        AUDIO_SAMPLE_RATE
    }

    fn channels(&self) -> u16 {
        2
    }

    fn total_samples(&self) -> u64 {
        (self.samples.len() / 2) as u64
    }

    fn read_pcm(&self, start_sample: u64, sample_count: usize) -> Result<Vec<i16>, AudioError> {
        let start = (start_sample as usize).saturating_mul(2).min(self.samples.len());
        let end = start.saturating_add(sample_count * 2).min(self.samples.len());
        Ok(self.samples[start..end].to_vec())
    }
}

/// Decode service for real media files
#[derive(Debug, Default, Clone)]
pub struct FfmpegService;

impl FfmpegService {
    pub fn new() -> Self {
        Self
    }
}

impl DecodeService for FfmpegService {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, OpenError> {
        Ok(Box::new(FfmpegSource::open(path)?))
    }

    fn open_audio(&self, path: &Path) -> Result<Arc<dyn AudioTrack>, AudioError> {
        Ok(Arc::new(FfmpegAudioTrack::extract(path)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_tone(path: &Path, sample_rate: u32, samples: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for n in 0..samples {
            let t = n as f64 / sample_rate as f64;
            writer
                .write_sample(((std::f64::consts::TAU * 440.0 * t).sin() * 8000.0) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_resampled_track_keeps_full_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        // one second at 48 kHz, resampled to 44.1 kHz stereo
        write_tone(&path, 48_000, 48_000);

        let track = FfmpegAudioTrack::extract(&path).unwrap();
        assert_eq!(track.channels(), 2);
        let total = track.total_samples() as i64;
        assert!((total - 44_100).abs() <= 4, "got {} sample frames", total);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = FfmpegService::new()
            .open(Path::new("/definitely/not/here.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, OpenError::NotFound(_)));
    }
}
