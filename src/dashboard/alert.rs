//! Emergency alert tone.
//!
//! `start_alert` is a stateless factory: every call renders a fresh tone and
//! hands back an `AlertSession` that owns the playback. Dropping the session
//! stops it.

use std::f64::consts::{PI, TAU};
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Length of one alert tone
pub const TONE_DURATION: Duration = Duration::from_secs(3);
const STEP_SECONDS: f64 = 0.25;
const LOW_HZ: f64 = 800.0;
const HIGH_HZ: f64 = 1050.0;
const SQUARE_MIX: f64 = 0.7;
const SINE_MIX: f64 = 0.3;
const TONE_GAIN: f64 = 0.4;
/// Share of each step cross-faded at both edges
const EDGE_BLEND: f64 = 0.1;
const FADE_SECONDS: f64 = 0.1;

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    Unavailable(String),
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioError::Unavailable(reason) => write!(f, "audio output unavailable: {}", reason),
        }
    }
}

impl std::error::Error for AudioError {}

/// Something that can play a mono buffer
pub trait AudioOutput: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn play(&self, samples: Arc<[f32]>, volume: f32) -> Result<Box<dyn Playback>, AudioError>;
}

/// A buffer being played
pub trait Playback: Send {
    fn stop(&mut self);
}

/// Render the alert: alternating 800/1050 Hz steps of a 70/30 square/sine
/// blend, each step faded at its edges, the whole tone faded in and out.
pub fn render_alert_tone(sample_rate: u32) -> Vec<f32> {
    let rate = f64::from(sample_rate.max(1));
    let total = (TONE_DURATION.as_secs_f64() * rate) as usize;
    let step = STEP_SECONDS * rate;
    let blend = step * EDGE_BLEND;
    let fade = FADE_SECONDS * rate;
    let end = total as f64;

    let mut samples = Vec::with_capacity(total);
    let mut phase = 0.0_f64;
    for i in 0..total {
        let pos = i as f64;
        let frequency = if ((pos / step) as u64) % 2 == 0 {
            LOW_HZ
        } else {
            HIGH_HZ
        };
        phase += TAU * frequency / rate;

        let square = if phase % TAU < PI { 1.0 } else { -1.0 };
        let mut sample = (square * SQUARE_MIX + phase.sin() * SINE_MIX) * TONE_GAIN;

        let within = pos % step;
        if within < blend {
            sample *= within / blend;
        } else if within > step - blend {
            sample *= (step - within) / blend;
        }

        if pos < fade {
            sample *= pos / fade;
        } else if pos > end - fade {
            sample *= (end - pos) / fade;
        }

        samples.push(sample as f32);
    }
    samples
}

/// Playing alert. Stops on `stop` or drop, and counts as finished once the
/// tone has run its length.
pub struct AlertSession {
    playback: Option<Box<dyn Playback>>,
    ends_at: Instant,
}

impl AlertSession {
    pub fn is_playing(&self) -> bool {
        self.playback.is_some() && Instant::now() < self.ends_at
    }

    pub fn stop(&mut self) {
        if let Some(mut playback) = self.playback.take() {
            playback.stop();
            debug!("Alert tone stopped");
        }
    }
}

impl Drop for AlertSession {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn start_alert(output: &dyn AudioOutput, volume: f32) -> Result<AlertSession, AudioError> {
    let samples: Arc<[f32]> = render_alert_tone(output.sample_rate()).into();
    let playback = output.play(samples, volume.clamp(0.0, 1.0))?;
    info!(volume = volume, "Alert tone started");
    Ok(AlertSession {
        playback: Some(playback),
        ends_at: Instant::now() + TONE_DURATION,
    })
}

/// Terminal bell. The rendered buffer is not played sample by sample.
#[derive(Debug, Default)]
pub struct BellOutput;

struct BellPlayback;

impl Playback for BellPlayback {
    fn stop(&mut self) {}
}

impl AudioOutput for BellOutput {
    fn sample_rate(&self) -> u32 {
        DEFAULT_SAMPLE_RATE
    }

    fn play(&self, _samples: Arc<[f32]>, volume: f32) -> Result<Box<dyn Playback>, AudioError> {
        if volume <= 0.0 {
            return Ok(Box::new(BellPlayback));
        }
        let mut stderr = std::io::stderr();
        if let Err(e) = stderr.write_all(b"\x07").and_then(|_| stderr.flush()) {
            warn!(error = %e, "Failed to ring terminal bell");
            return Err(AudioError::Unavailable(e.to_string()));
        }
        Ok(Box::new(BellPlayback))
    }
}

#[cfg(test)]
pub(crate) mod recording {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Output that counts plays and stops
    #[derive(Default)]
    pub struct RecordingOutput {
        pub started: Arc<AtomicUsize>,
        pub stopped: Arc<AtomicUsize>,
        pub fail: bool,
    }

    impl RecordingOutput {
        pub fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        pub fn stopped(&self) -> usize {
            self.stopped.load(Ordering::SeqCst)
        }
    }

    struct RecordingPlayback(Arc<AtomicUsize>);

    impl Playback for RecordingPlayback {
        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl AudioOutput for RecordingOutput {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn play(&self, samples: Arc<[f32]>, _volume: f32) -> Result<Box<dyn Playback>, AudioError> {
            if self.fail {
                return Err(AudioError::Unavailable("no device".to_string()));
            }
            assert_eq!(samples.len(), 24_000);
            self.started.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingPlayback(self.stopped.clone())))
        }
    }
}
