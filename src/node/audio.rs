//! Audio playback for node devices.
//!
//! [`AudioPlayer`] holds the loaded fragment and the safety policy, and hands
//! actual output to a [`Mixer`]. Playback pace is changed by rewriting the WAV
//! sample rate into a temporary copy, which also shifts pitch slightly.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use thiserror::Error;

/// Lowest sample rate a paced copy may use.
const MIN_SAMPLE_RATE: u32 = 500;
/// Pace changes smaller than this play the original clip.
const PACE_TOLERANCE: f64 = 0.02;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV processing failed: {0}")]
    Wav(#[from] hound::Error),
}

/// Output device abstraction.
pub trait Mixer: Send {
    /// Whether the device can produce sound at all.
    fn available(&self) -> bool;

    fn set_volume(&mut self, volume: f64);

    /// Start playing `path`. `loops` follows the usual mixer convention:
    /// `-1` repeats forever, `n >= 0` plays `n` extra times.
    fn play(&mut self, path: &Path, loops: i32) -> Result<(), AudioError>;

    fn stop(&mut self);
}

/// Mixer for nodes without an audio device; everything is ignored.
#[derive(Debug, Default)]
pub struct NullMixer;

impl Mixer for NullMixer {
    fn available(&self) -> bool {
        false
    }

    fn set_volume(&mut self, _volume: f64) {}

    fn play(&mut self, _path: &Path, _loops: i32) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Mixer that spawns an `ffplay`-compatible player per clip.
///
/// Volume is passed on the command line, so changes take effect on the next
/// clip.
pub struct ProcessMixer {
    program: String,
    volume: f64,
    child: Option<Child>,
}

impl ProcessMixer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            volume: 1.0,
            child: None,
        }
    }

    fn player_args(&self, path: &Path, loops: i32) -> Vec<String> {
        // ffplay: -loop 0 means forever, -loop n plays n times in total.
        let ff_loops = if loops < 0 { 0 } else { loops + 1 };
        vec![
            "-nodisp".to_string(),
            "-autoexit".to_string(),
            "-loglevel".to_string(),
            "quiet".to_string(),
            "-volume".to_string(),
            ((self.volume * 100.0).round() as u32).to_string(),
            "-loop".to_string(),
            ff_loops.to_string(),
            path.to_string_lossy().to_string(),
        ]
    }
}

impl Mixer for ProcessMixer {
    fn available(&self) -> bool {
        true
    }

    fn set_volume(&mut self, volume: f64) {
        self.volume = volume.clamp(0.0, 1.0);
    }

    fn play(&mut self, path: &Path, loops: i32) -> Result<(), AudioError> {
        self.stop();
        let child = Command::new(&self.program)
            .args(self.player_args(path, loops))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        self.child = Some(child);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Ok(None) = child.try_wait() {
                if let Err(e) = child.kill() {
                    tracing::debug!("Failed to stop player process: {}", e);
                }
            }
            let _ = child.wait();
        }
    }
}

impl Drop for ProcessMixer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Thin player over a [`Mixer`] with safety limiting and pace control.
pub struct AudioPlayer {
    mixer: Box<dyn Mixer>,
    loaded: Option<PathBuf>,
    temp_audio: Option<PathBuf>,
    safety_limit: f64,
}

impl AudioPlayer {
    pub fn new(mixer: Box<dyn Mixer>) -> Self {
        if !mixer.available() {
            tracing::warn!("No audio mixer available; playback requests will be ignored");
        }
        Self {
            mixer,
            loaded: None,
            temp_audio: None,
            safety_limit: 1.0,
        }
    }

    /// Remember the clip to play later.
    pub fn load(&mut self, path: impl Into<PathBuf>) {
        self.cleanup_temp_audio();
        let path = path.into();
        tracing::debug!("Audio fragment ready: {}", path.display());
        self.loaded = Some(path);
    }

    pub fn loaded(&self) -> Option<&Path> {
        self.loaded.as_deref()
    }

    /// Cap every future volume request at `limit` (clamped to 0..=1).
    pub fn set_safety_limit(&mut self, limit: f64) {
        self.safety_limit = limit.clamp(0.0, 1.0);
    }

    pub fn safety_limit(&self) -> f64 {
        self.safety_limit
    }

    /// Returns the effective volume after the safety limit.
    pub fn set_volume(&mut self, value: f64) -> f64 {
        let requested = value.clamp(0.0, 1.0);
        let effective = requested.min(self.safety_limit);
        if !self.mixer.available() {
            tracing::debug!("Volume request {:.2} ignored; mixer unavailable", effective);
            return effective;
        }
        self.mixer.set_volume(effective);
        tracing::debug!("Volume set to {:.2} (requested {:.2})", effective, requested);
        effective
    }

    /// Start playback of the loaded clip.
    ///
    /// `repeat > 0` takes precedence over `looping`.
    pub fn play(&mut self, looping: bool, pace: f64, repeat: u32) {
        let Some(loaded) = self.loaded.clone() else {
            tracing::warn!("No audio loaded; play() ignored");
            return;
        };
        if !self.mixer.available() {
            tracing::info!("Play request for {} ignored; mixer unavailable", loaded.display());
            return;
        }

        let target = self.select_playback_source(pace);
        let loops = if repeat > 0 {
            repeat as i32
        } else if looping {
            -1
        } else {
            0
        };
        match self.mixer.play(&target, loops) {
            Ok(()) => tracing::debug!(
                "Playback started for {} (loops={} pace={:.2})",
                target.display(),
                loops,
                pace
            ),
            Err(e) => tracing::error!("Failed to play audio {}: {}", loaded.display(), e),
        }
    }

    pub fn stop(&mut self) {
        if !self.mixer.available() {
            tracing::debug!("Stop request ignored; mixer unavailable");
            return;
        }
        self.mixer.stop();
    }

    /// The file to hand the mixer: the original, or a paced copy.
    fn select_playback_source(&mut self, pace: f64) -> PathBuf {
        let Some(loaded) = self.loaded.clone() else {
            return PathBuf::new();
        };
        if !self.mixer.available() || (pace - 1.0).abs() < PACE_TOLERANCE {
            self.cleanup_temp_audio();
            return loaded;
        }
        self.make_paced_copy(pace).unwrap_or(loaded)
    }

    /// Write a temporary WAV whose sample rate is scaled by `pace`.
    ///
    /// Returns `None` for non-WAV clips or when the copy cannot be written.
    /// The copy stays on disk until the next load, paced copy, or drop.
    pub fn make_paced_copy(&mut self, pace: f64) -> Option<PathBuf> {
        let source = self.loaded.clone()?;
        let is_wav = source
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("wav"))
            .unwrap_or(false);
        if !is_wav {
            tracing::debug!(
                "Playback pace adjustments require WAV assets; using original clip {}",
                source.display()
            );
            return None;
        }

        self.cleanup_temp_audio();
        match write_paced_wav(&source, pace) {
            Ok(path) => {
                self.temp_audio = Some(path.clone());
                Some(path)
            }
            Err(e) => {
                tracing::warn!("Unable to prepare paced audio for {}: {}", source.display(), e);
                None
            }
        }
    }

    /// Remove a generated file, ignoring files that are already gone.
    pub fn cleanup_temp_file(path: &Path) {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!("Failed to remove temporary audio {}: {}", path.display(), e);
            }
        }
    }

    fn cleanup_temp_audio(&mut self) {
        if let Some(path) = self.temp_audio.take() {
            Self::cleanup_temp_file(&path);
        }
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        self.mixer.stop();
        self.cleanup_temp_audio();
    }
}

fn write_paced_wav(source: &Path, pace: f64) -> Result<PathBuf, AudioError> {
    let mut reader = hound::WavReader::open(source)?;
    let spec = reader.spec();
    let sample_rate = ((f64::from(spec.sample_rate) * pace) as u32).max(MIN_SAMPLE_RATE);
    let paced_spec = hound::WavSpec { sample_rate, ..spec };

    let (file, path) = tempfile::Builder::new()
        .prefix("echotrace_paced_")
        .suffix(".wav")
        .tempfile()?
        .keep()
        .map_err(|e| e.error)?;

    if let Err(e) = copy_samples(&mut reader, file, paced_spec) {
        AudioPlayer::cleanup_temp_file(&path);
        return Err(e);
    }
    Ok(path)
}

fn copy_samples(
    reader: &mut hound::WavReader<BufReader<File>>,
    file: File,
    spec: hound::WavSpec,
) -> Result<(), AudioError> {
    let mut writer = hound::WavWriter::new(BufWriter::new(file), spec)?;
    match spec.sample_format {
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                writer.write_sample(sample?)?;
            }
        }
        hound::SampleFormat::Int => {
            for sample in reader.samples::<i32>() {
                writer.write_sample(sample?)?;
            }
        }
    }
    writer.finalize()?;
    Ok(())
}
