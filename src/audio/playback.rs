//! Response audio playback through ALSA.

use std::path::Path;

use anyhow::{Context, Result};

use super::alsa_device;

/// Plays a decoded response clip. The session controller pauses capture
/// around `play`; implementations only produce sound.
pub trait Player: Send + Sync {
    fn play(&self, path: &Path) -> Result<()>;
}

/// ALSA-backed player for the WAV clips the conversation service returns.
pub struct AlsaPlayer {
    device: String,
}

impl AlsaPlayer {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl Player for AlsaPlayer {
    fn play(&self, path: &Path) -> Result<()> {
        let mut reader = hound::WavReader::open(path)
            .with_context(|| format!("Failed to open response audio {}", path.display()))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            anyhow::bail!("Unsupported response channel count: {}", spec.channels);
        }
        let samples: Vec<i16> = reader
            .samples::<i16>()
            .collect::<Result<_, _>>()
            .context("Failed to decode response audio samples")?;

        let (pcm, params) = alsa_device::open_playback(&self.device, spec.sample_rate)?;
        let io = pcm.io_i16()?;

        log::info!(
            "Playback started: {} samples at {}Hz (device rate {})",
            samples.len(),
            spec.sample_rate,
            params.sample_rate,
        );

        // Write with retry to handle short writes and XRUN recovery without
        // losing frames; bail out if the device repeatedly cannot keep up.
        let mut written = 0;
        let mut retry_count = 0u32;
        while written < samples.len() {
            match io.writei(&samples[written..]) {
                Ok(n) => {
                    written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA playback error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        anyhow::bail!("Failed to recover PCM playback: {}", e2);
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries reached, dropping {} unwritten samples",
                            samples.len() - written
                        );
                        break;
                    }
                }
            }
        }

        // Let the device finish the buffered tail before capture resumes,
        // otherwise the end of the clip leaks into the next utterance.
        if let Err(e) = pcm.drain() {
            log::warn!("PCM drain failed: {}", e);
        }

        log::info!("Playback finished");
        Ok(())
    }
}
