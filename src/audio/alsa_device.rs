//! ALSA PCM device wrappers for agent audio I/O.
//!
//! The agent speaks one format end to end: S16LE mono at the configured
//! sample rate. The hardware may negotiate a different period size; callers
//! must re-chunk using the actual values reported here.

use alsa::pcm::{Access, Format, HwParams, PCM};
use alsa::{Direction, ValueOr};
use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct PcmParams {
    /// Actual sample rate after negotiation
    pub sample_rate: u32,
    /// Period size in frames
    pub period_size: usize,
}

/// Open the microphone device, requesting a period close to one agent frame.
pub fn open_capture(device: &str, sample_rate: u32, period_size: usize) -> Result<(PCM, PcmParams)> {
    open_pcm(device, Direction::Capture, sample_rate, Some(period_size), "Capture")
}

/// Open the playback device used for response audio.
pub fn open_playback(device: &str, sample_rate: u32) -> Result<(PCM, PcmParams)> {
    open_pcm(device, Direction::Playback, sample_rate, None, "Playback")
}

fn open_pcm(
    device: &str,
    direction: Direction,
    sample_rate: u32,
    period_size: Option<usize>,
    dir_name: &str,
) -> Result<(PCM, PcmParams)> {
    let pcm = PCM::new(device, direction, false)
        .with_context(|| format!("Failed to open PCM device '{}' for {}", device, dir_name))?;

    {
        let hwp = HwParams::any(&pcm).with_context(|| "Failed to initialize HwParams")?;
        hwp.set_access(Access::RWInterleaved)?;
        hwp.set_format(Format::S16LE)?;
        hwp.set_channels(1)?;
        hwp.set_rate_near(sample_rate, ValueOr::Nearest)?;
        if let Some(ps) = period_size {
            hwp.set_period_size_near(ps as alsa::pcm::Frames, ValueOr::Nearest)?;
        }
        pcm.hw_params(&hwp)?;
    }

    let (actual_rate, actual_period) = {
        let hwp = pcm.hw_params_current()?;
        (hwp.get_rate()?, hwp.get_period_size()? as usize)
    };

    let params = PcmParams {
        sample_rate: actual_rate,
        period_size: actual_period,
    };

    log::info!(
        "ALSA {}: device={}, rate={}, period_size={}",
        dir_name,
        device,
        actual_rate,
        actual_period,
    );

    Ok((pcm, params))
}
