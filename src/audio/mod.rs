//! audio - ALSA capture and playback for the voice agent.
//!
//! Capture runs in a dedicated OS thread feeding a bounded frame queue;
//! playback is one-shot per response clip. Everything is S16LE mono.

mod alsa_device;
mod capture;
mod playback;

pub use capture::{AudioFrame, CaptureConfig, CaptureHandle, CaptureSystem};
pub use playback::{AlsaPlayer, Player};
