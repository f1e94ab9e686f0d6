//! Microphone capture in a dedicated OS thread.
//!
//! Uses std::thread (NOT a tokio task) for real-time audio I/O to avoid
//! contention with async network tasks. The thread reads ALSA periods,
//! re-chunks them into exact `frame_size` frames, and feeds a bounded
//! channel. A pause gate discards frames while response audio is playing so
//! the agent never hears itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;

/// One fixed-size chunk of S16LE mono samples.
pub type AudioFrame = Vec<i16>;

#[derive(Debug, Clone)]
pub struct CaptureConfig {
    pub device: String,
    pub sample_rate: u32,
    pub frame_size: usize,
}

struct Shared {
    running: AtomicBool,
    paused: AtomicBool,
}

/// Control handle shared with the session controller. Pausing stops frame
/// delivery; the device itself stays open so resume is immediate.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl CaptureHandle {
    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::SeqCst);
        log::info!("Capture paused");
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::SeqCst);
        log::info!("Capture resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn detached() -> Self {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(true),
                paused: AtomicBool::new(false),
            }),
        }
    }
}

/// Owns the capture thread. Frames arrive on the channel passed to `start`.
pub struct CaptureSystem {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureSystem {
    pub fn start(config: CaptureConfig, frame_tx: mpsc::Sender<AudioFrame>) -> Result<Self> {
        let shared = Arc::new(Shared {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
        });

        log::info!(
            "Capture starting — device: \"{}\", rate: {}Hz, frame: {} samples",
            config.device,
            config.sample_rate,
            config.frame_size,
        );

        // The device is opened on the capture thread (ALSA handles stay
        // where they were created), but an unavailable device must still be
        // a startup error, so the thread reports its open result back.
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();

        let handle = {
            let shared = shared.clone();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    let (pcm, params) = match alsa_device::open_capture(
                        &config.device,
                        config.sample_rate,
                        config.frame_size,
                    ) {
                        Ok(opened) => {
                            let _ = ready_tx.send(Ok(()));
                            opened
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    capture_loop(pcm, params.period_size, config.frame_size, frame_tx, &shared);
                })?
        };

        ready_rx
            .recv()
            .unwrap_or_else(|_| Err(anyhow::anyhow!("Capture thread died during startup")))?;

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    pub fn handle(&self) -> CaptureHandle {
        CaptureHandle {
            shared: self.shared.clone(),
        }
    }

    /// Signal the thread to stop and wait for it to finish.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureSystem {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(
    pcm: alsa::pcm::PCM,
    period_size: usize,
    frame_size: usize,
    frame_tx: mpsc::Sender<AudioFrame>,
    shared: &Shared,
) {
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            log::error!("Failed to map capture I/O: {}", e);
            return;
        }
    };

    let mut read_buf = vec![0i16; period_size];
    let mut accum: Vec<i16> = Vec::with_capacity(frame_size * 2);

    log::info!("Capture started: period={}, frame={}", period_size, frame_size);

    while shared.running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(samples) => {
                if shared.paused.load(Ordering::Relaxed) {
                    // Playback in progress: drop everything, including any
                    // partial frame accumulated before the pause.
                    accum.clear();
                    continue;
                }
                accum.extend_from_slice(&read_buf[..samples]);
                while accum.len() >= frame_size {
                    let frame: AudioFrame = accum.drain(..frame_size).collect();
                    if frame_tx.blocking_send(frame).is_err() {
                        log::warn!("Frame receiver dropped, stopping capture");
                        return;
                    }
                }
            }
            Err(e) => {
                // Overflow is per-frame noise, not a reason to die.
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
}
