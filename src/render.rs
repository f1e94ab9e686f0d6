//! Turns a final response into played sound.

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::audio::{CaptureHandle, Player};
use crate::protocol::FinalResponse;

pub struct ResponseRenderer {
    player: Arc<dyn Player>,
}

impl ResponseRenderer {
    pub fn new(player: Arc<dyn Player>) -> Self {
        Self { player }
    }

    /// Speak one final response. Capture is paused for exactly the duration
    /// of playback so the microphone never hears the agent; a response
    /// without audio touches neither capture nor the player.
    pub async fn render(&self, response: &FinalResponse, capture: &CaptureHandle) -> Result<()> {
        log::info!("🔊 {}", response.spoken_text);

        let Some(encoded) = response.response_audio.as_deref() else {
            return Ok(());
        };
        let audio = BASE64
            .decode(encoded)
            .context("Invalid response audio encoding")?;

        // Scoped handoff file, one per turn, deleted on drop.
        let mut clip =
            tempfile::NamedTempFile::new().context("Failed to create response audio file")?;
        clip.write_all(&audio)
            .context("Failed to write response audio")?;
        clip.flush()?;

        capture.pause();
        let player = self.player.clone();
        let path = clip.path().to_path_buf();
        let played = tokio::task::spawn_blocking(move || player.play(&path)).await;
        capture.resume();

        match played {
            Ok(result) => result,
            Err(e) => Err(anyhow::anyhow!("Playback task failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ProbePlayer {
        capture: CaptureHandle,
        calls: AtomicUsize,
        paused_during_play: AtomicUsize,
        fail: bool,
    }

    impl ProbePlayer {
        fn new(capture: CaptureHandle, fail: bool) -> Self {
            Self {
                capture,
                calls: AtomicUsize::new(0),
                paused_during_play: AtomicUsize::new(0),
                fail,
            }
        }
    }

    impl Player for ProbePlayer {
        fn play(&self, _path: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.capture.is_paused() {
                self.paused_during_play.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail {
                anyhow::bail!("device gone");
            }
            Ok(())
        }
    }

    fn response(audio: Option<&str>) -> FinalResponse {
        FinalResponse {
            spoken_text: "hello".to_string(),
            response_audio: audio.map(str::to_string),
            conversation_state: None,
        }
    }

    #[tokio::test]
    async fn audio_response_pauses_capture_for_playback_only() {
        let capture = CaptureHandle::detached();
        let player = Arc::new(ProbePlayer::new(capture.clone(), false));
        let renderer = ResponseRenderer::new(player.clone());

        let resp = response(Some(&BASE64.encode(b"RIFFdata")));
        renderer.render(&resp, &capture).await.unwrap();

        assert_eq!(player.calls.load(Ordering::SeqCst), 1);
        assert_eq!(player.paused_during_play.load(Ordering::SeqCst), 1);
        assert!(!capture.is_paused());
    }

    #[tokio::test]
    async fn response_without_audio_is_a_no_op() {
        let capture = CaptureHandle::detached();
        let player = Arc::new(ProbePlayer::new(capture.clone(), false));
        let renderer = ResponseRenderer::new(player.clone());

        renderer.render(&response(None), &capture).await.unwrap();

        assert_eq!(player.calls.load(Ordering::SeqCst), 0);
        assert!(!capture.is_paused());
    }

    #[tokio::test]
    async fn capture_resumes_even_when_playback_fails() {
        let capture = CaptureHandle::detached();
        let player = Arc::new(ProbePlayer::new(capture.clone(), true));
        let renderer = ResponseRenderer::new(player);

        let resp = response(Some(&BASE64.encode(b"RIFFdata")));
        assert!(renderer.render(&resp, &capture).await.is_err());
        assert!(!capture.is_paused());
    }

    #[tokio::test]
    async fn garbage_encoding_is_rejected_without_pausing() {
        let capture = CaptureHandle::detached();
        let player = Arc::new(ProbePlayer::new(capture.clone(), false));
        let renderer = ResponseRenderer::new(player.clone());

        assert!(renderer.render(&response(Some("%%%")), &capture).await.is_err());
        assert_eq!(player.calls.load(Ordering::SeqCst), 0);
        assert!(!capture.is_paused());
    }
}
