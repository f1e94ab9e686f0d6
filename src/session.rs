//! Session orchestration state machine.
//!
//! Owns the full wake → session → turn → exit lifecycle. Audio frames,
//! link events, and the operator interrupt all funnel into one task; the
//! turn-level decisions (`on_turn_event`, `conclude_turn`) are synchronous
//! so they can be exercised directly in tests.

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use serde_json::Value;
use tokio::signal;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{AudioFrame, CaptureHandle};
use crate::config::Config;
use crate::link::{LinkCommand, LinkEvent};
use crate::protocol::{AudioParams, FinalResponse, TurnRequest};
use crate::render::ResponseRenderer;
use crate::wake::WakeDetector;

/// Consecutive application-level error events tolerated within a session
/// before it is closed and the agent returns to wake listening.
const MAX_TURN_ERRORS: u32 = 3;

/// How long to wait for the link to confirm the socket is down on close.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingWake,
    SessionStarting,
    SessionActive,
    TurnFinalizing,
    SessionEnding,
    ProgramExit,
}

/// Partial transcripts of the current utterance, append-only. The service
/// sends cumulative text, so the latest fragment is the utterance so far.
#[derive(Debug, Default)]
pub struct Transcript {
    partials: Vec<String>,
}

impl Transcript {
    pub fn push(&mut self, fragment: String) {
        self.partials.push(fragment);
    }

    pub fn latest(&self) -> &str {
        self.partials.last().map(String::as_str).unwrap_or("")
    }

    pub fn contains_phrase(&self, phrase: &str) -> bool {
        self.latest().to_lowercase().contains(&phrase.to_lowercase())
    }

    pub fn clear(&mut self) {
        self.partials.clear();
    }
}

/// What the run loop must do after one event went through the state machine.
#[derive(Debug)]
enum TurnStep {
    Continue,
    FinishTurn,
    TurnDone(Box<FinalResponse>),
    EndSession,
}

pub struct SessionController {
    config: Config,
    phase: SessionPhase,
    transcript: Transcript,
    conversation_state: Option<Value>,
    exit_requested: bool,
    turn_errors: u32,
    link_open: bool,
    link_tx: mpsc::Sender<LinkCommand>,
    capture: CaptureHandle,
    renderer: ResponseRenderer,
    wake: WakeDetector,
}

impl SessionController {
    pub fn new(
        config: Config,
        link_tx: mpsc::Sender<LinkCommand>,
        capture: CaptureHandle,
        renderer: ResponseRenderer,
        wake: WakeDetector,
    ) -> Self {
        Self {
            config,
            phase: SessionPhase::AwaitingWake,
            transcript: Transcript::default(),
            conversation_state: None,
            exit_requested: false,
            turn_errors: 0,
            link_open: false,
            link_tx,
            capture,
            renderer,
            wake,
        }
    }

    pub async fn run(
        &mut self,
        mut frames: mpsc::Receiver<AudioFrame>,
        mut link_events: mpsc::Receiver<LinkEvent>,
    ) -> Result<()> {
        log::info!("Agent started. State: {:?}", self.phase);
        loop {
            match self.phase {
                SessionPhase::AwaitingWake => self.await_wake(&mut frames).await?,
                SessionPhase::SessionStarting => {
                    self.open_session(&mut frames, &mut link_events).await?
                }
                SessionPhase::SessionActive | SessionPhase::TurnFinalizing => {
                    self.drive_turn(&mut frames, &mut link_events).await?
                }
                SessionPhase::SessionEnding => self.close_session(&mut link_events).await,
                SessionPhase::ProgramExit => {
                    if self.link_open {
                        let _ = self.link_tx.send(LinkCommand::Close).await;
                    }
                    log::info!("Shutting down");
                    return Ok(());
                }
            }
        }
    }

    // ---- AwaitingWake ----

    async fn await_wake(&mut self, frames: &mut mpsc::Receiver<AudioFrame>) -> Result<()> {
        log::info!("🎙️ Waiting for wake phrase...");
        loop {
            drain_frames(frames);
            tokio::select! {
                _ = signal::ctrl_c() => {
                    self.phase = SessionPhase::ProgramExit;
                    return Ok(());
                }
                heard = self.wake.listen_once(frames) => match heard {
                    Ok(true) => {
                        log::info!("✅ Wake phrase detected, starting session");
                        self.phase = SessionPhase::SessionStarting;
                        return Ok(());
                    }
                    Ok(false) => {
                        log::info!("Wake phrase not detected, listening again");
                    }
                    Err(e) if frames.is_closed() => return Err(e),
                    Err(e) => {
                        log::warn!("Wake check failed: {}", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                },
            }
        }
    }

    // ---- SessionStarting ----

    async fn open_session(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        link_events: &mut mpsc::Receiver<LinkEvent>,
    ) -> Result<()> {
        drain_frames(frames);
        self.link_tx.send(LinkCommand::Open).await?;
        loop {
            tokio::select! {
                _ = signal::ctrl_c() => {
                    self.phase = SessionPhase::ProgramExit;
                    return Ok(());
                }
                ev = link_events.recv() => match ev {
                    Some(LinkEvent::Connected) => {
                        self.link_open = true;
                        self.begin_turn().await?;
                        self.phase = SessionPhase::SessionActive;
                        log::info!(
                            "🎧 Listening... (say '{}' to stop)",
                            self.config.exit_phrase
                        );
                        return Ok(());
                    }
                    Some(LinkEvent::Error(e)) => {
                        log::error!("Failed to open session: {}", e);
                    }
                    Some(LinkEvent::Closed) | None => {
                        self.finish_session();
                        return Ok(());
                    }
                    Some(other) => {
                        log::warn!("Unexpected event while connecting: {:?}", other);
                    }
                },
            }
        }
    }

    /// Start one turn: fresh transcript, exit flag cleared, the carried
    /// ConversationState attached to the request.
    async fn begin_turn(&mut self) -> Result<()> {
        self.transcript.clear();
        self.exit_requested = false;
        let request = self.next_turn_request();
        self.link_tx
            .send(LinkCommand::StartTurn(Box::new(request)))
            .await?;
        Ok(())
    }

    fn next_turn_request(&self) -> TurnRequest {
        TurnRequest {
            msg_type: "start".to_string(),
            request_id: Uuid::new_v4().to_string(),
            user_id: self.config.user_id.clone(),
            voice: self.config.voice_name.to_string(),
            response_format: self.config.response_format.to_string(),
            latitude: self.config.latitude,
            longitude: self.config.longitude,
            audio_params: AudioParams {
                format: "pcm_s16le".to_string(),
                sample_rate: self.config.sample_rate,
                channels: 1,
            },
            conversation_state: self.conversation_state.clone(),
        }
    }

    // ---- SessionActive / TurnFinalizing ----

    async fn drive_turn(
        &mut self,
        frames: &mut mpsc::Receiver<AudioFrame>,
        link_events: &mut mpsc::Receiver<LinkEvent>,
    ) -> Result<()> {
        tokio::select! {
            _ = signal::ctrl_c() => {
                self.phase = SessionPhase::ProgramExit;
            }
            frame = frames.recv() => match frame {
                Some(frame) => {
                    // Audio only flows to the client while the turn is open
                    // for it; after finish the frames are stale.
                    if self.phase == SessionPhase::SessionActive && !self.capture.is_paused() {
                        self.link_tx.send(LinkCommand::Audio(frame_bytes(&frame))).await?;
                    }
                }
                None => anyhow::bail!("Capture stream closed"),
            },
            ev = link_events.recv() => {
                let Some(ev) = ev else {
                    anyhow::bail!("Conversation link terminated")
                };
                match self.on_turn_event(ev) {
                    TurnStep::Continue => {}
                    TurnStep::FinishTurn => {
                        self.link_tx.send(LinkCommand::FinishTurn).await?;
                    }
                    TurnStep::TurnDone(response) => {
                        self.complete_turn(*response, frames).await?;
                    }
                    TurnStep::EndSession => {}
                }
            }
        }
        Ok(())
    }

    /// Feed one link event through the state machine. Synchronous on purpose:
    /// every transition decision lives here.
    fn on_turn_event(&mut self, ev: LinkEvent) -> TurnStep {
        match ev {
            LinkEvent::Partial(text) => {
                log::info!("Partial transcript: {}", text);
                self.transcript.push(text);
                if !self.exit_requested
                    && self.transcript.contains_phrase(self.config.exit_phrase)
                {
                    // Deferred: the turn runs to completion, the decision
                    // lands in conclude_turn.
                    log::info!("🛑 Exit phrase '{}' detected", self.config.exit_phrase);
                    self.exit_requested = true;
                }
                TurnStep::Continue
            }
            LinkEvent::UtteranceEnd => {
                if self.phase == SessionPhase::SessionActive {
                    self.phase = SessionPhase::TurnFinalizing;
                    TurnStep::FinishTurn
                } else {
                    TurnStep::Continue
                }
            }
            LinkEvent::Final(response) => {
                self.turn_errors = 0;
                if let Some(state) = &response.conversation_state {
                    self.conversation_state = Some(state.clone());
                }
                TurnStep::TurnDone(response)
            }
            LinkEvent::Error(message) => {
                log::error!("Conversation service error: {}", message);
                self.turn_errors += 1;
                if self.turn_errors >= MAX_TURN_ERRORS {
                    log::error!(
                        "{} consecutive service errors, closing session",
                        self.turn_errors
                    );
                    self.phase = SessionPhase::SessionEnding;
                    TurnStep::EndSession
                } else {
                    TurnStep::Continue
                }
            }
            LinkEvent::Closed => {
                log::warn!("Conversation link dropped mid-session");
                self.link_open = false;
                self.phase = SessionPhase::SessionEnding;
                TurnStep::EndSession
            }
            LinkEvent::Connected => TurnStep::Continue,
        }
    }

    async fn complete_turn(
        &mut self,
        response: FinalResponse,
        frames: &mut mpsc::Receiver<AudioFrame>,
    ) -> Result<()> {
        if let Err(e) = self.renderer.render(&response, &self.capture).await {
            log::error!("Failed to render response: {}", e);
        }

        if self.conclude_turn() {
            // Debounce so the tail of the response audio cannot open the
            // next turn.
            tokio::select! {
                _ = signal::ctrl_c() => {
                    self.phase = SessionPhase::ProgramExit;
                    return Ok(());
                }
                _ = tokio::time::sleep(Duration::from_millis(self.config.turn_debounce_ms)) => {}
            }
            drain_frames(frames);
            self.begin_turn().await?;
            log::info!("🎧 Listening...");
        }
        Ok(())
    }

    /// End-of-turn decision: loop into another turn, or end the session if
    /// the exit phrase was heard during this one.
    fn conclude_turn(&mut self) -> bool {
        if self.exit_requested {
            log::info!("Exit phrase heard, ending session");
            self.phase = SessionPhase::SessionEnding;
            false
        } else {
            self.transcript.clear();
            self.phase = SessionPhase::SessionActive;
            true
        }
    }

    // ---- SessionEnding ----

    async fn close_session(&mut self, link_events: &mut mpsc::Receiver<LinkEvent>) {
        if self.link_open {
            let _ = self.link_tx.send(LinkCommand::Close).await;
            loop {
                match tokio::time::timeout(CLOSE_TIMEOUT, link_events.recv()).await {
                    Ok(Some(LinkEvent::Closed)) | Ok(None) | Err(_) => break,
                    Ok(Some(_)) => {}
                }
            }
            self.link_open = false;
        }
        self.finish_session();
        if self.phase == SessionPhase::AwaitingWake {
            log::info!("🔁 Session closed, returning to wake listening");
        } else {
            log::info!("🚪 Session closed, exiting");
        }
    }

    /// Reset per-session state. ConversationState never survives a session.
    fn finish_session(&mut self) {
        self.conversation_state = None;
        self.transcript.clear();
        self.turn_errors = 0;
        let exited_by_phrase = self.exit_requested;
        self.exit_requested = false;
        self.phase = if exited_by_phrase && self.config.exit_after_phrase {
            SessionPhase::ProgramExit
        } else {
            SessionPhase::AwaitingWake
        };
    }
}

/// Serialize one PCM frame for the wire, little-endian.
fn frame_bytes(frame: &[i16]) -> Bytes {
    let mut buf = Vec::with_capacity(frame.len() * 2);
    for sample in frame {
        buf.extend_from_slice(&sample.to_le_bytes());
    }
    Bytes::from(buf)
}

fn drain_frames(frames: &mut mpsc::Receiver<AudioFrame>) {
    while frames.try_recv().is_ok() {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::Player;
    use crate::transcribe::{Transcriber, Transcription};
    use crate::wake::{WakeConfig, parse_keyword_groups};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Arc;

    struct SilentTranscriber;

    #[async_trait]
    impl Transcriber for SilentTranscriber {
        async fn transcribe(&self, _wav: &[u8]) -> Result<Transcription> {
            Ok(Transcription {
                transcript: String::new(),
                confidence: 0.0,
            })
        }
    }

    struct NullPlayer;

    impl Player for NullPlayer {
        fn play(&self, _path: &Path) -> Result<()> {
            Ok(())
        }
    }

    fn controller(config: Config) -> (SessionController, mpsc::Receiver<LinkCommand>) {
        let (link_tx, link_rx) = mpsc::channel(16);
        let wake = WakeDetector::new(
            WakeConfig {
                keyword_groups: parse_keyword_groups(config.wake_keywords),
                confidence_threshold: config.wake_confidence_threshold,
                record_ms: config.wake_record_ms,
                sample_rate: config.sample_rate,
            },
            Arc::new(SilentTranscriber),
        );
        let renderer = ResponseRenderer::new(Arc::new(NullPlayer));
        (
            SessionController::new(config, link_tx, CaptureHandle::detached(), renderer, wake),
            link_rx,
        )
    }

    fn active_controller() -> (SessionController, mpsc::Receiver<LinkCommand>) {
        let (mut c, rx) = controller(Config::default());
        c.phase = SessionPhase::SessionActive;
        c.link_open = true;
        (c, rx)
    }

    fn final_response(state: Option<serde_json::Value>) -> Box<FinalResponse> {
        Box::new(FinalResponse {
            spoken_text: "ok".to_string(),
            response_audio: None,
            conversation_state: state,
        })
    }

    #[test]
    fn exit_detected_iff_phrase_is_substring() {
        let mut t = Transcript::default();
        t.push("OKAY BYE Adam please".to_string());
        assert!(t.contains_phrase("bye adam"));

        t.clear();
        t.push("goodbye everyone".to_string());
        assert!(!t.contains_phrase("bye adam"));

        // only the most recent cumulative partial counts
        t.push("well okay bye adam".to_string());
        assert!(t.contains_phrase("bye adam"));
    }

    #[test]
    fn exit_phrase_defers_until_turn_finalizing() {
        // Scenario C
        let (mut c, _rx) = active_controller();

        assert!(matches!(
            c.on_turn_event(LinkEvent::Partial("okay bye adam".to_string())),
            TurnStep::Continue
        ));
        assert!(c.exit_requested);
        assert_eq!(c.phase, SessionPhase::SessionActive);

        assert!(matches!(
            c.on_turn_event(LinkEvent::UtteranceEnd),
            TurnStep::FinishTurn
        ));
        assert_eq!(c.phase, SessionPhase::TurnFinalizing);

        assert!(matches!(
            c.on_turn_event(LinkEvent::Final(final_response(None))),
            TurnStep::TurnDone(_)
        ));

        assert!(!c.conclude_turn());
        assert_eq!(c.phase, SessionPhase::SessionEnding);
    }

    #[test]
    fn non_exit_turn_loops_back_with_fresh_transcript() {
        let (mut c, _rx) = active_controller();
        c.on_turn_event(LinkEvent::Partial("what time is it".to_string()));
        c.on_turn_event(LinkEvent::UtteranceEnd);
        c.on_turn_event(LinkEvent::Final(final_response(None)));

        assert!(c.conclude_turn());
        assert_eq!(c.phase, SessionPhase::SessionActive);
        assert_eq!(c.transcript.latest(), "");
        assert!(!c.exit_requested);
    }

    #[test]
    fn conversation_state_round_trips_into_next_request() {
        let (mut c, _rx) = active_controller();
        let state = serde_json::json!({"token": "abc123"});
        c.on_turn_event(LinkEvent::Final(final_response(Some(state.clone()))));

        let request = c.next_turn_request();
        assert_eq!(request.conversation_state, Some(state));
    }

    #[test]
    fn conversation_state_survives_stateless_final() {
        let (mut c, _rx) = active_controller();
        let state = serde_json::json!({"token": "abc123"});
        c.on_turn_event(LinkEvent::Final(final_response(Some(state.clone()))));
        c.on_turn_event(LinkEvent::Final(final_response(None)));
        assert_eq!(c.next_turn_request().conversation_state, Some(state));
    }

    #[test]
    fn conversation_state_cleared_when_session_ends() {
        let (mut c, _rx) = active_controller();
        c.on_turn_event(LinkEvent::Final(final_response(Some(
            serde_json::json!({"token": "abc123"}),
        ))));

        c.finish_session();
        assert_eq!(c.phase, SessionPhase::AwaitingWake);
        assert!(c.next_turn_request().conversation_state.is_none());
    }

    #[test]
    fn single_service_error_is_tolerated() {
        let (mut c, _rx) = active_controller();
        assert!(matches!(
            c.on_turn_event(LinkEvent::Error("busy".to_string())),
            TurnStep::Continue
        ));
        assert_eq!(c.phase, SessionPhase::SessionActive);
    }

    #[test]
    fn repeated_service_errors_close_the_session() {
        let (mut c, _rx) = active_controller();
        for _ in 0..MAX_TURN_ERRORS - 1 {
            c.on_turn_event(LinkEvent::Error("busy".to_string()));
        }
        assert!(matches!(
            c.on_turn_event(LinkEvent::Error("busy".to_string())),
            TurnStep::EndSession
        ));
        assert_eq!(c.phase, SessionPhase::SessionEnding);
    }

    #[test]
    fn successful_turn_resets_error_count() {
        let (mut c, _rx) = active_controller();
        c.on_turn_event(LinkEvent::Error("busy".to_string()));
        c.on_turn_event(LinkEvent::Final(final_response(None)));
        assert_eq!(c.turn_errors, 0);
    }

    #[test]
    fn transport_loss_ends_the_session() {
        // Scenario E: an error from the client never unwinds as a failure,
        // the machine just moves to SessionEnding.
        let (mut c, _rx) = active_controller();
        assert!(matches!(
            c.on_turn_event(LinkEvent::Closed),
            TurnStep::EndSession
        ));
        assert_eq!(c.phase, SessionPhase::SessionEnding);
        assert!(!c.link_open);
    }

    #[test]
    fn exit_after_phrase_reaches_program_exit() {
        let mut config = Config::default();
        config.exit_after_phrase = true;
        let (mut c, _rx) = controller(config);
        c.phase = SessionPhase::SessionEnding;
        c.exit_requested = true;

        c.finish_session();
        assert_eq!(c.phase, SessionPhase::ProgramExit);
    }

    #[test]
    fn error_driven_session_end_never_exits_the_program() {
        let mut config = Config::default();
        config.exit_after_phrase = true;
        let (mut c, _rx) = controller(config);
        c.phase = SessionPhase::SessionEnding;

        c.finish_session();
        assert_eq!(c.phase, SessionPhase::AwaitingWake);
    }

    #[test]
    fn frames_serialize_little_endian() {
        let bytes = frame_bytes(&[1i16, -2, 256]);
        assert_eq!(bytes.as_ref(), &[1, 0, 0xFE, 0xFF, 0, 1]);
    }

    #[tokio::test]
    async fn begin_turn_resets_utterance_state() {
        let (mut c, mut rx) = active_controller();
        c.transcript.push("okay bye adam".to_string());
        c.exit_requested = true;

        c.begin_turn().await.unwrap();
        assert_eq!(c.transcript.latest(), "");
        assert!(!c.exit_requested);
        assert!(matches!(
            rx.recv().await,
            Some(LinkCommand::StartTurn(_))
        ));
    }
}
