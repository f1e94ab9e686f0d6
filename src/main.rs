mod audio;
mod config;
mod link;
mod protocol;
mod render;
mod session;
mod transcribe;
mod wake;

use std::sync::Arc;

use anyhow::Result;
use mac_address::get_mac_address;
use tokio::sync::mpsc;
use uuid::Uuid;

use audio::{AlsaPlayer, CaptureConfig, CaptureSystem};
use config::Config;
use link::{ConversationLink, LinkCommand, LinkEvent};
use render::ResponseRenderer;
use session::SessionController;
use transcribe::{HttpTranscriber, load_credentials};
use wake::{WakeConfig, WakeDetector, parse_keyword_groups};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    // Conversation-service credentials come on the command line, the
    // transcription key from the local file. Both are checked before any
    // audio device is opened.
    let mut args = std::env::args().skip(1);
    let (client_id, client_key) = match (args.next(), args.next()) {
        (Some(id), Some(key)) => (id, key),
        _ => anyhow::bail!("Usage: adam_voice_rs <client-id> <client-key>"),
    };

    let mut config = Config::new().map_err(|e| anyhow::anyhow!(e))?;

    let credentials = load_credentials(config.credentials_file)?;

    // 用户id处理: fall back to the MAC address, then to a random UUID
    if config.user_id == "unknown-user" {
        config.user_id = match get_mac_address() {
            Ok(Some(mac)) => mac.to_string().to_lowercase(),
            _ => Uuid::new_v4().to_string(),
        };
    }
    log::info!("User ID: {}", config.user_id);

    // 创建通道，用于组件间通信
    let (frame_tx, frame_rx) = mpsc::channel(64);
    let (link_event_tx, link_event_rx) = mpsc::channel::<LinkEvent>(100);
    let (link_cmd_tx, link_cmd_rx) = mpsc::channel::<LinkCommand>(100);

    let mut capture = CaptureSystem::start(
        CaptureConfig {
            device: config.capture_device.to_string(),
            sample_rate: config.sample_rate,
            frame_size: config.frame_size,
        },
        frame_tx,
    )?;
    log::info!("✅ Microphone ready");

    let conv_link = ConversationLink::new(
        config.conv_url.to_string(),
        client_id,
        client_key,
        link_event_tx,
        link_cmd_rx,
    );
    tokio::spawn(conv_link.run());

    let transcriber = Arc::new(HttpTranscriber::new(
        config.stt_url.to_string(),
        credentials.api_key,
        config.wake_boost_phrase.to_string(),
        config.sample_rate,
    ));
    let wake = WakeDetector::new(
        WakeConfig {
            keyword_groups: parse_keyword_groups(config.wake_keywords),
            confidence_threshold: config.wake_confidence_threshold,
            record_ms: config.wake_record_ms,
            sample_rate: config.sample_rate,
        },
        transcriber,
    );

    let renderer = ResponseRenderer::new(Arc::new(AlsaPlayer::new(config.playback_device)));

    let mut controller = SessionController::new(
        config,
        link_cmd_tx,
        capture.handle(),
        renderer,
        wake,
    );
    let result = controller.run(frame_rx, link_event_rx).await;

    capture.stop();
    log::info!("👋 Goodbye");
    result
}
