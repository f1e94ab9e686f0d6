use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::protocol::{FinalResponse, ServerMessage, TurnRequest};

/// Events surfaced to the session controller. One tagged stream replaces the
/// listener callbacks of the conversation SDK.
#[derive(Debug)]
pub enum LinkEvent {
    Connected,
    /// Cumulative partial transcript of the current utterance
    Partial(String),
    /// The service's VAD decided the utterance is over
    UtteranceEnd,
    Final(Box<FinalResponse>),
    Error(String),
    Closed,
}

#[derive(Debug)]
pub enum LinkCommand {
    Open,
    StartTurn(Box<TurnRequest>),
    Audio(Bytes),
    FinishTurn,
    Close,
}

/// WebSocket link to the conversational speech service. One connection per
/// session; the controller opens it on wake and closes it on exit.
pub struct ConversationLink {
    conv_url: String,
    client_id: String,
    client_key: String,
    tx: mpsc::Sender<LinkEvent>,
    rx_cmd: mpsc::Receiver<LinkCommand>,
}

impl ConversationLink {
    pub fn new(
        conv_url: String,
        client_id: String,
        client_key: String,
        tx: mpsc::Sender<LinkEvent>,
        rx_cmd: mpsc::Receiver<LinkCommand>,
    ) -> Self {
        Self {
            conv_url,
            client_id,
            client_key,
            tx,
            rx_cmd,
        }
    }

    /// Idle until the controller opens a session. Every open ends with a
    /// single `Closed` event, whether the session finished cleanly or the
    /// connection failed.
    pub async fn run(mut self) {
        while let Some(cmd) = self.rx_cmd.recv().await {
            match cmd {
                LinkCommand::Open => {
                    if let Err(e) = self.connect_and_stream().await {
                        log::error!("Session link error: {}", e);
                        if self.tx.send(LinkEvent::Error(e.to_string())).await.is_err() {
                            break;
                        }
                    }
                    if self.tx.send(LinkEvent::Closed).await.is_err() {
                        break;
                    }
                }
                other => {
                    log::warn!("Ignoring {:?} outside an open session", other);
                }
            }
        }
    }

    async fn connect_and_stream(&mut self) -> anyhow::Result<()> {
        let url = Url::parse(&self.conv_url)?;
        let host = url.host_str().unwrap_or_default().to_string();

        let request = tokio_tungstenite::tungstenite::http::Request::builder()
            .method("GET")
            .uri(&self.conv_url)
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header(
                "Sec-WebSocket-Key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            )
            .header("Client-Id", &self.client_id)
            .header("Client-Key", &self.client_key)
            .body(())?;

        log::info!("Connecting to {}...", self.conv_url);
        let (ws_stream, _) = connect_async(request).await?;
        log::info!("Connected");

        let (mut write, mut read) = ws_stream.split();

        self.tx.send(LinkEvent::Connected).await?;

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.dispatch_server_message(&text).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => anyhow::bail!("Connection lost"),
                    }
                }
                cmd = self.rx_cmd.recv() => {
                    match cmd {
                        Some(LinkCommand::StartTurn(req)) => {
                            let json = serde_json::to_string(&*req)?;
                            write.send(Message::Text(json.into())).await?;
                        }
                        Some(LinkCommand::Audio(data)) => {
                            write.send(Message::Binary(data)).await?;
                        }
                        Some(LinkCommand::FinishTurn) => {
                            write.send(Message::Text(r#"{"type":"finish"}"#.into())).await?;
                        }
                        Some(LinkCommand::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            return Ok(());
                        }
                        Some(LinkCommand::Open) => {
                            log::warn!("Session already open");
                        }
                    }
                }
            }
        }
    }

    async fn dispatch_server_message(&self, text: &str) -> anyhow::Result<()> {
        let msg: ServerMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(_) => {
                log::warn!("Ignoring malformed server message");
                return Ok(());
            }
        };

        match msg.msg_type.as_str() {
            "transcript" => {
                if let Some(t) = msg.text {
                    self.tx.send(LinkEvent::Partial(t)).await?;
                }
            }
            "utterance" => {
                if msg.state.as_deref() == Some("end") {
                    self.tx.send(LinkEvent::UtteranceEnd).await?;
                }
            }
            "result" => {
                let response = FinalResponse {
                    spoken_text: msg.spoken_text.unwrap_or_default(),
                    response_audio: msg.response_audio,
                    conversation_state: msg.conversation_state,
                };
                self.tx.send(LinkEvent::Final(Box::new(response))).await?;
            }
            "error" => {
                let detail = msg.message.unwrap_or_else(|| "unknown server error".to_string());
                self.tx.send(LinkEvent::Error(detail)).await?;
            }
            other => {
                log::warn!("Unhandled message type: {}", other);
            }
        }
        Ok(())
    }
}
