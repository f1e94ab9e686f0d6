use serde::{Deserialize, Serialize};
use serde_json::Value;

// 音频参数结构体
#[derive(Debug, Serialize)]
pub struct AudioParams {
    pub format: String,
    pub sample_rate: u32,
    pub channels: u8,
}

/// Start-of-turn request. Sent as the first text message of every turn;
/// `conversation_state` carries the token returned by the previous turn, if
/// any, and is omitted on the wire when absent.
#[derive(Debug, Serialize)]
pub struct TurnRequest {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub request_id: String,
    pub user_id: String,
    pub voice: String,
    pub response_format: String,
    pub latitude: f64,
    pub longitude: f64,
    pub audio_params: AudioParams,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_state: Option<Value>,
}

/// Final structured result of one turn.
#[derive(Debug, Clone, Deserialize)]
pub struct FinalResponse {
    pub spoken_text: String,
    // base64-encoded WAV
    pub response_audio: Option<String>,
    pub conversation_state: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub text: Option<String>,
    pub state: Option<String>,
    pub message: Option<String>,
    pub spoken_text: Option<String>,
    pub response_audio: Option<String>,
    pub conversation_state: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_request_carries_conversation_state() {
        let req = TurnRequest {
            msg_type: "start".to_string(),
            request_id: "r-1".to_string(),
            user_id: "user".to_string(),
            voice: "Mia".to_string(),
            response_format: "wav".to_string(),
            latitude: 37.388309,
            longitude: -121.973968,
            audio_params: AudioParams {
                format: "pcm_s16le".to_string(),
                sample_rate: 16000,
                channels: 1,
            },
            conversation_state: Some(serde_json::json!({"turn": 3})),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains(r#""conversation_state":{"turn":3}"#));
        assert!(json.contains(r#""type":"start""#));
    }

    #[test]
    fn turn_request_omits_absent_conversation_state() {
        let req = TurnRequest {
            msg_type: "start".to_string(),
            request_id: "r-2".to_string(),
            user_id: "user".to_string(),
            voice: "Mia".to_string(),
            response_format: "wav".to_string(),
            latitude: 0.0,
            longitude: 0.0,
            audio_params: AudioParams {
                format: "pcm_s16le".to_string(),
                sample_rate: 16000,
                channels: 1,
            },
            conversation_state: None,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(!json.contains("conversation_state"));
    }

    #[test]
    fn parses_transcript_message() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"transcript","text":"hello there"}"#).unwrap();
        assert_eq!(msg.msg_type, "transcript");
        assert_eq!(msg.text.as_deref(), Some("hello there"));
    }

    #[test]
    fn parses_result_message() {
        let msg: ServerMessage = serde_json::from_str(
            r#"{"type":"result","spoken_text":"hi","response_audio":"AAAA","conversation_state":{"k":1}}"#,
        )
        .unwrap();
        assert_eq!(msg.msg_type, "result");
        assert_eq!(msg.spoken_text.as_deref(), Some("hi"));
        assert!(msg.conversation_state.is_some());
    }
}
