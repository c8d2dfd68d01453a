//! Wire messages of the live conversational service
//!
//! JSON over a WebSocket. The client opens with a `setup` message, then
//! streams `realtimeInput` audio; the server answers with `setupComplete`
//! and streams `serverContent` carrying base64 PCM and interruption flags.

use serde::{Deserialize, Serialize};

use crate::audio::buffer::AudioChunk;
use crate::codec::decoder::{decode_base64_pcm, encode_base64};
use crate::config::LiveConfig;
use crate::constants::{CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::error::NetworkError;
use crate::network::channel::InboundEvent;

/// Client → server
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<Blob>,
}

impl ClientMessage {
    pub fn setup(config: &LiveConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };
        ClientMessage::Setup(Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.clone(),
                        },
                    },
                },
            },
            system_instruction: Content {
                parts: vec![Part {
                    text: Some(config.system_instruction.clone()),
                    inline_data: None,
                }],
            },
        })
    }

    /// Wrap one outbound PCM payload
    pub fn audio(pcm: &[u8]) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![Blob {
                mime_type: format!("audio/pcm;rate={}", CAPTURE_SAMPLE_RATE),
                data: encode_base64(pcm),
            }],
        })
    }

    pub fn to_json(&self) -> Result<String, NetworkError> {
        serde_json::to_string(self).map_err(|e| NetworkError::Transport(e.to_string()))
    }
}

/// Server → client
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

impl ServerMessage {
    pub fn parse(bytes: &[u8]) -> Result<Self, NetworkError> {
        serde_json::from_slice(bytes).map_err(|e| NetworkError::ProtocolViolation(e.to_string()))
    }

    pub fn is_setup_complete(&self) -> bool {
        self.setup_complete.is_some()
    }

    /// Inbound events carried by this message, in wire order.
    ///
    /// Audio parts come first, then the interruption flag. A part that fails
    /// to decode yields an error entry and does not affect its neighbours.
    pub fn into_events(self) -> Vec<Result<InboundEvent, NetworkError>> {
        let mut events = Vec::new();
        let Some(content) = self.server_content else {
            return events;
        };

        if let Some(turn) = content.model_turn {
            for blob in turn.parts.into_iter().filter_map(|p| p.inline_data) {
                if !blob.mime_type.starts_with("audio/pcm") {
                    tracing::debug!("Ignoring inline data of type {}", blob.mime_type);
                    continue;
                }
                let sample_rate = mime_rate(&blob.mime_type).unwrap_or(PLAYBACK_SAMPLE_RATE);
                events.push(
                    decode_base64_pcm(&blob.data)
                        .map(|samples| InboundEvent::AudioChunk(AudioChunk::new(samples, sample_rate))),
                );
            }
        }

        if content.interrupted {
            events.push(Ok(InboundEvent::Interruption));
        }
        events
    }
}

/// Extract `rate=NNNN` from a mime type such as `audio/pcm;rate=24000`
pub fn mime_rate(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
        .filter(|&rate: &u32| rate > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_shape() {
        let json = ClientMessage::setup(&LiveConfig::default()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let setup = &value["setup"];
        assert_eq!(
            setup["model"],
            "models/gemini-2.5-flash-native-audio-preview-09-2025"
        );
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Fenrir"
        );
        assert!(setup["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("Havana"));
    }

    #[test]
    fn test_audio_message_shape() {
        let json = ClientMessage::audio(&[0x01, 0x00]).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let chunk = &value["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(chunk["data"], "AQA=");
    }

    #[test]
    fn test_setup_complete() {
        let msg = ServerMessage::parse(br#"{"setupComplete": {}}"#).unwrap();
        assert!(msg.is_setup_complete());
        assert!(msg.into_events().is_empty());
    }

    #[test]
    fn test_audio_then_interruption_order() {
        let msg = ServerMessage::parse(
            br#"{"serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AEA="}},
                    {"text": "hello"},
                    {"inlineData": {"mimeType": "audio/pcm", "data": "AMA="}}
                ]},
                "interrupted": true
            }}"#,
        )
        .unwrap();

        let events: Vec<InboundEvent> = msg.into_events().into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            events,
            vec![
                InboundEvent::AudioChunk(AudioChunk::new(vec![0.5], 24_000)),
                InboundEvent::AudioChunk(AudioChunk::new(vec![-0.5], 24_000)),
                InboundEvent::Interruption,
            ]
        );
    }

    #[test]
    fn test_bad_part_is_isolated() {
        let msg = ServerMessage::parse(
            br#"{"serverContent": {"modelTurn": {"parts": [
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQID"}},
                {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AEA="}}
            ]}}}"#,
        )
        .unwrap();
        let events = msg.into_events();
        assert!(matches!(events[0], Err(NetworkError::ProtocolViolation(_))));
        assert!(events[1].is_ok());
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            ServerMessage::parse(b"{not json"),
            Err(NetworkError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_mime_rate() {
        assert_eq!(mime_rate("audio/pcm;rate=24000"), Some(24_000));
        assert_eq!(mime_rate("audio/pcm; rate=16000"), Some(16_000));
        assert_eq!(mime_rate("audio/pcm"), None);
        assert_eq!(mime_rate("audio/pcm;rate=0"), None);
    }
}
