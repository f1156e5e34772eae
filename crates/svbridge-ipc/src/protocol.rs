//! Command names and typed payloads.

use serde::{Deserialize, Serialize};
use svbridge_core::{AudioChunk, BackoffConfig, BridgeConfig};

pub mod commands {
    pub const INITIALIZE: &str = "initialize";
    pub const SPEAK: &str = "speak";
    pub const STOP: &str = "stop";
    pub const SET_PARAMETER: &str = "setParameter";
    /// Historic name of [`SET_PARAMETER`].
    pub const DLL_CALL: &str = "dllCall";
    pub const GET_FORMAT: &str = "getFormat";
    pub const SHUTDOWN: &str = "shutdown";
    /// Historic name of [`SHUTDOWN`].
    pub const DELETE: &str = "delete";
}

pub mod events {
    pub const AUDIO: &str = "audio";
    pub const STOPPED: &str = "stopped";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    #[serde(alias = "dllPath")]
    pub wrapper_path: String,
    #[serde(alias = "tibasePath")]
    pub engine_path: String,
    #[serde(default = "default_voice")]
    pub initial_voice: i32,
    /// The caller's read-loop tuning. Older callers omit it and the helper
    /// keeps its own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<StreamSettings>,
}

const fn default_voice() -> i32 {
    1
}

/// Read-loop settings the helper applies to every utterance it streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamSettings {
    pub max_utterance_chars: usize,
    pub read_buffer_bytes: usize,
    pub read_backoff: BackoffConfig,
    pub speak_join_timeout_ms: u64,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for StreamSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            max_utterance_chars: config.max_utterance_chars,
            read_buffer_bytes: config.read_buffer_bytes,
            read_backoff: config.read_backoff.clone(),
            speak_join_timeout_ms: config.speak_join_timeout_ms,
        }
    }
}

impl StreamSettings {
    /// Overlay these settings onto `config`.
    pub fn apply_to(&self, config: &mut BridgeConfig) {
        config.max_utterance_chars = self.max_utterance_chars;
        config.read_buffer_bytes = self.read_buffer_bytes;
        config.read_backoff = self.read_backoff.clone();
        config.speak_join_timeout_ms = self.speak_join_timeout_ms;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeakRequest {
    pub text: String,
    /// Echoed back in every `audio` event of this utterance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParameterRequest {
    #[serde(alias = "funcName")]
    pub name: String,
    pub value: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
}

impl StatusReply {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            outcome: None,
        }
    }

    pub fn with_outcome(outcome: &str) -> Self {
        Self {
            status: "ok".to_string(),
            outcome: Some(outcome.to_string()),
        }
    }
}

/// Payload of an `audio` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioEvent {
    #[serde(with = "base64_bytes", default)]
    pub data: Vec<u8>,
    #[serde(default)]
    pub index: Option<i32>,
    #[serde(rename = "final", default)]
    pub is_final: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

impl AudioEvent {
    pub fn from_chunk(chunk: AudioChunk) -> Self {
        Self {
            data: chunk.payload,
            index: chunk.index,
            is_final: chunk.is_final,
            sequence: Some(chunk.sequence),
        }
    }

    /// Rebuild the chunk, using `fallback` when the sender did not tag it.
    pub fn into_chunk(self, fallback: u64) -> AudioChunk {
        AudioChunk {
            payload: self.data,
            index: self.index,
            is_final: self.is_final,
            sequence: self.sequence.unwrap_or(fallback),
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn legacy_field_names_are_accepted() {
        let init: InitializeRequest = serde_json::from_value(
            json!({"dllPath": "w.dll", "tibasePath": "t.dll"}),
        )
        .unwrap();
        assert_eq!(init.wrapper_path, "w.dll");
        assert_eq!(init.initial_voice, 1);
        assert_eq!(init.stream, None);

        let set: SetParameterRequest =
            serde_json::from_value(json!({"funcName": "sv_setRate", "value": 200})).unwrap();
        assert_eq!(set.name, "sv_setRate");
    }

    #[test]
    fn stream_settings_travel_in_camel_case() {
        let init: InitializeRequest = serde_json::from_value(json!({
            "wrapperPath": "w.dll",
            "enginePath": "t.dll",
            "stream": {"maxUtteranceChars": 40, "readBackoff": {"factor": 2.0}},
        }))
        .unwrap();
        let stream = init.stream.unwrap();
        assert_eq!(stream.max_utterance_chars, 40);
        assert_eq!(stream.read_backoff.factor, 2.0);
        assert_eq!(stream.read_buffer_bytes, StreamSettings::default().read_buffer_bytes);

        let mut config = BridgeConfig::default();
        stream.apply_to(&mut config);
        assert_eq!(config.max_utterance_chars, 40);
        assert_eq!(StreamSettings::from(&config), stream);
    }

    #[test]
    fn audio_event_carries_bytes_as_base64() {
        let event = AudioEvent::from_chunk(AudioChunk::audio(vec![0, 255, 128], 4));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["data"], "AP+A");
        assert_eq!(value["final"], false);
        assert_eq!(value["sequence"], 4);
    }

    #[test]
    fn untagged_audio_event_uses_fallback_sequence() {
        let event: AudioEvent = serde_json::from_value(json!({"data": "", "final": true})).unwrap();
        let chunk = event.into_chunk(11);
        assert!(chunk.is_end_marker());
        assert_eq!(chunk.sequence, 11);
    }
}
