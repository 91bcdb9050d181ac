// src/bus/envelope.rs
// Envelope (§4.1): string->string map with nested structures JSON-encoded
// inline. `EnvelopeType` tightens the original Python implementation's
// stringly-typed `MessageType` constants (BACKEND_TO_AGENT / AGENT_TO_BACKEND
// / AGENT_STATUS / AGENT_TO_AGENT channel taxonomy) into a closed enum, per
// SPEC_FULL.md §10's "supplemented features" note.

use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Every envelope `type` this crate's bus carries, across the router-observed
/// session stream and the agent-to-agent broadcast channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeType {
    // Router -> agent dispatch
    ClassifyQuestion,
    ProcessClarification,
    // Agent -> Router (session stream, relay loop table in §4.2)
    ClassificationComplete,
    ClarificationQuestion,
    ClarificationStatus,
    StreamingChunk,
    StreamingComplete,
    AnswerResult,
    SummaryStart,
    SummaryProgress,
    SummaryComplete,
    Error,
    // Agent -> agent (broadcast, §4.1 "advisory hand-offs")
    NeedClarification,
    ReadyForAnswer,
    GenerateAnswer,
    ClarificationSufficient,
    GenerateSummary,
    UpdateSummary,
}

impl EnvelopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvelopeType::ClassifyQuestion => "classify_question",
            EnvelopeType::ProcessClarification => "process_clarification",
            EnvelopeType::ClassificationComplete => "classification_complete",
            EnvelopeType::ClarificationQuestion => "clarification_question",
            EnvelopeType::ClarificationStatus => "clarification_status",
            EnvelopeType::StreamingChunk => "streaming_chunk",
            EnvelopeType::StreamingComplete => "streaming_complete",
            EnvelopeType::AnswerResult => "answer_result",
            EnvelopeType::SummaryStart => "summary_start",
            EnvelopeType::SummaryProgress => "summary_progress",
            EnvelopeType::SummaryComplete => "summary_complete",
            EnvelopeType::Error => "error",
            EnvelopeType::NeedClarification => "need_clarification",
            EnvelopeType::ReadyForAnswer => "ready_for_answer",
            EnvelopeType::GenerateAnswer => "generate_answer",
            EnvelopeType::ClarificationSufficient => "clarification_sufficient",
            EnvelopeType::GenerateSummary => "generate_summary",
            EnvelopeType::UpdateSummary => "update_summary",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        Some(match s {
            "classify_question" => EnvelopeType::ClassifyQuestion,
            "process_clarification" => EnvelopeType::ProcessClarification,
            "classification_complete" => EnvelopeType::ClassificationComplete,
            "clarification_question" => EnvelopeType::ClarificationQuestion,
            "clarification_status" => EnvelopeType::ClarificationStatus,
            "streaming_chunk" => EnvelopeType::StreamingChunk,
            "streaming_complete" => EnvelopeType::StreamingComplete,
            "answer_result" => EnvelopeType::AnswerResult,
            "summary_start" => EnvelopeType::SummaryStart,
            "summary_progress" => EnvelopeType::SummaryProgress,
            "summary_complete" => EnvelopeType::SummaryComplete,
            "error" => EnvelopeType::Error,
            "need_clarification" => EnvelopeType::NeedClarification,
            "ready_for_answer" => EnvelopeType::ReadyForAnswer,
            "generate_answer" => EnvelopeType::GenerateAnswer,
            "clarification_sufficient" => EnvelopeType::ClarificationSufficient,
            "generate_summary" => EnvelopeType::GenerateSummary,
            "update_summary" => EnvelopeType::UpdateSummary,
            _ => return None,
        })
    }
}

/// A bus envelope: string->string fields plus a monotonic per-stream id
/// assigned on append. Nested structures (e.g. a classification result) are
/// JSON-encoded into a single field, matching §4.1.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub id: u64,
    pub fields: HashMap<String, String>,
}

impl Envelope {
    pub fn builder(envelope_type: EnvelopeType, session_id: i64, request_id: &str) -> EnvelopeBuilder {
        EnvelopeBuilder::new(envelope_type, session_id, request_id)
    }

    pub fn envelope_type(&self) -> Option<EnvelopeType> {
        self.fields.get("type").and_then(|s| EnvelopeType::from_str(s))
    }

    pub fn session_id(&self) -> Option<i64> {
        self.fields.get("session_id").and_then(|s| s.parse().ok())
    }

    pub fn request_id(&self) -> Option<&str> {
        self.fields.get("request_id").map(|s| s.as_str())
    }

    /// Empty string means "router-bound" per §4.1.
    pub fn target_agent(&self) -> &str {
        self.fields.get("target_agent").map(|s| s.as_str()).unwrap_or("")
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(|s| s.as_str())
    }

    pub fn field_bool(&self, key: &str) -> bool {
        self.field(key).map(|v| v.eq_ignore_ascii_case("true")).unwrap_or(false)
    }

    pub fn field_u64(&self, key: &str) -> Option<u64> {
        self.field(key).and_then(|v| v.parse().ok())
    }

    /// Decode a JSON-encoded field (§4.1: "nested structures are JSON-encoded").
    pub fn field_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.field(key).and_then(|v| serde_json::from_str(v).ok())
    }
}

pub struct EnvelopeBuilder {
    fields: HashMap<String, String>,
}

impl EnvelopeBuilder {
    pub fn new(envelope_type: EnvelopeType, session_id: i64, request_id: &str) -> Self {
        let mut fields = HashMap::new();
        fields.insert("type".to_string(), envelope_type.as_str().to_string());
        fields.insert("session_id".to_string(), session_id.to_string());
        fields.insert("request_id".to_string(), request_id.to_string());
        fields.insert("timestamp".to_string(), chrono::Utc::now().to_rfc3339());
        fields.insert("target_agent".to_string(), String::new());
        Self { fields }
    }

    pub fn target(mut self, agent: &str) -> Self {
        self.fields.insert("target_agent".to_string(), agent.to_string());
        self
    }

    pub fn field(mut self, key: &str, value: impl Into<String>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn field_bool(mut self, key: &str, value: bool) -> Self {
        self.fields.insert(key.to_string(), value.to_string());
        self
    }

    pub fn field_json<T: Serialize>(mut self, key: &str, value: &T) -> Self {
        let encoded = serde_json::to_string(value).unwrap_or_default();
        self.fields.insert(key.to_string(), encoded);
        self
    }

    /// Builds the envelope without an id; the bus assigns one on append.
    pub fn build(self) -> Envelope {
        Envelope { id: 0, fields: self.fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_type_round_trips() {
        for t in [
            EnvelopeType::ClassifyQuestion,
            EnvelopeType::StreamingChunk,
            EnvelopeType::SummaryComplete,
            EnvelopeType::NeedClarification,
        ] {
            assert_eq!(EnvelopeType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(EnvelopeType::from_str("nonsense"), None);
    }

    #[test]
    fn builder_sets_core_fields() {
        let env = Envelope::builder(EnvelopeType::StreamingChunk, 7, "req-1")
            .target("answer")
            .field("content", "hi")
            .field_bool("is_final", false)
            .build();
        assert_eq!(env.session_id(), Some(7));
        assert_eq!(env.request_id(), Some("req-1"));
        assert_eq!(env.target_agent(), "answer");
        assert_eq!(env.field("content"), Some("hi"));
        assert!(!env.field_bool("is_final"));
    }

    #[test]
    fn field_json_round_trips_nested_value() {
        #[derive(Serialize, serde::Deserialize, PartialEq, Debug)]
        struct Payload {
            a: u32,
        }
        let env = Envelope::builder(EnvelopeType::ClassificationComplete, 1, "r")
            .field_json("result", &Payload { a: 5 })
            .build();
        assert_eq!(env.field_json::<Payload>("result"), Some(Payload { a: 5 }));
    }
}
