use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ===== REQUEST MODELS =====

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifyRequest {
    pub text: String,
    #[serde(rename = "sessionID", alias = "session_id", alias = "sessionId")]
    pub session_id: String,
    /// Copied onto the session's property bag before classification.
    #[serde(default)]
    pub properties: Option<Map<String, Value>>,
}

impl ClassifyRequest {
    pub fn new(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: session_id.into(),
            properties: None,
        }
    }
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResponse {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
    pub message: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_accepts_session_id_spellings() {
        let a: ClassifyRequest =
            serde_json::from_str(r#"{"text":"hola","sessionID":"s1"}"#).unwrap();
        let b: ClassifyRequest =
            serde_json::from_str(r#"{"text":"hola","session_id":"s1"}"#).unwrap();
        assert_eq!(a.session_id, "s1");
        assert_eq!(b.session_id, "s1");
        assert!(a.properties.is_none());
    }

    #[test]
    fn test_response_omits_missing_keywords() {
        let resp = ClassifyResponse {
            action: "mensaje".into(),
            keywords: None,
            message: "ok".into(),
            status: "success".into(),
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action":"mensaje","message":"ok","status":"success"})
        );
    }
}
