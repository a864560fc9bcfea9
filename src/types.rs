use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    pub filename: String,
}

/// message 不限类型，非字符串按 JSON 文本暂存
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: Option<serde_json::Value>,
}

impl ChatRequest {
    pub fn into_text(self) -> Option<String> {
        match self.message? {
            serde_json::Value::Null => None,
            serde_json::Value::String(text) => Some(text),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub success: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
}

impl GenerateRequest {
    /// 先 input 后 prompt，取第一个非空的
    pub fn into_prompt(self) -> Option<String> {
        self.input
            .filter(|s| !s.is_empty())
            .or(self.prompt.filter(|s| !s.is_empty()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FailureResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_non_empty_prompt_wins() {
        let req = |input: Option<&str>, prompt: Option<&str>| GenerateRequest {
            input: input.map(str::to_string),
            prompt: prompt.map(str::to_string),
        };

        assert_eq!(req(Some("a"), Some("b")).into_prompt().as_deref(), Some("a"));
        assert_eq!(req(Some(""), Some("b")).into_prompt().as_deref(), Some("b"));
        assert_eq!(req(None, Some("b")).into_prompt().as_deref(), Some("b"));
        assert_eq!(req(Some(""), Some("")).into_prompt(), None);
        assert_eq!(req(None, None).into_prompt(), None);
    }

    #[test]
    fn chat_message_accepts_any_json_value() {
        let parse = |body: &str| serde_json::from_str::<ChatRequest>(body).unwrap().into_text();

        assert_eq!(parse(r#"{"message":"hi"}"#).as_deref(), Some("hi"));
        assert_eq!(parse(r#"{"message":""}"#).as_deref(), Some(""));
        assert_eq!(parse(r#"{"message":42}"#).as_deref(), Some("42"));
        assert_eq!(parse(r#"{"message":null}"#), None);
        assert_eq!(parse(r#"{}"#), None);
    }
}
