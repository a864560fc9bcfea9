use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{EngineKind, RelayConfig};
use crate::gemini::GeminiSession;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("missing API key: {0}")]
    Auth(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("provider error: {0}")]
    Provider(String),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

/// 上传后解码过的图片，原始字节照发给远端
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    pub filename: String,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// 一次发送：文本 + 可选图片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub text: String,
    pub image: Option<ImageAttachment>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn with_image(text: impl Into<String>, image: ImageAttachment) -> Self {
        Self {
            text: text.into(),
            image: Some(image),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

/// 对话历史中的一轮
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub parts: Vec<Part>,
}

impl Turn {
    pub fn user(message: Message) -> Self {
        let mut parts = Vec::with_capacity(2);
        // 空文本不单独成 part，远端不接受空 text
        if !message.text.is_empty() {
            parts.push(Part::Text(message.text));
        }
        if let Some(image) = message.image {
            parts.push(Part::Image {
                mime_type: image.mime_type,
                data: image.bytes,
            });
        }
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(text: String) -> Self {
        Self {
            role: Role::Model,
            parts: vec![Part::Text(text)],
        }
    }
}

/// 有状态的远端对话：发送一条消息，把回复按 chunk 推到 sender
#[async_trait]
pub trait ChatSession: Send + Sync {
    /// receiver 被 drop（客户端断开）时应尽快返回 Ok(())
    async fn send_message_stream(
        &self,
        message: Message,
        sender: mpsc::Sender<String>,
    ) -> Result<(), EngineError>;

    fn history(&self) -> Vec<Turn>;
}

/// 按配置创建全局唯一的对话
pub fn connect(config: &RelayConfig) -> anyhow::Result<Arc<dyn ChatSession>> {
    let session: Arc<dyn ChatSession> = match config.engine {
        EngineKind::Gemini => {
            if config.api_key.is_empty() {
                log::warn!("GOOGLE_API_KEY is not set, every send will fail");
            }
            GeminiSession::new(config)?
        }
        EngineKind::Dummy => DummySession::new(&config.model),
    };
    log::info!("chat session ready: {:?} / {}", config.engine, config.model);
    Ok(session)
}

/// 把流式回复收成一整段文本；超时后 drop 掉 producer，远端请求随之取消
pub async fn collect_reply(
    session: &dyn ChatSession,
    message: Message,
    limit: Duration,
    capacity: usize,
) -> Result<String, EngineError> {
    let (sender, mut receiver) = mpsc::channel(capacity.max(1));

    let produce = session.send_message_stream(message, sender);
    let drain = async move {
        let mut text = String::new();
        while let Some(chunk) = receiver.recv().await {
            text.push_str(&chunk);
        }
        text
    };

    let joined = async {
        let (sent, text) = tokio::join!(produce, drain);
        sent.map(|()| text)
    };

    tokio::time::timeout(limit, joined)
        .await
        .map_err(|_| EngineError::Timeout(limit))?
}

/// Dummy 实现：回显输入，按词切片发送
pub struct DummySession {
    pub model_name: String,
    history: RwLock<Vec<Turn>>,
}

impl DummySession {
    pub fn new(model_name: &str) -> Arc<Self> {
        Arc::new(Self {
            model_name: model_name.to_string(),
            history: RwLock::new(Vec::new()),
        })
    }

    fn reply_for(&self, message: &Message) -> String {
        match &message.image {
            Some(image) => format!(
                "[{} DUMMY] {} (image {} {}x{})",
                self.model_name, message.text, image.filename, image.width, image.height
            ),
            None => format!("[{} DUMMY] {}", self.model_name, message.text),
        }
    }
}

#[async_trait]
impl ChatSession for DummySession {
    async fn send_message_stream(
        &self,
        message: Message,
        sender: mpsc::Sender<String>,
    ) -> Result<(), EngineError> {
        let full = self.reply_for(&message);

        // 保留词后面的空格，拼回去和 full 一致
        for word in full.split_inclusive(' ') {
            if sender.send(word.to_string()).await.is_err() {
                // 客户端断开连接
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let mut history = self.history.write();
        history.push(Turn::user(message));
        history.push(Turn::model(full));
        Ok(())
    }

    fn history(&self) -> Vec<Turn> {
        self.history.read().clone()
    }
}
