//! Google Gemini 对话实现。
//!
//! 每次发送都带上完整历史调用 `streamGenerateContent?alt=sse`，
//! 回复按 SSE 行解析后逐块推给调用方，整轮结束才写入历史。

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{Stream, StreamExt};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::engine::{ChatSession, EngineError, Message, Part, Turn};

pub struct GeminiSession {
    api_key: String,
    model: String,
    api_base: String,
    client: Client,
    history: RwLock<Vec<Turn>>,
}

#[derive(Serialize)]
struct GeminiRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Serialize)]
struct GeminiContent<'a> {
    role: &'a str,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiPart<'a> {
    Text { text: &'a str },
    InlineData { inline_data: GeminiBlob<'a> },
}

#[derive(Serialize)]
struct GeminiBlob<'a> {
    mime_type: &'a str,
    data: String,
}

impl<'a> From<&'a Turn> for GeminiContent<'a> {
    fn from(turn: &'a Turn) -> Self {
        let parts = turn
            .parts
            .iter()
            .map(|part| match part {
                Part::Text(text) => GeminiPart::Text { text },
                Part::Image { mime_type, data } => GeminiPart::InlineData {
                    inline_data: GeminiBlob {
                        mime_type,
                        data: STANDARD.encode(data),
                    },
                },
            })
            .collect();

        Self {
            role: turn.role.as_str(),
            parts,
        }
    }
}

/// SSE 每个 data 行里的一个 JSON 块
#[derive(Debug, Deserialize)]
struct GeminiStreamChunk {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    error: Option<GeminiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

impl GeminiSession {
    pub fn new(config: &RelayConfig) -> anyhow::Result<Arc<Self>> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Arc::new(Self {
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client,
            history: RwLock::new(Vec::new()),
        }))
    }

    fn stream_url(&self) -> String {
        format!(
            "{base}/models/{model}:streamGenerateContent?alt=sse&key={key}",
            base = self.api_base,
            model = self.model,
            key = self.api_key
        )
    }
}

/// 解析一行 SSE；非 data 行、空文本返回 None
fn parse_sse_line(line: &str) -> Result<Option<String>, EngineError> {
    let line = line.trim();
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(None);
    };
    let data = data.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    let chunk: GeminiStreamChunk = serde_json::from_str(data)?;
    if let Some(error) = chunk.error {
        return Err(EngineError::Provider(format!(
            "{} ({})",
            error.message, error.code
        )));
    }

    let text: String = chunk
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect()
        })
        .unwrap_or_default();

    Ok((!text.is_empty()).then_some(text))
}

/// 把 SSE 字节流切成行，逐块转发文本。
/// 返回整段回复；receiver 提前 drop 时返回 None
async fn relay_sse_body<S, B, E>(
    bytes: S,
    sender: &mpsc::Sender<String>,
) -> Result<Option<String>, EngineError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Into<EngineError>,
{
    let mut bytes = Box::pin(bytes);
    // 按字节攒行，避免多字节字符被 chunk 边界切开
    let mut pending: Vec<u8> = Vec::new();
    let mut reply = String::new();

    loop {
        let next = bytes.next().await;
        let finished = next.is_none();
        match next {
            Some(chunk) => {
                let chunk = chunk.map_err(Into::<EngineError>::into)?;
                pending.extend_from_slice(chunk.as_ref());
            }
            // 收尾：最后一行可能没有换行
            None => pending.push(b'\n'),
        }

        while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = pending.drain(..=pos).collect();
            let Some(text) = parse_sse_line(&String::from_utf8_lossy(&line))? else {
                continue;
            };
            reply.push_str(&text);
            if sender.send(text).await.is_err() {
                return Ok(None);
            }
        }

        if finished {
            return Ok(Some(reply));
        }
    }
}

#[async_trait]
impl ChatSession for GeminiSession {
    async fn send_message_stream(
        &self,
        message: Message,
        sender: mpsc::Sender<String>,
    ) -> Result<(), EngineError> {
        if self.api_key.is_empty() {
            return Err(EngineError::Auth("GOOGLE_API_KEY is not set".to_string()));
        }

        let user_turn = Turn::user(message);
        let request = {
            let history = self.history.read();
            let contents = history
                .iter()
                .chain(std::iter::once(&user_turn))
                .map(GeminiContent::from)
                .collect();
            self.client
                .post(self.stream_url())
                .json(&GeminiRequest { contents })
        };

        let resp = request.send().await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EngineError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let Some(reply) = relay_sse_body(resp.bytes_stream(), &sender).await? else {
            log::debug!("stream receiver dropped, abandoning Gemini response");
            return Ok(());
        };

        let mut history = self.history.write();
        history.push(user_turn);
        history.push(Turn::model(reply));
        Ok(())
    }

    fn history(&self) -> Vec<Turn> {
        self.history.read().clone()
    }
}
