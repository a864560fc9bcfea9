use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::engine::{ChatSession, ImageAttachment, Message};

/// 全局共享状态：
/// - session: 唯一的远端对话
/// - pending: 每个浏览器会话暂存的下一条消息 / 图片
pub struct AppState {
    pub config: RelayConfig,
    pub session: Arc<dyn ChatSession>,
    pub pending: PendingStore,
}

impl AppState {
    pub fn new(config: RelayConfig, session: Arc<dyn ChatSession>) -> Self {
        Self {
            session,
            pending: PendingStore::new(config.pending_ttl(), config.max_pending_sessions),
            config,
        }
    }

    /// 后台任务驱动远端发送，返回的 receiver 被 drop 时任务会自行结束
    pub fn open_stream(&self, message: Message) -> mpsc::Receiver<String> {
        let (sender, receiver) = mpsc::channel(self.config.stream_buffer.max(1));
        let session = Arc::clone(&self.session);

        tokio::spawn(async move {
            if let Err(e) = session.send_message_stream(message, sender).await {
                log::error!("stream relay failed: {e}");
            }
        });

        receiver
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub message: Option<String>,
    pub image: Option<ImageAttachment>,
}

impl PendingRequest {
    fn is_empty(&self) -> bool {
        self.message.is_none() && self.image.is_none()
    }
}

/// session id -> 暂存槽位；写入覆盖，读取即清空。
/// 不带 cookie 的客户端每次都是新 id，所以写入时顺带淘汰过期和最旧的槽位
#[derive(Debug)]
pub struct PendingStore {
    ttl: Duration,
    max_sessions: usize,
    slots: Mutex<HashMap<String, Slot>>,
}

#[derive(Debug)]
struct Slot {
    request: PendingRequest,
    touched: Instant,
}

impl Default for PendingStore {
    fn default() -> Self {
        let config = RelayConfig::default();
        Self::new(config.pending_ttl(), config.max_pending_sessions)
    }
}

impl PendingStore {
    pub fn new(ttl: Duration, max_sessions: usize) -> Self {
        Self {
            ttl,
            max_sessions: max_sessions.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn stage_message(&self, session_id: &str, message: String) {
        self.with_slot(session_id, |request| {
            request.message = Some(message);
        });
    }

    /// 返回被覆盖的旧图片（如果有）
    pub fn stage_image(&self, session_id: &str, image: ImageAttachment) -> Option<ImageAttachment> {
        self.with_slot(session_id, |request| request.image.replace(image))
    }

    /// 有图：发 [文本, 图]，只清图；否则发文本并清文本。都没有返回 None
    pub fn take(&self, session_id: &str) -> Option<Message> {
        let mut guard = self.slots.lock();
        let slot = guard.get_mut(session_id)?;
        if slot.touched.elapsed() >= self.ttl {
            guard.remove(session_id);
            return None;
        }

        let request = &mut slot.request;
        let message = match request.image.take() {
            Some(image) => {
                let text = request.message.clone().unwrap_or_default();
                Some(Message::with_image(text, image))
            }
            None => request.message.take().map(Message::text),
        };

        if request.is_empty() {
            guard.remove(session_id);
        }
        message
    }

    fn with_slot<T>(&self, session_id: &str, update: impl FnOnce(&mut PendingRequest) -> T) -> T {
        let mut guard = self.slots.lock();
        let ttl = self.ttl;
        guard.retain(|_, slot| slot.touched.elapsed() < ttl);

        if !guard.contains_key(session_id) {
            while guard.len() >= self.max_sessions {
                let Some(oldest) = guard
                    .iter()
                    .min_by_key(|(_, slot)| slot.touched)
                    .map(|(id, _)| id.clone())
                else {
                    break;
                };
                log::debug!("evicting staged request for session {oldest}");
                guard.remove(&oldest);
            }
        }

        let slot = guard.entry(session_id.to_string()).or_insert_with(|| Slot {
            request: PendingRequest::default(),
            touched: Instant::now(),
        });
        slot.touched = Instant::now();
        update(&mut slot.request)
    }

    #[cfg(test)]
    pub fn peek(&self, session_id: &str) -> Option<PendingRequest> {
        self.slots.lock().get(session_id).map(|slot| slot.request.clone())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }
}
