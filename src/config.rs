use std::time::Duration;

use rocket::figment::Figment;
use serde::Deserialize;

/// 选择哪种 ChatSession 实现
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Gemini,
    /// 不连远端，按词回显，方便本地调前端
    Dummy,
}

/// 从 Rocket.toml / ROCKET_* / .env 中读出的服务配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub engine: EngineKind,
    pub model: String,
    pub api_base: String,
    pub api_key: String,
    pub request_timeout_secs: u64,
    /// producer -> SSE 之间 channel 的容量
    pub stream_buffer: usize,
    /// 暂存槽位多久没动就丢弃
    pub pending_ttl_secs: u64,
    /// 最多同时保留多少个会话的暂存
    pub max_pending_sessions: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            engine: EngineKind::Gemini,
            model: "gemini-2.5-flash".to_string(),
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key: String::new(),
            request_timeout_secs: 120,
            stream_buffer: 32,
            pending_ttl_secs: 600,
            max_pending_sessions: 256,
        }
    }
}

impl RelayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

/// Rocket 默认 figment，再叠加 .env 里的 GOOGLE_API_KEY
pub fn figment() -> Figment {
    if let Err(e) = dotenvy::dotenv() {
        // 没有 .env 很正常，直接用进程环境变量
        log::debug!("no .env loaded: {e}");
    }

    let figment = rocket::Config::figment();
    match std::env::var("GOOGLE_API_KEY") {
        Ok(key) => figment.merge(("api_key", key)),
        Err(_) => figment,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_keys() {
        let config: RelayConfig = Figment::new()
            .merge(("model", "gemini-2.0-flash"))
            .extract()
            .expect("config should extract");

        assert_eq!(config.model, "gemini-2.0-flash");
        assert_eq!(config.engine, EngineKind::Gemini);
        assert_eq!(config.request_timeout(), Duration::from_secs(120));
        assert!(config.api_key.is_empty());
    }

    #[test]
    fn engine_kind_is_lowercase() {
        let config: RelayConfig = Figment::new()
            .merge(("engine", "dummy"))
            .extract()
            .expect("config should extract");

        assert_eq!(config.engine, EngineKind::Dummy);
    }
}
