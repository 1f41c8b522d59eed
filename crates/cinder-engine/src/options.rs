use std::num::NonZeroUsize;
use std::thread;
use std::time::Duration;

use serde::Deserialize;

use crate::error::EngineError;

/// 引擎级选项。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 把分片数量、缓冲尺寸、水位线与套接字选项集中到一个可反序列化的结构，
///   示例程序可直接从 TOML 中加载；
/// - `validate` 在启动阶段拦截自相矛盾的组合，保持 fail-fast。
///
/// ## 契约（What）
/// - `shards = 0` 表示按可用并行度自动选择；
/// - `outbound_low_watermark < outbound_high_watermark`，出站缓冲超过高水位时暂停读取，
///   回落到低水位以下再恢复；
/// - `tcp_keepalive_secs = None` 表示不设置 keepalive；
/// - `close_linger_ms` 是关闭前尽力刷新出站缓冲的上限。
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOptions {
    pub shards: usize,
    pub read_buffer_size: usize,
    pub outbound_high_watermark: usize,
    pub outbound_low_watermark: usize,
    pub tcp_nodelay: bool,
    pub tcp_keepalive_secs: Option<u64>,
    pub reuse_port: bool,
    pub backlog: u32,
    pub close_linger_ms: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            shards: 0,
            read_buffer_size: 16 * 1024,
            outbound_high_watermark: 1024 * 1024,
            outbound_low_watermark: 256 * 1024,
            tcp_nodelay: true,
            tcp_keepalive_secs: None,
            reuse_port: false,
            backlog: 1024,
            close_linger_ms: 200,
        }
    }
}

impl EngineOptions {
    /// 以多核模式运行：分片数等于可用并行度。
    pub fn multicore(mut self, enabled: bool) -> Self {
        self.shards = if enabled { 0 } else { 1 };
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_tcp_keepalive(mut self, period: Option<Duration>) -> Self {
        self.tcp_keepalive_secs = period.map(|d| d.as_secs().max(1));
        self
    }

    pub fn with_reuse_port(mut self, enabled: bool) -> Self {
        self.reuse_port = enabled;
        self
    }

    /// 校验选项一致性。
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.read_buffer_size == 0 {
            return Err(EngineError::InvalidOptions(
                "read_buffer_size must be non-zero",
            ));
        }
        if self.outbound_high_watermark == 0 {
            return Err(EngineError::InvalidOptions(
                "outbound_high_watermark must be non-zero",
            ));
        }
        if self.outbound_low_watermark >= self.outbound_high_watermark {
            return Err(EngineError::InvalidOptions(
                "outbound_low_watermark must be below outbound_high_watermark",
            ));
        }
        if self.backlog == 0 {
            return Err(EngineError::InvalidOptions("backlog must be non-zero"));
        }
        Ok(())
    }

    /// 实际使用的分片数量。
    pub fn effective_shards(&self) -> usize {
        if self.shards > 0 {
            return self.shards;
        }
        thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }

    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive_secs.map(Duration::from_secs)
    }

    pub fn close_linger(&self) -> Duration {
        Duration::from_millis(self.close_linger_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let options = EngineOptions::default();
        options.validate().expect("defaults validate");
        assert!(options.effective_shards() >= 1);
    }

    #[test]
    fn inverted_watermarks_are_rejected() {
        let options = EngineOptions {
            outbound_high_watermark: 1024,
            outbound_low_watermark: 1024,
            ..EngineOptions::default()
        };
        let err = options.validate().unwrap_err();
        assert_eq!(err.code(), "cinder.engine.invalid_options");
    }

    #[test]
    fn zero_read_buffer_is_rejected() {
        let options = EngineOptions {
            read_buffer_size: 0,
            ..EngineOptions::default()
        };
        assert!(options.validate().is_err());
    }

    #[test]
    fn multicore_toggles_shard_selection() {
        assert_eq!(EngineOptions::default().multicore(false).effective_shards(), 1);
        assert_eq!(EngineOptions::default().with_shards(3).effective_shards(), 3);
    }

    #[test]
    fn deserializes_partial_toml() {
        let options: EngineOptions = toml::from_str(
            r#"
            shards = 2
            tcp_keepalive_secs = 300
            reuse_port = true
            "#,
        )
        .expect("parse options");
        assert_eq!(options.shards, 2);
        assert_eq!(options.tcp_keepalive(), Some(Duration::from_secs(300)));
        assert!(options.reuse_port);
        assert_eq!(options.read_buffer_size, EngineOptions::default().read_buffer_size);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<EngineOptions, _> = toml::from_str("shard = 2");
        assert!(parsed.is_err());
    }
}
