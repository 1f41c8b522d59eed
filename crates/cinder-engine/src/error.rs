use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// 事件引擎的启动与运行期错误。
///
/// # 教案式说明
/// - **意图 (Why)**：引擎的失败集中在启动阶段（地址、选项、绑定、线程），
///   以 fail-fast 方式在接受任何连接之前暴露；
/// - **契约 (What)**：每个变体通过 [`EngineError::code`] 提供稳定错误码，
///   便于运维脚本与测试按码断言而无需解析文案；
/// - **风险 (Trade-offs)**：单条连接的 IO 失败不属于此类，它们以关闭原因的形式
///   传给 [`EventHandler::on_close`](crate::EventHandler::on_close)。
#[derive(Debug, Error)]
pub enum EngineError {
    /// 监听地址无法解析或使用了不支持的协议前缀。
    #[error("invalid listen address `{addr}`: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// 引擎选项自相矛盾（零缓冲、水位倒置等）。
    #[error("invalid engine options: {0}")]
    InvalidOptions(&'static str),

    /// 绑定或监听失败。
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// 构建分片运行时失败。
    #[error("failed to build shard runtime: {0}")]
    Runtime(#[source] io::Error),

    /// 创建分片或接收线程失败。
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] io::Error),

    /// 接收线程在退出前发生 panic。
    #[error("engine supervisor thread panicked")]
    ThreadPanicked,
}

impl EngineError {
    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAddress { .. } => "cinder.engine.invalid_address",
            Self::InvalidOptions(_) => "cinder.engine.invalid_options",
            Self::Bind { .. } => "cinder.engine.bind_failed",
            Self::Runtime(_) => "cinder.engine.runtime_failed",
            Self::Spawn(_) => "cinder.engine.spawn_failed",
            Self::ThreadPanicked => "cinder.engine.thread_panicked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_namespaced() {
        let err = EngineError::InvalidOptions("read_buffer_size must be non-zero");
        assert_eq!(err.code(), "cinder.engine.invalid_options");
        assert!(err.to_string().contains("read_buffer_size"));

        let err = EngineError::Bind {
            addr: "127.0.0.1:1".parse().unwrap(),
            source: io::Error::from(io::ErrorKind::AddrInUse),
        };
        assert_eq!(err.code(), "cinder.engine.bind_failed");
        assert!(std::error::Error::source(&err).is_some());
    }
}
