use std::io;
use std::sync::Arc;
use std::time::Duration;

use rustls::Error as RustlsError;
use thiserror::Error;

/// TLS 会话的终止性错误。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 将 `rustls`/IO 层的失败收敛为一组终止性语义：握手失败、握手被拒、握手超时、
///   记录认证失败、协议违规、链条耗尽与配置错误；
/// - 提供稳定错误码（`cinder.tls.*`），测试与运维脚本按码定位问题，而无需解析底层库细节。
///
/// ## 逻辑（How）
/// - 会话驱动层根据“失败发生时是否仍在握手”以及 `rustls::Error` 的具体变体选择变体，
///   见 [`TlsError::from_engine`]。
///
/// ## 契约（What）
/// - 除 `NeedMoreData`（不属于本类型，只存在于步骤链与适配器边界内）外，所有变体对受影响的
///   连接都是终止性的，且从不影响同分片的其他连接；
/// - `Configuration` 只在启动阶段出现；
/// - 类型实现 `Clone`，使步骤链能够把同一个粘性错误反复返回。
///
/// ## 风险与权衡（Trade-offs）
/// - `Io` 以 `Arc` 包裹 `io::Error` 以满足 `Clone`，代价是一次额外分配。
#[derive(Clone, Debug, Error)]
pub enum TlsError {
    /// 握手期间的畸形消息、不支持的参数或认证失败。
    #[error("tls handshake failed: {0}")]
    HandshakeFailed(#[source] RustlsError),

    /// 握手尚未开始或无法继续：首条记录不是 TLS 握手、对端中途断开、会话创建失败。
    #[error("tls handshake rejected: {reason}")]
    HandshakeRejected { reason: String },

    #[error("tls handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// 握手完成后有记录未通过认证；该批次的明文一个字节也不会交付。
    #[error("tls record failed authentication: {0}")]
    RecordAuthenticationFailed(#[source] RustlsError),

    /// 握手完成后的其他协议违规。
    #[error("tls protocol violation: {0}")]
    Protocol(#[source] RustlsError),

    #[error("handshake step chain driven past completion")]
    Exhausted,

    #[error("invalid tls configuration: {reason}")]
    Configuration {
        reason: String,
        #[source]
        source: Option<RustlsError>,
    },

    #[error("tls io: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl TlsError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::HandshakeFailed(_) => "cinder.tls.handshake_failed",
            Self::HandshakeRejected { .. } => "cinder.tls.handshake_rejected",
            Self::HandshakeTimeout(_) => "cinder.tls.handshake_timeout",
            Self::RecordAuthenticationFailed(_) => "cinder.tls.record_authentication_failed",
            Self::Protocol(_) => "cinder.tls.protocol_violation",
            Self::Exhausted => "cinder.tls.chain_exhausted",
            Self::Configuration { .. } => "cinder.tls.configuration_invalid",
            Self::Io(_) => "cinder.tls.io_failed",
        }
    }

    /// 按失败发生的阶段把 `rustls::Error` 归入对应变体。
    pub(crate) fn from_engine(error: RustlsError, handshaking: bool) -> Self {
        if handshaking {
            return Self::HandshakeFailed(error);
        }
        match error {
            RustlsError::DecryptError | RustlsError::PeerSentOversizedRecord => {
                Self::RecordAuthenticationFailed(error)
            }
            other => Self::Protocol(other),
        }
    }

    pub(crate) fn rejected(reason: impl Into<String>) -> Self {
        Self::HandshakeRejected {
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>, source: Option<RustlsError>) -> Self {
        Self::Configuration {
            reason: reason.into(),
            source,
        }
    }

    /// 握手相关的失败（含超时与拒绝）。
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed(_) | Self::HandshakeRejected { .. } | Self::HandshakeTimeout(_)
        )
    }
}

impl From<io::Error> for TlsError {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

/// 单个步骤执行的结果分类。
///
/// - `NeedMoreData`：暂时性，缓冲字节不足以完成当前步骤；位置保持不变，等待下一次数据到达；
/// - `Exhausted`：链条已被驱动越过终点，属于调用方的契约违规；
/// - `Failed`：终止性失败，会成为链条的粘性错误。
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StepError<E> {
    #[error("need more data")]
    NeedMoreData,
    #[error("step chain exhausted")]
    Exhausted,
    #[error("step failed: {0}")]
    Failed(E),
}

impl<E> StepError<E> {
    pub fn is_need_more_data(&self) -> bool {
        matches!(self, Self::NeedMoreData)
    }
}

impl From<TlsError> for StepError<TlsError> {
    fn from(error: TlsError) -> Self {
        Self::Failed(error)
    }
}

impl<E> From<NeedMoreData> for StepError<E> {
    fn from(_: NeedMoreData) -> Self {
        Self::NeedMoreData
    }
}

/// 连接适配器缓冲的字节少于当前步骤所需。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("need {needed} buffered bytes, {buffered} available")]
pub struct NeedMoreData {
    pub needed: usize,
    pub buffered: usize,
}

/// 链条开始执行后再追加步骤。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("cannot append step `{step}`: chain already started executing")]
pub struct ChainSealed {
    pub step: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_handshake_decrypt_errors_are_record_failures() {
        let err = TlsError::from_engine(RustlsError::DecryptError, false);
        assert!(matches!(err, TlsError::RecordAuthenticationFailed(_)));
        assert_eq!(err.code(), "cinder.tls.record_authentication_failed");
        assert!(!err.is_handshake());
    }

    #[test]
    fn errors_during_handshake_are_handshake_failures() {
        let err = TlsError::from_engine(RustlsError::DecryptError, true);
        assert!(matches!(err, TlsError::HandshakeFailed(_)));
        assert!(err.is_handshake());
    }

    #[test]
    fn other_post_handshake_errors_are_protocol_violations() {
        let err = TlsError::from_engine(RustlsError::General("boom".into()), false);
        assert_eq!(err.code(), "cinder.tls.protocol_violation");
    }

    #[test]
    fn display_carries_reason() {
        let err = TlsError::rejected("first record type 0x47 is not a tls handshake");
        assert!(err.to_string().contains("0x47"));
        let err = TlsError::HandshakeTimeout(Duration::from_secs(3));
        assert_eq!(err.code(), "cinder.tls.handshake_timeout");
        assert!(err.to_string().contains("3s"));
    }

    #[test]
    fn need_more_data_converts_into_step_error() {
        let err: StepError<TlsError> = NeedMoreData {
            needed: 5,
            buffered: 1,
        }
        .into();
        assert!(err.is_need_more_data());
    }
}
