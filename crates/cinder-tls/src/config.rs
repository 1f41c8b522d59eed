use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rustls::crypto::aws_lc_rs;
use rustls::{ServerConfig, SupportedProtocolVersion};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::error::TlsError;

/// 握手完成前是否向应用交付 `on_open`。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OpenPolicy {
    /// 握手完成后才交付 `on_open`，应用永远看不到未加密的连接。
    #[default]
    DeferUntilSecure,
    /// 连接接受后立即交付；握手完成前的写入进入有界队列，完成后加密发送。
    Immediate,
}

const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_EARLY_WRITE_LIMIT: usize = 64 * 1024;
const DEFAULT_SEND_BUFFER_LIMIT: usize = 64 * 1024;

/// 安全传输配置：证书链、私钥与协议参数，启动时构建一次，之后只读共享。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 每条连接的会话都引用同一个 `Arc<ServerConfig>`，既避免逐连接拷贝，也无需任何同步；
/// - 证书缺失或私钥不可用必须在接受连接之前失败。
///
/// ## 契约（What）
/// - [`TlsConfig::builder`] 构建时校验证书链非空、私钥可用、协议版本受支持；
/// - `handshake_timeout` 默认 10 秒，`None` 表示不限时；
/// - `early_write_limit` 仅在 [`OpenPolicy::Immediate`] 下生效；
/// - `send_buffer_limit` 透传给 `rustls::ServerConnection::set_buffer_limit`。
///
/// ## 风险与权衡（Trade-offs）
/// - 固定使用 `aws-lc-rs` 加密提供者，不依赖进程级默认提供者的安装顺序。
#[derive(Clone)]
pub struct TlsConfig {
    server: Arc<ServerConfig>,
    handshake_timeout: Option<Duration>,
    open_policy: OpenPolicy,
    early_write_limit: usize,
    send_buffer_limit: Option<usize>,
}

impl TlsConfig {
    pub fn builder() -> TlsConfigBuilder {
        TlsConfigBuilder::default()
    }

    /// 直接引用外部构建好的 `ServerConfig`，其余参数取默认值。
    pub fn from_server_config(server: Arc<ServerConfig>) -> Self {
        Self {
            server,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            open_policy: OpenPolicy::default(),
            early_write_limit: DEFAULT_EARLY_WRITE_LIMIT,
            send_buffer_limit: Some(DEFAULT_SEND_BUFFER_LIMIT),
        }
    }

    pub fn server_config(&self) -> &Arc<ServerConfig> {
        &self.server
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout
    }

    pub fn open_policy(&self) -> OpenPolicy {
        self.open_policy
    }

    pub fn early_write_limit(&self) -> usize {
        self.early_write_limit
    }

    pub fn send_buffer_limit(&self) -> Option<usize> {
        self.send_buffer_limit
    }

    pub fn with_handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_open_policy(mut self, policy: OpenPolicy) -> Self {
        self.open_policy = policy;
        self
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("alpn_protocols", &self.server.alpn_protocols.len())
            .field("handshake_timeout", &self.handshake_timeout)
            .field("open_policy", &self.open_policy)
            .field("early_write_limit", &self.early_write_limit)
            .field("send_buffer_limit", &self.send_buffer_limit)
            .finish()
    }
}

pub struct TlsConfigBuilder {
    chain: Vec<CertificateDer<'static>>,
    key: Option<PrivateKeyDer<'static>>,
    alpn_protocols: Vec<Vec<u8>>,
    versions: Vec<&'static SupportedProtocolVersion>,
    handshake_timeout: Option<Duration>,
    open_policy: OpenPolicy,
    early_write_limit: usize,
    send_buffer_limit: Option<usize>,
}

impl Default for TlsConfigBuilder {
    fn default() -> Self {
        Self {
            chain: Vec::new(),
            key: None,
            alpn_protocols: Vec::new(),
            versions: rustls::DEFAULT_VERSIONS.to_vec(),
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            open_policy: OpenPolicy::default(),
            early_write_limit: DEFAULT_EARLY_WRITE_LIMIT,
            send_buffer_limit: Some(DEFAULT_SEND_BUFFER_LIMIT),
        }
    }
}

impl TlsConfigBuilder {
    /// 证书链（叶证书在前）与匹配的私钥。
    pub fn certificate(
        mut self,
        chain: Vec<CertificateDer<'static>>,
        key: PrivateKeyDer<'static>,
    ) -> Self {
        self.chain = chain;
        self.key = Some(key);
        self
    }

    pub fn alpn_protocols<I, P>(mut self, protocols: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Vec<u8>>,
    {
        self.alpn_protocols = protocols.into_iter().map(Into::into).collect();
        self
    }

    pub fn protocol_versions(mut self, versions: &[&'static SupportedProtocolVersion]) -> Self {
        self.versions = versions.to_vec();
        self
    }

    pub fn handshake_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn open_policy(mut self, policy: OpenPolicy) -> Self {
        self.open_policy = policy;
        self
    }

    pub fn early_write_limit(mut self, limit: usize) -> Self {
        self.early_write_limit = limit;
        self
    }

    pub fn send_buffer_limit(mut self, limit: Option<usize>) -> Self {
        self.send_buffer_limit = limit;
        self
    }

    pub fn build(self) -> Result<TlsConfig, TlsError> {
        if self.chain.is_empty() {
            return Err(TlsError::configuration("certificate chain is empty", None));
        }
        let Some(key) = self.key else {
            return Err(TlsError::configuration("private key is missing", None));
        };
        if self.versions.is_empty() {
            return Err(TlsError::configuration(
                "at least one protocol version is required",
                None,
            ));
        }
        let provider = Arc::new(aws_lc_rs::default_provider());
        let mut server = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&self.versions)
            .map_err(|err| {
                TlsError::configuration("unsupported protocol versions", Some(err))
            })?
            .with_no_client_auth()
            .with_single_cert(self.chain, key)
            .map_err(|err| {
                TlsError::configuration("certificate or private key rejected", Some(err))
            })?;
        server.alpn_protocols = self.alpn_protocols;
        Ok(TlsConfig {
            server: Arc::new(server),
            handshake_timeout: self.handshake_timeout,
            open_policy: self.open_policy,
            early_write_limit: self.early_write_limit,
            send_buffer_limit: self.send_buffer_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use rustls_pki_types::PrivatePkcs8KeyDer;

    use super::*;

    fn self_signed() -> (CertificateDer<'static>, PrivateKeyDer<'static>) {
        let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_owned()])
            .expect("generate certificate");
        let key = PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der());
        (certified.cert.der().clone(), PrivateKeyDer::Pkcs8(key))
    }

    #[test]
    fn builds_with_defaults() {
        let (cert, key) = self_signed();
        let config = TlsConfig::builder()
            .certificate(vec![cert], key)
            .alpn_protocols(["http/1.1"])
            .build()
            .expect("valid config");
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.open_policy(), OpenPolicy::DeferUntilSecure);
        assert_eq!(config.server_config().alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn empty_chain_fails_fast() {
        let (_, key) = self_signed();
        let err = TlsConfig::builder()
            .certificate(Vec::new(), key)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "cinder.tls.configuration_invalid");
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn missing_key_fails_fast() {
        let err = TlsConfig::builder().build().unwrap_err();
        assert_eq!(err.code(), "cinder.tls.configuration_invalid");
    }

    #[test]
    fn unusable_key_fails_fast() {
        let (cert, _) = self_signed();
        let garbage = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(vec![0u8; 32]));
        let err = TlsConfig::builder()
            .certificate(vec![cert], garbage)
            .build()
            .unwrap_err();
        assert!(matches!(err, TlsError::Configuration { source: Some(_), .. }));
    }

    #[test]
    fn shared_config_is_referenced_not_copied() {
        let (cert, key) = self_signed();
        let config = TlsConfig::builder()
            .certificate(vec![cert], key)
            .build()
            .unwrap();
        let clone = config.clone().with_handshake_timeout(None);
        assert!(Arc::ptr_eq(config.server_config(), clone.server_config()));
        assert_eq!(clone.handshake_timeout(), None);
    }
}
