use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cinder_engine::EngineOptions;
use cinder_tls::{TlsConfig, TlsError};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crate::keys::{self, KeyMaterial};

const DEFAULT_LISTEN: &str = "tcp://0.0.0.0:443";
const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(5 * 60);
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// 示例服务器的 TOML 配置。
///
/// ```toml
/// listen = "tcp://0.0.0.0:8443"
///
/// [engine]
/// shards = 4
/// tcp_keepalive_secs = 300
///
/// [tls]
/// cert_path = "server.crt"
/// key_path = "server.key"
/// alpn = ["http/1.1"]
/// ```
///
/// 缺省时监听 443 端口、开启 5 分钟 TCP keepalive 与 `SO_REUSEPORT`，
/// 并使用现场生成的 `localhost` 自签名证书。显式给出 `[engine]` 表时，
/// 未列出的字段取引擎自身的默认值。
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub listen: String,
    pub engine: EngineOptions,
    /// 为 `None` 时以明文直通方式启动。
    pub tls: Option<TlsSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_owned(),
            engine: EngineOptions::default()
                .with_tcp_keepalive(Some(DEFAULT_KEEPALIVE))
                .with_reuse_port(true),
            tls: Some(TlsSettings::default()),
        }
    }
}

impl Settings {
    pub fn from_toml_str(raw: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// 只替换端口，监听所有地址。
    pub fn with_port(mut self, port: u16) -> Self {
        self.listen = format!("tcp://0.0.0.0:{port}");
        self
    }

    pub fn engine_options(&self) -> EngineOptions {
        self.engine.clone()
    }

    /// 加载证书并构建 TLS 配置；未配置 `[tls]` 时返回 `None`。
    pub fn tls_config(&self) -> Result<Option<TlsConfig>, SettingsError> {
        let Some(tls) = &self.tls else {
            return Ok(None);
        };
        let material = tls.key_material()?;
        tls.build(&material).map(Some)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSettings {
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// 未给出证书路径时，为这些主机名生成自签名证书。
    pub self_signed_names: Vec<String>,
    pub alpn: Vec<String>,
    /// 0 表示不限制握手时长。
    pub handshake_timeout_ms: u64,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            cert_path: None,
            key_path: None,
            self_signed_names: vec!["localhost".to_owned()],
            alpn: Vec::new(),
            handshake_timeout_ms: DEFAULT_HANDSHAKE_TIMEOUT_MS,
        }
    }
}

impl TlsSettings {
    pub fn key_material(&self) -> Result<KeyMaterial, SettingsError> {
        match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => keys::load(cert, key),
            (None, None) => {
                warn!(
                    names = ?self.self_signed_names,
                    "no certificate configured, generating a self-signed one"
                );
                keys::self_signed(&self.self_signed_names)
            }
            _ => Err(SettingsError::IncompleteKeyPair),
        }
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        (self.handshake_timeout_ms > 0).then(|| Duration::from_millis(self.handshake_timeout_ms))
    }

    pub fn build(&self, material: &KeyMaterial) -> Result<TlsConfig, SettingsError> {
        let config = TlsConfig::builder()
            .certificate(material.chain.clone(), material.key.clone_key())
            .alpn_protocols(self.alpn.iter().map(|p| p.as_bytes().to_vec()))
            .handshake_timeout(self.handshake_timeout())
            .build()?;
        Ok(config)
    }
}

/// 配置加载错误。
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid settings")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read pem file {path}")]
    Pem {
        path: PathBuf,
        #[source]
        source: rustls_pki_types::pem::Error,
    },
    #[error("no certificates found in {path}")]
    EmptyChain { path: PathBuf },
    #[error("cert_path and key_path must be given together")]
    IncompleteKeyPair,
    #[error("failed to generate a self-signed certificate")]
    SelfSigned(#[from] rcgen::Error),
    #[error(transparent)]
    Tls(#[from] TlsError),
}

impl SettingsError {
    pub fn code(&self) -> &'static str {
        match self {
            SettingsError::Read { .. } => "cinder.examples.settings_unreadable",
            SettingsError::Parse(_) => "cinder.examples.settings_invalid",
            SettingsError::Pem { .. } => "cinder.examples.settings_pem_invalid",
            SettingsError::EmptyChain { .. } => "cinder.examples.settings_empty_chain",
            SettingsError::IncompleteKeyPair => "cinder.examples.settings_incomplete_key_pair",
            SettingsError::SelfSigned(_) => "cinder.examples.settings_self_signed_failed",
            SettingsError::Tls(err) => err.code(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_the_reference_servers() {
        let settings = Settings::default();
        assert_eq!(settings.listen, "tcp://0.0.0.0:443");
        assert_eq!(settings.engine.tcp_keepalive(), Some(DEFAULT_KEEPALIVE));
        assert!(settings.engine.reuse_port);
        let tls = settings.tls.as_ref().unwrap();
        assert_eq!(tls.handshake_timeout(), Some(Duration::from_secs(10)));
    }

    #[test]
    fn parses_a_full_file() {
        let settings = Settings::from_toml_str(
            r#"
            listen = "127.0.0.1:8443"

            [engine]
            shards = 2

            [tls]
            alpn = ["h2", "http/1.1"]
            handshake_timeout_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(settings.listen, "127.0.0.1:8443");
        assert_eq!(settings.engine.shards, 2);
        let tls = settings.tls.unwrap();
        assert_eq!(tls.alpn, vec!["h2", "http/1.1"]);
        assert_eq!(tls.handshake_timeout(), None);
        assert_eq!(tls.self_signed_names, vec!["localhost"]);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = Settings::from_toml_str("lisen = \"x\"").unwrap_err();
        assert_eq!(err.code(), "cinder.examples.settings_invalid");
    }

    #[test]
    fn half_a_key_pair_is_rejected() {
        let tls = TlsSettings {
            cert_path: Some(PathBuf::from("server.crt")),
            ..TlsSettings::default()
        };
        let err = tls.key_material().unwrap_err();
        assert_eq!(err.code(), "cinder.examples.settings_incomplete_key_pair");
    }

    #[test]
    fn self_signed_material_builds_a_tls_config() {
        let settings = Settings::default().with_port(8443);
        assert_eq!(settings.listen, "tcp://0.0.0.0:8443");
        let config = settings.tls_config().unwrap().expect("tls enabled");
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(10)));
    }
}
