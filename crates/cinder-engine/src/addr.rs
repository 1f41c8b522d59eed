use std::net::{SocketAddr, ToSocketAddrs};

use crate::error::EngineError;

const TCP_SCHEME: &str = "tcp://";

/// 解析监听地址。
///
/// # 教案级注释
///
/// ## 契约（What）
/// - 接受 `tcp://host:port` 与裸 `host:port` 两种写法，`host` 可以是域名；
/// - 其他协议前缀（`udp://`、`unix://` 等）返回 [`EngineError::InvalidAddress`]；
/// - 域名解析出多个地址时取第一个。
///
/// ## 风险与权衡（Trade-offs）
/// - 域名解析是阻塞调用，只应在启动阶段使用。
pub fn resolve_listen_addr(addr: &str) -> Result<SocketAddr, EngineError> {
    let trimmed = addr.trim();
    let host_port = match trimmed.split_once("://") {
        None => trimmed,
        Some(_) if trimmed.starts_with(TCP_SCHEME) => &trimmed[TCP_SCHEME.len()..],
        Some((scheme, _)) => {
            return Err(EngineError::InvalidAddress {
                addr: addr.to_owned(),
                reason: format!("unsupported scheme `{scheme}`"),
            });
        }
    };
    if host_port.is_empty() {
        return Err(EngineError::InvalidAddress {
            addr: addr.to_owned(),
            reason: "missing host and port".to_owned(),
        });
    }
    let mut candidates = host_port
        .to_socket_addrs()
        .map_err(|err| EngineError::InvalidAddress {
            addr: addr.to_owned(),
            reason: err.to_string(),
        })?;
    candidates.next().ok_or_else(|| EngineError::InvalidAddress {
        addr: addr.to_owned(),
        reason: "host resolved to no addresses".to_owned(),
    })
}
