use cinder_engine::{Engine, EngineError, EngineHandle, EngineOptions, EventHandler};
use tracing::info;

use crate::config::TlsConfig;
use crate::wrapper::TlsWrapper;

/// 启动服务器。
///
/// # 契约（What）
/// - `tls = Some(config)`：应用处理器被 [`TlsWrapper`] 包裹，所有连接先完成握手；
/// - `tls = None`：显式直通，处理器直接交给引擎，不安装任何拦截层；
/// - 证书与私钥的校验已在 [`TlsConfig`] 构建时完成，这里只会因引擎启动失败而返回错误。
pub fn start<H: EventHandler>(
    handler: H,
    addr: &str,
    tls: Option<TlsConfig>,
    options: EngineOptions,
) -> Result<EngineHandle, EngineError> {
    match tls {
        Some(config) => {
            info!(addr, "starting with tls enabled");
            Engine::start(TlsWrapper::new(handler, config), addr, options)
        }
        None => {
            info!(addr, "starting without tls");
            Engine::start(handler, addr, options)
        }
    }
}

/// 启动服务器并阻塞到引擎停机。
pub fn run<H: EventHandler>(
    handler: H,
    addr: &str,
    tls: Option<TlsConfig>,
    options: EngineOptions,
) -> Result<(), EngineError> {
    start(handler, addr, tls, options)?.wait()
}
