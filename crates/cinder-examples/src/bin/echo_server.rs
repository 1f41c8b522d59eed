//! 分帧回显服务器。
//!
//! # 使用方法
//! ```bash
//! cargo run --bin echo_server -- --port 8443 --config echo.toml
//! ```
//! - `--config`：可选，TOML 配置（见 `cinder_examples::Settings`）；缺省使用自签名证书；
//! - `--port` / `--multicore`：覆盖配置文件中的监听端口与分片策略；
//! - `--plaintext`：不安装 TLS 包装器，处理器直接接入引擎；
//! - `--self-test=false`：关闭启动一秒后连接自身的自测客户端。

use std::env;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use cinder_examples::cli::{ServerArgs, USAGE};
use cinder_examples::{EchoServer, Settings, selftest, telemetry};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    telemetry::init().context("install tracing subscriber")?;
    let args = ServerArgs::parse(env::args().skip(1)).map_err(|err| anyhow!("{err}\n{USAGE}"))?;
    let settings = match &args.config {
        Some(path) => Settings::load(path)
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => Settings::default(),
    };
    let settings = args.apply(settings);

    let material = settings
        .tls
        .as_ref()
        .map(|tls| tls.key_material())
        .transpose()
        .context("load key material")?;
    let tls = match (&settings.tls, &material) {
        (Some(tls), Some(material)) => Some(tls.build(material).context("build tls config")?),
        _ => None,
    };

    let handle = cinder_tls::start(
        EchoServer::new(),
        &settings.listen,
        tls,
        settings.engine_options(),
    )
    .with_context(|| format!("start echo server on {}", settings.listen))?;
    let port = handle.local_addr().port();
    info!(addr = %handle.local_addr(), "echo server listening");

    if args.self_test {
        let trusted = material.map(|m| m.chain).unwrap_or_default();
        thread::Builder::new()
            .name("echo-self-test".to_owned())
            .spawn(move || {
                thread::sleep(Duration::from_secs(1));
                if let Err(err) = self_test(SocketAddr::from(([127, 0, 0, 1], port)), &trusted) {
                    error!(error = %err, "self-test client stopped");
                }
            })
            .context("spawn self-test client")?;
    }

    handle.wait().context("echo server terminated")
}

fn self_test(addr: SocketAddr, trusted: &[rustls_pki_types::CertificateDer<'static>]) -> Result<()> {
    if trusted.is_empty() {
        warn!("tls disabled, self-test client speaks plaintext");
        let mut stream = std::net::TcpStream::connect(addr)?;
        selftest::run(&mut stream, Duration::from_secs(1), None)?;
        return Ok(());
    }
    let config = selftest::client_config(trusted)?;
    let mut stream = selftest::connect(addr, config, "localhost")?;
    selftest::run(&mut stream, Duration::from_secs(1), None)?;
    Ok(())
}
