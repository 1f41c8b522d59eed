//! 回显自测客户端：阻塞式 rustls 客户端，周期性发送 `HelloWorld` 帧并校验回显。

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use rustls::crypto::aws_lc_rs;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use rustls_pki_types::{CertificateDer, ServerName};
use tracing::info;

use crate::frame::{self, HEADER_LEN};

pub const PAYLOAD: &[u8] = b"HelloWorld";

/// 发送一帧并读回一帧负载。
pub fn exchange<S: Read + Write>(stream: &mut S, payload: &[u8]) -> io::Result<Bytes> {
    stream.write_all(&frame::encode(payload))?;
    stream.flush()?;
    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let total = frame::declared_len(&header)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?
        .unwrap_or(HEADER_LEN);
    let mut body = vec![0u8; total - HEADER_LEN];
    stream.read_exact(&mut body)?;
    Ok(Bytes::from(body))
}

/// 只信任给定证书的客户端配置。
pub fn client_config(
    trusted: &[CertificateDer<'static>],
) -> Result<Arc<ClientConfig>, rustls::Error> {
    let mut roots = RootCertStore::empty();
    for cert in trusted {
        roots.add(cert.clone())?;
    }
    let config = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

pub fn connect(
    addr: SocketAddr,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> io::Result<StreamOwned<ClientConnection, TcpStream>> {
    let name = ServerName::try_from(server_name.to_owned())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let session = ClientConnection::new(config, name).map_err(io::Error::other)?;
    let socket = TcpStream::connect(addr)?;
    Ok(StreamOwned::new(session, socket))
}

/// 每隔 `interval` 交换一帧；`rounds` 为 `None` 时一直运行到出错。
pub fn run<S: Read + Write>(
    stream: &mut S,
    interval: Duration,
    rounds: Option<usize>,
) -> io::Result<()> {
    let mut sent = 0usize;
    while rounds.is_none_or(|limit| sent < limit) {
        let reply = exchange(stream, PAYLOAD)?;
        if reply != PAYLOAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "echo reply does not match the request",
            ));
        }
        info!(reply = %String::from_utf8_lossy(&reply), "read from server");
        sent += 1;
        thread::sleep(interval);
    }
    Ok(())
}
