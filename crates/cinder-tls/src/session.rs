use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::BytesMut;
use rustls::{CipherSuite, ProtocolVersion, ServerConfig, ServerConnection};
use tracing::trace;

use crate::adapter::ConnectionAdapter;
use crate::error::TlsError;

const PLAINTEXT_CHUNK: usize = 16 * 1024;

/// 连接的握手状态。`Complete` 与 `Failed` 对握手步骤而言都是汇点。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    /// 会话已创建，尚未收到任何字节。
    Pending,
    InProgress,
    Complete,
    Failed,
}

/// 握手完成时协商出的会话参数。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NegotiatedSession {
    pub protocol_version: Option<ProtocolVersion>,
    pub cipher_suite: Option<CipherSuite>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub server_name: Option<String>,
}

/// 单条连接的安全会话及其适配器。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `rustls::ServerConnection` 本身不做 IO，这里把它与 [`ConnectionAdapter`] 绑在一起，
///   提供握手步骤与记录收发所需的全部原语；
/// - 握手步骤以 `&mut SessionIo` 为上下文执行，闭包无需持有会话引用。
///
/// ## 逻辑（How）
/// - [`pump`](Self::pump)：循环 `read_tls` → `process_new_packets` → 取出明文，直到适配器为空；
///   失败时回滚本批次已解出的明文；
/// - [`flush_tls`](Self::flush_tls)：把会话待发送的记录全部写入适配器出站缓冲；
/// - [`seal`](Self::seal)：部分接受的加密写入，每接受一段即刻封装并移出，直到全部接受。
///
/// ## 契约（What）
/// - `plaintext` 只保存已通过认证的明文；
/// - `peer_closed` 在收到对端 close_notify 后置位。
pub(crate) struct SessionIo {
    pub(crate) tls: ServerConnection,
    pub(crate) adapter: ConnectionAdapter,
    pub(crate) plaintext: BytesMut,
    pub(crate) peer_closed: bool,
}

impl SessionIo {
    pub(crate) fn new(
        config: Arc<ServerConfig>,
        send_buffer_limit: Option<usize>,
    ) -> Result<Self, TlsError> {
        let mut tls = ServerConnection::new(config)
            .map_err(|err| TlsError::rejected(format!("failed to create session: {err}")))?;
        tls.set_buffer_limit(send_buffer_limit);
        Ok(Self {
            tls,
            adapter: ConnectionAdapter::new(),
            plaintext: BytesMut::new(),
            peer_closed: false,
        })
    }

    pub(crate) fn is_handshaking(&self) -> bool {
        self.tls.is_handshaking()
    }

    /// 把适配器中的全部密文交给会话处理。
    pub(crate) fn pump(&mut self) -> Result<(), TlsError> {
        let mark = self.plaintext.len();
        let result = self.pump_inner();
        if result.is_err() {
            self.plaintext.truncate(mark);
        }
        result
    }

    fn pump_inner(&mut self) -> Result<(), TlsError> {
        while self.adapter.buffered() > 0 {
            match self.tls.read_tls(&mut self.adapter) {
                Ok(0) => break,
                Ok(n) => trace!(bytes = n, "ciphertext fed to session"),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) => return Err(err.into()),
            }
            let handshaking = self.tls.is_handshaking();
            let state = self
                .tls
                .process_new_packets()
                .map_err(|err| TlsError::from_engine(err, handshaking))?;
            if state.peer_has_closed() {
                self.peer_closed = true;
            }
            self.drain_plaintext()?;
        }
        Ok(())
    }

    fn drain_plaintext(&mut self) -> Result<(), TlsError> {
        let mut chunk = [0u8; PLAINTEXT_CHUNK];
        loop {
            match self.tls.reader().read(&mut chunk) {
                Ok(0) => {
                    self.peer_closed = true;
                    return Ok(());
                }
                Ok(n) => self.plaintext.extend_from_slice(&chunk[..n]),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// 把会话待发送的记录写入适配器，返回写入的字节数。
    pub(crate) fn flush_tls(&mut self) -> Result<usize, TlsError> {
        let mut total = 0;
        while self.tls.wants_write() {
            total += self.tls.write_tls(&mut self.adapter)?;
        }
        Ok(total)
    }

    /// 加密应用明文，返回被会话接受的字节数。
    pub(crate) fn seal(&mut self, data: &[u8]) -> Result<usize, TlsError> {
        let mut offset = 0;
        while offset < data.len() {
            let accepted = self.tls.writer().write(&data[offset..])?;
            offset += accepted;
            let flushed = self.flush_tls()?;
            if accepted == 0 && flushed == 0 {
                break;
            }
        }
        Ok(offset)
    }

    pub(crate) fn send_close_notify(&mut self) -> Result<(), TlsError> {
        self.tls.send_close_notify();
        self.flush_tls().map(|_| ())
    }

    pub(crate) fn negotiated(&self) -> NegotiatedSession {
        NegotiatedSession {
            protocol_version: self.tls.protocol_version(),
            cipher_suite: self
                .tls
                .negotiated_cipher_suite()
                .map(|suite| suite.suite()),
            alpn_protocol: self.tls.alpn_protocol().map(<[u8]>::to_vec),
            server_name: self.tls.server_name().map(str::to_owned),
        }
    }
}
