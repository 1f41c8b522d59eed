//! 测试辅助：不依赖套接字的内存连接。
//!
//! 上层 crate（例如 TLS 会话包装器）用它逐字节喂入密文、取出待发送字节，
//! 从而在确定性的单线程环境里驱动回调。

use std::net::SocketAddr;

use bytes::Bytes;

use crate::conn::{BufferedConn, ConnId};

/// 内存连接与引擎内置连接共享同一实现，只是缓冲由测试直接读写。
pub type MemoryConn = BufferedConn;

impl BufferedConn {
    pub fn memory(id: u64) -> Self {
        Self::new(
            ConnId::new(id),
            Some(SocketAddr::from(([127, 0, 0, 1], 443))),
            Some(SocketAddr::from(([127, 0, 0, 1], 50_000))),
            4096,
        )
    }

    /// 模拟“对端的字节到达”。
    pub fn push_inbound(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// 模拟“引擎把出站缓冲刷到套接字”。
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Conn;

    #[test]
    fn memory_conn_moves_bytes_both_ways() {
        let mut conn = MemoryConn::memory(1);
        conn.push_inbound(b"ping");
        assert_eq!(conn.inbound_buffered(), 4);
        conn.write(b"pong").unwrap();
        assert_eq!(&conn.take_outbound()[..], b"pong");
        assert_eq!(conn.outbound_buffered(), 0);
    }
}
