use std::io;

use bytes::{Buf, Bytes, BytesMut};

use crate::error::NeedMoreData;

/// 连接适配器：把引擎的非阻塞缓冲伪装成同步读写端点。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 安全会话引擎按“读 N 字节、写 M 字节”的同步语义编写，而引擎只交付“刚到了一些字节”；
///   适配器是两者之间唯一的接缝，保证每次调用要么取得进展，要么明确报告 `NeedMoreData`，
///   从不真正阻塞，也从不用短读伪装流结束。
///
/// ## 逻辑（How）
/// - 入站缓冲由包装器在每次数据到达回调中通过 [`absorb`](Self::absorb) 追加；
/// - `io::Read` 在缓冲为空时返回 `ErrorKind::WouldBlock`（`NeedMoreData` 的 io 形态），
///   绝不返回 `Ok(0)`，否则会话引擎会把它解读为 EOF；
/// - `io::Write` 总是全部接受，字节由包装器通过 [`take_outbound`](Self::take_outbound)
///   移入引擎出站缓冲，真正的套接字背压由引擎的写就绪机制处理。
///
/// ## 契约（What）
/// - 已消费的字节从缓冲中移除，后续调用永远不会重放；
/// - 只修改所属连接自己的缓冲，因此无需任何锁；
/// - `consumed`/`produced` 累计经过适配器的字节数。
#[derive(Debug, Default)]
pub struct ConnectionAdapter {
    inbound: BytesMut,
    outbound: BytesMut,
    consumed: u64,
    produced: u64,
}

impl ConnectionAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加刚从引擎到达的密文。
    pub fn absorb(&mut self, bytes: &[u8]) {
        self.inbound.extend_from_slice(bytes);
    }

    /// 尚未被消费的入站字节数。
    pub fn buffered(&self) -> usize {
        self.inbound.len()
    }

    /// 返回至多 `max` 个已缓冲字节；缓冲为空时报告 `NeedMoreData`。
    pub fn read_up_to(&mut self, max: usize) -> Result<Bytes, NeedMoreData> {
        if max == 0 {
            return Ok(Bytes::new());
        }
        if self.inbound.is_empty() {
            return Err(self.shortfall(1));
        }
        let n = max.min(self.inbound.len());
        Ok(self.take_inbound(n))
    }

    /// 恰好取出 `n` 个字节；不足时不消费任何字节并报告 `NeedMoreData`。
    pub fn read_exact_or_wait(&mut self, n: usize) -> Result<Bytes, NeedMoreData> {
        if self.inbound.len() < n {
            return Err(self.shortfall(n));
        }
        Ok(self.take_inbound(n))
    }

    /// 查看前 `n` 个字节而不消费。
    pub fn peek(&self, n: usize) -> Result<&[u8], NeedMoreData> {
        self.inbound.get(..n).ok_or_else(|| self.shortfall(n))
    }

    /// 追加待发送字节。
    pub fn write(&mut self, bytes: &[u8]) {
        self.outbound.extend_from_slice(bytes);
        self.produced += bytes.len() as u64;
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// 取走全部待发送字节，交给引擎出站缓冲。
    pub fn take_outbound(&mut self) -> Bytes {
        self.outbound.split().freeze()
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub fn produced(&self) -> u64 {
        self.produced
    }

    fn take_inbound(&mut self, n: usize) -> Bytes {
        self.consumed += n as u64;
        self.inbound.split_to(n).freeze()
    }

    fn shortfall(&self, needed: usize) -> NeedMoreData {
        NeedMoreData {
            needed,
            buffered: self.inbound.len(),
        }
    }
}

impl io::Read for ConnectionAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.inbound.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        self.consumed += n as u64;
        Ok(n)
    }
}

impl io::Write for ConnectionAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        ConnectionAdapter::write(self, buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use super::*;

    #[test]
    fn empty_buffer_reports_would_block_not_eof() {
        let mut adapter = ConnectionAdapter::new();
        let mut buf = [0u8; 8];
        let err = Read::read(&mut adapter, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
        assert_eq!(
            adapter.read_up_to(8).unwrap_err(),
            NeedMoreData {
                needed: 1,
                buffered: 0
            }
        );
    }

    #[test]
    fn short_buffer_waits_without_consuming() {
        let mut adapter = ConnectionAdapter::new();
        adapter.absorb(b"abc");
        let err = adapter.read_exact_or_wait(5).unwrap_err();
        assert_eq!(err.needed, 5);
        assert_eq!(err.buffered, 3);
        assert_eq!(adapter.buffered(), 3);
        assert!(adapter.peek(4).is_err());

        adapter.absorb(b"de");
        assert_eq!(&adapter.read_exact_or_wait(5).unwrap()[..], b"abcde");
        assert_eq!(adapter.consumed(), 5);
    }

    #[test]
    fn consumed_bytes_are_never_replayed() {
        let mut adapter = ConnectionAdapter::new();
        adapter.absorb(b"0123456789");
        let mut buf = [0u8; 4];
        assert_eq!(Read::read(&mut adapter, &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(&adapter.read_up_to(100).unwrap()[..], b"456789");
        assert!(adapter.read_up_to(1).is_err());
        assert_eq!(adapter.consumed(), 10);
    }

    #[test]
    fn writes_always_succeed_and_drain_once() {
        let mut adapter = ConnectionAdapter::new();
        assert_eq!(Write::write(&mut adapter, b"hello ").unwrap(), 6);
        adapter.write(b"world");
        assert_eq!(adapter.pending_outbound(), 11);
        assert_eq!(&adapter.take_outbound()[..], b"hello world");
        assert_eq!(adapter.pending_outbound(), 0);
        assert!(adapter.take_outbound().is_empty());
        assert_eq!(adapter.produced(), 11);
    }
}
