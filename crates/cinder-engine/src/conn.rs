use std::any::{Any, TypeId};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};

/// 连接标识，进程内单调递增。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(u64);

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

impl ConnId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub(crate) fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// 回调中可见的连接视图。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 回调只看到“已缓冲的字节”与“待刷新的字节”，从不直接接触套接字，
///   因此任何方法都不会阻塞；
/// - 对象安全，使装饰器（例如 TLS 会话包装器）可以用自己的实现替换原始连接，
///   而应用回调的签名保持不变。
///
/// ## 契约（What）
/// - `peek(n)` / `next(n)`：缓冲不足 `n` 字节时返回 `None`，且不消费任何字节；
/// - `read(buf)`：拷贝并消费至多 `buf.len()` 字节，返回拷贝数量（缓冲为空时为 0）；
/// - `write` / `writev`：追加到出站缓冲，由引擎异步刷新，返回被接受的字节数；
/// - 上下文槽只有一个；装饰器若占用它，需要向内层回调提供自己的槽；
/// - `extension` 允许按类型暴露附加事实，默认不提供任何扩展。
///
/// ## 风险与权衡（Trade-offs）
/// - 上下文以 `Box<dyn Any>` 保存，取用时需要一次向下转型。
pub trait Conn {
    fn id(&self) -> ConnId;

    fn local_addr(&self) -> Option<SocketAddr>;

    fn peer_addr(&self) -> Option<SocketAddr>;

    /// 入站缓冲中尚未消费的字节数。
    fn inbound_buffered(&self) -> usize;

    fn peek(&self, n: usize) -> Option<&[u8]>;

    fn next(&mut self, n: usize) -> Option<Bytes>;

    /// 丢弃至多 `n` 个入站字节，返回实际丢弃数量。
    fn discard(&mut self, n: usize) -> usize;

    fn read(&mut self, buf: &mut [u8]) -> usize;

    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// 依次写入多个切片；遇到部分接受时停止并返回已接受总数。
    fn writev(&mut self, bufs: &[&[u8]]) -> io::Result<usize> {
        let mut total = 0;
        for buf in bufs {
            let written = self.write(buf)?;
            total += written;
            if written < buf.len() {
                break;
            }
        }
        Ok(total)
    }

    fn outbound_buffered(&self) -> usize;

    fn context(&self) -> Option<&dyn Any>;

    fn context_mut(&mut self) -> Option<&mut dyn Any>;

    /// 替换上下文并返回旧值。
    fn set_context(&mut self, context: Option<Box<dyn Any>>) -> Option<Box<dyn Any>>;

    fn deadline(&self) -> Option<Instant>;

    /// 设置（或清除）截止时间；到期时引擎清除它并调用一次 `on_deadline`。
    fn set_deadline(&mut self, deadline: Option<Instant>);

    fn extension(&self, _type_id: TypeId) -> Option<&dyn Any> {
        None
    }
}

/// 按类型查询连接扩展。
pub fn conn_extension<T: Any>(conn: &dyn Conn) -> Option<&T> {
    conn.extension(TypeId::of::<T>())
        .and_then(|value| value.downcast_ref::<T>())
}

/// 引擎内置的缓冲连接：分片驱动任务持有套接字，回调只操作这里的缓冲。
pub struct BufferedConn {
    id: ConnId,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    pub(crate) inbound: BytesMut,
    pub(crate) outbound: BytesMut,
    context: Option<Box<dyn Any>>,
    deadline: Option<Instant>,
}

impl BufferedConn {
    pub(crate) fn new(
        id: ConnId,
        local_addr: Option<SocketAddr>,
        peer_addr: Option<SocketAddr>,
        read_capacity: usize,
    ) -> Self {
        Self {
            id,
            local_addr,
            peer_addr,
            inbound: BytesMut::with_capacity(read_capacity),
            outbound: BytesMut::new(),
            context: None,
            deadline: None,
        }
    }

    pub(crate) fn take_deadline(&mut self) -> Option<Instant> {
        self.deadline.take()
    }
}

impl fmt::Debug for BufferedConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedConn")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .field("has_context", &self.context.is_some())
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Conn for BufferedConn {
    fn id(&self) -> ConnId {
        self.id
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    fn inbound_buffered(&self) -> usize {
        self.inbound.len()
    }

    fn peek(&self, n: usize) -> Option<&[u8]> {
        self.inbound.get(..n)
    }

    fn next(&mut self, n: usize) -> Option<Bytes> {
        if self.inbound.len() < n {
            return None;
        }
        Some(self.inbound.split_to(n).freeze())
    }

    fn discard(&mut self, n: usize) -> usize {
        let n = n.min(self.inbound.len());
        self.inbound.advance(n);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.inbound.len());
        buf[..n].copy_from_slice(&self.inbound[..n]);
        self.inbound.advance(n);
        n
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.outbound.extend_from_slice(data);
        Ok(data.len())
    }

    fn outbound_buffered(&self) -> usize {
        self.outbound.len()
    }

    fn context(&self) -> Option<&dyn Any> {
        self.context.as_deref()
    }

    fn context_mut(&mut self) -> Option<&mut dyn Any> {
        self.context.as_deref_mut()
    }

    fn set_context(&mut self, context: Option<Box<dyn Any>>) -> Option<Box<dyn Any>> {
        std::mem::replace(&mut self.context, context)
    }

    fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        self.deadline = deadline;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn() -> BufferedConn {
        BufferedConn::new(ConnId::new(7), None, None, 64)
    }

    #[test]
    fn peek_and_next_require_full_length() {
        let mut c = conn();
        c.inbound.extend_from_slice(b"hello");
        assert_eq!(c.peek(3), Some(&b"hel"[..]));
        assert_eq!(c.peek(6), None);
        assert_eq!(c.next(6), None);
        assert_eq!(c.inbound_buffered(), 5);
        assert_eq!(c.next(2).as_deref(), Some(&b"he"[..]));
        assert_eq!(c.inbound_buffered(), 3);
    }

    #[test]
    fn read_consumes_and_discard_clamps() {
        let mut c = conn();
        c.inbound.extend_from_slice(b"abcdef");
        let mut buf = [0u8; 4];
        assert_eq!(c.read(&mut buf), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(c.discard(10), 2);
        assert_eq!(c.read(&mut buf), 0);
    }

    #[test]
    fn writev_appends_in_order() {
        let mut c = conn();
        let n = c.writev(&[&b"ab"[..], &b""[..], &b"cd"[..]]).expect("writev");
        assert_eq!(n, 4);
        assert_eq!(&c.outbound[..], b"abcd");
        assert_eq!(c.outbound_buffered(), 4);
    }

    #[test]
    fn context_slot_round_trips() {
        let mut c = conn();
        assert!(c.set_context(Some(Box::new(5u32))).is_none());
        *c.context_mut().and_then(|v| v.downcast_mut::<u32>()).unwrap() += 1;
        let old = c.set_context(None).expect("previous context");
        assert_eq!(*old.downcast::<u32>().unwrap(), 6);
    }

    #[test]
    fn no_extensions_by_default() {
        let c = conn();
        assert!(conn_extension::<u32>(&c).is_none());
        assert_eq!(c.id().to_string(), "conn-7");
    }
}
