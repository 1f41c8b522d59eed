use cinder_engine::{Action, CloseCause, Conn, EventHandler};
use tracing::{debug, info, warn};

/// 对任意请求的固定应答。
pub const HELLO_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 12\r\n\r\nHello world!";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// 最小 HTTPS 应答器：入站缓冲出现 `\r\n\r\n` 后丢弃全部已缓冲字节并回复 [`HELLO_RESPONSE`]。
///
/// 不解析请求行与请求体；只用于演示包装器之上的应用仍按明文协议编写。
#[derive(Debug, Default)]
pub struct HelloHttpServer;

impl HelloHttpServer {
    fn request_complete(conn: &dyn Conn) -> bool {
        conn.peek(conn.inbound_buffered())
            .is_some_and(|buf| buf.windows(HEADER_TERMINATOR.len()).any(|w| w == HEADER_TERMINATOR))
    }
}

impl EventHandler for HelloHttpServer {
    fn on_traffic(&self, conn: &mut dyn Conn) -> Action {
        if !Self::request_complete(conn) {
            return Action::None;
        }
        let n = conn.inbound_buffered();
        conn.discard(n);
        match conn.write(HELLO_RESPONSE) {
            Ok(_) => Action::None,
            Err(err) => {
                warn!(conn = %conn.id(), error = %err, "response write failed");
                Action::Close
            }
        }
    }

    fn on_close(&self, conn: &mut dyn Conn, cause: Option<CloseCause>) -> Action {
        match cause {
            Some(cause) => info!(peer = ?conn.peer_addr(), error = %cause, "connection closed"),
            None => debug!(peer = ?conn.peer_addr(), "connection closed"),
        }
        Action::None
    }
}

#[cfg(test)]
mod tests {
    use cinder_engine::MemoryConn;

    use super::*;

    #[test]
    fn waits_for_the_full_header_block() {
        let server = HelloHttpServer;
        let mut conn = MemoryConn::memory(1);
        conn.push_inbound(b"GET / HTTP/1.1\r\nHost: x\r\n");
        assert_eq!(server.on_traffic(&mut conn), Action::None);
        assert_eq!(conn.outbound_buffered(), 0);

        conn.push_inbound(b"\r\n");
        assert_eq!(server.on_traffic(&mut conn), Action::None);
        assert_eq!(conn.inbound_buffered(), 0);
        assert_eq!(&conn.take_outbound()[..], HELLO_RESPONSE);
    }
}
