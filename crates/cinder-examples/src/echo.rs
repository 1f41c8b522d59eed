use std::sync::atomic::{AtomicU64, Ordering};

use cinder_engine::{Action, CloseCause, Conn, EventHandler};
use tracing::{debug, info, warn};

use crate::frame;

/// 分帧回显处理器：每收齐一帧，原样写回“帧头 + 负载”。
///
/// 处理器只面对明文；是否经过 TLS 由启动时是否提供 `TlsConfig` 决定。
#[derive(Debug, Default)]
pub struct EchoServer {
    frames: AtomicU64,
}

impl EchoServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames_echoed(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl EventHandler for EchoServer {
    fn on_open(&self, conn: &mut dyn Conn) -> Action {
        debug!(conn = %conn.id(), peer = ?conn.peer_addr(), "echo connection opened");
        Action::None
    }

    fn on_traffic(&self, conn: &mut dyn Conn) -> Action {
        loop {
            let body = match frame::decode(conn) {
                Ok(Some(body)) => body,
                Ok(None) => return Action::None,
                Err(err) => {
                    warn!(conn = %conn.id(), code = err.code(), error = %err, "malformed frame");
                    return Action::Close;
                }
            };
            info!(conn = %conn.id(), body = %String::from_utf8_lossy(&body), "frame received");
            let header = frame::header(body.len());
            if let Err(err) = conn.writev(&[&header[..], &body[..]]) {
                warn!(conn = %conn.id(), error = %err, "echo write failed");
                return Action::Close;
            }
            self.frames.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn on_close(&self, conn: &mut dyn Conn, cause: Option<CloseCause>) -> Action {
        debug!(
            conn = %conn.id(),
            peer = ?conn.peer_addr(),
            cause = ?cause.map(|c| c.to_string()),
            "echo connection closed"
        );
        Action::None
    }
}
