//! 服务端握手子步骤。
//!
//! 三个步骤对应服务端视角的三个往返阶段；每个步骤在目标尚未达成时返回
//! `NeedMoreData`，由包装器在下一次数据到达时从同一步骤继续。

use crate::chain::{Step, StepChain};
use crate::error::{StepError, TlsError};
use crate::session::SessionIo;

/// TLS 记录层 `ContentType::Handshake`。
const HANDSHAKE_RECORD: u8 = 0x16;

pub(crate) type HandshakeChain = StepChain<SessionIo, TlsError>;
type HandshakeStep = Step<SessionIo, TlsError>;

pub(crate) fn server_handshake_chain() -> HandshakeChain {
    StepChain::from_steps([
        ("client_hello", Box::new(client_hello) as HandshakeStep),
        ("server_flight", Box::new(server_flight) as HandshakeStep),
        ("client_finished", Box::new(client_finished) as HandshakeStep),
    ])
}

/// 接收 ClientHello，直到会话产生第一组服务端消息。
fn client_hello(io: &mut SessionIo) -> Result<(), StepError<TlsError>> {
    if io.adapter.consumed() == 0 {
        let first = io.adapter.peek(1)?;
        if first[0] != HANDSHAKE_RECORD {
            return Err(TlsError::rejected(format!(
                "first record type 0x{:02x} is not a tls handshake",
                first[0]
            ))
            .into());
        }
    }
    io.pump()?;
    if io.tls.wants_write() || !io.is_handshaking() {
        return Ok(());
    }
    if io.peer_closed {
        return Err(TlsError::rejected("peer closed during client hello").into());
    }
    Err(StepError::NeedMoreData)
}

/// 把服务端消息移入出站缓冲；不需要任何入站字节。
fn server_flight(io: &mut SessionIo) -> Result<(), StepError<TlsError>> {
    io.flush_tls()?;
    Ok(())
}

/// 接收客户端剩余握手消息（含 HelloRetryRequest 之后的第二个 ClientHello 与 TLS 1.2
/// 的额外往返），直到会话离开握手阶段。
fn client_finished(io: &mut SessionIo) -> Result<(), StepError<TlsError>> {
    io.pump()?;
    io.flush_tls()?;
    if !io.is_handshaking() {
        return Ok(());
    }
    if io.peer_closed {
        return Err(TlsError::rejected("peer closed before finishing the handshake").into());
    }
    Err(StepError::NeedMoreData)
}
