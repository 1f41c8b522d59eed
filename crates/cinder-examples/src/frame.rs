//! 长度前缀分帧：`[总长度: u32 小端][负载]`，总长度包含 4 字节头部自身。

use bytes::{BufMut, Bytes, BytesMut};
use cinder_engine::Conn;
use thiserror::Error;

pub const HEADER_LEN: usize = 4;

/// 单帧上限，超出视为对端异常。
pub const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("declared frame length {declared} is shorter than the header")]
    Undersized { declared: u32 },
    #[error("declared frame length {declared} exceeds the {max} byte limit")]
    Oversized { declared: u32, max: usize },
}

impl FrameError {
    pub fn code(&self) -> &'static str {
        match self {
            FrameError::Undersized { .. } => "cinder.examples.frame_undersized",
            FrameError::Oversized { .. } => "cinder.examples.frame_oversized",
        }
    }
}

/// 负载长度对应的帧头。
pub fn header(payload_len: usize) -> [u8; HEADER_LEN] {
    ((payload_len + HEADER_LEN) as u32).to_le_bytes()
}

pub fn encode(payload: &[u8]) -> Bytes {
    let mut out = BytesMut::with_capacity(HEADER_LEN + payload.len());
    out.put_slice(&header(payload.len()));
    out.put_slice(payload);
    out.freeze()
}

/// 从帧头解析总长度，并做上下界检查。
pub fn declared_len(header: &[u8]) -> Result<Option<usize>, FrameError> {
    let Some(raw) = header.get(..HEADER_LEN) else {
        return Ok(None);
    };
    let declared = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
    let total = declared as usize;
    if total < HEADER_LEN {
        return Err(FrameError::Undersized { declared });
    }
    if total > MAX_FRAME_LEN {
        return Err(FrameError::Oversized {
            declared,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(Some(total))
}

/// 从连接入站缓冲取出一帧负载；字节不足时返回 `Ok(None)` 且不消费任何字节。
pub fn decode(conn: &mut dyn Conn) -> Result<Option<Bytes>, FrameError> {
    let Some(total) = conn.peek(HEADER_LEN).map(declared_len).transpose()?.flatten() else {
        return Ok(None);
    };
    if conn.inbound_buffered() < total {
        return Ok(None);
    }
    conn.discard(HEADER_LEN);
    Ok(conn.next(total - HEADER_LEN))
}
