use std::io;
use std::net::TcpStream as StdTcpStream;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet, LocalSet};
use tokio::time::{self, Instant};
use tracing::{debug, error, trace, warn};

use crate::backpressure::{Transition, WatermarkState};
use crate::conn::{BufferedConn, Conn, ConnId};
use crate::engine::EngineControl;
use crate::handler::{Action, CloseCause, EventHandler};
use crate::options::EngineOptions;

const FAR_FUTURE: Duration = Duration::from_secs(60 * 60 * 24 * 365);

/// 单个分片：一个 OS 线程、一个单线程运行时、一组只属于它的连接。
pub(crate) struct Shard<H> {
    index: usize,
    handler: Arc<H>,
    control: EngineControl,
    options: Arc<EngineOptions>,
}

impl<H: EventHandler> Shard<H> {
    pub(crate) fn new(
        index: usize,
        handler: Arc<H>,
        control: EngineControl,
        options: Arc<EngineOptions>,
    ) -> Self {
        Self {
            index,
            handler,
            control,
            options,
        }
    }

    /// 接收投递的套接字直到通道关闭，然后等待本分片的连接全部关闭。
    pub(crate) fn run(self, runtime: Runtime, mut incoming: mpsc::UnboundedReceiver<StdTcpStream>) {
        let local = LocalSet::new();
        local.block_on(&runtime, async move {
            let mut connections = JoinSet::new();
            while let Some(stream) = incoming.recv().await {
                while let Some(result) = connections.try_join_next() {
                    self.reap(result);
                }
                let stream = match TcpStream::from_std(stream) {
                    Ok(stream) => stream,
                    Err(err) => {
                        warn!(shard = self.index, error = %err, "failed to register connection");
                        continue;
                    }
                };
                let driver = ConnDriver {
                    stream,
                    handler: Arc::clone(&self.handler),
                    control: self.control.clone(),
                    options: Arc::clone(&self.options),
                };
                connections.spawn_local(driver.run());
            }
            while let Some(result) = connections.join_next().await {
                self.reap(result);
            }
            debug!(shard = self.index, "shard stopped");
        });
    }

    fn reap(&self, result: Result<(), JoinError>) {
        if let Err(err) = result
            && err.is_panic()
        {
            error!(shard = self.index, "connection task panicked");
        }
    }
}

struct ConnDriver<H> {
    stream: TcpStream,
    handler: Arc<H>,
    control: EngineControl,
    options: Arc<EngineOptions>,
}

impl<H: EventHandler> ConnDriver<H> {
    /// 单条连接的事件循环。
    ///
    /// 每轮先尽力刷新出站缓冲，再等待以下事件之一：停机、写就绪（仅当仍有待写字节）、
    /// 截止时间、读就绪（仅当未触发高水位）。回调返回 `Close`/`Shutdown` 或出现 EOF/IO 错误时
    /// 退出循环，随后有界地刷新剩余字节并调用一次 `on_close`。
    async fn run(self) {
        let id = ConnId::next();
        let mut conn = BufferedConn::new(
            id,
            self.stream.local_addr().ok(),
            self.stream.peer_addr().ok(),
            self.options.read_buffer_size,
        );
        let mut shutdown = self.control.subscribe();
        let mut watermark = WatermarkState::new(
            self.options.outbound_high_watermark,
            self.options.outbound_low_watermark,
        );
        let mut cause: Option<CloseCause> = None;
        debug!(conn = %id, peer = ?conn.peer_addr(), "connection opened");

        let mut open = self.dispatch(self.handler.on_open(&mut conn));
        while open {
            if *shutdown.borrow_and_update() {
                break;
            }
            if let Err(err) = flush(&self.stream, &mut conn.outbound) {
                cause = Some(Arc::new(err));
                break;
            }
            match watermark.observe(conn.outbound.len()) {
                Transition::Paused => {
                    debug!(conn = %id, pending = conn.outbound.len(), "outbound above high watermark; reading paused")
                }
                Transition::Resumed => debug!(conn = %id, "outbound drained; reading resumed"),
                Transition::Unchanged => {}
            }
            let want_write = !conn.outbound.is_empty();
            let want_read = watermark.reading_allowed();
            let deadline = conn.deadline();
            let wake_at = deadline
                .map(Instant::from_std)
                .unwrap_or_else(|| Instant::now() + FAR_FUTURE);

            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                ready = self.stream.writable(), if want_write => {
                    if let Err(err) = ready {
                        cause = Some(Arc::new(err));
                        break;
                    }
                }
                _ = time::sleep_until(wake_at), if deadline.is_some() => {
                    conn.take_deadline();
                    trace!(conn = %id, "deadline reached");
                    open = self.dispatch(self.handler.on_deadline(&mut conn));
                }
                ready = self.stream.readable(), if want_read => {
                    if let Err(err) = ready {
                        cause = Some(Arc::new(err));
                        break;
                    }
                    conn.inbound.reserve(self.options.read_buffer_size);
                    match self.stream.try_read_buf(&mut conn.inbound) {
                        Ok(0) => {
                            trace!(conn = %id, "peer closed the stream");
                            break;
                        }
                        Ok(n) => {
                            trace!(conn = %id, bytes = n, "inbound bytes buffered");
                            open = self.dispatch(self.handler.on_traffic(&mut conn));
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {}
                        Err(err) => {
                            cause = Some(Arc::new(err));
                            break;
                        }
                    }
                }
            }
        }

        if !conn.outbound.is_empty() {
            linger(&self.stream, &mut conn.outbound, self.options.close_linger()).await;
        }
        debug!(
            conn = %id,
            cause = ?cause.as_ref().map(|c| c.to_string()),
            "connection closed"
        );
        if self.handler.on_close(&mut conn, cause) == Action::Shutdown {
            self.control.shutdown();
        }
    }

    /// 将回调返回的动作映射为“连接是否继续”。
    fn dispatch(&self, action: Action) -> bool {
        match action {
            Action::None => true,
            Action::Close => false,
            Action::Shutdown => {
                self.control.shutdown();
                false
            }
        }
    }
}

/// 非阻塞地写出尽可能多的出站字节；`WouldBlock` 时保留剩余部分等待写就绪。
fn flush(stream: &TcpStream, outbound: &mut BytesMut) -> io::Result<()> {
    while !outbound.is_empty() {
        match stream.try_write(&outbound[..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => outbound.advance(n),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

async fn linger(stream: &TcpStream, outbound: &mut BytesMut, limit: Duration) {
    let drained = time::timeout(limit, async {
        while !outbound.is_empty() {
            stream.writable().await?;
            flush(stream, outbound)?;
        }
        Ok::<(), io::Error>(())
    })
    .await;
    match drained {
        Ok(Ok(())) => {}
        Ok(Err(err)) => trace!(error = %err, "close flush failed"),
        Err(_) => trace!(pending = outbound.len(), "close flush timed out"),
    }
}
