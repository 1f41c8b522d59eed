use std::any::{Any, TypeId};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::{Buf, Bytes, BytesMut};
use cinder_engine::{Action, CloseCause, Conn, ConnId, EngineControl, EventHandler};
use tracing::{debug, error, trace, warn};

use crate::config::{OpenPolicy, TlsConfig};
use crate::error::{StepError, TlsError};
use crate::handshake::{HandshakeChain, server_handshake_chain};
use crate::session::{HandshakeState, NegotiatedSession, SessionIo};

/// 会话包装器：在应用回调之外透明地完成握手与记录保护。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 应用代码不感知 TLS：包装器实现与应用相同的 [`EventHandler`]，
///   只拦截“数据到达”与“写出”两条路径，其余回调原样转发；
/// - 握手在若干次非阻塞回调中逐步推进，不需要专用线程或阻塞调用。
///
/// ## 逻辑（How）
/// 1. `on_open`：创建会话与步骤链，状态置为 `Pending`，设置握手超时；默认推迟应用的
///    `on_open` 直到握手完成；
/// 2. `on_traffic`（握手期间）：引擎入站字节移入适配器，循环执行步骤链，
///    遇到 `NeedMoreData` 即返回；失败则发送告警、关闭连接并记录原因；
/// 3. 握手完成：释放步骤链、排空早期写入、交付推迟的 `on_open`，再把随最后一组握手消息
///    到达的明文交给 `on_traffic`；
/// 4. `on_traffic`（握手完成后）：解密新到达的记录并交付明文；认证失败立即关闭，
///    该批次明文一个字节也不交付；
/// 5. `on_close`：无条件释放会话与步骤链，并把终止原因转发给应用。
///
/// ## 契约（What）
/// - 逐连接状态保存在引擎连接的上下文槽中，只被所属分片访问；
/// - 应用在回调中看到的是 [`SecureConn`]：入站为明文，写出自动加密，
///   上下文槽与截止时间属于应用自身；
/// - 连接关闭后状态被丢弃，步骤链再也不会被执行。
///
/// ## 风险与权衡（Trade-offs）
/// - 应用若在 `on_traffic` 中未消费全部明文，剩余明文会保留到下一次有新明文到达时再交付。
pub struct TlsWrapper<H> {
    inner: H,
    config: TlsConfig,
}

impl<H: EventHandler> TlsWrapper<H> {
    pub fn new(inner: H, config: TlsConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn config(&self) -> &TlsConfig {
        &self.config
    }

    fn traffic(&self, session: &mut Connection, raw: &mut dyn Conn) -> Action {
        let Some(io) = session.io.as_mut() else {
            return Action::Close;
        };
        let arrived = raw.inbound_buffered();
        if let Some(bytes) = raw.next(arrived) {
            io.adapter.absorb(&bytes);
        }
        match session.state {
            HandshakeState::Pending | HandshakeState::InProgress => {
                session.state = HandshakeState::InProgress;
                match session.advance_handshake() {
                    Progress::Blocked => {
                        session.flush_to(raw);
                        Action::None
                    }
                    Progress::Failed(err) => {
                        session.fail(raw, err);
                        Action::Close
                    }
                    Progress::Completed => self.complete(session, raw),
                }
            }
            HandshakeState::Complete => self.records(session, raw),
            HandshakeState::Failed => Action::Close,
        }
    }

    fn complete(&self, session: &mut Connection, raw: &mut dyn Conn) -> Action {
        session.state = HandshakeState::Complete;
        session.chain = None;
        let Some(io) = session.io.as_mut() else {
            return Action::Close;
        };
        let negotiated = io.negotiated();
        debug!(
            conn = %raw.id(),
            version = ?negotiated.protocol_version,
            suite = ?negotiated.cipher_suite,
            "tls handshake complete"
        );
        session.negotiated = Some(negotiated);
        raw.set_deadline(session.app_deadline.take());

        if !session.early_writes.is_empty() {
            let queued = session.early_writes.split().freeze();
            trace!(conn = %raw.id(), bytes = queued.len(), "draining early writes");
            if let Err(err) = session.seal_all(raw, &queued) {
                session.fail(raw, err);
                return Action::Close;
            }
        }
        session.flush_to(raw);

        let mut action = Action::None;
        if !session.open_delivered {
            session.open_delivered = true;
            action = self.inner.on_open(&mut SecureConn::new(raw, session));
        }
        if action == Action::None && !session.plaintext().is_empty() {
            action = self.inner.on_traffic(&mut SecureConn::new(raw, session));
        }
        self.settle(session, raw, action)
    }

    fn records(&self, session: &mut Connection, raw: &mut dyn Conn) -> Action {
        let Some(io) = session.io.as_mut() else {
            return Action::Close;
        };
        let before = io.plaintext.len();
        if let Err(err) = io.pump().and_then(|()| io.flush_tls()) {
            session.fail(raw, err);
            return Action::Close;
        }
        session.flush_to(raw);
        let action = if session.plaintext().len() > before {
            self.inner.on_traffic(&mut SecureConn::new(raw, session))
        } else {
            Action::None
        };
        self.settle(session, raw, action)
    }

    /// 应用回调返回后的收尾：对端 close_notify 视为流结束，关闭时回送 close_notify。
    fn settle(&self, session: &mut Connection, raw: &mut dyn Conn, action: Action) -> Action {
        let mut action = action;
        if action == Action::None && session.peer_closed() {
            debug!(conn = %raw.id(), "peer sent close_notify");
            action = Action::Close;
        }
        if action != Action::None {
            session.local_close = true;
            session.close_notify(raw);
        }
        action
    }
}

impl<H: EventHandler> EventHandler for TlsWrapper<H> {
    fn on_boot(&self, control: &EngineControl) -> Action {
        self.inner.on_boot(control)
    }

    fn on_open(&self, raw: &mut dyn Conn) -> Action {
        let mut session = Connection::accept(&self.config);
        if session.state == HandshakeState::Failed {
            raw.set_context(Some(Box::new(session)));
            return Action::Close;
        }
        if let Some(timeout) = self.config.handshake_timeout() {
            raw.set_deadline(Some(Instant::now() + timeout));
        }
        trace!(conn = %raw.id(), "tls session created");

        let mut action = Action::None;
        if self.config.open_policy() == OpenPolicy::Immediate {
            session.open_delivered = true;
            action = self.inner.on_open(&mut SecureConn::new(raw, &mut session));
            if action != Action::None {
                session.local_close = true;
            }
        }
        raw.set_context(Some(Box::new(session)));
        action
    }

    fn on_traffic(&self, raw: &mut dyn Conn) -> Action {
        with_session(raw, |session, raw| self.traffic(session, raw)).unwrap_or(Action::Close)
    }

    fn on_deadline(&self, raw: &mut dyn Conn) -> Action {
        with_session(raw, |session, raw| match session.state {
            HandshakeState::Complete => {
                let action = self.inner.on_deadline(&mut SecureConn::new(raw, session));
                self.settle(session, raw, action)
            }
            HandshakeState::Pending | HandshakeState::InProgress => {
                let timeout = self.config.handshake_timeout().unwrap_or_default();
                session.fail(raw, TlsError::HandshakeTimeout(timeout));
                Action::Close
            }
            HandshakeState::Failed => Action::Close,
        })
        .unwrap_or(Action::Close)
    }

    fn on_close(&self, raw: &mut dyn Conn, cause: Option<CloseCause>) -> Action {
        let Some(mut session) = take_session(raw) else {
            return self.inner.on_close(raw, cause);
        };
        session.chain = None;
        let forwarded = session.close_cause(cause);
        debug!(
            conn = %raw.id(),
            state = ?session.state,
            cause = ?forwarded.as_ref().map(|c| c.to_string()),
            "tls connection closed"
        );
        let action = self.inner.on_close(&mut SecureConn::new(raw, &mut session), forwarded);
        session.io = None;
        action
    }

    fn on_shutdown(&self, control: &EngineControl) {
        self.inner.on_shutdown(control)
    }
}

/// 取出上下文中的会话状态，执行 `f` 后放回。
fn with_session<R>(
    raw: &mut dyn Conn,
    f: impl FnOnce(&mut Connection, &mut dyn Conn) -> R,
) -> Option<R> {
    let mut session = take_session(raw)?;
    let result = f(&mut session, raw);
    raw.set_context(Some(session as Box<dyn Any>));
    Some(result)
}

fn take_session(raw: &mut dyn Conn) -> Option<Box<Connection>> {
    let context = raw.set_context(None)?;
    match context.downcast::<Connection>() {
        Ok(session) => Some(session),
        Err(other) => {
            error!(conn = %raw.id(), "connection context does not hold a tls session");
            raw.set_context(Some(other));
            None
        }
    }
}

enum Progress {
    Blocked,
    Completed,
    Failed(TlsError),
}

/// 单条连接的 TLS 状态。
pub(crate) struct Connection {
    pub(crate) state: HandshakeState,
    io: Option<SessionIo>,
    chain: Option<HandshakeChain>,
    early_writes: BytesMut,
    early_write_limit: usize,
    app_context: Option<Box<dyn Any>>,
    app_deadline: Option<Instant>,
    open_delivered: bool,
    local_close: bool,
    close_notify_sent: bool,
    failure: Option<TlsError>,
    pub(crate) negotiated: Option<NegotiatedSession>,
}

impl Connection {
    fn accept(config: &TlsConfig) -> Self {
        let session = SessionIo::new(
            Arc::clone(config.server_config()),
            config.send_buffer_limit(),
        );
        let mut connection =
            Self::with_chain(None, server_handshake_chain(), config.early_write_limit());
        match session {
            Ok(io) => connection.io = Some(io),
            Err(err) => {
                warn!(code = err.code(), error = %err, "tls session setup failed");
                connection.state = HandshakeState::Failed;
                connection.chain = None;
                connection.failure = Some(err);
            }
        }
        connection
    }

    pub(crate) fn with_chain(
        io: Option<SessionIo>,
        chain: HandshakeChain,
        early_write_limit: usize,
    ) -> Self {
        Self {
            state: HandshakeState::Pending,
            io,
            chain: Some(chain),
            early_writes: BytesMut::new(),
            early_write_limit,
            app_context: None,
            app_deadline: None,
            open_delivered: false,
            local_close: false,
            close_notify_sent: false,
            failure: None,
            negotiated: None,
        }
    }

    /// 在一次回调内尽可能多地执行步骤，保持步骤顺序与 `NeedMoreData` 语义。
    fn advance_handshake(&mut self) -> Progress {
        let (Some(chain), Some(io)) = (self.chain.as_mut(), self.io.as_mut()) else {
            return Progress::Failed(TlsError::Exhausted);
        };
        loop {
            match chain.execute(io) {
                Ok(()) if chain.is_drained() => return Progress::Completed,
                Ok(()) => continue,
                Err(StepError::NeedMoreData) => return Progress::Blocked,
                Err(StepError::Failed(err)) => return Progress::Failed(err),
                Err(StepError::Exhausted) => {
                    error!("handshake chain executed after completion");
                    return Progress::Failed(TlsError::Exhausted);
                }
            }
        }
    }

    /// 终止会话：送出待发送的告警，释放会话与步骤链，记录原因。
    fn fail(&mut self, raw: &mut dyn Conn, err: TlsError) {
        if err.is_handshake() {
            warn!(conn = %raw.id(), code = err.code(), error = %err, "tls handshake failed");
        } else {
            warn!(conn = %raw.id(), code = err.code(), error = %err, "tls session failed");
        }
        if let Some(io) = self.io.as_mut()
            && let Err(flush_err) = io.flush_tls()
        {
            trace!(conn = %raw.id(), error = %flush_err, "failed to flush tls alert");
        }
        self.flush_to(raw);
        self.state = HandshakeState::Failed;
        self.chain = None;
        self.io = None;
        self.failure = Some(err);
    }

    /// 把适配器出站缓冲移入引擎出站缓冲。
    fn flush_to(&mut self, raw: &mut dyn Conn) {
        let Some(io) = self.io.as_mut() else {
            return;
        };
        let pending = io.adapter.take_outbound();
        if pending.is_empty() {
            return;
        }
        trace!(conn = %raw.id(), bytes = pending.len(), "ciphertext queued");
        if let Err(err) = raw.write(&pending) {
            warn!(conn = %raw.id(), error = %err, "engine rejected outbound ciphertext");
        }
    }

    fn seal_all(&mut self, raw: &mut dyn Conn, data: &[u8]) -> Result<usize, TlsError> {
        let Some(io) = self.io.as_mut() else {
            return Ok(0);
        };
        let accepted = io.seal(data)?;
        self.flush_to(raw);
        Ok(accepted)
    }

    fn close_notify(&mut self, raw: &mut dyn Conn) {
        if self.state != HandshakeState::Complete || self.close_notify_sent {
            return;
        }
        self.close_notify_sent = true;
        if let Some(io) = self.io.as_mut()
            && let Err(err) = io.send_close_notify()
        {
            trace!(conn = %raw.id(), error = %err, "failed to queue close_notify");
        }
        self.flush_to(raw);
    }

    fn peer_closed(&self) -> bool {
        self.io.as_ref().is_some_and(|io| io.peer_closed)
    }

    fn plaintext(&self) -> &[u8] {
        self.io.as_ref().map_or(&[], |io| &io.plaintext[..])
    }

    fn plaintext_mut(&mut self) -> Option<&mut BytesMut> {
        self.io.as_mut().map(|io| &mut io.plaintext)
    }

    /// 转发给应用的关闭原因：包装器记录的失败优先，其次是引擎给出的原因；
    /// 握手未完成且并非本地主动关闭时，视为对端放弃握手。
    fn close_cause(&mut self, engine_cause: Option<CloseCause>) -> Option<CloseCause> {
        if let Some(failure) = self.failure.take() {
            return Some(Arc::new(failure));
        }
        if engine_cause.is_some() {
            return engine_cause;
        }
        if self.state != HandshakeState::Complete && !self.local_close {
            self.state = HandshakeState::Failed;
            return Some(Arc::new(TlsError::rejected(
                "connection closed before handshake completed",
            )));
        }
        None
    }
}

/// 应用回调看到的安全连接：入站为明文，写出自动加密。
pub struct SecureConn<'a> {
    raw: &'a mut dyn Conn,
    session: &'a mut Connection,
}

impl<'a> SecureConn<'a> {
    fn new(raw: &'a mut dyn Conn, session: &'a mut Connection) -> Self {
        Self { raw, session }
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.session.state
    }

    pub fn negotiated(&self) -> Option<&NegotiatedSession> {
        self.session.negotiated.as_ref()
    }

    fn queue_early(&mut self, data: &[u8]) -> io::Result<usize> {
        let room = self
            .session
            .early_write_limit
            .saturating_sub(self.session.early_writes.len());
        if room == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = room.min(data.len());
        self.session.early_writes.extend_from_slice(&data[..n]);
        Ok(n)
    }
}

impl Conn for SecureConn<'_> {
    fn id(&self) -> ConnId {
        self.raw.id()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.raw.local_addr()
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.raw.peer_addr()
    }

    fn inbound_buffered(&self) -> usize {
        self.session.plaintext().len()
    }

    fn peek(&self, n: usize) -> Option<&[u8]> {
        self.session.plaintext().get(..n)
    }

    fn next(&mut self, n: usize) -> Option<Bytes> {
        let plaintext = self.session.plaintext_mut()?;
        if plaintext.len() < n {
            return None;
        }
        Some(plaintext.split_to(n).freeze())
    }

    fn discard(&mut self, n: usize) -> usize {
        let Some(plaintext) = self.session.plaintext_mut() else {
            return 0;
        };
        let n = n.min(plaintext.len());
        plaintext.advance(n);
        n
    }

    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Some(plaintext) = self.session.plaintext_mut() else {
            return 0;
        };
        let n = buf.len().min(plaintext.len());
        buf[..n].copy_from_slice(&plaintext[..n]);
        plaintext.advance(n);
        n
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match self.session.state {
            HandshakeState::Complete if !self.session.close_notify_sent => self
                .session
                .seal_all(&mut *self.raw, data)
                .map_err(io::Error::other),
            HandshakeState::Pending | HandshakeState::InProgress => self.queue_early(data),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn outbound_buffered(&self) -> usize {
        self.raw.outbound_buffered() + self.session.early_writes.len()
    }

    fn context(&self) -> Option<&dyn Any> {
        self.session.app_context.as_deref()
    }

    fn context_mut(&mut self) -> Option<&mut dyn Any> {
        self.session.app_context.as_deref_mut()
    }

    fn set_context(&mut self, context: Option<Box<dyn Any>>) -> Option<Box<dyn Any>> {
        std::mem::replace(&mut self.session.app_context, context)
    }

    fn deadline(&self) -> Option<Instant> {
        if self.session.state == HandshakeState::Complete {
            self.raw.deadline()
        } else {
            self.session.app_deadline
        }
    }

    fn set_deadline(&mut self, deadline: Option<Instant>) {
        if self.session.state == HandshakeState::Complete {
            self.raw.set_deadline(deadline);
        } else {
            self.session.app_deadline = deadline;
        }
    }

    fn extension(&self, type_id: TypeId) -> Option<&dyn Any> {
        if type_id == TypeId::of::<NegotiatedSession>() {
            return self.session.negotiated.as_ref().map(|n| n as &dyn Any);
        }
        if type_id == TypeId::of::<HandshakeState>() {
            return Some(&self.session.state);
        }
        self.raw.extension(type_id)
    }
}

/// 查询连接的握手状态。
///
/// 既可用于应用回调中的 [`SecureConn`]，也可用于包装器之下的原始引擎连接；
/// 连接关闭后状态已释放，返回 `None`。
pub fn handshake_state(conn: &dyn Conn) -> Option<HandshakeState> {
    if let Some(state) = cinder_engine::conn_extension::<HandshakeState>(conn) {
        return Some(*state);
    }
    conn.context()?
        .downcast_ref::<Connection>()
        .map(|session| session.state)
}

/// 查询握手完成时协商出的会话参数。
pub fn negotiated_session(conn: &dyn Conn) -> Option<NegotiatedSession> {
    if let Some(negotiated) = cinder_engine::conn_extension::<NegotiatedSession>(conn) {
        return Some(negotiated.clone());
    }
    conn.context()?
        .downcast_ref::<Connection>()
        .and_then(|session| session.negotiated.clone())
}
