use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::addr::resolve_listen_addr;
use crate::error::EngineError;
use crate::handler::{Action, EventHandler};
use crate::options::EngineOptions;
use crate::shard::Shard;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// 事件引擎入口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 在返回之前完成所有可能失败的准备工作（选项校验、地址解析、绑定、运行时构建），
///   使配置错误在接受任何连接之前暴露；
///
/// ## 逻辑（How）
/// 1. 用 `socket2` 同步绑定监听套接字并应用 `SO_REUSEADDR`/`SO_REUSEPORT`/backlog；
/// 2. 为每个分片构建单线程运行时，随后启动 `cinder-shard-{i}` 线程；
/// 3. 启动 `cinder-acceptor` 线程：接受连接、应用 `TCP_NODELAY`/keepalive、轮询投递给分片；
/// 4. 停机时接收线程关闭投递通道、等待所有分片退出，最后调用 `on_shutdown`。
///
/// ## 契约（What）
/// - `start` 成功返回时监听已经就绪，`local_addr` 为实际绑定地址（端口 0 时可取回真实端口）；
/// - `run` 等价于 `start` 后 `wait`，阻塞到引擎停机。
#[derive(Debug)]
pub struct Engine;

impl Engine {
    pub fn start<H: EventHandler>(
        handler: H,
        addr: &str,
        options: EngineOptions,
    ) -> Result<EngineHandle, EngineError> {
        options.validate()?;
        let socket_addr = resolve_listen_addr(addr)?;
        let listener = bind_listener(socket_addr, &options)?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| EngineError::Bind {
                addr: socket_addr,
                source,
            })?;
        let shards = options.effective_shards();
        let control = EngineControl::new(local_addr, shards);

        let mut runtimes = Vec::with_capacity(shards);
        for _ in 0..shards {
            runtimes.push(single_thread_runtime()?);
        }
        let acceptor_runtime = single_thread_runtime()?;

        let handler = Arc::new(handler);
        let options = Arc::new(options);
        if handler.on_boot(&control) == Action::Shutdown {
            control.shutdown();
        }

        let mut senders = Vec::with_capacity(shards);
        let mut workers = Vec::with_capacity(shards);
        for (index, runtime) in runtimes.into_iter().enumerate() {
            let (tx, rx) = mpsc::unbounded_channel();
            let shard = Shard::new(
                index,
                Arc::clone(&handler),
                control.clone(),
                Arc::clone(&options),
            );
            let worker = thread::Builder::new()
                .name(format!("cinder-shard-{index}"))
                .spawn(move || shard.run(runtime, rx))
                .map_err(EngineError::Spawn)?;
            senders.push(tx);
            workers.push(worker);
        }

        let supervisor = {
            let control = control.clone();
            thread::Builder::new()
                .name("cinder-acceptor".to_owned())
                .spawn(move || {
                    acceptor_runtime.block_on(accept_loop(listener, senders, &control, &options));
                    for worker in workers {
                        if worker.join().is_err() {
                            error!("shard thread panicked");
                        }
                    }
                    handler.on_shutdown(&control);
                    info!(addr = %control.local_addr(), "engine stopped");
                })
                .map_err(EngineError::Spawn)?
        };

        info!(addr = %local_addr, shards, "engine started");
        Ok(EngineHandle {
            control,
            supervisor,
        })
    }

    pub fn run<H: EventHandler>(
        handler: H,
        addr: &str,
        options: EngineOptions,
    ) -> Result<(), EngineError> {
        Self::start(handler, addr, options)?.wait()
    }
}

/// 运行中引擎的可克隆控制面。
#[derive(Clone)]
pub struct EngineControl {
    inner: Arc<ControlInner>,
}

struct ControlInner {
    local_addr: SocketAddr,
    shards: usize,
    shutdown: watch::Sender<bool>,
}

impl EngineControl {
    fn new(local_addr: SocketAddr, shards: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(ControlInner {
                local_addr,
                shards,
                shutdown,
            }),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn shards(&self) -> usize {
        self.inner.shards
    }

    /// 请求停机；重复调用无副作用。
    pub fn shutdown(&self) {
        if !self.inner.shutdown.send_replace(true) {
            info!(addr = %self.inner.local_addr, "engine shutdown requested");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }
}

impl fmt::Debug for EngineControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineControl")
            .field("local_addr", &self.inner.local_addr)
            .field("shards", &self.inner.shards)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// `Engine::start` 的返回值；丢弃句柄不会停止引擎。
#[derive(Debug)]
pub struct EngineHandle {
    control: EngineControl,
    supervisor: JoinHandle<()>,
}

impl EngineHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.control.local_addr()
    }

    pub fn control(&self) -> &EngineControl {
        &self.control
    }

    pub fn shutdown(&self) {
        self.control.shutdown();
    }

    /// 阻塞直到引擎停机且 `on_shutdown` 已返回。
    pub fn wait(self) -> Result<(), EngineError> {
        self.supervisor
            .join()
            .map_err(|_| EngineError::ThreadPanicked)
    }
}

fn single_thread_runtime() -> Result<Runtime, EngineError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(EngineError::Runtime)
}

fn bind_listener(
    addr: SocketAddr,
    options: &EngineOptions,
) -> Result<StdTcpListener, EngineError> {
    let bind_err = |source: io::Error| EngineError::Bind { addr, source };
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    apply_reuse_port(&socket, options.reuse_port).map_err(bind_err)?;
    socket.bind(&SockAddr::from(addr)).map_err(bind_err)?;
    let backlog = i32::try_from(options.backlog).unwrap_or(i32::MAX);
    socket.listen(backlog).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    Ok(socket.into())
}

#[cfg(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
))]
fn apply_reuse_port(socket: &Socket, enabled: bool) -> io::Result<()> {
    if enabled {
        socket.set_reuse_port(true)?;
    }
    Ok(())
}

#[cfg(not(all(
    unix,
    not(any(target_os = "solaris", target_os = "illumos", target_os = "cygwin"))
)))]
fn apply_reuse_port(_socket: &Socket, enabled: bool) -> io::Result<()> {
    if enabled {
        warn!("SO_REUSEPORT is not supported on this platform; ignoring");
    }
    Ok(())
}

fn configure_stream(stream: &TcpStream, options: &EngineOptions) -> io::Result<()> {
    stream.set_nodelay(options.tcp_nodelay)?;
    if let Some(period) = options.tcp_keepalive() {
        let keepalive = TcpKeepalive::new().with_time(period);
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

async fn accept_loop(
    listener: StdTcpListener,
    shards: Vec<mpsc::UnboundedSender<StdTcpStream>>,
    control: &EngineControl,
    options: &EngineOptions,
) {
    let listener = match TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, "failed to register listener with the acceptor runtime");
            control.shutdown();
            return;
        }
    };
    let mut shutdown = control.subscribe();
    let mut next = 0usize;
    while !*shutdown.borrow_and_update() {
        tokio::select! {
            _ = shutdown.changed() => {}
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if let Err(err) = configure_stream(&stream, options) {
                            warn!(%peer, error = %err, "failed to apply socket options");
                        }
                        let stream = match stream.into_std() {
                            Ok(stream) => stream,
                            Err(err) => {
                                warn!(%peer, error = %err, "failed to detach accepted socket");
                                continue;
                            }
                        };
                        let index = next % shards.len();
                        next = next.wrapping_add(1);
                        if shards[index].send(stream).is_err() {
                            error!(shard = index, %peer, "shard has exited; dropping connection");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                }
            }
        }
    }
    debug!("acceptor stopped");
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use super::*;
    use crate::conn::Conn;

    struct Idle;

    impl EventHandler for Idle {
        fn on_traffic(&self, _conn: &mut dyn Conn) -> Action {
            Action::None
        }
    }

    #[test]
    #[traced_test]
    fn start_and_shutdown_are_logged() {
        let options = EngineOptions::default().with_shards(1);
        let handle = Engine::start(Idle, "tcp://127.0.0.1:0", options).expect("engine starts");
        assert_eq!(handle.control().shards(), 1);
        assert!(logs_contain("engine started"));

        handle.shutdown();
        assert!(logs_contain("engine shutdown requested"));
        handle.wait().expect("engine exits cleanly");
    }
}
