#![doc = r#"
# cinder-engine

## 设计动机（Why）
- **回调驱动**：为上层协议（明文或 TLS）提供“数据到达即回调、绝不阻塞”的事件模型，
  每条连接只在所属分片上串行执行；
- **线程亲和**：固定数量的分片线程各自运行单线程 Tokio 运行时，连接状态从不跨线程，
  因此逐连接状态无需任何锁。

## 核心契约（What）
- [`EventHandler`]：`on_boot` / `on_open` / `on_traffic` / `on_deadline` / `on_close` / `on_shutdown`
  六个回调，返回 [`Action`] 决定连接或引擎的去留；
- [`Conn`]：对象安全的连接视图，暴露入站/出站缓冲、上下文槽、截止时间与类型化扩展；
- [`Engine::start`] 同步绑定监听地址（失败即返回），随后由接收线程轮询分发连接。

## 实现策略（How）
- 接收线程 `accept` 后以轮询（round-robin）方式把 `std::net::TcpStream` 投递给分片；
- 分片在 `LocalSet` 中为每条连接启动一个驱动任务：读就绪 → 填充入站缓冲 → `on_traffic`，
  写就绪 → 刷新出站缓冲；水位线控制读暂停；
- 关闭时有界地尽力刷新出站缓冲（保证告警、close_notify 能送达对端），再恰好调用一次 `on_close`。

## 风险与考量（Trade-offs）
- 轮询分发不感知分片负载，长连接倾斜时可能不均衡；
- 回调在分片线程上同步执行，耗时回调会拖慢同分片的其他连接。
"#]

mod addr;
mod backpressure;
mod conn;
mod engine;
mod error;
mod handler;
mod options;
mod shard;

#[cfg(feature = "test-util")]
mod testing;

pub use addr::resolve_listen_addr;
pub use conn::{BufferedConn, Conn, ConnId, conn_extension};
pub use engine::{Engine, EngineControl, EngineHandle};
pub use error::EngineError;
pub use handler::{Action, CloseCause, EventHandler};
pub use options::EngineOptions;

#[cfg(feature = "test-util")]
pub use testing::MemoryConn;
