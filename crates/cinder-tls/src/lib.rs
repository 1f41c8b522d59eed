#![doc = r#"
# cinder-tls

## 设计动机（Why）
- **回调内的同步协议**：TLS 握手是多往返的同步协议，而 `cinder-engine` 只在“字节到达”时
  回调且不允许阻塞；本 crate 把握手表达为可恢复的步骤链，让它在任意切分的数据到达事件中
  正确推进；
- **透明接入**：应用处理器的形状不变，包裹一层 [`TlsWrapper`] 即可获得机密性与完整性。

## 核心契约（What）
- [`ConnectionAdapter`]：把连接的非阻塞缓冲伪装成同步读写端点，字节不足时报告 `NeedMoreData`；
- [`StepChain`]：有序、可恢复、错误粘性的步骤序列；
- [`TlsWrapper`]：驱动握手状态机 `Pending → InProgress → Complete | Failed`，
  完成后透明地解密入站、加密出站；
- [`TlsConfig`]：启动时构建一次、所有连接只读共享的证书与协议参数；
- [`start`] / [`run`]：未提供 TLS 配置时显式直通，不安装包装器。

## 实现策略（How）
- 会话引擎使用 `rustls::ServerConnection`（`aws-lc-rs` 提供者），通过适配器完成
  `read_tls`/`write_tls`，本 crate 不实现任何密码学原语；
- 逐连接状态放在引擎连接的上下文槽里，只被所属分片访问，因此没有锁。

## 风险与考量（Trade-offs）
- 握手超时复用引擎的连接截止时间；握手完成后截止时间归还给应用；
- 证书校验策略与密码套件协商规则完全交由 `rustls` 决定。
"#]

mod adapter;
mod chain;
mod config;
mod error;
mod handshake;
mod server;
mod session;
mod wrapper;

pub use adapter::ConnectionAdapter;
pub use chain::{Step, StepChain};
pub use config::{OpenPolicy, TlsConfig, TlsConfigBuilder};
pub use error::{ChainSealed, NeedMoreData, StepError, TlsError};
pub use server::{run, start};
pub use session::{HandshakeState, NegotiatedSession};
pub use wrapper::{SecureConn, TlsWrapper, handshake_state, negotiated_session};
