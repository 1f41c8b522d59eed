#![doc = r#"
# cinder-examples

## 设计动机（Why）
- 给 `cinder-tls` 一个可运行的接入样板：应用处理器只写明文协议，TLS 由启动参数决定是否启用；
- 端到端测试（真实套接字 + `tokio-rustls` 客户端）依赖这里的处理器与配置加载逻辑。

## 核心契约（What）
- [`frame`]：4 字节小端“总长度（含头部）”前缀的分帧编解码；
- [`EchoServer`]：逐帧回显；[`HelloHttpServer`]：读到完整请求头后回复固定响应；
- [`Settings`]：TOML 配置，描述监听地址、引擎参数与证书路径；
- [`cli`]：两个二进制共用的命令行解析；[`selftest`]：阻塞式分帧往返，供回显自测客户端使用。
"#]

pub mod cli;
mod echo;
pub mod frame;
mod http;
pub mod keys;
pub mod selftest;
mod settings;
pub mod telemetry;

pub use echo::EchoServer;
pub use frame::FrameError;
pub use http::{HELLO_RESPONSE, HelloHttpServer};
pub use settings::{Settings, SettingsError, TlsSettings};
