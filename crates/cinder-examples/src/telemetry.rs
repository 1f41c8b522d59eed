//! 示例二进制的日志初始化。

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

/// 安装 `fmt` 输出；过滤规则取自 `RUST_LOG`，缺省为 `info`。
pub fn init() -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}
