use std::error::Error;
use std::sync::Arc;

use crate::conn::Conn;
use crate::engine::EngineControl;

/// 回调返回的后续动作。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Action {
    /// 保持现状。
    #[default]
    None,
    /// 关闭当前连接（先尽力刷新出站缓冲）。
    Close,
    /// 停止整个引擎。
    Shutdown,
}

/// 连接关闭的原因；`None` 表示正常关闭（对端 EOF、应用主动关闭或引擎停机）。
pub type CloseCause = Arc<dyn Error + Send + Sync + 'static>;

/// 应用事件回调集合。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 以回调而非异步任务表达协议逻辑：数据到达时同步处理已缓冲字节，处理不了就返回，
///   等下一次回调继续；
/// - 装饰器可以实现同一个 trait 并包裹内层处理器，内层处理器的形状完全不变。
///
/// ## 契约（What）
/// - 同一连接的回调只在其所属分片上依次执行，从不并发；
/// - `on_open` 在连接被接受后调用一次，`on_close` 在连接释放前恰好调用一次；
/// - `on_deadline` 仅在截止时间到期且期间未被清除时触发，触发前截止时间已被清除；
/// - `on_boot` 在开始接受连接之前调用；`on_shutdown` 在所有分片退出后调用。
///
/// ## 风险与权衡（Trade-offs）
/// - 处理器被所有分片共享（`Send + Sync`），可变状态需放入连接上下文或使用内部可变性。
pub trait EventHandler: Send + Sync + 'static {
    fn on_boot(&self, _control: &EngineControl) -> Action {
        Action::None
    }

    fn on_open(&self, _conn: &mut dyn Conn) -> Action {
        Action::None
    }

    fn on_traffic(&self, conn: &mut dyn Conn) -> Action;

    fn on_deadline(&self, _conn: &mut dyn Conn) -> Action {
        Action::None
    }

    fn on_close(&self, _conn: &mut dyn Conn, _cause: Option<CloseCause>) -> Action {
        Action::None
    }

    fn on_shutdown(&self, _control: &EngineControl) {}
}

impl<H: EventHandler + ?Sized> EventHandler for Arc<H> {
    fn on_boot(&self, control: &EngineControl) -> Action {
        (**self).on_boot(control)
    }

    fn on_open(&self, conn: &mut dyn Conn) -> Action {
        (**self).on_open(conn)
    }

    fn on_traffic(&self, conn: &mut dyn Conn) -> Action {
        (**self).on_traffic(conn)
    }

    fn on_deadline(&self, conn: &mut dyn Conn) -> Action {
        (**self).on_deadline(conn)
    }

    fn on_close(&self, conn: &mut dyn Conn, cause: Option<CloseCause>) -> Action {
        (**self).on_close(conn, cause)
    }

    fn on_shutdown(&self, control: &EngineControl) {
        (**self).on_shutdown(control)
    }
}
