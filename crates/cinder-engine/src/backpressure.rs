/// 管理连接出站缓冲的读暂停水位。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 回调可以无限制地向出站缓冲追加字节，而套接字刷新速度受对端窗口约束；
///   若不加节制地继续读取并回显，内存会随对端的慢速消费线性增长。
/// - 以高/低水位的滞回（hysteresis）控制读取，避免在阈值附近来回抖动。
///
/// ## 逻辑 (How)
/// - `observe` 在每次刷新后用出站缓冲长度更新状态：
///   超过高水位进入 `paused`，回落到低水位以下退出；
/// - 状态切换时返回对应的 [`Transition`]，调用方据此记录日志。
///
/// ## 契约 (What)
/// - **前置条件**：`low < high`，由 `EngineOptions::validate` 保证；
/// - **后置条件**：`reading_allowed` 在暂停期间恒为 `false`。
///
/// ## 注意事项 (Trade-offs)
/// - 只暂停读取而不丢弃数据；已在内核缓冲中的字节会在恢复后继续到达。
#[derive(Debug)]
pub(crate) struct WatermarkState {
    high: usize,
    low: usize,
    paused: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    Paused,
    Resumed,
}

impl WatermarkState {
    pub(crate) fn new(high: usize, low: usize) -> Self {
        Self {
            high,
            low,
            paused: false,
        }
    }

    pub(crate) fn observe(&mut self, outbound_len: usize) -> Transition {
        if !self.paused && outbound_len > self.high {
            self.paused = true;
            Transition::Paused
        } else if self.paused && outbound_len < self.low {
            self.paused = false;
            Transition::Resumed
        } else {
            Transition::Unchanged
        }
    }

    pub(crate) fn reading_allowed(&self) -> bool {
        !self.paused
    }
}
