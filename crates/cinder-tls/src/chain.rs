use std::fmt;

use tracing::trace;

use crate::error::{ChainSealed, StepError};

/// 一个延迟执行的子步骤。上下文（适配器与会话）在每次执行时传入，
/// 步骤本身不持有对它们的引用。
pub type Step<C, E> = Box<dyn FnMut(&mut C) -> Result<(), StepError<E>> + Send>;

struct NamedStep<C, E> {
    name: &'static str,
    run: Step<C, E>,
}

/// 可恢复的有序步骤链。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 多往返协议的每一轮都可能需要尚未到达的字节。同步调用序列会阻塞线程，而引擎的
///   线程模型禁止这样做；步骤链把“协议进行到哪里”外化为显式的游标，
///   非阻塞回调可以执行一步、观察到 `NeedMoreData` 后直接返回，下一次回调从原处继续。
///
/// ## 逻辑（How）
/// - `cursor` 指向下一个待执行步骤；成功则前移，`NeedMoreData` 保持不动；
/// - 终止性失败写入粘性错误槽，之后的 `execute` 直接返回同一错误；
/// - 全部成功后立即释放步骤向量，长连接不会在握手后继续持有闭包。
///
/// ## 契约（What）
/// - `append` 只能在首次 `execute` 之前调用，之后返回 [`ChainSealed`]；
/// - `execute` 每次最多运行一个步骤；步骤顺序与构造顺序一致，成功过的步骤永不重跑；
/// - 链条排空后再 `execute` 返回 [`StepError::Exhausted`]，不会静默成功；
/// - 失败后剩余步骤永不执行，且没有重新武装的途径，只能构造新链条。
///
/// ## 风险与权衡（Trade-offs）
/// - 粘性错误需要 `E: Clone` 才能反复返回。
pub struct StepChain<C, E> {
    steps: Vec<NamedStep<C, E>>,
    cursor: usize,
    completed: usize,
    error: Option<E>,
    sealed: bool,
}

impl<C, E: Clone> StepChain<C, E> {
    /// 创建空链条；首次 `execute` 之前可继续 `append`。
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            cursor: 0,
            completed: 0,
            error: None,
            sealed: false,
        }
    }

    /// 以固定顺序一次性构造链条。
    pub fn from_steps(steps: impl IntoIterator<Item = (&'static str, Step<C, E>)>) -> Self {
        let mut chain = Self::new();
        chain.steps = steps
            .into_iter()
            .map(|(name, run)| NamedStep { name, run })
            .collect();
        chain
    }

    /// 在链尾追加一个步骤。
    ///
    /// # Errors
    /// - 链条已执行过（哪怕只执行过一次）时返回 [`ChainSealed`]，步骤不会被加入；
    ///   步骤顺序在首次执行时即固定。
    pub fn append(&mut self, name: &'static str, step: Step<C, E>) -> Result<(), ChainSealed> {
        if self.sealed {
            return Err(ChainSealed { step: name });
        }
        self.steps.push(NamedStep { name, run: step });
        Ok(())
    }

    /// 运行下一个待执行步骤，最多一个。
    ///
    /// 成功时游标前移；最后一个步骤成功后链条释放全部闭包。
    ///
    /// # Errors
    /// - [`StepError::NeedMoreData`]：步骤等待更多字节，游标不动，下次调用重跑同一步骤；
    /// - [`StepError::Failed`]：步骤终止性失败。错误写入粘性槽，之后每次调用都返回同一错误，
    ///   不再运行任何步骤；
    /// - [`StepError::Exhausted`]：链条已排空仍被驱动，属于调用方误用。
    pub fn execute(&mut self, ctx: &mut C) -> Result<(), StepError<E>> {
        self.sealed = true;
        if let Some(error) = &self.error {
            return Err(StepError::Failed(error.clone()));
        }
        let Some(step) = self.steps.get_mut(self.cursor) else {
            return Err(StepError::Exhausted);
        };
        match (step.run)(ctx) {
            Ok(()) => {
                trace!(step = step.name, "step completed");
                self.cursor += 1;
                self.completed += 1;
                if self.cursor == self.steps.len() {
                    self.release();
                }
                Ok(())
            }
            Err(StepError::NeedMoreData) => {
                trace!(step = step.name, "step needs more data");
                Err(StepError::NeedMoreData)
            }
            Err(StepError::Failed(error)) => {
                trace!(step = step.name, "step failed");
                self.error = Some(error.clone());
                self.release();
                Err(StepError::Failed(error))
            }
            Err(StepError::Exhausted) => Err(StepError::Exhausted),
        }
    }

    /// 尚未成功执行的步骤数。
    pub fn remaining(&self) -> usize {
        self.steps.len() - self.cursor
    }

    /// 已成功执行的步骤数。
    pub fn executed(&self) -> usize {
        self.completed
    }

    /// 所有步骤均已成功。
    pub fn is_drained(&self) -> bool {
        self.error.is_none() && self.remaining() == 0
    }

    /// 粘性终止错误；链条未失败时为 `None`。
    pub fn error(&self) -> Option<&E> {
        self.error.as_ref()
    }

    /// 下一个待执行步骤的名称，供日志使用。
    pub fn next_step(&self) -> Option<&'static str> {
        self.steps.get(self.cursor).map(|step| step.name)
    }

    fn release(&mut self) {
        self.steps = Vec::new();
        self.cursor = 0;
    }
}

impl<C, E: Clone> Default for StepChain<C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, E: fmt::Debug> fmt::Debug for StepChain<C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pending: Vec<&str> = self.steps[self.cursor..].iter().map(|s| s.name).collect();
        f.debug_struct("StepChain")
            .field("pending", &pending)
            .field("executed", &self.completed)
            .field("error", &self.error)
            .finish()
    }
}
