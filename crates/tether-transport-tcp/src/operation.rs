//! 单次操作（连接、读、写）共用的结算骨架。
//!
//! # 教案式说明
//! - **意图（Why）**：`Connection`、`ReadOne`、`WriteOne` 都是“IO 链与截止定时器赛跑，
//!   胜者交付唯一一次回调”的小状态机，差别只在 IO 链本身；
//! - **逻辑（How）**：[`OneShot`] 把 [`Lifecycle`]、执行器句柄与回调槽位放在一起。
//!   回调以 `Option` 保存，结算胜者 `take` 后调用，之后槽位为空，任何迟到者都无从调用；
//! - **契约（What）**：
//!   - `fail` 立即（非延迟）交付错误；
//!   - `succeed_deferred` 先进入 `Completing`，再经 `post` 派发，派发时重新认领，
//!     期间的 `stop` 会抑制回调；
//!   - `stop` 只在本轮没有结算胜者时清空回调槽位；胜者已确定时槽位留给胜者交付。

use std::{
    future::Future,
    sync::{Arc, Mutex, PoisonError},
};

use tether_core::{
    ExecutorHandle, Lifecycle, OperationKind, Outcome, Phase, Run, Timeout, TransportError,
    error::timeout_error,
};

pub(crate) type Callback<T> = Box<dyn FnOnce(Result<T, TransportError>) + Send>;

pub(crate) struct OneShot<T> {
    executor: ExecutorHandle,
    lifecycle: Lifecycle,
    callback: Mutex<Option<Callback<T>>>,
}

impl<T: Send + 'static> OneShot<T> {
    pub(crate) fn new(executor: ExecutorHandle, callback: Callback<T>) -> Arc<Self> {
        Arc::new(Self {
            executor,
            lifecycle: Lifecycle::new(),
            callback: Mutex::new(Some(callback)),
        })
    }

    pub(crate) fn phase(&self) -> Phase {
        self.lifecycle.phase()
    }

    /// 启动一轮：先布置截止定时器，再提交 IO 链。
    ///
    /// 任一调度失败（执行器已关闭）都会撤销本轮并同步返回错误，不会留下悬挂的 `Running`。
    pub(crate) fn launch<F>(
        self: &Arc<Self>,
        timeout: Timeout,
        operation: OperationKind,
        io: impl FnOnce(Run) -> F,
    ) -> Result<(), TransportError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let run = self.lifecycle.begin()?;
        let scheduled = self.arm_deadline(run, timeout, operation).and_then(|()| {
            let task = self.executor.spawn(io(run))?;
            self.lifecycle.track(run, task);
            Ok(())
        });
        if scheduled.is_err() {
            self.lifecycle.stop();
            self.take_callback();
        }
        scheduled
    }

    fn arm_deadline(
        self: &Arc<Self>,
        run: Run,
        timeout: Timeout,
        operation: OperationKind,
    ) -> Result<(), TransportError> {
        let Some(delay) = timeout.duration() else {
            return Ok(());
        };
        let this = Arc::clone(self);
        let timer = self.executor.after(delay, move || {
            if this.lifecycle.settle(run, Outcome::TimedOut) {
                tracing::debug!(code = operation.code, ?delay, "operation deadline expired");
                this.deliver(Err(timeout_error(operation)));
            }
        })?;
        self.lifecycle.track(run, timer);
        Ok(())
    }

    /// 立即以错误结算。
    pub(crate) fn fail(&self, run: Run, error: TransportError) {
        if self.lifecycle.settle(run, Outcome::Failed) {
            self.deliver(Err(error));
        }
    }

    /// 立即以成功结算。
    pub(crate) fn succeed(&self, run: Run, value: T) {
        if self.lifecycle.settle(run, Outcome::Completed) {
            self.deliver(Ok(value));
        }
    }

    /// 以成功结算，但回调经执行器延迟派发。
    pub(crate) fn succeed_deferred(self: &Arc<Self>, run: Run, value: T) {
        if !self.lifecycle.settle_deferred(run) {
            return;
        }
        let this = Arc::clone(self);
        let posted = self.executor.post(move || {
            if this.lifecycle.claim_deferred(run, Outcome::Completed) {
                this.deliver(Ok(value));
            }
        });
        if let Err(err) = posted {
            tracing::debug!(error = %err, "deferred completion dropped");
        }
    }

    /// 停止；返回是否抑制了一个尚未交付的结果。
    pub(crate) fn stop(&self) -> bool {
        let suppressed = self.lifecycle.stop();
        // 终态为 `Stopped` 说明没有结算胜者，此后也不会再有。
        if self.lifecycle.phase() == Phase::Stopped {
            self.take_callback();
        }
        suppressed
    }

    fn deliver(&self, result: Result<T, TransportError>) {
        if let Some(callback) = self.take_callback() {
            callback(result);
        }
    }

    fn take_callback(&self) -> Option<Callback<T>> {
        self.callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn running(shot: &Arc<OneShot<u8>>) -> Run {
        let mut ticket = None;
        shot.launch(Timeout::NONE, tether_core::error::READ, |run| {
            ticket = Some(run);
            std::future::pending::<()>()
        })
        .expect("启动成功");
        ticket.expect("颁发票据")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_after_settle_leaves_callback_to_winner() {
        let executor = ExecutorHandle::current().expect("当前运行时");
        let (tx, rx) = mpsc::channel();
        let shot = OneShot::new(executor, Box::new(move |result: Result<u8, TransportError>| {
            let _ = tx.send(result.is_ok());
        }));
        let run = running(&shot);

        // 胜者已结算但尚未交付时，另一线程调用 stop。
        assert!(shot.lifecycle.settle(run, Outcome::Completed));
        assert!(!shot.stop());
        assert_eq!(shot.phase(), Phase::Completed);
        shot.deliver(Ok(7));
        assert_eq!(rx.try_recv(), Ok(true));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_while_running_drops_callback() {
        let executor = ExecutorHandle::current().expect("当前运行时");
        let (tx, rx) = mpsc::channel::<bool>();
        let shot = OneShot::new(executor, Box::new(move |result: Result<u8, TransportError>| {
            let _ = tx.send(result.is_ok());
        }));
        let run = running(&shot);

        assert!(shot.stop());
        shot.succeed(run, 1);
        // 回调随槽位一起释放，发送端已断开。
        assert_eq!(rx.try_recv(), Err(mpsc::TryRecvError::Disconnected));
    }
}
