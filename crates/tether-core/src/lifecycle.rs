//! 操作实例的生命周期守卫。
//!
//! # 教案式说明
//! - **意图（Why）**：每个操作只有两个并发参与者：截止定时器与 IO 链。二者可能在不同工作线程上
//!   同时得出结论，必须有一个原子的“检查并置位”决定胜者，失败者的效果被丢弃；
//! - **逻辑（How）**：全部状态迁移都在同一把互斥锁内完成。`begin` 颁发运行票据（代数），
//!   所有结算都携带票据，过期票据一律视为失败者；结算时中止同一轮次登记的其他任务；
//! - **契约（What）**：
//!   - 每轮运行至多一次结算成功，从而回调至多交付一次；
//!   - `stop` 在任意状态下可调用且幂等；在延迟回调被认领前调用 `stop` 会抑制该回调；
//!   - 锁内从不调用用户回调，回调内再次调用 `stop` 不会死锁。

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::{self, AbortHandle};

use crate::error::TransportError;

/// 操作所处阶段。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// 已创建，尚未启动。
    Idle,
    /// 正在执行 IO 链，截止定时器可能已布置。
    Running,
    /// 自然结果已确定，延迟回调尚未被认领。
    Completing,
    /// 成功完成，回调已交付。
    Completed,
    /// 以错误结束，回调已交付。
    Failed,
    /// 截止时间先到，超时回调已交付。
    TimedOut,
    /// 被显式停止。
    Stopped,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Completed | Phase::Failed | Phase::TimedOut | Phase::Stopped
        )
    }
}

/// 一次 `begin` 颁发的运行票据。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Run(u64);

/// 结算时的结果类别。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Failed,
    TimedOut,
}

impl From<Outcome> for Phase {
    fn from(value: Outcome) -> Self {
        match value {
            Outcome::Completed => Phase::Completed,
            Outcome::Failed => Phase::Failed,
            Outcome::TimedOut => Phase::TimedOut,
        }
    }
}

#[derive(Debug)]
struct State {
    phase: Phase,
    generation: u64,
    tasks: Vec<AbortHandle>,
}

/// 单个操作实例的状态机守卫。
#[derive(Debug)]
pub struct Lifecycle {
    state: Mutex<State>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                phase: Phase::Idle,
                generation: 0,
                tasks: Vec::new(),
            }),
        }
    }

    pub fn phase(&self) -> Phase {
        self.lock().phase
    }

    /// 是否已不再执行（终态或从未启动后被停止）。
    pub fn is_stopped(&self) -> bool {
        self.phase().is_terminal()
    }

    /// 进入 `Running` 并颁发新的运行票据。
    ///
    /// 仍在执行（`Running`/`Completing`）时返回 [`TransportError::InvalidState`]。
    pub fn begin(&self) -> Result<Run, TransportError> {
        let mut state = self.lock();
        if matches!(state.phase, Phase::Running | Phase::Completing) {
            return Err(TransportError::invalid_state(
                "operation is still running and cannot be restarted",
            ));
        }
        state.generation += 1;
        state.phase = Phase::Running;
        state.tasks.clear();
        Ok(Run(state.generation))
    }

    /// `run` 是否仍是正在执行的那一轮。
    pub fn is_current(&self, run: Run) -> bool {
        let state = self.lock();
        state.generation == run.0 && state.phase == Phase::Running
    }

    /// 登记属于 `run` 的任务；若该轮已结束则立即中止它。
    pub fn track(&self, run: Run, handle: AbortHandle) {
        let mut state = self.lock();
        if state.generation == run.0 && state.phase == Phase::Running {
            state.tasks.push(handle);
        } else {
            drop(state);
            handle.abort();
        }
    }

    /// 以 `outcome` 立即结算本轮；只有第一位调用者返回 `true`。
    pub fn settle(&self, run: Run, outcome: Outcome) -> bool {
        self.transition(run, Phase::Running, outcome.into())
    }

    /// 自然完成但回调需延迟派发：进入 `Completing`。
    pub fn settle_deferred(&self, run: Run) -> bool {
        self.transition(run, Phase::Running, Phase::Completing)
    }

    /// 认领延迟回调；若期间被 `stop` 则返回 `false`。
    pub fn claim_deferred(&self, run: Run, outcome: Outcome) -> bool {
        self.transition(run, Phase::Completing, outcome.into())
    }

    /// 停止操作。返回 `true` 表示本次调用抑制了一个尚未交付的结果。
    pub fn stop(&self) -> bool {
        let mut state = self.lock();
        let suppressed = match state.phase {
            Phase::Idle => false,
            Phase::Running | Phase::Completing => true,
            _ => return false,
        };
        state.phase = Phase::Stopped;
        let tasks = std::mem::take(&mut state.tasks);
        drop(state);
        abort_others(tasks);
        suppressed
    }

    fn transition(&self, run: Run, from: Phase, to: Phase) -> bool {
        let mut state = self.lock();
        if state.generation != run.0 || state.phase != from {
            return false;
        }
        state.phase = to;
        let tasks = std::mem::take(&mut state.tasks);
        drop(state);
        abort_others(tasks);
        true
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// 结算者自身可能就是登记过的任务，跳过它以免在交付回调前被取消。
fn abort_others(tasks: Vec<AbortHandle>) {
    let current = task::try_id();
    for handle in tasks {
        if Some(handle.id()) != current {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn only_first_settlement_wins() {
        let lifecycle = Lifecycle::new();
        let run = lifecycle.begin().expect("首次启动");
        assert!(lifecycle.settle(run, Outcome::TimedOut));
        assert!(!lifecycle.settle(run, Outcome::Completed));
        assert!(!lifecycle.settle_deferred(run));
        assert_eq!(lifecycle.phase(), Phase::TimedOut);
    }

    #[test]
    fn stop_before_claim_suppresses_deferred_callback() {
        let lifecycle = Lifecycle::new();
        let run = lifecycle.begin().expect("首次启动");
        assert!(lifecycle.settle_deferred(run));
        assert!(lifecycle.stop());
        assert!(!lifecycle.claim_deferred(run, Outcome::Completed));
        assert_eq!(lifecycle.phase(), Phase::Stopped);
    }

    #[test]
    fn stop_is_idempotent_and_silent_after_completion() {
        let lifecycle = Lifecycle::new();
        assert!(!lifecycle.stop());
        let lifecycle = Lifecycle::new();
        let run = lifecycle.begin().expect("首次启动");
        assert!(lifecycle.settle(run, Outcome::Completed));
        assert!(!lifecycle.stop());
        assert!(!lifecycle.stop());
        assert_eq!(lifecycle.phase(), Phase::Completed);
    }

    #[test]
    fn restart_rejected_while_running_and_stale_runs_ignored() {
        let lifecycle = Lifecycle::new();
        let first = lifecycle.begin().expect("首次启动");
        let err = lifecycle.begin().expect_err("运行中不得重启");
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        lifecycle.stop();
        let second = lifecycle.begin().expect("停止后可再次启动");
        assert!(!lifecycle.is_current(first));
        assert!(lifecycle.is_current(second));
        assert!(!lifecycle.settle(first, Outcome::Failed));
        assert!(lifecycle.settle(second, Outcome::Completed));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn settlement_aborts_tracked_tasks() {
        let lifecycle = Lifecycle::new();
        let run = lifecycle.begin().expect("首次启动");
        let sleeper = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
        });
        lifecycle.track(run, sleeper.abort_handle());
        assert!(lifecycle.settle(run, Outcome::Completed));
        let err = sleeper.await.expect_err("任务应被中止");
        assert!(err.is_cancelled());
    }
}
