// 教案级说明：
//
// - **意图 (Why)**：空闲缓冲的老化判定依赖单调时间；直接调用 `Instant::now` 会让老化测试
//   只能靠真实睡眠，既慢又不稳定。因此把“取当前时间”抽象为可注入的 [`Clock`]。
// - **契约 (What)**：[`SystemClock`] 读取系统单调时钟；[`ManualClock`] 提供手动推进的虚拟时间轴。
// - **实现提示 (How)**：`ManualClock` 通过 `Arc` 共享状态，克隆后的句柄观察同一条时间轴，
//   测试持有一份、分配器持有一份即可。

use std::sync::Arc;
use std::time::{Duration, Instant};

use spin::Mutex;

/// 抽象可注入的单调时钟。
///
/// # 契约说明（What）
/// - `now` 返回单调不减的时间点；
/// - 实现必须线程安全，因为缓冲可能在任意线程被释放并触发老化检查。
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// 生产环境使用的系统单调时钟。
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// `ManualClock` 提供基于手动推进的虚拟时钟，服务于老化策略的确定性测试。
///
/// # 教案式注释
/// - **意图 (Why)**：测试需要精确跨越 `max_inactive_age` 的边界，而不依赖 `thread::sleep`；
/// - **契约 (What)**：
///   - `new`/`with_start` 构造起始时间，偏移为零；
///   - `advance` 累加偏移，`now` = 起点 + 偏移；
/// - **注意 (Trade-offs)**：内部使用 `spin::Mutex`，临界区只有一次加法，自旋开销可忽略。
#[derive(Clone, Debug)]
pub struct ManualClock {
    inner: Arc<Mutex<ClockState>>,
}

#[derive(Debug)]
struct ClockState {
    origin: Instant,
    elapsed: Duration,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self::with_start(Instant::now())
    }

    pub fn with_start(origin: Instant) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ClockState {
                origin,
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// 推进虚拟时间。
    pub fn advance(&self, delta: Duration) {
        let mut state = self.inner.lock();
        state.elapsed = state.elapsed.saturating_add(delta);
    }

    /// 自起点以来累计推进的时长。
    pub fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        // 超出 `Instant` 可表示范围时停在起点，由调用方的饱和差值兜底。
        state
            .origin
            .checked_add(state.elapsed)
            .unwrap_or(state.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new();
        let observer = clock.clone();
        let start = observer.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(observer.now() - start, Duration::from_millis(250));
        assert_eq!(observer.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn saturated_advance_does_not_overflow() {
        let clock = ManualClock::new();
        clock.advance(Duration::MAX);
        assert_eq!(clock.elapsed(), Duration::MAX);
        let _ = clock.now();
    }
}
