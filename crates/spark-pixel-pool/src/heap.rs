use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::{
    mem,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::{Bytes, BytesMut};
use spin::Mutex;

use crate::{
    allocator::{NativePool, NativePoolSpec, PixelAllocator, PoolStats},
    buffer::{BufferRecycler, PixelBuffer, ReclaimedPixels, fresh_memory_id},
    clock::{Clock, SystemClock},
    error::{AllocFailure, CreateFailure},
    format::{FrameLayout, PoolKey},
};

/// `HeapAllocator` 是基于进程堆的平台分配器实现。
///
/// # 模块角色（Why）
/// - 作为 [`PixelAllocator`] 的默认实现，让缓冲池在没有 GPU 平台绑定时也能完整运行，
///   测试与 CPU 流水线直接使用它；
/// - 行为上模仿平台像素缓冲池：引用计数缓冲、空闲链表、空闲老化、分配阈值与 flush 代际。
///
/// # 核心机制（How）
/// - 每个原生池内部维护 `spin::Mutex<Vec<IdleBuffer>>` 作为空闲链表，后进先出；
/// - 新内存通过 `Vec::try_reserve_exact` 申请，失败映射为 [`AllocFailure::OutOfMemory`]，
///   而不是中止进程；
/// - 时间来源可注入，老化测试使用 [`ManualClock`](crate::ManualClock)。
#[derive(Clone)]
pub struct HeapAllocator {
    clock: Arc<dyn Clock>,
}

impl Default for HeapAllocator {
    fn default() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl HeapAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定时钟构造分配器，所有由它创建的原生池共享该时钟。
    pub fn with_clock(clock: impl Clock) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }
}

impl PixelAllocator for HeapAllocator {
    fn create_pool(&self, spec: NativePoolSpec) -> Result<Box<dyn NativePool>, CreateFailure> {
        Ok(Box::new(HeapPool::new(spec, Arc::clone(&self.clock))))
    }

    fn create_buffer(&self, key: PoolKey, layout: FrameLayout) -> Result<PixelBuffer, AllocFailure> {
        let data = reserve_frame(layout.frame_bytes)?;
        Ok(PixelBuffer::unpooled(key, layout, data))
    }
}

/// 以可失败的方式申请一整帧清零内存。
fn reserve_frame(bytes: usize) -> Result<BytesMut, AllocFailure> {
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(bytes)
        .map_err(|_| AllocFailure::OutOfMemory { bytes })?;
    storage.resize(bytes, 0);
    Ok(Bytes::from(storage)
        .try_into_mut()
        .unwrap_or_else(|shared| BytesMut::from(shared.as_ref())))
}

/// 单个键对应的堆上原生池。
struct HeapPool {
    inner: Arc<PoolInner>,
}

impl HeapPool {
    fn new(spec: NativePoolSpec, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                spec,
                clock,
                free_list: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                metrics: PoolMetrics::default(),
            }),
        }
    }
}

impl NativePool for HeapPool {
    fn create_buffer(&self) -> Result<PixelBuffer, AllocFailure> {
        let recycler: Arc<dyn BufferRecycler> = self.inner.clone();
        self.inner.acquire(&recycler)
    }

    fn flush(&self) -> usize {
        self.inner.flush()
    }

    fn trim_idle(&self) -> usize {
        self.inner.trim_idle()
    }

    fn statistics(&self) -> PoolStats {
        self.inner.snapshot()
    }
}

struct IdleBuffer {
    id: u64,
    data: BytesMut,
    released_at: Instant,
}

/// 空闲链表一次加锁的结果：复用到的缓冲，或为新分配预留的名额。
enum Slot {
    Reused(IdleBuffer),
    Reserved,
}

struct PoolInner {
    spec: NativePoolSpec,
    clock: Arc<dyn Clock>,
    free_list: Mutex<Vec<IdleBuffer>>,
    generation: AtomicU64,
    metrics: PoolMetrics,
}

impl PoolInner {
    /// 复用或新分配一个缓冲。
    ///
    /// # 执行逻辑（How）
    /// 1. 加锁后先做老化检查，再从链表尾部取最近归还的缓冲；
    /// 2. 链表为空时检查阈值，未超限则先占用一个租出名额再解锁；
    /// 3. 在锁外申请新内存，失败时归还名额并记一次失败。
    ///
    /// 被老化淘汰的内存在锁外释放。
    fn acquire(&self, recycler: &Arc<dyn BufferRecycler>) -> Result<PixelBuffer, AllocFailure> {
        let now = self.clock.now();
        let (slot, generation, expired) = {
            let mut list = self.free_list.lock();
            let expired = self.age_out(&mut list, now);
            let generation = self.generation.load(Ordering::Acquire);
            let popped = list.pop();
            let slot = match popped {
                Some(idle) => Slot::Reused(idle),
                None => {
                    let managed = self.metrics.leased.load(Ordering::Relaxed);
                    if let Some(limit) = self.spec.max_buffers.filter(|limit| managed >= *limit) {
                        drop(list);
                        self.metrics
                            .failed_acquisitions
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(key = %self.spec.key, limit, "allocation threshold reached");
                        return Err(AllocFailure::ThresholdExceeded { limit });
                    }
                    Slot::Reserved
                }
            };
            self.metrics.leased.fetch_add(1, Ordering::Relaxed);
            (slot, generation, expired)
        };
        drop(expired);

        let (id, data) = match slot {
            Slot::Reused(idle) => {
                self.metrics.reuses.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(key = %self.spec.key, id = idle.id, "reused idle pixel buffer");
                (idle.id, idle.data)
            }
            Slot::Reserved => match reserve_frame(self.spec.layout.frame_bytes) {
                Ok(data) => {
                    let id = fresh_memory_id();
                    self.metrics.allocations.fetch_add(1, Ordering::Relaxed);
                    self.metrics
                        .resident_bytes
                        .fetch_add(data.len(), Ordering::Relaxed);
                    tracing::trace!(key = %self.spec.key, id, "allocated pixel buffer");
                    (id, data)
                }
                Err(err) => {
                    saturating_sub(&self.metrics.leased, 1);
                    self.metrics.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            },
        };

        Ok(PixelBuffer::pooled(
            self.spec.key,
            self.spec.layout,
            id,
            data,
            recycler,
            generation,
        ))
    }

    /// 清空空闲链表并进入新代际。
    fn flush(&self) -> usize {
        let drained = {
            let mut list = self.free_list.lock();
            self.generation.fetch_add(1, Ordering::AcqRel);
            mem::take(&mut *list)
        };
        let count = drained.len();
        self.forget(&drained);
        self.metrics
            .discarded
            .fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    fn trim_idle(&self) -> usize {
        let now = self.clock.now();
        let expired = {
            let mut list = self.free_list.lock();
            self.age_out(&mut list, now)
        };
        expired.len()
    }

    /// 从链表中移出空闲时间达到上限的缓冲，交由调用方在锁外释放。
    fn age_out(&self, list: &mut Vec<IdleBuffer>, now: Instant) -> Vec<IdleBuffer> {
        let max_age = self.spec.max_inactive_age;
        if max_age == Duration::ZERO || list.is_empty() {
            return Vec::new();
        }
        let (expired, kept): (Vec<_>, Vec<_>) = mem::take(list)
            .into_iter()
            .partition(|idle| now.saturating_duration_since(idle.released_at) >= max_age);
        *list = kept;
        if !expired.is_empty() {
            self.forget(&expired);
            self.metrics
                .aged_out
                .fetch_add(expired.len() as u64, Ordering::Relaxed);
            tracing::trace!(
                key = %self.spec.key,
                released = expired.len(),
                "released idle pixel buffers past max inactive age"
            );
        }
        expired
    }

    fn forget(&self, released: &[IdleBuffer]) {
        let bytes: usize = released.iter().map(|idle| idle.data.len()).sum();
        saturating_sub(&self.metrics.resident_bytes, bytes);
    }

    fn snapshot(&self) -> PoolStats {
        let idle = self.free_list.lock().len();
        PoolStats {
            allocations: self.metrics.allocations.load(Ordering::Relaxed),
            reuses: self.metrics.reuses.load(Ordering::Relaxed),
            leased: self.metrics.leased.load(Ordering::Relaxed),
            idle,
            aged_out: self.metrics.aged_out.load(Ordering::Relaxed),
            discarded: self.metrics.discarded.load(Ordering::Relaxed),
            failed_acquisitions: self.metrics.failed_acquisitions.load(Ordering::Relaxed),
            generation: self.generation.load(Ordering::Acquire),
            resident_bytes: self.metrics.resident_bytes.load(Ordering::Relaxed),
        }
    }
}

impl BufferRecycler for PoolInner {
    /// 租出计数的递减与入链在同一把锁内完成，`acquire` 看不到“已归还却不在链表中”的缓冲。
    fn reclaim(&self, reclaimed: ReclaimedPixels) {
        let now = self.clock.now();
        let (stale, expired) = {
            let mut list = self.free_list.lock();
            saturating_sub(&self.metrics.leased, 1);
            if reclaimed.generation() != self.generation.load(Ordering::Acquire) {
                (Some(reclaimed), Vec::new())
            } else {
                list.push(IdleBuffer {
                    id: reclaimed.id(),
                    data: reclaimed.into_data(),
                    released_at: now,
                });
                (None, self.age_out(&mut list, now))
            }
        };
        drop(expired);

        if let Some(stale) = stale {
            saturating_sub(&self.metrics.resident_bytes, stale.len());
            self.metrics.discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(
                key = %self.spec.key,
                id = stale.id(),
                generation = stale.generation(),
                "released pixel buffer from a flushed generation"
            );
        }
    }
}

#[derive(Default)]
struct PoolMetrics {
    allocations: AtomicU64,
    reuses: AtomicU64,
    leased: AtomicUsize,
    aged_out: AtomicU64,
    discarded: AtomicU64,
    failed_acquisitions: AtomicU64,
    resident_bytes: AtomicUsize,
}

fn saturating_sub(target: &AtomicUsize, value: usize) {
    let _ = target.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(value))
    });
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Barrier, atomic::AtomicBool},
        thread,
    };

    use super::*;
    use crate::{clock::ManualClock, format::PixelFormat};

    fn spec(max_age: Duration, max_buffers: Option<usize>) -> NativePoolSpec {
        let key = PoolKey::new(8, 8, PixelFormat::Bgra32);
        NativePoolSpec {
            key,
            layout: key.validate().expect("合法键"),
            max_inactive_age: max_age,
            max_buffers,
        }
    }

    #[test]
    fn released_buffer_is_reused_with_same_identity() {
        let pool = HeapAllocator::new()
            .create_pool(spec(Duration::from_secs(1), None))
            .expect("创建原生池");
        let first = pool.create_buffer().expect("首次分配");
        let id = first.id();
        drop(first);
        let second = pool.create_buffer().expect("复用分配");
        assert_eq!(second.id(), id);
        let stats = pool.statistics();
        assert_eq!(stats.allocations, 1);
        assert_eq!(stats.reuses, 1);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.resident_bytes, 8 * 8 * 4);
    }

    #[test]
    fn idle_buffers_age_out_at_threshold() {
        let clock = ManualClock::new();
        let pool = HeapAllocator::with_clock(clock.clone())
            .create_pool(spec(Duration::from_millis(100), None))
            .expect("创建原生池");
        drop(pool.create_buffer().expect("分配"));
        clock.advance(Duration::from_millis(99));
        assert_eq!(pool.trim_idle(), 0, "未到期的缓冲应保留");
        clock.advance(Duration::from_millis(1));
        assert_eq!(pool.trim_idle(), 1, "到期后应被回收");
        let stats = pool.statistics();
        assert_eq!(stats.aged_out, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.resident_bytes, 0);
    }

    #[test]
    fn zero_max_age_disables_aging() {
        let clock = ManualClock::new();
        let pool = HeapAllocator::with_clock(clock.clone())
            .create_pool(spec(Duration::ZERO, None))
            .expect("创建原生池");
        drop(pool.create_buffer().expect("分配"));
        clock.advance(Duration::from_secs(3600));
        assert_eq!(pool.trim_idle(), 0);
        assert_eq!(pool.statistics().idle, 1);
    }

    #[test]
    fn flush_retires_outstanding_generation() {
        let pool = HeapAllocator::new()
            .create_pool(spec(Duration::from_secs(1), None))
            .expect("创建原生池");
        let leased = pool.create_buffer().expect("分配");
        drop(pool.create_buffer().expect("分配第二块"));
        assert_eq!(pool.flush(), 1, "仅空闲缓冲被丢弃");
        drop(leased);
        let stats = pool.statistics();
        assert_eq!(stats.idle, 0, "旧代际缓冲归还后不得进入空闲链表");
        assert_eq!(stats.discarded, 2);
        assert_eq!(stats.generation, 1);
        assert_eq!(stats.resident_bytes, 0);
    }

    #[test]
    fn threshold_counts_leased_and_idle_buffers() {
        let pool = HeapAllocator::new()
            .create_pool(spec(Duration::from_secs(1), Some(2)))
            .expect("创建原生池");
        let a = pool.create_buffer().expect("第一块");
        let _b = pool.create_buffer().expect("第二块");
        assert_eq!(
            pool.create_buffer().map(|_| ()),
            Err(AllocFailure::ThresholdExceeded { limit: 2 })
        );
        drop(a);
        assert!(pool.create_buffer().is_ok(), "空闲缓冲可复用，不受阈值限制");
        assert_eq!(pool.statistics().failed_acquisitions, 1);
    }

    /// 在首次被调用时阻塞的时钟，用于把归还线程停在 `reclaim` 内部。
    #[derive(Clone)]
    struct GatedClock(Arc<Gate>);

    struct Gate {
        armed: AtomicBool,
        entered: Barrier,
        resume: Barrier,
    }

    impl GatedClock {
        fn new() -> Self {
            Self(Arc::new(Gate {
                armed: AtomicBool::new(false),
                entered: Barrier::new(2),
                resume: Barrier::new(2),
            }))
        }

        fn arm(&self) {
            self.0.armed.store(true, Ordering::SeqCst);
        }
    }

    impl Clock for GatedClock {
        fn now(&self) -> Instant {
            if self.0.armed.swap(false, Ordering::SeqCst) {
                self.0.entered.wait();
                self.0.resume.wait();
            }
            Instant::now()
        }
    }

    #[test]
    fn release_in_flight_still_counts_against_threshold() {
        let clock = GatedClock::new();
        let pool = HeapAllocator::with_clock(clock.clone())
            .create_pool(spec(Duration::from_secs(1), Some(1)))
            .expect("创建原生池");
        let first = pool.create_buffer().expect("首次分配");
        clock.arm();

        let second = thread::scope(|scope| {
            let releaser = scope.spawn(move || drop(first));
            clock.0.entered.wait();
            let second = pool.create_buffer().map(|buffer| buffer.id());
            clock.0.resume.wait();
            releaser.join().expect("归还线程不应 panic");
            second
        });

        assert_eq!(second, Err(AllocFailure::ThresholdExceeded { limit: 1 }));
        let stats = pool.statistics();
        assert!(stats.leased + stats.idle <= 1, "受管缓冲不得超过阈值: {stats:?}");
        assert_eq!(stats.allocations, 1);
        assert!(pool.create_buffer().is_ok(), "归还完成后可复用");
    }
}
