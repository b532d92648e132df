use core::{
    fmt,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::{sync::Arc, time::Duration};

use crate::{
    allocator::{NativePool, NativePoolSpec, PixelAllocator, PoolStats},
    buffer::PixelBuffer,
    error::{AllocFailure, PoolError},
    format::{PixelFormat, PoolKey},
    heap::HeapAllocator,
    invalidate::TextureCacheInvalidator,
    options::PoolOptions,
};

/// `BufferPool` 为单个 `(width, height, format)` 键缓存并复用像素缓冲。
///
/// # 模块角色（Why）
/// - 流水线每帧都需要同规格的缓冲，若每帧向平台申请再销毁显存映射内存，开销不可接受；
/// - 本类型独占一个原生池对象，优先从空闲链表复用，空闲过久的缓冲交由分配器回收，
///   并在 flush 时通知外部纹理缓存丢弃绑定到旧内存的派生对象。
///
/// # 核心机制（How）
/// - `native`：构造时一次性创建的原生池，随本实例销毁；不向外暴露原始句柄；
/// - `count`：原子计数，每次成功租出加一，仅用于诊断；
/// - `on_invalidate`：可选回调，在 `flush` 返回前于调用线程同步执行恰好一次。
///
/// # 契约说明（What）
/// - **线程安全**：实例为 `Send + Sync`，可包在 `Arc` 中跨线程共享，`get_buffer` 与 `flush` 可并发调用；
/// - **状态机**：构造成功即可用；`flush` 之后回到“空闲链表为空”的可用状态，不存在失效中间态；
/// - **失败语义**：构造失败返回 [`PoolError::Construction`]，单次分配失败返回
///   [`PoolError::Allocation`]，均不在内部重试。
pub struct BufferPool {
    key: PoolKey,
    native: Box<dyn NativePool>,
    count: AtomicUsize,
    flushes: AtomicU64,
    max_inactive_age: Duration,
    on_invalidate: Option<Arc<dyn TextureCacheInvalidator>>,
}

impl BufferPool {
    /// 使用默认的 [`HeapAllocator`] 构造缓冲池，不设分配阈值。
    pub fn new(
        width: u32,
        height: u32,
        format: PixelFormat,
        max_inactive_age: Duration,
        on_invalidate: Option<Arc<dyn TextureCacheInvalidator>>,
    ) -> Result<Self, PoolError> {
        Self::new_in(
            &HeapAllocator::default(),
            width,
            height,
            format,
            max_inactive_age,
            on_invalidate,
        )
    }

    /// 使用指定分配器构造缓冲池。
    pub fn new_in(
        allocator: &dyn PixelAllocator,
        width: u32,
        height: u32,
        format: PixelFormat,
        max_inactive_age: Duration,
        on_invalidate: Option<Arc<dyn TextureCacheInvalidator>>,
    ) -> Result<Self, PoolError> {
        Self::build(
            allocator,
            PoolKey::new(width, height, format),
            max_inactive_age,
            None,
            on_invalidate,
        )
    }

    /// 依据注册表下发的 [`PoolOptions`] 构造可共享的缓冲池。
    pub fn create(
        key: PoolKey,
        options: &PoolOptions,
        on_invalidate: Option<Arc<dyn TextureCacheInvalidator>>,
    ) -> Result<Arc<Self>, PoolError> {
        Self::create_in(&HeapAllocator::default(), key, options, on_invalidate)
    }

    pub fn create_in(
        allocator: &dyn PixelAllocator,
        key: PoolKey,
        options: &PoolOptions,
        on_invalidate: Option<Arc<dyn TextureCacheInvalidator>>,
    ) -> Result<Arc<Self>, PoolError> {
        Self::build(
            allocator,
            key,
            options.max_inactive_buffer_age(),
            options.max_buffers,
            on_invalidate,
        )
        .map(Arc::new)
    }

    /// 构造的唯一实现路径。
    ///
    /// # 执行逻辑（How）
    /// 1. 先校验键，非法键在任何原生对象创建之前返回；
    /// 2. 再请求分配器创建原生池，失败原样包装为 `Construction`；
    /// 3. 只有两步都成功才组装实例，调用方不可能拿到半成品。
    fn build(
        allocator: &dyn PixelAllocator,
        key: PoolKey,
        max_inactive_age: Duration,
        max_buffers: Option<usize>,
        on_invalidate: Option<Arc<dyn TextureCacheInvalidator>>,
    ) -> Result<Self, PoolError> {
        let native = key
            .validate()
            .and_then(|layout| {
                allocator.create_pool(NativePoolSpec {
                    key,
                    layout,
                    max_inactive_age,
                    max_buffers,
                })
            })
            .map_err(|cause| {
                tracing::warn!(%key, %cause, "pixel buffer pool construction failed");
                PoolError::Construction { key, cause }
            })?;

        tracing::debug!(
            %key,
            max_inactive_age_ms =
                u64::try_from(max_inactive_age.as_millis()).unwrap_or(u64::MAX),
            ?max_buffers,
            "pixel buffer pool created"
        );

        Ok(Self {
            key,
            native,
            count: AtomicUsize::new(0),
            flushes: AtomicU64::new(0),
            max_inactive_age,
            on_invalidate,
        })
    }

    /// 租出一个与池键一致的缓冲。
    ///
    /// # 契约说明（What）
    /// - 优先复用空闲链表，否则由原生池新分配；每次调用只尝试一次；
    /// - 成功后计数加一；失败时计数不变并返回 [`PoolError::Allocation`]；
    /// - 归还是隐式的：最后一个 `PixelBuffer` 句柄销毁即归还。
    pub fn get_buffer(&self) -> Result<PixelBuffer, PoolError> {
        match self.native.create_buffer() {
            Ok(buffer) => {
                self.count.fetch_add(1, Ordering::Relaxed);
                Ok(buffer)
            }
            Err(cause) => {
                tracing::warn!(key = %self.key, %cause, "pixel buffer allocation failed");
                Err(PoolError::Allocation {
                    key: self.key,
                    cause,
                })
            }
        }
    }

    /// 累计成功租出的缓冲数，仅用于诊断。
    pub fn buffer_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    /// 丢弃空闲链表中的全部缓冲，并同步通知纹理缓存失效。
    ///
    /// # 教案式说明
    /// - **意图 (Why)**：内存代际变化后，纹理缓存里绑定旧内存的对象必须在池再次被使用前作废；
    /// - **执行 (How)**：先让原生池清空空闲链表并进入新代际，再调用 `on_invalidate`；
    ///   仍被外部持有的缓冲不受影响，归还时因代际过期被直接释放；
    /// - **契约 (What)**：永不失败；空池上调用同样触发回调，调用方需容忍冗余通知。
    pub fn flush(&self) {
        let discarded = self.native.flush();
        let flushes = self.flushes.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(key = %self.key, discarded, flushes, "pixel buffer pool flushed");
        if let Some(invalidator) = &self.on_invalidate {
            invalidator.invalidate();
        }
    }

    /// 立即执行一次空闲老化检查，返回被回收的空闲缓冲数。
    ///
    /// 仍在链表中的缓冲内存身份不变，因此不会触发 `on_invalidate`。
    pub fn trim_idle(&self) -> usize {
        let released = self.native.trim_idle();
        if released > 0 {
            tracing::debug!(key = %self.key, released, "trimmed idle pixel buffers");
        }
        released
    }

    pub fn statistics(&self) -> PoolStats {
        self.native.statistics()
    }

    pub fn key(&self) -> PoolKey {
        self.key
    }

    pub fn max_inactive_age(&self) -> Duration {
        self.max_inactive_age
    }

    /// 内部计数的可读快照。
    pub fn debug_string(&self) -> String {
        self.to_string()
    }

    /// 绕过任何池，使用默认分配器直接分配一个缓冲。
    pub fn create_buffer_without_pool(
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<PixelBuffer, PoolError> {
        Self::create_buffer_without_pool_in(&HeapAllocator::default(), width, height, format)
    }

    /// 绕过任何池，使用指定分配器直接分配一个缓冲。
    ///
    /// 返回的缓冲释放后内存直接归还系统，不影响任何池的计数与空闲链表。
    pub fn create_buffer_without_pool_in(
        allocator: &dyn PixelAllocator,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<PixelBuffer, PoolError> {
        let key = PoolKey::new(width, height, format);
        key.validate()
            .map_err(AllocFailure::InvalidKey)
            .and_then(|layout| allocator.create_buffer(key, layout))
            .map_err(|cause| {
                tracing::warn!(%key, %cause, "direct pixel buffer allocation failed");
                PoolError::Allocation { key, cause }
            })
    }
}

impl fmt::Display for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stats = self.native.statistics();
        write!(
            f,
            "BufferPool {} count={} flushes={} leased={} idle={} allocations={} reuses={} generation={}",
            self.key,
            self.buffer_count(),
            self.flushes.load(Ordering::Relaxed),
            stats.leased,
            stats.idle,
            stats.allocations,
            stats.reuses,
            stats.generation,
        )
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("key", &self.key)
            .field("count", &self.buffer_count())
            .field("max_inactive_age", &self.max_inactive_age)
            .field("has_invalidator", &self.on_invalidate.is_some())
            .finish_non_exhaustive()
    }
}
