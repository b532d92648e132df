use std::time::Duration;

use crate::{
    buffer::PixelBuffer,
    error::{AllocFailure, CreateFailure},
    format::{FrameLayout, PoolKey},
};

/// 创建原生池所需的全部参数。
///
/// # 契约说明（What）
/// - `key`/`layout`：已经过 [`PoolKey::validate`] 校验，分配器可直接使用；
/// - `max_inactive_age`：空闲缓冲的最长停留时间，`Duration::ZERO` 表示关闭老化；
/// - `max_buffers`：租出 + 空闲的缓冲总数上限，`None` 表示不设阈值。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NativePoolSpec {
    pub key: PoolKey,
    pub layout: FrameLayout,
    pub max_inactive_age: Duration,
    pub max_buffers: Option<usize>,
}

/// `PixelAllocator` 抽象平台分配器：创建原生池与直接分配单个缓冲。
///
/// # 设计背景（Why）
/// - 真正的内存来源（显存映射、IOSurface、dma-buf 或堆）与缓冲池策略无关，
///   缓冲池只依赖本 trait 描述的两个能力；
/// - crate 自带 [`HeapAllocator`](crate::HeapAllocator) 作为默认实现，平台集成方可注入自己的实现。
///
/// # 契约说明（What）
/// - `create_pool`：失败必须以 [`CreateFailure`] 返回，且不得留下任何已创建的原生对象；
/// - `create_buffer`：产出的缓冲必须是 `unpooled`，释放后不回到任何空闲链表；
/// - 实现必须线程安全。
pub trait PixelAllocator: Send + Sync + 'static {
    fn create_pool(&self, spec: NativePoolSpec) -> Result<Box<dyn NativePool>, CreateFailure>;

    fn create_buffer(&self, key: PoolKey, layout: FrameLayout) -> Result<PixelBuffer, AllocFailure>;
}

/// `NativePool` 是单个键对应的原生池对象，由 [`BufferPool`](crate::BufferPool) 独占持有。
///
/// # 契约说明（What）
/// - `create_buffer`：优先复用空闲链表，必要时新分配；每次调用至多一次分配尝试，不得内部重试；
/// - `flush`：丢弃整个空闲链表并进入新代际，之后归还的旧代际缓冲直接释放；
///   返回被丢弃的空闲缓冲数，永不失败；
/// - `trim_idle`：立即执行一次老化检查，返回被回收的空闲缓冲数；
/// - `statistics`：返回调用瞬间的计数快照。
pub trait NativePool: Send + Sync + 'static {
    fn create_buffer(&self) -> Result<PixelBuffer, AllocFailure>;

    fn flush(&self) -> usize;

    fn trim_idle(&self) -> usize;

    fn statistics(&self) -> PoolStats;
}

/// 池统计快照，帮助调用方观测内存行为。
///
/// # 契约说明（What）
/// - `allocations`：累计新分配的缓冲数；`reuses`：累计从空闲链表复用的次数；
/// - `leased`：当前租出、尚未归还的缓冲数；`idle`：当前空闲链表长度；
/// - `aged_out`：因超过最长空闲时间被回收的缓冲数；
/// - `discarded`：因 flush 或代际失效被丢弃的缓冲数；
/// - `failed_acquisitions`：累计分配失败次数；
/// - `generation`：当前代际，每次 flush 加一；
/// - `resident_bytes`：租出与空闲缓冲占用的字节总数。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub allocations: u64,
    pub reuses: u64,
    pub leased: usize,
    pub idle: usize,
    pub aged_out: u64,
    pub discarded: u64,
    pub failed_acquisitions: u64,
    pub generation: u64,
    pub resident_bytes: usize,
}
