//! `spark-pixel-pool` 为 GPU/图像流水线提供按 `(width, height, format)` 分键的像素缓冲池。
//!
//! # 模块定位（Why）
//! - 避免每帧向平台申请、销毁 GPU 可见内存：同规格缓冲在释放后回到空闲链表，下次直接复用；
//! - 空闲过久的缓冲由分配器回收，把内存还给系统；
//! - flush 时清空空闲链表并通知纹理缓存，防止派生的 GPU 对象引用已失效的内存。
//!
//! # 设计概要（How）
//! - [`BufferPool`] 是核心状态机，独占一个原生池对象；
//! - [`PixelAllocator`]/[`NativePool`] 是平台分配器的接缝，[`HeapAllocator`] 为默认的进程堆实现；
//! - [`PixelBuffer`] 为引用计数句柄，最后一个句柄销毁时经 [`BufferRecycler`] 归还内存；
//! - [`TextureCacheInvalidator`] 是外部纹理缓存唯一需要提供的能力。
//!
//! # 命名约定（Consistency）
//! - 池键、空闲链表、代际等术语在各模块中保持一致：flush 使代际加一，旧代际缓冲不再回到链表。

mod allocator;
mod buffer;
mod clock;
mod error;
mod format;
mod heap;
mod invalidate;
mod options;
mod pool;

pub use allocator::{NativePool, NativePoolSpec, PixelAllocator, PoolStats};
pub use buffer::{BufferRecycler, PixelBuffer, PixelGuard, ReclaimedPixels, fresh_memory_id};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{AllocFailure, CreateFailure, PoolError};
pub use format::{FrameLayout, PixelFormat, PoolKey};
pub use heap::HeapAllocator;
pub use invalidate::TextureCacheInvalidator;
pub use options::{DEFAULT_MAX_INACTIVE_BUFFER_AGE_MS, PoolOptions};
pub use pool::BufferPool;
