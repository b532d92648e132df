use core::{
    fmt, mem,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};
use std::sync::{Arc, Weak};

use bytes::BytesMut;
use spin::{Mutex, MutexGuard};

use crate::format::{FrameLayout, PixelFormat, PoolKey};

/// `BufferRecycler` 描述原生池在缓冲最后一个引用释放时的回收入口。
///
/// # 设计初衷（Why）
/// - 像素缓冲由调用方之间共享，归还不是显式 API，而是“最后一个持有者放手”这一事件；
/// - 把回收逻辑挂在 [`PixelBuffer`] 内部存储的 `Drop` 上，原生池即可在不依赖调用方配合的前提下
///   把内存放回空闲链表，或在代际失效时直接释放。
///
/// # 契约定义（What）
/// - `reclaim` 对每块池化内存的每次租借恰好调用一次，调用线程为最后释放引用的线程；
/// - **前置条件**：实现必须线程安全且不得 panic，否则 `Drop` 路径上的 panic 会中止进程；
/// - **后置条件**：实现自行决定复用或释放 `ReclaimedPixels` 携带的内存。
///
/// # 风险提示（Trade-offs）
/// - 缓冲只持有回收器的 `Weak` 引用：池先于缓冲销毁时，回收被跳过，内存随缓冲一起释放。
pub trait BufferRecycler: Send + Sync + 'static {
    fn reclaim(&self, reclaimed: ReclaimedPixels);
}

/// 一次回收动作携带的上下文：内存身份、租出时的代际、以及内存本身。
#[derive(Debug)]
pub struct ReclaimedPixels {
    id: u64,
    generation: u64,
    data: BytesMut,
}

impl ReclaimedPixels {
    pub fn new(id: u64, generation: u64, data: BytesMut) -> Self {
        Self {
            id,
            generation,
            data,
        }
    }

    /// 内存身份，复用时应原样传给新的 [`PixelBuffer`]。
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 缓冲被租出时所在的代际。
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> BytesMut {
        self.data
    }
}

static NEXT_MEMORY_ID: AtomicU64 = AtomicU64::new(1);

/// 为新分配的内存块生成进程内唯一的身份。
///
/// 复用内存时应沿用原身份，纹理缓存正是以该身份判定“同一块内存”。
pub fn fresh_memory_id() -> u64 {
    NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed)
}

/// 池化租约：回收器与租出时的代际。
struct Lease {
    recycler: Weak<dyn BufferRecycler>,
    generation: u64,
}

struct Storage {
    id: u64,
    key: PoolKey,
    layout: FrameLayout,
    data: Mutex<BytesMut>,
    lease: Option<Lease>,
}

impl Drop for Storage {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        if let Some(recycler) = lease.recycler.upgrade() {
            let data = mem::take(self.data.get_mut());
            recycler.reclaim(ReclaimedPixels::new(self.id, lease.generation, data));
        }
    }
}

/// `PixelBuffer` 是引用计数的像素缓冲句柄。
///
/// # 设计动机（Why）
/// - 原生缓冲在池、纹理缓存与多个流水线阶段之间共享，所有权天然是共享的；
/// - 采用 `Arc` 包裹内部存储：`clone` 只增加引用计数，最后一个句柄销毁时触发回收。
///
/// # 契约说明（What）
/// - 宽、高、格式、行跨度在构造后不可变；
/// - 像素内容通过 [`PixelBuffer::lock`] 访问，锁只保证内存安全，
///   多个持有者之间的读写顺序需调用方自行协调；
/// - 由池产出的缓冲 `is_pooled()` 为真；直接分配的缓冲释放后内存直接归还系统。
#[derive(Clone)]
pub struct PixelBuffer {
    storage: Arc<Storage>,
}

impl PixelBuffer {
    /// 构造一个归属原生池的缓冲。
    ///
    /// # 参数
    /// - `id`：内存身份；新内存使用 [`fresh_memory_id`]，复用内存沿用回收时的身份；
    /// - `data`：长度必须等于 `layout.frame_bytes`；
    /// - `recycler`：所属池的回收入口，仅以弱引用保存；
    /// - `generation`：租出时池所在的代际。
    pub fn pooled(
        key: PoolKey,
        layout: FrameLayout,
        id: u64,
        data: BytesMut,
        recycler: &Arc<dyn BufferRecycler>,
        generation: u64,
    ) -> Self {
        debug_assert_eq!(data.len(), layout.frame_bytes);
        Self::from_parts(
            key,
            layout,
            id,
            data,
            Some(Lease {
                recycler: Arc::downgrade(recycler),
                generation,
            }),
        )
    }

    /// 构造一个不属于任何池的缓冲，最后一个引用释放时内存直接归还系统。
    pub fn unpooled(key: PoolKey, layout: FrameLayout, data: BytesMut) -> Self {
        debug_assert_eq!(data.len(), layout.frame_bytes);
        Self::from_parts(key, layout, fresh_memory_id(), data, None)
    }

    fn from_parts(
        key: PoolKey,
        layout: FrameLayout,
        id: u64,
        data: BytesMut,
        lease: Option<Lease>,
    ) -> Self {
        Self {
            storage: Arc::new(Storage {
                id,
                key,
                layout,
                data: Mutex::new(data),
                lease,
            }),
        }
    }

    /// 底层内存的身份；同一块内存被复用时保持不变。
    pub fn id(&self) -> u64 {
        self.storage.id
    }

    pub fn key(&self) -> PoolKey {
        self.storage.key
    }

    pub fn width(&self) -> u32 {
        self.storage.key.width
    }

    pub fn height(&self) -> u32 {
        self.storage.key.height
    }

    pub fn format(&self) -> PixelFormat {
        self.storage.key.format
    }

    pub fn bytes_per_row(&self) -> usize {
        self.storage.layout.bytes_per_row
    }

    /// 整帧字节数。
    pub fn frame_bytes(&self) -> usize {
        self.storage.layout.frame_bytes
    }

    pub fn is_pooled(&self) -> bool {
        self.storage.lease.is_some()
    }

    /// 池化缓冲租出时的代际，直接分配的缓冲返回 `None`。
    pub fn generation(&self) -> Option<u64> {
        self.storage.lease.as_ref().map(|lease| lease.generation)
    }

    /// 当前共享该缓冲的句柄数量。
    pub fn holder_count(&self) -> usize {
        Arc::strong_count(&self.storage)
    }

    /// 两个句柄是否指向同一次租借。
    pub fn ptr_eq(&self, other: &PixelBuffer) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }

    /// 锁定像素内存，返回可读写的字节视图。
    pub fn lock(&self) -> PixelGuard<'_> {
        PixelGuard {
            guard: self.storage.data.lock(),
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("id", &self.id())
            .field("key", &self.key())
            .field("bytes_per_row", &self.bytes_per_row())
            .field("generation", &self.generation())
            .finish()
    }
}

/// 像素内存的锁守卫，解引用为整帧字节切片。
pub struct PixelGuard<'a> {
    guard: MutexGuard<'a, BytesMut>,
}

impl Deref for PixelGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl DerefMut for PixelGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}
