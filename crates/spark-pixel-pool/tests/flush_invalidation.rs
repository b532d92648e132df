//! `flush_invalidation` 集成测试：验证 flush 与纹理缓存失效回调之间的协作协议。
//!
//! # 测试总览（Why）
//! - 纹理缓存以缓冲内存身份为键缓存派生对象，flush 之后这些条目必须在池再次被使用前作废；
//! - 以 `FakeTextureCache` 模拟外部缓存，观察回调次数、时机以及旧内存是否会被再次租出。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use spark_pixel_pool::{BufferPool, PixelBuffer, PixelFormat, TextureCacheInvalidator};

/// `FakeTextureCache`：以内存身份为键的纹理缓存探针。
///
/// # 行为描述（How）
/// - `texture_for` 在首次见到某块内存时创建一个递增的“纹理名”，之后命中缓存；
/// - `invalidate` 清空所有条目并累计失效次数。
#[derive(Default)]
struct FakeTextureCache {
    state: Mutex<CacheState>,
}

#[derive(Default)]
struct CacheState {
    textures: HashMap<u64, u32>,
    next_name: u32,
    invalidations: usize,
}

impl FakeTextureCache {
    fn texture_for(&self, buffer: &PixelBuffer) -> u32 {
        let mut state = self.state.lock().expect("mutex poisoned");
        if let Some(name) = state.textures.get(&buffer.id()) {
            return *name;
        }
        state.next_name += 1;
        let name = state.next_name;
        state.textures.insert(buffer.id(), name);
        name
    }

    fn len(&self) -> usize {
        self.state.lock().expect("mutex poisoned").textures.len()
    }

    fn invalidations(&self) -> usize {
        self.state.lock().expect("mutex poisoned").invalidations
    }
}

impl TextureCacheInvalidator for FakeTextureCache {
    fn invalidate(&self) {
        let mut state = self.state.lock().expect("mutex poisoned");
        state.textures.clear();
        state.invalidations += 1;
    }
}

fn pool_with_cache() -> (BufferPool, Arc<FakeTextureCache>) {
    let cache = Arc::new(FakeTextureCache::default());
    let invalidator: Arc<dyn TextureCacheInvalidator> = cache.clone();
    let pool = BufferPool::new(
        128,
        72,
        PixelFormat::Bgra32,
        Duration::from_secs(5),
        Some(invalidator),
    )
    .expect("构造缓冲池");
    (pool, cache)
}

/// 每次 flush 恰好触发一次回调，且在 flush 返回前完成。
#[test]
fn each_flush_invalidates_exactly_once() {
    let (pool, cache) = pool_with_cache();
    let buffer = pool.get_buffer().expect("租借缓冲");
    cache.texture_for(&buffer);
    assert_eq!(cache.len(), 1);

    pool.flush();
    assert_eq!(cache.invalidations(), 1);
    assert_eq!(cache.len(), 0, "回调应在 flush 返回前执行完毕");

    pool.flush();
    assert_eq!(cache.invalidations(), 2, "空池上的 flush 同样触发回调");
}

/// 连续两次 flush 都让空闲链表保持为空，之后租借仍返回原规格缓冲。
#[test]
fn repeated_flush_leaves_pool_usable() {
    let (pool, _cache) = pool_with_cache();
    drop(pool.get_buffer().expect("预热"));
    assert_eq!(pool.statistics().idle, 1);

    pool.flush();
    assert_eq!(pool.statistics().idle, 0);
    pool.flush();
    assert_eq!(pool.statistics().idle, 0);

    let buffer = pool.get_buffer().expect("flush 后租借");
    assert_eq!((buffer.width(), buffer.height()), (128, 72));
    assert_eq!(buffer.format(), PixelFormat::Bgra32);
}

/// flush 之前租出的内存归还后不再被池复用，纹理缓存不会拿到旧内存身份。
#[test]
fn pre_flush_memory_is_never_vended_again() {
    let (pool, cache) = pool_with_cache();
    let idle = pool.get_buffer().expect("租借空闲候选");
    let leased = pool.get_buffer().expect("租借长期持有者");
    let stale_ids = [idle.id(), leased.id()];
    drop(idle);

    pool.flush();
    drop(leased);

    for _ in 0..4 {
        let buffer = pool.get_buffer().expect("flush 后租借");
        assert!(!stale_ids.contains(&buffer.id()), "不得复用旧代际内存");
        cache.texture_for(&buffer);
    }
    let stats = pool.statistics();
    assert_eq!(stats.discarded, 2);
    assert_eq!(stats.generation, 1);
}

/// 未提供回调时 flush 依然成功。
#[test]
fn flush_without_invalidator_is_a_no_op() {
    let pool = BufferPool::new(4, 4, PixelFormat::Rgba32, Duration::ZERO, None)
        .expect("构造缓冲池");
    pool.flush();
    assert_eq!(pool.buffer_count(), 0);
    assert!(pool.get_buffer().is_ok());
}
