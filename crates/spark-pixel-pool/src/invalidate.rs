/// `TextureCacheInvalidator` 是缓冲池通知外部纹理缓存“立即失效”的唯一入口。
///
/// # 设计初衷（Why）
/// - GPU 纹理缓存以缓冲内存身份为键缓存派生对象；池执行 flush 后旧内存可能被释放或重新分配，
///   缓存中的条目必须在池再次被使用前全部作废；
/// - 池只需要一个“现在失效”的能力，不关心缓存的具体类型，因此以单方法 trait 表达。
///
/// # 契约定义（What）
/// - `invalidate` 在 [`BufferPool::flush`](crate::BufferPool::flush) 的调用线程上同步执行，
///   返回前 flush 不会返回；
/// - 连续 flush 会带来重复通知，实现必须容忍冗余调用；
/// - 实现不得 panic，也不得在回调中再次调用同一个池的 `flush`。
///
/// 任何 `Fn() + Send + Sync` 闭包都自动实现该 trait。
pub trait TextureCacheInvalidator: Send + Sync + 'static {
    fn invalidate(&self);
}

impl<F> TextureCacheInvalidator for F
where
    F: Fn() + Send + Sync + 'static,
{
    fn invalidate(&self) {
        self()
    }
}
