use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 默认的空闲缓冲最长存活时间（毫秒）。
pub const DEFAULT_MAX_INACTIVE_BUFFER_AGE_MS: u64 = 250;

/// 池配置，由持有多个池的注册表统一下发。
///
/// # 契约说明（What）
/// - `max_inactive_buffer_age_ms`：未被租借的缓冲在空闲链表中最多停留的毫秒数，
///   超过后由分配器回收；`0` 表示关闭老化；
/// - `max_buffers`：单个池同时管理（租出 + 空闲）的缓冲上限，`None` 表示不设阈值；
///   达到上限且空闲链表为空时，分配以 `ThresholdExceeded` 失败；
/// - 缺省字段取默认值，宿主可直接从 TOML/JSON 片段反序列化。
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolOptions {
    pub max_inactive_buffer_age_ms: u64,
    pub max_buffers: Option<usize>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_inactive_buffer_age_ms: DEFAULT_MAX_INACTIVE_BUFFER_AGE_MS,
            max_buffers: None,
        }
    }
}

impl PoolOptions {
    pub fn max_inactive_buffer_age(&self) -> Duration {
        Duration::from_millis(self.max_inactive_buffer_age_ms)
    }

    pub fn with_max_inactive_buffer_age(mut self, age: Duration) -> Self {
        self.max_inactive_buffer_age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_max_buffers(mut self, limit: usize) -> Self {
        self.max_buffers = Some(limit);
        self
    }
}
