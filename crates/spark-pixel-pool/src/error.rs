//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 集中定义缓冲池对外暴露的错误语义：构造失败与分配失败两大类；
//! - 所有失败都以类型化结果同步返回给直接调用方，本模块不做吞错或重试。
//!
//! ## 设计要求（What）
//! - 错误类型派生 `thiserror::Error`，兼容 `std::error::Error` 生态；
//! - 每个变体携带出错的 [`PoolKey`]，注册表据此决定丢帧、阻塞还是升级为流水线级故障；
//! - [`PoolError::code`] 提供稳定的点分错误码，便于告警聚合。

use thiserror::Error;

use crate::format::PoolKey;

/// 缓冲池核心错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“实例无法建立”与“单次分配失败”，前者对该实例是致命的，
///   后者仅影响当前帧；
/// - **契约 (What)**：
///   - `Construction`：原生池无法为该键创建，注册表不得保留半成品实例；
///   - `Allocation`：`get_buffer` 或直接分配无法产出缓冲，调用方自行决定重试策略；
/// - **设计权衡 (Trade-offs)**：原因字段使用细分枚举而非字符串，使调用方可以按原因分支，
///   仅平台透传错误保留 `String`。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum PoolError {
    #[error("cannot create pixel buffer pool for {key}: {cause}")]
    Construction { key: PoolKey, cause: CreateFailure },

    #[error("cannot allocate pixel buffer for {key}: {cause}")]
    Allocation { key: PoolKey, cause: AllocFailure },
}

impl PoolError {
    /// 返回稳定错误码。
    ///
    /// - **契约 (What)**：前缀固定为 `pixel_pool.construction` 或 `pixel_pool.allocation`，
    ///   末段为具体原因；编码一经发布不得改名。
    pub fn code(&self) -> &'static str {
        match self {
            PoolError::Construction { cause, .. } => match cause {
                CreateFailure::ZeroDimension => "pixel_pool.construction.zero_dimension",
                CreateFailure::UnsupportedFormat => "pixel_pool.construction.unsupported_format",
                CreateFailure::FrameTooLarge => "pixel_pool.construction.frame_too_large",
                CreateFailure::Platform(_) => "pixel_pool.construction.platform",
            },
            PoolError::Allocation { cause, .. } => match cause {
                AllocFailure::InvalidKey(_) => "pixel_pool.allocation.invalid_key",
                AllocFailure::ThresholdExceeded { .. } => "pixel_pool.allocation.threshold_exceeded",
                AllocFailure::OutOfMemory { .. } => "pixel_pool.allocation.out_of_memory",
                AllocFailure::Platform(_) => "pixel_pool.allocation.platform",
            },
        }
    }

    /// 出错请求对应的池键。
    pub fn key(&self) -> PoolKey {
        match self {
            PoolError::Construction { key, .. } | PoolError::Allocation { key, .. } => *key,
        }
    }

    pub fn is_construction(&self) -> bool {
        matches!(self, PoolError::Construction { .. })
    }

    pub fn is_allocation(&self) -> bool {
        matches!(self, PoolError::Allocation { .. })
    }
}

/// 原生池无法创建的原因。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum CreateFailure {
    #[error("width and height must both be positive")]
    ZeroDimension,

    #[error("pixel format is not supported by the allocator")]
    UnsupportedFormat,

    #[error("frame size overflows addressable memory")]
    FrameTooLarge,

    /// 平台分配器返回的其它失败，原样透传其描述。
    #[error("platform allocator refused the pool: {0}")]
    Platform(String),
}

/// 单次分配失败的原因。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum AllocFailure {
    /// 直接分配路径没有预先构造的池，键非法时在分配阶段报告。
    #[error("invalid buffer key: {0}")]
    InvalidKey(CreateFailure),

    /// 空闲链表为空且已达到分配阈值。
    #[error("pool already manages {limit} buffers")]
    ThresholdExceeded { limit: usize },

    #[error("out of memory while reserving {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("platform allocator failed: {0}")]
    Platform(String),
}
