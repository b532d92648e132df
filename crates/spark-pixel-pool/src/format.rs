use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CreateFailure;

/// 像素格式枚举，对应平台分配器能够识别的原生像素布局。
///
/// # 角色定位（Why）
/// - 池的身份由 `(width, height, format)` 三元组决定，格式必须可比较、可哈希，供外部注册表做键；
/// - 缓冲池本身不做颜色转换，只需知道每种格式的平面布局以计算帧大小与行跨度。
///
/// # 契约说明（What）
/// - `Unknown` 表示上游无法映射的格式，任何分配器都必须拒绝；
/// - `BiPlanar420YpCbCr8` 为双平面格式：亮度平面 `width * height` 字节，
///   色度平面按 2x2 下采样、每样本 2 字节；其余格式均为单平面紧密排列。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Bgra32,
    Rgba32,
    Rgb24,
    OneComponent8,
    GrayHalf16,
    GrayFloat32,
    TwoComponentHalf16,
    TwoComponentFloat32,
    RgbaHalf64,
    RgbaFloat128,
    BiPlanar420YpCbCr8,
    Unknown,
}

impl PixelFormat {
    /// 返回主平面每像素的字节数；`Unknown` 返回 `None`。
    pub fn bytes_per_pixel(self) -> Option<usize> {
        let bytes = match self {
            PixelFormat::Bgra32 | PixelFormat::Rgba32 => 4,
            PixelFormat::Rgb24 => 3,
            PixelFormat::OneComponent8 | PixelFormat::BiPlanar420YpCbCr8 => 1,
            PixelFormat::GrayHalf16 => 2,
            PixelFormat::GrayFloat32 | PixelFormat::TwoComponentHalf16 => 4,
            PixelFormat::TwoComponentFloat32 | PixelFormat::RgbaHalf64 => 8,
            PixelFormat::RgbaFloat128 => 16,
            PixelFormat::Unknown => return None,
        };
        Some(bytes)
    }

    /// 格式是否被本 crate 的分配器支持。
    pub fn is_supported(self) -> bool {
        self.bytes_per_pixel().is_some()
    }

    /// 稳定的蛇形名称，用于日志字段与调试字符串。
    pub fn as_str(self) -> &'static str {
        match self {
            PixelFormat::Bgra32 => "bgra32",
            PixelFormat::Rgba32 => "rgba32",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::OneComponent8 => "one_component8",
            PixelFormat::GrayHalf16 => "gray_half16",
            PixelFormat::GrayFloat32 => "gray_float32",
            PixelFormat::TwoComponentHalf16 => "two_component_half16",
            PixelFormat::TwoComponentFloat32 => "two_component_float32",
            PixelFormat::RgbaHalf64 => "rgba_half64",
            PixelFormat::RgbaFloat128 => "rgba_float128",
            PixelFormat::BiPlanar420YpCbCr8 => "bi_planar_420_ypcbcr8",
            PixelFormat::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 池键：`(width, height, format)`，一个 [`BufferPool`](crate::BufferPool) 实例的不可变身份。
///
/// # 契约说明（What）
/// - 宽高为像素数，必须大于 0；
/// - 键本身可以表达非法组合（例如宽度为 0），合法性由 [`PoolKey::validate`] 统一判定，
///   使构造失败能携带原始键返回给注册表。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

/// 通过校验的键所对应的内存布局。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameLayout {
    /// 主平面的行跨度（字节）。
    pub bytes_per_row: usize,
    /// 整帧所需字节数，包含所有平面。
    pub frame_bytes: usize,
}

impl PoolKey {
    pub const fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }

    /// 校验键并计算帧布局。
    ///
    /// # 执行逻辑（How）
    /// 1. 任一维度为 0 返回 [`CreateFailure::ZeroDimension`]；
    /// 2. 格式不受支持返回 [`CreateFailure::UnsupportedFormat`]；
    /// 3. 所有乘法均使用 `checked_*`，溢出返回 [`CreateFailure::FrameTooLarge`]。
    pub fn validate(&self) -> Result<FrameLayout, CreateFailure> {
        if self.width == 0 || self.height == 0 {
            return Err(CreateFailure::ZeroDimension);
        }
        let bpp = self
            .format
            .bytes_per_pixel()
            .ok_or(CreateFailure::UnsupportedFormat)?;
        let width = usize::try_from(self.width).map_err(|_| CreateFailure::FrameTooLarge)?;
        let height = usize::try_from(self.height).map_err(|_| CreateFailure::FrameTooLarge)?;

        let bytes_per_row = width.checked_mul(bpp).ok_or(CreateFailure::FrameTooLarge)?;
        let luma = bytes_per_row
            .checked_mul(height)
            .ok_or(CreateFailure::FrameTooLarge)?;
        let frame_bytes = match self.format {
            PixelFormat::BiPlanar420YpCbCr8 => {
                // 色度平面：每 2x2 像素块一对 Cb/Cr。
                let chroma = width
                    .div_ceil(2)
                    .checked_mul(height.div_ceil(2))
                    .and_then(|blocks| blocks.checked_mul(2))
                    .ok_or(CreateFailure::FrameTooLarge)?;
                luma.checked_add(chroma).ok_or(CreateFailure::FrameTooLarge)?
            }
            _ => luma,
        };
        if frame_bytes > isize::MAX as usize {
            return Err(CreateFailure::FrameTooLarge);
        }

        Ok(FrameLayout {
            bytes_per_row,
            frame_bytes,
        })
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.format)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_formats_compute_row_stride() {
        let layout = PoolKey::new(640, 480, PixelFormat::Bgra32)
            .validate()
            .expect("合法键应通过校验");
        assert_eq!(layout.bytes_per_row, 640 * 4);
        assert_eq!(layout.frame_bytes, 640 * 480 * 4);
    }

    #[test]
    fn biplanar_layout_includes_subsampled_chroma() {
        let layout = PoolKey::new(5, 3, PixelFormat::BiPlanar420YpCbCr8)
            .validate()
            .expect("奇数尺寸同样合法");
        assert_eq!(layout.bytes_per_row, 5);
        assert_eq!(layout.frame_bytes, 15 + 3 * 2 * 2);
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert_eq!(
            PoolKey::new(0, 480, PixelFormat::Bgra32).validate(),
            Err(CreateFailure::ZeroDimension)
        );
        assert_eq!(
            PoolKey::new(640, 0, PixelFormat::Bgra32).validate(),
            Err(CreateFailure::ZeroDimension)
        );
        assert_eq!(
            PoolKey::new(640, 480, PixelFormat::Unknown).validate(),
            Err(CreateFailure::UnsupportedFormat)
        );
    }

    #[test]
    fn oversized_frames_overflow_cleanly() {
        assert_eq!(
            PoolKey::new(u32::MAX, u32::MAX, PixelFormat::RgbaFloat128).validate(),
            Err(CreateFailure::FrameTooLarge)
        );
    }
}
