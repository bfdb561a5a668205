//! 密钥与保护方案模型.

use feng_core::{FengError, FengResult};
use std::fmt;

/// 通用 PSSH 系统 ID (v1 common PSSH, "cenc" ClearKey 约定)
pub const COMMON_SYSTEM_ID: [u8; 16] = [
    0x10, 0x77, 0xef, 0xec, 0xc0, 0xb2, 0x4d, 0x02, 0xac, 0xe3, 0x3c, 0x1e, 0x52, 0xe2, 0xfb,
    0x4b,
];

/// 保护方案 (CENC 方案标识)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtectionScheme {
    /// AES-CTR 子采样加密
    #[default]
    Cenc,
    /// AES-CBC 全采样加密
    Cbc1,
    /// AES-CTR 模式图样加密
    Cens,
    /// AES-CBC 模式图样加密
    Cbcs,
}

impl ProtectionScheme {
    /// 方案 FourCC
    pub const fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Cenc => *b"cenc",
            Self::Cbc1 => *b"cbc1",
            Self::Cens => *b"cens",
            Self::Cbcs => *b"cbcs",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> FengResult<Self> {
        match s {
            "cenc" => Ok(Self::Cenc),
            "cbc1" => Ok(Self::Cbc1),
            "cens" => Ok(Self::Cens),
            "cbcs" => Ok(Self::Cbcs),
            _ => Err(FengError::InvalidArgument(format!("未知保护方案: {s}"))),
        }
    }

    /// 是否为 CBC 族方案
    pub fn is_cbc(&self) -> bool {
        matches!(self, Self::Cbc1 | Self::Cbcs)
    }
}

impl fmt::Display for ProtectionScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cc = self.fourcc();
        write!(f, "{}", std::str::from_utf8(&cc).unwrap_or("????"))
    }
}

/// 轨道保护级别
///
/// 视频按单帧最大像素数分级, 阈值可配置.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    /// 标清视频
    Sd,
    /// 高清视频
    Hd,
    /// 4K 视频
    Uhd1,
    /// 8K 视频
    Uhd2,
    /// 音频
    Audio,
    /// 未指定
    Unspecified,
}

impl TrackType {
    /// 协议字符串 (密钥服务器请求使用)
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sd => "SD",
            Self::Hd => "HD",
            Self::Uhd1 => "UHD1",
            Self::Uhd2 => "UHD2",
            Self::Audio => "AUDIO",
            Self::Unspecified => "UNSPECIFIED",
        }
    }

    /// 从协议字符串解析
    pub fn parse(s: &str) -> FengResult<Self> {
        match s {
            "SD" => Ok(Self::Sd),
            "HD" => Ok(Self::Hd),
            "UHD1" => Ok(Self::Uhd1),
            "UHD2" => Ok(Self::Uhd2),
            "AUDIO" => Ok(Self::Audio),
            "UNSPECIFIED" => Ok(Self::Unspecified),
            _ => Err(FengError::InvalidArgument(format!("未知轨道类型: {s}"))),
        }
    }
}

/// 视频保护级别划分阈值 (单帧最大像素数)
#[derive(Debug, Clone, Copy)]
pub struct ProtectionLevelThresholds {
    /// ≤ 此像素数为 SD (默认 576p)
    pub max_sd_pixels: u64,
    /// ≤ 此像素数为 HD (默认 1080p)
    pub max_hd_pixels: u64,
    /// ≤ 此像素数为 UHD1 (默认 2160p)
    pub max_uhd1_pixels: u64,
}

impl Default for ProtectionLevelThresholds {
    fn default() -> Self {
        Self {
            max_sd_pixels: 1024 * 576,
            max_hd_pixels: 1920 * 1080,
            max_uhd1_pixels: 4096 * 2160,
        }
    }
}

impl ProtectionLevelThresholds {
    /// 按像素数划分视频轨道类型
    pub fn classify_video(&self, width: u32, height: u32) -> TrackType {
        let pixels = u64::from(width) * u64::from(height);
        if pixels <= self.max_sd_pixels {
            TrackType::Sd
        } else if pixels <= self.max_hd_pixels {
            TrackType::Hd
        } else if pixels <= self.max_uhd1_pixels {
            TrackType::Uhd1
        } else {
            TrackType::Uhd2
        }
    }
}

/// 单个 DRM 系统的保护信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionSystemInfo {
    /// 16 字节系统 ID
    pub system_id: [u8; 16],
    /// 自含的 pssh box 字节 (含 box 头)
    pub pssh: Vec<u8>,
}

/// 内容加密密钥
#[derive(Debug, Clone, Default)]
pub struct EncryptionKey {
    /// 16 字节密钥 ID
    pub key_id: [u8; 16],
    /// 密钥字节
    pub key: Vec<u8>,
    /// 显式指定的 IV (None 时由加密器随机生成)
    pub iv: Option<Vec<u8>>,
    /// 每个 DRM 系统一条保护信息
    pub protection_systems: Vec<ProtectionSystemInfo>,
}

impl EncryptionKey {
    /// 是否为空 (尚未填充)
    pub fn is_empty(&self) -> bool {
        self.key.is_empty()
    }
}

/// 把原始 pssh 数据包装为 v0 `pssh` box (含 FullBox 头)
pub fn synthesize_pssh_box(system_id: &[u8; 16], data: &[u8]) -> Vec<u8> {
    // size(4) + 'pssh'(4) + version/flags(4) + system_id(16) + data_size(4) + data
    let size = 4 + 4 + 4 + 16 + 4 + data.len();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(size as u32).to_be_bytes());
    out.extend_from_slice(b"pssh");
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(system_id);
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_fourcc() {
        assert_eq!(&ProtectionScheme::Cenc.fourcc(), b"cenc");
        assert_eq!(&ProtectionScheme::Cbcs.fourcc(), b"cbcs");
        assert!(ProtectionScheme::parse("cbc1").unwrap().is_cbc());
        assert!(ProtectionScheme::parse("abcd").is_err());
    }

    #[test]
    fn test_video_classification_defaults() {
        let t = ProtectionLevelThresholds::default();
        assert_eq!(t.classify_video(1024, 576), TrackType::Sd);
        assert_eq!(t.classify_video(1280, 720), TrackType::Hd);
        assert_eq!(t.classify_video(1920, 1080), TrackType::Hd);
        assert_eq!(t.classify_video(3840, 2160), TrackType::Uhd1);
        assert_eq!(t.classify_video(7680, 4320), TrackType::Uhd2);
    }

    #[test]
    fn test_synthesize_pssh_box() {
        let data = [0xAA, 0xBB];
        let pssh = synthesize_pssh_box(&COMMON_SYSTEM_ID, &data);
        assert_eq!(pssh.len(), 34);
        assert_eq!(&pssh[0..4], &34u32.to_be_bytes());
        assert_eq!(&pssh[4..8], b"pssh");
        assert_eq!(&pssh[12..28], &COMMON_SYSTEM_ID);
        assert_eq!(&pssh[28..32], &2u32.to_be_bytes());
        assert_eq!(&pssh[32..], &data);
    }
}
