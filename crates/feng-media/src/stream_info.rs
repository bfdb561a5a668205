//! 流信息定义.
//!
//! 描述源中的一条基本流 (视频/音频/文本). 由解析器在读够描述轨道所需的
//! 数据后恰好发射一次, 此后不可变, 供下游各阶段以 `Arc` 共享只读.

use std::fmt;
use std::sync::Arc;

/// 编解码器标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Codec {
    /// 未知编解码器
    Unknown,
    /// H.264 / AVC
    H264,
    /// H.265 / HEVC
    H265,
    /// VP8
    Vp8,
    /// VP9
    Vp9,
    /// AAC
    Aac,
    /// Opus
    Opus,
    /// Vorbis
    Vorbis,
    /// AC-3
    Ac3,
    /// E-AC-3
    Eac3,
    /// WebVTT 文本
    Webvtt,
}

impl Codec {
    /// 是否为按 NALU 组织的视频编解码器
    pub fn is_nalu_video(&self) -> bool {
        matches!(self, Self::H264 | Self::H265)
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unknown => "unknown",
            Self::H264 => "h264",
            Self::H265 => "h265",
            Self::Vp8 => "vp8",
            Self::Vp9 => "vp9",
            Self::Aac => "aac",
            Self::Opus => "opus",
            Self::Vorbis => "vorbis",
            Self::Ac3 => "ac3",
            Self::Eac3 => "eac3",
            Self::Webvtt => "wvtt",
        };
        write!(f, "{name}")
    }
}

/// 流种类与类型特有参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// 视频流
    Video(VideoInfo),
    /// 音频流
    Audio(AudioInfo),
    /// 文本流
    Text(TextInfo),
}

/// 视频流参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoInfo {
    /// 宽度 (像素)
    pub width: u32,
    /// 高度 (像素)
    pub height: u32,
    /// 像素宽高比分子
    pub pixel_width: u32,
    /// 像素宽高比分母
    pub pixel_height: u32,
    /// NALU 长度前缀字节数 (0 表示 Annex-B)
    pub nalu_length_size: u8,
    /// 特技播放倍率 (0 表示普通轨道)
    pub trick_play_factor: u32,
}

/// 音频流参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioInfo {
    /// 采样位深
    pub sample_bits: u8,
    /// 声道数
    pub channels: u8,
    /// 采样率 (Hz)
    pub sampling_frequency: u32,
    /// 最大码率 (bps)
    pub max_bitrate: u32,
    /// 平均码率 (bps)
    pub avg_bitrate: u32,
}

/// 文本流参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextInfo {
    /// 呈现宽度 (0 表示未知)
    pub width: u16,
    /// 呈现高度 (0 表示未知)
    pub height: u16,
    /// 编解码器配置
    pub codec_config: Vec<u8>,
}

/// 流信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    /// 轨道 ID (源内唯一)
    pub track_id: u32,
    /// 时间刻度 (每秒 tick 数)
    pub time_scale: u32,
    /// 名义时长 (tick)
    pub duration: u64,
    /// 编解码器
    pub codec: Codec,
    /// 编解码器字符串 (如 "avc1.64001f")
    pub codec_string: String,
    /// 语言 (BCP-47 最短形式)
    pub language: String,
    /// 是否已加密
    pub is_encrypted: bool,
    /// 编解码器私有数据
    pub extra_data: Vec<u8>,
    /// 种类与类型特有参数
    pub kind: StreamKind,
}

impl StreamInfo {
    /// 是否为视频流
    pub fn is_video(&self) -> bool {
        matches!(self.kind, StreamKind::Video(_))
    }

    /// 是否为音频流
    pub fn is_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Audio(_))
    }

    /// 是否为文本流
    pub fn is_text(&self) -> bool {
        matches!(self.kind, StreamKind::Text(_))
    }

    /// 视频参数 (非视频流返回 None)
    pub fn video(&self) -> Option<&VideoInfo> {
        match &self.kind {
            StreamKind::Video(v) => Some(v),
            _ => None,
        }
    }

    /// 音频参数 (非音频流返回 None)
    pub fn audio(&self) -> Option<&AudioInfo> {
        match &self.kind {
            StreamKind::Audio(a) => Some(a),
            _ => None,
        }
    }
}

/// 共享只读流信息
pub type SharedStreamInfo = Arc<StreamInfo>;

/// 把 ISO 639-2 三字母语言码规整为 BCP-47 最短形式
///
/// 常见语言映射到 639-1 双字母码, 未知的保持原样.
pub fn shortest_language(lang: &str) -> String {
    let lang = lang.trim_end_matches('\0');
    let two = match lang {
        "eng" => "en",
        "fra" | "fre" => "fr",
        "deu" | "ger" => "de",
        "spa" => "es",
        "ita" => "it",
        "jpn" => "ja",
        "kor" => "ko",
        "zho" | "chi" => "zh",
        "rus" => "ru",
        "por" => "pt",
        "nld" | "dut" => "nl",
        "swe" => "sv",
        "nor" => "no",
        "dan" => "da",
        "fin" => "fi",
        "pol" => "pl",
        "tur" => "tr",
        "ara" => "ar",
        "hin" => "hi",
        "tha" => "th",
        "und" | "" => "",
        other => other,
    };
    two.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortest_language() {
        assert_eq!(shortest_language("eng"), "en");
        assert_eq!(shortest_language("fre"), "fr");
        assert_eq!(shortest_language("und"), "");
        assert_eq!(shortest_language("tlh"), "tlh"); // 未知语言保持原样
        assert_eq!(shortest_language("eng\0"), "en");
    }
}
