//! 采样类型模型.
//!
//! 管线中流动的记录类型: 媒体采样、文本采样、加密配置、分段信息与
//! 提示点事件, 统一装入 `StreamData` 标签枚举经由通道传递.
//! 每条记录在任意时刻只被一个阶段持有.

use bytes::Bytes;
use feng_crypto::ProtectionScheme;

use crate::stream_info::SharedStreamInfo;

/// 子采样区域: 明文字节数 + 密文字节数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubsampleEntry {
    /// 明文部分字节数
    pub clear_bytes: u16,
    /// 密文部分字节数
    pub cipher_bytes: u32,
}

impl SubsampleEntry {
    /// 创建子采样区域
    pub fn new(clear_bytes: u16, cipher_bytes: u32) -> Self {
        Self {
            clear_bytes,
            cipher_bytes,
        }
    }
}

/// 单个采样的保护描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    /// 保护方案
    pub scheme: ProtectionScheme,
    /// 本采样的 IV (8 或 16 字节)
    pub iv: Vec<u8>,
    /// 密钥 ID
    pub key_id: [u8; 16],
    /// 子采样布局, 空表示全采样加密
    ///
    /// 所有区域的 clear+cipher 之和必须等于采样负载长度.
    pub subsamples: Vec<SubsampleEntry>,
}

impl EncryptionConfig {
    /// 子采样布局覆盖的总字节数
    pub fn total_bytes(&self) -> u64 {
        self.subsamples
            .iter()
            .map(|s| u64::from(s.clear_bytes) + u64::from(s.cipher_bytes))
            .sum()
    }
}

/// 媒体采样
///
/// 解析器创建; 加密器可替换负载并附加 `EncryptionConfig`;
/// 分片器在得知下一采样后回填 `duration`.
#[derive(Debug, Clone)]
pub struct MediaSample {
    /// 解码时间戳 (流时间刻度)
    pub dts: i64,
    /// 显示时间戳 (流时间刻度)
    pub pts: i64,
    /// 时长 (tick), 可能为 0 直到下一采样到来
    pub duration: u64,
    /// 是否为关键帧
    pub is_key_frame: bool,
    /// 负载
    pub data: Bytes,
    /// 边带数据
    pub side_data: Option<Bytes>,
    /// 本采样的保护描述
    pub encryption_config: Option<EncryptionConfig>,
    /// 是否为流末尾标记 (负载为空)
    pub is_eos: bool,
}

impl MediaSample {
    /// 创建普通采样
    pub fn new(dts: i64, pts: i64, is_key_frame: bool, data: impl Into<Bytes>) -> Self {
        Self {
            dts,
            pts,
            duration: 0,
            is_key_frame,
            data: data.into(),
            side_data: None,
            encryption_config: None,
            is_eos: false,
        }
    }

    /// 创建流末尾标记
    pub fn eos() -> Self {
        Self {
            dts: 0,
            pts: 0,
            duration: 0,
            is_key_frame: false,
            data: Bytes::new(),
            side_data: None,
            encryption_config: None,
            is_eos: true,
        }
    }
}

/// 文本采样 (WebVTT cue)
#[derive(Debug, Clone)]
pub struct TextSample {
    /// cue 标识符 (可为空)
    pub id: String,
    /// 起始时间 (流时间刻度)
    pub start_time: i64,
    /// 结束时间 (流时间刻度)
    pub end_time: i64,
    /// cue 设置行
    pub settings: String,
    /// cue 文本
    pub payload: String,
}

impl TextSample {
    /// 时长 (tick)
    pub fn duration(&self) -> i64 {
        self.end_time - self.start_time
    }
}

/// 分段信息
///
/// `repeat == N` 表示从 `start_time` 起连续 N+1 个等长分段.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    /// 起始时间 (参考时间刻度)
    pub start_time: u64,
    /// 单个分段时长
    pub duration: u64,
    /// 重复次数
    pub repeat: u64,
}

/// 提示点事件: 强制所有流在同一呈现时间断开
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CueEvent {
    /// 提示点时间 (秒)
    pub time_in_seconds: f64,
}

/// 管线记录
///
/// 采样携带流索引而非回指指针, 管线因此没有环 (各阶段只按索引路由).
#[derive(Debug, Clone)]
pub enum StreamData {
    /// 流信息 (每轨恰好一次)
    StreamInfo {
        /// 流索引
        stream_index: usize,
        /// 流信息
        info: SharedStreamInfo,
    },
    /// 媒体采样
    MediaSample {
        /// 流索引
        stream_index: usize,
        /// 采样
        sample: MediaSample,
    },
    /// 文本采样
    TextSample {
        /// 流索引
        stream_index: usize,
        /// 采样
        sample: TextSample,
    },
    /// 分段信息
    SegmentInfo {
        /// 流索引
        stream_index: usize,
        /// 分段信息
        info: SegmentInfo,
    },
    /// 提示点事件
    CueEvent {
        /// 流索引
        stream_index: usize,
        /// 事件
        event: CueEvent,
    },
    /// 加密配置变更 (密钥轮换时在新密钥生效前下发,
    /// 分段器据此在新密钥生效处关闭当前分段)
    EncryptionConfigChange {
        /// 流索引
        stream_index: usize,
        /// 新配置
        config: EncryptionConfig,
    },
}

impl StreamData {
    /// 记录所属的流索引
    pub fn stream_index(&self) -> usize {
        match self {
            Self::StreamInfo { stream_index, .. }
            | Self::MediaSample { stream_index, .. }
            | Self::TextSample { stream_index, .. }
            | Self::SegmentInfo { stream_index, .. }
            | Self::CueEvent { stream_index, .. }
            | Self::EncryptionConfigChange { stream_index, .. } => *stream_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eos_sample() {
        let eos = MediaSample::eos();
        assert!(eos.is_eos);
        assert!(eos.data.is_empty());
    }

    #[test]
    fn test_subsample_total() {
        let config = EncryptionConfig {
            scheme: ProtectionScheme::Cenc,
            iv: vec![0; 8],
            key_id: [0; 16],
            subsamples: vec![SubsampleEntry::new(5, 100), SubsampleEntry::new(3, 64)],
        };
        assert_eq!(config.total_bytes(), 172);
    }
}
