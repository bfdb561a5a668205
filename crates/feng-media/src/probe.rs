//! 容器格式探测.
//!
//! 读取头部数据按魔数识别容器, 为解封装器选择解析器.

use crate::demuxers::{Mp4Parser, TsParser, WebVttParser, WebmParser, WvmParser};
use crate::parser::MediaParser;

/// 容器格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerType {
    /// ISO-BMFF (分片或非分片)
    Mp4,
    /// MPEG-2 TS
    Ts,
    /// WebM / Matroska
    Webm,
    /// WebVTT 文本
    Webvtt,
    /// WVM 遗留加密容器
    Wvm,
    /// 未识别
    Unknown,
}

/// TS 包大小 (探测对齐检查用)
const TS_PACKET_SIZE: usize = 188;

/// 按头部字节探测容器格式
pub fn detect_container(data: &[u8]) -> ContainerType {
    if data.len() < 4 {
        return ContainerType::Unknown;
    }

    // WebM: EBML 头
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return ContainerType::Webm;
    }

    // WebVTT: 可选 BOM + "WEBVTT"
    let text = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
    if text.starts_with(b"WEBVTT") {
        return ContainerType::Webvtt;
    }

    // WVM: MPEG-2 PS pack 起始码
    if data.starts_with(&[0x00, 0x00, 0x01, 0xBA]) {
        return ContainerType::Wvm;
    }

    // MP4: 第 4 字节起为已知顶层 box 标签
    if data.len() >= 8 {
        let fourcc = &data[4..8];
        if matches!(
            fourcc,
            b"ftyp" | b"styp" | b"moov" | b"moof" | b"sidx" | b"free" | b"skip" | b"mdat"
        ) {
            return ContainerType::Mp4;
        }
    }

    // TS: 连续包边界上的同步字节
    if data[0] == 0x47 {
        let aligned = (1..=2)
            .all(|i| data.get(i * TS_PACKET_SIZE).is_none_or(|&b| b == 0x47));
        if aligned {
            return ContainerType::Ts;
        }
    }

    ContainerType::Unknown
}

/// 为探测到的格式创建解析器
pub fn create_parser(container: ContainerType) -> Option<Box<dyn MediaParser>> {
    match container {
        ContainerType::Mp4 => Some(Box::new(Mp4Parser::new())),
        ContainerType::Ts => Some(Box::new(TsParser::new())),
        ContainerType::Webm => Some(Box::new(WebmParser::new())),
        ContainerType::Webvtt => Some(Box::new(WebVttParser::new())),
        ContainerType::Wvm => Some(Box::new(WvmParser::new())),
        ContainerType::Unknown => None,
    }
}
