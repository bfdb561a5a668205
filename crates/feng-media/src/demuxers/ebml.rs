//! EBML (Extensible Binary Meta Language) 基础解析.
//!
//! EBML 使用变长整数 (VINT) 编码元素 ID 与数据大小:
//! ```text
//! 首字节前导 1 之前的 0 的个数决定字节长度:
//!   1xxxxxxx            → 1 字节 (7 位数据)
//!   01xxxxxx xxxxxxxx   → 2 字节 (14 位数据)
//!   ...依此类推, ID 最多 4 字节, 大小最多 8 字节
//! ```
//! 大小字段所有数据位全 1 表示"未知大小".

use feng_core::{FengError, FengResult};

/// "未知大小" 标记
pub const EBML_UNKNOWN_SIZE: u64 = u64::MAX;

/// 顺序读取 EBML 元素的游标
pub struct EbmlReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> EbmlReader<'a> {
    /// 从字节切片创建
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 当前位置
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 剩余字节数
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    fn read_u8(&mut self) -> FengResult<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or(FengError::EndOfStream)?;
        self.pos += 1;
        Ok(b)
    }

    /// 读取元素 ID (保留前导位)
    pub fn read_element_id(&mut self) -> FengResult<u32> {
        let first = self.read_u8()?;
        if first == 0 {
            return Err(FengError::ParserFailure("EBML: 无效的元素 ID".into()));
        }
        let len = first.leading_zeros() as usize + 1;
        if len > 4 {
            return Err(FengError::ParserFailure("EBML: 元素 ID 超过 4 字节".into()));
        }
        let mut id = u32::from(first);
        for _ in 1..len {
            id = (id << 8) | u32::from(self.read_u8()?);
        }
        Ok(id)
    }

    /// 读取数据大小 (掩掉前导标记位; 全 1 返回 [`EBML_UNKNOWN_SIZE`])
    pub fn read_element_size(&mut self) -> FengResult<u64> {
        let first = self.read_u8()?;
        if first == 0 {
            return Err(FengError::ParserFailure("EBML: 无效的元素大小".into()));
        }
        let len = first.leading_zeros() as usize + 1;
        let mask = 0xFFu16 >> len;
        let mut size = u64::from(first & mask as u8);
        for _ in 1..len {
            size = (size << 8) | u64::from(self.read_u8()?);
        }
        let max_val = if len >= 8 { u64::MAX } else { (1u64 << (7 * len)) - 1 };
        if size == max_val {
            return Ok(EBML_UNKNOWN_SIZE);
        }
        Ok(size)
    }

    /// 读取一个元素头 (ID + 大小)
    pub fn read_element_header(&mut self) -> FengResult<(u32, u64)> {
        let id = self.read_element_id()?;
        let size = self.read_element_size()?;
        Ok((id, size))
    }

    /// 读取 N 字节
    pub fn read_bytes(&mut self, n: usize) -> FengResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(FengError::EndOfStream);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// 跳过 N 字节
    pub fn skip(&mut self, n: usize) -> FengResult<()> {
        self.read_bytes(n).map(|_| ())
    }

    /// 读取轨道号等块内 VINT (掩掉标记位)
    pub fn read_vint(&mut self) -> FengResult<u64> {
        let first = self.read_u8()?;
        if first == 0 {
            return Err(FengError::ParserFailure("EBML: 无效 VINT".into()));
        }
        let len = first.leading_zeros() as usize + 1;
        let mask = 0xFFu16 >> len;
        let mut v = u64::from(first & mask as u8);
        for _ in 1..len {
            v = (v << 8) | u64::from(self.read_u8()?);
        }
        Ok(v)
    }
}

/// 读取无符号整数元素值 (大端, 0-8 字节)
pub fn parse_uint(data: &[u8]) -> FengResult<u64> {
    if data.len() > 8 {
        return Err(FengError::ParserFailure(format!(
            "EBML: uint 大小非法: {}",
            data.len()
        )));
    }
    let mut v = 0u64;
    for &b in data {
        v = (v << 8) | u64::from(b);
    }
    Ok(v)
}

/// 读取浮点数元素值 (0/4/8 字节)
pub fn parse_float(data: &[u8]) -> FengResult<f64> {
    match data.len() {
        0 => Ok(0.0),
        4 => {
            let mut b = [0u8; 4];
            b.copy_from_slice(data);
            Ok(f64::from(f32::from_bits(u32::from_be_bytes(b))))
        }
        8 => {
            let mut b = [0u8; 8];
            b.copy_from_slice(data);
            Ok(f64::from_bits(u64::from_be_bytes(b)))
        }
        n => Err(FengError::ParserFailure(format!(
            "EBML: 浮点数大小非法: {n}"
        ))),
    }
}

/// 读取 UTF-8 字符串元素值 (去除尾部 NUL)
pub fn parse_string(data: &[u8]) -> String {
    let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
    String::from_utf8_lossy(&data[..end]).to_string()
}

// ========================
// 已知的 Matroska 元素 ID
// ========================

/// EBML 头
pub const ID_EBML_HEADER: u32 = 0x1A45_DFA3;
/// Segment
pub const ID_SEGMENT: u32 = 0x1853_8067;
/// SeekHead
pub const ID_SEEK_HEAD: u32 = 0x114D_9B74;
/// Info
pub const ID_INFO: u32 = 0x1549_A966;
/// TimestampScale
pub const ID_TIMESTAMP_SCALE: u32 = 0x002A_D7B1;
/// Duration
pub const ID_DURATION: u32 = 0x4489;
/// Tracks
pub const ID_TRACKS: u32 = 0x1654_AE6B;
/// TrackEntry
pub const ID_TRACK_ENTRY: u32 = 0xAE;
/// TrackNumber
pub const ID_TRACK_NUMBER: u32 = 0xD7;
/// TrackType
pub const ID_TRACK_TYPE: u32 = 0x83;
/// CodecID
pub const ID_CODEC_ID: u32 = 0x86;
/// CodecPrivate
pub const ID_CODEC_PRIVATE: u32 = 0x63A2;
/// DefaultDuration (纳秒)
pub const ID_DEFAULT_DURATION: u32 = 0x0023_E383;
/// Language
pub const ID_LANGUAGE: u32 = 0x0022_B59C;
/// Video
pub const ID_VIDEO: u32 = 0xE0;
/// PixelWidth
pub const ID_PIXEL_WIDTH: u32 = 0xB0;
/// PixelHeight
pub const ID_PIXEL_HEIGHT: u32 = 0xBA;
/// Audio
pub const ID_AUDIO: u32 = 0xE1;
/// SamplingFrequency
pub const ID_SAMPLING_FREQUENCY: u32 = 0xB5;
/// Channels
pub const ID_CHANNELS: u32 = 0x9F;
/// BitDepth
pub const ID_BIT_DEPTH: u32 = 0x6264;
/// ContentEncodings
pub const ID_CONTENT_ENCODINGS: u32 = 0x6D80;
/// Cluster
pub const ID_CLUSTER: u32 = 0x1F43_B675;
/// Cluster Timestamp
pub const ID_CLUSTER_TIMESTAMP: u32 = 0xE7;
/// SimpleBlock
pub const ID_SIMPLE_BLOCK: u32 = 0xA3;
/// BlockGroup
pub const ID_BLOCK_GROUP: u32 = 0xA0;
/// Block
pub const ID_BLOCK: u32 = 0xA1;
/// BlockDuration
pub const ID_BLOCK_DURATION: u32 = 0x9B;
/// ReferenceBlock
pub const ID_REFERENCE_BLOCK: u32 = 0xFB;
/// Cues
pub const ID_CUES: u32 = 0x1C53_BB6B;
/// Tags
pub const ID_TAGS: u32 = 0x1254_C367;
/// Void
pub const ID_VOID: u32 = 0xEC;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_element_id() {
        let data = [0x1A, 0x45, 0xDF, 0xA3];
        let mut r = EbmlReader::new(&data);
        assert_eq!(r.read_element_id().unwrap(), ID_EBML_HEADER);
    }

    #[test]
    fn test_read_element_size() {
        // 1 字节: 0x81 = 1
        let mut r = EbmlReader::new(&[0x81]);
        assert_eq!(r.read_element_size().unwrap(), 1);

        // 2 字节: 0x41 0x00 = 0x100
        let mut r = EbmlReader::new(&[0x41, 0x00]);
        assert_eq!(r.read_element_size().unwrap(), 0x100);

        // 未知大小: 0xFF
        let mut r = EbmlReader::new(&[0xFF]);
        assert_eq!(r.read_element_size().unwrap(), EBML_UNKNOWN_SIZE);
    }

    #[test]
    fn test_parse_uint_and_float() {
        assert_eq!(parse_uint(&[0x01, 0x00]).unwrap(), 256);
        assert_eq!(parse_uint(&[]).unwrap(), 0);
        assert!(parse_uint(&[0; 9]).is_err());

        let f = parse_float(&48000.0f64.to_bits().to_be_bytes()).unwrap();
        assert!((f - 48000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_string_strips_nul() {
        assert_eq!(parse_string(b"und\0"), "und");
        assert_eq!(parse_string(b"eng"), "eng");
    }
}
