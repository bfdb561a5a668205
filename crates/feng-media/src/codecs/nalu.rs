//! NALU 读取与字节流转换.
//!
//! 支持两种承载形式:
//! - 长度前缀 (MP4, `nalu_length_size` ∈ {1,2,4})
//! - Annex-B 起始码 (TS / 裸码流, `nalu_length_size` == 0)
//!
//! 字节流转换器把长度前缀采样转为 Annex-B: 关键帧前插入 AUD、SPS、PPS,
//! 并恢复防竞争字节 (在 `00 00` 后遇到 `00/01/02/03` 时插入 `03`,
//! 单元以 `00 00` 结尾时补 `03`).

use feng_core::{FengError, FengResult};

/// H.264 NALU 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H264NaluType {
    /// 非 IDR 片
    NonIdrSlice,
    /// IDR 片
    IdrSlice,
    /// SEI
    Sei,
    /// 序列参数集
    Sps,
    /// 图像参数集
    Pps,
    /// 访问单元分隔符
    Aud,
    /// 其他
    Other(u8),
}

impl H264NaluType {
    /// 从 NAL 头字节解析
    pub fn from_header(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            t => Self::Other(t),
        }
    }

    /// 是否为视频片 (加密对象)
    pub fn is_slice(&self) -> bool {
        matches!(self, Self::NonIdrSlice | Self::IdrSlice)
    }
}

/// H.265 NALU 类型判定: 视频片 (0..=31 为 VCL)
pub fn h265_is_vcl(header: u8) -> bool {
    (header >> 1) & 0x3F <= 31
}

/// 一个已切分的 NALU
#[derive(Debug, Clone, Copy)]
pub struct Nalu<'a> {
    /// 前缀字节数 (长度字段或起始码)
    pub prefix_size: usize,
    /// NALU 本体 (不含前缀)
    pub data: &'a [u8],
}

impl Nalu<'_> {
    /// NAL 头字节
    pub fn header(&self) -> u8 {
        self.data.first().copied().unwrap_or(0)
    }
}

/// NALU 读取器
pub struct NaluReader<'a> {
    data: &'a [u8],
    pos: usize,
    /// 0 = Annex-B
    length_size: u8,
}

impl<'a> NaluReader<'a> {
    /// 创建读取器
    pub fn new(data: &'a [u8], length_size: u8) -> FengResult<Self> {
        if !matches!(length_size, 0 | 1 | 2 | 4) {
            return Err(FengError::InvalidArgument(format!(
                "NALU 长度前缀必须为 0/1/2/4 字节, 实际 {length_size}"
            )));
        }
        Ok(Self {
            data,
            pos: 0,
            length_size,
        })
    }

    /// 读取下一个 NALU, 末尾返回 None
    pub fn next(&mut self) -> FengResult<Option<Nalu<'a>>> {
        if self.pos >= self.data.len() {
            return Ok(None);
        }
        if self.length_size == 0 {
            self.next_annex_b()
        } else {
            self.next_length_prefixed()
        }
    }

    fn next_length_prefixed(&mut self) -> FengResult<Option<Nalu<'a>>> {
        let ls = self.length_size as usize;
        if self.data.len() - self.pos < ls {
            return Err(FengError::ParserFailure("NALU 长度字段越界".into()));
        }
        let mut length = 0usize;
        for i in 0..ls {
            length = (length << 8) | self.data[self.pos + i] as usize;
        }
        let start = self.pos + ls;
        if start + length > self.data.len() {
            return Err(FengError::ParserFailure(format!(
                "NALU 长度 {} 超出剩余 {} 字节",
                length,
                self.data.len() - start
            )));
        }
        self.pos = start + length;
        Ok(Some(Nalu {
            prefix_size: ls,
            data: &self.data[start..start + length],
        }))
    }

    fn next_annex_b(&mut self) -> FengResult<Option<Nalu<'a>>> {
        // 找到下一个起始码
        let start_code = match find_start_code(&self.data[self.pos..]) {
            Some((offset, len)) => (self.pos + offset, len),
            None => {
                self.pos = self.data.len();
                return Ok(None);
            }
        };
        let nalu_start = start_code.0 + start_code.1;
        // NALU 延伸到下一个起始码或数据末尾
        let nalu_end = match find_start_code(&self.data[nalu_start..]) {
            Some((offset, _)) => nalu_start + offset,
            None => self.data.len(),
        };
        self.pos = nalu_end;
        Ok(Some(Nalu {
            prefix_size: start_code.1,
            data: &self.data[nalu_start..nalu_end],
        }))
    }
}

/// 查找起始码 (00 00 01 或 00 00 00 01), 返回 (偏移, 长度)
fn find_start_code(data: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// 去除防竞争字节 (00 00 03 xx → 00 00 xx), 得到 RBSP
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        if zeros >= 2 && b == 0x03 && i + 1 < data.len() && data[i + 1] <= 0x03 {
            zeros = 0;
            i += 1;
            continue;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
        i += 1;
    }
    out
}

/// 恢复防竞争字节
///
/// 在 `00 00` 之后遇到 `00/01/02/03` 时插入 `03`; 单元以 `00 00` 结尾时补 `03`.
pub fn escape_nalu(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / 64);
    let mut zeros = 0usize;
    for &b in data {
        if zeros >= 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }
        out.push(b);
        zeros = if b == 0 { zeros + 1 } else { 0 };
    }
    if zeros >= 2 {
        out.push(0x03);
    }
    out
}

/// AUD NALU (H.264, primary_pic_type = 7)
const H264_AUD: [u8; 2] = [0x09, 0xF0];
/// 4 字节起始码
const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// 长度前缀采样 → Annex-B 字节流转换器
pub struct NaluToByteStreamConverter {
    length_size: u8,
    /// 关键帧前插入的参数集 (SPS + PPS, 未转义)
    parameter_sets: Vec<Vec<u8>>,
}

impl NaluToByteStreamConverter {
    /// 创建转换器
    pub fn new(length_size: u8, parameter_sets: Vec<Vec<u8>>) -> FengResult<Self> {
        if !matches!(length_size, 1 | 2 | 4) {
            return Err(FengError::InvalidArgument(format!(
                "字节流转换要求长度前缀 1/2/4 字节, 实际 {length_size}"
            )));
        }
        Ok(Self {
            length_size,
            parameter_sets,
        })
    }

    /// 转换一个采样
    pub fn convert(&self, sample: &[u8], is_key_frame: bool) -> FengResult<Vec<u8>> {
        let mut out = Vec::with_capacity(sample.len() + 64);
        out.extend_from_slice(&START_CODE);
        out.extend_from_slice(&H264_AUD);
        if is_key_frame {
            for ps in &self.parameter_sets {
                out.extend_from_slice(&START_CODE);
                out.extend_from_slice(&escape_nalu(ps));
            }
        }

        let mut reader = NaluReader::new(sample, self.length_size)?;
        while let Some(nalu) = reader.next()? {
            // 采样内已有的 AUD / 参数集不再重复输出
            match H264NaluType::from_header(nalu.header()) {
                H264NaluType::Aud => continue,
                H264NaluType::Sps | H264NaluType::Pps if is_key_frame => continue,
                _ => {}
            }
            out.extend_from_slice(&START_CODE);
            out.extend_from_slice(nalu.data);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_length_prefixed_reader() {
        // 两个 NALU: 长度 3 与长度 2 (4 字节前缀)
        let data = [
            0, 0, 0, 3, 0x65, 0xAA, 0xBB, //
            0, 0, 0, 2, 0x41, 0xCC,
        ];
        let mut reader = NaluReader::new(&data, 4).unwrap();
        let n1 = reader.next().unwrap().unwrap();
        assert_eq!(n1.data, &[0x65, 0xAA, 0xBB]);
        assert_eq!(H264NaluType::from_header(n1.header()), H264NaluType::IdrSlice);
        let n2 = reader.next().unwrap().unwrap();
        assert_eq!(n2.data, &[0x41, 0xCC]);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_length_out_of_bounds() {
        let data = [0, 0, 0, 9, 0x65];
        let mut reader = NaluReader::new(&data, 4).unwrap();
        assert!(reader.next().is_err());
    }

    #[test]
    fn test_annex_b_reader() {
        let data = [
            0, 0, 0, 1, 0x67, 0x42, //
            0, 0, 1, 0x68, 0xCE, //
            0, 0, 0, 1, 0x65, 0x88,
        ];
        let mut reader = NaluReader::new(&data, 0).unwrap();
        let n1 = reader.next().unwrap().unwrap();
        assert_eq!(n1.data, &[0x67, 0x42]);
        let n2 = reader.next().unwrap().unwrap();
        assert_eq!(n2.data, &[0x68, 0xCE]);
        let n3 = reader.next().unwrap().unwrap();
        assert_eq!(n3.data, &[0x65, 0x88]);
        assert!(reader.next().unwrap().is_none());
    }

    #[test]
    fn test_escape_nalu() {
        // 00 00 01 → 00 00 03 01
        assert_eq!(escape_nalu(&[0, 0, 1]), vec![0, 0, 3, 1]);
        // 00 00 00 → 00 00 03 00
        assert_eq!(escape_nalu(&[0, 0, 0]), vec![0, 0, 3, 0]);
        // 结尾 00 00 补 03
        assert_eq!(escape_nalu(&[0xAA, 0, 0]), vec![0xAA, 0, 0, 3]);
        // 无需转义
        assert_eq!(escape_nalu(&[0, 1, 0, 2]), vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_escape_strip_roundtrip() {
        let original = vec![0x00, 0x00, 0x01, 0x02, 0x00, 0x00, 0x00, 0xFF, 0x00, 0x00];
        let escaped = escape_nalu(&original);
        assert_eq!(strip_emulation_prevention(&escaped), original);
    }

    #[test]
    fn test_byte_stream_conversion_inserts_parameter_sets() {
        let sps = vec![0x67, 0x42, 0x00, 0x1E];
        let pps = vec![0x68, 0xCE];
        let converter = NaluToByteStreamConverter::new(4, vec![sps.clone(), pps.clone()]).unwrap();

        let sample = [0, 0, 0, 2, 0x65, 0x88];
        let out = converter.convert(&sample, true).unwrap();

        // AUD + SPS + PPS + 片
        let expected = [
            &START_CODE[..],
            &H264_AUD[..],
            &START_CODE[..],
            &sps[..],
            &START_CODE[..],
            &pps[..],
            &START_CODE[..],
            &[0x65, 0x88][..],
        ]
        .concat();
        assert_eq!(out, expected);

        // 非关键帧不插参数集
        let out = converter.convert(&sample, false).unwrap();
        let expected = [&START_CODE[..], &H264_AUD[..], &START_CODE[..], &[0x65, 0x88][..]].concat();
        assert_eq!(out, expected);
    }
}
