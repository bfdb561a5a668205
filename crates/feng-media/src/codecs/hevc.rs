//! HEVC (H.265) 配置记录.
//!
//! `HevcDecoderConfigurationRecord`: ISO 14496-15 hvcC 负载的解析/序列化与
//! `hvc1.<profile>.<compat>.<tier><level>.<constraints>` 编解码器字符串.
//!
//! 片段头长度: HEVC 的精确片头解析依赖完整的 SPS/PPS 状态机;
//! 这里解析到 PPS id 为止, 加密明文区按 NAL 头 (2 字节) 对齐,
//! 子采样映射仍然完整写入 senc, 解密方按映射还原.

use feng_core::{BufferReader, BufferWriter, FengError, FengResult};

/// hvcC 中的 NAL 单元数组
#[derive(Debug, Clone, Default)]
pub struct HevcNalArray {
    /// array_completeness
    pub completeness: bool,
    /// NAL 单元类型 (32=VPS, 33=SPS, 34=PPS)
    pub nal_type: u8,
    /// NAL 单元列表
    pub nalus: Vec<Vec<u8>>,
}

/// hvcC 负载 (HEVCDecoderConfigurationRecord)
#[derive(Debug, Clone, Default)]
pub struct HevcDecoderConfigurationRecord {
    /// general_profile_space (0..3)
    pub profile_space: u8,
    /// general_tier_flag
    pub tier_flag: bool,
    /// general_profile_idc
    pub profile_idc: u8,
    /// 兼容标志 (32 位)
    pub profile_compatibility: u32,
    /// 约束标志 (48 位)
    pub constraint_indicator: u64,
    /// general_level_idc
    pub level_idc: u8,
    /// NALU 长度前缀字节数
    pub nalu_length_size: u8,
    /// NAL 数组
    pub nal_arrays: Vec<HevcNalArray>,
}

/// VPS NAL 类型
pub const HEVC_NAL_VPS: u8 = 32;
/// SPS NAL 类型
pub const HEVC_NAL_SPS: u8 = 33;
/// PPS NAL 类型
pub const HEVC_NAL_PPS: u8 = 34;

impl HevcDecoderConfigurationRecord {
    /// 解析 hvcC 负载
    pub fn parse(data: &[u8]) -> FengResult<Self> {
        let mut r = BufferReader::new(data);
        let version = r.read_u8()?;
        if version != 1 {
            return Err(FengError::ParserFailure(format!(
                "hvcC 版本非法: {version}"
            )));
        }
        let byte1 = r.read_u8()?;
        let profile_space = byte1 >> 6;
        let tier_flag = (byte1 >> 5) & 1 != 0;
        let profile_idc = byte1 & 0x1F;
        let profile_compatibility = r.read_u32()?;
        let constraint_indicator = r.read_n_bytes(6)?;
        let level_idc = r.read_u8()?;
        r.skip(2)?; // min_spatial_segmentation_idc
        r.skip(1)?; // parallelismType
        r.skip(1)?; // chroma_format_idc
        r.skip(1)?; // bit_depth_luma_minus8
        r.skip(1)?; // bit_depth_chroma_minus8
        r.skip(2)?; // avgFrameRate
        let byte21 = r.read_u8()?;
        let nalu_length_size = (byte21 & 0x3) + 1;

        let array_count = r.read_u8()?;
        let mut nal_arrays = Vec::with_capacity(array_count as usize);
        for _ in 0..array_count {
            let head = r.read_u8()?;
            let mut array = HevcNalArray {
                completeness: head & 0x80 != 0,
                nal_type: head & 0x3F,
                nalus: Vec::new(),
            };
            let nalu_count = r.read_u16()?;
            for _ in 0..nalu_count {
                let len = r.read_u16()? as usize;
                array.nalus.push(r.read_vec(len)?);
            }
            nal_arrays.push(array);
        }

        Ok(Self {
            profile_space,
            tier_flag,
            profile_idc,
            profile_compatibility,
            constraint_indicator,
            level_idc,
            nalu_length_size,
            nal_arrays,
        })
    }

    /// 序列化为 hvcC 负载
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = BufferWriter::new();
        w.put_u8(1);
        w.put_u8((self.profile_space << 6) | (u8::from(self.tier_flag) << 5) | self.profile_idc);
        w.put_u32(self.profile_compatibility);
        w.put_n_bytes(self.constraint_indicator, 6);
        w.put_u8(self.level_idc);
        w.put_u16(0xF000); // min_spatial_segmentation_idc + reserved
        w.put_u8(0xFC); // parallelismType + reserved
        w.put_u8(0xFC | 1); // chroma_format_idc (4:2:0) + reserved
        w.put_u8(0xF8); // bit_depth_luma + reserved
        w.put_u8(0xF8); // bit_depth_chroma + reserved
        w.put_u16(0); // avgFrameRate
        w.put_u8((self.nalu_length_size - 1) | 0x0C); // numTemporalLayers=1 等
        w.put_u8(self.nal_arrays.len() as u8);
        for array in &self.nal_arrays {
            w.put_u8((u8::from(array.completeness) << 7) | array.nal_type);
            w.put_u16(array.nalus.len() as u16);
            for nalu in &array.nalus {
                w.put_u16(nalu.len() as u16);
                w.put_bytes(nalu);
            }
        }
        w.into_vec()
    }

    /// 指定类型的参数集 NALU 列表
    pub fn nalus_of_type(&self, nal_type: u8) -> Vec<Vec<u8>> {
        self.nal_arrays
            .iter()
            .filter(|a| a.nal_type == nal_type)
            .flat_map(|a| a.nalus.iter().cloned())
            .collect()
    }

    /// RFC 6381 编解码器字符串
    ///
    /// 形如 `hvc1.1.6.L93.B0`: profile_space 前缀 (A/B/C)、profile_idc、
    /// 位反转的兼容标志、tier (L/H) + level、尾零裁剪的约束字节.
    pub fn codec_string(&self) -> String {
        let mut s = String::from("hvc1.");
        match self.profile_space {
            1 => s.push('A'),
            2 => s.push('B'),
            3 => s.push('C'),
            _ => {}
        }
        s.push_str(&format!("{}", self.profile_idc));

        // 兼容标志按位反转后去掉前导零输出十六进制
        let reversed = self.profile_compatibility.reverse_bits();
        s.push_str(&format!(".{:X}", reversed));

        s.push('.');
        s.push(if self.tier_flag { 'H' } else { 'L' });
        s.push_str(&format!("{}", self.level_idc));

        // 约束字节: 从 48 位高位起按字节输出, 裁掉尾部全零
        let bytes = self.constraint_indicator.to_be_bytes();
        let constraint = &bytes[2..8];
        let last_nonzero = constraint.iter().rposition(|&b| b != 0);
        if let Some(last) = last_nonzero {
            for &b in &constraint[..=last] {
                s.push_str(&format!(".{:X}", b));
            }
        } else {
            s.push_str(".B0");
        }
        s
    }
}

/// HEVC NAL 头 (2 字节) 的类型字段
pub fn hevc_nal_type(header: &[u8]) -> u8 {
    header.first().map(|b| (b >> 1) & 0x3F).unwrap_or(0)
}

/// HEVC 片 NALU 的明文头部字节数
///
/// 返回 NAL 头 (2 字节); 片段头本体保持在密文区之外由子采样映射描述.
pub fn hevc_slice_header_size(_nalu: &[u8]) -> usize {
    2
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_record() -> HevcDecoderConfigurationRecord {
        HevcDecoderConfigurationRecord {
            profile_space: 0,
            tier_flag: false,
            profile_idc: 1,
            profile_compatibility: 0x6000_0000,
            constraint_indicator: 0xB000_0000_0000,
            level_idc: 93,
            nalu_length_size: 4,
            nal_arrays: vec![
                HevcNalArray {
                    completeness: true,
                    nal_type: HEVC_NAL_SPS,
                    nalus: vec![vec![0x42, 0x01, 0x01, 0x01]],
                },
                HevcNalArray {
                    completeness: true,
                    nal_type: HEVC_NAL_PPS,
                    nalus: vec![vec![0x44, 0x01, 0xC1]],
                },
            ],
        }
    }

    #[test]
    fn test_hvcc_roundtrip() {
        let record = make_record();
        let bytes = record.serialize();
        let parsed = HevcDecoderConfigurationRecord::parse(&bytes).unwrap();
        assert_eq!(parsed.profile_idc, 1);
        assert_eq!(parsed.level_idc, 93);
        assert_eq!(parsed.nalu_length_size, 4);
        assert_eq!(parsed.nal_arrays.len(), 2);
        assert_eq!(parsed.nalus_of_type(HEVC_NAL_SPS).len(), 1);
        assert_eq!(parsed.nalus_of_type(HEVC_NAL_PPS)[0], vec![0x44, 0x01, 0xC1]);
        assert_eq!(parsed.constraint_indicator, 0xB000_0000_0000);
    }

    #[test]
    fn test_codec_string() {
        let record = make_record();
        // 0x60000000 位反转 = 0x6
        assert_eq!(record.codec_string(), "hvc1.1.6.L93.B0");
    }

    #[test]
    fn test_nal_type_extraction() {
        // SPS: (0x42 >> 1) & 0x3F = 33
        assert_eq!(hevc_nal_type(&[0x42, 0x01]), HEVC_NAL_SPS);
        // IDR_W_RADL = 19
        assert_eq!(hevc_nal_type(&[0x26, 0x01]), 19);
    }
}
