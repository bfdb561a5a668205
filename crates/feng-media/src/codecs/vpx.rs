//! VP 系编解码器配置 (VP9).
//!
//! - `VpCodecConfigurationRecord`: MP4 绑定的 vpcC 负载 (版本 1) 解析/序列化,
//!   WebM 逐字段形式的装配, `vp09.PP.LL.BB.CS.CH.TF.FF.RR` 编解码器字符串
//! - VP9 Superframe 结构解析: 每个子帧一条子采样

use feng_core::{BufferReader, BufferWriter, FengError, FengResult};

/// vpcC 负载 (VPCodecConfigurationRecord, 版本 1)
#[derive(Debug, Clone)]
pub struct VpCodecConfigurationRecord {
    /// profile (0..3)
    pub profile: u8,
    /// level (10 x 主版本 + 次版本)
    pub level: u8,
    /// 位深 (8/10/12)
    pub bit_depth: u8,
    /// 色度抽样 (0=4:2:0 vertical, 1=4:2:0 colocated, 2=4:2:2, 3=4:4:4)
    pub chroma_subsampling: u8,
    /// 全范围色彩
    pub video_full_range_flag: bool,
    /// 色彩原色 (ISO 23001-8)
    pub colour_primaries: u8,
    /// 传递特性
    pub transfer_characteristics: u8,
    /// 矩阵系数
    pub matrix_coefficients: u8,
}

impl Default for VpCodecConfigurationRecord {
    fn default() -> Self {
        Self {
            profile: 0,
            level: 10,
            bit_depth: 8,
            chroma_subsampling: 1,
            video_full_range_flag: false,
            colour_primaries: 1,
            transfer_characteristics: 1,
            matrix_coefficients: 1,
        }
    }
}

impl VpCodecConfigurationRecord {
    /// 解析 vpcC 负载 (含 FullBox 头)
    pub fn parse(data: &[u8]) -> FengResult<Self> {
        let mut r = BufferReader::new(data);
        let version = r.read_u8()?;
        if version != 1 {
            return Err(FengError::ParserFailure(format!(
                "vpcC 版本非法: {version}"
            )));
        }
        r.skip(3)?; // flags
        let profile = r.read_u8()?;
        let level = r.read_u8()?;
        let packed = r.read_u8()?;
        let bit_depth = packed >> 4;
        let chroma_subsampling = (packed >> 1) & 0x7;
        let video_full_range_flag = packed & 1 != 0;
        let colour_primaries = r.read_u8()?;
        let transfer_characteristics = r.read_u8()?;
        let matrix_coefficients = r.read_u8()?;
        let init_data_size = r.read_u16()?;
        if init_data_size != 0 {
            return Err(FengError::ParserFailure(
                "vpcC codecInitializationData 应为空".into(),
            ));
        }
        Ok(Self {
            profile,
            level,
            bit_depth,
            chroma_subsampling,
            video_full_range_flag,
            colour_primaries,
            transfer_characteristics,
            matrix_coefficients,
        })
    }

    /// 序列化为 vpcC 负载 (含 FullBox 头)
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = BufferWriter::new();
        w.put_u8(1); // version
        w.put_u24(0); // flags
        w.put_u8(self.profile);
        w.put_u8(self.level);
        w.put_u8(
            (self.bit_depth << 4)
                | (self.chroma_subsampling << 1)
                | u8::from(self.video_full_range_flag),
        );
        w.put_u8(self.colour_primaries);
        w.put_u8(self.transfer_characteristics);
        w.put_u8(self.matrix_coefficients);
        w.put_u16(0); // codecInitializationDataSize
        w.into_vec()
    }

    /// RFC 6381 编解码器字符串 (vp09.PP.LL.BB.CS.CH.TF.FF.RR)
    pub fn codec_string(&self) -> String {
        format!(
            "vp09.{:02}.{:02}.{:02}.{:02}.{:02}.{:02}.{:02}.{:02}",
            self.profile,
            self.level,
            self.bit_depth,
            self.chroma_subsampling,
            self.colour_primaries,
            self.transfer_characteristics,
            self.matrix_coefficients,
            u8::from(self.video_full_range_flag),
        )
    }
}

/// VP9 Superframe 中各子帧的大小
///
/// Superframe 索引位于负载尾部: 标记字节 `110xxxxx`, 其中低 3 位为
/// 帧数-1, 位 3..4 为字节宽度-1; 索引首尾各有一个相同的标记字节.
/// 非 Superframe 返回整帧一个条目.
pub fn vp9_subframe_sizes(data: &[u8]) -> FengResult<Vec<usize>> {
    if data.is_empty() {
        return Ok(Vec::new());
    }
    let marker = data[data.len() - 1];
    if marker & 0xE0 != 0xC0 {
        return Ok(vec![data.len()]);
    }
    let frame_count = (marker & 0x7) as usize + 1;
    let mag = ((marker >> 3) & 0x3) as usize + 1;
    let index_size = 2 + mag * frame_count;
    if data.len() < index_size {
        return Ok(vec![data.len()]);
    }
    let index_start = data.len() - index_size;
    if data[index_start] != marker {
        // 首尾标记不一致, 不是 superframe
        return Ok(vec![data.len()]);
    }

    let mut sizes = Vec::with_capacity(frame_count + 1);
    let mut total = 0usize;
    let mut pos = index_start + 1;
    for _ in 0..frame_count {
        let mut size = 0usize;
        // 小端字节序
        for i in (0..mag).rev() {
            size = (size << 8) | data[pos + i] as usize;
        }
        pos += mag;
        total += size;
        sizes.push(size);
    }
    if total > index_start {
        return Err(FengError::ParserFailure(format!(
            "VP9 superframe 子帧总大小 {total} 超出帧负载 {index_start}"
        )));
    }
    // 索引本身也是一个需要覆盖的区域
    sizes.push(data.len() - total);
    Ok(sizes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vpcc_roundtrip() {
        let record = VpCodecConfigurationRecord {
            profile: 2,
            level: 41,
            bit_depth: 10,
            chroma_subsampling: 1,
            video_full_range_flag: false,
            colour_primaries: 9,
            transfer_characteristics: 16,
            matrix_coefficients: 9,
        };
        let bytes = record.serialize();
        let parsed = VpCodecConfigurationRecord::parse(&bytes).unwrap();
        assert_eq!(parsed.profile, 2);
        assert_eq!(parsed.level, 41);
        assert_eq!(parsed.bit_depth, 10);
        assert_eq!(parsed.matrix_coefficients, 9);
    }

    #[test]
    fn test_codec_string() {
        let record = VpCodecConfigurationRecord::default();
        assert_eq!(record.codec_string(), "vp09.00.10.08.01.01.01.01.00");
    }

    #[test]
    fn test_superframe_parsing() {
        // 两个子帧: 5 字节 + 3 字节, 1 字节宽度
        // 标记: 110 00 00 1 = 0xC1 (2 帧, mag=1)
        let mut frame = vec![0xAA; 5];
        frame.extend_from_slice(&[0xBB; 3]);
        frame.push(0xC1);
        frame.push(5);
        frame.push(3);
        frame.push(0xC1);

        let sizes = vp9_subframe_sizes(&frame).unwrap();
        // 两个子帧 + 索引区
        assert_eq!(sizes, vec![5, 3, 4]);
    }

    #[test]
    fn test_non_superframe() {
        let frame = vec![0x82, 0x49, 0x83, 0x42];
        assert_eq!(vp9_subframe_sizes(&frame).unwrap(), vec![4]);
    }
}
