//! 子采样布局构建.
//!
//! 按编解码器结构把采样划分为 (明文, 密文) 区域序列:
//! - AVC/HEVC: 逐 NALU, 长度字段 + NAL 头 + 片头保持明文, 片体加密
//! - VP9: 按 Superframe 每个子帧一条子采样
//! - 音频: 整个采样一条子采样
//!
//! CTR 方案下各密文区对齐到整 AES 块, 采样末尾不足一块的残余保持明文
//! (残余并入后继区域的明文前缀或尾部明文区).

use feng_core::{FengError, FengResult};
use feng_crypto::AES_BLOCK_SIZE;

use crate::codecs::hevc::hevc_slice_header_size;
use crate::codecs::nalu::{h265_is_vcl, H264NaluType, NaluReader};
use crate::codecs::vpx::vp9_subframe_sizes;
use crate::codecs::H264SliceHeaderParser;
use crate::sample::SubsampleEntry;
use crate::stream_info::Codec;

/// 子采样布局构建器
pub struct SubsampleLayout {
    codec: Codec,
    nalu_length_size: u8,
    /// CTR 方案的整块对齐
    align_protected: bool,
    slice_parser: Option<H264SliceHeaderParser>,
}

impl SubsampleLayout {
    /// 创建布局构建器
    pub fn new(
        codec: Codec,
        nalu_length_size: u8,
        align_protected: bool,
        slice_parser: Option<H264SliceHeaderParser>,
    ) -> Self {
        Self {
            codec,
            nalu_length_size,
            align_protected,
            slice_parser,
        }
    }

    /// 为一个采样构建子采样布局
    pub fn build(&self, data: &[u8]) -> FengResult<Vec<SubsampleEntry>> {
        let mut builder = EntryBuilder::new(self.align_protected);
        match self.codec {
            Codec::H264 | Codec::H265 => self.build_nalu(data, &mut builder)?,
            Codec::Vp9 => {
                for size in vp9_subframe_sizes(data)? {
                    builder.add_region(0, size);
                }
            }
            _ => {
                // 音频与其他: 整采样一条子采样
                builder.add_region(0, data.len());
            }
        }
        Ok(builder.finish(data.len())?)
    }

    fn build_nalu(&self, data: &[u8], builder: &mut EntryBuilder) -> FengResult<()> {
        let mut reader = NaluReader::new(data, self.nalu_length_size)?;
        while let Some(nalu) = reader.next()? {
            let is_slice = match self.codec {
                Codec::H264 => H264NaluType::from_header(nalu.header()).is_slice(),
                _ => h265_is_vcl(nalu.header()),
            };
            if !is_slice {
                builder.add_region(nalu.prefix_size + nalu.data.len(), 0);
                continue;
            }
            let header_size = match self.codec {
                Codec::H264 => match &self.slice_parser {
                    Some(parser) => parser.header_size(nalu.data)?,
                    None => 1,
                },
                _ => hevc_slice_header_size(nalu.data),
            };
            let header_size = header_size.min(nalu.data.len());
            builder.add_region(
                nalu.prefix_size + header_size,
                nalu.data.len() - header_size,
            );
        }
        Ok(())
    }
}

/// 把 (clear, protected) 区域序列压成合法的子采样条目
struct EntryBuilder {
    align_protected: bool,
    entries: Vec<SubsampleEntry>,
    pending_clear: usize,
    total: usize,
}

impl EntryBuilder {
    fn new(align_protected: bool) -> Self {
        Self {
            align_protected,
            entries: Vec::new(),
            pending_clear: 0,
            total: 0,
        }
    }

    fn add_region(&mut self, clear: usize, protected: usize) {
        self.total += clear + protected;
        self.pending_clear += clear;

        let mut cipher = protected;
        if self.align_protected {
            let remainder = cipher % AES_BLOCK_SIZE;
            cipher -= remainder;
            self.flush_entry(cipher);
            self.pending_clear += remainder;
        } else {
            self.flush_entry(cipher);
        }
    }

    fn flush_entry(&mut self, cipher: usize) {
        if cipher == 0 {
            return; // 明文继续累积
        }
        // clear_bytes 为 u16, 超长的明文区拆为 cipher=0 的条目
        while self.pending_clear > u16::MAX as usize {
            self.entries.push(SubsampleEntry::new(u16::MAX, 0));
            self.pending_clear -= u16::MAX as usize;
        }
        self.entries
            .push(SubsampleEntry::new(self.pending_clear as u16, cipher as u32));
        self.pending_clear = 0;
    }

    fn finish(mut self, expected_total: usize) -> FengResult<Vec<SubsampleEntry>> {
        while self.pending_clear > u16::MAX as usize {
            self.entries.push(SubsampleEntry::new(u16::MAX, 0));
            self.pending_clear -= u16::MAX as usize;
        }
        if self.pending_clear > 0 {
            self.entries
                .push(SubsampleEntry::new(self.pending_clear as u16, 0));
        }
        if self.total != expected_total {
            return Err(FengError::EncryptionFailure(format!(
                "子采样布局覆盖 {} 字节, 采样为 {} 字节",
                self.total, expected_total
            )));
        }
        Ok(self.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_whole_sample_aligned() {
        let layout = SubsampleLayout::new(Codec::Aac, 0, true, None);
        let entries = layout.build(&[0u8; 100]).unwrap();
        // 96 字节密文 + 4 字节尾部明文
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].clear_bytes, 0);
        assert_eq!(entries[0].cipher_bytes, 96);
        assert_eq!(entries[1].clear_bytes, 4);
        assert_eq!(entries[1].cipher_bytes, 0);
    }

    #[test]
    fn test_audio_without_alignment() {
        let layout = SubsampleLayout::new(Codec::Aac, 0, false, None);
        let entries = layout.build(&[0u8; 100]).unwrap();
        assert_eq!(entries, vec![SubsampleEntry::new(0, 100)]);
    }

    #[test]
    fn test_h264_non_vcl_stays_clear() {
        // SEI (type 6, 10 字节) + IDR (type 5, 40 字节), 4 字节长度前缀
        let mut data = Vec::new();
        data.extend_from_slice(&10u32.to_be_bytes());
        data.push(0x06);
        data.extend_from_slice(&[0xEE; 9]);
        data.extend_from_slice(&40u32.to_be_bytes());
        data.push(0x65);
        data.extend_from_slice(&[0xDD; 39]);

        // 无片头解析器: 片的明文区 = 长度字段 + 1 字节 NAL 头
        let layout = SubsampleLayout::new(Codec::H264, 4, true, None);
        let entries = layout.build(&data).unwrap();

        // SEI 全明文 (14) + IDR 明文 (4+1) → 19 明文, 密文 39 → 对齐 32, 残余 7
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].clear_bytes, 19);
        assert_eq!(entries[0].cipher_bytes, 32);
        assert_eq!(entries[1].clear_bytes, 7);
        assert_eq!(entries[1].cipher_bytes, 0);

        let covered: u64 = entries
            .iter()
            .map(|e| u64::from(e.clear_bytes) + u64::from(e.cipher_bytes))
            .sum();
        assert_eq!(covered, data.len() as u64);
    }

    #[test]
    fn test_vp9_superframe_layout() {
        let mut frame = vec![0xAA; 32];
        frame.extend_from_slice(&[0xBB; 20]);
        frame.push(0xC1); // 2 帧, 1 字节宽度
        frame.push(32);
        frame.push(20);
        frame.push(0xC1);

        let layout = SubsampleLayout::new(Codec::Vp9, 0, true, None);
        let entries = layout.build(&frame).unwrap();
        // 32 → 整块; 20 → 16 密文 + 4 明文; 索引 4 字节 → 明文
        assert_eq!(entries[0], SubsampleEntry::new(0, 32));
        assert_eq!(entries[1], SubsampleEntry::new(0, 16));
        assert_eq!(entries[2], SubsampleEntry::new(8, 0));
    }

    #[test]
    fn test_size_mismatch_detected() {
        // NALU 长度超出采样 → NaluReader 报错
        let mut data = vec![0, 0, 0, 99, 0x65];
        data.extend_from_slice(&[0u8; 10]);
        let layout = SubsampleLayout::new(Codec::H264, 4, true, None);
        assert!(layout.build(&data).is_err());
    }
}
