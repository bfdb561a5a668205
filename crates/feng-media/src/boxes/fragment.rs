//! 分片与分段索引 box 定义 (moof 树、senc/saiz/saio、sidx).

use feng_core::{BufferReader, FengError, FengResult};

use super::{
    BoxBuffer, FourCc, Mp4Box, SampleGroupDescriptionBox, SampleToGroupBox,
};

/// trun/trex 采样标志: 关键帧 (sample_depends_on = 2)
pub const SAMPLE_FLAGS_KEY_FRAME: u32 = 0x0200_0000;
/// trun/trex 采样标志: 非关键帧 (depends_on = 1, is_non_sync = 1)
pub const SAMPLE_FLAGS_NON_KEY_FRAME: u32 = 0x0101_0000;

/// mfhd box (分片序号)
#[derive(Debug, Clone, Default)]
pub struct MovieFragmentHeaderBox {
    /// 分片序号 (1 起)
    pub sequence_number: u32,
}

impl Mp4Box for MovieFragmentHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"mfhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.rw_u32(&mut self.sequence_number)
    }
}

/// tfhd box (轨道分片头)
#[derive(Debug, Clone, Default)]
pub struct TrackFragmentHeaderBox {
    /// 标志
    pub flags: u32,
    /// 轨道 ID
    pub track_id: u32,
    /// 默认采样时长
    pub default_sample_duration: u32,
    /// 默认采样大小
    pub default_sample_size: u32,
    /// 默认采样标志
    pub default_sample_flags: u32,
}

impl TrackFragmentHeaderBox {
    /// 标志: 默认采样时长存在
    pub const FLAG_DEFAULT_DURATION: u32 = 0x8;
    /// 标志: 默认采样大小存在
    pub const FLAG_DEFAULT_SIZE: u32 = 0x10;
    /// 标志: 默认采样标志存在
    pub const FLAG_DEFAULT_FLAGS: u32 = 0x20;
    /// 标志: trun 偏移以 moof 起点为基准
    pub const FLAG_DEFAULT_BASE_IS_MOOF: u32 = 0x20000;
    /// 标志: base_data_offset 存在 (仅读取)
    pub const FLAG_BASE_DATA_OFFSET: u32 = 0x1;
    /// 标志: 采样描述索引存在 (仅读取)
    pub const FLAG_SAMPLE_DESCRIPTION_INDEX: u32 = 0x2;
}

impl Mp4Box for TrackFragmentHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"tfhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        buf.rw_version_flags(&mut version, &mut self.flags)?;
        buf.rw_u32(&mut self.track_id)?;
        if self.flags & Self::FLAG_BASE_DATA_OFFSET != 0 {
            buf.skip(8)?;
        }
        if self.flags & Self::FLAG_SAMPLE_DESCRIPTION_INDEX != 0 {
            buf.skip(4)?;
        }
        if self.flags & Self::FLAG_DEFAULT_DURATION != 0 {
            buf.rw_u32(&mut self.default_sample_duration)?;
        }
        if self.flags & Self::FLAG_DEFAULT_SIZE != 0 {
            buf.rw_u32(&mut self.default_sample_size)?;
        }
        if self.flags & Self::FLAG_DEFAULT_FLAGS != 0 {
            buf.rw_u32(&mut self.default_sample_flags)?;
        }
        Ok(())
    }
}

/// tfdt box (基准解码时间)
#[derive(Debug, Clone, Default)]
pub struct TrackFragmentDecodeTimeBox {
    /// 版本
    pub version: u8,
    /// 分片首采样的解码时间
    pub base_media_decode_time: u64,
}

impl Mp4Box for TrackFragmentDecodeTimeBox {
    fn fourcc(&self) -> FourCc {
        *b"tfdt"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            self.version = if self.base_media_decode_time > u64::from(u32::MAX) {
                1
            } else {
                0
            };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        buf.rw_u32_or_u64(&mut self.base_media_decode_time, self.version == 1)
    }
}

/// trun 采样条目
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackRunEntry {
    /// 采样时长
    pub sample_duration: u32,
    /// 采样大小
    pub sample_size: u32,
    /// 采样标志
    pub sample_flags: u32,
    /// 合成时间偏移
    pub sample_composition_time_offset: i32,
}

/// trun box (采样运行表)
#[derive(Debug, Clone, Default)]
pub struct TrackRunBox {
    /// 版本 (有负合成偏移时写为 1)
    pub version: u8,
    /// 标志
    pub flags: u32,
    /// 采样数
    pub sample_count: u32,
    /// 相对 moof 起点的数据偏移
    pub data_offset: i32,
    /// 条目 (字段是否逐采样存在取决于标志)
    pub entries: Vec<TrackRunEntry>,
}

impl TrackRunBox {
    /// 标志: data_offset 存在
    pub const FLAG_DATA_OFFSET: u32 = 0x1;
    /// 标志: 首采样标志存在
    pub const FLAG_FIRST_SAMPLE_FLAGS: u32 = 0x4;
    /// 标志: 逐采样时长
    pub const FLAG_SAMPLE_DURATION: u32 = 0x100;
    /// 标志: 逐采样大小
    pub const FLAG_SAMPLE_SIZE: u32 = 0x200;
    /// 标志: 逐采样标志
    pub const FLAG_SAMPLE_FLAGS: u32 = 0x400;
    /// 标志: 逐采样合成偏移
    pub const FLAG_SAMPLE_CTS: u32 = 0x800;
}

impl Mp4Box for TrackRunBox {
    fn fourcc(&self) -> FourCc {
        *b"trun"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let has_negative_cts = self
                .entries
                .iter()
                .any(|e| e.sample_composition_time_offset < 0);
            self.version = if has_negative_cts { 1 } else { 0 };
        }
        buf.rw_version_flags(&mut self.version, &mut self.flags)?;
        buf.rw_u32(&mut self.sample_count)?;
        if self.flags & Self::FLAG_DATA_OFFSET != 0 {
            buf.rw_i32(&mut self.data_offset)?;
        }
        let mut first_sample_flags = self
            .entries
            .first()
            .map(|e| e.sample_flags)
            .unwrap_or(0);
        if self.flags & Self::FLAG_FIRST_SAMPLE_FLAGS != 0 {
            buf.rw_u32(&mut first_sample_flags)?;
        }

        if buf.reading() {
            self.entries = vec![TrackRunEntry::default(); self.sample_count as usize];
        }
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if self.flags & Self::FLAG_SAMPLE_DURATION != 0 {
                buf.rw_u32(&mut entry.sample_duration)?;
            }
            if self.flags & Self::FLAG_SAMPLE_SIZE != 0 {
                buf.rw_u32(&mut entry.sample_size)?;
            }
            if self.flags & Self::FLAG_SAMPLE_FLAGS != 0 {
                buf.rw_u32(&mut entry.sample_flags)?;
            } else if buf.reading() && i == 0 && self.flags & Self::FLAG_FIRST_SAMPLE_FLAGS != 0 {
                entry.sample_flags = first_sample_flags;
            }
            if self.flags & Self::FLAG_SAMPLE_CTS != 0 {
                buf.rw_i32(&mut entry.sample_composition_time_offset)?;
            }
        }
        Ok(())
    }
}

/// saiz box (CENC 辅助信息大小)
#[derive(Debug, Clone, Default)]
pub struct SampleAuxiliaryInfoSizeBox {
    /// 默认辅助信息大小 (0 表示逐采样)
    pub default_sample_info_size: u8,
    /// 采样数
    pub sample_count: u32,
    /// 逐采样大小 (default 为 0 时)
    pub sample_info_sizes: Vec<u8>,
}

impl Mp4Box for SampleAuxiliaryInfoSizeBox {
    fn fourcc(&self) -> FourCc {
        *b"saiz"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        if flags & 1 != 0 {
            buf.skip(8)?; // aux_info_type + parameter
        }
        buf.rw_u8(&mut self.default_sample_info_size)?;
        buf.rw_u32(&mut self.sample_count)?;
        if self.default_sample_info_size == 0 {
            buf.rw_vec(&mut self.sample_info_sizes, self.sample_count as usize)?;
        }
        Ok(())
    }
}

/// saio box (CENC 辅助信息偏移)
#[derive(Debug, Clone, Default)]
pub struct SampleAuxiliaryInfoOffsetBox {
    /// 版本
    pub version: u8,
    /// 偏移 (相对 moof 起点, 单条目)
    pub offsets: Vec<u64>,
}

impl Mp4Box for SampleAuxiliaryInfoOffsetBox {
    fn fourcc(&self) -> FourCc {
        *b"saio"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let needs64 = self.offsets.iter().any(|o| *o > u64::from(u32::MAX));
            self.version = if needs64 { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        if flags & 1 != 0 {
            buf.skip(8)?;
        }
        let mut count = self.offsets.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.offsets = vec![0u64; count as usize];
        }
        for offset in &mut self.offsets {
            buf.rw_u32_or_u64(offset, self.version == 1)?;
        }
        Ok(())
    }
}

/// senc 采样条目
#[derive(Debug, Clone, Default)]
pub struct SampleEncryptionEntry {
    /// 本采样 IV
    pub iv: Vec<u8>,
    /// 子采样布局 (clear, cipher)
    pub subsamples: Vec<(u16, u32)>,
}

impl SampleEncryptionEntry {
    /// 条目序列化大小
    pub fn byte_len(&self, with_subsamples: bool) -> u32 {
        let mut len = self.iv.len() as u32;
        if with_subsamples {
            len += 2 + self.subsamples.len() as u32 * 6;
        }
        len
    }
}

/// senc box (采样加密信息)
///
/// IV 大小不在 box 内, 解析需要 tenc 提供的上下文,
/// 因此读取走 [`SampleEncryptionBox::parse_with_iv_size`].
#[derive(Debug, Clone, Default)]
pub struct SampleEncryptionBox {
    /// 标志 (bit1 = 携带子采样布局)
    pub flags: u32,
    /// 每采样 IV 大小 (写入与解析上下文)
    pub iv_size: u8,
    /// 条目
    pub entries: Vec<SampleEncryptionEntry>,
}

impl SampleEncryptionBox {
    /// 标志: 携带子采样布局
    pub const FLAG_SUBSAMPLES: u32 = 0x2;

    /// 以给定 IV 大小解析 senc 负载
    pub fn parse_with_iv_size(payload: &[u8], iv_size: u8) -> FengResult<Self> {
        let mut r = BufferReader::new(payload);
        r.skip(1)?; // version
        let flags = r.read_u24()?;
        let sample_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(sample_count as usize);
        for _ in 0..sample_count {
            let iv = r.read_vec(iv_size as usize)?;
            let mut subsamples = Vec::new();
            if flags & Self::FLAG_SUBSAMPLES != 0 {
                let subsample_count = r.read_u16()?;
                for _ in 0..subsample_count {
                    let clear = r.read_u16()?;
                    let cipher = r.read_u32()?;
                    subsamples.push((clear, cipher));
                }
            }
            entries.push(SampleEncryptionEntry { iv, subsamples });
        }
        Ok(Self {
            flags,
            iv_size,
            entries,
        })
    }
}

impl Mp4Box for SampleEncryptionBox {
    fn fourcc(&self) -> FourCc {
        *b"senc"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if buf.reading() {
            return Err(FengError::ParserFailure(
                "senc 解析需要 IV 大小上下文".into(),
            ));
        }
        let mut version = 0u8;
        buf.rw_version_flags(&mut version, &mut self.flags)?;
        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        let with_subsamples = self.flags & Self::FLAG_SUBSAMPLES != 0;
        for entry in &mut self.entries {
            let iv_len = entry.iv.len();
            buf.rw_vec(&mut entry.iv, iv_len)?;
            if with_subsamples {
                let mut sub_count = entry.subsamples.len() as u16;
                buf.rw_u16(&mut sub_count)?;
                for (clear, cipher) in &mut entry.subsamples {
                    buf.rw_u16(clear)?;
                    buf.rw_u32(cipher)?;
                }
            }
        }
        Ok(())
    }
}

/// traf box (轨道分片)
#[derive(Debug, Clone, Default)]
pub struct TrackFragmentBox {
    /// 分片头
    pub header: TrackFragmentHeaderBox,
    /// 基准解码时间
    pub decode_time: Option<TrackFragmentDecodeTimeBox>,
    /// 采样运行表
    pub runs: Vec<TrackRunBox>,
    /// 辅助信息大小
    pub aux_size: Option<SampleAuxiliaryInfoSizeBox>,
    /// 辅助信息偏移
    pub aux_offset: Option<SampleAuxiliaryInfoOffsetBox>,
    /// 采样加密 (写入路径)
    pub sample_encryption: Option<SampleEncryptionBox>,
    /// 读取到的 senc 原始负载 (IV 大小已知后再解析)
    pub raw_sample_encryption: Option<Vec<u8>>,
    /// 采样组描述 (密钥轮换)
    pub group_description: Option<SampleGroupDescriptionBox>,
    /// 采样→组映射
    pub sample_to_group: Option<SampleToGroupBox>,
}

impl Mp4Box for TrackFragmentBox {
    fn fourcc(&self) -> FourCc {
        *b"traf"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.header)?;
        buf.try_rw_child(&mut self.decode_time)?;
        buf.rw_children(&mut self.runs)?;
        buf.try_rw_child(&mut self.aux_size)?;
        buf.try_rw_child(&mut self.aux_offset)?;
        if buf.reading() {
            self.raw_sample_encryption =
                buf.take_child_payloads(b"senc")?.into_iter().next();
        } else if let Some(senc) = &mut self.sample_encryption {
            buf.write_child(senc)?;
        }
        buf.try_rw_child(&mut self.group_description)?;
        buf.try_rw_child(&mut self.sample_to_group)
    }
}

/// moof box (影片分片)
#[derive(Debug, Clone, Default)]
pub struct MovieFragmentBox {
    /// 分片序号
    pub header: MovieFragmentHeaderBox,
    /// 轨道分片
    pub tracks: Vec<TrackFragmentBox>,
}

impl Mp4Box for MovieFragmentBox {
    fn fourcc(&self) -> FourCc {
        *b"moof"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.header)?;
        buf.rw_children(&mut self.tracks)
    }
}

/// sidx 引用条目
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SegmentReference {
    /// true 表示引用另一个 sidx
    pub reference_type: bool,
    /// 被引用区间的字节大小
    pub referenced_size: u32,
    /// 子分段时长
    pub subsegment_duration: u32,
    /// 子分段以 SAP 开始
    pub starts_with_sap: bool,
    /// SAP 类型 (0 表示未知)
    pub sap_type: u8,
    /// 子分段起点到 SAP 的时间差
    pub sap_delta_time: u32,
}

/// sidx box (分段索引)
#[derive(Debug, Clone, Default)]
pub struct SegmentIndexBox {
    /// 版本
    pub version: u8,
    /// 引用的轨道 ID
    pub reference_id: u32,
    /// 时间刻度
    pub timescale: u32,
    /// 最早呈现时间
    pub earliest_presentation_time: u64,
    /// sidx 结束到首个引用区间的字节偏移
    pub first_offset: u64,
    /// 引用
    pub references: Vec<SegmentReference>,
}

impl Mp4Box for SegmentIndexBox {
    fn fourcc(&self) -> FourCc {
        *b"sidx"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let needs64 = self.earliest_presentation_time > u64::from(u32::MAX)
                || self.first_offset > u64::from(u32::MAX);
            self.version = if needs64 { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        buf.rw_u32(&mut self.reference_id)?;
        buf.rw_u32(&mut self.timescale)?;
        let v1 = self.version == 1;
        buf.rw_u32_or_u64(&mut self.earliest_presentation_time, v1)?;
        buf.rw_u32_or_u64(&mut self.first_offset, v1)?;
        buf.skip(2)?; // reserved
        let mut count = self.references.len() as u16;
        buf.rw_u16(&mut count)?;
        if buf.reading() {
            self.references = vec![SegmentReference::default(); count as usize];
        }
        for reference in &mut self.references {
            let mut word1 = (u32::from(reference.reference_type) << 31)
                | (reference.referenced_size & 0x7FFF_FFFF);
            buf.rw_u32(&mut word1)?;
            buf.rw_u32(&mut reference.subsegment_duration)?;
            let mut word3 = (u32::from(reference.starts_with_sap) << 31)
                | (u32::from(reference.sap_type & 0x7) << 28)
                | (reference.sap_delta_time & 0x0FFF_FFFF);
            buf.rw_u32(&mut word3)?;
            if buf.reading() {
                reference.reference_type = word1 >> 31 != 0;
                reference.referenced_size = word1 & 0x7FFF_FFFF;
                reference.starts_with_sap = word3 >> 31 != 0;
                reference.sap_type = ((word3 >> 28) & 0x7) as u8;
                reference.sap_delta_time = word3 & 0x0FFF_FFFF;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{box_to_vec, parse_box};

    #[test]
    fn test_trun_roundtrip_with_negative_cts() {
        let mut trun = TrackRunBox {
            flags: TrackRunBox::FLAG_DATA_OFFSET
                | TrackRunBox::FLAG_SAMPLE_DURATION
                | TrackRunBox::FLAG_SAMPLE_SIZE
                | TrackRunBox::FLAG_SAMPLE_FLAGS
                | TrackRunBox::FLAG_SAMPLE_CTS,
            sample_count: 2,
            data_offset: 256,
            entries: vec![
                TrackRunEntry {
                    sample_duration: 3000,
                    sample_size: 1000,
                    sample_flags: SAMPLE_FLAGS_KEY_FRAME,
                    sample_composition_time_offset: 0,
                },
                TrackRunEntry {
                    sample_duration: 3000,
                    sample_size: 500,
                    sample_flags: SAMPLE_FLAGS_NON_KEY_FRAME,
                    sample_composition_time_offset: -1500,
                },
            ],
            ..Default::default()
        };
        let bytes = box_to_vec(&mut trun).unwrap();
        assert_eq!(bytes[8], 1, "有负合成偏移时 trun 应为版本 1");
        let parsed: TrackRunBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.sample_count, 2);
        assert_eq!(parsed.data_offset, 256);
        assert_eq!(parsed.entries[1].sample_composition_time_offset, -1500);
        assert_eq!(parsed.entries[0].sample_flags, SAMPLE_FLAGS_KEY_FRAME);
    }

    #[test]
    fn test_tfdt_64bit_upgrade() {
        let mut tfdt = TrackFragmentDecodeTimeBox {
            base_media_decode_time: u64::from(u32::MAX) + 100,
            ..Default::default()
        };
        let bytes = box_to_vec(&mut tfdt).unwrap();
        assert_eq!(bytes[8], 1);
        let parsed: TrackFragmentDecodeTimeBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.base_media_decode_time, u64::from(u32::MAX) + 100);
    }

    #[test]
    fn test_senc_roundtrip() {
        let mut senc = SampleEncryptionBox {
            flags: SampleEncryptionBox::FLAG_SUBSAMPLES,
            iv_size: 8,
            entries: vec![SampleEncryptionEntry {
                iv: vec![1, 2, 3, 4, 5, 6, 7, 8],
                subsamples: vec![(10, 90), (5, 123)],
            }],
        };
        let bytes = box_to_vec(&mut senc).unwrap();

        // box 头 + version/flags 之后即负载
        let payload = &bytes[8..];
        let parsed = SampleEncryptionBox::parse_with_iv_size(payload, 8).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert_eq!(parsed.entries[0].iv, vec![1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(parsed.entries[0].subsamples, vec![(10, 90), (5, 123)]);
    }

    #[test]
    fn test_sidx_roundtrip() {
        let mut sidx = SegmentIndexBox {
            reference_id: 1,
            timescale: 90000,
            earliest_presentation_time: 0,
            first_offset: 0,
            references: vec![
                SegmentReference {
                    reference_type: false,
                    referenced_size: 4321,
                    subsegment_duration: 90000,
                    starts_with_sap: true,
                    sap_type: 1,
                    sap_delta_time: 0,
                },
                SegmentReference {
                    reference_type: false,
                    referenced_size: 1234,
                    subsegment_duration: 45000,
                    starts_with_sap: false,
                    sap_type: 0,
                    sap_delta_time: 100,
                },
            ],
            ..Default::default()
        };
        let bytes = box_to_vec(&mut sidx).unwrap();
        let parsed: SegmentIndexBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.timescale, 90000);
        assert_eq!(parsed.references.len(), 2);
        assert_eq!(parsed.references[0], sidx.references[0]);
        assert_eq!(parsed.references[1], sidx.references[1]);
    }

    #[test]
    fn test_moof_tree_roundtrip() {
        let mut moof = MovieFragmentBox {
            header: MovieFragmentHeaderBox { sequence_number: 7 },
            tracks: vec![TrackFragmentBox {
                header: TrackFragmentHeaderBox {
                    flags: TrackFragmentHeaderBox::FLAG_DEFAULT_BASE_IS_MOOF
                        | TrackFragmentHeaderBox::FLAG_DEFAULT_DURATION,
                    track_id: 1,
                    default_sample_duration: 3000,
                    ..Default::default()
                },
                decode_time: Some(TrackFragmentDecodeTimeBox {
                    base_media_decode_time: 90000,
                    ..Default::default()
                }),
                runs: vec![TrackRunBox {
                    flags: TrackRunBox::FLAG_DATA_OFFSET | TrackRunBox::FLAG_SAMPLE_SIZE,
                    sample_count: 1,
                    data_offset: 100,
                    entries: vec![TrackRunEntry {
                        sample_size: 2048,
                        ..Default::default()
                    }],
                    ..Default::default()
                }],
                ..Default::default()
            }],
        };
        let bytes = box_to_vec(&mut moof).unwrap();
        let parsed: MovieFragmentBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.header.sequence_number, 7);
        assert_eq!(parsed.tracks.len(), 1);
        let traf = &parsed.tracks[0];
        assert_eq!(traf.header.track_id, 1);
        assert_eq!(
            traf.decode_time.as_ref().unwrap().base_media_decode_time,
            90000
        );
        assert_eq!(traf.runs[0].entries[0].sample_size, 2048);
    }
}
