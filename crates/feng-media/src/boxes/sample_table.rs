//! 采样表与 moov 树 box 定义.

use feng_core::{FengError, FengResult};

use super::{
    fourcc_str, BoxBuffer, BoxHeader, DataInformationBox, EditBox, FourCc,
    HandlerBox, MediaHeaderBox, MovieExtendsBox, MovieHeaderBox, Mp4Box, NullMediaHeaderBox,
    ProtectionSchemeInfoBox, ProtectionSystemSpecificHeaderBox, SampleGroupDescriptionBox,
    SampleToGroupBox, SoundMediaHeaderBox, TrackHeaderBox, VideoMediaHeaderBox,
};
use feng_core::BufferReader;

/// 编解码器配置 box (avcC / hvcC / vpcC / dOps 等, 负载原样保存)
#[derive(Debug, Clone, Default)]
pub struct CodecConfigBox {
    /// box 标签
    pub box_type: FourCc,
    /// 原始负载
    pub data: Vec<u8>,
}

impl Mp4Box for CodecConfigBox {
    fn fourcc(&self) -> FourCc {
        self.box_type
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_vec_to_end(&mut self.data)
    }
}

/// esds box (MPEG-4 ES 描述符, 负载原样保存)
#[derive(Debug, Clone, Default)]
pub struct EsdsBox {
    /// ES_Descriptor 原始字节 (不含 FullBox 头)
    pub descriptor: Vec<u8>,
}

impl Mp4Box for EsdsBox {
    fn fourcc(&self) -> FourCc {
        *b"esds"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.rw_vec_to_end(&mut self.descriptor)
    }
}

/// pasp box (像素宽高比)
#[derive(Debug, Clone)]
pub struct PixelAspectRatioBox {
    /// 水平间距
    pub h_spacing: u32,
    /// 垂直间距
    pub v_spacing: u32,
}

impl Default for PixelAspectRatioBox {
    fn default() -> Self {
        Self {
            h_spacing: 1,
            v_spacing: 1,
        }
    }
}

impl Mp4Box for PixelAspectRatioBox {
    fn fourcc(&self) -> FourCc {
        *b"pasp"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_u32(&mut self.h_spacing)?;
        buf.rw_u32(&mut self.v_spacing)
    }
}

/// 视频采样条目 (avc1 / avc3 / hvc1 / hev1 / vp09 / encv)
#[derive(Debug, Clone)]
pub struct VisualSampleEntry {
    /// 条目格式
    pub format: FourCc,
    /// 数据引用索引
    pub data_reference_index: u16,
    /// 宽度
    pub width: u16,
    /// 高度
    pub height: u16,
    /// 编解码器配置子 box
    pub codec_config: Option<CodecConfigBox>,
    /// 像素宽高比
    pub pixel_aspect: Option<PixelAspectRatioBox>,
    /// 保护信息 (encv)
    pub sinf: Option<ProtectionSchemeInfoBox>,
}

impl Default for VisualSampleEntry {
    fn default() -> Self {
        Self {
            format: *b"avc1",
            data_reference_index: 1,
            width: 0,
            height: 0,
            codec_config: None,
            pixel_aspect: None,
            sinf: None,
        }
    }
}

impl Mp4Box for VisualSampleEntry {
    fn fourcc(&self) -> FourCc {
        self.format
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if let Some(actual) = buf.actual_fourcc() {
            self.format = actual;
        }
        buf.skip(6)?; // reserved
        buf.rw_u16(&mut self.data_reference_index)?;
        buf.skip(16)?; // pre_defined + reserved
        buf.rw_u16(&mut self.width)?;
        buf.rw_u16(&mut self.height)?;
        let mut horiz = 0x0048_0000u32;
        let mut vert = 0x0048_0000u32;
        buf.rw_u32(&mut horiz)?;
        buf.rw_u32(&mut vert)?;
        buf.skip(4)?; // reserved
        let mut frame_count = 1u16;
        buf.rw_u16(&mut frame_count)?;
        let mut compressor = [0u8; 32];
        buf.rw_fixed_bytes(&mut compressor)?;
        let mut depth = 0x0018u16;
        buf.rw_u16(&mut depth)?;
        let mut pre_defined = -1i16;
        buf.rw_i16(&mut pre_defined)?;

        if buf.reading() {
            buf.scan_children()?;
            for cc in [*b"avcC", *b"hvcC", *b"vpcC"] {
                let payloads = buf.take_child_payloads(&cc)?;
                if let Some(p) = payloads.into_iter().next() {
                    self.codec_config = Some(CodecConfigBox {
                        box_type: cc,
                        data: p,
                    });
                    break;
                }
            }
            buf.try_rw_child(&mut self.pixel_aspect)?;
            buf.try_rw_child(&mut self.sinf)?;
        } else {
            if let Some(cfg) = &mut self.codec_config {
                buf.write_child(cfg)?;
            }
            buf.try_rw_child(&mut self.pixel_aspect)?;
            buf.try_rw_child(&mut self.sinf)?;
        }
        Ok(())
    }
}

/// 音频采样条目 (mp4a / Opus / enca)
#[derive(Debug, Clone)]
pub struct AudioSampleEntry {
    /// 条目格式
    pub format: FourCc,
    /// 数据引用索引
    pub data_reference_index: u16,
    /// 声道数
    pub channel_count: u16,
    /// 采样位深
    pub sample_size: u16,
    /// 采样率
    pub sample_rate: u32,
    /// esds (AAC)
    pub esds: Option<EsdsBox>,
    /// 其他编解码器配置 (dOps 等)
    pub codec_config: Option<CodecConfigBox>,
    /// 保护信息 (enca)
    pub sinf: Option<ProtectionSchemeInfoBox>,
}

impl Default for AudioSampleEntry {
    fn default() -> Self {
        Self {
            format: *b"mp4a",
            data_reference_index: 1,
            channel_count: 2,
            sample_size: 16,
            sample_rate: 0,
            esds: None,
            codec_config: None,
            sinf: None,
        }
    }
}

impl Mp4Box for AudioSampleEntry {
    fn fourcc(&self) -> FourCc {
        self.format
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if let Some(actual) = buf.actual_fourcc() {
            self.format = actual;
        }
        buf.skip(6)?; // reserved
        buf.rw_u16(&mut self.data_reference_index)?;
        buf.skip(8)?; // reserved
        buf.rw_u16(&mut self.channel_count)?;
        buf.rw_u16(&mut self.sample_size)?;
        buf.skip(4)?; // pre_defined + reserved
        let mut rate_fixed = self.sample_rate << 16;
        buf.rw_u32(&mut rate_fixed)?;
        if buf.reading() {
            self.sample_rate = rate_fixed >> 16;
            buf.scan_children()?;
            buf.try_rw_child(&mut self.esds)?;
            let payloads = buf.take_child_payloads(b"dOps")?;
            if let Some(p) = payloads.into_iter().next() {
                self.codec_config = Some(CodecConfigBox {
                    box_type: *b"dOps",
                    data: p,
                });
            }
            buf.try_rw_child(&mut self.sinf)?;
        } else {
            buf.try_rw_child(&mut self.esds)?;
            if let Some(cfg) = &mut self.codec_config {
                buf.write_child(cfg)?;
            }
            buf.try_rw_child(&mut self.sinf)?;
        }
        Ok(())
    }
}

/// WebVTT 配置 box (vttC)
#[derive(Debug, Clone, Default)]
pub struct WebVttConfigBox {
    /// WebVTT 头部文本
    pub config: String,
}

impl Mp4Box for WebVttConfigBox {
    fn fourcc(&self) -> FourCc {
        *b"vttC"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if buf.reading() {
            let mut bytes = Vec::new();
            buf.rw_vec_to_end(&mut bytes)?;
            self.config = String::from_utf8_lossy(&bytes).to_string();
        } else {
            let mut bytes = self.config.as_bytes().to_vec();
            buf.rw_vec(&mut bytes, 0)?;
        }
        Ok(())
    }
}

/// 文本采样条目 (wvtt)
#[derive(Debug, Clone)]
pub struct TextSampleEntry {
    /// 条目格式
    pub format: FourCc,
    /// 数据引用索引
    pub data_reference_index: u16,
    /// WebVTT 配置
    pub config: WebVttConfigBox,
}

impl Default for TextSampleEntry {
    fn default() -> Self {
        Self {
            format: *b"wvtt",
            data_reference_index: 1,
            config: WebVttConfigBox::default(),
        }
    }
}

impl Mp4Box for TextSampleEntry {
    fn fourcc(&self) -> FourCc {
        self.format
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.skip(6)?;
        buf.rw_u16(&mut self.data_reference_index)?;
        if buf.reading() {
            buf.scan_children()?;
        }
        buf.rw_child(&mut self.config)
    }
}

/// stsd 条目
#[derive(Debug, Clone)]
pub enum SampleEntry {
    /// 视频
    Visual(VisualSampleEntry),
    /// 音频
    Audio(AudioSampleEntry),
    /// 文本
    Text(TextSampleEntry),
    /// 未识别 (原样保留: 标签 + 负载)
    Unknown(FourCc, Vec<u8>),
}

const VISUAL_FORMATS: [&FourCc; 6] = [b"avc1", b"avc3", b"hvc1", b"hev1", b"vp09", b"encv"];
const AUDIO_FORMATS: [&FourCc; 3] = [b"mp4a", b"Opus", b"enca"];
const TEXT_FORMATS: [&FourCc; 1] = [b"wvtt"];

/// stsd box (采样描述)
#[derive(Debug, Clone, Default)]
pub struct SampleDescriptionBox {
    /// 条目
    pub entries: Vec<SampleEntry>,
}

impl Mp4Box for SampleDescriptionBox {
    fn fourcc(&self) -> FourCc {
        *b"stsd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;

        if buf.reading() {
            // 条目类型由 fourcc 决定, 手工分派
            let mut remaining_bytes = Vec::new();
            buf.rw_vec_to_end(&mut remaining_bytes)?;
            let mut reader = BufferReader::new(&remaining_bytes);
            for _ in 0..count {
                let header = BoxHeader::read(&mut reader)?;
                let payload = reader.read_bytes(header.payload_size() as usize)?;
                let mut sub = BoxBuffer::reader(payload);
                sub.set_actual_fourcc(header.fourcc);
                let entry = if VISUAL_FORMATS.contains(&&header.fourcc) {
                    let mut e = VisualSampleEntry::default();
                    e.read_write(&mut sub)?;
                    SampleEntry::Visual(e)
                } else if AUDIO_FORMATS.contains(&&header.fourcc) {
                    let mut e = AudioSampleEntry::default();
                    e.read_write(&mut sub)?;
                    SampleEntry::Audio(e)
                } else if TEXT_FORMATS.contains(&&header.fourcc) {
                    let mut e = TextSampleEntry::default();
                    e.read_write(&mut sub)?;
                    SampleEntry::Text(e)
                } else {
                    log::debug!("stsd: 保留未识别条目 {}", fourcc_str(&header.fourcc));
                    SampleEntry::Unknown(header.fourcc, payload.to_vec())
                };
                self.entries.push(entry);
            }
        } else {
            for entry in &mut self.entries {
                match entry {
                    SampleEntry::Visual(e) => buf.write_child(e)?,
                    SampleEntry::Audio(e) => buf.write_child(e)?,
                    SampleEntry::Text(e) => buf.write_child(e)?,
                    SampleEntry::Unknown(cc, payload) => {
                        let mut raw = CodecConfigBox {
                            box_type: *cc,
                            data: payload.clone(),
                        };
                        buf.write_child(&mut raw)?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// stts 条目
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeToSampleEntry {
    /// 采样数
    pub sample_count: u32,
    /// 采样时长增量
    pub sample_delta: u32,
}

/// stts box (解码时间表)
#[derive(Debug, Clone, Default)]
pub struct TimeToSampleBox {
    /// 条目
    pub entries: Vec<TimeToSampleEntry>,
}

impl Mp4Box for TimeToSampleBox {
    fn fourcc(&self) -> FourCc {
        *b"stts"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.entries = vec![TimeToSampleEntry::default(); count as usize];
        }
        for entry in &mut self.entries {
            buf.rw_u32(&mut entry.sample_count)?;
            buf.rw_u32(&mut entry.sample_delta)?;
        }
        Ok(())
    }
}

/// ctts 条目
#[derive(Debug, Clone, Copy, Default)]
pub struct CompositionOffsetEntry {
    /// 采样数
    pub sample_count: u32,
    /// 合成时间偏移 (版本 1 允许为负)
    pub sample_offset: i32,
}

/// ctts box (合成时间偏移表)
#[derive(Debug, Clone, Default)]
pub struct CompositionOffsetBox {
    /// 版本 (写入时有负偏移自动升为 1)
    pub version: u8,
    /// 条目
    pub entries: Vec<CompositionOffsetEntry>,
}

impl Mp4Box for CompositionOffsetBox {
    fn fourcc(&self) -> FourCc {
        *b"ctts"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let has_negative = self.entries.iter().any(|e| e.sample_offset < 0);
            self.version = if has_negative { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.entries = vec![CompositionOffsetEntry::default(); count as usize];
        }
        for entry in &mut self.entries {
            buf.rw_u32(&mut entry.sample_count)?;
            // 版本 0 为无符号, 读取后按位转换仍落在 i32
            buf.rw_i32(&mut entry.sample_offset)?;
        }
        Ok(())
    }
}

/// stsc 条目
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleToChunkEntry {
    /// 首个块编号 (1 起)
    pub first_chunk: u32,
    /// 每块采样数
    pub samples_per_chunk: u32,
    /// 采样描述索引
    pub sample_description_index: u32,
}

/// stsc box (采样→块映射)
#[derive(Debug, Clone, Default)]
pub struct SampleToChunkBox {
    /// 条目
    pub entries: Vec<SampleToChunkEntry>,
}

impl Mp4Box for SampleToChunkBox {
    fn fourcc(&self) -> FourCc {
        *b"stsc"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.entries = vec![SampleToChunkEntry::default(); count as usize];
        }
        for entry in &mut self.entries {
            buf.rw_u32(&mut entry.first_chunk)?;
            buf.rw_u32(&mut entry.samples_per_chunk)?;
            buf.rw_u32(&mut entry.sample_description_index)?;
        }
        Ok(())
    }
}

/// stsz / stz2 box (采样大小)
///
/// 读取接受两种形式; 写入时若从 stz2 读入 (或显式要求紧凑) 且所有
/// 大小都能放进记录的字段宽度, 则继续写 stz2, 否则写 stsz.
#[derive(Debug, Clone, Default)]
pub struct SampleSizeBox {
    /// 恒定采样大小 (非 0 时 sizes 为空)
    pub constant_size: u32,
    /// 每采样大小
    pub sizes: Vec<u32>,
    /// stz2 字段宽度 (0 表示使用 stsz)
    pub compact_field_size: u8,
}

impl Mp4Box for SampleSizeBox {
    fn fourcc(&self) -> FourCc {
        if self.compact_field_size > 0 && self.constant_size == 0 {
            let max = self.sizes.iter().copied().max().unwrap_or(0);
            if max < (1u32 << self.compact_field_size.min(31)) {
                return *b"stz2";
            }
        }
        *b"stsz"
    }

    fn alternate_fourcc(&self) -> Option<FourCc> {
        Some(*b"stz2")
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let is_compact = if buf.reading() {
            buf.actual_fourcc() == Some(*b"stz2")
        } else {
            self.fourcc() == *b"stz2"
        };
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;

        if is_compact {
            buf.skip(3)?; // reserved
            let mut field_size = self.compact_field_size;
            buf.rw_u8(&mut field_size)?;
            if !matches!(field_size, 4 | 8 | 16) {
                return Err(FengError::ParserFailure(format!(
                    "stz2 非法字段宽度 {field_size}"
                )));
            }
            self.compact_field_size = field_size;
            let mut count = self.sizes.len() as u32;
            buf.rw_u32(&mut count)?;
            if buf.reading() {
                self.sizes = Vec::with_capacity(count as usize);
                let mut bytes = Vec::new();
                buf.rw_vec_to_end(&mut bytes)?;
                let mut br = feng_core::BitReader::new(&bytes);
                for _ in 0..count {
                    self.sizes.push(br.read_bits(u32::from(field_size))?);
                }
            } else {
                match field_size {
                    4 => {
                        let mut iter = self.sizes.chunks(2);
                        for pair in &mut iter {
                            let hi = pair[0] as u8 & 0x0F;
                            let lo = pair.get(1).map(|v| *v as u8 & 0x0F).unwrap_or(0);
                            let mut byte = (hi << 4) | lo;
                            buf.rw_u8(&mut byte)?;
                        }
                    }
                    8 => {
                        for s in &self.sizes {
                            let mut b = *s as u8;
                            buf.rw_u8(&mut b)?;
                        }
                    }
                    _ => {
                        for s in &self.sizes {
                            let mut b = *s as u16;
                            buf.rw_u16(&mut b)?;
                        }
                    }
                }
            }
        } else {
            buf.rw_u32(&mut self.constant_size)?;
            let mut count = self.sizes.len() as u32;
            buf.rw_u32(&mut count)?;
            if self.constant_size == 0 {
                if buf.reading() {
                    self.sizes = vec![0u32; count as usize];
                }
                for size in &mut self.sizes {
                    buf.rw_u32(size)?;
                }
            }
        }
        Ok(())
    }
}

/// stco / co64 box (块偏移)
///
/// 写入时最后一个偏移超过 u32 上限自动切换为 co64.
#[derive(Debug, Clone, Default)]
pub struct ChunkOffsetBox {
    /// 偏移
    pub offsets: Vec<u64>,
}

impl Mp4Box for ChunkOffsetBox {
    fn fourcc(&self) -> FourCc {
        if self.offsets.last().copied().unwrap_or(0) > u64::from(u32::MAX) {
            *b"co64"
        } else {
            *b"stco"
        }
    }

    fn alternate_fourcc(&self) -> Option<FourCc> {
        Some(*b"co64")
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let is_64 = if buf.reading() {
            buf.actual_fourcc() == Some(*b"co64")
        } else {
            self.fourcc() == *b"co64"
        };
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        let mut count = self.offsets.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.offsets = vec![0u64; count as usize];
        }
        for offset in &mut self.offsets {
            buf.rw_u32_or_u64(offset, is_64)?;
        }
        Ok(())
    }
}

/// stss box (同步采样表)
#[derive(Debug, Clone, Default)]
pub struct SyncSampleBox {
    /// 关键帧采样编号 (1 起)
    pub sample_numbers: Vec<u32>,
}

impl Mp4Box for SyncSampleBox {
    fn fourcc(&self) -> FourCc {
        *b"stss"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        let mut count = self.sample_numbers.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.sample_numbers = vec![0u32; count as usize];
        }
        for num in &mut self.sample_numbers {
            buf.rw_u32(num)?;
        }
        Ok(())
    }
}

/// stbl box (采样表)
#[derive(Debug, Clone, Default)]
pub struct SampleTableBox {
    /// 采样描述
    pub description: SampleDescriptionBox,
    /// 解码时间表
    pub time_to_sample: TimeToSampleBox,
    /// 合成偏移表
    pub composition_offset: Option<CompositionOffsetBox>,
    /// 采样→块映射
    pub sample_to_chunk: SampleToChunkBox,
    /// 采样大小
    pub sample_size: SampleSizeBox,
    /// 块偏移
    pub chunk_offset: ChunkOffsetBox,
    /// 同步采样表
    pub sync_sample: Option<SyncSampleBox>,
    /// 采样组描述 (seig)
    pub group_description: Option<SampleGroupDescriptionBox>,
    /// 采样→组映射
    pub sample_to_group: Option<SampleToGroupBox>,
}

impl Mp4Box for SampleTableBox {
    fn fourcc(&self) -> FourCc {
        *b"stbl"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.description)?;
        buf.rw_child(&mut self.time_to_sample)?;
        buf.try_rw_child(&mut self.composition_offset)?;
        buf.rw_child(&mut self.sample_to_chunk)?;
        buf.rw_child(&mut self.sample_size)?;
        buf.rw_child(&mut self.chunk_offset)?;
        buf.try_rw_child(&mut self.sync_sample)?;
        buf.try_rw_child(&mut self.group_description)?;
        buf.try_rw_child(&mut self.sample_to_group)
    }
}

/// minf 媒体头变体
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MediaHeaderKind {
    /// 视频
    #[default]
    Video,
    /// 音频
    Audio,
    /// 其他 (文本)
    Null,
}

/// minf box (媒体信息)
#[derive(Debug, Clone, Default)]
pub struct MediaInformationBox {
    /// 媒体头变体
    pub header_kind: MediaHeaderKind,
    /// 采样表
    pub sample_table: SampleTableBox,
}

impl Mp4Box for MediaInformationBox {
    fn fourcc(&self) -> FourCc {
        *b"minf"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if buf.reading() {
            if buf.child_exists(b"vmhd")? {
                self.header_kind = MediaHeaderKind::Video;
            } else if buf.child_exists(b"smhd")? {
                self.header_kind = MediaHeaderKind::Audio;
            } else {
                self.header_kind = MediaHeaderKind::Null;
            }
        } else {
            match self.header_kind {
                MediaHeaderKind::Video => {
                    let mut vmhd = VideoMediaHeaderBox;
                    buf.rw_child(&mut vmhd)?;
                }
                MediaHeaderKind::Audio => {
                    let mut smhd = SoundMediaHeaderBox;
                    buf.rw_child(&mut smhd)?;
                }
                MediaHeaderKind::Null => {
                    let mut nmhd = NullMediaHeaderBox;
                    buf.rw_child(&mut nmhd)?;
                }
            }
            let mut dinf = DataInformationBox;
            buf.rw_child(&mut dinf)?;
        }
        buf.rw_child(&mut self.sample_table)
    }
}

/// mdia box (媒体)
#[derive(Debug, Clone, Default)]
pub struct MediaBox {
    /// 媒体头部
    pub header: MediaHeaderBox,
    /// 处理器引用
    pub handler: HandlerBox,
    /// 媒体信息
    pub information: MediaInformationBox,
}

impl Mp4Box for MediaBox {
    fn fourcc(&self) -> FourCc {
        *b"mdia"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.header)?;
        buf.rw_child(&mut self.handler)?;
        buf.rw_child(&mut self.information)
    }
}

/// trak box (轨道)
#[derive(Debug, Clone, Default)]
pub struct TrackBox {
    /// 轨道头部
    pub header: TrackHeaderBox,
    /// 编辑列表
    pub edit: Option<EditBox>,
    /// 媒体
    pub media: MediaBox,
}

impl Mp4Box for TrackBox {
    fn fourcc(&self) -> FourCc {
        *b"trak"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.header)?;
        buf.try_rw_child(&mut self.edit)?;
        buf.rw_child(&mut self.media)
    }
}

/// moov box (影片)
#[derive(Debug, Clone, Default)]
pub struct MovieBox {
    /// 影片头部
    pub header: MovieHeaderBox,
    /// 轨道
    pub tracks: Vec<TrackBox>,
    /// 影片扩展 (分片文件)
    pub extends: Option<MovieExtendsBox>,
    /// DRM 系统头
    pub pssh: Vec<ProtectionSystemSpecificHeaderBox>,
}

impl Mp4Box for MovieBox {
    fn fourcc(&self) -> FourCc {
        *b"moov"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.header)?;
        buf.rw_children(&mut self.tracks)?;
        buf.try_rw_child(&mut self.extends)?;
        buf.rw_children(&mut self.pssh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{box_to_vec, parse_box};

    fn sample_stbl() -> SampleTableBox {
        SampleTableBox {
            description: SampleDescriptionBox {
                entries: vec![SampleEntry::Visual(VisualSampleEntry {
                    format: *b"avc1",
                    width: 640,
                    height: 480,
                    codec_config: Some(CodecConfigBox {
                        box_type: *b"avcC",
                        data: vec![0x01, 0x42, 0x00, 0x1E, 0xFF, 0xE1, 0x00, 0x02, 0x67, 0x42],
                    }),
                    ..Default::default()
                })],
            },
            time_to_sample: TimeToSampleBox {
                entries: vec![TimeToSampleEntry {
                    sample_count: 10,
                    sample_delta: 3000,
                }],
            },
            sample_to_chunk: SampleToChunkBox {
                entries: vec![SampleToChunkEntry {
                    first_chunk: 1,
                    samples_per_chunk: 10,
                    sample_description_index: 1,
                }],
            },
            sample_size: SampleSizeBox {
                constant_size: 0,
                sizes: vec![100, 200, 300],
                compact_field_size: 0,
            },
            chunk_offset: ChunkOffsetBox {
                offsets: vec![48, 1048],
            },
            sync_sample: Some(SyncSampleBox {
                sample_numbers: vec![1, 5, 9],
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_stbl_roundtrip() {
        let mut stbl = sample_stbl();
        let bytes = box_to_vec(&mut stbl).unwrap();
        let parsed: SampleTableBox = parse_box(&bytes).unwrap();

        assert_eq!(parsed.time_to_sample.entries.len(), 1);
        assert_eq!(parsed.time_to_sample.entries[0].sample_delta, 3000);
        assert_eq!(parsed.sample_size.sizes, vec![100, 200, 300]);
        assert_eq!(parsed.chunk_offset.offsets, vec![48, 1048]);
        assert_eq!(
            parsed.sync_sample.as_ref().unwrap().sample_numbers,
            vec![1, 5, 9]
        );
        match &parsed.description.entries[0] {
            SampleEntry::Visual(v) => {
                assert_eq!(v.width, 640);
                assert_eq!(v.height, 480);
                let cfg = v.codec_config.as_ref().unwrap();
                assert_eq!(&cfg.box_type, b"avcC");
                assert_eq!(cfg.data[0], 0x01);
            }
            other => panic!("期望视频条目, 实际 {other:?}"),
        }
    }

    #[test]
    fn test_co64_auto_switch() {
        let mut stco = ChunkOffsetBox {
            offsets: vec![100, u64::from(u32::MAX) + 1],
        };
        assert_eq!(&stco.fourcc(), b"co64");
        let bytes = box_to_vec(&mut stco).unwrap();
        assert_eq!(&bytes[4..8], b"co64");

        let parsed: ChunkOffsetBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.offsets[1], u64::from(u32::MAX) + 1);

        let mut small = ChunkOffsetBox {
            offsets: vec![100, 200],
        };
        let bytes = box_to_vec(&mut small).unwrap();
        assert_eq!(&bytes[4..8], b"stco");
    }

    #[test]
    fn test_stz2_roundtrip() {
        let mut stz2 = SampleSizeBox {
            constant_size: 0,
            sizes: vec![10, 250, 90],
            compact_field_size: 16,
        };
        let bytes = box_to_vec(&mut stz2).unwrap();
        assert_eq!(&bytes[4..8], b"stz2");
        let parsed: SampleSizeBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.sizes, vec![10, 250, 90]);
        assert_eq!(parsed.compact_field_size, 16);
    }

    #[test]
    fn test_ctts_negative_offset_upgrades() {
        let mut ctts = CompositionOffsetBox {
            version: 0,
            entries: vec![
                CompositionOffsetEntry {
                    sample_count: 1,
                    sample_offset: 3000,
                },
                CompositionOffsetEntry {
                    sample_count: 2,
                    sample_offset: -1500,
                },
            ],
        };
        let bytes = box_to_vec(&mut ctts).unwrap();
        assert_eq!(bytes[8], 1, "有负偏移时应写为版本 1");
        let parsed: CompositionOffsetBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.entries[1].sample_offset, -1500);
    }

    #[test]
    fn test_moov_tree_roundtrip() {
        let mut moov = MovieBox {
            header: MovieHeaderBox {
                timescale: 1000,
                duration: 10000,
                next_track_id: 2,
                ..Default::default()
            },
            tracks: vec![TrackBox {
                header: TrackHeaderBox {
                    flags: TrackHeaderBox::FLAG_ENABLED_IN_MOVIE,
                    track_id: 1,
                    duration: 10000,
                    width: 640,
                    height: 480,
                    ..Default::default()
                },
                media: MediaBox {
                    header: MediaHeaderBox {
                        timescale: 90000,
                        duration: 900000,
                        language: "eng".into(),
                        ..Default::default()
                    },
                    handler: HandlerBox::video(),
                    information: MediaInformationBox {
                        header_kind: MediaHeaderKind::Video,
                        sample_table: sample_stbl(),
                    },
                },
                ..Default::default()
            }],
            ..Default::default()
        };
        let bytes = box_to_vec(&mut moov).unwrap();
        let parsed: MovieBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.tracks.len(), 1);
        assert_eq!(parsed.tracks[0].media.header.language, "eng");
        assert_eq!(parsed.tracks[0].media.header.timescale, 90000);
        assert_eq!(
            parsed.tracks[0].media.information.header_kind,
            MediaHeaderKind::Video
        );
    }
}
