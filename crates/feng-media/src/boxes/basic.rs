//! 文件级与轨道级 box 定义.

use feng_core::FengResult;

use super::{BoxBuffer, FourCc, Mp4Box};

/// 单位变换矩阵 (tkhd / mvhd)
pub const UNITY_MATRIX: [u8; 36] = [
    0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0x40, 0x00, 0x00, 0x00,
];

/// ftyp / styp box
#[derive(Debug, Clone)]
pub struct FileTypeBox {
    /// 实际标签 (ftyp 或 styp)
    pub box_type: FourCc,
    /// 主品牌
    pub major_brand: FourCc,
    /// 次版本号
    pub minor_version: u32,
    /// 兼容品牌列表
    pub compatible_brands: Vec<FourCc>,
}

impl Default for FileTypeBox {
    fn default() -> Self {
        Self {
            box_type: *b"ftyp",
            major_brand: *b"isom",
            minor_version: 0,
            compatible_brands: Vec::new(),
        }
    }
}

impl FileTypeBox {
    /// 分段文件使用的 styp 变体
    pub fn styp(major_brand: FourCc, compatible_brands: Vec<FourCc>) -> Self {
        Self {
            box_type: *b"styp",
            major_brand,
            minor_version: 0,
            compatible_brands,
        }
    }
}

impl Mp4Box for FileTypeBox {
    fn fourcc(&self) -> FourCc {
        self.box_type
    }

    fn alternate_fourcc(&self) -> Option<FourCc> {
        Some(*b"styp")
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if let Some(actual) = buf.actual_fourcc() {
            self.box_type = actual;
        }
        buf.rw_fourcc(&mut self.major_brand)?;
        buf.rw_u32(&mut self.minor_version)?;
        if buf.reading() {
            self.compatible_brands.clear();
            while buf.remaining() >= 4 {
                let mut brand = [0u8; 4];
                buf.rw_fourcc(&mut brand)?;
                self.compatible_brands.push(brand);
            }
        } else {
            for brand in &mut self.compatible_brands {
                buf.rw_fourcc(brand)?;
            }
        }
        Ok(())
    }
}

/// mvhd box (影片头部)
#[derive(Debug, Clone)]
pub struct MovieHeaderBox {
    /// 版本 (写入时按取值自动升级)
    pub version: u8,
    /// 创建时间
    pub creation_time: u64,
    /// 修改时间
    pub modification_time: u64,
    /// 时间刻度
    pub timescale: u32,
    /// 时长
    pub duration: u64,
    /// 下一个轨道 ID
    pub next_track_id: u32,
}

impl Default for MovieHeaderBox {
    fn default() -> Self {
        Self {
            version: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            next_track_id: 1,
        }
    }
}

impl Mp4Box for MovieHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"mvhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let needs_v1 = self.duration > u64::from(u32::MAX)
                || self.creation_time > u64::from(u32::MAX)
                || self.modification_time > u64::from(u32::MAX);
            self.version = if needs_v1 { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        let v1 = self.version == 1;
        buf.rw_u32_or_u64(&mut self.creation_time, v1)?;
        buf.rw_u32_or_u64(&mut self.modification_time, v1)?;
        buf.rw_u32(&mut self.timescale)?;
        buf.rw_u32_or_u64(&mut self.duration, v1)?;

        let mut rate = 0x0001_0000u32;
        buf.rw_u32(&mut rate)?;
        let mut volume = 0x0100u16;
        buf.rw_u16(&mut volume)?;
        buf.skip(10)?; // reserved
        let mut matrix = UNITY_MATRIX;
        buf.rw_fixed_bytes(&mut matrix)?;
        buf.skip(24)?; // pre_defined
        buf.rw_u32(&mut self.next_track_id)
    }
}

/// tkhd box (轨道头部)
#[derive(Debug, Clone, Default)]
pub struct TrackHeaderBox {
    /// 版本
    pub version: u8,
    /// 标志 (0x03 = enabled | in_movie)
    pub flags: u32,
    /// 创建时间
    pub creation_time: u64,
    /// 修改时间
    pub modification_time: u64,
    /// 轨道 ID
    pub track_id: u32,
    /// 时长 (影片时间刻度)
    pub duration: u64,
    /// 音量 (音频 0x0100)
    pub volume: u16,
    /// 宽度 (整数像素)
    pub width: u32,
    /// 高度 (整数像素)
    pub height: u32,
}

impl TrackHeaderBox {
    /// 默认启用标志
    pub const FLAG_ENABLED_IN_MOVIE: u32 = 0x03;
}

impl Mp4Box for TrackHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"tkhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let needs_v1 = self.duration > u64::from(u32::MAX)
                || self.creation_time > u64::from(u32::MAX)
                || self.modification_time > u64::from(u32::MAX);
            self.version = if needs_v1 { 1 } else { 0 };
        }
        buf.rw_version_flags(&mut self.version, &mut self.flags)?;
        let v1 = self.version == 1;
        buf.rw_u32_or_u64(&mut self.creation_time, v1)?;
        buf.rw_u32_or_u64(&mut self.modification_time, v1)?;
        buf.rw_u32(&mut self.track_id)?;
        buf.skip(4)?; // reserved
        buf.rw_u32_or_u64(&mut self.duration, v1)?;
        buf.skip(8)?; // reserved
        buf.skip(4)?; // layer + alternate_group
        buf.rw_u16(&mut self.volume)?;
        buf.skip(2)?; // reserved
        let mut matrix = UNITY_MATRIX;
        buf.rw_fixed_bytes(&mut matrix)?;

        // 16.16 定点宽高
        let mut w_fixed = self.width << 16;
        let mut h_fixed = self.height << 16;
        buf.rw_u32(&mut w_fixed)?;
        buf.rw_u32(&mut h_fixed)?;
        if buf.reading() {
            self.width = w_fixed >> 16;
            self.height = h_fixed >> 16;
        }
        Ok(())
    }
}

/// elst 条目
#[derive(Debug, Clone, Copy, Default)]
pub struct EditListEntry {
    /// 编辑段时长 (影片时间刻度)
    pub segment_duration: u64,
    /// 媒体起始时间 (-1 表示空编辑)
    pub media_time: i64,
    /// 播放速率整数部分
    pub media_rate_integer: i16,
    /// 播放速率小数部分
    pub media_rate_fraction: i16,
}

/// elst box (编辑列表)
#[derive(Debug, Clone, Default)]
pub struct EditListBox {
    /// 版本
    pub version: u8,
    /// 条目
    pub entries: Vec<EditListEntry>,
}

impl Mp4Box for EditListBox {
    fn fourcc(&self) -> FourCc {
        *b"elst"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let needs_v1 = self.entries.iter().any(|e| {
                e.segment_duration > u64::from(u32::MAX)
                    || e.media_time > i64::from(i32::MAX)
                    || e.media_time < i64::from(i32::MIN)
            });
            self.version = if needs_v1 { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        let v1 = self.version == 1;

        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.entries = vec![EditListEntry::default(); count as usize];
        }
        for entry in &mut self.entries {
            buf.rw_u32_or_u64(&mut entry.segment_duration, v1)?;
            buf.rw_i32_or_i64(&mut entry.media_time, v1)?;
            buf.rw_i16(&mut entry.media_rate_integer)?;
            buf.rw_i16(&mut entry.media_rate_fraction)?;
        }
        Ok(())
    }
}

/// edts box (编辑容器)
#[derive(Debug, Clone, Default)]
pub struct EditBox {
    /// 编辑列表
    pub list: EditListBox,
}

impl Mp4Box for EditBox {
    fn fourcc(&self) -> FourCc {
        *b"edts"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.list)
    }
}

/// mdhd box (媒体头部)
#[derive(Debug, Clone)]
pub struct MediaHeaderBox {
    /// 版本
    pub version: u8,
    /// 时间刻度
    pub timescale: u32,
    /// 时长
    pub duration: u64,
    /// ISO 639-2 语言码 (3 字母)
    pub language: String,
}

impl Default for MediaHeaderBox {
    fn default() -> Self {
        Self {
            version: 0,
            timescale: 0,
            duration: 0,
            language: "und".into(),
        }
    }
}

impl Mp4Box for MediaHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"mdhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            self.version = if self.duration > u64::from(u32::MAX) { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        let v1 = self.version == 1;
        let mut creation = 0u64;
        let mut modification = 0u64;
        buf.rw_u32_or_u64(&mut creation, v1)?;
        buf.rw_u32_or_u64(&mut modification, v1)?;
        buf.rw_u32(&mut self.timescale)?;
        buf.rw_u32_or_u64(&mut self.duration, v1)?;

        // 语言: 3 个 5-bit 字符 (c - 0x60)
        let mut packed = pack_language(&self.language);
        buf.rw_u16(&mut packed)?;
        if buf.reading() {
            self.language = unpack_language(packed);
        }
        buf.skip(2) // pre_defined
    }
}

fn pack_language(lang: &str) -> u16 {
    let bytes = lang.as_bytes();
    if bytes.len() != 3 {
        return 0x55C4; // "und"
    }
    let mut packed = 0u16;
    for &b in bytes {
        let c = b.saturating_sub(0x60) as u16 & 0x1F;
        packed = (packed << 5) | c;
    }
    packed
}

fn unpack_language(packed: u16) -> String {
    let mut chars = [0u8; 3];
    chars[0] = ((packed >> 10) & 0x1F) as u8 + 0x60;
    chars[1] = ((packed >> 5) & 0x1F) as u8 + 0x60;
    chars[2] = (packed & 0x1F) as u8 + 0x60;
    String::from_utf8_lossy(&chars).to_string()
}

/// hdlr box (处理器引用)
#[derive(Debug, Clone)]
pub struct HandlerBox {
    /// 处理器类型 (vide / soun / text)
    pub handler_type: FourCc,
    /// 名称
    pub name: String,
}

impl Default for HandlerBox {
    fn default() -> Self {
        Self {
            handler_type: *b"vide",
            name: String::new(),
        }
    }
}

impl HandlerBox {
    /// 视频处理器
    pub fn video() -> Self {
        Self {
            handler_type: *b"vide",
            name: "VideoHandler".into(),
        }
    }

    /// 音频处理器
    pub fn audio() -> Self {
        Self {
            handler_type: *b"soun",
            name: "SoundHandler".into(),
        }
    }

    /// 文本处理器
    pub fn text() -> Self {
        Self {
            handler_type: *b"text",
            name: "TextHandler".into(),
        }
    }
}

impl Mp4Box for HandlerBox {
    fn fourcc(&self) -> FourCc {
        *b"hdlr"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.skip(4)?; // pre_defined
        buf.rw_fourcc(&mut self.handler_type)?;
        buf.skip(12)?; // reserved
        if buf.reading() {
            let mut bytes = Vec::new();
            buf.rw_vec_to_end(&mut bytes)?;
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            self.name = String::from_utf8_lossy(&bytes[..end]).to_string();
        } else {
            let mut bytes = self.name.as_bytes().to_vec();
            bytes.push(0);
            buf.rw_vec(&mut bytes, 0)?;
        }
        Ok(())
    }
}

/// vmhd box (视频媒体头)
#[derive(Debug, Clone, Default)]
pub struct VideoMediaHeaderBox;

impl Mp4Box for VideoMediaHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"vmhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 1u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.skip(8) // graphicsmode + opcolor
    }
}

/// smhd box (音频媒体头)
#[derive(Debug, Clone, Default)]
pub struct SoundMediaHeaderBox;

impl Mp4Box for SoundMediaHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"smhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.skip(4) // balance + reserved
    }
}

/// nmhd box (空媒体头, 文本轨道使用)
#[derive(Debug, Clone, Default)]
pub struct NullMediaHeaderBox;

impl Mp4Box for NullMediaHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"nmhd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)
    }
}

/// dinf box (含自引用 dref/url)
#[derive(Debug, Clone, Default)]
pub struct DataInformationBox;

impl Mp4Box for DataInformationBox {
    fn fourcc(&self) -> FourCc {
        *b"dinf"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if buf.reading() {
            // 内容固定, 读取时跳过
            let n = buf.remaining();
            return buf.skip(n);
        }
        // dref + 一个自含 url 条目
        let mut dref = DataReferenceBox;
        buf.rw_child(&mut dref)
    }
}

/// dref box
#[derive(Debug, Clone, Default)]
pub struct DataReferenceBox;

impl Mp4Box for DataReferenceBox {
    fn fourcc(&self) -> FourCc {
        *b"dref"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        let mut count = 1u32;
        buf.rw_u32(&mut count)?;
        let mut url = DataUrlBox;
        buf.rw_child(&mut url)
    }
}

/// url box (自含标志)
#[derive(Debug, Clone, Default)]
pub struct DataUrlBox;

impl Mp4Box for DataUrlBox {
    fn fourcc(&self) -> FourCc {
        *b"url "
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 1u32; // self-contained
        buf.rw_version_flags(&mut version, &mut flags)
    }
}

/// mehd box (影片扩展头部)
#[derive(Debug, Clone, Default)]
pub struct MovieExtendsHeaderBox {
    /// 版本
    pub version: u8,
    /// 分片影片总时长
    pub fragment_duration: u64,
}

impl Mp4Box for MovieExtendsHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"mehd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            self.version = if self.fragment_duration > u64::from(u32::MAX) { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        buf.rw_u32_or_u64(&mut self.fragment_duration, self.version == 1)
    }
}

/// trex box (轨道扩展默认值)
#[derive(Debug, Clone, Default)]
pub struct TrackExtendsBox {
    /// 轨道 ID
    pub track_id: u32,
    /// 默认采样描述索引
    pub default_sample_description_index: u32,
    /// 默认采样时长
    pub default_sample_duration: u32,
    /// 默认采样大小
    pub default_sample_size: u32,
    /// 默认采样标志
    pub default_sample_flags: u32,
}

impl Mp4Box for TrackExtendsBox {
    fn fourcc(&self) -> FourCc {
        *b"trex"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.rw_u32(&mut self.track_id)?;
        buf.rw_u32(&mut self.default_sample_description_index)?;
        buf.rw_u32(&mut self.default_sample_duration)?;
        buf.rw_u32(&mut self.default_sample_size)?;
        buf.rw_u32(&mut self.default_sample_flags)
    }
}

/// mvex box (影片扩展)
#[derive(Debug, Clone, Default)]
pub struct MovieExtendsBox {
    /// 可选的总时长头
    pub header: Option<MovieExtendsHeaderBox>,
    /// 每轨一个 trex
    pub tracks: Vec<TrackExtendsBox>,
}

impl Mp4Box for MovieExtendsBox {
    fn fourcc(&self) -> FourCc {
        *b"mvex"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.try_rw_child(&mut self.header)?;
        buf.rw_children(&mut self.tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{box_to_vec, parse_box};

    #[test]
    fn test_ftyp_roundtrip() {
        let mut ftyp = FileTypeBox {
            box_type: *b"ftyp",
            major_brand: *b"isom",
            minor_version: 0x200,
            compatible_brands: vec![*b"isom", *b"iso6", *b"dash"],
        };
        let bytes = box_to_vec(&mut ftyp).unwrap();
        assert_eq!(bytes.len(), 8 + 8 + 12);

        let parsed: FileTypeBox = parse_box(&bytes).unwrap();
        assert_eq!(&parsed.major_brand, b"isom");
        assert_eq!(parsed.minor_version, 0x200);
        assert_eq!(parsed.compatible_brands.len(), 3);
    }

    #[test]
    fn test_mvhd_version_upgrade() {
        let mut mvhd = MovieHeaderBox {
            duration: u64::from(u32::MAX) + 10,
            timescale: 90000,
            next_track_id: 3,
            ..Default::default()
        };
        let bytes = box_to_vec(&mut mvhd).unwrap();
        // version 1 写出
        assert_eq!(bytes[8], 1);

        let parsed: MovieHeaderBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.version, 1);
        assert_eq!(parsed.duration, u64::from(u32::MAX) + 10);
        assert_eq!(parsed.timescale, 90000);
        assert_eq!(parsed.next_track_id, 3);
    }

    #[test]
    fn test_tkhd_roundtrip() {
        let mut tkhd = TrackHeaderBox {
            flags: TrackHeaderBox::FLAG_ENABLED_IN_MOVIE,
            track_id: 2,
            duration: 48000,
            width: 1280,
            height: 720,
            ..Default::default()
        };
        let bytes = box_to_vec(&mut tkhd).unwrap();
        let parsed: TrackHeaderBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.track_id, 2);
        assert_eq!(parsed.width, 1280);
        assert_eq!(parsed.height, 720);
        assert_eq!(parsed.version, 0);
    }

    #[test]
    fn test_mdhd_language_packing() {
        let mut mdhd = MediaHeaderBox {
            timescale: 44100,
            duration: 441000,
            language: "fra".into(),
            ..Default::default()
        };
        let bytes = box_to_vec(&mut mdhd).unwrap();
        let parsed: MediaHeaderBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.language, "fra");
        assert_eq!(parsed.timescale, 44100);
    }

    #[test]
    fn test_elst_negative_media_time() {
        let mut elst = EditListBox {
            version: 0,
            entries: vec![EditListEntry {
                segment_duration: 0,
                media_time: 1000,
                media_rate_integer: 1,
                media_rate_fraction: 0,
            }],
        };
        let bytes = box_to_vec(&mut elst).unwrap();
        let parsed: EditListBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.entries[0].media_time, 1000);
    }

    #[test]
    fn test_mvex_roundtrip() {
        let mut mvex = MovieExtendsBox {
            header: Some(MovieExtendsHeaderBox {
                version: 0,
                fragment_duration: 900000,
            }),
            tracks: vec![
                TrackExtendsBox {
                    track_id: 1,
                    default_sample_description_index: 1,
                    ..Default::default()
                },
                TrackExtendsBox {
                    track_id: 2,
                    default_sample_description_index: 1,
                    ..Default::default()
                },
            ],
        };
        let bytes = box_to_vec(&mut mvex).unwrap();
        let parsed: MovieExtendsBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.tracks.len(), 2);
        assert_eq!(parsed.header.unwrap().fragment_duration, 900000);
        assert_eq!(parsed.tracks[1].track_id, 2);
    }
}
