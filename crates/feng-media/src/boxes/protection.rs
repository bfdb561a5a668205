//! CENC 保护相关 box 定义 (ISO/IEC 23001-7).

use feng_core::{FengError, FengResult};

use super::{BoxBuffer, FourCc, Mp4Box};

/// pssh box (DRM 系统专有头)
#[derive(Debug, Clone, Default)]
pub struct ProtectionSystemSpecificHeaderBox {
    /// 版本
    pub version: u8,
    /// 16 字节系统 ID
    pub system_id: [u8; 16],
    /// 版本 1 携带的 KID 列表
    pub key_ids: Vec<[u8; 16]>,
    /// 系统专有数据
    pub data: Vec<u8>,
}

impl Mp4Box for ProtectionSystemSpecificHeaderBox {
    fn fourcc(&self) -> FourCc {
        *b"pssh"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            self.version = if self.key_ids.is_empty() { 0 } else { 1 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        buf.rw_fixed_bytes(&mut self.system_id)?;

        if self.version > 0 {
            let mut kid_count = self.key_ids.len() as u32;
            buf.rw_u32(&mut kid_count)?;
            if buf.reading() {
                self.key_ids = vec![[0u8; 16]; kid_count as usize];
            }
            for kid in &mut self.key_ids {
                buf.rw_fixed_bytes(kid)?;
            }
        }

        let mut data_size = self.data.len() as u32;
        buf.rw_u32(&mut data_size)?;
        buf.rw_vec(&mut self.data, data_size as usize)
    }
}

/// frma box (原始格式)
#[derive(Debug, Clone, Default)]
pub struct OriginalFormatBox {
    /// 加密前的采样条目格式
    pub data_format: FourCc,
}

impl Mp4Box for OriginalFormatBox {
    fn fourcc(&self) -> FourCc {
        *b"frma"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_fourcc(&mut self.data_format)
    }
}

/// schm box (保护方案类型)
#[derive(Debug, Clone, Default)]
pub struct SchemeTypeBox {
    /// 方案 FourCC (cenc / cbcs ...)
    pub scheme_type: FourCc,
    /// 方案版本
    pub scheme_version: u32,
}

impl Mp4Box for SchemeTypeBox {
    fn fourcc(&self) -> FourCc {
        *b"schm"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.rw_fourcc(&mut self.scheme_type)?;
        buf.rw_u32(&mut self.scheme_version)
    }
}

/// tenc box (轨道加密默认参数)
#[derive(Debug, Clone, Default)]
pub struct TrackEncryptionBox {
    /// 版本 (cbcs 图样参数需要版本 1)
    pub version: u8,
    /// 加密块数 (图样加密)
    pub default_crypt_byte_block: u8,
    /// 跳过块数 (图样加密)
    pub default_skip_byte_block: u8,
    /// 是否受保护
    pub default_is_protected: bool,
    /// 每采样 IV 大小 (0 表示使用常量 IV)
    pub default_per_sample_iv_size: u8,
    /// 默认密钥 ID
    pub default_kid: [u8; 16],
    /// 常量 IV (per_sample_iv_size == 0 时)
    pub default_constant_iv: Vec<u8>,
}

impl Mp4Box for TrackEncryptionBox {
    fn fourcc(&self) -> FourCc {
        *b"tenc"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        if !buf.reading() {
            let pattern = self.default_crypt_byte_block != 0 || self.default_skip_byte_block != 0;
            self.version = if pattern { 1 } else { 0 };
        }
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        buf.skip(1)?; // reserved
        let mut pattern_byte = (self.default_crypt_byte_block << 4) | self.default_skip_byte_block;
        if self.version == 0 {
            pattern_byte = 0;
        }
        buf.rw_u8(&mut pattern_byte)?;
        if buf.reading() && self.version > 0 {
            self.default_crypt_byte_block = pattern_byte >> 4;
            self.default_skip_byte_block = pattern_byte & 0x0F;
        }

        let mut protected = u8::from(self.default_is_protected);
        buf.rw_u8(&mut protected)?;
        self.default_is_protected = protected != 0;
        buf.rw_u8(&mut self.default_per_sample_iv_size)?;
        buf.rw_fixed_bytes(&mut self.default_kid)?;

        if self.default_is_protected && self.default_per_sample_iv_size == 0 {
            let mut iv_size = self.default_constant_iv.len() as u8;
            buf.rw_u8(&mut iv_size)?;
            if !matches!(iv_size, 8 | 16) {
                return Err(FengError::ParserFailure(format!(
                    "tenc 常量 IV 大小非法: {iv_size}"
                )));
            }
            buf.rw_vec(&mut self.default_constant_iv, iv_size as usize)?;
        }
        Ok(())
    }
}

/// schi box (方案信息容器)
#[derive(Debug, Clone, Default)]
pub struct SchemeInformationBox {
    /// 轨道加密参数
    pub track_encryption: TrackEncryptionBox,
}

impl Mp4Box for SchemeInformationBox {
    fn fourcc(&self) -> FourCc {
        *b"schi"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.track_encryption)
    }
}

/// sinf box (保护方案信息)
#[derive(Debug, Clone, Default)]
pub struct ProtectionSchemeInfoBox {
    /// 原始格式
    pub format: OriginalFormatBox,
    /// 方案类型
    pub scheme_type: SchemeTypeBox,
    /// 方案信息
    pub info: SchemeInformationBox,
}

impl Mp4Box for ProtectionSchemeInfoBox {
    fn fourcc(&self) -> FourCc {
        *b"sinf"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.rw_child(&mut self.format)?;
        buf.rw_child(&mut self.scheme_type)?;
        buf.rw_child(&mut self.info)
    }
}

/// seig 采样组条目 (CencSampleEncryptionInformationEntry)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CencSampleEncryptionInfoEntry {
    /// 是否受保护
    pub is_protected: bool,
    /// 每采样 IV 大小
    pub per_sample_iv_size: u8,
    /// 密钥 ID
    pub key_id: [u8; 16],
    /// 常量 IV (per_sample_iv_size == 0 时)
    pub constant_iv: Vec<u8>,
}

impl CencSampleEncryptionInfoEntry {
    fn byte_len(&self) -> u32 {
        let mut len = 20;
        if self.is_protected && self.per_sample_iv_size == 0 {
            len += 1 + self.constant_iv.len() as u32;
        }
        len
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        buf.skip(1)?; // reserved
        let mut pattern = 0u8;
        buf.rw_u8(&mut pattern)?;
        let mut protected = u8::from(self.is_protected);
        buf.rw_u8(&mut protected)?;
        self.is_protected = protected != 0;
        buf.rw_u8(&mut self.per_sample_iv_size)?;
        buf.rw_fixed_bytes(&mut self.key_id)?;
        if self.is_protected && self.per_sample_iv_size == 0 {
            let mut iv_size = self.constant_iv.len() as u8;
            buf.rw_u8(&mut iv_size)?;
            buf.rw_vec(&mut self.constant_iv, iv_size as usize)?;
        }
        Ok(())
    }
}

/// sgpd box (采样组描述, grouping_type = 'seig')
#[derive(Debug, Clone)]
pub struct SampleGroupDescriptionBox {
    /// 版本
    pub version: u8,
    /// 分组类型
    pub grouping_type: FourCc,
    /// seig 条目
    pub entries: Vec<CencSampleEncryptionInfoEntry>,
}

impl Default for SampleGroupDescriptionBox {
    fn default() -> Self {
        Self {
            version: 1,
            grouping_type: *b"seig",
            entries: Vec::new(),
        }
    }
}

impl Mp4Box for SampleGroupDescriptionBox {
    fn fourcc(&self) -> FourCc {
        *b"sgpd"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut flags = 0u32;
        buf.rw_version_flags(&mut self.version, &mut flags)?;
        buf.rw_fourcc(&mut self.grouping_type)?;
        if &self.grouping_type != b"seig" {
            // 其他分组类型原样跳过
            let n = buf.remaining();
            return buf.skip(n);
        }

        if self.version >= 1 {
            // 所有条目等长时 default_length 非 0
            let mut default_length = self
                .entries
                .first()
                .map(|e| e.byte_len())
                .unwrap_or(20);
            if self.entries.iter().any(|e| e.byte_len() != default_length) {
                default_length = 0;
            }
            buf.rw_u32(&mut default_length)?;
            if buf.reading() && default_length == 0 {
                return Err(FengError::Unimplemented(
                    "sgpd 变长条目未支持".into(),
                ));
            }
        }

        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.entries = vec![CencSampleEncryptionInfoEntry::default(); count as usize];
        }
        for entry in &mut self.entries {
            entry.read_write(buf)?;
        }
        Ok(())
    }
}

/// sbgp 条目
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleToGroupEntry {
    /// 连续采样数
    pub sample_count: u32,
    /// 组描述索引 (0 表示不属于任何组;
    /// ≥ 0x10001 表示指向分片内局部 sgpd)
    pub group_description_index: u32,
}

impl SampleToGroupEntry {
    /// 分片局部组索引基数
    pub const FRAGMENT_LOCAL_BASE: u32 = 0x10000;
}

/// sbgp box (采样→组映射)
#[derive(Debug, Clone)]
pub struct SampleToGroupBox {
    /// 分组类型
    pub grouping_type: FourCc,
    /// 条目
    pub entries: Vec<SampleToGroupEntry>,
}

impl Default for SampleToGroupBox {
    fn default() -> Self {
        Self {
            grouping_type: *b"seig",
            entries: Vec::new(),
        }
    }
}

impl Mp4Box for SampleToGroupBox {
    fn fourcc(&self) -> FourCc {
        *b"sbgp"
    }

    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()> {
        let mut version = 0u8;
        let mut flags = 0u32;
        buf.rw_version_flags(&mut version, &mut flags)?;
        buf.rw_fourcc(&mut self.grouping_type)?;
        let mut count = self.entries.len() as u32;
        buf.rw_u32(&mut count)?;
        if buf.reading() {
            self.entries = vec![SampleToGroupEntry::default(); count as usize];
        }
        for entry in &mut self.entries {
            buf.rw_u32(&mut entry.sample_count)?;
            buf.rw_u32(&mut entry.group_description_index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{box_to_vec, parse_box};

    #[test]
    fn test_pssh_v0_roundtrip() {
        let mut pssh = ProtectionSystemSpecificHeaderBox {
            system_id: [0xED; 16],
            data: vec![1, 2, 3, 4],
            ..Default::default()
        };
        let bytes = box_to_vec(&mut pssh).unwrap();
        assert_eq!(bytes.len(), 8 + 4 + 16 + 4 + 4);
        let parsed: ProtectionSystemSpecificHeaderBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.version, 0);
        assert_eq!(parsed.system_id, [0xED; 16]);
        assert_eq!(parsed.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_pssh_v1_with_key_ids() {
        let mut pssh = ProtectionSystemSpecificHeaderBox {
            system_id: [0x10; 16],
            key_ids: vec![[0xAA; 16], [0xBB; 16]],
            data: Vec::new(),
            ..Default::default()
        };
        let bytes = box_to_vec(&mut pssh).unwrap();
        assert_eq!(bytes[8], 1, "携带 KID 时应为版本 1");
        let parsed: ProtectionSystemSpecificHeaderBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.key_ids.len(), 2);
        assert_eq!(parsed.key_ids[1], [0xBB; 16]);
    }

    #[test]
    fn test_sinf_tree_roundtrip() {
        let mut sinf = ProtectionSchemeInfoBox {
            format: OriginalFormatBox {
                data_format: *b"avc1",
            },
            scheme_type: SchemeTypeBox {
                scheme_type: *b"cenc",
                scheme_version: 0x10000,
            },
            info: SchemeInformationBox {
                track_encryption: TrackEncryptionBox {
                    default_is_protected: true,
                    default_per_sample_iv_size: 8,
                    default_kid: [0x42; 16],
                    ..Default::default()
                },
            },
        };
        let bytes = box_to_vec(&mut sinf).unwrap();
        let parsed: ProtectionSchemeInfoBox = parse_box(&bytes).unwrap();
        assert_eq!(&parsed.format.data_format, b"avc1");
        assert_eq!(&parsed.scheme_type.scheme_type, b"cenc");
        assert!(parsed.info.track_encryption.default_is_protected);
        assert_eq!(parsed.info.track_encryption.default_per_sample_iv_size, 8);
        assert_eq!(parsed.info.track_encryption.default_kid, [0x42; 16]);
    }

    #[test]
    fn test_tenc_constant_iv() {
        let mut tenc = TrackEncryptionBox {
            default_is_protected: true,
            default_per_sample_iv_size: 0,
            default_kid: [0x01; 16],
            default_constant_iv: vec![0x22; 16],
            ..Default::default()
        };
        let bytes = box_to_vec(&mut tenc).unwrap();
        let parsed: TrackEncryptionBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.default_constant_iv, vec![0x22; 16]);
    }

    #[test]
    fn test_sgpd_sbgp_roundtrip() {
        let mut sgpd = SampleGroupDescriptionBox {
            version: 1,
            grouping_type: *b"seig",
            entries: vec![CencSampleEncryptionInfoEntry {
                is_protected: true,
                per_sample_iv_size: 16,
                key_id: [0x07; 16],
                constant_iv: Vec::new(),
            }],
        };
        let bytes = box_to_vec(&mut sgpd).unwrap();
        let parsed: SampleGroupDescriptionBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.entries.len(), 1);
        assert!(parsed.entries[0].is_protected);
        assert_eq!(parsed.entries[0].key_id, [0x07; 16]);

        let mut sbgp = SampleToGroupBox {
            grouping_type: *b"seig",
            entries: vec![SampleToGroupEntry {
                sample_count: 30,
                group_description_index: SampleToGroupEntry::FRAGMENT_LOCAL_BASE + 1,
            }],
        };
        let bytes = box_to_vec(&mut sbgp).unwrap();
        let parsed: SampleToGroupBox = parse_box(&bytes).unwrap();
        assert_eq!(parsed.entries[0].sample_count, 30);
        assert_eq!(
            parsed.entries[0].group_description_index,
            SampleToGroupEntry::FRAGMENT_LOCAL_BASE + 1
        );
    }
}
