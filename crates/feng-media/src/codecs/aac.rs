//! AAC 配置 (AudioSpecificConfig) 与 ADTS 头.
//!
//! - `AudioSpecificConfig`: ISO 14496-3 解析, 恢复采样率与声道数,
//!   识别 SBR/PS 扩展并给出 `mp4a.40.X` 编解码器字符串
//! - ADTS: 头部合成 (重封装进 TS) 与解析 (TS 输入)

use feng_core::{BitReader, FengError, FengResult};

/// 采样率索引表
const SAMPLING_FREQUENCIES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// AudioSpecificConfig
#[derive(Debug, Clone, Default)]
pub struct AudioSpecificConfig {
    /// 音频对象类型 (2=AAC-LC, 5=SBR, 29=PS)
    pub audio_object_type: u8,
    /// 基础采样率
    pub sampling_frequency: u32,
    /// 基础采样率索引 (15 表示显式 24 位采样率)
    pub sampling_frequency_index: u8,
    /// 声道配置
    pub channel_config: u8,
    /// SBR 扩展存在
    pub sbr_present: bool,
    /// PS 扩展存在
    pub ps_present: bool,
    /// SBR 扩展采样率
    pub extension_frequency: u32,
}

impl AudioSpecificConfig {
    /// 解析 AudioSpecificConfig 字节
    pub fn parse(data: &[u8]) -> FengResult<Self> {
        let mut br = BitReader::new(data);
        let mut config = Self::default();

        config.audio_object_type = read_audio_object_type(&mut br)?;
        let (freq, index) = read_sampling_frequency(&mut br)?;
        config.sampling_frequency = freq;
        config.sampling_frequency_index = index;
        config.channel_config = br.read_bits(4)? as u8;

        if config.audio_object_type == 5 || config.audio_object_type == 29 {
            // 显式 SBR (5) / PS (29) 签名
            config.sbr_present = true;
            config.ps_present = config.audio_object_type == 29;
            let (ext_freq, _) = read_sampling_frequency(&mut br)?;
            config.extension_frequency = ext_freq;
            config.audio_object_type = read_audio_object_type(&mut br)?;
        }

        if config.channel_config == 0 || config.channel_config > 7 {
            return Err(FengError::ParserFailure(format!(
                "AAC 声道配置非法: {}",
                config.channel_config
            )));
        }
        Ok(config)
    }

    /// 输出采样率 (SBR 存在时为扩展采样率)
    pub fn output_frequency(&self) -> u32 {
        if self.sbr_present && self.extension_frequency > 0 {
            self.extension_frequency
        } else {
            self.sampling_frequency
        }
    }

    /// 输出声道数 (PS 隐式立体声)
    pub fn output_channels(&self) -> u8 {
        if self.ps_present && self.channel_config == 1 {
            2
        } else {
            self.channel_config
        }
    }

    /// RFC 6381 编解码器字符串
    pub fn codec_string(&self) -> String {
        let object_type = if self.ps_present {
            29
        } else if self.sbr_present {
            5
        } else {
            self.audio_object_type
        };
        format!("mp4a.40.{object_type}")
    }

    /// 合成 ADTS 头 (7 字节, 无 CRC)
    ///
    /// `frame_length` 为 AAC 裸帧大小, 头部长度会在此基础上累加.
    pub fn adts_header(&self, frame_length: usize) -> FengResult<Vec<u8>> {
        if self.sampling_frequency_index >= 15 {
            return Err(FengError::Unimplemented(
                "显式采样率无法装入 ADTS 头".into(),
            ));
        }
        let total = frame_length + 7;
        if total > 0x1FFF {
            return Err(FengError::InvalidArgument(format!(
                "ADTS 帧过大: {total}"
            )));
        }
        // ADTS 的 profile 字段为 object_type - 1 (2 位)
        let profile = self.audio_object_type.saturating_sub(1) & 0x3;
        let freq_index = self.sampling_frequency_index & 0xF;
        let channels = self.channel_config & 0x7;

        Ok(vec![
            0xFF,
            0xF1, // MPEG-4, layer 0, 无 CRC
            (profile << 6) | (freq_index << 2) | (channels >> 2),
            ((channels & 0x3) << 6) | ((total >> 11) as u8 & 0x3),
            (total >> 3) as u8,
            (((total & 0x7) as u8) << 5) | 0x1F,
            0xFC,
        ])
    }
}

fn read_audio_object_type(br: &mut BitReader<'_>) -> FengResult<u8> {
    let t = br.read_bits(5)? as u8;
    if t == 31 {
        Ok(32 + br.read_bits(6)? as u8)
    } else {
        Ok(t)
    }
}

fn read_sampling_frequency(br: &mut BitReader<'_>) -> FengResult<(u32, u8)> {
    let index = br.read_bits(4)? as u8;
    if index == 15 {
        Ok((br.read_bits(24)?, 15))
    } else if (index as usize) < SAMPLING_FREQUENCIES.len() {
        Ok((SAMPLING_FREQUENCIES[index as usize], index))
    } else {
        Err(FengError::ParserFailure(format!(
            "AAC 采样率索引非法: {index}"
        )))
    }
}

/// 已解析的 ADTS 帧头
#[derive(Debug, Clone, Copy)]
pub struct AdtsHeader {
    /// 头部长度 (7 或 9 字节)
    pub header_size: usize,
    /// 帧总长 (含头部)
    pub frame_size: usize,
    /// profile (object_type - 1)
    pub profile: u8,
    /// 采样率索引
    pub sampling_frequency_index: u8,
    /// 声道配置
    pub channel_config: u8,
}

impl AdtsHeader {
    /// 解析 ADTS 帧头; 数据不足返回 None
    pub fn parse(data: &[u8]) -> FengResult<Option<Self>> {
        if data.len() < 7 {
            return Ok(None);
        }
        if data[0] != 0xFF || data[1] & 0xF0 != 0xF0 {
            return Err(FengError::ParserFailure("ADTS 同步字错误".into()));
        }
        let protection_absent = data[1] & 1 != 0;
        let header_size = if protection_absent { 7 } else { 9 };
        let profile = data[2] >> 6;
        let sampling_frequency_index = (data[2] >> 2) & 0xF;
        let channel_config = ((data[2] & 1) << 2) | (data[3] >> 6);
        let frame_size = ((data[3] as usize & 0x3) << 11) | ((data[4] as usize) << 3)
            | ((data[5] as usize) >> 5);
        if frame_size < header_size {
            return Err(FengError::ParserFailure("ADTS 帧长字段非法".into()));
        }
        Ok(Some(Self {
            header_size,
            frame_size,
            profile,
            sampling_frequency_index,
            channel_config,
        }))
    }

    /// 采样率
    pub fn sampling_frequency(&self) -> u32 {
        SAMPLING_FREQUENCIES
            .get(self.sampling_frequency_index as usize)
            .copied()
            .unwrap_or(0)
    }

    /// 合成对应的 AudioSpecificConfig (2 字节)
    pub fn audio_specific_config(&self) -> Vec<u8> {
        let object_type = self.profile + 1;
        vec![
            (object_type << 3) | (self.sampling_frequency_index >> 1),
            ((self.sampling_frequency_index & 1) << 7) | (self.channel_config << 3),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aac_lc() {
        // AAC-LC, 44.1kHz (index 4), 立体声: 00010 0100 0010 ...
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        assert_eq!(config.audio_object_type, 2);
        assert_eq!(config.sampling_frequency, 44100);
        assert_eq!(config.channel_config, 2);
        assert!(!config.sbr_present);
        assert_eq!(config.codec_string(), "mp4a.40.2");
    }

    #[test]
    fn test_parse_he_aac_sbr() {
        // SBR 签名: object_type=5, 24kHz 基础 (索引 6), 单声道,
        // 扩展 48kHz (索引 3), 内层对象 2
        // 位串: 00101 0110 0001 0011 00010 (22 位, 左对齐到 3 字节)
        let bits: u32 = 0b00101_0110_0001_0011_00010 << (32 - 22);
        let bytes = bits.to_be_bytes();
        let config = AudioSpecificConfig::parse(&bytes[..3]).unwrap();
        assert!(config.sbr_present);
        assert_eq!(config.sampling_frequency, 24000);
        assert_eq!(config.extension_frequency, 48000);
        assert_eq!(config.output_frequency(), 48000);
        assert_eq!(config.codec_string(), "mp4a.40.5");
    }

    #[test]
    fn test_adts_roundtrip() {
        let config = AudioSpecificConfig::parse(&[0x12, 0x10]).unwrap();
        let header = config.adts_header(100).unwrap();
        assert_eq!(header.len(), 7);

        let parsed = AdtsHeader::parse(&header).unwrap().unwrap();
        assert_eq!(parsed.frame_size, 107);
        assert_eq!(parsed.header_size, 7);
        assert_eq!(parsed.sampling_frequency(), 44100);
        assert_eq!(parsed.channel_config, 2);
        assert_eq!(parsed.audio_specific_config(), vec![0x12, 0x10]);
    }

    #[test]
    fn test_adts_short_data() {
        assert!(AdtsHeader::parse(&[0xFF, 0xF1]).unwrap().is_none());
    }
}
