//! 从流信息装配初始化段 (ftyp + moov).
//!
//! 输出轨道统一重编号为 1; 分片布局下 stbl 采样表为空, 真正的采样
//! 元数据位于各分片的 moof. 加密输出把采样条目包为 encv/enca 并挂
//! sinf/tenc, moov 级别追加各 DRM 系统的 pssh.

use feng_core::{FengError, FengResult};
use feng_crypto::{ProtectionScheme, ProtectionSystemInfo};

use crate::boxes::{
    box_to_vec, AudioSampleEntry, CodecConfigBox, EsdsBox, FileTypeBox, HandlerBox,
    MediaBox, MediaHeaderBox, MediaHeaderKind, MediaInformationBox, MovieBox,
    MovieExtendsBox, MovieHeaderBox, OriginalFormatBox,
    ProtectionSchemeInfoBox, ProtectionSystemSpecificHeaderBox, SampleDescriptionBox,
    SampleEntry, SchemeInformationBox, SchemeTypeBox, TextSampleEntry, TrackBox,
    TrackEncryptionBox, TrackExtendsBox, TrackHeaderBox, VisualSampleEntry,
    WebVttConfigBox,
};
use crate::demuxers::mp4::build_esds_descriptor;
use crate::stream_info::{Codec, StreamKind, TextInfo};
use crate::SharedStreamInfo;

/// 输出轨道 ID (每个输出一条轨)
pub const OUTPUT_TRACK_ID: u32 = 1;

/// 加密输出的初始化参数
#[derive(Debug, Clone)]
pub struct EncryptionInit {
    /// 保护方案
    pub scheme: ProtectionScheme,
    /// 默认密钥 ID
    pub default_kid: [u8; 16],
    /// 每采样 IV 大小
    pub per_sample_iv_size: u8,
    /// 各 DRM 系统的 pssh
    pub protection_systems: Vec<ProtectionSystemInfo>,
}

/// 装配 ftyp 字节
pub fn build_ftyp() -> FengResult<Vec<u8>> {
    let mut ftyp = FileTypeBox {
        box_type: *b"ftyp",
        major_brand: *b"isom",
        minor_version: 0x200,
        compatible_brands: vec![*b"isom", *b"iso6", *b"dash", *b"mp41"],
    };
    box_to_vec(&mut ftyp)
}

/// 装配初始化 moov 字节
pub fn build_moov(
    info: &SharedStreamInfo,
    encryption: Option<&EncryptionInit>,
) -> FengResult<Vec<u8>> {
    let sample_entry = build_sample_entry(info, encryption)?;

    let (header_kind, handler, tkhd_volume) = match &info.kind {
        StreamKind::Video(_) => (MediaHeaderKind::Video, HandlerBox::video(), 0u16),
        StreamKind::Audio(_) => (MediaHeaderKind::Audio, HandlerBox::audio(), 0x0100),
        StreamKind::Text(_) => (MediaHeaderKind::Null, HandlerBox::text(), 0),
    };
    let (width, height) = match &info.kind {
        StreamKind::Video(v) => (v.width, v.height),
        _ => (0, 0),
    };

    let mut moov = MovieBox {
        header: MovieHeaderBox {
            timescale: info.time_scale,
            duration: info.duration,
            next_track_id: OUTPUT_TRACK_ID + 1,
            ..Default::default()
        },
        tracks: vec![TrackBox {
            header: TrackHeaderBox {
                flags: TrackHeaderBox::FLAG_ENABLED_IN_MOVIE,
                track_id: OUTPUT_TRACK_ID,
                duration: info.duration,
                volume: tkhd_volume,
                width,
                height,
                ..Default::default()
            },
            edit: None,
            media: MediaBox {
                header: MediaHeaderBox {
                    timescale: info.time_scale,
                    duration: info.duration,
                    language: if info.language.is_empty() {
                        "und".into()
                    } else {
                        to_iso639_2(&info.language)
                    },
                    ..Default::default()
                },
                handler,
                information: MediaInformationBox {
                    header_kind,
                    sample_table: crate::boxes::SampleTableBox {
                        description: SampleDescriptionBox {
                            entries: vec![sample_entry],
                        },
                        ..Default::default()
                    },
                },
            },
        }],
        extends: Some(MovieExtendsBox {
            header: None,
            tracks: vec![TrackExtendsBox {
                track_id: OUTPUT_TRACK_ID,
                default_sample_description_index: 1,
                ..Default::default()
            }],
        }),
        pssh: encryption
            .map(|e| {
                e.protection_systems
                    .iter()
                    .map(|p| {
                        // pssh 字节为自含 box, 重新解析出负载装箱
                        parse_pssh(&p.pssh, p.system_id)
                    })
                    .collect()
            })
            .unwrap_or_default(),
    };
    box_to_vec(&mut moov)
}

fn parse_pssh(raw: &[u8], system_id: [u8; 16]) -> ProtectionSystemSpecificHeaderBox {
    crate::boxes::parse_box::<ProtectionSystemSpecificHeaderBox>(raw).unwrap_or_else(|_| {
        ProtectionSystemSpecificHeaderBox {
            system_id,
            data: raw.to_vec(),
            ..Default::default()
        }
    })
}

fn build_sinf(
    original_format: [u8; 4],
    info_encrypted: &EncryptionInit,
) -> ProtectionSchemeInfoBox {
    ProtectionSchemeInfoBox {
        format: OriginalFormatBox {
            data_format: original_format,
        },
        scheme_type: SchemeTypeBox {
            scheme_type: info_encrypted.scheme.fourcc(),
            scheme_version: 0x10000,
        },
        info: SchemeInformationBox {
            track_encryption: TrackEncryptionBox {
                default_is_protected: true,
                default_per_sample_iv_size: info_encrypted.per_sample_iv_size,
                default_kid: info_encrypted.default_kid,
                ..Default::default()
            },
        },
    }
}

fn build_sample_entry(
    info: &SharedStreamInfo,
    encryption: Option<&EncryptionInit>,
) -> FengResult<SampleEntry> {
    match &info.kind {
        StreamKind::Video(v) => {
            let (format, config_fourcc) = match info.codec {
                Codec::H264 => (*b"avc1", *b"avcC"),
                Codec::H265 => (*b"hvc1", *b"hvcC"),
                Codec::Vp9 => (*b"vp09", *b"vpcC"),
                other => {
                    return Err(FengError::Unimplemented(format!(
                        "视频编解码器 {other} 无法写入 MP4"
                    )))
                }
            };
            let mut entry = VisualSampleEntry {
                format,
                data_reference_index: 1,
                width: v.width as u16,
                height: v.height as u16,
                codec_config: Some(CodecConfigBox {
                    box_type: config_fourcc,
                    data: if info.codec == Codec::Vp9 && info.extra_data.is_empty() {
                        crate::codecs::VpCodecConfigurationRecord::default().serialize()
                    } else {
                        info.extra_data.clone()
                    },
                }),
                pixel_aspect: (v.pixel_width != v.pixel_height).then(|| {
                    crate::boxes::PixelAspectRatioBox {
                        h_spacing: v.pixel_width,
                        v_spacing: v.pixel_height,
                    }
                }),
                sinf: None,
            };
            if let Some(enc) = encryption {
                entry.sinf = Some(build_sinf(entry.format, enc));
                entry.format = *b"encv";
            }
            Ok(SampleEntry::Visual(entry))
        }
        StreamKind::Audio(a) => {
            let mut entry = AudioSampleEntry {
                data_reference_index: 1,
                format: match info.codec {
                    Codec::Aac => *b"mp4a",
                    Codec::Opus => *b"Opus",
                    other => {
                        return Err(FengError::Unimplemented(format!(
                            "音频编解码器 {other} 无法写入 MP4"
                        )))
                    }
                },
                channel_count: u16::from(a.channels),
                sample_size: u16::from(a.sample_bits),
                sample_rate: a.sampling_frequency,
                esds: None,
                codec_config: None,
                sinf: None,
            };
            match info.codec {
                Codec::Aac => {
                    entry.esds = Some(EsdsBox {
                        descriptor: build_esds_descriptor(&info.extra_data, a.avg_bitrate),
                    });
                }
                Codec::Opus => {
                    entry.codec_config = Some(CodecConfigBox {
                        box_type: *b"dOps",
                        data: info.extra_data.clone(),
                    });
                }
                _ => unreachable!(),
            }
            if let Some(enc) = encryption {
                entry.sinf = Some(build_sinf(entry.format, enc));
                entry.format = *b"enca";
            }
            Ok(SampleEntry::Audio(entry))
        }
        StreamKind::Text(TextInfo { codec_config, .. }) => Ok(SampleEntry::Text(TextSampleEntry {
            format: *b"wvtt",
            data_reference_index: 1,
            config: WebVttConfigBox {
                config: String::from_utf8_lossy(codec_config).to_string(),
            },
        })),
    }
}

/// BCP-47 最短形式 → mdhd 的 ISO 639-2 三字母码
fn to_iso639_2(lang: &str) -> String {
    match lang {
        "en" => "eng",
        "fr" => "fra",
        "de" => "deu",
        "es" => "spa",
        "it" => "ita",
        "ja" => "jpn",
        "ko" => "kor",
        "zh" => "zho",
        "ru" => "rus",
        "pt" => "por",
        "nl" => "nld",
        "sv" => "swe",
        "no" => "nor",
        "da" => "dan",
        "fi" => "fin",
        "pl" => "pol",
        "tr" => "tur",
        "ar" => "ara",
        "hi" => "hin",
        "th" => "tha",
        other if other.len() == 3 => other,
        _ => "und",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::parse_box;
    use crate::stream_info::{AudioInfo, StreamInfo, VideoInfo};
    use std::sync::Arc;

    fn video_info() -> SharedStreamInfo {
        Arc::new(StreamInfo {
            track_id: 3,
            time_scale: 90000,
            duration: 900000,
            codec: Codec::H264,
            codec_string: "avc1.42c01e".into(),
            language: "en".into(),
            is_encrypted: false,
            extra_data: vec![0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x00, 0x01, 0x00],
            kind: StreamKind::Video(VideoInfo {
                width: 1280,
                height: 720,
                pixel_width: 1,
                pixel_height: 1,
                nalu_length_size: 4,
                trick_play_factor: 0,
            }),
        })
    }

    #[test]
    fn test_clear_video_moov() {
        let bytes = build_moov(&video_info(), None).unwrap();
        let moov: MovieBox = parse_box(&bytes).unwrap();
        assert_eq!(moov.tracks.len(), 1);
        assert_eq!(moov.tracks[0].header.track_id, OUTPUT_TRACK_ID);
        assert_eq!(moov.tracks[0].media.header.timescale, 90000);
        assert_eq!(moov.tracks[0].media.header.language, "eng");
        assert!(moov.extends.is_some());
        assert!(moov.pssh.is_empty());

        match &moov.tracks[0].media.information.sample_table.description.entries[0] {
            SampleEntry::Visual(v) => {
                assert_eq!(&v.format, b"avc1");
                assert_eq!(v.width, 1280);
            }
            other => panic!("期望视频条目: {other:?}"),
        }
    }

    #[test]
    fn test_encrypted_audio_moov() {
        let info = Arc::new(StreamInfo {
            track_id: 2,
            time_scale: 44100,
            duration: 441000,
            codec: Codec::Aac,
            codec_string: "mp4a.40.2".into(),
            language: "fr".into(),
            is_encrypted: false,
            extra_data: vec![0x12, 0x10],
            kind: StreamKind::Audio(AudioInfo {
                sample_bits: 16,
                channels: 2,
                sampling_frequency: 44100,
                max_bitrate: 0,
                avg_bitrate: 128000,
            }),
        });
        let enc = EncryptionInit {
            scheme: ProtectionScheme::Cenc,
            default_kid: [0x09; 16],
            per_sample_iv_size: 8,
            protection_systems: vec![ProtectionSystemInfo {
                system_id: [0x10; 16],
                pssh: feng_crypto::key::synthesize_pssh_box(&[0x10; 16], &[0xAA, 0xBB]),
            }],
        };
        let bytes = build_moov(&info, Some(&enc)).unwrap();
        let moov: MovieBox = parse_box(&bytes).unwrap();

        assert_eq!(moov.pssh.len(), 1);
        assert_eq!(moov.pssh[0].system_id, [0x10; 16]);
        assert_eq!(moov.pssh[0].data, vec![0xAA, 0xBB]);

        match &moov.tracks[0].media.information.sample_table.description.entries[0] {
            SampleEntry::Audio(a) => {
                assert_eq!(&a.format, b"enca");
                let sinf = a.sinf.as_ref().unwrap();
                assert_eq!(&sinf.format.data_format, b"mp4a");
                assert_eq!(sinf.info.track_encryption.default_kid, [0x09; 16]);
                assert_eq!(sinf.info.track_encryption.default_per_sample_iv_size, 8);
            }
            other => panic!("期望音频条目: {other:?}"),
        }
    }
}
