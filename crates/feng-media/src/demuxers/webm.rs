//! WebM (Matroska 子集) 解析器.
//!
//! 流式解析 EBML 头、Info、Tracks 与 Cluster; SimpleBlock 与 BlockGroup
//! 产生采样. 采样时长的取得顺序 (与 BlockDuration/Opus 的取舍):
//! 1. 未加密的 Opus: 从 TOC 字节解码
//! 2. BlockGroup 的 BlockDuration (加密时采样不可读, 只能用它)
//! 3. 相邻采样 dts 差 (滞留一拍, flush 时用上一时长兜底)
//! 4. 按轨道类别的默认值

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use feng_core::{FengError, FengResult};
use feng_crypto::KeySource;

use super::ebml::{self, EbmlReader, EBML_UNKNOWN_SIZE};
use crate::codecs::{opus, VpCodecConfigurationRecord};
use crate::parser::{MediaParser, ParserCallbacks};
use crate::sample::MediaSample;
use crate::stream_info::{
    shortest_language, AudioInfo, Codec, StreamInfo, StreamKind, VideoInfo,
};

/// 视频轨道兜底时长 (毫秒时间基, 约 30fps)
const DEFAULT_VIDEO_DURATION: u64 = 33;
/// 音频轨道兜底时长
const DEFAULT_AUDIO_DURATION: u64 = 20;

/// 轨道装配状态
struct WebmTrack {
    info: Arc<StreamInfo>,
    is_video: bool,
    /// 滞留的上一个采样 (时长待定)
    held: Option<MediaSample>,
    /// 最近一次确定的时长 (flush 兜底)
    last_duration: u64,
    /// TrackEntry 的 DefaultDuration (tick, 0 表示未给出)
    default_duration: u64,
}

/// 解析自 TrackEntry 的原始字段
#[derive(Default)]
struct TrackEntryFields {
    number: u64,
    track_type: u64,
    codec_id: String,
    codec_private: Vec<u8>,
    language: String,
    default_duration_ns: u64,
    width: u32,
    height: u32,
    sampling_frequency: f64,
    channels: u64,
    bit_depth: u64,
    encrypted: bool,
}

/// WebM 解析器
pub struct WebmParser {
    callbacks: Option<ParserCallbacks>,
    buffer: Vec<u8>,
    timestamp_scale_ns: u64,
    /// 时间基 (tick/秒)
    time_scale: u32,
    tracks: HashMap<u64, WebmTrack>,
    /// 当前 Cluster 时间戳
    cluster_timestamp: i64,
    /// 在未知大小的 Cluster 内
    in_cluster: bool,
    init_sent: bool,
    failed: bool,
}

impl Default for WebmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WebmParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self {
            callbacks: None,
            buffer: Vec::new(),
            timestamp_scale_ns: 1_000_000,
            time_scale: 1000,
            tracks: HashMap::new(),
            cluster_timestamp: 0,
            in_cluster: false,
            init_sent: false,
            failed: false,
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> FengError {
        self.failed = true;
        FengError::ParserFailure(msg.into())
    }

    /// 处理 Info 元素
    fn process_info(&mut self, payload: &[u8]) -> FengResult<()> {
        let mut r = EbmlReader::new(payload);
        while r.remaining() > 0 {
            let (id, size) = r.read_element_header()?;
            let data = r.read_bytes(size as usize)?;
            match id {
                ebml::ID_TIMESTAMP_SCALE => {
                    self.timestamp_scale_ns = ebml::parse_uint(data)?.max(1);
                    self.time_scale = (1_000_000_000 / self.timestamp_scale_ns) as u32;
                }
                ebml::ID_DURATION => {
                    debug!("WebM: 容器时长 {} tick", ebml::parse_float(data)?);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// 处理 Tracks 元素并发射 init
    fn process_tracks(&mut self, payload: &[u8]) -> FengResult<()> {
        let mut r = EbmlReader::new(payload);
        let mut infos = Vec::new();
        while r.remaining() > 0 {
            let (id, size) = r.read_element_header()?;
            let data = r.read_bytes(size as usize)?;
            if id != ebml::ID_TRACK_ENTRY {
                continue;
            }
            let fields = parse_track_entry(data)?;
            if let Some(info) = self.build_stream_info(&fields)? {
                let info = Arc::new(info);
                self.tracks.insert(
                    fields.number,
                    WebmTrack {
                        info: Arc::clone(&info),
                        is_video: fields.track_type == 1,
                        held: None,
                        last_duration: 0,
                        default_duration: fields.default_duration_ns
                            * u64::from(self.time_scale)
                            / 1_000_000_000,
                    },
                );
                infos.push(info);
            }
        }
        if infos.is_empty() {
            return Err(self.fail("Tracks 中无可用轨道"));
        }
        infos.sort_by_key(|i| i.track_id);

        if !self.init_sent {
            self.init_sent = true;
            if let Some(cb) = self.callbacks.as_mut() {
                (cb.on_init)(&infos);
            }
        }
        Ok(())
    }

    fn build_stream_info(&mut self, fields: &TrackEntryFields) -> FengResult<Option<StreamInfo>> {
        let (codec, codec_string, kind) = match fields.codec_id.as_str() {
            "V_VP9" => {
                // WebM 的 CodecPrivate 为逐字段形式且通常缺省,
                // 配置记录按默认档位装配, 采样描述写 MP4 形式
                let record = VpCodecConfigurationRecord::default();
                (
                    Codec::Vp9,
                    record.codec_string(),
                    StreamKind::Video(VideoInfo {
                        width: fields.width,
                        height: fields.height,
                        pixel_width: 1,
                        pixel_height: 1,
                        nalu_length_size: 0,
                        trick_play_factor: 0,
                    }),
                )
            }
            "V_VP8" => (
                Codec::Vp8,
                "vp8".to_string(),
                StreamKind::Video(VideoInfo {
                    width: fields.width,
                    height: fields.height,
                    pixel_width: 1,
                    pixel_height: 1,
                    nalu_length_size: 0,
                    trick_play_factor: 0,
                }),
            ),
            "A_OPUS" => (
                Codec::Opus,
                "opus".to_string(),
                StreamKind::Audio(AudioInfo {
                    sample_bits: fields.bit_depth.max(16) as u8,
                    channels: fields.channels.max(1) as u8,
                    sampling_frequency: fields.sampling_frequency as u32,
                    max_bitrate: 0,
                    avg_bitrate: 0,
                }),
            ),
            "A_VORBIS" => (
                Codec::Vorbis,
                "vorbis".to_string(),
                StreamKind::Audio(AudioInfo {
                    sample_bits: fields.bit_depth.max(16) as u8,
                    channels: fields.channels.max(1) as u8,
                    sampling_frequency: fields.sampling_frequency as u32,
                    max_bitrate: 0,
                    avg_bitrate: 0,
                }),
            ),
            other => {
                warn!("WebM: 忽略不支持的轨道编解码器 {other}");
                return Ok(None);
            }
        };

        Ok(Some(StreamInfo {
            track_id: fields.number as u32,
            time_scale: self.time_scale,
            duration: 0,
            codec,
            codec_string,
            language: shortest_language(&fields.language),
            is_encrypted: fields.encrypted,
            extra_data: fields.codec_private.clone(),
            kind,
        }))
    }

    /// 处理 Cluster 的直接子元素
    fn process_cluster_child(&mut self, id: u32, data: &[u8]) -> FengResult<()> {
        match id {
            ebml::ID_CLUSTER_TIMESTAMP => {
                self.cluster_timestamp = ebml::parse_uint(data)? as i64;
            }
            ebml::ID_SIMPLE_BLOCK => {
                self.process_block(data, None, None)?;
            }
            ebml::ID_BLOCK_GROUP => {
                let mut block: Option<&[u8]> = None;
                let mut duration: Option<u64> = None;
                let mut has_reference = false;
                let mut r = EbmlReader::new(data);
                while r.remaining() > 0 {
                    let (child_id, size) = r.read_element_header()?;
                    let payload = r.read_bytes(size as usize)?;
                    match child_id {
                        ebml::ID_BLOCK => block = Some(payload),
                        ebml::ID_BLOCK_DURATION => duration = Some(ebml::parse_uint(payload)?),
                        ebml::ID_REFERENCE_BLOCK => has_reference = true,
                        _ => {}
                    }
                }
                if let Some(block) = block {
                    self.process_block(block, duration, Some(!has_reference))?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// 解析 (Simple)Block 并装配采样
    fn process_block(
        &mut self,
        data: &[u8],
        block_duration: Option<u64>,
        key_override: Option<bool>,
    ) -> FengResult<()> {
        let mut r = EbmlReader::new(data);
        let track_number = r.read_vint()?;
        let rel_timestamp = {
            let b = r.read_bytes(2)?;
            i16::from_be_bytes([b[0], b[1]]) as i64
        };
        let flags = r.read_bytes(1)?[0];
        if flags & 0x06 != 0 {
            return Err(self.fail("WebM: lacing 未支持"));
        }
        let payload = r.read_bytes(r.remaining())?.to_vec();

        let time_scale = self.time_scale;
        let dts = self.cluster_timestamp + rel_timestamp;

        // 在轨道借用内装配, 待发射采样攒到本地再回调
        let mut to_emit: Vec<(u32, MediaSample)> = Vec::new();
        {
            let Some(track) = self.tracks.get_mut(&track_number) else {
                return Ok(()); // 未注册的轨道 (被忽略的编解码器)
            };
            let is_key = key_override.unwrap_or(flags & 0x80 != 0) || !track.is_video;
            let mut sample = MediaSample::new(dts, dts, is_key, Bytes::from(payload));

            // 时长决策 (见模块头)
            let duration = if track.info.codec == Codec::Opus && !track.info.is_encrypted {
                let ticks_48k = opus::packet_duration(&sample.data)?;
                Some(ticks_48k * u64::from(time_scale) / u64::from(opus::OPUS_TIME_SCALE))
            } else {
                block_duration
            };

            let track_id = track.info.track_id;
            if let Some(held) = track.held.take() {
                let mut held = held;
                if held.duration == 0 {
                    held.duration = (dts - held.dts).max(0) as u64;
                }
                track.last_duration = held.duration;
                to_emit.push((track_id, held));
            }
            match duration {
                Some(d) => {
                    sample.duration = d;
                    track.last_duration = d;
                    to_emit.push((track_id, sample));
                }
                None => track.held = Some(sample),
            }
        }

        for (track_id, sample) in to_emit {
            self.emit(track_id, sample)?;
        }
        Ok(())
    }

    fn emit(&mut self, track_id: u32, sample: MediaSample) -> FengResult<()> {
        if let Some(cb) = self.callbacks.as_mut() {
            if !(cb.on_sample)(track_id, sample) {
                return Err(FengError::Cancelled);
            }
        }
        Ok(())
    }
}

/// 解析 TrackEntry 子元素
fn parse_track_entry(data: &[u8]) -> FengResult<TrackEntryFields> {
    let mut fields = TrackEntryFields {
        language: "und".into(),
        sampling_frequency: 8000.0,
        ..Default::default()
    };
    let mut r = EbmlReader::new(data);
    while r.remaining() > 0 {
        let (id, size) = r.read_element_header()?;
        let payload = r.read_bytes(size as usize)?;
        match id {
            ebml::ID_TRACK_NUMBER => fields.number = ebml::parse_uint(payload)?,
            ebml::ID_TRACK_TYPE => fields.track_type = ebml::parse_uint(payload)?,
            ebml::ID_CODEC_ID => fields.codec_id = ebml::parse_string(payload),
            ebml::ID_CODEC_PRIVATE => fields.codec_private = payload.to_vec(),
            ebml::ID_LANGUAGE => fields.language = ebml::parse_string(payload),
            ebml::ID_DEFAULT_DURATION => fields.default_duration_ns = ebml::parse_uint(payload)?,
            ebml::ID_VIDEO => {
                let mut v = EbmlReader::new(payload);
                while v.remaining() > 0 {
                    let (vid, vsize) = v.read_element_header()?;
                    let vdata = v.read_bytes(vsize as usize)?;
                    match vid {
                        ebml::ID_PIXEL_WIDTH => fields.width = ebml::parse_uint(vdata)? as u32,
                        ebml::ID_PIXEL_HEIGHT => fields.height = ebml::parse_uint(vdata)? as u32,
                        _ => {}
                    }
                }
            }
            ebml::ID_AUDIO => {
                let mut a = EbmlReader::new(payload);
                while a.remaining() > 0 {
                    let (aid, asize) = a.read_element_header()?;
                    let adata = a.read_bytes(asize as usize)?;
                    match aid {
                        ebml::ID_SAMPLING_FREQUENCY => {
                            fields.sampling_frequency = ebml::parse_float(adata)?
                        }
                        ebml::ID_CHANNELS => fields.channels = ebml::parse_uint(adata)?,
                        ebml::ID_BIT_DEPTH => fields.bit_depth = ebml::parse_uint(adata)?,
                        _ => {}
                    }
                }
            }
            ebml::ID_CONTENT_ENCODINGS => fields.encrypted = true,
            _ => {}
        }
    }
    Ok(fields)
}

impl MediaParser for WebmParser {
    fn init(&mut self, callbacks: ParserCallbacks, _key_source: Option<Arc<dyn KeySource>>) {
        self.callbacks = Some(callbacks);
    }

    fn parse(&mut self, data: &[u8]) -> FengResult<()> {
        if self.failed {
            return Err(FengError::ParserFailure("解析器已失败".into()));
        }
        self.buffer.extend_from_slice(data);

        loop {
            let mut r = EbmlReader::new(&self.buffer);
            let header = match r.read_element_header() {
                Ok(h) => h,
                Err(FengError::EndOfStream) => break,
                Err(e) => return Err(self.fail(e.to_string())),
            };
            let (id, size) = header;
            let header_len = r.pos();

            // Segment 与未知大小的 Cluster: 下钻, 子元素作为顶层继续
            if id == ebml::ID_SEGMENT {
                // Segment 下钻, 子元素按顶层继续解析
                self.buffer.drain(..header_len);
                continue;
            }
            if id == ebml::ID_CLUSTER && size == EBML_UNKNOWN_SIZE {
                self.in_cluster = true;
                self.buffer.drain(..header_len);
                continue;
            }

            if size == EBML_UNKNOWN_SIZE {
                return Err(self.fail(format!("元素 {id:#x} 使用未知大小")));
            }
            let total = header_len + size as usize;
            if self.buffer.len() < total {
                break; // 等待更多输入
            }
            let payload = self.buffer[header_len..total].to_vec();
            self.buffer.drain(..total);

            match id {
                ebml::ID_EBML_HEADER | ebml::ID_SEEK_HEAD | ebml::ID_CUES | ebml::ID_TAGS
                | ebml::ID_VOID => {}
                ebml::ID_INFO => self.process_info(&payload)?,
                ebml::ID_TRACKS => self.process_tracks(&payload)?,
                ebml::ID_CLUSTER => {
                    // 已知大小的 Cluster: 一次处理全部子元素
                    let mut c = EbmlReader::new(&payload);
                    while c.remaining() > 0 {
                        let (cid, csize) = c.read_element_header()?;
                        let cdata = c.read_bytes(csize as usize)?.to_vec();
                        self.process_cluster_child(cid, &cdata)?;
                    }
                }
                other if self.in_cluster => {
                    self.process_cluster_child(other, &payload)?;
                }
                other => {
                    debug!("WebM: 忽略元素 {other:#x}");
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> FengResult<()> {
        let track_numbers: Vec<u64> = self.tracks.keys().copied().collect();
        for number in track_numbers {
            let Some(track) = self.tracks.get_mut(&number) else {
                continue;
            };
            if let Some(mut held) = track.held.take() {
                if held.duration == 0 {
                    held.duration = if track.last_duration > 0 {
                        track.last_duration
                    } else if track.default_duration > 0 {
                        track.default_duration
                    } else if track.is_video {
                        DEFAULT_VIDEO_DURATION * u64::from(self.time_scale) / 1000
                    } else {
                        DEFAULT_AUDIO_DURATION * u64::from(self.time_scale) / 1000
                    };
                }
                let track_id = track.info.track_id;
                self.emit(track_id, held)?;
            }
        }
        Ok(())
    }
}
