//! ISO-BMFF (MP4) 解析器.
//!
//! 同时支持非分片 (moov 采样表寻址) 与分片 (moof/traf/trun) 两种布局,
//! 以流式方式工作: 顶层 box 逐个累积解析, mdat 字节按采样消费后即丢弃.
//! 非分片输入要求 moov 位于 mdat 之前 (渐进式布局).
//!
//! 加密输入不在此处解密: senc 中的 IV 与子采样布局被装配成
//! `EncryptionConfig` 附在采样上, 由下游解密器处理.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use feng_core::{BufferReader, FengError, FengResult};
use feng_crypto::{KeySource, ProtectionScheme};

use crate::boxes::{
    fourcc_str, BoxBuffer, BoxHeader, MovieBox, MovieFragmentBox, Mp4Box, SampleEncryptionBox,
    SampleEntry, TrackBox, TrackFragmentHeaderBox, TrackRunBox,
};
use crate::codecs::{
    AudioSpecificConfig, AvcDecoderConfigurationRecord, HevcDecoderConfigurationRecord,
    VpCodecConfigurationRecord,
};
use crate::parser::{MediaParser, ParserCallbacks};
use crate::sample::{EncryptionConfig, MediaSample, SubsampleEntry};
use crate::stream_info::{
    shortest_language, AudioInfo, Codec, StreamInfo, StreamKind, TextInfo, VideoInfo,
};

/// 每轨解析上下文
struct TrackContext {
    track_id: u32,
    timescale: u32,
    /// trex 默认值
    default_sample_duration: u32,
    default_sample_flags: u32,
    default_sample_size: u32,
    /// 加密上下文 (tenc)
    scheme: Option<ProtectionScheme>,
    default_kid: [u8; 16],
    per_sample_iv_size: u8,
    constant_iv: Vec<u8>,
}

/// 待发射的采样引用 (绝对文件偏移寻址)
struct PendingSample {
    offset: u64,
    size: u32,
    track_id: u32,
    dts: i64,
    pts: i64,
    duration: u64,
    is_key_frame: bool,
    encryption_config: Option<EncryptionConfig>,
}

/// 解析器状态
#[derive(Clone, Copy)]
enum ScanState {
    /// 等待下一个顶层 box 头
    TopLevel,
    /// 跳过 mdat 负载区 (end 为绝对偏移)
    InMdat { end: u64 },
}

/// MP4 解析器
pub struct Mp4Parser {
    callbacks: Option<ParserCallbacks>,
    buffer: Vec<u8>,
    /// buffer[0] 对应的绝对文件偏移
    buffer_start: u64,
    /// 顶层扫描的绝对偏移
    scan_pos: u64,
    state: ScanState,
    tracks: HashMap<u32, TrackContext>,
    /// 按偏移排序的待发射采样
    pending: Vec<PendingSample>,
    init_sent: bool,
    failed: bool,
}

impl Default for Mp4Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Mp4Parser {
    /// 创建解析器
    pub fn new() -> Self {
        Self {
            callbacks: None,
            buffer: Vec::new(),
            buffer_start: 0,
            scan_pos: 0,
            state: ScanState::TopLevel,
            tracks: HashMap::new(),
            pending: Vec::new(),
            init_sent: false,
            failed: false,
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> FengError {
        self.failed = true;
        FengError::ParserFailure(msg.into())
    }

    /// 处理一个完整的顶层 box
    fn process_box(&mut self, fourcc: [u8; 4], payload: &[u8], box_start: u64) -> FengResult<()> {
        match &fourcc {
            b"ftyp" | b"styp" | b"free" | b"skip" | b"sidx" | b"mfra" | b"meta" => {
                debug!("MP4: 跳过顶层 box {}", fourcc_str(&fourcc));
            }
            b"moov" => self.process_moov(payload)?,
            b"moof" => self.process_moof(payload, box_start)?,
            other => {
                debug!("MP4: 忽略未知顶层 box {}", fourcc_str(other));
            }
        }
        Ok(())
    }

    fn process_moov(&mut self, payload: &[u8]) -> FengResult<()> {
        let mut moov = MovieBox::default();
        let mut buf = BoxBuffer::reader(payload);
        if let Err(e) = moov.read_write(&mut buf) {
            return Err(self.fail(format!("moov 解析失败: {e}")));
        }

        let mut infos = Vec::new();
        for trak in &moov.tracks {
            let (info, context) = self.extract_track(trak)?;
            infos.push(Arc::new(info));
            self.tracks.insert(context.track_id, context);
        }

        // trex 默认值并入轨道上下文
        if let Some(mvex) = &moov.extends {
            for trex in &mvex.tracks {
                if let Some(ctx) = self.tracks.get_mut(&trex.track_id) {
                    ctx.default_sample_duration = trex.default_sample_duration;
                    ctx.default_sample_flags = trex.default_sample_flags;
                    ctx.default_sample_size = trex.default_sample_size;
                }
            }
        }

        // 非分片轨道: 展开采样表
        for trak in &moov.tracks {
            self.expand_sample_table(trak)?;
        }
        self.pending.sort_by_key(|s| s.offset);

        if !self.init_sent {
            self.init_sent = true;
            if let Some(cb) = self.callbacks.as_mut() {
                (cb.on_init)(&infos);
            }
        }
        Ok(())
    }

    /// 从 trak 提取流信息与解析上下文
    fn extract_track(&mut self, trak: &TrackBox) -> FengResult<(StreamInfo, TrackContext)> {
        let track_id = trak.header.track_id;
        let timescale = trak.media.header.timescale;
        let stbl = &trak.media.information.sample_table;
        let entry = stbl
            .description
            .entries
            .first()
            .ok_or_else(|| FengError::ParserFailure(format!("轨道 {track_id} 无采样描述")))?;

        let mut context = TrackContext {
            track_id,
            timescale,
            default_sample_duration: 0,
            default_sample_flags: 0,
            default_sample_size: 0,
            scheme: None,
            default_kid: [0u8; 16],
            per_sample_iv_size: 0,
            constant_iv: Vec::new(),
        };

        let kind_and_codec = match entry {
            SampleEntry::Visual(v) => {
                let mut nalu_length_size = 0u8;
                let (codec, codec_string, extra_data) = match v.codec_config.as_ref() {
                    Some(cfg) if &cfg.box_type == b"avcC" => {
                        let record = AvcDecoderConfigurationRecord::parse(&cfg.data)?;
                        nalu_length_size = record.nalu_length_size;
                        (Codec::H264, record.codec_string(), cfg.data.clone())
                    }
                    Some(cfg) if &cfg.box_type == b"hvcC" => {
                        let record = HevcDecoderConfigurationRecord::parse(&cfg.data)?;
                        nalu_length_size = record.nalu_length_size;
                        (Codec::H265, record.codec_string(), cfg.data.clone())
                    }
                    Some(cfg) if &cfg.box_type == b"vpcC" => {
                        let record = VpCodecConfigurationRecord::parse(&cfg.data)?;
                        (Codec::Vp9, record.codec_string(), cfg.data.clone())
                    }
                    _ => (Codec::Unknown, String::new(), Vec::new()),
                };
                if let Some(sinf) = &v.sinf {
                    self.fill_protection(&mut context, sinf)?;
                }
                let (pixel_width, pixel_height) = v
                    .pixel_aspect
                    .as_ref()
                    .map(|p| (p.h_spacing, p.v_spacing))
                    .unwrap_or((1, 1));
                (
                    StreamKind::Video(VideoInfo {
                        width: u32::from(v.width),
                        height: u32::from(v.height),
                        pixel_width,
                        pixel_height,
                        nalu_length_size,
                        trick_play_factor: 0,
                    }),
                    codec,
                    codec_string,
                    extra_data,
                )
            }
            SampleEntry::Audio(a) => {
                let (codec, codec_string, extra_data, channels, frequency) = if let Some(esds) =
                    &a.esds
                {
                    let asc = extract_audio_specific_config(&esds.descriptor)?;
                    let config = AudioSpecificConfig::parse(&asc)?;
                    (
                        Codec::Aac,
                        config.codec_string(),
                        asc,
                        config.output_channels(),
                        config.output_frequency(),
                    )
                } else if a.codec_config.as_ref().is_some_and(|c| &c.box_type == b"dOps") {
                    let data = a.codec_config.as_ref().unwrap().data.clone();
                    (
                        Codec::Opus,
                        "opus".to_string(),
                        data,
                        a.channel_count as u8,
                        a.sample_rate,
                    )
                } else {
                    (
                        Codec::Unknown,
                        String::new(),
                        Vec::new(),
                        a.channel_count as u8,
                        a.sample_rate,
                    )
                };
                if let Some(sinf) = &a.sinf {
                    self.fill_protection(&mut context, sinf)?;
                }
                (
                    StreamKind::Audio(AudioInfo {
                        sample_bits: a.sample_size as u8,
                        channels,
                        sampling_frequency: frequency,
                        max_bitrate: 0,
                        avg_bitrate: 0,
                    }),
                    codec,
                    codec_string,
                    extra_data,
                )
            }
            SampleEntry::Text(t) => (
                StreamKind::Text(TextInfo {
                    width: 0,
                    height: 0,
                    codec_config: t.config.config.as_bytes().to_vec(),
                }),
                Codec::Webvtt,
                "wvtt".to_string(),
                t.config.config.as_bytes().to_vec(),
            ),
            SampleEntry::Unknown(cc, _) => {
                return Err(FengError::ParserFailure(format!(
                    "轨道 {track_id} 采样条目 {} 不支持",
                    fourcc_str(cc)
                )));
            }
        };
        let (kind, codec, codec_string, extra_data) = kind_and_codec;

        let info = StreamInfo {
            track_id,
            time_scale: timescale,
            duration: trak.media.header.duration,
            codec,
            codec_string,
            language: shortest_language(&trak.media.header.language),
            is_encrypted: context.scheme.is_some(),
            extra_data,
            kind,
        };
        Ok((info, context))
    }

    fn fill_protection(
        &self,
        context: &mut TrackContext,
        sinf: &crate::boxes::ProtectionSchemeInfoBox,
    ) -> FengResult<()> {
        let scheme = match &sinf.scheme_type.scheme_type {
            b"cenc" => ProtectionScheme::Cenc,
            b"cbc1" => ProtectionScheme::Cbc1,
            b"cens" => ProtectionScheme::Cens,
            b"cbcs" => ProtectionScheme::Cbcs,
            other => {
                return Err(FengError::ParserFailure(format!(
                    "未知保护方案 {}",
                    fourcc_str(other)
                )))
            }
        };
        let tenc = &sinf.info.track_encryption;
        context.scheme = Some(scheme);
        context.default_kid = tenc.default_kid;
        context.per_sample_iv_size = tenc.default_per_sample_iv_size;
        context.constant_iv = tenc.default_constant_iv.clone();
        Ok(())
    }

    /// 展开非分片采样表为待发射采样
    fn expand_sample_table(&mut self, trak: &TrackBox) -> FengResult<()> {
        let track_id = trak.header.track_id;
        let stbl = &trak.media.information.sample_table;
        let sizes = &stbl.sample_size;
        let sample_count = if sizes.constant_size > 0 {
            // stts 总数
            stbl.time_to_sample
                .entries
                .iter()
                .map(|e| e.sample_count as usize)
                .sum()
        } else {
            sizes.sizes.len()
        };
        if sample_count == 0 {
            return Ok(()); // 分片布局
        }

        // stts → 每采样 dts 与时长
        let mut dts_list = Vec::with_capacity(sample_count);
        let mut durations = Vec::with_capacity(sample_count);
        let mut dts = 0i64;
        for entry in &stbl.time_to_sample.entries {
            for _ in 0..entry.sample_count {
                dts_list.push(dts);
                durations.push(u64::from(entry.sample_delta));
                dts += i64::from(entry.sample_delta);
            }
        }
        if dts_list.len() != sample_count {
            return Err(self.fail(format!("轨道 {track_id} stts 与 stsz 数量不一致")));
        }

        // ctts → pts 偏移
        let mut cts_offsets = vec![0i32; sample_count];
        if let Some(ctts) = &stbl.composition_offset {
            let mut index = 0usize;
            for entry in &ctts.entries {
                for _ in 0..entry.sample_count {
                    if index < sample_count {
                        cts_offsets[index] = entry.sample_offset;
                    }
                    index += 1;
                }
            }
        }

        // stss → 关键帧 (缺失时全部为同步点)
        let key_frames: Option<std::collections::HashSet<u32>> = stbl
            .sync_sample
            .as_ref()
            .map(|s| s.sample_numbers.iter().copied().collect());

        // stsc + stco → 每采样偏移
        let chunk_offsets = &stbl.chunk_offset.offsets;
        let stsc = &stbl.sample_to_chunk.entries;
        let mut sample_index = 0usize;
        for (chunk_index, chunk_offset) in chunk_offsets.iter().enumerate() {
            let chunk_number = chunk_index as u32 + 1;
            // 当前块适用的 stsc 条目
            let samples_in_chunk = stsc
                .iter()
                .rev()
                .find(|e| e.first_chunk <= chunk_number)
                .map(|e| e.samples_per_chunk)
                .unwrap_or(0);
            let mut offset = *chunk_offset;
            for _ in 0..samples_in_chunk {
                if sample_index >= sample_count {
                    break;
                }
                let size = if sizes.constant_size > 0 {
                    sizes.constant_size
                } else {
                    sizes.sizes[sample_index]
                };
                let is_key = key_frames
                    .as_ref()
                    .map(|k| k.contains(&(sample_index as u32 + 1)))
                    .unwrap_or(true);
                self.pending.push(PendingSample {
                    offset,
                    size,
                    track_id,
                    dts: dts_list[sample_index],
                    pts: dts_list[sample_index] + i64::from(cts_offsets[sample_index]),
                    duration: durations[sample_index],
                    is_key_frame: is_key,
                    encryption_config: None,
                });
                offset += u64::from(size);
                sample_index += 1;
            }
        }
        Ok(())
    }

    /// 处理 moof: 展开 trun 为待发射采样
    fn process_moof(&mut self, payload: &[u8], box_start: u64) -> FengResult<()> {
        let mut moof = MovieFragmentBox::default();
        let mut buf = BoxBuffer::reader(payload);
        if let Err(e) = moof.read_write(&mut buf) {
            return Err(self.fail(format!("moof 解析失败: {e}")));
        }

        for traf in &moof.tracks {
            let track_id = traf.header.track_id;
            // 上下文字段拷出, 避免与 pending 的可变借用冲突
            let (scheme, default_kid, per_sample_iv_size, constant_iv, trex_defaults) =
                match self.tracks.get(&track_id) {
                    Some(c) => (
                        c.scheme,
                        c.default_kid,
                        c.per_sample_iv_size,
                        c.constant_iv.clone(),
                        (
                            c.default_sample_duration,
                            c.default_sample_size,
                            c.default_sample_flags,
                        ),
                    ),
                    None => {
                        return Err(self.fail(format!("moof 引用未知轨道 {track_id}")));
                    }
                };

            // senc: 以 tenc 的 IV 大小解析
            let senc = match &traf.raw_sample_encryption {
                Some(raw) if scheme.is_some() => Some(SampleEncryptionBox::parse_with_iv_size(
                    raw,
                    per_sample_iv_size,
                )?),
                _ => None,
            };

            let default_duration = if traf.header.flags & TrackFragmentHeaderBox::FLAG_DEFAULT_DURATION != 0 {
                traf.header.default_sample_duration
            } else {
                trex_defaults.0
            };
            let default_size = if traf.header.flags & TrackFragmentHeaderBox::FLAG_DEFAULT_SIZE != 0 {
                traf.header.default_sample_size
            } else {
                trex_defaults.1
            };
            let default_flags = if traf.header.flags & TrackFragmentHeaderBox::FLAG_DEFAULT_FLAGS != 0 {
                traf.header.default_sample_flags
            } else {
                trex_defaults.2
            };

            let mut dts = traf
                .decode_time
                .as_ref()
                .map(|t| t.base_media_decode_time as i64)
                .unwrap_or(0);
            let mut senc_index = 0usize;

            for run in &traf.runs {
                // default-base-is-moof: 偏移相对 moof 起点
                let mut offset = box_start.wrapping_add_signed(i64::from(run.data_offset));
                for entry in run_entries(run, default_duration, default_size, default_flags) {
                    let encryption_config = senc.as_ref().and_then(|s| {
                        s.entries.get(senc_index).map(|e| EncryptionConfig {
                            scheme: scheme.unwrap_or(ProtectionScheme::Cenc),
                            iv: if e.iv.is_empty() {
                                constant_iv.clone()
                            } else {
                                e.iv.clone()
                            },
                            key_id: default_kid,
                            subsamples: e
                                .subsamples
                                .iter()
                                .map(|(c, p)| SubsampleEntry::new(*c, *p))
                                .collect(),
                        })
                    });
                    senc_index += 1;

                    self.pending.push(PendingSample {
                        offset,
                        size: entry.size,
                        track_id,
                        dts,
                        pts: dts + i64::from(entry.cts_offset),
                        duration: u64::from(entry.duration),
                        is_key_frame: entry.flags & 0x0001_0000 == 0,
                        encryption_config,
                    });
                    offset += u64::from(entry.size);
                    dts += i64::from(entry.duration);
                }
            }
        }
        self.pending.sort_by_key(|s| s.offset);
        Ok(())
    }

    /// 发射缓冲区已覆盖的待发射采样
    fn emit_available(&mut self) -> FengResult<()> {
        let buffer_end = self.buffer_start + self.buffer.len() as u64;
        loop {
            let (offset, size) = match self.pending.first() {
                Some(f) => (f.offset, f.size),
                None => break,
            };
            if offset < self.buffer_start {
                return Err(self.fail(format!(
                    "采样偏移 {offset} 已被丢弃 (缓冲起点 {}), 输入非渐进式布局",
                    self.buffer_start
                )));
            }
            if offset + u64::from(size) > buffer_end {
                break;
            }
            let sample_ref = self.pending.remove(0);
            let start = (sample_ref.offset - self.buffer_start) as usize;
            let data =
                Bytes::copy_from_slice(&self.buffer[start..start + sample_ref.size as usize]);
            let mut sample = MediaSample::new(
                sample_ref.dts,
                sample_ref.pts,
                sample_ref.is_key_frame,
                data,
            );
            sample.duration = sample_ref.duration;
            sample.encryption_config = sample_ref.encryption_config;

            if let Some(cb) = self.callbacks.as_mut() {
                if !(cb.on_sample)(sample_ref.track_id, sample) {
                    return Err(FengError::Cancelled);
                }
            }
        }
        Ok(())
    }

    /// 丢弃已消费的缓冲前缀
    fn trim_buffer(&mut self) {
        let keep_from = self
            .pending
            .first()
            .map(|s| s.offset)
            .unwrap_or(self.scan_pos)
            .min(self.scan_pos);
        if keep_from > self.buffer_start {
            let drop = (keep_from - self.buffer_start) as usize;
            self.buffer.drain(..drop);
            self.buffer_start = keep_from;
        }
    }
}

struct RunEntryView {
    duration: u32,
    size: u32,
    flags: u32,
    cts_offset: i32,
}

fn run_entries(
    run: &TrackRunBox,
    default_duration: u32,
    default_size: u32,
    default_flags: u32,
) -> Vec<RunEntryView> {
    let mut out = Vec::with_capacity(run.sample_count as usize);
    for (i, entry) in run.entries.iter().enumerate() {
        let mut flags = if run.flags & TrackRunBox::FLAG_SAMPLE_FLAGS != 0 {
            entry.sample_flags
        } else {
            default_flags
        };
        if i == 0 && run.flags & TrackRunBox::FLAG_FIRST_SAMPLE_FLAGS != 0 {
            flags = entry.sample_flags;
        }
        out.push(RunEntryView {
            duration: if run.flags & TrackRunBox::FLAG_SAMPLE_DURATION != 0 {
                entry.sample_duration
            } else {
                default_duration
            },
            size: if run.flags & TrackRunBox::FLAG_SAMPLE_SIZE != 0 {
                entry.sample_size
            } else {
                default_size
            },
            flags,
            cts_offset: entry.sample_composition_time_offset,
        });
    }
    out
}

/// 从 esds ES_Descriptor 中抽取 AudioSpecificConfig (DecoderSpecificInfo)
fn extract_audio_specific_config(descriptor: &[u8]) -> FengResult<Vec<u8>> {
    // MPEG-4 描述符: tag(1) + 变长长度 + 负载
    fn read_descriptor<'a>(r: &mut BufferReader<'a>) -> FengResult<(u8, &'a [u8])> {
        let tag = r.read_u8()?;
        let mut size = 0usize;
        for _ in 0..4 {
            let b = r.read_u8()?;
            size = (size << 7) | (b & 0x7F) as usize;
            if b & 0x80 == 0 {
                break;
            }
        }
        Ok((tag, r.read_bytes(size)?))
    }

    let mut r = BufferReader::new(descriptor);
    let (tag, es_payload) = read_descriptor(&mut r)?;
    if tag != 0x03 {
        return Err(FengError::ParserFailure(format!("esds 顶层标签非法: {tag}")));
    }
    let mut es = BufferReader::new(es_payload);
    es.skip(2)?; // ES_ID
    let flags = es.read_u8()?;
    if flags & 0x80 != 0 {
        es.skip(2)?; // dependsOn_ES_ID
    }
    if flags & 0x40 != 0 {
        let url_len = es.read_u8()? as usize;
        es.skip(url_len)?;
    }
    let (tag, dc_payload) = read_descriptor(&mut es)?;
    if tag != 0x04 {
        return Err(FengError::ParserFailure("esds 缺少 DecoderConfigDescriptor".into()));
    }
    let mut dc = BufferReader::new(dc_payload);
    dc.skip(13)?; // objectType + streamType + bufferSize + bitrates
    let (tag, dsi) = read_descriptor(&mut dc)?;
    if tag != 0x05 {
        return Err(FengError::ParserFailure("esds 缺少 DecoderSpecificInfo".into()));
    }
    Ok(dsi.to_vec())
}

/// 构建 esds ES_Descriptor (AAC)
pub fn build_esds_descriptor(audio_specific_config: &[u8], avg_bitrate: u32) -> Vec<u8> {
    fn push_descriptor(out: &mut Vec<u8>, tag: u8, payload: &[u8]) {
        out.push(tag);
        // 单字节长度足够 (配置极小)
        out.push(payload.len() as u8);
        out.extend_from_slice(payload);
    }

    let mut dsi = Vec::new();
    push_descriptor(&mut dsi, 0x05, audio_specific_config);

    let mut dc = Vec::new();
    dc.push(0x40); // objectTypeIndication = MPEG-4 Audio
    dc.push(0x15); // streamType = Audio, upStream=0, reserved=1
    dc.extend_from_slice(&[0, 0, 0]); // bufferSizeDB
    dc.extend_from_slice(&avg_bitrate.to_be_bytes()); // maxBitrate
    dc.extend_from_slice(&avg_bitrate.to_be_bytes()); // avgBitrate
    dc.extend_from_slice(&dsi);

    let mut es = Vec::new();
    es.extend_from_slice(&[0, 0]); // ES_ID
    es.push(0); // flags
    let mut dc_wrapped = Vec::new();
    push_descriptor(&mut dc_wrapped, 0x04, &dc);
    es.extend_from_slice(&dc_wrapped);
    // SLConfigDescriptor
    push_descriptor(&mut es, 0x06, &[0x02]);

    let mut out = Vec::new();
    push_descriptor(&mut out, 0x03, &es);
    out
}

impl MediaParser for Mp4Parser {
    fn init(&mut self, callbacks: ParserCallbacks, _key_source: Option<Arc<dyn KeySource>>) {
        self.callbacks = Some(callbacks);
    }

    fn parse(&mut self, data: &[u8]) -> FengResult<()> {
        if self.failed {
            return Err(FengError::ParserFailure("解析器已失败".into()));
        }
        self.buffer.extend_from_slice(data);

        loop {
            match self.state {
                ScanState::InMdat { end } => {
                    self.emit_available()?;
                    let buffer_end = self.buffer_start + self.buffer.len() as u64;
                    if buffer_end < end {
                        if !self.pending.iter().any(|s| s.offset < end) {
                            // mdat 无人引用, 允许字节直接流过
                            self.scan_pos = buffer_end;
                        }
                        self.trim_buffer();
                        return Ok(());
                    }
                    self.scan_pos = end;
                    self.state = ScanState::TopLevel;
                }
                ScanState::TopLevel => {
                    let rel = (self.scan_pos - self.buffer_start) as usize;
                    if self.buffer.len() < rel + 8 {
                        self.trim_buffer();
                        return Ok(());
                    }
                    let mut r = BufferReader::new(&self.buffer[rel..]);
                    let header = match BoxHeader::read(&mut r) {
                        Ok(h) => h,
                        Err(FengError::EndOfStream) => {
                            self.trim_buffer();
                            return Ok(());
                        }
                        Err(e) => return Err(self.fail(e.to_string())),
                    };
                    if header.size == 0 {
                        return Err(self.fail("不支持大小为 0 的顶层 box"));
                    }

                    if &header.fourcc == b"mdat" {
                        self.state = ScanState::InMdat {
                            end: self.scan_pos + header.size,
                        };
                        self.scan_pos += header.header_size;
                        continue;
                    }

                    let total = header.size as usize;
                    if self.buffer.len() < rel + total {
                        self.trim_buffer();
                        return Ok(());
                    }
                    let payload = self.buffer
                        [rel + header.header_size as usize..rel + total]
                        .to_vec();
                    let box_start = self.scan_pos;
                    self.scan_pos += header.size;
                    self.process_box(header.fourcc, &payload, box_start)?;
                    self.emit_available()?;
                    self.trim_buffer();
                }
            }
        }
    }

    fn flush(&mut self) -> FengResult<()> {
        self.emit_available()?;
        if !self.pending.is_empty() {
            return Err(self.fail(format!("输入结束但仍有 {} 个采样未到齐", self.pending.len())));
        }
        Ok(())
    }
}
