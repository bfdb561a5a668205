//! MPEG-TS (Transport Stream) 解析器.
//!
//! 188 字节定长包; PAT → PMT → PES 重组. 支持 ADTS 封装的 AAC 与
//! Annex-B 字节流封装的 H.264/H.265 (输出统一转为 4 字节长度前缀,
//! 参数集提升到编解码器配置中).
//!
//! # TS 包结构 (188 字节)
//! ```text
//! 同步字节 0x47 (1) | TEI+PUSI+Priority+PID (2) | TSC+AFC+CC (1)
//! [Adaptation Field] | [Payload]
//! ```
//! 关键 PID: 0x0000 = PAT, 0x1FFF = 填充.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use feng_core::{FengError, FengResult};
use feng_crypto::KeySource;

use crate::codecs::aac::AdtsHeader;
use crate::codecs::avc::AvcDecoderConfigurationRecord;
use crate::codecs::nalu::{H264NaluType, NaluReader};
use crate::parser::{MediaParser, ParserCallbacks};
use crate::sample::MediaSample;
use crate::stream_info::{AudioInfo, Codec, StreamInfo, StreamKind, VideoInfo};

/// TS 包大小
const TS_PACKET_SIZE: usize = 188;
/// TS 同步字节
const TS_SYNC_BYTE: u8 = 0x47;
/// PAT PID
const PID_PAT: u16 = 0x0000;
/// 空包 PID
const PID_NULL: u16 = 0x1FFF;
/// TS 时钟 (90 kHz)
const TS_TIMESCALE: u32 = 90000;

/// PES 重组缓冲区
struct PesBuffer {
    data: Vec<u8>,
    pts: i64,
    dts: i64,
}

impl PesBuffer {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            pts: -1,
            dts: -1,
        }
    }
}

/// 基本流类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EsKind {
    AdtsAac,
    H264,
}

/// 每个基本流的装配状态
struct EsContext {
    track_id: u32,
    kind: EsKind,
    pes: PesBuffer,
    /// H.264: 收集到的 SPS/PPS
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    /// AAC: 从首帧 ADTS 头得到的配置
    audio_config: Option<AdtsHeader>,
    /// 就绪前滞留的采样
    held: Vec<MediaSample>,
    ready: bool,
}

impl EsContext {
    fn new(track_id: u32, kind: EsKind) -> Self {
        Self {
            track_id,
            kind,
            pes: PesBuffer::new(),
            sps: None,
            pps: None,
            audio_config: None,
            held: Vec::new(),
            ready: false,
        }
    }
}

/// MPEG-TS 解析器
pub struct TsParser {
    callbacks: Option<ParserCallbacks>,
    /// 未消费的输入 (188 对齐)
    buffer: Vec<u8>,
    pmt_pid: Option<u16>,
    streams: HashMap<u16, EsContext>,
    init_sent: bool,
    failed: bool,
}

impl Default for TsParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TsParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self {
            callbacks: None,
            buffer: Vec::new(),
            pmt_pid: None,
            streams: HashMap::new(),
            init_sent: false,
            failed: false,
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> FengError {
        self.failed = true;
        FengError::ParserFailure(msg.into())
    }

    /// 解析 PAT, 取第一个节目的 PMT PID
    fn parse_pat(&mut self, payload: &[u8]) -> FengResult<()> {
        if self.pmt_pid.is_some() {
            return Ok(());
        }
        let table = skip_pointer_field(payload)?;
        if table.len() < 12 {
            return Err(self.fail("PAT 过短"));
        }
        let section_length = ((table[1] as usize & 0xF) << 8) | table[2] as usize;
        let entries_end = (3 + section_length).saturating_sub(4).min(table.len());
        let mut pos = 8;
        while pos + 4 <= entries_end {
            let program = (u16::from(table[pos]) << 8) | u16::from(table[pos + 1]);
            let pid = ((u16::from(table[pos + 2]) & 0x1F) << 8) | u16::from(table[pos + 3]);
            if program != 0 {
                debug!("TS: 节目 {program} → PMT PID {pid:#06x}");
                self.pmt_pid = Some(pid);
                break;
            }
            pos += 4;
        }
        Ok(())
    }

    /// 解析 PMT, 注册基本流
    fn parse_pmt(&mut self, payload: &[u8]) -> FengResult<()> {
        if !self.streams.is_empty() {
            return Ok(());
        }
        let table = skip_pointer_field(payload)?;
        if table.len() < 12 {
            return Err(self.fail("PMT 过短"));
        }
        let section_length = ((table[1] as usize & 0xF) << 8) | table[2] as usize;
        let section_end = (3 + section_length).saturating_sub(4).min(table.len());
        let program_info_length = ((table[10] as usize & 0xF) << 8) | table[11] as usize;
        let mut pos = 12 + program_info_length;
        let mut next_track_id = 1u32;

        while pos + 5 <= section_end {
            let stream_type = table[pos];
            let pid = ((u16::from(table[pos + 1]) & 0x1F) << 8) | u16::from(table[pos + 2]);
            let es_info_length = ((table[pos + 3] as usize & 0xF) << 8) | table[pos + 4] as usize;
            pos += 5 + es_info_length;

            let kind = match stream_type {
                0x0F => Some(EsKind::AdtsAac),
                0x1B => Some(EsKind::H264),
                other => {
                    warn!("TS: 忽略 stream_type {other:#04x} (PID {pid:#06x})");
                    None
                }
            };
            if let Some(kind) = kind {
                self.streams.insert(pid, EsContext::new(next_track_id, kind));
                next_track_id += 1;
            }
        }
        if self.streams.is_empty() {
            return Err(self.fail("PMT 无可用基本流"));
        }
        Ok(())
    }

    /// 处理一个 188 字节 TS 包
    fn process_packet(&mut self, pkt: &[u8]) -> FengResult<()> {
        let pid = ((u16::from(pkt[1]) & 0x1F) << 8) | u16::from(pkt[2]);
        if pid == PID_NULL {
            return Ok(());
        }
        let pusi = pkt[1] & 0x40 != 0;
        let afc = (pkt[3] >> 4) & 0x3;

        let mut offset = 4usize;
        if afc & 0x2 != 0 {
            // adaptation field
            let af_len = pkt[4] as usize;
            offset += 1 + af_len;
        }
        if afc & 0x1 == 0 || offset >= TS_PACKET_SIZE {
            return Ok(());
        }
        let payload = &pkt[offset..];

        if pid == PID_PAT {
            if pusi {
                let payload = payload.to_vec();
                self.parse_pat(&payload)?;
            }
            return Ok(());
        }
        if Some(pid) == self.pmt_pid {
            if pusi {
                let payload = payload.to_vec();
                self.parse_pmt(&payload)?;
            }
            return Ok(());
        }

        if !self.streams.contains_key(&pid) {
            return Ok(());
        }
        if pusi {
            self.flush_pes(pid)?;
            let payload = payload.to_vec();
            self.start_pes(pid, &payload)?;
        } else if let Some(ctx) = self.streams.get_mut(&pid) {
            ctx.pes.data.extend_from_slice(payload);
        }
        self.try_send_init()?;
        Ok(())
    }

    /// PES 头解析并开始新 PES
    fn start_pes(&mut self, pid: u16, payload: &[u8]) -> FengResult<()> {
        if payload.len() < 9 || payload[0] != 0 || payload[1] != 0 || payload[2] != 1 {
            return Err(self.fail("PES 起始码错误"));
        }
        let pts_dts_flags = payload[7] >> 6;
        let header_length = payload[8] as usize;
        let data_start = 9 + header_length;
        if data_start > payload.len() {
            return Err(self.fail("PES 头长度越界"));
        }

        let mut pts = -1i64;
        let mut dts = -1i64;
        if pts_dts_flags & 0x2 != 0 && payload.len() >= 14 {
            pts = decode_pes_timestamp(&payload[9..14]);
            dts = pts;
        }
        if pts_dts_flags & 0x1 != 0 && payload.len() >= 19 {
            dts = decode_pes_timestamp(&payload[14..19]);
        }

        if let Some(ctx) = self.streams.get_mut(&pid) {
            ctx.pes.pts = pts;
            ctx.pes.dts = dts;
            ctx.pes.data.clear();
            ctx.pes.data.extend_from_slice(&payload[data_start..]);
        }
        Ok(())
    }

    /// 完成一个 PES, 切分为采样
    fn flush_pes(&mut self, pid: u16) -> FengResult<()> {
        let Some(ctx) = self.streams.get_mut(&pid) else {
            return Ok(());
        };
        if ctx.pes.data.is_empty() || ctx.pes.pts < 0 {
            return Ok(());
        }
        let data = std::mem::take(&mut ctx.pes.data);
        let pts = ctx.pes.pts;
        let dts = if ctx.pes.dts >= 0 { ctx.pes.dts } else { pts };

        match ctx.kind {
            EsKind::AdtsAac => Self::process_adts(ctx, &data, dts)?,
            EsKind::H264 => Self::process_h264_au(ctx, &data, dts, pts)?,
        }
        self.emit_ready_samples(pid)?;
        Ok(())
    }

    /// ADTS 负载切帧
    fn process_adts(ctx: &mut EsContext, data: &[u8], first_dts: i64) -> FengResult<()> {
        let mut pos = 0usize;
        let mut dts = first_dts;
        while pos < data.len() {
            let Some(header) = AdtsHeader::parse(&data[pos..])? else {
                break;
            };
            if pos + header.frame_size > data.len() {
                break; // 跨 PES 的帧: 留给下一个 PES 极少见, 直接丢弃尾部
            }
            if ctx.audio_config.is_none() {
                ctx.audio_config = Some(header);
                ctx.ready = true;
            }
            let frame =
                &data[pos + header.header_size..pos + header.frame_size];
            let duration =
                u64::from(1024 * TS_TIMESCALE / header.sampling_frequency().max(1));
            let mut sample = MediaSample::new(dts, dts, true, Bytes::copy_from_slice(frame));
            sample.duration = duration;
            ctx.held.push(sample);
            dts += duration as i64;
            pos += header.frame_size;
        }
        Ok(())
    }

    /// H.264 访问单元: 提升参数集, 转长度前缀
    fn process_h264_au(ctx: &mut EsContext, data: &[u8], dts: i64, pts: i64) -> FengResult<()> {
        let mut reader = NaluReader::new(data, 0)?;
        let mut converted = Vec::with_capacity(data.len());
        let mut is_key = false;
        while let Some(nalu) = reader.next()? {
            match H264NaluType::from_header(nalu.header()) {
                H264NaluType::Aud => continue,
                H264NaluType::Sps => {
                    ctx.sps = Some(nalu.data.to_vec());
                    continue;
                }
                H264NaluType::Pps => {
                    ctx.pps = Some(nalu.data.to_vec());
                    continue;
                }
                H264NaluType::IdrSlice => is_key = true,
                _ => {}
            }
            converted.extend_from_slice(&(nalu.data.len() as u32).to_be_bytes());
            converted.extend_from_slice(nalu.data);
        }
        if converted.is_empty() {
            return Ok(());
        }
        if ctx.sps.is_some() && ctx.pps.is_some() {
            ctx.ready = true;
        }
        let sample = MediaSample::new(dts, pts, is_key, Bytes::from(converted));
        ctx.held.push(sample);
        Ok(())
    }

    /// 全部流就绪后发射 init
    fn try_send_init(&mut self) -> FengResult<()> {
        if self.init_sent || self.streams.is_empty() {
            return Ok(());
        }
        if !self.streams.values().all(|c| c.ready) {
            return Ok(());
        }

        let mut infos = Vec::new();
        for ctx in self.streams.values() {
            let info = match ctx.kind {
                EsKind::H264 => {
                    let sps = ctx.sps.clone().unwrap_or_default();
                    let pps = ctx.pps.clone().unwrap_or_default();
                    let parsed = crate::codecs::avc::parse_sps(&sps)?;
                    let record = AvcDecoderConfigurationRecord {
                        version: 1,
                        profile_indication: sps.get(1).copied().unwrap_or(0),
                        profile_compatibility: sps.get(2).copied().unwrap_or(0),
                        level_indication: sps.get(3).copied().unwrap_or(0),
                        nalu_length_size: 4,
                        sps_list: vec![sps],
                        pps_list: vec![pps],
                    };
                    StreamInfo {
                        track_id: ctx.track_id,
                        time_scale: TS_TIMESCALE,
                        duration: 0,
                        codec: Codec::H264,
                        codec_string: record.codec_string(),
                        language: String::new(),
                        is_encrypted: false,
                        extra_data: record.serialize(),
                        kind: StreamKind::Video(VideoInfo {
                            width: parsed.width,
                            height: parsed.height,
                            pixel_width: 1,
                            pixel_height: 1,
                            nalu_length_size: 4,
                            trick_play_factor: 0,
                        }),
                    }
                }
                EsKind::AdtsAac => {
                    let header = ctx.audio_config.as_ref().expect("就绪流必有配置");
                    let asc = header.audio_specific_config();
                    StreamInfo {
                        track_id: ctx.track_id,
                        time_scale: TS_TIMESCALE,
                        duration: 0,
                        codec: Codec::Aac,
                        codec_string: format!("mp4a.40.{}", header.profile + 1),
                        language: String::new(),
                        is_encrypted: false,
                        extra_data: asc,
                        kind: StreamKind::Audio(AudioInfo {
                            sample_bits: 16,
                            channels: header.channel_config,
                            sampling_frequency: header.sampling_frequency(),
                            max_bitrate: 0,
                            avg_bitrate: 0,
                        }),
                    }
                }
            };
            infos.push(Arc::new(info));
        }
        infos.sort_by_key(|i| i.track_id);

        self.init_sent = true;
        if let Some(cb) = self.callbacks.as_mut() {
            (cb.on_init)(&infos);
        }
        // 放出所有滞留采样
        let pids: Vec<u16> = self.streams.keys().copied().collect();
        for pid in pids {
            self.emit_ready_samples(pid)?;
        }
        Ok(())
    }

    fn emit_ready_samples(&mut self, pid: u16) -> FengResult<()> {
        if !self.init_sent {
            return Ok(());
        }
        let Some(ctx) = self.streams.get_mut(&pid) else {
            return Ok(());
        };
        let track_id = ctx.track_id;
        let held = std::mem::take(&mut ctx.held);
        if let Some(cb) = self.callbacks.as_mut() {
            for sample in held {
                if !(cb.on_sample)(track_id, sample) {
                    return Err(FengError::Cancelled);
                }
            }
        }
        Ok(())
    }
}

/// PSI 表前的 pointer_field 跳过
fn skip_pointer_field(payload: &[u8]) -> FengResult<&[u8]> {
    let pointer = *payload
        .first()
        .ok_or_else(|| FengError::ParserFailure("PSI 负载为空".into()))? as usize;
    payload
        .get(1 + pointer..)
        .ok_or_else(|| FengError::ParserFailure("PSI pointer_field 越界".into()))
}

/// 解码 PES 33 位时间戳
fn decode_pes_timestamp(bytes: &[u8]) -> i64 {
    let b = bytes;
    (((b[0] as i64 >> 1) & 0x7) << 30)
        | ((b[1] as i64) << 22)
        | (((b[2] as i64 >> 1) & 0x7F) << 15)
        | ((b[3] as i64) << 7)
        | ((b[4] as i64 >> 1) & 0x7F)
}

impl MediaParser for TsParser {
    fn init(&mut self, callbacks: ParserCallbacks, _key_source: Option<Arc<dyn KeySource>>) {
        self.callbacks = Some(callbacks);
    }

    fn parse(&mut self, data: &[u8]) -> FengResult<()> {
        if self.failed {
            return Err(FengError::ParserFailure("解析器已失败".into()));
        }
        self.buffer.extend_from_slice(data);

        let mut pos = 0usize;
        while self.buffer.len() - pos >= TS_PACKET_SIZE {
            if self.buffer[pos] != TS_SYNC_BYTE {
                // 重新同步
                match self.buffer[pos..].iter().position(|&b| b == TS_SYNC_BYTE) {
                    Some(skip) => {
                        warn!("TS: 丢弃 {skip} 字节以重新同步");
                        pos += skip;
                        continue;
                    }
                    None => {
                        pos = self.buffer.len();
                        break;
                    }
                }
            }
            let pkt = self.buffer[pos..pos + TS_PACKET_SIZE].to_vec();
            self.process_packet(&pkt)?;
            pos += TS_PACKET_SIZE;
        }
        self.buffer.drain(..pos);
        Ok(())
    }

    fn flush(&mut self) -> FengResult<()> {
        let pids: Vec<u16> = self.streams.keys().copied().collect();
        for pid in pids {
            self.flush_pes(pid)?;
        }
        self.try_send_init()?;
        let pids: Vec<u16> = self.streams.keys().copied().collect();
        for pid in pids {
            self.emit_ready_samples(pid)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pes_timestamp_decoding() {
        // PTS = 90000 (1 秒): 33 位值按 PES 编码
        let pts: i64 = 90000;
        let encoded = [
            0x21 | (((pts >> 30) & 0x7) as u8) << 1,
            ((pts >> 22) & 0xFF) as u8,
            0x01 | (((pts >> 15) & 0x7F) as u8) << 1,
            ((pts >> 7) & 0xFF) as u8,
            0x01 | ((pts & 0x7F) as u8) << 1,
        ];
        assert_eq!(decode_pes_timestamp(&encoded), 90000);
    }

    #[test]
    fn test_resync_on_garbage() {
        let mut parser = TsParser::new();
        parser.init(
            ParserCallbacks::media_only(Box::new(|_| {}), Box::new(|_, _| true)),
            None,
        );
        // 非 0x47 开头的垃圾 + 一个空包
        let mut data = vec![0x00, 0x11, 0x22];
        let mut null_packet = vec![0u8; TS_PACKET_SIZE];
        null_packet[0] = TS_SYNC_BYTE;
        null_packet[1] = 0x1F;
        null_packet[2] = 0xFF;
        data.extend_from_slice(&null_packet);
        parser.parse(&data).unwrap();
    }
}
