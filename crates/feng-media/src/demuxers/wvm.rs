//! WVM (遗留加密容器) 解析器.
//!
//! MPEG-2 PS 的专有衍生格式: pack/system 头之间夹带
//! - 索引负载 (private stream 2, TLV 元数据: 轨道参数、AVC 配置、ES 描述符)
//! - ECM 负载 (private stream 1, 携带资产 ID 与加密参数)
//! - 常规音视频 PES
//!
//! 密钥经由 `fetch_keys(AssetId)` 从密钥源拉取, ES 负载按 AES-CBC 解密后
//! 以明文采样下发 (视频字节流同时转为长度前缀形式).

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use feng_core::{BufferReader, FengError, FengResult};
use feng_crypto::{
    AesCbcDecryptor, CbcPadding, EncryptionKey, FetchRequest, KeySelector, KeySource, TrackType,
};

use crate::codecs::avc::AvcDecoderConfigurationRecord;
use crate::codecs::nalu::{H264NaluType, NaluReader};
use crate::parser::{MediaParser, ParserCallbacks};
use crate::sample::MediaSample;
use crate::stream_info::{AudioInfo, Codec, StreamInfo, StreamKind, VideoInfo};

/// PS 时钟 (90 kHz)
const WVM_TIMESCALE: u32 = 90000;

// 索引负载中的元数据标签 (TLV)
const TAG_TRACK_DURATION: u8 = 3;
const TAG_VIDEO_WIDTH: u8 = 11;
const TAG_VIDEO_HEIGHT: u8 = 12;
const TAG_VIDEO_TICKS_PER_FRAME: u8 = 13;
const TAG_AUDIO_NUM_CHANNELS: u8 = 17;
const TAG_AUDIO_SAMPLE_FREQUENCY: u8 = 18;
const TAG_AUDIO_ES_DESCRIPTOR: u8 = 38;
const TAG_AVC_DECODER_CONFIGURATION_RECORD: u8 = 39;

/// 组装中的 PES 采样
struct PendingEs {
    data: Vec<u8>,
    pts: i64,
    dts: i64,
}

/// WVM 解析器
pub struct WvmParser {
    callbacks: Option<ParserCallbacks>,
    key_source: Option<Arc<dyn KeySource>>,
    buffer: Vec<u8>,
    // 元数据
    duration: u64,
    video_width: u32,
    video_height: u32,
    video_frame_ticks: u32,
    audio_channels: u8,
    audio_frequency: u32,
    avc_config: Vec<u8>,
    audio_config: Vec<u8>,
    metadata_complete: bool,
    // 加密
    asset_id: Option<u32>,
    video_key: Option<EncryptionKey>,
    audio_key: Option<EncryptionKey>,
    // PES 组装
    video_pending: Option<PendingEs>,
    audio_pending: Option<PendingEs>,
    sps: Option<Vec<u8>>,
    pps: Option<Vec<u8>>,
    init_sent: bool,
    failed: bool,
}

impl Default for WvmParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WvmParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self {
            callbacks: None,
            key_source: None,
            buffer: Vec::new(),
            duration: 0,
            video_width: 0,
            video_height: 0,
            video_frame_ticks: 3750,
            audio_channels: 2,
            audio_frequency: 44100,
            avc_config: Vec::new(),
            audio_config: Vec::new(),
            metadata_complete: false,
            asset_id: None,
            video_key: None,
            audio_key: None,
            video_pending: None,
            audio_pending: None,
            sps: None,
            pps: None,
            init_sent: false,
            failed: false,
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> FengError {
        self.failed = true;
        FengError::ParserFailure(msg.into())
    }

    /// 索引负载: TLV 元数据
    fn process_index(&mut self, payload: &[u8]) -> FengResult<()> {
        let mut r = BufferReader::new(payload);
        while r.remaining() >= 5 {
            let tag = r.read_u8()?;
            let length = r.read_u32()? as usize;
            if r.remaining() < length {
                break;
            }
            let value = r.read_bytes(length)?;
            match tag {
                TAG_TRACK_DURATION => self.duration = read_uint_tlv(value),
                TAG_VIDEO_WIDTH => self.video_width = read_uint_tlv(value) as u32,
                TAG_VIDEO_HEIGHT => self.video_height = read_uint_tlv(value) as u32,
                TAG_VIDEO_TICKS_PER_FRAME => {
                    self.video_frame_ticks = read_uint_tlv(value) as u32
                }
                TAG_AUDIO_NUM_CHANNELS => self.audio_channels = read_uint_tlv(value) as u8,
                TAG_AUDIO_SAMPLE_FREQUENCY => {
                    self.audio_frequency = read_uint_tlv(value) as u32
                }
                TAG_AVC_DECODER_CONFIGURATION_RECORD => self.avc_config = value.to_vec(),
                TAG_AUDIO_ES_DESCRIPTOR => self.audio_config = value.to_vec(),
                other => debug!("WVM: 忽略元数据标签 {other}"),
            }
        }
        self.metadata_complete = !self.avc_config.is_empty() || !self.audio_config.is_empty();
        Ok(())
    }

    /// ECM 负载: 资产 ID → 拉取密钥
    fn process_ecm(&mut self, payload: &[u8]) -> FengResult<()> {
        if self.asset_id.is_some() {
            return Ok(());
        }
        if payload.len() < 8 {
            return Err(self.fail("ECM 负载过短"));
        }
        let asset_id = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        self.asset_id = Some(asset_id);

        let Some(key_source) = self.key_source.clone() else {
            return Err(self.fail("加密的 WVM 输入需要密钥源"));
        };
        key_source.fetch_keys(FetchRequest::AssetId(asset_id))?;

        let mut video_key = EncryptionKey::default();
        key_source.get_key(KeySelector::TrackType(TrackType::Sd), &mut video_key)?;
        self.video_key = Some(video_key);
        let mut audio_key = EncryptionKey::default();
        key_source.get_key(KeySelector::TrackType(TrackType::Audio), &mut audio_key)?;
        self.audio_key = Some(audio_key);
        debug!("WVM: 资产 {asset_id} 密钥就绪");
        Ok(())
    }

    fn decrypt_payload(&self, data: &[u8], is_video: bool) -> FengResult<Vec<u8>> {
        let key = if is_video {
            self.video_key.as_ref()
        } else {
            self.audio_key.as_ref()
        };
        let Some(key) = key else {
            return Ok(data.to_vec()); // 明文内容
        };
        let iv = key.iv.clone().unwrap_or_else(|| vec![0u8; 16]);
        // 尾部不足一个块的残余保持明文
        let whole = data.len() & !15;
        let decryptor = AesCbcDecryptor::new(&key.key, &iv, CbcPadding::None)?;
        let mut out = decryptor.decrypt(&data[..whole])?;
        out.extend_from_slice(&data[whole..]);
        Ok(out)
    }

    /// 完成一个视频访问单元
    fn finish_video(&mut self, pending: PendingEs) -> FengResult<()> {
        let clear = self.decrypt_payload(&pending.data, true)?;

        let mut converted = Vec::with_capacity(clear.len());
        let mut is_key = false;
        let mut reader = NaluReader::new(&clear, 0)?;
        while let Some(nalu) = reader.next()? {
            match H264NaluType::from_header(nalu.header()) {
                H264NaluType::Aud => continue,
                H264NaluType::Sps => {
                    self.sps = Some(nalu.data.to_vec());
                    continue;
                }
                H264NaluType::Pps => {
                    self.pps = Some(nalu.data.to_vec());
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
        let mut sample = MediaSample::new(pending.dts, pending.pts, is_key, Bytes::from(converted));
        sample.duration = u64::from(self.video_frame_ticks);
        self.try_send_init()?;
        self.emit(1, sample)
    }

    /// 完成一个音频采样
    fn finish_audio(&mut self, pending: PendingEs) -> FengResult<()> {
        let clear = self.decrypt_payload(&pending.data, false)?;
        let mut sample = MediaSample::new(pending.dts, pending.pts, true, Bytes::from(clear));
        sample.duration = u64::from(1024 * WVM_TIMESCALE / self.audio_frequency.max(1));
        self.try_send_init()?;
        self.emit(2, sample)
    }

    fn emit(&mut self, track_id: u32, sample: MediaSample) -> FengResult<()> {
        if !self.init_sent {
            return Ok(()); // 元数据不完整的输入: 丢弃前导采样
        }
        if let Some(cb) = self.callbacks.as_mut() {
            if !(cb.on_sample)(track_id, sample) {
                return Err(FengError::Cancelled);
            }
        }
        Ok(())
    }

    fn try_send_init(&mut self) -> FengResult<()> {
        if self.init_sent || !self.metadata_complete {
            return Ok(());
        }
        let mut infos = Vec::new();
        if !self.avc_config.is_empty() {
            let record = AvcDecoderConfigurationRecord::parse(&self.avc_config)?;
            infos.push(Arc::new(StreamInfo {
                track_id: 1,
                time_scale: WVM_TIMESCALE,
                duration: self.duration,
                codec: Codec::H264,
                codec_string: record.codec_string(),
                language: String::new(),
                is_encrypted: false, // 输出侧为已解密的明文
                extra_data: self.avc_config.clone(),
                kind: StreamKind::Video(VideoInfo {
                    width: self.video_width,
                    height: self.video_height,
                    pixel_width: 1,
                    pixel_height: 1,
                    nalu_length_size: record.nalu_length_size,
                    trick_play_factor: 0,
                }),
            }));
        }
        if !self.audio_config.is_empty() {
            infos.push(Arc::new(StreamInfo {
                track_id: 2,
                time_scale: WVM_TIMESCALE,
                duration: self.duration,
                codec: Codec::Aac,
                codec_string: "mp4a.40.2".to_string(),
                language: String::new(),
                is_encrypted: false,
                extra_data: self.audio_config.clone(),
                kind: StreamKind::Audio(AudioInfo {
                    sample_bits: 16,
                    channels: self.audio_channels,
                    sampling_frequency: self.audio_frequency,
                    max_bitrate: 0,
                    avg_bitrate: 0,
                }),
            }));
        }
        if infos.is_empty() {
            return Err(self.fail("WVM 元数据缺少轨道配置"));
        }
        self.init_sent = true;
        if let Some(cb) = self.callbacks.as_mut() {
            (cb.on_init)(&infos);
        }
        Ok(())
    }

    /// 处理一个完整的 PES/系统包, 返回消耗的字节数; 数据不足返回 None
    fn process_unit(&mut self, data: &[u8]) -> FengResult<Option<usize>> {
        if data.len() < 4 {
            return Ok(None);
        }
        debug_assert!(data[0] == 0 && data[1] == 0 && data[2] == 1);
        let stream_id = data[3];

        match stream_id {
            0xBA => {
                // pack 头: 10 字节固定 + 填充
                if data.len() < 14 {
                    return Ok(None);
                }
                let stuffing = (data[13] & 0x7) as usize;
                Ok(Some(14 + stuffing))
            }
            0xB9 => Ok(Some(4)), // program end
            _ => {
                if data.len() < 6 {
                    return Ok(None);
                }
                let packet_length = ((data[4] as usize) << 8) | data[5] as usize;
                let total = 6 + packet_length;
                if data.len() < total {
                    return Ok(None);
                }
                let payload = &data[6..total];
                match stream_id {
                    0xBB | 0xBC | 0xBE => {} // system 头 / PSM / padding
                    0xBF => {
                        let payload = payload.to_vec();
                        self.process_index(&payload)?;
                    }
                    0xBD => {
                        let payload = payload.to_vec();
                        self.process_ecm(&payload)?;
                    }
                    0xE0..=0xEF => {
                        let payload = payload.to_vec();
                        self.process_media_pes(&payload, true)?;
                    }
                    0xC0..=0xDF => {
                        let payload = payload.to_vec();
                        self.process_media_pes(&payload, false)?;
                    }
                    other => debug!("WVM: 忽略流 {other:#04x}"),
                }
                Ok(Some(total))
            }
        }
    }

    fn process_media_pes(&mut self, payload: &[u8], is_video: bool) -> FengResult<()> {
        if payload.len() < 3 {
            return Ok(());
        }
        let pts_dts_flags = payload[1] >> 6;
        let header_length = payload[2] as usize;
        let data_start = 3 + header_length;
        if data_start > payload.len() {
            return Err(self.fail("WVM: PES 头长度越界"));
        }

        let mut pts = -1i64;
        let mut dts = -1i64;
        if pts_dts_flags & 0x2 != 0 && payload.len() >= 8 {
            pts = decode_timestamp(&payload[3..8]);
            dts = pts;
        }
        if pts_dts_flags & 0x1 != 0 && payload.len() >= 13 {
            dts = decode_timestamp(&payload[8..13]);
        }
        let es = &payload[data_start..];

        let pending = if is_video {
            &mut self.video_pending
        } else {
            &mut self.audio_pending
        };
        if pts >= 0 {
            // 新采样开始: 放出上一个
            let finished = pending.take();
            *pending = Some(PendingEs {
                data: es.to_vec(),
                pts,
                dts: if dts >= 0 { dts } else { pts },
            });
            if let Some(finished) = finished {
                if is_video {
                    self.finish_video(finished)?;
                } else {
                    self.finish_audio(finished)?;
                }
            }
        } else if let Some(p) = pending.as_mut() {
            p.data.extend_from_slice(es);
        } else {
            warn!("WVM: 无时间戳的前导 PES 被丢弃");
        }
        Ok(())
    }
}

fn read_uint_tlv(value: &[u8]) -> u64 {
    let mut v = 0u64;
    for &b in value.iter().take(8) {
        v = (v << 8) | u64::from(b);
    }
    v
}

/// PES 33 位时间戳
fn decode_timestamp(b: &[u8]) -> i64 {
    (((b[0] as i64 >> 1) & 0x7) << 30)
        | ((b[1] as i64) << 22)
        | (((b[2] as i64 >> 1) & 0x7F) << 15)
        | ((b[3] as i64) << 7)
        | ((b[4] as i64 >> 1) & 0x7F)
}

impl MediaParser for WvmParser {
    fn init(&mut self, callbacks: ParserCallbacks, key_source: Option<Arc<dyn KeySource>>) {
        self.callbacks = Some(callbacks);
        self.key_source = key_source;
    }

    fn parse(&mut self, data: &[u8]) -> FengResult<()> {
        if self.failed {
            return Err(FengError::ParserFailure("解析器已失败".into()));
        }
        self.buffer.extend_from_slice(data);

        let mut pos = 0usize;
        loop {
            // 同步到起始码 00 00 01
            let remaining = &self.buffer[pos..];
            let Some(offset) = find_start_code(remaining) else {
                pos = self.buffer.len().saturating_sub(3).max(pos);
                break;
            };
            pos += offset;
            let unit = self.buffer[pos..].to_vec();
            match self.process_unit(&unit)? {
                Some(consumed) => pos += consumed,
                None => break, // 等待更多数据
            }
        }
        self.buffer.drain(..pos);
        Ok(())
    }

    fn flush(&mut self) -> FengResult<()> {
        if let Some(pending) = self.video_pending.take() {
            self.finish_video(pending)?;
        }
        if let Some(pending) = self.audio_pending.take() {
            self.finish_audio(pending)?;
        }
        Ok(())
    }
}

/// 查找 00 00 01 起始码
fn find_start_code(data: &[u8]) -> Option<usize> {
    data.windows(3).position(|w| w == [0, 0, 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn tlv(tag: u8, value: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&(value.len() as u32).to_be_bytes());
        out.extend_from_slice(value);
        out
    }

    fn pes(stream_id: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0, 0, 1, stream_id];
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn encode_timestamp(ts: i64) -> [u8; 5] {
        [
            0x21 | (((ts >> 30) & 0x7) as u8) << 1,
            ((ts >> 22) & 0xFF) as u8,
            0x01 | (((ts >> 15) & 0x7F) as u8) << 1,
            ((ts >> 7) & 0xFF) as u8,
            0x01 | ((ts & 0x7F) as u8) << 1,
        ]
    }

    #[test]
    fn test_clear_wvm_audio_only() {
        // 索引: 仅音频配置 (esds 占位)
        let mut index = Vec::new();
        index.extend_from_slice(&tlv(TAG_AUDIO_ES_DESCRIPTOR, &[0x03, 0x01, 0x00]));
        index.extend_from_slice(&tlv(TAG_AUDIO_SAMPLE_FREQUENCY, &48000u32.to_be_bytes()));
        index.extend_from_slice(&tlv(TAG_AUDIO_NUM_CHANNELS, &[2]));

        // 两个音频 PES (PTS 0 与 1920)
        let mut pes1 = vec![0x80, 0x80, 5];
        pes1.extend_from_slice(&encode_timestamp(0));
        pes1.extend_from_slice(&[0xAA; 32]);
        let mut pes2 = vec![0x80, 0x80, 5];
        pes2.extend_from_slice(&encode_timestamp(1920));
        pes2.extend_from_slice(&[0xBB; 32]);

        let mut data = Vec::new();
        data.extend_from_slice(&pes(0xBF, &index));
        data.extend_from_slice(&pes(0xC0, &pes1));
        data.extend_from_slice(&pes(0xC0, &pes2));

        let samples = Arc::new(Mutex::new(Vec::new()));
        let samples_cb = Arc::clone(&samples);
        let mut parser = WvmParser::new();
        parser.init(
            ParserCallbacks::media_only(
                Box::new(|infos| {
                    assert_eq!(infos.len(), 1);
                    assert_eq!(infos[0].codec, Codec::Aac);
                }),
                Box::new(move |track, sample| {
                    samples_cb.lock().unwrap().push((track, sample));
                    true
                }),
            ),
            None,
        );
        parser.parse(&data).unwrap();
        parser.flush().unwrap();

        let samples = samples.lock().unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].0, 2);
        assert_eq!(samples[0].1.dts, 0);
        assert_eq!(samples[1].1.dts, 1920);
        assert_eq!(samples[0].1.data.as_ref(), &[0xAA; 32]);
    }
}
