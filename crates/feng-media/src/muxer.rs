//! 封装器: 单输出的消费侧主循环.
//!
//! 从上游通道取 `StreamData`, 依次经过 (可选) 解密 → 时长回填 →
//! 提示点对齐 → (可选) 加密 → 分段器. 每个输出一条轨, 回调串行.
//!
//! 文本轨道在此转为 WebVTT-in-MP4 采样 (vttc/vtte), 空档用 vtte 填满
//! 使时间线连续.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use bytes::Bytes;
use log::debug;

use feng_core::{BufferWriter, FengError, FengResult};
use feng_crypto::{
    EncryptionKey, KeySource, ProtectionLevelThresholds, ProtectionScheme, TrackType,
};

use crate::codecs::{AvcDecoderConfigurationRecord, H264SliceHeaderParser};
use crate::crypto::{Decryptor, Encryptor, EncryptorConfig, SubsampleLayout};
use crate::cue::{AlignedOutput, CueAlignmentHandler, CueStreamKind, SyncPointQueue};
use crate::moov_builder::EncryptionInit;
use crate::sample::{MediaSample, StreamData, TextSample};
use crate::segmenter::Segmenter;
use crate::stream_info::{Codec, StreamKind};
use crate::SharedStreamInfo;

/// 加密选项
pub struct EncryptionOptions {
    /// 密钥源
    pub key_source: Arc<dyn KeySource>,
    /// 保护方案
    pub scheme: ProtectionScheme,
    /// 透明期 (秒)
    pub clear_lead_seconds: f64,
    /// 轮换周期 (秒), None 不轮换
    pub crypto_period_seconds: Option<f64>,
    /// 每采样 IV 大小 (8 或 16)
    pub iv_size: usize,
    /// 保护级别阈值
    pub thresholds: ProtectionLevelThresholds,
}

/// 封装器
pub struct Muxer {
    segmenter: Segmenter,
    sync_queue: Arc<SyncPointQueue>,
    encryption: Option<EncryptionOptions>,
    decrypt_source: Option<Arc<dyn KeySource>>,
    cancelled: Arc<AtomicBool>,

    info: Option<SharedStreamInfo>,
    decryptor: Option<Decryptor>,
    encryptor: Option<Encryptor>,
    cue_handler: Option<CueAlignmentHandler>,
    /// 时长回填的一拍滞留
    lookahead: Option<MediaSample>,
    last_duration: u64,
    /// 文本时间线推进 (vtte 填空)
    text_last_end: i64,
    finalized: bool,
}

impl Muxer {
    /// 创建封装器
    pub fn new(
        segmenter: Segmenter,
        sync_queue: Arc<SyncPointQueue>,
        encryption: Option<EncryptionOptions>,
        decrypt_source: Option<Arc<dyn KeySource>>,
    ) -> Self {
        Self {
            segmenter,
            sync_queue,
            encryption,
            decrypt_source,
            cancelled: Arc::new(AtomicBool::new(false)),
            info: None,
            decryptor: None,
            encryptor: None,
            cue_handler: None,
            lookahead: None,
            last_duration: 0,
            text_last_end: 0,
            finalized: false,
        }
    }

    /// 取消标志
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// 主循环: 排空上游通道直到 EOS 或取消
    pub fn run(&mut self, receiver: Receiver<StreamData>) -> FengResult<()> {
        for data in receiver {
            if self.cancelled.load(Ordering::Acquire) {
                self.sync_queue.cancel();
                return Err(FengError::Cancelled);
            }
            self.process(data)?;
            if self.finalized {
                break;
            }
        }
        if !self.finalized {
            // 上游通道关闭但未见 EOS: 照常收尾
            self.finalize()?;
        }
        Ok(())
    }

    /// 处理一条管线记录
    pub fn process(&mut self, data: StreamData) -> FengResult<()> {
        match data {
            StreamData::StreamInfo { info, .. } => self.on_stream_info(info),
            StreamData::MediaSample { sample, .. } => {
                if sample.is_eos {
                    return self.finalize();
                }
                self.on_media_sample(sample)
            }
            StreamData::TextSample { sample, .. } => self.on_text_sample(sample),
            StreamData::CueEvent { .. } => {
                // 上游直接注入的提示点: 与对齐器产出同样处理
                self.segmenter.force_segment_break();
                Ok(())
            }
            StreamData::SegmentInfo { .. } | StreamData::EncryptionConfigChange { .. } => Ok(()),
        }
    }

    fn on_stream_info(&mut self, info: SharedStreamInfo) -> FengResult<()> {
        if self.info.is_some() {
            return Err(FengError::InvalidArgument("重复的流信息".into()));
        }

        if let Some(source) = &self.decrypt_source {
            if info.is_encrypted {
                self.decryptor = Some(Decryptor::new(Arc::clone(source)));
            }
        }

        let mut encryption_init = None;
        if let Some(options) = &self.encryption {
            let track_type = classify(&info, &options.thresholds);
            let clear_lead_ticks =
                (options.clear_lead_seconds * f64::from(info.time_scale)) as i64;
            let crypto_period_ticks = options
                .crypto_period_seconds
                .map(|s| (s * f64::from(info.time_scale)) as i64);

            // moov 的 tenc/pssh 用首个加密周期的密钥装配
            let mut first_key = EncryptionKey::default();
            match crypto_period_ticks {
                Some(period) if period > 0 => {
                    let first_period = (clear_lead_ticks / period) as u32;
                    options.key_source.get_crypto_period_key(
                        first_period,
                        track_type,
                        &mut first_key,
                    )?;
                }
                _ => {
                    options.key_source.get_key(
                        feng_crypto::KeySelector::TrackType(track_type),
                        &mut first_key,
                    )?;
                }
            }
            encryption_init = Some(EncryptionInit {
                scheme: options.scheme,
                default_kid: first_key.key_id,
                per_sample_iv_size: options.iv_size as u8,
                protection_systems: first_key.protection_systems.clone(),
            });

            let layout = build_layout(&info, options.scheme)?;
            self.encryptor = Some(Encryptor::new(
                EncryptorConfig {
                    scheme: options.scheme,
                    clear_lead_ticks,
                    crypto_period_ticks,
                    iv_size: options.iv_size,
                    track_type,
                    is_video: info.is_video(),
                },
                layout,
                Arc::clone(&options.key_source),
            ));
        }

        let kind = match &info.kind {
            StreamKind::Video(_) => CueStreamKind::Video,
            StreamKind::Audio(_) => CueStreamKind::Audio,
            StreamKind::Text(_) => CueStreamKind::Text,
        };
        self.cue_handler = Some(CueAlignmentHandler::new(
            Arc::clone(&self.sync_queue),
            kind,
            info.time_scale,
        ));

        self.segmenter
            .initialize(Arc::clone(&info), encryption_init.as_ref())?;
        self.info = Some(info);
        Ok(())
    }

    fn on_media_sample(&mut self, mut sample: MediaSample) -> FengResult<()> {
        if let Some(decryptor) = self.decryptor.as_mut() {
            decryptor.process_sample(&mut sample)?;
        }

        // 一拍滞留回填时长
        if let Some(mut held) = self.lookahead.take() {
            if held.duration == 0 {
                held.duration = (sample.dts - held.dts).max(0) as u64;
            }
            self.last_duration = held.duration;
            self.deliver(held)?;
        }
        self.lookahead = Some(sample);
        Ok(())
    }

    /// 对齐 → 加密 → 分段
    fn deliver(&mut self, sample: MediaSample) -> FengResult<()> {
        let handler = self
            .cue_handler
            .as_mut()
            .ok_or_else(|| FengError::InvalidArgument("采样先于流信息到达".into()))?;
        let outputs = handler.process_media(sample)?;
        self.deliver_outputs(outputs)
    }

    fn deliver_outputs(&mut self, outputs: Vec<AlignedOutput>) -> FengResult<()> {
        for output in outputs {
            match output {
                AlignedOutput::Cue(cue) => {
                    debug!("提示点生效: {:.3}s → 强制切段", cue.time_in_seconds);
                    self.segmenter.force_segment_break();
                }
                AlignedOutput::Media(sample) => {
                    if sample.is_eos {
                        continue;
                    }
                    self.deliver_aligned(sample)?;
                }
                AlignedOutput::Text(sample) => self.deliver_text_aligned(sample)?,
            }
        }
        Ok(())
    }

    fn deliver_aligned(&mut self, mut sample: MediaSample) -> FengResult<()> {
        if let Some(encryptor) = self.encryptor.as_mut() {
            let outcome = encryptor.process_sample(&mut sample)?;
            if let Some(config) = outcome.config_change {
                debug!("加密配置变更 → 强制切段 (key_id {})", hex_of(&config.key_id));
                self.segmenter.signal_encryption_change(sample.dts);
            }
        }
        self.segmenter.add_sample(&sample)
    }

    fn on_text_sample(&mut self, sample: TextSample) -> FengResult<()> {
        let handler = self
            .cue_handler
            .as_mut()
            .ok_or_else(|| FengError::InvalidArgument("采样先于流信息到达".into()))?;
        let outputs = handler.process_text(sample)?;
        self.deliver_outputs(outputs)
    }

    /// 对齐后的文本采样 → WebVTT-in-MP4, 空档填 vtte 保持时间线连续
    fn deliver_text_aligned(&mut self, sample: TextSample) -> FengResult<()> {
        if sample.start_time > self.text_last_end {
            let mut gap = MediaSample::new(
                self.text_last_end,
                self.text_last_end,
                true,
                Bytes::from(build_vtte()),
            );
            gap.duration = (sample.start_time - self.text_last_end) as u64;
            self.deliver_aligned(gap)?;
        }
        self.text_last_end = sample.end_time;

        let duration = sample.duration().max(0) as u64;
        let start = sample.start_time;
        let mut media = MediaSample::new(start, start, true, Bytes::from(build_vttc(&sample)));
        media.duration = duration;
        self.deliver_aligned(media)
    }

    /// 输出收尾
    pub fn finalize(&mut self) -> FengResult<()> {
        if self.finalized {
            return Ok(());
        }
        if let Some(mut held) = self.lookahead.take() {
            if held.duration == 0 {
                held.duration = self.last_duration;
            }
            self.deliver(held)?;
        }
        if let Some(handler) = self.cue_handler.as_mut() {
            let outputs = handler.flush()?;
            self.deliver_outputs(outputs)?;
        }
        self.segmenter.finalize()?;
        self.finalized = true;
        Ok(())
    }
}

fn hex_of(key_id: &[u8; 16]) -> String {
    key_id.iter().map(|b| format!("{b:02x}")).collect()
}

/// 按流信息装配子采样布局构建器
fn build_layout(info: &SharedStreamInfo, scheme: ProtectionScheme) -> FengResult<SubsampleLayout> {
    let align = !scheme.is_cbc();
    let (nalu_length_size, slice_parser) = match (&info.kind, info.codec) {
        (StreamKind::Video(v), Codec::H264) => {
            let record = AvcDecoderConfigurationRecord::parse(&info.extra_data)?;
            (
                v.nalu_length_size,
                Some(H264SliceHeaderParser::new(&record)?),
            )
        }
        (StreamKind::Video(v), _) => (v.nalu_length_size, None),
        _ => (0, None),
    };
    Ok(SubsampleLayout::new(
        info.codec,
        nalu_length_size,
        align,
        slice_parser,
    ))
}

fn classify(info: &SharedStreamInfo, thresholds: &ProtectionLevelThresholds) -> TrackType {
    match &info.kind {
        StreamKind::Video(v) => thresholds.classify_video(v.width, v.height),
        StreamKind::Audio(_) => TrackType::Audio,
        StreamKind::Text(_) => TrackType::Unspecified,
    }
}

// ============================================================
// WebVTT-in-MP4 采样装配
// ============================================================

/// 空 cue 采样 (vtte)
fn build_vtte() -> Vec<u8> {
    let mut w = BufferWriter::new();
    w.put_u32(8);
    w.put_fourcc(b"vtte");
    w.into_vec()
}

/// cue 采样 (vttc { payl [sttg] [iden] })
fn build_vttc(sample: &TextSample) -> Vec<u8> {
    fn put_box(w: &mut BufferWriter, fourcc: &[u8; 4], payload: &[u8]) {
        w.put_u32(8 + payload.len() as u32);
        w.put_fourcc(fourcc);
        w.put_bytes(payload);
    }

    let mut inner = BufferWriter::new();
    put_box(&mut inner, b"payl", sample.payload.as_bytes());
    if !sample.settings.is_empty() {
        put_box(&mut inner, b"sttg", sample.settings.as_bytes());
    }
    if !sample.id.is_empty() {
        put_box(&mut inner, b"iden", sample.id.as_bytes());
    }

    let mut w = BufferWriter::new();
    w.put_u32(8 + inner.len() as u32);
    w.put_fourcc(b"vttc");
    w.put_bytes(inner.data());
    w.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vttc_layout() {
        let sample = TextSample {
            id: "c1".into(),
            start_time: 0,
            end_time: 1000,
            settings: "align:start".into(),
            payload: "Hello".into(),
        };
        let bytes = build_vttc(&sample);
        assert_eq!(&bytes[4..8], b"vttc");
        // payl 紧随其后
        assert_eq!(&bytes[12..16], b"payl");
        assert_eq!(&bytes[16..21], b"Hello");

        let empty = build_vtte();
        assert_eq!(empty.len(), 8);
        assert_eq!(&empty[4..8], b"vtte");
    }
}
