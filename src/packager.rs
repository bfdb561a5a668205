//! 打包作业编排.
//!
//! 把输入描述展开为线程拓扑: 每个输入一个生产者线程 (解封装),
//! 每个输出一个消费者线程 (对齐 + 加密 + 分片 + 分段 + 监听),
//! 线程间用有界通道连接; 提示点经全局共享的提升队列对齐;
//! 任一环节失败即置位取消标志并回收所有线程, 清单只在全部
//! 表示成功后写出.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::mpsc::{sync_channel, SyncSender};
use std::sync::Arc;
use std::thread;

use log::{error, info};
use serde::{Deserialize, Serialize};

use feng_core::{FengError, FengResult, IoContext, OpenMode};
use feng_crypto::{KeySource, ProtectionLevelThresholds, ProtectionScheme};
use feng_manifest::{
    HlsNotifier, HlsTrackSeed, MpdKind, MpdNotifier, MpdOptions, PlaylistType, RepresentationSeed,
};
use feng_media::cue::SyncPointQueue;
use feng_media::muxer::EncryptionOptions;
use feng_media::{
    Demuxer, MediaSample, Muxer, Segmenter, SegmenterMode, SegmenterOptions, StreamData,
    StreamInfo, StreamKind,
};

/// 通道容量 (背压窗口)
const CHANNEL_CAPACITY: usize = 256;

/// 打包参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagingParams {
    /// MPD 输出路径 (空 = 不生成)
    #[serde(default)]
    pub mpd_output: String,
    /// HLS 主播放列表输出路径 (空 = 不生成)
    #[serde(default)]
    pub hls_master_playlist_output: String,
    /// 生成动态 (直播) MPD
    #[serde(default)]
    pub generate_dynamic_mpd: bool,
    /// 分段时长 (秒)
    pub segment_duration_seconds: f64,
    /// 分片时长 (秒)
    pub fragment_duration_seconds: f64,
    /// 分段边界对齐关键帧
    #[serde(default = "default_true")]
    pub segment_sap_aligned: bool,
    /// 分片边界对齐关键帧
    #[serde(default = "default_true")]
    pub fragment_sap_aligned: bool,
    /// 保护方案 (cenc / cbc1 / cens / cbcs)
    #[serde(default = "default_scheme")]
    pub protection_scheme: String,
    /// 透明期 (秒)
    #[serde(default)]
    pub clear_lead_seconds: f64,
    /// 密钥轮换周期 (秒, 0 = 不轮换)
    #[serde(default)]
    pub crypto_period_duration_seconds: f64,
    /// 每采样 IV 大小 (8 或 16)
    #[serde(default = "default_iv_size")]
    pub iv_size: usize,
    /// 时移缓冲深度 (秒, 直播窗口)
    #[serde(default)]
    pub time_shift_buffer_depth: f64,
    /// 默认语言 (HLS DEFAULT 标记)
    #[serde(default)]
    pub default_language: String,
    /// HLS EXT-X-KEY 的 URI
    #[serde(default)]
    pub hls_key_uri: String,
    /// 提示点时间 (秒)
    #[serde(default)]
    pub ad_cues: Vec<f64>,
    /// 单段模式临时文件目录
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn default_scheme() -> String {
    "cenc".into()
}

fn default_iv_size() -> usize {
    8
}

impl Default for PackagingParams {
    fn default() -> Self {
        Self {
            mpd_output: String::new(),
            hls_master_playlist_output: String::new(),
            generate_dynamic_mpd: false,
            segment_duration_seconds: 6.0,
            fragment_duration_seconds: 2.0,
            segment_sap_aligned: true,
            fragment_sap_aligned: true,
            protection_scheme: "cenc".into(),
            clear_lead_seconds: 0.0,
            crypto_period_duration_seconds: 0.0,
            iv_size: 8,
            time_shift_buffer_depth: 0.0,
            default_language: String::new(),
            hls_key_uri: String::new(),
            ad_cues: Vec::new(),
            temp_dir: None,
        }
    }
}

/// 流描述符: 一条输入轨到一个输出的映射
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamDescriptor {
    /// 输入 URI
    pub input: String,
    /// 轨道选择: "video" / "audio" / "text" / 流索引数字
    pub stream: String,
    /// 输出路径 (单段) 或初始化段路径 (多段)
    pub output: String,
    /// 多段模式的分段名模板
    #[serde(default)]
    pub segment_template: String,
    /// 跳过加密
    #[serde(default)]
    pub skip_encryption: bool,
    /// 特技播放倍率 (每 N 个关键帧取一个)
    #[serde(default)]
    pub trick_play_factor: u32,
    /// 码率覆盖 (bps)
    #[serde(default)]
    pub bandwidth: u32,
    /// 语言覆盖
    #[serde(default)]
    pub language: String,
    /// HLS 显示名
    #[serde(default)]
    pub hls_name: String,
    /// HLS 音频组 ID
    #[serde(default)]
    pub hls_group_id: String,
    /// HLS 媒体播放列表路径
    #[serde(default)]
    pub hls_playlist_name: String,
}

impl StreamDescriptor {
    /// 解析 `key=value,key=value` 形式的描述串
    pub fn parse(text: &str) -> FengResult<Self> {
        let mut descriptor = Self::default();
        for pair in text.split(',') {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                FengError::InvalidArgument(format!("流描述符字段缺少 '=': {pair}"))
            })?;
            match key.trim() {
                "input" | "in" => descriptor.input = value.to_string(),
                "stream" | "stream_selector" => descriptor.stream = value.to_string(),
                "output" | "out" => descriptor.output = value.to_string(),
                "segment_template" | "segtemplate" => {
                    descriptor.segment_template = value.to_string()
                }
                "skip_encryption" => {
                    descriptor.skip_encryption = value == "1" || value == "true"
                }
                "trick_play_factor" => {
                    descriptor.trick_play_factor = value.parse().map_err(|_| {
                        FengError::InvalidArgument(format!("trick_play_factor 非法: {value}"))
                    })?
                }
                "bandwidth" | "bw" => {
                    descriptor.bandwidth = value.parse().map_err(|_| {
                        FengError::InvalidArgument(format!("bandwidth 非法: {value}"))
                    })?
                }
                "language" | "lang" => descriptor.language = value.to_string(),
                "hls_name" => descriptor.hls_name = value.to_string(),
                "hls_group_id" => descriptor.hls_group_id = value.to_string(),
                "hls_playlist_name" | "playlist_name" => {
                    descriptor.hls_playlist_name = value.to_string()
                }
                other => {
                    return Err(FengError::InvalidArgument(format!(
                        "未知流描述符字段: {other}"
                    )))
                }
            }
        }
        if descriptor.input.is_empty() || descriptor.stream.is_empty() || descriptor.output.is_empty()
        {
            return Err(FengError::InvalidArgument(
                "流描述符必须包含 input、stream 与 output".into(),
            ));
        }
        Ok(descriptor)
    }

    /// 描述符是否选择该流
    fn selects(&self, stream_index: usize, info: &StreamInfo) -> bool {
        match self.stream.as_str() {
            "video" => info.is_video(),
            "audio" => info.is_audio(),
            "text" => info.is_text(),
            number => number.parse::<usize>() == Ok(stream_index),
        }
    }

    fn representation_id(&self, index: usize) -> String {
        Path::new(&self.output)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("rep-{index}"))
    }
}

/// 打包作业
pub struct Packager {
    params: PackagingParams,
    descriptors: Vec<StreamDescriptor>,
    encryption_key_source: Option<Arc<dyn KeySource>>,
    decryption_key_source: Option<Arc<dyn KeySource>>,
}

impl Packager {
    /// 创建作业
    pub fn new(params: PackagingParams, descriptors: Vec<StreamDescriptor>) -> Self {
        Self {
            params,
            descriptors,
            encryption_key_source: None,
            decryption_key_source: None,
        }
    }

    /// 设置加密密钥源
    pub fn set_encryption_key_source(&mut self, source: Arc<dyn KeySource>) {
        self.encryption_key_source = Some(source);
    }

    /// 设置解密密钥源 (加密输入 / WVM)
    pub fn set_decryption_key_source(&mut self, source: Arc<dyn KeySource>) {
        self.decryption_key_source = Some(source);
    }

    /// 运行到完成
    pub fn run(self) -> FengResult<()> {
        if self.descriptors.is_empty() {
            return Err(FengError::InvalidArgument("没有任何流描述符".into()));
        }

        let sync_queue = Arc::new(SyncPointQueue::new(self.params.ad_cues.iter().copied()));

        // 清单通知器
        let mpd_notifier = (!self.params.mpd_output.is_empty()).then(|| {
            Arc::new(MpdNotifier::new(
                MpdOptions {
                    kind: if self.params.generate_dynamic_mpd {
                        MpdKind::Dynamic
                    } else {
                        MpdKind::Static
                    },
                    time_shift_buffer_depth: self.params.time_shift_buffer_depth,
                    ..Default::default()
                },
                &self.params.mpd_output,
            ))
        });
        let hls_notifier = (!self.params.hls_master_playlist_output.is_empty()).then(|| {
            Arc::new(HlsNotifier::new(
                if self.params.generate_dynamic_mpd {
                    PlaylistType::Live
                } else {
                    PlaylistType::Vod
                },
                self.params.time_shift_buffer_depth,
                &self.params.hls_master_playlist_output,
                &self.params.default_language,
            ))
        });

        // 每个描述符一个封装器 + 有界通道
        let mut senders: Vec<SyncSender<StreamData>> = Vec::new();
        let mut muxer_handles = Vec::new();
        let mut cancel_flags = Vec::new();
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            let mut muxer = self.build_muxer(
                index,
                descriptor,
                &sync_queue,
                mpd_notifier.as_deref(),
                hls_notifier.as_deref(),
            )?;
            let (sender, receiver) = sync_channel::<StreamData>(CHANNEL_CAPACITY);
            senders.push(sender);
            cancel_flags.push(muxer.cancel_flag());
            let handle = thread::Builder::new()
                .name(format!("feng-muxer-{index}"))
                .spawn(move || muxer.run(receiver))
                .map_err(|e| FengError::Unknown(format!("创建封装线程失败: {e}")))?;
            muxer_handles.push(handle);
        }

        // 输入分组: 同一输入的所有描述符共享一个解封装线程
        let mut inputs: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, descriptor) in self.descriptors.iter().enumerate() {
            inputs
                .entry(descriptor.input.clone())
                .or_default()
                .push(index);
        }

        let mut demux_handles = Vec::new();
        let mut demux_cancel_flags = Vec::new();
        for (input, indices) in inputs {
            let io = IoContext::open(&input, OpenMode::Read)?;
            let mut demuxer = Demuxer::new(io);
            if let Some(source) = &self.decryption_key_source {
                demuxer.set_key_source(Arc::clone(source));
            }
            demux_cancel_flags.push(demuxer.cancel_flag());

            let targets: Vec<RouteTarget> = indices
                .iter()
                .map(|&i| RouteTarget {
                    descriptor: self.descriptors[i].clone(),
                    sender: senders[i].clone(),
                    assigned: None,
                    key_frame_counter: 0,
                })
                .collect();
            demuxer.initialize(make_router(targets))?;

            info!("输入 {input} → {} 个输出", indices.len());
            let handle = thread::Builder::new()
                .name("feng-demuxer".into())
                .spawn(move || demuxer.run())
                .map_err(|e| FengError::Unknown(format!("创建解封装线程失败: {e}")))?;
            demux_handles.push(handle);
        }
        drop(senders); // 路由闭包持有克隆, 解封装结束后通道自动关闭

        // 回收线程; 任一失败即取消其余. 首个非 Cancelled 错误对外报告
        let mut first_error: Option<FengError> = None;
        let mut record = |result: FengResult<()>| {
            if let Err(e) = result {
                match &first_error {
                    None => first_error = Some(e),
                    Some(FengError::Cancelled) if !matches!(e, FengError::Cancelled) => {
                        first_error = Some(e)
                    }
                    Some(_) => error!("附加错误: {e}"),
                }
            }
        };

        for handle in demux_handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(FengError::Unknown("解封装线程崩溃".into())));
            if result.is_err() {
                for flag in &cancel_flags {
                    flag.store(true, Ordering::Release);
                }
                sync_queue.cancel();
            }
            record(result);
        }
        for handle in muxer_handles {
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(FengError::Unknown("封装线程崩溃".into())));
            if result.is_err() {
                for flag in &demux_cancel_flags {
                    flag.store(true, Ordering::Release);
                }
                sync_queue.cancel();
            }
            record(result);
        }
        if let Some(e) = first_error {
            // 任一表示失败: 不写清单
            return Err(e);
        }

        // 全部表示成功, 写出清单
        if let Some(notifier) = &mpd_notifier {
            notifier.write()?;
            info!("MPD 已写出: {}", self.params.mpd_output);
        }
        if let Some(notifier) = &hls_notifier {
            notifier.write()?;
            info!("HLS 清单已写出: {}", self.params.hls_master_playlist_output);
        }
        Ok(())
    }

    fn build_muxer(
        &self,
        index: usize,
        descriptor: &StreamDescriptor,
        sync_queue: &Arc<SyncPointQueue>,
        mpd: Option<&MpdNotifier>,
        hls: Option<&HlsNotifier>,
    ) -> FengResult<Muxer> {
        let multi_segment = !descriptor.segment_template.is_empty();
        let mode = if multi_segment {
            SegmenterMode::MultiSegment {
                init_output: descriptor.output.clone(),
                segment_template: descriptor.segment_template.clone(),
            }
        } else {
            SegmenterMode::SingleSegment {
                output: descriptor.output.clone(),
                temp_dir: self.params.temp_dir.clone(),
            }
        };
        let mut segmenter = Segmenter::new(
            mode,
            SegmenterOptions {
                segment_duration_seconds: self.params.segment_duration_seconds,
                fragment_duration_seconds: self.params.fragment_duration_seconds,
                segment_sap_aligned: self.params.segment_sap_aligned,
                fragment_sap_aligned: self.params.fragment_sap_aligned,
                bandwidth: descriptor.bandwidth,
            },
        );

        let encrypt = self.encryption_key_source.clone().filter(|_| !descriptor.skip_encryption);
        if let Some(notifier) = mpd {
            segmenter.add_listener(notifier.listener(RepresentationSeed {
                id: descriptor.representation_id(index),
                bandwidth: descriptor.bandwidth,
                language: descriptor.language.clone(),
                trick_play_factor: descriptor.trick_play_factor,
                media_url: relative_to_manifest(&self.params.mpd_output, &descriptor.output),
                init_url: relative_to_manifest(&self.params.mpd_output, &descriptor.output),
                media_template: relative_to_manifest(
                    &self.params.mpd_output,
                    &descriptor.segment_template,
                ),
                protection_scheme: encrypt
                    .is_some()
                    .then(|| self.params.protection_scheme.clone())
                    .unwrap_or_default(),
            }));
        }
        if let Some(notifier) = hls {
            let playlist_path = if descriptor.hls_playlist_name.is_empty() {
                format!("{}.m3u8", descriptor.output)
            } else {
                descriptor.hls_playlist_name.clone()
            };
            segmenter.add_listener(notifier.listener(
                HlsTrackSeed {
                    playlist_uri: relative_to_manifest(
                        &self.params.hls_master_playlist_output,
                        &playlist_path,
                    ),
                    playlist_path,
                    name: descriptor.hls_name.clone(),
                    group_id: descriptor.hls_group_id.clone(),
                    bandwidth: descriptor.bandwidth,
                    language: descriptor.language.clone(),
                    key_uri: self.params.hls_key_uri.clone(),
                    single_file: !multi_segment,
                    media_uri: relative_to_manifest(
                        &self.params.hls_master_playlist_output,
                        &descriptor.output,
                    ),
                },
                multi_segment.then(|| {
                    relative_to_manifest(&self.params.hls_master_playlist_output, &descriptor.output)
                }),
            ));
        }

        let encryption = match encrypt {
            Some(key_source) => Some(EncryptionOptions {
                key_source,
                scheme: ProtectionScheme::parse(&self.params.protection_scheme)?,
                clear_lead_seconds: self.params.clear_lead_seconds,
                crypto_period_seconds: (self.params.crypto_period_duration_seconds > 0.0)
                    .then_some(self.params.crypto_period_duration_seconds),
                iv_size: self.params.iv_size,
                thresholds: ProtectionLevelThresholds::default(),
            }),
            None => None,
        };

        Ok(Muxer::new(
            segmenter,
            Arc::clone(sync_queue),
            encryption,
            self.decryption_key_source.clone(),
        ))
    }
}

/// 解封装输出到各描述符通道的路由目标
struct RouteTarget {
    descriptor: StreamDescriptor,
    sender: SyncSender<StreamData>,
    /// 选中的流索引
    assigned: Option<usize>,
    /// 特技播放的关键帧计数
    key_frame_counter: u64,
}

/// 构造解封装器的下游接收器: 按描述符选择器路由, 特技播放轨抽取关键帧
fn make_router(mut targets: Vec<RouteTarget>) -> feng_media::StreamDataSink {
    Box::new(move |data: StreamData| -> FengResult<()> {
        match &data {
            StreamData::StreamInfo { stream_index, info } => {
                for target in targets.iter_mut() {
                    if target.assigned.is_none() && target.descriptor.selects(*stream_index, info) {
                        target.assigned = Some(*stream_index);
                        let mut adjusted = (**info).clone();
                        if target.descriptor.trick_play_factor > 0 {
                            if let StreamKind::Video(v) = &mut adjusted.kind {
                                v.trick_play_factor = target.descriptor.trick_play_factor;
                            }
                        }
                        target
                            .sender
                            .send(StreamData::StreamInfo {
                                stream_index: *stream_index,
                                info: Arc::new(adjusted),
                            })
                            .map_err(|_| FengError::Cancelled)?;
                    }
                }
            }
            StreamData::MediaSample {
                stream_index,
                sample,
            } => {
                for target in targets.iter_mut() {
                    if target.assigned != Some(*stream_index) {
                        continue;
                    }
                    if !trick_play_keep(target, sample) {
                        continue;
                    }
                    target
                        .sender
                        .send(StreamData::MediaSample {
                            stream_index: *stream_index,
                            sample: sample.clone(),
                        })
                        .map_err(|_| FengError::Cancelled)?;
                }
            }
            StreamData::TextSample {
                stream_index,
                sample,
            } => {
                for target in targets.iter_mut() {
                    if target.assigned != Some(*stream_index) {
                        continue;
                    }
                    target
                        .sender
                        .send(StreamData::TextSample {
                            stream_index: *stream_index,
                            sample: sample.clone(),
                        })
                        .map_err(|_| FengError::Cancelled)?;
                }
            }
            _ => {}
        }
        Ok(())
    })
}

/// 特技播放抽帧: 每 N 个关键帧保留一个, 非关键帧全部丢弃
fn trick_play_keep(target: &mut RouteTarget, sample: &MediaSample) -> bool {
    let factor = u64::from(target.descriptor.trick_play_factor);
    if factor == 0 || sample.is_eos {
        return true;
    }
    if !sample.is_key_frame {
        return false;
    }
    let keep = target.key_frame_counter % factor == 0;
    target.key_frame_counter += 1;
    keep
}

/// 清单引用的路径规整: 同目录下用文件名, 否则保持原样
fn relative_to_manifest(manifest_path: &str, target: &str) -> String {
    if manifest_path.is_empty() || target.is_empty() {
        return target.to_string();
    }
    let manifest_dir = Path::new(manifest_path).parent();
    let target_path = Path::new(target);
    match (manifest_dir, target_path.parent()) {
        (Some(m), Some(t)) if m == t => target_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| target.to_string()),
        _ => target.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_stream_descriptor() {
        let descriptor = StreamDescriptor::parse(
            "input=in.mp4,stream=audio,output=out.mp4,language=fr,\
             hls_group_id=audio,hls_name=French,bandwidth=128000,skip_encryption=1",
        )
        .unwrap();
        assert_eq!(descriptor.input, "in.mp4");
        assert_eq!(descriptor.stream, "audio");
        assert_eq!(descriptor.output, "out.mp4");
        assert_eq!(descriptor.language, "fr");
        assert_eq!(descriptor.hls_group_id, "audio");
        assert_eq!(descriptor.bandwidth, 128_000);
        assert!(descriptor.skip_encryption);
    }

    #[test]
    fn test_parse_rejects_bad_fields() {
        assert!(StreamDescriptor::parse("input=a,stream=video").is_err());
        assert!(StreamDescriptor::parse("input=a,stream=video,output=o,bogus=1").is_err());
        assert!(StreamDescriptor::parse("no-equals-here").is_err());
    }

    #[test]
    fn test_selector_matching() {
        use feng_media::{AudioInfo, Codec, StreamKind};
        let audio = StreamInfo {
            track_id: 2,
            time_scale: 44100,
            duration: 0,
            codec: Codec::Aac,
            codec_string: "mp4a.40.2".into(),
            language: "en".into(),
            is_encrypted: false,
            extra_data: Vec::new(),
            kind: StreamKind::Audio(AudioInfo {
                sample_bits: 16,
                channels: 2,
                sampling_frequency: 44100,
                max_bitrate: 0,
                avg_bitrate: 0,
            }),
        };
        let by_kind =
            StreamDescriptor::parse("input=a,stream=audio,output=o").unwrap();
        assert!(by_kind.selects(1, &audio));
        let by_index = StreamDescriptor::parse("input=a,stream=1,output=o").unwrap();
        assert!(by_index.selects(1, &audio));
        assert!(!by_index.selects(0, &audio));
        let video = StreamDescriptor::parse("input=a,stream=video,output=o").unwrap();
        assert!(!video.selects(1, &audio));
    }

    #[test]
    fn test_relative_to_manifest() {
        assert_eq!(
            relative_to_manifest("dash/manifest.mpd", "dash/video.mp4"),
            "video.mp4"
        );
        assert_eq!(
            relative_to_manifest("manifest.mpd", "media/video.mp4"),
            "media/video.mp4"
        );
        assert_eq!(relative_to_manifest("", "video.mp4"), "video.mp4");
    }
}
