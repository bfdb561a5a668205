//! 清单通知器: 把封装监听事件翻译给 MPD / HLS 构建器.
//!
//! 每个输出挂一个监听适配器; 构建器经互斥锁共享. 清单文件只在所有
//! 表示都成功结束后由打包器统一写出 (任一表示失败则不写清单).

use std::sync::{Arc, Mutex};

use log::debug;

use feng_core::FengResult;
use feng_media::{MediaRanges, MuxerListener, ProtectionSystemInfo, SharedStreamInfo, StreamKind};

use crate::hls::{AudioEntry, HlsKey, MasterPlaylist, MediaPlaylist, PlaylistType, VideoEntry};
use crate::mpd::{ContentProtection, MpdBuilder, MpdKind, MpdOptions, RepresentationInfo};

// ============================================================
// MPD
// ============================================================

/// 每个表示的静态参数 (流描述符侧)
#[derive(Debug, Clone, Default)]
pub struct RepresentationSeed {
    /// 表示 ID
    pub id: String,
    /// 码率覆盖 (0 = 按输出估算)
    pub bandwidth: u32,
    /// 语言覆盖 (空 = 取流信息)
    pub language: String,
    /// 特技播放倍率
    pub trick_play_factor: u32,
    /// 点播: 媒体文件 URL
    pub media_url: String,
    /// 直播: 初始化段 URL
    pub init_url: String,
    /// 直播: 分段模板
    pub media_template: String,
    /// 保护方案标识 (加密输出时由监听事件装配 ContentProtection)
    pub protection_scheme: String,
}

/// MPD 通知器
pub struct MpdNotifier {
    builder: Arc<Mutex<MpdBuilder>>,
    output_path: String,
}

impl MpdNotifier {
    /// 创建通知器
    pub fn new(options: MpdOptions, output_path: impl Into<String>) -> Self {
        Self {
            builder: Arc::new(Mutex::new(MpdBuilder::new(options))),
            output_path: output_path.into(),
        }
    }

    /// 为一个输出创建监听适配器
    pub fn listener(&self, seed: RepresentationSeed) -> Box<dyn MuxerListener> {
        Box::new(MpdListener {
            builder: Arc::clone(&self.builder),
            seed,
            registered: false,
            pending_protection: None,
            total_bytes: 0,
            total_ticks: 0,
            timescale: 1,
        })
    }

    /// 写出 MPD (所有表示成功后调用)
    pub fn write(&self) -> FengResult<()> {
        self.builder.lock().unwrap().write_to(&self.output_path)
    }

    /// 生成 MPD 文本 (测试用)
    pub fn to_xml(&self) -> String {
        self.builder.lock().unwrap().to_xml()
    }
}

struct MpdListener {
    builder: Arc<Mutex<MpdBuilder>>,
    seed: RepresentationSeed,
    registered: bool,
    /// 注册前收到的保护信息 (事件先于 on_media_start 到达)
    pending_protection: Option<ContentProtection>,
    total_bytes: u64,
    total_ticks: u64,
    timescale: u32,
}

impl MuxerListener for MpdListener {
    fn on_encryption_info_ready(
        &mut self,
        key_id: &[u8; 16],
        pssh: &[ProtectionSystemInfo],
        _iv: &[u8],
    ) {
        self.pending_protection = Some(ContentProtection {
            scheme: if self.seed.protection_scheme.is_empty() {
                "cenc".into()
            } else {
                self.seed.protection_scheme.clone()
            },
            default_kid: *key_id,
            systems: pssh.to_vec(),
        });
    }

    fn on_media_start(&mut self, info: &SharedStreamInfo, time_scale: u32) {
        self.timescale = time_scale;
        let mut rep = RepresentationInfo {
            id: self.seed.id.clone(),
            codecs: info.codec_string.clone(),
            bandwidth: self.seed.bandwidth,
            timescale: time_scale,
            language: if self.seed.language.is_empty() {
                info.language.clone()
            } else {
                self.seed.language.clone()
            },
            trick_play_factor: self.seed.trick_play_factor,
            protection: self.pending_protection.take(),
            media_url: self.seed.media_url.clone(),
            init_url: self.seed.init_url.clone(),
            media_template: self.seed.media_template.clone(),
            ..Default::default()
        };
        match &info.kind {
            StreamKind::Video(v) => {
                rep.content_type = "video".into();
                rep.width = v.width;
                rep.height = v.height;
                rep.par = (v.pixel_width, v.pixel_height);
            }
            StreamKind::Audio(a) => {
                rep.content_type = "audio".into();
                rep.audio_sampling_rate = a.sampling_frequency;
                rep.audio_channels = u32::from(a.channels);
            }
            StreamKind::Text(_) => {
                rep.content_type = "text".into();
            }
        }
        if let Err(e) = self.builder.lock().unwrap().add_representation(rep) {
            log::error!("注册 Representation 失败: {e}");
            return;
        }
        self.registered = true;
    }

    fn on_new_segment(&mut self, _name: &str, start_time: u64, duration: u64, size: u64) {
        if !self.registered {
            return;
        }
        self.total_bytes += size;
        self.total_ticks += duration;
        if let Err(e) = self
            .builder
            .lock()
            .unwrap()
            .add_segment(&self.seed.id, start_time, duration)
        {
            log::error!("登记分段失败: {e}");
        }
    }

    fn on_media_end(&mut self, ranges: &MediaRanges, _duration_seconds: f64) {
        if !self.registered {
            return;
        }
        let mut builder = self.builder.lock().unwrap();
        if self.seed.bandwidth == 0 && self.total_ticks > 0 {
            let seconds = self.total_ticks as f64 / f64::from(self.timescale);
            let estimated = (self.total_bytes as f64 * 8.0 / seconds) as u32;
            builder.set_bandwidth(&self.seed.id, estimated);
        }
        if let (Some(init), Some(index)) = (ranges.init_range, ranges.index_range) {
            builder.set_ranges(&self.seed.id, init, index);
        }
        debug!("表示 {} 结束: {} 字节", self.seed.id, self.total_bytes);
    }
}

// ============================================================
// HLS
// ============================================================

/// 每个输出在 HLS 侧的静态参数
#[derive(Debug, Clone, Default)]
pub struct HlsTrackSeed {
    /// 媒体播放列表输出路径
    pub playlist_path: String,
    /// 主播放列表中引用的 URI
    pub playlist_uri: String,
    /// 显示名 (hls_name)
    pub name: String,
    /// 音频组 ID (hls_group_id; 视频侧为关联组)
    pub group_id: String,
    /// 码率覆盖
    pub bandwidth: u32,
    /// 语言覆盖
    pub language: String,
    /// EXT-X-KEY 的 URI (加密输出)
    pub key_uri: String,
    /// 单文件模式 (字节区间播放列表)
    pub single_file: bool,
    /// 单文件模式的媒体 URI
    pub media_uri: String,
}

/// 播放列表装配用的事件回放
enum HlsEvent {
    Segment {
        name: String,
        start: f64,
        duration: f64,
        size: u64,
    },
    Key(HlsKey),
}

/// HLS 通知器
pub struct HlsNotifier {
    playlist_type: PlaylistType,
    time_shift_buffer_depth: f64,
    master_path: String,
    default_language: String,
    state: Arc<Mutex<HlsState>>,
}

#[derive(Default)]
struct HlsState {
    audios: Vec<AudioEntry>,
    videos: Vec<VideoEntry>,
    /// (路径, 生成好的播放列表)
    playlists: Vec<(String, MediaPlaylist)>,
}

impl HlsNotifier {
    /// 创建通知器
    pub fn new(
        playlist_type: PlaylistType,
        time_shift_buffer_depth: f64,
        master_path: impl Into<String>,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            playlist_type,
            time_shift_buffer_depth,
            master_path: master_path.into(),
            default_language: default_language.into(),
            state: Arc::new(Mutex::new(HlsState::default())),
        }
    }

    /// 为一个输出创建监听适配器
    pub fn listener(&self, seed: HlsTrackSeed, init_uri: Option<String>) -> Box<dyn MuxerListener> {
        Box::new(HlsListener {
            state: Arc::clone(&self.state),
            playlist_type: self.playlist_type,
            time_shift_buffer_depth: self.time_shift_buffer_depth,
            seed,
            init_uri,
            info: None,
            timescale: 1,
            events: Vec::new(),
            total_bytes: 0,
            total_seconds: 0.0,
        })
    }

    /// 写出主播放列表与所有媒体播放列表
    pub fn write(&self) -> FengResult<()> {
        let state = self.state.lock().unwrap();
        for (path, playlist) in &state.playlists {
            playlist.write_to(path)?;
        }
        let mut master = MasterPlaylist::new(self.default_language.clone());
        for audio in &state.audios {
            master.add_audio(audio.clone());
        }
        for video in &state.videos {
            master.add_video(video.clone());
        }
        master.write_to(&self.master_path)
    }

    /// 生成主播放列表文本 (测试用)
    pub fn master_m3u8(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut master = MasterPlaylist::new(self.default_language.clone());
        for audio in &state.audios {
            master.add_audio(audio.clone());
        }
        for video in &state.videos {
            master.add_video(video.clone());
        }
        master.to_m3u8()
    }
}

struct HlsListener {
    state: Arc<Mutex<HlsState>>,
    playlist_type: PlaylistType,
    time_shift_buffer_depth: f64,
    seed: HlsTrackSeed,
    init_uri: Option<String>,
    info: Option<SharedStreamInfo>,
    timescale: u32,
    events: Vec<HlsEvent>,
    total_bytes: u64,
    total_seconds: f64,
}

impl MuxerListener for HlsListener {
    fn on_media_start(&mut self, info: &SharedStreamInfo, time_scale: u32) {
        self.timescale = time_scale;
        self.info = Some(Arc::clone(info));
    }

    fn on_encryption_info_ready(
        &mut self,
        _key_id: &[u8; 16],
        _pssh: &[ProtectionSystemInfo],
        iv: &[u8],
    ) {
        if self.seed.key_uri.is_empty() {
            return;
        }
        self.events.push(HlsEvent::Key(HlsKey {
            method: "SAMPLE-AES-CTR".into(),
            uri: self.seed.key_uri.clone(),
            iv_hex: iv.iter().map(|b| format!("{b:02x}")).collect(),
            key_format: String::new(),
        }));
    }

    fn on_key_rotation(&mut self, _timestamp: i64) {
        if self.seed.key_uri.is_empty() {
            return;
        }
        self.events.push(HlsEvent::Key(HlsKey {
            method: "SAMPLE-AES-CTR".into(),
            uri: self.seed.key_uri.clone(),
            iv_hex: String::new(),
            key_format: String::new(),
        }));
    }

    fn on_new_segment(&mut self, name: &str, start_time: u64, duration: u64, size: u64) {
        let seconds = duration as f64 / f64::from(self.timescale);
        self.total_bytes += size;
        self.total_seconds += seconds;
        self.events.push(HlsEvent::Segment {
            name: name.to_string(),
            start: start_time as f64 / f64::from(self.timescale),
            duration: seconds,
            size,
        });
    }

    fn on_media_end(&mut self, ranges: &MediaRanges, _duration_seconds: f64) {
        let Some(info) = self.info.take() else {
            return;
        };

        let mut playlist = MediaPlaylist::new(self.playlist_type);
        playlist.set_time_shift_buffer_depth(self.time_shift_buffer_depth);
        if self.seed.single_file {
            if let Some((offset, length)) = ranges.init_range {
                playlist.set_init_segment_with_range(self.seed.media_uri.clone(), offset, length);
            }
        } else if let Some(init) = &self.init_uri {
            playlist.set_init_segment(init.clone());
        }

        // 单文件模式用 media_end 的字节区间重放分段
        let mut subsegment = ranges.subsegment_ranges.iter();
        for event in self.events.drain(..) {
            match event {
                HlsEvent::Segment {
                    name,
                    start,
                    duration,
                    ..
                } => {
                    if self.seed.single_file {
                        let range = subsegment.next().copied();
                        playlist.add_segment(
                            self.seed.media_uri.clone(),
                            start,
                            duration,
                            range,
                        );
                    } else {
                        playlist.add_segment(relative_name(&name), start, duration, None);
                    }
                }
                HlsEvent::Key(key) => playlist.add_key(key),
            }
        }

        let bandwidth = if self.seed.bandwidth > 0 {
            self.seed.bandwidth
        } else if self.total_seconds > 0.0 {
            (self.total_bytes as f64 * 8.0 / self.total_seconds) as u32
        } else {
            0
        };

        let mut state = self.state.lock().unwrap();
        match &info.kind {
            StreamKind::Video(v) => state.videos.push(VideoEntry {
                uri: self.seed.playlist_uri.clone(),
                bandwidth,
                codecs: info.codec_string.clone(),
                resolution: (v.width, v.height),
                audio_group: self.seed.group_id.clone(),
            }),
            StreamKind::Audio(a) => state.audios.push(AudioEntry {
                uri: self.seed.playlist_uri.clone(),
                group_id: self.seed.group_id.clone(),
                language: if self.seed.language.is_empty() {
                    info.language.clone()
                } else {
                    self.seed.language.clone()
                },
                name: if self.seed.name.is_empty() {
                    format!("audio-{}", info.language)
                } else {
                    self.seed.name.clone()
                },
                channels: u32::from(a.channels),
                max_bitrate: bandwidth,
                codecs: info.codec_string.clone(),
            }),
            StreamKind::Text(_) => {}
        }
        state
            .playlists
            .push((self.seed.playlist_path.clone(), playlist));
    }
}

/// 分段文件名转播放列表相对引用
fn relative_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}
