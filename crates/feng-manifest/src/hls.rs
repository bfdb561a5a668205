//! HLS 播放列表生成 (RFC 8216, 版本 6).
//!
//! 每轨一个媒体播放列表 (EXTINF 序列、EXT-X-MAP、轮换处的 EXT-X-KEY、
//! 滑动窗口), 以及一个主播放列表 (EXT-X-STREAM-INF ×
//! EXT-X-MEDIA 音频组).

use std::fmt::Write as _;

use feng_core::{FengResult, IoContext, OpenMode};

/// 播放列表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaylistType {
    /// 点播 (以 ENDLIST 结束)
    Vod,
    /// 事件
    Event,
    /// 直播 (无类型标签)
    Live,
}

/// 加密标签参数
#[derive(Debug, Clone, PartialEq)]
pub struct HlsKey {
    /// METHOD (SAMPLE-AES / SAMPLE-AES-CTR)
    pub method: String,
    /// URI
    pub uri: String,
    /// IV (十六进制, 不含 0x 前缀; 空则省略)
    pub iv_hex: String,
    /// KEYFORMAT (空则省略)
    pub key_format: String,
}

/// 播放列表条目
#[derive(Debug, Clone)]
enum Entry {
    Segment {
        uri: String,
        /// 起始时间 (秒)
        start: f64,
        /// 时长 (秒)
        duration: f64,
        /// 单文件模式的字节区间
        byte_range: Option<(u64, u64)>,
    },
    Key(HlsKey),
    Discontinuity,
}

/// 媒体播放列表
pub struct MediaPlaylist {
    playlist_type: PlaylistType,
    /// fMP4 初始化段 (EXT-X-MAP)
    init_uri: Option<String>,
    /// 单文件模式下初始化段的字节区间 (偏移, 长度)
    init_byte_range: Option<(u64, u64)>,
    /// 滑动窗口深度 (秒, 0 不开窗)
    time_shift_buffer_depth: f64,
    entries: Vec<Entry>,
    media_sequence: u64,
    discontinuity_sequence: u64,
    /// 是否出现过未加密分段 (EXT-X-KEY 前插 DISCONTINUITY 的判据)
    has_clear_segments: bool,
    has_keys: bool,
}

impl MediaPlaylist {
    /// 创建媒体播放列表
    pub fn new(playlist_type: PlaylistType) -> Self {
        Self {
            playlist_type,
            init_uri: None,
            init_byte_range: None,
            time_shift_buffer_depth: 0.0,
            entries: Vec::new(),
            media_sequence: 0,
            discontinuity_sequence: 0,
            has_clear_segments: false,
            has_keys: false,
        }
    }

    /// 设置初始化段 (EXT-X-MAP)
    pub fn set_init_segment(&mut self, uri: impl Into<String>) {
        self.init_uri = Some(uri.into());
    }

    /// 设置单文件模式的初始化段 (带字节区间的 EXT-X-MAP)
    pub fn set_init_segment_with_range(&mut self, uri: impl Into<String>, offset: u64, length: u64) {
        self.init_uri = Some(uri.into());
        self.init_byte_range = Some((offset, length));
    }

    /// 设置滑动窗口深度
    pub fn set_time_shift_buffer_depth(&mut self, seconds: f64) {
        self.time_shift_buffer_depth = seconds;
    }

    /// 追加一个分段
    pub fn add_segment(
        &mut self,
        uri: impl Into<String>,
        start: f64,
        duration: f64,
        byte_range: Option<(u64, u64)>,
    ) {
        if !self.has_keys {
            self.has_clear_segments = true;
        }
        self.entries.push(Entry::Segment {
            uri: uri.into(),
            start,
            duration,
            byte_range,
        });
        self.apply_window();
    }

    /// 追加加密变更 (密钥轮换)
    ///
    /// 此前存在未加密分段时先插入一条 EXT-X-DISCONTINUITY.
    pub fn add_key(&mut self, key: HlsKey) {
        if self.has_clear_segments && !self.has_keys {
            self.entries.push(Entry::Discontinuity);
        }
        self.has_keys = true;
        self.entries.push(Entry::Key(key));
    }

    /// 追加时间不连续点
    pub fn add_discontinuity(&mut self) {
        self.entries.push(Entry::Discontinuity);
    }

    /// 滑动窗口: 移除 start+duration ≤ latest_start - depth 的分段
    ///
    /// 新窗口头之前紧邻的 EXT-X-KEY 保留 (描述窗口头生效的密钥).
    fn apply_window(&mut self) {
        if self.time_shift_buffer_depth <= 0.0 {
            return;
        }
        let latest_start = self
            .entries
            .iter()
            .rev()
            .find_map(|e| match e {
                Entry::Segment { start, .. } => Some(*start),
                _ => None,
            })
            .unwrap_or(0.0);
        let cutoff = latest_start - self.time_shift_buffer_depth;

        loop {
            // 找到第一个分段条目
            let Some(first_segment) = self.entries.iter().position(|e| matches!(e, Entry::Segment { .. }))
            else {
                break;
            };
            let expired = match &self.entries[first_segment] {
                Entry::Segment {
                    start, duration, ..
                } => start + duration <= cutoff,
                _ => false,
            };
            if !expired {
                break;
            }
            self.entries.remove(first_segment);
            self.media_sequence += 1;

            // 头部非分段条目清理: 保留最近一条 Key, 丢弃多余 Key 与 Discontinuity
            let mut last_key: Option<HlsKey> = None;
            while let Some(front) = self.entries.first() {
                match front {
                    Entry::Key(key) => {
                        last_key = Some(key.clone());
                        self.entries.remove(0);
                    }
                    Entry::Discontinuity => {
                        self.discontinuity_sequence += 1;
                        self.entries.remove(0);
                    }
                    Entry::Segment { .. } => break,
                }
            }
            if let Some(key) = last_key {
                self.entries.insert(0, Entry::Key(key));
            }
        }
    }

    /// 目标时长 = ceil(最大分段时长)
    pub fn target_duration(&self) -> u64 {
        self.entries
            .iter()
            .filter_map(|e| match e {
                Entry::Segment { duration, .. } => Some(*duration),
                _ => None,
            })
            .fold(0.0f64, f64::max)
            .ceil() as u64
    }

    /// 生成播放列表文本
    pub fn to_m3u8(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:6\n");
        writeln!(out, "#EXT-X-TARGETDURATION:{}", self.target_duration()).unwrap();
        match self.playlist_type {
            PlaylistType::Vod => out.push_str("#EXT-X-PLAYLIST-TYPE:VOD\n"),
            PlaylistType::Event => out.push_str("#EXT-X-PLAYLIST-TYPE:EVENT\n"),
            PlaylistType::Live => {}
        }
        if self.media_sequence > 0 {
            writeln!(out, "#EXT-X-MEDIA-SEQUENCE:{}", self.media_sequence).unwrap();
        }
        if self.discontinuity_sequence > 0 {
            writeln!(
                out,
                "#EXT-X-DISCONTINUITY-SEQUENCE:{}",
                self.discontinuity_sequence
            )
            .unwrap();
        }
        if let Some(init) = &self.init_uri {
            match self.init_byte_range {
                Some((offset, length)) => {
                    writeln!(out, "#EXT-X-MAP:URI=\"{init}\",BYTERANGE=\"{length}@{offset}\"")
                        .unwrap()
                }
                None => writeln!(out, "#EXT-X-MAP:URI=\"{init}\"").unwrap(),
            }
        }

        for entry in &self.entries {
            match entry {
                Entry::Segment {
                    uri,
                    duration,
                    byte_range,
                    ..
                } => {
                    writeln!(out, "#EXTINF:{duration:.3},").unwrap();
                    if let Some((offset, length)) = byte_range {
                        writeln!(out, "#EXT-X-BYTERANGE:{length}@{offset}").unwrap();
                    }
                    writeln!(out, "{uri}").unwrap();
                }
                Entry::Key(key) => {
                    write!(out, "#EXT-X-KEY:METHOD={},URI=\"{}\"", key.method, key.uri).unwrap();
                    if !key.iv_hex.is_empty() {
                        write!(out, ",IV=0x{}", key.iv_hex).unwrap();
                    }
                    if !key.key_format.is_empty() {
                        write!(out, ",KEYFORMAT=\"{}\"", key.key_format).unwrap();
                    }
                    out.push('\n');
                }
                Entry::Discontinuity => out.push_str("#EXT-X-DISCONTINUITY\n"),
            }
        }

        if self.playlist_type == PlaylistType::Vod {
            out.push_str("#EXT-X-ENDLIST\n");
        }
        out
    }

    /// 写出文件 (原子重命名)
    pub fn write_to(&self, path: &str) -> FengResult<()> {
        let mut io = IoContext::open(path, OpenMode::AtomicWrite)?;
        io.write_all(self.to_m3u8().as_bytes())?;
        io.close()
    }
}

// ============================================================
// 主播放列表
// ============================================================

/// 音频 rendition
#[derive(Debug, Clone)]
pub struct AudioEntry {
    /// 播放列表 URI
    pub uri: String,
    /// 组 ID
    pub group_id: String,
    /// 语言
    pub language: String,
    /// 显示名
    pub name: String,
    /// 声道数
    pub channels: u32,
    /// 最大码率 (bps, STREAM-INF 合并计算)
    pub max_bitrate: u32,
    /// 编解码器字符串
    pub codecs: String,
}

/// 视频变体
#[derive(Debug, Clone)]
pub struct VideoEntry {
    /// 播放列表 URI
    pub uri: String,
    /// 码率 (bps)
    pub bandwidth: u32,
    /// 编解码器字符串
    pub codecs: String,
    /// 分辨率
    pub resolution: (u32, u32),
    /// 关联的音频组 (空 = 无)
    pub audio_group: String,
}

/// 主播放列表
pub struct MasterPlaylist {
    /// 默认语言 (首个匹配的音频标记 DEFAULT=YES)
    pub default_language: String,
    audios: Vec<AudioEntry>,
    videos: Vec<VideoEntry>,
}

impl MasterPlaylist {
    /// 创建主播放列表
    pub fn new(default_language: impl Into<String>) -> Self {
        Self {
            default_language: default_language.into(),
            audios: Vec::new(),
            videos: Vec::new(),
        }
    }

    /// 登记一个音频 rendition
    pub fn add_audio(&mut self, entry: AudioEntry) {
        self.audios.push(entry);
    }

    /// 登记一个视频变体
    pub fn add_video(&mut self, entry: VideoEntry) {
        self.videos.push(entry);
    }

    /// 生成主播放列表文本
    pub fn to_m3u8(&self) -> String {
        let mut out = String::new();
        out.push_str("#EXTM3U\n");
        out.push_str("#EXT-X-VERSION:6\n");

        // EXT-X-MEDIA: DEFAULT 只给首个默认语言条目, AUTOSELECT 给每种语言的首个
        let mut default_used = false;
        let mut autoselect_languages: Vec<&str> = Vec::new();
        for audio in &self.audios {
            let is_default = !default_used && audio.language == self.default_language;
            if is_default {
                default_used = true;
            }
            let autoselect = !autoselect_languages.contains(&audio.language.as_str());
            if autoselect {
                autoselect_languages.push(&audio.language);
            }

            write!(
                out,
                "#EXT-X-MEDIA:TYPE=AUDIO,URI=\"{}\",GROUP-ID=\"{}\",LANGUAGE=\"{}\",NAME=\"{}\"",
                audio.uri, audio.group_id, audio.language, audio.name
            )
            .unwrap();
            if is_default {
                out.push_str(",DEFAULT=YES");
            }
            if autoselect || is_default {
                out.push_str(",AUTOSELECT=YES");
            }
            writeln!(out, ",CHANNELS=\"{}\"", audio.channels).unwrap();
        }

        // EXT-X-STREAM-INF: 视频 × 音频组
        for video in &self.videos {
            let group_audios: Vec<&AudioEntry> = self
                .audios
                .iter()
                .filter(|a| a.group_id == video.audio_group)
                .collect();
            let audio_bitrate = group_audios.iter().map(|a| a.max_bitrate).max().unwrap_or(0);
            let bandwidth = video.bandwidth + audio_bitrate;

            let codecs = match group_audios.first() {
                Some(audio) if !audio.codecs.is_empty() => {
                    format!("{},{}", video.codecs, audio.codecs)
                }
                _ => video.codecs.clone(),
            };

            write!(
                out,
                "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},CODECS=\"{codecs}\",RESOLUTION={}x{}",
                video.resolution.0, video.resolution.1
            )
            .unwrap();
            if !video.audio_group.is_empty() && !group_audios.is_empty() {
                write!(out, ",AUDIO=\"{}\"", video.audio_group).unwrap();
            }
            out.push('\n');
            writeln!(out, "{}", video.uri).unwrap();
        }
        out
    }

    /// 写出文件 (原子重命名)
    pub fn write_to(&self, path: &str) -> FengResult<()> {
        let mut io = IoContext::open(path, OpenMode::AtomicWrite)?;
        io.write_all(self.to_m3u8().as_bytes())?;
        io.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_duration_and_endlist() {
        let mut playlist = MediaPlaylist::new(PlaylistType::Vod);
        playlist.set_init_segment("init.mp4");
        playlist.add_segment("seg-1.m4s", 0.0, 6.006, None);
        playlist.add_segment("seg-2.m4s", 6.006, 5.0, None);

        let text = playlist.to_m3u8();
        assert!(text.starts_with("#EXTM3U\n#EXT-X-VERSION:6\n"));
        // ceil(6.006) = 7
        assert!(text.contains("#EXT-X-TARGETDURATION:7\n"));
        assert!(text.contains("#EXT-X-PLAYLIST-TYPE:VOD\n"));
        assert!(text.contains("#EXT-X-MAP:URI=\"init.mp4\"\n"));
        assert!(text.contains("#EXTINF:6.006,\nseg-1.m4s\n"));
        assert!(text.ends_with("#EXT-X-ENDLIST\n"));

        // 非 VOD 不带 ENDLIST
        let live = MediaPlaylist::new(PlaylistType::Live);
        assert!(!live.to_m3u8().contains("#EXT-X-ENDLIST"));
    }

    #[test]
    fn test_key_preceded_by_discontinuity_after_clear() {
        let mut playlist = MediaPlaylist::new(PlaylistType::Vod);
        playlist.add_segment("clear-1.m4s", 0.0, 4.0, None);
        playlist.add_key(HlsKey {
            method: "SAMPLE-AES-CTR".into(),
            uri: "skd://key1".into(),
            iv_hex: "00112233445566778899aabbccddeeff".into(),
            key_format: String::new(),
        });
        playlist.add_segment("enc-1.m4s", 4.0, 4.0, None);

        let text = playlist.to_m3u8();
        let discontinuity_pos = text.find("#EXT-X-DISCONTINUITY\n").unwrap();
        let key_pos = text.find("#EXT-X-KEY:").unwrap();
        assert!(discontinuity_pos < key_pos, "KEY 前必须有 DISCONTINUITY");
        assert!(text.contains("METHOD=SAMPLE-AES-CTR"));
        assert!(text.contains("IV=0x00112233445566778899aabbccddeeff"));
    }

    #[test]
    fn test_sliding_window_retains_key() {
        let mut playlist = MediaPlaylist::new(PlaylistType::Live);
        playlist.set_time_shift_buffer_depth(10.0);
        playlist.add_key(HlsKey {
            method: "SAMPLE-AES-CTR".into(),
            uri: "skd://key1".into(),
            iv_hex: String::new(),
            key_format: String::new(),
        });
        for i in 0..6u32 {
            playlist.add_segment(format!("s{i}.m4s"), f64::from(i) * 5.0, 5.0, None);
        }
        // latest_start 25, cutoff 15 → s0 (0+5≤15), s1 (5+5≤15), s2 (10+5≤15) 移除
        let text = playlist.to_m3u8();
        assert!(!text.contains("s0.m4s"));
        assert!(!text.contains("s2.m4s"));
        assert!(text.contains("s3.m4s"));
        assert!(text.contains("#EXT-X-MEDIA-SEQUENCE:3\n"));
        // 窗口头之前的密钥保留
        let key_pos = text.find("#EXT-X-KEY:").unwrap();
        let seg_pos = text.find("s3.m4s").unwrap();
        assert!(key_pos < seg_pos);
    }

    #[test]
    fn test_byte_range_output() {
        let mut playlist = MediaPlaylist::new(PlaylistType::Vod);
        playlist.add_segment("media.mp4", 0.0, 6.0, Some((800, 120_000)));
        let text = playlist.to_m3u8();
        assert!(text.contains("#EXT-X-BYTERANGE:120000@800\n"));
    }

    #[test]
    fn test_master_audio_groups_default_autoselect() {
        // 两种语言, default_language=en:
        // en 行 DEFAULT=YES,AUTOSELECT=YES; fr 行只有 AUTOSELECT=YES
        let mut master = MasterPlaylist::new("en");
        master.add_audio(AudioEntry {
            uri: "audio-en.m3u8".into(),
            group_id: "audio".into(),
            language: "en".into(),
            name: "English".into(),
            channels: 2,
            max_bitrate: 128_000,
            codecs: "mp4a.40.2".into(),
        });
        master.add_audio(AudioEntry {
            uri: "audio-fr.m3u8".into(),
            group_id: "audio".into(),
            language: "fr".into(),
            name: "Français".into(),
            channels: 2,
            max_bitrate: 96_000,
            codecs: "mp4a.40.2".into(),
        });
        master.add_video(VideoEntry {
            uri: "video.m3u8".into(),
            bandwidth: 1_000_000,
            codecs: "avc1.42c01e".into(),
            resolution: (1280, 720),
            audio_group: "audio".into(),
        });

        let text = master.to_m3u8();
        let media_lines: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("#EXT-X-MEDIA:TYPE=AUDIO"))
            .collect();
        assert_eq!(media_lines.len(), 2);
        assert!(media_lines[0].contains("LANGUAGE=\"en\""));
        assert!(media_lines[0].contains("DEFAULT=YES"));
        assert!(media_lines[0].contains("AUTOSELECT=YES"));
        assert!(media_lines[1].contains("LANGUAGE=\"fr\""));
        assert!(!media_lines[1].contains("DEFAULT=YES"));
        assert!(media_lines[1].contains("AUTOSELECT=YES"));

        // BANDWIDTH = 视频 + 组内最大音频
        assert!(text.contains("BANDWIDTH=1128000"));
        assert!(text.contains("CODECS=\"avc1.42c01e,mp4a.40.2\""));
        assert!(text.contains("RESOLUTION=1280x720"));
        assert!(text.contains("AUDIO=\"audio\""));
    }
}
