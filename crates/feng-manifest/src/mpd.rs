//! DASH MPD 生成.
//!
//! 按 ISO/IEC 23009-1:2014 输出 `MPD/Period/AdaptationSet/Representation`
//! 树. Representation 按 (内容类型, 语言, 保护配置, 编解码器族,
//! 特技播放) 归并进 AdaptationSet; 分段时间线做游程压缩; 动态档维护
//! 滑动窗口并推进 startNumber. `segmentAlignment` 一旦观察到错位即
//! 永久置 false.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::debug;

use feng_core::{FengError, FengResult, IoContext, OpenMode};
use feng_crypto::ProtectionSystemInfo;

use crate::xml::Element;

/// MPD 档位
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MpdKind {
    /// 点播 (static, isoff-on-demand)
    Static,
    /// 直播 (dynamic, isoff-live)
    Dynamic,
}

/// MPD 选项
#[derive(Debug, Clone)]
pub struct MpdOptions {
    /// 档位
    pub kind: MpdKind,
    /// 时移缓冲深度 (秒, 仅动态档; 0 表示不开窗)
    pub time_shift_buffer_depth: f64,
    /// 最小缓冲时长 (秒)
    pub min_buffer_time: f64,
    /// 建议呈现延迟 (秒, 动态档)
    pub suggested_presentation_delay: f64,
    /// 清单最小更新间隔 (秒, 动态档)
    pub minimum_update_period: f64,
    /// 可用起始时间 (ISO-8601, 动态档)
    pub availability_start_time: String,
    /// 发布时间 (ISO-8601, 动态档; 空则省略)
    pub publish_time: String,
    /// 基础 URL
    pub base_url: String,
}

impl Default for MpdOptions {
    fn default() -> Self {
        Self {
            kind: MpdKind::Static,
            time_shift_buffer_depth: 0.0,
            min_buffer_time: 2.0,
            suggested_presentation_delay: 0.0,
            minimum_update_period: 5.0,
            availability_start_time: String::new(),
            publish_time: String::new(),
            base_url: String::new(),
        }
    }
}

/// 内容保护描述
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentProtection {
    /// 方案标识 (cenc / cbcs ...)
    pub scheme: String,
    /// 默认密钥 ID
    pub default_kid: [u8; 16],
    /// 各 DRM 系统
    pub systems: Vec<ProtectionSystemInfo>,
}

/// Representation 的媒体描述
#[derive(Debug, Clone)]
pub struct RepresentationInfo {
    /// 唯一 ID
    pub id: String,
    /// 内容类型 ("video" / "audio" / "text")
    pub content_type: String,
    /// 语言 (BCP-47 最短形式, 可为空)
    pub language: String,
    /// 编解码器字符串
    pub codecs: String,
    /// 码率 (bps)
    pub bandwidth: u32,
    /// 时间刻度
    pub timescale: u32,
    /// 视频: 宽
    pub width: u32,
    /// 视频: 高
    pub height: u32,
    /// 视频: 帧率 (分子/分母)
    pub frame_rate: (u32, u32),
    /// 视频: 像素宽高比
    pub par: (u32, u32),
    /// 音频: 采样率
    pub audio_sampling_rate: u32,
    /// 音频: 声道数
    pub audio_channels: u32,
    /// 特技播放倍率 (0 = 普通)
    pub trick_play_factor: u32,
    /// 保护配置
    pub protection: Option<ContentProtection>,
    /// 点播: 媒体文件 URL
    pub media_url: String,
    /// 点播: init 区间
    pub init_range: Option<(u64, u64)>,
    /// 点播: sidx 区间
    pub index_range: Option<(u64, u64)>,
    /// 直播: 初始化段 URL
    pub init_url: String,
    /// 直播: 分段模板
    pub media_template: String,
}

impl Default for RepresentationInfo {
    fn default() -> Self {
        Self {
            id: String::new(),
            content_type: "video".into(),
            language: String::new(),
            codecs: String::new(),
            bandwidth: 0,
            timescale: 1,
            width: 0,
            height: 0,
            frame_rate: (0, 1),
            par: (1, 1),
            audio_sampling_rate: 0,
            audio_channels: 0,
            trick_play_factor: 0,
            protection: None,
            media_url: String::new(),
            init_range: None,
            index_range: None,
            init_url: String::new(),
            media_template: String::new(),
        }
    }
}

/// 游程压缩的分段条目 (S@t/@d/@r)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimelineEntry {
    start_time: u64,
    duration: u64,
    repeat: u64,
}

/// 一个 Representation 的积累状态
struct Representation {
    info: RepresentationInfo,
    timeline: Vec<TimelineEntry>,
    start_number: u64,
}

impl Representation {
    /// 追加分段并做游程压缩
    fn add_segment(&mut self, start_time: u64, duration: u64) {
        if let Some(last) = self.timeline.last_mut() {
            let expected = last.start_time + last.duration * (last.repeat + 1);
            if last.duration == duration && expected == start_time {
                last.repeat += 1;
                return;
            }
        }
        self.timeline.push(TimelineEntry {
            start_time,
            duration,
            repeat: 0,
        });
    }

    /// 滑动窗口: 丢弃结束时间落在窗口之外的分段, 返回丢弃数
    fn apply_window(&mut self, depth_ticks: u64) -> u64 {
        let Some(latest_start) = self.latest_segment_start() else {
            return 0;
        };
        let cutoff = latest_start.saturating_sub(depth_ticks);
        let mut dropped = 0u64;

        let mut timeline = Vec::with_capacity(self.timeline.len());
        for mut entry in self.timeline.drain(..) {
            // 逐个剥掉游程头部已过期的分段
            while entry.start_time + entry.duration < cutoff {
                dropped += 1;
                if entry.repeat == 0 {
                    entry.duration = 0; // 整条丢弃
                    break;
                }
                entry.start_time += entry.duration;
                entry.repeat -= 1;
            }
            if entry.duration > 0 {
                timeline.push(entry);
            }
        }
        self.timeline = timeline;
        self.start_number += dropped;
        dropped
    }

    fn latest_segment_start(&self) -> Option<u64> {
        self.timeline
            .last()
            .map(|e| e.start_time + e.duration * e.repeat)
    }

    /// 展开的分段起点序列 (对齐检查用)
    fn segment_starts(&self) -> Vec<u64> {
        let mut out = Vec::new();
        for entry in &self.timeline {
            for i in 0..=entry.repeat {
                out.push(entry.start_time + entry.duration * i);
            }
        }
        out
    }

    fn total_duration_seconds(&self) -> f64 {
        let ticks: u64 = self
            .timeline
            .iter()
            .map(|e| e.duration * (e.repeat + 1))
            .sum();
        ticks as f64 / f64::from(self.info.timescale.max(1))
    }
}

/// AdaptationSet 归并键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SetKey {
    content_type: String,
    language: String,
    protected: Option<[u8; 16]>,
    codec_family: String,
    trick_play: bool,
}

fn codec_family(codecs: &str) -> String {
    codecs.split('.').next().unwrap_or(codecs).to_string()
}

struct AdaptationSet {
    key: SetKey,
    /// 音频语言分组 ID
    group: Option<u32>,
    representations: Vec<Representation>,
    /// 一旦观察到分段错位即永久 false
    alignment_latched_false: bool,
}

/// MPD 构建器
pub struct MpdBuilder {
    options: MpdOptions,
    sets: Vec<AdaptationSet>,
    next_group: u32,
    /// id → (set 下标, rep 下标)
    index: HashMap<String, (usize, usize)>,
}

impl MpdBuilder {
    /// 创建构建器
    pub fn new(options: MpdOptions) -> Self {
        Self {
            options,
            sets: Vec::new(),
            next_group: 1,
            index: HashMap::new(),
        }
    }

    /// 注册一个 Representation, 自动归并进 AdaptationSet
    pub fn add_representation(&mut self, info: RepresentationInfo) -> FengResult<()> {
        if self.index.contains_key(&info.id) {
            return Err(FengError::AlreadyExists(format!(
                "Representation {}",
                info.id
            )));
        }
        let key = SetKey {
            content_type: info.content_type.clone(),
            language: info.language.clone(),
            protected: info.protection.as_ref().map(|p| p.default_kid),
            codec_family: codec_family(&info.codecs),
            trick_play: info.trick_play_factor > 0,
        };

        let set_index = match self.sets.iter().position(|s| s.key == key) {
            Some(i) => i,
            None => {
                let group = (info.content_type == "audio").then(|| {
                    let g = self.next_group;
                    self.next_group += 1;
                    g
                });
                self.sets.push(AdaptationSet {
                    key,
                    group,
                    representations: Vec::new(),
                    alignment_latched_false: false,
                });
                self.sets.len() - 1
            }
        };

        let set = &mut self.sets[set_index];
        set.representations.push(Representation {
            info,
            timeline: Vec::new(),
            start_number: 1,
        });
        let rep_index = set.representations.len() - 1;
        let id = set.representations[rep_index].info.id.clone();
        self.index.insert(id, (set_index, rep_index));
        Ok(())
    }

    /// 为 Representation 追加分段
    pub fn add_segment(&mut self, rep_id: &str, start_time: u64, duration: u64) -> FengResult<()> {
        let (set_index, rep_index) = *self
            .index
            .get(rep_id)
            .ok_or_else(|| FengError::NotFound(format!("Representation {rep_id}")))?;
        let set = &mut self.sets[set_index];
        set.representations[rep_index].add_segment(start_time, duration);

        // 对齐检查: 与集合内首个 Representation 比较起点序列
        if !set.alignment_latched_false && set.representations.len() > 1 {
            let reference = set.representations[0].segment_starts();
            let this = set.representations[rep_index].segment_starts();
            let n = reference.len().min(this.len());
            if reference[..n] != this[..n] {
                debug!("AdaptationSet 分段错位: segmentAlignment 永久置 false");
                set.alignment_latched_false = true;
            }
        }

        // 动态档滑动窗口
        if self.options.kind == MpdKind::Dynamic && self.options.time_shift_buffer_depth > 0.0 {
            let set = &mut self.sets[set_index];
            let rep = &mut set.representations[rep_index];
            let depth_ticks = (self.options.time_shift_buffer_depth
                * f64::from(rep.info.timescale)) as u64;
            rep.apply_window(depth_ticks);
        }
        Ok(())
    }

    /// 当前 startNumber (测试与清单共用)
    pub fn start_number(&self, rep_id: &str) -> Option<u64> {
        let (s, r) = *self.index.get(rep_id)?;
        Some(self.sets[s].representations[r].start_number)
    }

    /// 输出结束后回填估算码率
    pub fn set_bandwidth(&mut self, rep_id: &str, bandwidth: u32) {
        if let Some(&(s, r)) = self.index.get(rep_id) {
            self.sets[s].representations[r].info.bandwidth = bandwidth;
        }
    }

    /// 单段模式: 回填 init 与 sidx 字节区间
    pub fn set_ranges(&mut self, rep_id: &str, init: (u64, u64), index: (u64, u64)) {
        if let Some(&(s, r)) = self.index.get(rep_id) {
            let info = &mut self.sets[s].representations[r].info;
            info.init_range = Some(init);
            info.index_range = Some(index);
        }
    }

    /// 生成 MPD 文本
    pub fn to_xml(&self) -> String {
        let mut mpd = Element::new("MPD")
            .attr("xmlns", "urn:mpeg:DASH:schema:MPD:2011")
            .attr("xmlns:xsi", "http://www.w3.org/2001/XMLSchema-instance")
            .attr("xmlns:cenc", "urn:mpeg:cenc:2013")
            .attr(
                "xsi:schemaLocation",
                "urn:mpeg:DASH:schema:MPD:2011 DASH-MPD.xsd",
            )
            .attr("minBufferTime", iso_duration(self.options.min_buffer_time));

        match self.options.kind {
            MpdKind::Static => {
                mpd = mpd
                    .attr("type", "static")
                    .attr("profiles", "urn:mpeg:dash:profile:isoff-on-demand:2011");
                let duration = self
                    .sets
                    .iter()
                    .flat_map(|s| &s.representations)
                    .map(|r| r.total_duration_seconds())
                    .fold(0.0f64, f64::max);
                mpd = mpd.attr("mediaPresentationDuration", iso_duration(duration));
            }
            MpdKind::Dynamic => {
                mpd = mpd
                    .attr("type", "dynamic")
                    .attr("profiles", "urn:mpeg:dash:profile:isoff-live:2011");
                if !self.options.availability_start_time.is_empty() {
                    mpd = mpd.attr(
                        "availabilityStartTime",
                        self.options.availability_start_time.clone(),
                    );
                }
                if !self.options.publish_time.is_empty() {
                    mpd = mpd.attr("publishTime", self.options.publish_time.clone());
                }
                if self.options.time_shift_buffer_depth > 0.0 {
                    mpd = mpd.attr(
                        "timeShiftBufferDepth",
                        iso_duration(self.options.time_shift_buffer_depth),
                    );
                }
                if self.options.minimum_update_period > 0.0 {
                    mpd = mpd.attr(
                        "minimumUpdatePeriod",
                        iso_duration(self.options.minimum_update_period),
                    );
                }
                if self.options.suggested_presentation_delay > 0.0 {
                    mpd = mpd.attr(
                        "suggestedPresentationDelay",
                        iso_duration(self.options.suggested_presentation_delay),
                    );
                }
            }
        }

        let mut period = Element::new("Period").attr("id", "0");
        if !self.options.base_url.is_empty() {
            period.push(Element::new("BaseURL").text(self.options.base_url.clone()));
        }
        for set in &self.sets {
            period.push(self.set_to_xml(set));
        }
        mpd.push(period);
        mpd.to_document()
    }

    fn set_to_xml(&self, set: &AdaptationSet) -> Element {
        let mut element = Element::new("AdaptationSet")
            .attr("contentType", set.key.content_type.clone());
        if !set.key.language.is_empty() {
            element = element.attr("lang", set.key.language.clone());
        }
        if let Some(group) = set.group {
            element = element.attr("group", group.to_string());
        }
        if !set.alignment_latched_false {
            element = element.attr("segmentAlignment", "true");
        }

        // 特技播放角色
        if set.key.trick_play {
            element.push(
                Element::new("Role")
                    .attr("schemeIdUri", "urn:mpeg:dash:role:2011")
                    .attr("value", "alternate"),
            );
            if let Some(rep) = set.representations.first() {
                element.push(
                    Element::new("EssentialProperty")
                        .attr("schemeIdUri", "http://dashif.org/guidelines/trickmode")
                        .attr("value", rep.info.trick_play_factor.to_string()),
                );
            }
        }

        // 保护配置 (集合内一致)
        if let Some(protection) = set
            .representations
            .first()
            .and_then(|r| r.info.protection.as_ref())
        {
            element.push(
                Element::new("ContentProtection")
                    .attr("schemeIdUri", "urn:mpeg:dash:mp4protection:2011")
                    .attr("value", protection.scheme.clone())
                    .attr("cenc:default_KID", format_uuid(&protection.default_kid)),
            );
            for system in &protection.systems {
                element.push(
                    Element::new("ContentProtection")
                        .attr(
                            "schemeIdUri",
                            format!("urn:uuid:{}", format_uuid(&system.system_id)),
                        )
                        .child(Element::new("cenc:pssh").text(BASE64.encode(&system.pssh))),
                );
            }
        }

        for rep in &set.representations {
            element.push(self.representation_to_xml(rep));
        }
        element
    }

    fn representation_to_xml(&self, rep: &Representation) -> Element {
        let info = &rep.info;
        let mime = match info.content_type.as_str() {
            "audio" => "audio/mp4",
            "text" => "application/mp4",
            _ => "video/mp4",
        };
        let mut element = Element::new("Representation")
            .attr("id", info.id.clone())
            .attr("bandwidth", info.bandwidth.to_string())
            .attr("codecs", info.codecs.clone())
            .attr("mimeType", mime);

        if info.content_type == "video" {
            element = element
                .attr("width", info.width.to_string())
                .attr("height", info.height.to_string());
            if info.frame_rate.0 > 0 {
                element = element.attr(
                    "frameRate",
                    if info.frame_rate.1 == 1 {
                        info.frame_rate.0.to_string()
                    } else {
                        format!("{}/{}", info.frame_rate.0, info.frame_rate.1)
                    },
                );
            }
            element = element.attr("sar", format!("{}:{}", info.par.0, info.par.1));
        } else if info.content_type == "audio" {
            element = element.attr("audioSamplingRate", info.audio_sampling_rate.to_string());
            element.push(
                Element::new("AudioChannelConfiguration")
                    .attr(
                        "schemeIdUri",
                        "urn:mpeg:dash:23003:3:audio_channel_configuration:2011",
                    )
                    .attr("value", info.audio_channels.to_string()),
            );
        }

        match self.options.kind {
            MpdKind::Static => {
                // 点播: BaseURL + SegmentBase (indexRange)
                element.push(Element::new("BaseURL").text(info.media_url.clone()));
                if let (Some(init), Some(index)) = (info.init_range, info.index_range) {
                    let mut segment_base = Element::new("SegmentBase")
                        .attr("timescale", info.timescale.to_string())
                        .attr(
                            "indexRange",
                            format!("{}-{}", index.0, index.0 + index.1 - 1),
                        );
                    segment_base.push(
                        Element::new("Initialization")
                            .attr("range", format!("{}-{}", init.0, init.0 + init.1 - 1)),
                    );
                    element.push(segment_base);
                }
            }
            MpdKind::Dynamic => {
                let mut template = Element::new("SegmentTemplate")
                    .attr("timescale", info.timescale.to_string())
                    .attr("initialization", info.init_url.clone())
                    .attr("media", info.media_template.clone())
                    .attr("startNumber", rep.start_number.to_string());
                let mut timeline = Element::new("SegmentTimeline");
                for entry in &rep.timeline {
                    let mut s = Element::new("S")
                        .attr("t", entry.start_time.to_string())
                        .attr("d", entry.duration.to_string());
                    if entry.repeat > 0 {
                        s = s.attr("r", entry.repeat.to_string());
                    }
                    timeline.push(s);
                }
                template.push(timeline);
                element.push(template);
            }
        }
        element
    }

    /// 写出 MPD 文件 (原子重命名)
    pub fn write_to(&self, path: &str) -> FengResult<()> {
        let xml = self.to_xml();
        let mut io = IoContext::open(path, OpenMode::AtomicWrite)?;
        io.write_all(xml.as_bytes())?;
        io.close()
    }
}

/// ISO-8601 时长 (PT...S)
fn iso_duration(seconds: f64) -> String {
    format!("PT{seconds:.3}S")
}

/// 16 字节转 UUID 文本
fn format_uuid(bytes: &[u8; 16]) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        hex_range(bytes, 0, 4),
        hex_range(bytes, 4, 6),
        hex_range(bytes, 6, 8),
        hex_range(bytes, 8, 10),
        hex_range(bytes, 10, 16),
    )
}

fn hex_range(bytes: &[u8], from: usize, to: usize) -> String {
    bytes[from..to].iter().map(|b| format!("{b:02x}")).collect()
}
