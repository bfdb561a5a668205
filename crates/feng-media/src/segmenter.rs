//! ISO-BMFF 分段器.
//!
//! 把分片组合为子分段与分段:
//! - 单段模式: 分片流式写入临时文件, finalize 时合并每段的 sidx 引用,
//!   写出 `ftyp‖moov‖sidx‖分片串` 并汇报 init/index 字节区间
//! - 多段模式: 初始化段写一次, 每个分段按模板名写独立文件
//!   (styp + sidx + moof/mdat 串), 并逐段通知监听器
//!
//! 分段边界与关键帧对齐策略、密钥轮换处的强制切段都在 `add_sample`
//! 的闭合检查里.

use std::io::SeekFrom;

use log::{debug, info};

use feng_core::io::TempFileBackend;
use feng_core::{BufferWriter, FengError, FengResult, IoContext, OpenMode};

use crate::boxes::{
    box_to_vec, write_box, FileTypeBox, MovieFragmentBox, MovieFragmentHeaderBox,
    SegmentIndexBox, SegmentReference, TrackFragmentBox,
};
use crate::fragmenter::{FragmentReference, Fragmenter};
use crate::listener::{FanoutListener, MediaRanges, MuxerListener};
use crate::moov_builder::{build_ftyp, build_moov, EncryptionInit, OUTPUT_TRACK_ID};
use crate::sample::MediaSample;
use crate::template::expand_template;
use crate::SharedStreamInfo;

/// 分段器选项
#[derive(Debug, Clone)]
pub struct SegmenterOptions {
    /// 分段目标时长 (秒)
    pub segment_duration_seconds: f64,
    /// 分片目标时长 (秒)
    pub fragment_duration_seconds: f64,
    /// 分段边界对齐关键帧
    pub segment_sap_aligned: bool,
    /// 分片边界对齐关键帧
    pub fragment_sap_aligned: bool,
    /// 名义码率 (bps, `$Bandwidth$` 与清单使用; 0 表示由输出估算)
    pub bandwidth: u32,
}

impl Default for SegmenterOptions {
    fn default() -> Self {
        Self {
            segment_duration_seconds: 6.0,
            fragment_duration_seconds: 2.0,
            segment_sap_aligned: true,
            fragment_sap_aligned: true,
            bandwidth: 0,
        }
    }
}

/// 输出布局模式
pub enum SegmenterMode {
    /// 单文件点播输出
    SingleSegment {
        /// 输出路径
        output: String,
        /// 临时文件目录 (None 使用系统默认)
        temp_dir: Option<std::path::PathBuf>,
    },
    /// 模板命名的多段输出
    MultiSegment {
        /// 初始化段路径
        init_output: String,
        /// 分段名模板
        segment_template: String,
    },
}

/// 分段器
pub struct Segmenter {
    mode: SegmenterMode,
    options: SegmenterOptions,
    info: Option<SharedStreamInfo>,
    fragmenter: Fragmenter,
    listener: FanoutListener,

    /// 目标时长换算到流时间刻度
    segment_duration_ticks: u64,
    /// 初始化段字节 (ftyp+moov)
    init_bytes: Vec<u8>,
    /// 单段模式的临时存储
    temp: Option<IoContext>,
    /// 当前分段内各分片的引用
    current_refs: Vec<FragmentReference>,
    /// 当前分段的分片字节 (多段缓冲; 单段直接进临时文件)
    current_bytes: BufferWriter,
    /// 单段模式: 每个分段的引用集合 (finalize 合并)
    finished_segments: Vec<Vec<FragmentReference>>,
    /// moof 序号 (1 起)
    sequence_number: u32,
    /// 分段序号 (`$Number$`, 1 起)
    segment_number: u64,
    /// 密钥轮换要求的强制切段
    force_segment_break: bool,
    /// 输出累计时长
    total_duration: u64,
    /// sidx 区间 (单段模式, finalize 时填充)
    index_range: Option<(u64, u64)>,
}

impl Segmenter {
    /// 创建分段器
    pub fn new(mode: SegmenterMode, options: SegmenterOptions) -> Self {
        Self {
            mode,
            options,
            info: None,
            fragmenter: Fragmenter::new(OUTPUT_TRACK_ID, 0, true),
            listener: FanoutListener::new(),
            segment_duration_ticks: 0,
            init_bytes: Vec::new(),
            temp: None,
            current_refs: Vec::new(),
            current_bytes: BufferWriter::new(),
            finished_segments: Vec::new(),
            sequence_number: 1,
            segment_number: 1,
            force_segment_break: false,
            total_duration: 0,
            index_range: None,
        }
    }

    /// 挂载监听器
    pub fn add_listener(&mut self, listener: Box<dyn MuxerListener>) {
        self.listener.add(listener);
    }

    /// 初始化: 装配 ftyp+moov 并准备输出
    pub fn initialize(
        &mut self,
        info: SharedStreamInfo,
        encryption: Option<&EncryptionInit>,
    ) -> FengResult<()> {
        let time_scale = info.time_scale;
        self.segment_duration_ticks =
            (self.options.segment_duration_seconds * f64::from(time_scale)) as u64;
        let fragment_duration_ticks =
            (self.options.fragment_duration_seconds * f64::from(time_scale)) as u64;
        self.fragmenter = Fragmenter::new(
            OUTPUT_TRACK_ID,
            fragment_duration_ticks,
            self.options.fragment_sap_aligned,
        );

        let mut init = build_ftyp()?;
        init.extend_from_slice(&build_moov(&info, encryption)?);
        self.init_bytes = init;

        match &self.mode {
            SegmenterMode::SingleSegment { temp_dir, .. } => {
                let backend = TempFileBackend::create(temp_dir.as_deref())?;
                self.temp = Some(IoContext::new(Box::new(backend)));
            }
            SegmenterMode::MultiSegment { init_output, .. } => {
                let mut io = IoContext::open(init_output, OpenMode::AtomicWrite)?;
                io.write_all(&self.init_bytes)?;
                io.close()?;
                info!("初始化段已写出: {init_output}");
            }
        }

        if let Some(enc) = encryption {
            self.listener.on_encryption_info_ready(
                &enc.default_kid,
                &enc.protection_systems,
                &[],
            );
        }
        self.listener.on_media_start(&info, time_scale);
        self.info = Some(info);
        Ok(())
    }

    /// 在下一个合法边界强制切段 (提示点对齐)
    pub fn force_segment_break(&mut self) {
        self.force_segment_break = true;
    }

    /// 密钥轮换: 下一个采样前强制切段并通知监听器
    pub fn signal_encryption_change(&mut self, timestamp: i64) {
        self.force_segment_break();
        self.listener.on_key_rotation(timestamp);
    }

    /// 当前分段累计时长 (含未闭合分片)
    fn current_segment_duration(&self) -> u64 {
        self.current_refs.iter().map(|r| r.duration).sum::<u64>() + self.fragmenter.duration()
    }

    /// 追加一个采样
    pub fn add_sample(&mut self, sample: &MediaSample) -> FengResult<()> {
        if sample.is_eos {
            return Ok(());
        }
        if self.info.is_none() {
            return Err(FengError::InvalidArgument("分段器未初始化".into()));
        }

        // 分段闭合检查 (分段边界必然也是分片边界)
        let segment_boundary_ok = !self.options.segment_sap_aligned || sample.is_key_frame;
        let segment_full = self.current_segment_duration() >= self.segment_duration_ticks;
        let has_content = !self.fragmenter.is_empty() || !self.current_refs.is_empty();
        if has_content && segment_boundary_ok && (segment_full || self.force_segment_break) {
            self.finish_segment()?;
        } else if self.fragmenter.should_close_before(sample) {
            self.finish_fragment()?;
        }

        self.fragmenter.add_sample(sample)
    }

    fn finish_fragment(&mut self) -> FengResult<()> {
        if self.fragmenter.is_empty() {
            return Ok(());
        }
        let fragment = self.fragmenter.finalize_fragment()?;
        let bytes = serialize_fragment(self.sequence_number, fragment.traf, &fragment.mdat)?;
        self.sequence_number += 1;

        let mut reference = fragment.reference;
        reference.referenced_size = bytes.len() as u32;
        self.current_refs.push(reference);
        self.total_duration += reference.duration;

        match &self.mode {
            SegmenterMode::SingleSegment { .. } => {
                let temp = self.temp.as_mut().expect("单段模式必有临时文件");
                temp.write_all(&bytes)?;
            }
            SegmenterMode::MultiSegment { .. } => {
                self.current_bytes.put_bytes(&bytes);
            }
        }
        Ok(())
    }

    fn finish_segment(&mut self) -> FengResult<()> {
        self.finish_fragment()?;
        self.force_segment_break = false;
        if self.current_refs.is_empty() {
            return Ok(());
        }
        let refs = std::mem::take(&mut self.current_refs);
        let start_time = refs[0].start_time.max(0) as u64;
        let duration: u64 = refs.iter().map(|r| r.duration).sum();

        match &self.mode {
            SegmenterMode::SingleSegment { .. } => {
                // 分片字节已在临时文件; 只记录引用供 finalize 合并
                self.finished_segments.push(refs);
            }
            SegmenterMode::MultiSegment {
                segment_template, ..
            } => {
                let info = self.info.as_ref().expect("已初始化");
                let name = expand_template(
                    segment_template,
                    self.segment_number,
                    start_time,
                    self.options.bandwidth,
                )?;
                self.segment_number += 1;

                // styp + sidx + 分片串
                let mut styp = FileTypeBox::styp(*b"msdh", vec![*b"msdh", *b"msix"]);
                let mut segment = box_to_vec(&mut styp)?;
                let mut sidx = SegmentIndexBox {
                    reference_id: OUTPUT_TRACK_ID,
                    timescale: info.time_scale,
                    earliest_presentation_time: refs[0].earliest_presentation_time.max(0) as u64,
                    first_offset: 0,
                    references: refs.iter().map(to_sidx_reference).collect(),
                    ..Default::default()
                };
                segment.extend_from_slice(&box_to_vec(&mut sidx)?);
                segment.extend_from_slice(self.current_bytes.data());
                self.current_bytes.clear();

                let mut io = IoContext::open(&name, OpenMode::Write)?;
                io.write_all(&segment)?;
                io.close()?;
                debug!("分段已写出: {name} ({} 字节)", segment.len());

                self.listener
                    .on_new_segment(&name, start_time, duration, segment.len() as u64);
            }
        }
        Ok(())
    }

    /// 结束输出
    pub fn finalize(&mut self) -> FengResult<()> {
        self.finish_segment()?;
        let info = self
            .info
            .as_ref()
            .ok_or_else(|| FengError::InvalidArgument("分段器未初始化".into()))?
            .clone();

        let duration_seconds = self.total_duration as f64 / f64::from(info.time_scale);
        let mut ranges = MediaRanges::default();

        match &self.mode {
            SegmenterMode::SingleSegment { output, .. } => {
                // 每个分段合并为一条子分段引用
                let merged: Vec<SegmentReference> = self
                    .finished_segments
                    .iter()
                    .map(|refs| merge_references(refs))
                    .collect();
                let earliest = self
                    .finished_segments
                    .first()
                    .map(|refs| refs[0].earliest_presentation_time.max(0) as u64)
                    .unwrap_or(0);
                let mut sidx = SegmentIndexBox {
                    reference_id: OUTPUT_TRACK_ID,
                    timescale: info.time_scale,
                    earliest_presentation_time: earliest,
                    first_offset: 0,
                    references: merged.clone(),
                    ..Default::default()
                };
                let sidx_bytes = box_to_vec(&mut sidx)?;

                let mut out = IoContext::open(output, OpenMode::Write)?;
                out.write_all(&self.init_bytes)?;
                out.write_all(&sidx_bytes)?;

                // 临时文件内容逐块拷贝
                let temp = self.temp.as_mut().expect("单段模式必有临时文件");
                temp.seek(SeekFrom::Start(0))?;
                let mut chunk = vec![0u8; 1024 * 1024];
                let mut copied = 0u64;
                loop {
                    let read = temp.read(&mut chunk)?;
                    if read == 0 {
                        break;
                    }
                    out.write_all(&chunk[..read])?;
                    copied += read as u64;
                }
                out.close()?;
                self.temp = None; // drop 即删除临时文件

                let init_len = self.init_bytes.len() as u64;
                let sidx_len = sidx_bytes.len() as u64;
                ranges.init_range = Some((0, init_len));
                ranges.index_range = Some((init_len, sidx_len));
                ranges.file_size = init_len + sidx_len + copied;
                self.index_range = Some((init_len, sidx_len));

                // 子分段字节区间 + 分段事件 (HLS 字节区间播放列表使用)
                let mut offset = init_len + sidx_len;
                for (refs, merged_ref) in self.finished_segments.iter().zip(&merged) {
                    let size = u64::from(merged_ref.referenced_size);
                    ranges.subsegment_ranges.push((offset, size));
                    self.listener.on_new_segment(
                        output,
                        refs[0].start_time.max(0) as u64,
                        merged_ref.subsegment_duration.into(),
                        size,
                    );
                    offset += size;
                }
                info!(
                    "单段输出完成: {output} ({} 字节, {} 个子分段)",
                    ranges.file_size,
                    merged.len()
                );
            }
            SegmenterMode::MultiSegment { .. } => {
                ranges.file_size = 0;
            }
        }

        self.listener.on_media_end(&ranges, duration_seconds);
        Ok(())
    }

    /// 初始化区间 (单段模式)
    pub fn init_range(&self) -> (u64, u64) {
        (0, self.init_bytes.len() as u64)
    }

    /// sidx 区间 (单段模式, finalize 之后有效)
    pub fn index_range(&self) -> Option<(u64, u64)> {
        self.index_range
    }
}

/// 序列化一个 moof+mdat, 回填 trun.data_offset 与 saio 偏移
fn serialize_fragment(
    sequence_number: u32,
    mut traf: TrackFragmentBox,
    mdat_payload: &[u8],
) -> FengResult<Vec<u8>> {
    // 第一遍: 占位序列化测量 moof 大小与 senc 负载偏移
    let mut probe = MovieFragmentBox {
        header: MovieFragmentHeaderBox { sequence_number },
        tracks: vec![traf.clone()],
    };
    let probe_bytes = box_to_vec(&mut probe)?;
    let moof_size = probe_bytes.len();

    // trun 数据偏移: moof 起点到 mdat 负载 (moof + mdat 头 8 字节)
    traf.runs[0].data_offset = (moof_size + 8) as i32;

    // saio: moof 起点到 senc 的首个 IV
    if traf.sample_encryption.is_some() {
        let senc_offset = senc_payload_offset(&traf)?;
        if let Some(saio) = traf.aux_offset.as_mut() {
            saio.offsets = vec![senc_offset];
        }
    }

    let mut moof = MovieFragmentBox {
        header: MovieFragmentHeaderBox { sequence_number },
        tracks: vec![traf],
    };
    let mut w = BufferWriter::with_capacity(moof_size + 8 + mdat_payload.len());
    write_box(&mut moof, &mut w)?;
    debug_assert_eq!(w.len(), moof_size, "两遍序列化大小必须一致");

    w.put_u32(8 + mdat_payload.len() as u32);
    w.put_fourcc(b"mdat");
    w.put_bytes(mdat_payload);
    Ok(w.into_vec())
}

/// senc 首个 IV 相对 moof 起点的偏移 (结构化累加各前导 box 的大小)
fn senc_payload_offset(traf: &TrackFragmentBox) -> FengResult<u64> {
    let mut offset = 8u64; // moof 头
    offset += 16; // mfhd
    offset += 8; // traf 头

    let mut header = traf.header.clone();
    offset += box_to_vec(&mut header)?.len() as u64;
    if let Some(decode_time) = &traf.decode_time {
        let mut b = decode_time.clone();
        offset += box_to_vec(&mut b)?.len() as u64;
    }
    for run in &traf.runs {
        let mut b = run.clone();
        offset += box_to_vec(&mut b)?.len() as u64;
    }
    if let Some(aux_size) = &traf.aux_size {
        let mut b = aux_size.clone();
        offset += box_to_vec(&mut b)?.len() as u64;
    }
    if let Some(aux_offset) = &traf.aux_offset {
        let mut b = aux_offset.clone();
        offset += box_to_vec(&mut b)?.len() as u64;
    }
    // senc box 头(8) + version/flags(4) + sample_count(4)
    Ok(offset + 16)
}

fn to_sidx_reference(r: &FragmentReference) -> SegmentReference {
    SegmentReference {
        reference_type: false,
        referenced_size: r.referenced_size,
        subsegment_duration: r.duration as u32,
        starts_with_sap: r.sap_type == 1,
        sap_type: r.sap_type,
        sap_delta_time: r.sap_delta_time,
    }
}

/// 把一个分段内的分片引用合并为单条子分段引用
///
/// sap_type 取首个非 0 值; sap_delta 以首个含 SAP 的分片为准.
fn merge_references(refs: &[FragmentReference]) -> SegmentReference {
    let duration: u64 = refs.iter().map(|r| r.duration).sum();
    let size: u64 = refs.iter().map(|r| u64::from(r.referenced_size)).sum();
    let sap = refs.iter().find(|r| r.sap_type != 0);
    SegmentReference {
        reference_type: false,
        referenced_size: size as u32,
        subsegment_duration: duration as u32,
        starts_with_sap: sap.is_some(),
        sap_type: sap.map(|r| r.sap_type).unwrap_or(0),
        sap_delta_time: sap.map(|r| r.sap_delta_time).unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream_info::{Codec, StreamInfo, StreamKind, VideoInfo};
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    fn video_info() -> SharedStreamInfo {
        Arc::new(StreamInfo {
            track_id: 1,
            time_scale: 90000,
            duration: 0,
            codec: Codec::H264,
            codec_string: "avc1.42c01e".into(),
            language: String::new(),
            is_encrypted: false,
            extra_data: vec![0x01, 0x42, 0xC0, 0x1E, 0xFF],
            kind: StreamKind::Video(VideoInfo {
                width: 640,
                height: 480,
                pixel_width: 1,
                pixel_height: 1,
                nalu_length_size: 4,
                trick_play_factor: 0,
            }),
        })
    }

    fn sample(dts: i64, key: bool) -> MediaSample {
        let mut s = MediaSample::new(dts, dts, key, Bytes::from(vec![0x42; 64]));
        s.duration = 3000;
        s
    }

    /// 收集分段事件的监听器
    struct Recorder(Arc<Mutex<Vec<(String, u64, u64, u64)>>>);
    impl MuxerListener for Recorder {
        fn on_media_start(&mut self, _: &SharedStreamInfo, _: u32) {}
        fn on_new_segment(&mut self, name: &str, start: u64, duration: u64, size: u64) {
            self.0.lock().unwrap().push((name.into(), start, duration, size));
        }
        fn on_media_end(&mut self, _: &MediaRanges, _: f64) {}
    }

    #[test]
    fn test_single_segment_layout() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out.mp4");
        let mut segmenter = Segmenter::new(
            SegmenterMode::SingleSegment {
                output: output.to_string_lossy().to_string(),
                temp_dir: None,
            },
            SegmenterOptions {
                segment_duration_seconds: 1.0,
                fragment_duration_seconds: 0.5,
                ..Default::default()
            },
        );
        segmenter.initialize(video_info(), None).unwrap();

        // 2 秒采样, 关键帧间隔 0.5 秒 (15 帧 × 3000 tick)
        for i in 0..60 {
            segmenter
                .add_sample(&sample(i * 3000, i % 15 == 0))
                .unwrap();
        }
        segmenter.finalize().unwrap();

        let bytes = std::fs::read(&output).unwrap();
        // 布局: ftyp ‖ moov ‖ sidx ‖ moof...
        assert_eq!(&bytes[4..8], b"ftyp");
        let init_len = segmenter.init_range().1 as usize;
        assert_eq!(&bytes[init_len + 4..init_len + 8], b"sidx");

        let sidx: SegmentIndexBox = crate::boxes::parse_box(&bytes[init_len..]).unwrap();
        assert!(!sidx.references.is_empty());
        // 引用大小连起来正好到文件末尾
        let refs_total: u64 = sidx
            .references
            .iter()
            .map(|r| u64::from(r.referenced_size))
            .sum();
        let sidx_len = {
            let mut probe = sidx.clone();
            box_to_vec(&mut probe).unwrap().len()
        };
        assert_eq!(init_len as u64 + sidx_len as u64 + refs_total, bytes.len() as u64);
        // 首个引用以 SAP 开始
        assert!(sidx.references[0].starts_with_sap);
        assert_eq!(sidx.references[0].sap_type, 1);
    }

    #[test]
    fn test_multi_segment_templates_and_listener() {
        let dir = tempfile::tempdir().unwrap();
        let init = dir.path().join("init.mp4");
        let template = dir.path().join("seg-$Number$.m4s");

        let events = Arc::new(Mutex::new(Vec::new()));
        let mut segmenter = Segmenter::new(
            SegmenterMode::MultiSegment {
                init_output: init.to_string_lossy().to_string(),
                segment_template: template.to_string_lossy().to_string(),
            },
            SegmenterOptions {
                segment_duration_seconds: 1.0,
                fragment_duration_seconds: 1.0,
                ..Default::default()
            },
        );
        segmenter.add_listener(Box::new(Recorder(Arc::clone(&events))));
        segmenter.initialize(video_info(), None).unwrap();

        for i in 0..90 {
            segmenter
                .add_sample(&sample(i * 3000, i % 30 == 0))
                .unwrap();
        }
        segmenter.finalize().unwrap();

        // 初始化段存在且以 ftyp 开头
        let init_bytes = std::fs::read(&init).unwrap();
        assert_eq!(&init_bytes[4..8], b"ftyp");

        // $Number$ 从 1 开始
        let seg1 = std::fs::read(dir.path().join("seg-1.m4s")).unwrap();
        assert_eq!(&seg1[4..8], b"styp");
        assert!(dir.path().join("seg-3.m4s").exists());

        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].1, 0); // 起始时间
        assert_eq!(events[0].2, 90000); // 1 秒 @ 90kHz
        assert_eq!(events[1].1, 90000);
        assert_eq!(events[0].3, seg1.len() as u64);
    }

    #[test]
    fn test_forced_break_on_key_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut segmenter = Segmenter::new(
            SegmenterMode::MultiSegment {
                init_output: dir.path().join("init.mp4").to_string_lossy().to_string(),
                segment_template: dir
                    .path()
                    .join("s-$Number$.m4s")
                    .to_string_lossy()
                    .to_string(),
            },
            SegmenterOptions {
                segment_duration_seconds: 10.0, // 正常策略下不会切段
                fragment_duration_seconds: 10.0,
                ..Default::default()
            },
        );
        segmenter.add_listener(Box::new(Recorder(Arc::clone(&events))));
        segmenter.initialize(video_info(), None).unwrap();

        for i in 0..30 {
            if i == 15 {
                segmenter.signal_encryption_change(15 * 3000);
            }
            segmenter
                .add_sample(&sample(i * 3000, i % 15 == 0))
                .unwrap();
        }
        segmenter.finalize().unwrap();

        let events = events.lock().unwrap();
        // 轮换处一段 + 结尾一段
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].2, 45000); // 前 15 帧
    }
}
