//! 端到端重封装集成测试.
//!
//! 用自家的分段器合成一个分片 MP4 作为输入, 跑完整打包作业
//! (解析 → 对齐 → 分片 → 分段 → 清单), 验证:
//! 1. 输出布局 ftyp‖moov‖sidx‖分片串
//! 2. MPD 与 HLS 清单内容
//! 3. 相同输入两次打包输出逐字节一致

use std::sync::Arc;

use feng::media::boxes::{parse_box, BoxHeader, MovieBox, SegmentIndexBox};
use feng::media::{
    AudioInfo, Codec, MediaSample, Segmenter, SegmenterMode, SegmenterOptions, StreamInfo,
    StreamKind, VideoInfo,
};
use feng::packager::{Packager, PackagingParams, StreamDescriptor};
use feng_core::BufferReader;

fn video_stream_info() -> Arc<StreamInfo> {
    // 最小合法 avcC: version=1, profile/compat/level, lengthSize=4, 1 SPS + 1 PPS
    let avcc = vec![
        0x01, 0x42, 0xC0, 0x1E, 0xFF, 0xE1, 0x00, 0x04, 0x67, 0x42, 0xC0, 0x1E, 0x01, 0x00,
        0x02, 0x68, 0xCE,
    ];
    Arc::new(StreamInfo {
        track_id: 1,
        time_scale: 90000,
        duration: 180000,
        codec: Codec::H264,
        codec_string: "avc1.42c01e".into(),
        language: "en".into(),
        is_encrypted: false,
        extra_data: avcc,
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

fn audio_stream_info() -> Arc<StreamInfo> {
    Arc::new(StreamInfo {
        track_id: 2,
        time_scale: 44100,
        duration: 88200,
        codec: Codec::Aac,
        codec_string: "mp4a.40.2".into(),
        language: "en".into(),
        is_encrypted: false,
        extra_data: vec![0x12, 0x10], // AAC-LC 44.1kHz 立体声
        kind: StreamKind::Audio(AudioInfo {
            sample_bits: 16,
            channels: 2,
            sampling_frequency: 44100,
            max_bitrate: 0,
            avg_bitrate: 128000,
        }),
    })
}

/// 长度前缀的伪 IDR/非 IDR 采样
fn video_sample(index: u64, time_scale: u64) -> MediaSample {
    let dts = (index * time_scale / 30) as i64;
    let is_key = index % 30 == 0;
    let nal_header = if is_key { 0x65u8 } else { 0x41 };
    let body_len = 40 + (index % 7) as usize * 11;
    let mut payload = (body_len as u32 + 1).to_be_bytes().to_vec();
    payload.push(nal_header);
    payload.extend((0..body_len).map(|i| (index as u8).wrapping_add(i as u8)));

    let mut sample = MediaSample::new(dts, dts, is_key, payload);
    sample.duration = time_scale / 30;
    sample
}

fn audio_sample(index: u64) -> MediaSample {
    let dts = (index * 1024) as i64;
    let payload: Vec<u8> = (0..64).map(|i| (index as u8).wrapping_mul(3).wrapping_add(i)).collect();
    let mut sample = MediaSample::new(dts, dts, true, payload);
    sample.duration = 1024;
    sample
}

/// 用分段器合成一个可作为输入的分片 MP4
fn synthesize_input(dir: &std::path::Path) -> (std::path::PathBuf, Vec<Vec<u8>>) {
    let path = dir.join("source.mp4");
    let mut segmenter = Segmenter::new(
        SegmenterMode::SingleSegment {
            output: path.to_string_lossy().to_string(),
            temp_dir: None,
        },
        SegmenterOptions {
            segment_duration_seconds: 1.0,
            fragment_duration_seconds: 1.0,
            ..Default::default()
        },
    );
    segmenter.initialize(video_stream_info(), None).unwrap();
    let mut payloads = Vec::new();
    for i in 0..60 {
        let sample = video_sample(i, 90000);
        payloads.push(sample.data.to_vec());
        segmenter.add_sample(&sample).unwrap();
    }
    segmenter.finalize().unwrap();
    (path, payloads)
}

/// 顶层 box 类型序列
fn top_level_boxes(data: &[u8]) -> Vec<String> {
    let mut out = Vec::new();
    let mut r = BufferReader::new(data);
    while r.remaining() >= 8 {
        let header = BoxHeader::read(&mut r).unwrap();
        out.push(String::from_utf8_lossy(&header.fourcc).to_string());
        r.skip(header.payload_size() as usize).unwrap();
    }
    out
}

#[test]
fn test_remux_single_segment_layout_and_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = synthesize_input(dir.path());

    let output = dir.path().join("video-out.mp4");
    let mpd_path = dir.path().join("manifest.mpd");
    let master_path = dir.path().join("master.m3u8");

    let params = PackagingParams {
        mpd_output: mpd_path.to_string_lossy().to_string(),
        hls_master_playlist_output: master_path.to_string_lossy().to_string(),
        segment_duration_seconds: 1.0,
        fragment_duration_seconds: 0.5,
        ..Default::default()
    };
    let descriptor = StreamDescriptor::parse(&format!(
        "input={},stream=video,output={}",
        input.display(),
        output.display()
    ))
    .unwrap();

    Packager::new(params, vec![descriptor]).run().unwrap();

    // 输出布局: ftyp moov sidx moof mdat ...
    let bytes = std::fs::read(&output).unwrap();
    let boxes = top_level_boxes(&bytes);
    assert_eq!(&boxes[..3], &["ftyp", "moov", "sidx"]);
    assert!(boxes[3..].chunks(2).all(|c| c == ["moof", "mdat"]));

    // moov 含 mvex (分片输出) 且时间刻度保持 90kHz
    let moov_offset = {
        let mut r = BufferReader::new(&bytes);
        let ftyp = BoxHeader::read(&mut r).unwrap();
        ftyp.size as usize
    };
    let moov: MovieBox = parse_box(&bytes[moov_offset..]).unwrap();
    assert!(moov.extends.is_some());
    assert_eq!(moov.tracks[0].media.header.timescale, 90000);

    // MPD: 静态档 + SegmentBase 区间
    let mpd = std::fs::read_to_string(&mpd_path).unwrap();
    assert!(mpd.contains("type=\"static\""));
    assert!(mpd.contains("urn:mpeg:dash:profile:isoff-on-demand:2011"));
    assert!(mpd.contains("codecs=\"avc1.42c01e\""));
    assert!(mpd.contains("width=\"640\""));
    assert!(mpd.contains("indexRange="));
    assert!(mpd.contains("<BaseURL>video-out.mp4</BaseURL>"));

    // HLS: 主播放列表 + 媒体播放列表 (单文件字节区间)
    let master = std::fs::read_to_string(&master_path).unwrap();
    assert!(master.contains("#EXT-X-STREAM-INF:"));
    assert!(master.contains("RESOLUTION=640x480"));
    let media_playlist = std::fs::read_to_string(dir.path().join("video-out.mp4.m3u8")).unwrap();
    assert!(media_playlist.contains("#EXT-X-BYTERANGE:"));
    assert!(media_playlist.ends_with("#EXT-X-ENDLIST\n"));
}

#[test]
fn test_remux_deterministic_output() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = synthesize_input(dir.path());

    let mut outputs = Vec::new();
    for run in 0..2 {
        let output = dir.path().join(format!("out-{run}.mp4"));
        let descriptor = StreamDescriptor::parse(&format!(
            "input={},stream=video,output={}",
            input.display(),
            output.display()
        ))
        .unwrap();
        Packager::new(
            PackagingParams {
                segment_duration_seconds: 1.0,
                fragment_duration_seconds: 0.5,
                ..Default::default()
            },
            vec![descriptor],
        )
        .run()
        .unwrap();
        outputs.push(std::fs::read(&output).unwrap());
    }
    assert_eq!(outputs[0], outputs[1], "相同输入必须产出逐字节一致的输出");
}

#[test]
fn test_remux_multi_segment_video_audio_pair() {
    let dir = tempfile::tempdir().unwrap();

    // 双轨输入: 先各自合成单轨文件, 音轨独立
    let (video_input, _) = synthesize_input(dir.path());
    let audio_input = dir.path().join("audio-source.mp4");
    {
        let mut segmenter = Segmenter::new(
            SegmenterMode::SingleSegment {
                output: audio_input.to_string_lossy().to_string(),
                temp_dir: None,
            },
            SegmenterOptions::default(),
        );
        segmenter.initialize(audio_stream_info(), None).unwrap();
        for i in 0..86 {
            segmenter.add_sample(&audio_sample(i)).unwrap();
        }
        segmenter.finalize().unwrap();
    }

    let mpd_path = dir.path().join("live.mpd");
    let params = PackagingParams {
        mpd_output: mpd_path.to_string_lossy().to_string(),
        generate_dynamic_mpd: true,
        segment_duration_seconds: 1.0,
        fragment_duration_seconds: 1.0,
        ..Default::default()
    };
    let descriptors = vec![
        StreamDescriptor::parse(&format!(
            "input={},stream=video,output={},segment_template={}",
            video_input.display(),
            dir.path().join("v-init.mp4").display(),
            dir.path().join("v-$Number$.m4s").display(),
        ))
        .unwrap(),
        StreamDescriptor::parse(&format!(
            "input={},stream=audio,output={},segment_template={}",
            audio_input.display(),
            dir.path().join("a-init.mp4").display(),
            dir.path().join("a-$Number$.m4s").display(),
        ))
        .unwrap(),
    ];
    Packager::new(params, descriptors).run().unwrap();

    assert!(dir.path().join("v-init.mp4").exists());
    assert!(dir.path().join("v-1.m4s").exists());
    assert!(dir.path().join("a-init.mp4").exists());
    assert!(dir.path().join("a-1.m4s").exists());

    let mpd = std::fs::read_to_string(&mpd_path).unwrap();
    assert!(mpd.contains("type=\"dynamic\""));
    assert!(mpd.contains("urn:mpeg:dash:profile:isoff-live:2011"));
    assert!(mpd.contains("SegmentTimeline"));
    assert!(mpd.contains("contentType=\"video\""));
    assert!(mpd.contains("contentType=\"audio\""));
    assert!(mpd.contains("audioSamplingRate=\"44100\""));

    // 分段文件: styp 开头
    let seg = std::fs::read(dir.path().join("v-1.m4s")).unwrap();
    assert_eq!(&seg[4..8], b"styp");
    let boxes = top_level_boxes(&seg);
    assert_eq!(&boxes[..2], &["styp", "sidx"]);

    let sidx: SegmentIndexBox = {
        let mut r = BufferReader::new(&seg);
        let styp = BoxHeader::read(&mut r).unwrap();
        parse_box(&seg[styp.size as usize..]).unwrap()
    };
    assert_eq!(sidx.timescale, 90000);
    assert!(!sidx.references.is_empty());
}
