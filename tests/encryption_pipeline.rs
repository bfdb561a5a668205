//! CENC 加密端到端集成测试.
//!
//! 固定密钥打包一条 AAC 轨, 再用解析器读回加密输出:
//! 1. moov 携带 enca/sinf/tenc 与 pssh
//! 2. senc 中的 IV 与子采样布局可还原
//! 3. 解密后的采样与原始负载逐字节一致

use std::sync::{Arc, Mutex};

use feng::crypto::{FixedKeySource, KeySource};
use feng::media::boxes::{parse_box, BoxHeader, MovieBox, SampleEntry};
use feng::media::crypto::Decryptor;
use feng::media::demuxers::Mp4Parser;
use feng::media::parser::{MediaParser, ParserCallbacks};
use feng::media::{
    AudioInfo, Codec, MediaSample, Segmenter, SegmenterMode, SegmenterOptions, StreamInfo,
    StreamKind,
};
use feng::packager::{Packager, PackagingParams, StreamDescriptor};
use feng_core::BufferReader;

const KEY_ID: &str = "0123456789abcdef0123456789abcdef";
const KEY: &str = "fedcba9876543210fedcba9876543210";
const IV: &str = "1122334455667788";

fn audio_info() -> Arc<StreamInfo> {
    Arc::new(StreamInfo {
        track_id: 1,
        time_scale: 48000,
        duration: 0,
        codec: Codec::Aac,
        codec_string: "mp4a.40.2".into(),
        language: "en".into(),
        is_encrypted: false,
        extra_data: vec![0x11, 0x90], // AAC-LC 48kHz 立体声
        kind: StreamKind::Audio(AudioInfo {
            sample_bits: 16,
            channels: 2,
            sampling_frequency: 48000,
            max_bitrate: 0,
            avg_bitrate: 96000,
        }),
    })
}

fn audio_payload(index: u64) -> Vec<u8> {
    (0..200u64)
        .map(|i| ((index * 31 + i * 7) % 251) as u8)
        .collect()
}

fn synthesize_audio_input(path: &std::path::Path) {
    let mut segmenter = Segmenter::new(
        SegmenterMode::SingleSegment {
            output: path.to_string_lossy().to_string(),
            temp_dir: None,
        },
        SegmenterOptions {
            segment_duration_seconds: 2.0,
            fragment_duration_seconds: 1.0,
            ..Default::default()
        },
    );
    segmenter.initialize(audio_info(), None).unwrap();
    for i in 0..240 {
        let mut sample = MediaSample::new((i * 1024) as i64, (i * 1024) as i64, true, audio_payload(i));
        sample.duration = 1024;
        segmenter.add_sample(&sample).unwrap();
    }
    segmenter.finalize().unwrap();
}

fn key_source() -> Arc<dyn KeySource> {
    Arc::new(FixedKeySource::from_hex(KEY_ID, KEY, "deadbeefcafe", IV).unwrap())
}

/// 用解析器读回输出的所有采样
fn parse_all_samples(bytes: &[u8]) -> (Arc<StreamInfo>, Vec<MediaSample>) {
    let samples = Arc::new(Mutex::new(Vec::new()));
    let infos = Arc::new(Mutex::new(Vec::new()));
    let samples_cb = Arc::clone(&samples);
    let infos_cb = Arc::clone(&infos);

    let mut parser = Mp4Parser::new();
    parser.init(
        ParserCallbacks::media_only(
            Box::new(move |streams| {
                infos_cb.lock().unwrap().extend_from_slice(streams);
            }),
            Box::new(move |_, sample| {
                samples_cb.lock().unwrap().push(sample);
                true
            }),
        ),
        None,
    );
    for chunk in bytes.chunks(4096) {
        parser.parse(chunk).unwrap();
    }
    parser.flush().unwrap();

    let info = infos.lock().unwrap()[0].clone();
    let samples = samples.lock().unwrap().clone();
    (info, samples)
}

#[test]
fn test_fixed_key_encrypt_package_and_decrypt() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("audio.mp4");
    synthesize_audio_input(&input);

    let output = dir.path().join("audio-enc.mp4");
    let mut packager = Packager::new(
        PackagingParams {
            segment_duration_seconds: 2.0,
            fragment_duration_seconds: 1.0,
            ..Default::default()
        },
        vec![StreamDescriptor::parse(&format!(
            "input={},stream=audio,output={}",
            input.display(),
            output.display()
        ))
        .unwrap()],
    );
    packager.set_encryption_key_source(key_source());
    packager.run().unwrap();

    let bytes = std::fs::read(&output).unwrap();

    // moov: enca + sinf/tenc + pssh
    let moov_offset = {
        let mut r = BufferReader::new(&bytes);
        BoxHeader::read(&mut r).unwrap().size as usize
    };
    let moov: MovieBox = parse_box(&bytes[moov_offset..]).unwrap();
    assert_eq!(moov.pssh.len(), 1);
    let expected_kid: [u8; 16] = hex::decode(KEY_ID).unwrap().try_into().unwrap();
    match &moov.tracks[0].media.information.sample_table.description.entries[0] {
        SampleEntry::Audio(a) => {
            assert_eq!(&a.format, b"enca");
            let sinf = a.sinf.as_ref().unwrap();
            assert_eq!(&sinf.format.data_format, b"mp4a");
            assert_eq!(&sinf.scheme_type.scheme_type, b"cenc");
            let tenc = &sinf.info.track_encryption;
            assert!(tenc.default_is_protected);
            assert_eq!(tenc.default_per_sample_iv_size, 8);
            assert_eq!(tenc.default_kid, expected_kid);
        }
        other => panic!("期望音频条目: {other:?}"),
    }

    // 读回采样: 全部携带保护描述, 负载与原文不同
    let (info, mut samples) = parse_all_samples(&bytes);
    assert!(info.is_encrypted);
    assert_eq!(samples.len(), 240);
    let first_config = samples[0].encryption_config.clone().unwrap();
    assert_eq!(first_config.key_id, expected_kid);
    assert_eq!(first_config.iv, hex::decode(IV).unwrap());
    assert_eq!(first_config.total_bytes(), 200);
    assert_ne!(samples[0].data.as_ref(), &audio_payload(0)[..]);

    // 第二个采样的 IV 按 64 位大端 +1
    let second_iv = samples[1].encryption_config.as_ref().unwrap().iv.clone();
    assert_eq!(second_iv, hex::decode("1122334455667789").unwrap());

    // 解密后与原始负载一致
    let mut decryptor = Decryptor::new(key_source());
    for (i, sample) in samples.iter_mut().enumerate() {
        decryptor.process_sample(sample).unwrap();
        assert_eq!(
            sample.data.as_ref(),
            &audio_payload(i as u64)[..],
            "采样 {i} 解密结果不一致"
        );
    }
}

#[test]
fn test_skip_encryption_descriptor() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("audio.mp4");
    synthesize_audio_input(&input);

    let output = dir.path().join("audio-clear.mp4");
    let mut packager = Packager::new(
        PackagingParams::default(),
        vec![StreamDescriptor::parse(&format!(
            "input={},stream=audio,output={},skip_encryption=1",
            input.display(),
            output.display()
        ))
        .unwrap()],
    );
    packager.set_encryption_key_source(key_source());
    packager.run().unwrap();

    let bytes = std::fs::read(&output).unwrap();
    let (info, samples) = parse_all_samples(&bytes);
    assert!(!info.is_encrypted);
    assert_eq!(samples[0].data.as_ref(), &audio_payload(0)[..]);
    assert!(samples[0].encryption_config.is_none());
}
