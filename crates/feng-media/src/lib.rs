//! # feng-media
//!
//! Feng 流媒体打包框架媒体库, 负责重封装管线的媒体侧:
//!
//! - **容器解析**: ISO-BMFF (分片/非分片)、MPEG-2 TS、WebM、WebVTT、WVM
//! - **采样管线**: 推模式的逐轨采样流, 携带时间戳/关键帧/加密元数据
//! - **CENC**: 子采样布局、加密器/解密器、密钥轮换与透明期
//! - **输出**: moof+mdat 分片、单段/多段 ISO-BMFF 分段、sidx
//! - **对齐**: 跨流提示点对齐与封装监听器

pub mod boxes;
pub mod codecs;
pub mod crypto;
pub mod cue;
pub mod demuxer;
pub mod demuxers;
pub mod fragmenter;
pub mod listener;
pub mod moov_builder;
pub mod muxer;
pub mod parser;
pub mod probe;
pub mod sample;
pub mod segmenter;
pub mod stream_info;
pub mod template;

// 重导出常用类型
pub use demuxer::{Demuxer, StreamDataSink};
pub use feng_crypto::ProtectionSystemInfo;
pub use fragmenter::Fragmenter;
pub use listener::{FanoutListener, MediaRanges, MuxerListener};
pub use moov_builder::EncryptionInit;
pub use muxer::{EncryptionOptions, Muxer};
pub use parser::MediaParser;
pub use sample::{
    CueEvent, EncryptionConfig, MediaSample, SegmentInfo, StreamData, SubsampleEntry, TextSample,
};
pub use segmenter::{Segmenter, SegmenterMode, SegmenterOptions};
pub use stream_info::{
    AudioInfo, Codec, SharedStreamInfo, StreamInfo, StreamKind, TextInfo, VideoInfo,
};
