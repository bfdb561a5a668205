//! # Feng (封)
//!
//! 纯 Rust 实现的自适应流媒体打包框架.
//!
//! Feng 把一个或多个基本媒体资产 (视频/音频/文本) 重封装为
//! DASH 与 HLS 可直接分发的形态:
//! - **解析**: ISO-BMFF (分片/非分片)、MPEG-2 TS、WebM、WebVTT、WVM
//! - **加密**: CENC (AES-CTR/CBC), 固定密钥或远端密钥提供方, 按周期轮换
//! - **输出**: 单文件点播或模板命名的多分段, moof+mdat 分片与 sidx 索引
//! - **清单**: DASH MPD (静态/动态) 与 HLS 主/媒体播放列表
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use feng::packager::{Packager, PackagingParams, StreamDescriptor};
//!
//! let params = PackagingParams {
//!     mpd_output: "manifest.mpd".into(),
//!     ..Default::default()
//! };
//! let descriptors = vec![
//!     StreamDescriptor::parse("input=in.mp4,stream=video,output=video.mp4").unwrap(),
//!     StreamDescriptor::parse("input=in.mp4,stream=audio,output=audio.mp4").unwrap(),
//! ];
//! Packager::new(params, descriptors).run().unwrap();
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `feng-core` | 错误类型、位流/缓冲读写、字节 I/O 抽象 |
//! | `feng-crypto` | AES 核心、密钥源、签名请求与密钥轮换 |
//! | `feng-media` | 容器解析、CENC、分片/分段、提示点对齐 |
//! | `feng-manifest` | DASH MPD 与 HLS 播放列表 |

pub mod packager;

/// 核心类型与工具
pub use feng_core as core;

/// 加密与密钥源
pub use feng_crypto as crypto;

/// 媒体解析与封装
pub use feng_media as media;

/// 清单生成
pub use feng_manifest as manifest;

pub use packager::{Packager, PackagingParams, StreamDescriptor};

/// 获取 Feng 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
