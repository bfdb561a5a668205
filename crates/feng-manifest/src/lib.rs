//! # feng-manifest
//!
//! Feng 流媒体打包框架清单库: DASH MPD 与 HLS 播放列表的生成, 以及
//! 把封装监听事件接入清单构建器的通知器.

pub mod hls;
pub mod mpd;
pub mod notifier;
pub mod xml;

// 重导出常用类型
pub use hls::{AudioEntry, HlsKey, MasterPlaylist, MediaPlaylist, PlaylistType, VideoEntry};
pub use mpd::{ContentProtection, MpdBuilder, MpdKind, MpdOptions, RepresentationInfo};
pub use notifier::{HlsNotifier, HlsTrackSeed, MpdNotifier, RepresentationSeed};
pub use xml::Element;
