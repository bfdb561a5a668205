//! 各容器格式的解析器实现.

pub mod ebml;
pub mod mp4;
pub mod mpegts;
pub mod webm;
pub mod webvtt;
pub mod wvm;

pub use mp4::Mp4Parser;
pub use mpegts::TsParser;
pub use webm::WebmParser;
pub use webvtt::WebVttParser;
pub use wvm::WvmParser;
