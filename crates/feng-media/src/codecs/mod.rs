//! 编解码器配置提取.
//!
//! 打包不触碰压缩数据本身, 但需要从编解码器私有数据中恢复
//! 采样描述所需的参数 (分辨率、采样率、编解码器字符串) 与
//! 子采样加密所需的结构信息 (NALU 布局、片头长度、superframe).

pub mod aac;
pub mod avc;
pub mod hevc;
pub mod nalu;
pub mod opus;
pub mod vpx;

pub use aac::{AdtsHeader, AudioSpecificConfig};
pub use avc::{AvcDecoderConfigurationRecord, H264SliceHeaderParser};
pub use hevc::HevcDecoderConfigurationRecord;
pub use nalu::{escape_nalu, NaluReader, NaluToByteStreamConverter};
pub use vpx::{vp9_subframe_sizes, VpCodecConfigurationRecord};
