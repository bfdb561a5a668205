//! 媒体解析器接口.
//!
//! 推模式: 调用方以任意大小的分块喂入字节, 解析器在读够描述轨道的
//! 数据后恰好调用一次 `on_init`, 此后每个采样按解码顺序回调.
//! 轨道之间不保证顺序, 单轨内 dts 单调不减.
//!
//! `on_sample` / `on_text_sample` 返回 false 取消解析 (parse 返回
//! `Cancelled`); 结构性错误返回 `ParserFailure`, 此后解析器永久失败.

use std::sync::Arc;

use feng_crypto::KeySource;

use crate::sample::{MediaSample, TextSample};
use crate::stream_info::SharedStreamInfo;

/// 初始化回调: 所有轨道的流信息
pub type InitCallback = Box<dyn FnMut(&[SharedStreamInfo]) + Send>;
/// 媒体采样回调: (track_id, 采样) → 是否继续
pub type NewSampleCallback = Box<dyn FnMut(u32, MediaSample) -> bool + Send>;
/// 文本采样回调: (track_id, 采样) → 是否继续
pub type NewTextSampleCallback = Box<dyn FnMut(u32, TextSample) -> bool + Send>;

/// 解析器回调集
pub struct ParserCallbacks {
    /// 流信息就绪 (恰好一次)
    pub on_init: InitCallback,
    /// 新媒体采样
    pub on_sample: NewSampleCallback,
    /// 新文本采样
    pub on_text_sample: NewTextSampleCallback,
}

impl ParserCallbacks {
    /// 创建不处理文本采样的回调集
    pub fn media_only(on_init: InitCallback, on_sample: NewSampleCallback) -> Self {
        Self {
            on_init,
            on_sample,
            on_text_sample: Box::new(|_, _| true),
        }
    }
}

/// 媒体解析器 trait
pub trait MediaParser: Send {
    /// 安装回调与密钥源 (WVM 解密需要)
    fn init(&mut self, callbacks: ParserCallbacks, key_source: Option<Arc<dyn KeySource>>);

    /// 喂入一块输入; 可以任意分块, 解析状态可恢复
    fn parse(&mut self, data: &[u8]) -> feng_core::FengResult<()>;

    /// 输入结束: 发射所有滞留采样 (时长需由后继采样推断的场景)
    fn flush(&mut self) -> feng_core::FengResult<()>;
}
