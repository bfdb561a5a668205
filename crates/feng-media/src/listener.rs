//! 封装监听器.
//!
//! 观察者挂在每个分段器上, 把媒体开始/新分段/媒体结束事件扇出给
//! 清单生成器 (MPD 与 HLS 可同时挂载). 回调由所属封装线程串行调用.

use crate::stream_info::SharedStreamInfo;

/// 媒体文件的字节区间信息 (单段模式)
#[derive(Debug, Clone, Default)]
pub struct MediaRanges {
    /// 初始化区间 (偏移, 长度)
    pub init_range: Option<(u64, u64)>,
    /// sidx 区间 (偏移, 长度)
    pub index_range: Option<(u64, u64)>,
    /// 各子分段的字节区间
    pub subsegment_ranges: Vec<(u64, u64)>,
    /// 文件总大小
    pub file_size: u64,
}

/// 封装监听器 trait
pub trait MuxerListener: Send {
    /// 输出开始: 流信息与参考时间刻度已确定
    fn on_media_start(&mut self, info: &SharedStreamInfo, time_scale: u32);

    /// 加密参数就绪 (首个密钥或轮换)
    fn on_encryption_info_ready(
        &mut self,
        _key_id: &[u8; 16],
        _pssh: &[crate::ProtectionSystemInfo],
        _iv: &[u8],
    ) {
    }

    /// 密钥轮换生效
    fn on_key_rotation(&mut self, _timestamp: i64) {}

    /// 新分段写出
    fn on_new_segment(&mut self, name: &str, start_time: u64, duration: u64, size: u64);

    /// 输出结束
    fn on_media_end(&mut self, ranges: &MediaRanges, duration_seconds: f64);
}

/// 扇出监听器: 把事件转发给多个下游
#[derive(Default)]
pub struct FanoutListener {
    listeners: Vec<Box<dyn MuxerListener>>,
}

impl FanoutListener {
    /// 创建空扇出
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一个下游
    pub fn add(&mut self, listener: Box<dyn MuxerListener>) {
        self.listeners.push(listener);
    }

    /// 是否没有任何下游
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl MuxerListener for FanoutListener {
    fn on_media_start(&mut self, info: &SharedStreamInfo, time_scale: u32) {
        for l in &mut self.listeners {
            l.on_media_start(info, time_scale);
        }
    }

    fn on_encryption_info_ready(
        &mut self,
        key_id: &[u8; 16],
        pssh: &[crate::ProtectionSystemInfo],
        iv: &[u8],
    ) {
        for l in &mut self.listeners {
            l.on_encryption_info_ready(key_id, pssh, iv);
        }
    }

    fn on_key_rotation(&mut self, timestamp: i64) {
        for l in &mut self.listeners {
            l.on_key_rotation(timestamp);
        }
    }

    fn on_new_segment(&mut self, name: &str, start_time: u64, duration: u64, size: u64) {
        for l in &mut self.listeners {
            l.on_new_segment(name, start_time, duration, size);
        }
    }

    fn on_media_end(&mut self, ranges: &MediaRanges, duration_seconds: f64) {
        for l in &mut self.listeners {
            l.on_media_end(ranges, duration_seconds);
        }
    }
}
