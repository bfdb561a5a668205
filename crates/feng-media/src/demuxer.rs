//! 解封装器.
//!
//! 打开输入、探测容器、驱动解析器, 并把流信息与采样推给下游.
//! init 之前到达的采样进入有界队列, init 触发后一次性排空;
//! 取消标志在每轮读取循环的顶部检查.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};

use feng_core::{FengError, FengResult, IoContext};
use feng_crypto::KeySource;

use crate::parser::{MediaParser, ParserCallbacks};
use crate::probe::{create_parser, detect_container, ContainerType};
use crate::sample::{MediaSample, StreamData, TextSample};
use crate::stream_info::SharedStreamInfo;

/// 探测窗口 (64 KiB)
const PROBE_SIZE: usize = 64 * 1024;
/// 读取块大小 (2 MiB)
const CHUNK_SIZE: usize = 2 * 1024 * 1024;
/// init 前采样队列容量
const PRE_INIT_QUEUE_CAP: usize = 10_000;

/// 下游接收器
pub type StreamDataSink = Box<dyn FnMut(StreamData) -> FengResult<()> + Send>;

/// init 前的队列条目
enum QueuedSample {
    Media(u32, MediaSample),
    Text(u32, TextSample),
}

/// 解析回调与下游之间的共享状态
struct DemuxState {
    sink: StreamDataSink,
    /// track_id → 流索引
    track_map: Vec<u32>,
    infos: Vec<SharedStreamInfo>,
    queue: Vec<QueuedSample>,
    init_received: bool,
    error: Option<FengError>,
}

impl DemuxState {
    fn stream_index(&self, track_id: u32) -> Option<usize> {
        self.track_map.iter().position(|&t| t == track_id)
    }

    fn dispatch_media(&mut self, track_id: u32, sample: MediaSample) -> bool {
        let Some(stream_index) = self.stream_index(track_id) else {
            self.error = Some(FengError::ParserFailure(format!(
                "采样引用未知轨道 {track_id}"
            )));
            return false;
        };
        if let Err(e) = (self.sink)(StreamData::MediaSample {
            stream_index,
            sample,
        }) {
            self.error = Some(e);
            return false;
        }
        true
    }

    fn dispatch_text(&mut self, track_id: u32, sample: TextSample) -> bool {
        let Some(stream_index) = self.stream_index(track_id) else {
            self.error = Some(FengError::ParserFailure(format!(
                "文本采样引用未知轨道 {track_id}"
            )));
            return false;
        };
        if let Err(e) = (self.sink)(StreamData::TextSample {
            stream_index,
            sample,
        }) {
            self.error = Some(e);
            return false;
        }
        true
    }

    fn on_init(&mut self, streams: &[SharedStreamInfo]) {
        self.track_map = streams.iter().map(|s| s.track_id).collect();
        self.infos = streams.to_vec();
        self.init_received = true;

        for (stream_index, info) in streams.iter().enumerate() {
            if let Err(e) = (self.sink)(StreamData::StreamInfo {
                stream_index,
                info: Arc::clone(info),
            }) {
                self.error = Some(e);
                return;
            }
        }
        // 排空 init 前队列
        for queued in std::mem::take(&mut self.queue) {
            let ok = match queued {
                QueuedSample::Media(track, sample) => self.dispatch_media(track, sample),
                QueuedSample::Text(track, sample) => self.dispatch_text(track, sample),
            };
            if !ok {
                return;
            }
        }
    }

    fn on_sample(&mut self, track_id: u32, sample: MediaSample) -> bool {
        if !self.init_received {
            if self.queue.len() >= PRE_INIT_QUEUE_CAP {
                self.error = Some(FengError::InvalidArgument(
                    "init 前采样队列溢出".into(),
                ));
                return false;
            }
            self.queue.push(QueuedSample::Media(track_id, sample));
            return true;
        }
        self.dispatch_media(track_id, sample)
    }

    fn on_text_sample(&mut self, track_id: u32, sample: TextSample) -> bool {
        if !self.init_received {
            if self.queue.len() >= PRE_INIT_QUEUE_CAP {
                self.error = Some(FengError::InvalidArgument(
                    "init 前采样队列溢出".into(),
                ));
                return false;
            }
            self.queue.push(QueuedSample::Text(track_id, sample));
            return true;
        }
        self.dispatch_text(track_id, sample)
    }
}

/// 解封装器
pub struct Demuxer {
    io: IoContext,
    parser: Option<Box<dyn MediaParser>>,
    key_source: Option<Arc<dyn KeySource>>,
    state: Option<Arc<Mutex<DemuxState>>>,
    cancelled: Arc<AtomicBool>,
    container: ContainerType,
}

impl Demuxer {
    /// 从输入 I/O 创建
    pub fn new(io: IoContext) -> Self {
        Self {
            io,
            parser: None,
            key_source: None,
            state: None,
            cancelled: Arc::new(AtomicBool::new(false)),
            container: ContainerType::Unknown,
        }
    }

    /// 设置解密密钥源 (WVM 输入)
    pub fn set_key_source(&mut self, key_source: Arc<dyn KeySource>) {
        self.key_source = Some(key_source);
    }

    /// 取消标志 (可从其他线程置位)
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }

    /// 探测到的容器格式
    pub fn container(&self) -> ContainerType {
        self.container
    }

    /// 探测容器并初始化解析器
    pub fn initialize(&mut self, sink: StreamDataSink) -> FengResult<()> {
        let head = self.io.peek(PROBE_SIZE)?;
        self.container = detect_container(head);
        let mut parser = create_parser(self.container)
            .ok_or_else(|| FengError::InvalidArgument("无法识别输入容器格式".into()))?;
        info!("输入容器: {:?}", self.container);

        let state = Arc::new(Mutex::new(DemuxState {
            sink,
            track_map: Vec::new(),
            infos: Vec::new(),
            queue: Vec::new(),
            init_received: false,
            error: None,
        }));

        let init_state = Arc::clone(&state);
        let sample_state = Arc::clone(&state);
        let text_state = Arc::clone(&state);
        parser.init(
            ParserCallbacks {
                on_init: Box::new(move |streams| {
                    init_state.lock().unwrap().on_init(streams);
                }),
                on_sample: Box::new(move |track_id, sample| {
                    sample_state.lock().unwrap().on_sample(track_id, sample)
                }),
                on_text_sample: Box::new(move |track_id, sample| {
                    text_state.lock().unwrap().on_text_sample(track_id, sample)
                }),
            },
            self.key_source.clone(),
        );
        self.parser = Some(parser);
        self.state = Some(state);
        Ok(())
    }

    /// 主循环: 读取→解析, 直到 EOF 或被取消
    pub fn run(&mut self) -> FengResult<()> {
        let state = Arc::clone(
            self.state
                .as_ref()
                .ok_or_else(|| FengError::InvalidArgument("Demuxer 未初始化".into()))?,
        );
        let parser = self
            .parser
            .as_mut()
            .ok_or_else(|| FengError::InvalidArgument("Demuxer 未初始化".into()))?;
        let take_error = || state.lock().unwrap().error.take();

        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(FengError::Cancelled);
            }
            let read = self.io.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            parser.parse(&chunk[..read])?;
            if let Some(e) = take_error() {
                return Err(e);
            }
        }
        parser.flush()?;
        if let Some(e) = take_error() {
            return Err(e);
        }

        // 每轨补发流末尾标记
        let mut state = state.lock().unwrap();
        if !state.init_received {
            return Err(FengError::ParserFailure(
                "输入结束但未解析出任何轨道".into(),
            ));
        }
        debug!("输入读取完毕, 发送 EOS");
        for stream_index in 0..state.track_map.len() {
            (state.sink)(StreamData::MediaSample {
                stream_index,
                sample: MediaSample::eos(),
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use feng_core::io::MemoryBackend;

    #[test]
    fn test_unknown_container_rejected() {
        let backend = MemoryBackend::from_data(vec![0u8; 128]);
        let mut demuxer = Demuxer::new(IoContext::new(Box::new(backend)));
        let result = demuxer.initialize(Box::new(|_| Ok(())));
        assert!(matches!(result, Err(FengError::InvalidArgument(_))));
    }

    #[test]
    fn test_cancel_before_run() {
        let mut data = b"WEBVTT\n\n".to_vec();
        data.extend_from_slice(b"00:00:01.000 --> 00:00:02.000\nHi\n");
        let backend = MemoryBackend::from_data(data);
        let mut demuxer = Demuxer::new(IoContext::new(Box::new(backend)));
        demuxer.initialize(Box::new(|_| Ok(()))).unwrap();

        demuxer.cancel_flag().store(true, Ordering::Release);
        assert!(matches!(demuxer.run(), Err(FengError::Cancelled)));
    }

    #[test]
    fn test_webvtt_end_to_end() {
        let mut data = b"WEBVTT\n\n".to_vec();
        data.extend_from_slice(b"00:00:01.000 --> 00:00:02.000\nHi\n");
        let backend = MemoryBackend::from_data(data);
        let mut demuxer = Demuxer::new(IoContext::new(Box::new(backend)));

        let collected = Arc::new(Mutex::new(Vec::new()));
        let collected_cb = Arc::clone(&collected);
        demuxer
            .initialize(Box::new(move |data| {
                collected_cb.lock().unwrap().push(data);
                Ok(())
            }))
            .unwrap();
        demuxer.run().unwrap();

        let collected = collected.lock().unwrap();
        // StreamInfo + TextSample + EOS
        assert!(matches!(collected[0], StreamData::StreamInfo { .. }));
        assert!(matches!(collected[1], StreamData::TextSample { .. }));
        assert!(
            matches!(&collected[2], StreamData::MediaSample { sample, .. } if sample.is_eos)
        );
    }
}
