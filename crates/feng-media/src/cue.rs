//! 提示点对齐.
//!
//! 用户提供的提示点时间经由所有输出共享的提升队列对齐: 视频流在第一个
//! pts ≥ 提示点的关键帧处"提升"提示点 (确定精确断点时间), 其他流阻塞
//! 等待提升结果, 再按规则把采样划到断点两侧:
//! - 音频: 采样保持完整, 以中点决定归属
//! - 文本: 恰好在断点处剪开
//!
//! 每流缓冲上限 1000 个采样, 超限视为输入交织不当.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};

use feng_core::{FengError, FengResult};

use crate::sample::{CueEvent, MediaSample, TextSample};

/// 每流缓冲上限
const MAX_BUFFERED_SAMPLES: usize = 1000;

/// 共享提升队列
pub struct SyncPointQueue {
    state: Mutex<SyncState>,
    cond: Condvar,
}

struct SyncState {
    /// 提示点 (升序)
    hints: Vec<f64>,
    /// 已提升的 (提示点, 实际时间)
    promoted: Vec<(f64, f64)>,
    cancelled: bool,
}

impl SyncPointQueue {
    /// 以提示点集合创建
    pub fn new(hints: impl IntoIterator<Item = f64>) -> Self {
        let mut hints: Vec<f64> = hints.into_iter().collect();
        hints.sort_by(|a, b| a.partial_cmp(b).expect("提示点不可为 NaN"));
        hints.dedup();
        Self {
            state: Mutex::new(SyncState {
                hints,
                promoted: Vec::new(),
                cancelled: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// `after` 之后的下一个提示点
    pub fn next_hint(&self, after: f64) -> Option<f64> {
        let state = self.state.lock().unwrap();
        state.hints.iter().copied().find(|&h| h > after)
    }

    /// 提升一个提示点; 首个提升者确定正式时间, 返回正式值
    pub fn promote(&self, hint: f64, actual: f64) -> f64 {
        let mut state = self.state.lock().unwrap();
        if let Some((_, existing)) = state.promoted.iter().find(|(h, _)| *h == hint) {
            return *existing;
        }
        state.promoted.push((hint, actual));
        self.cond.notify_all();
        actual
    }

    /// 阻塞等待提示点被提升
    pub fn wait_promoted(&self, hint: f64) -> FengResult<f64> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.cancelled {
                return Err(FengError::Cancelled);
            }
            if let Some((_, actual)) = state.promoted.iter().find(|(h, _)| *h == hint) {
                return Ok(*actual);
            }
            state = self.cond.wait(state).unwrap();
        }
    }

    /// 取消: 释放所有等待者
    pub fn cancel(&self) {
        self.state.lock().unwrap().cancelled = true;
        self.cond.notify_all();
    }
}

/// 对齐器输出项
#[derive(Debug, Clone)]
pub enum AlignedOutput {
    /// 提示点事件 (在断点处下发)
    Cue(CueEvent),
    /// 媒体采样
    Media(MediaSample),
    /// 文本采样
    Text(TextSample),
}

/// 流类别 (决定断点两侧的划分规则)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CueStreamKind {
    /// 视频: 提升者, 在关键帧处断开
    Video,
    /// 音频: 中点归属
    Audio,
    /// 文本: 精确剪开
    Text,
}

/// 单流提示点对齐处理器
pub struct CueAlignmentHandler {
    queue: Arc<SyncPointQueue>,
    kind: CueStreamKind,
    time_scale: u32,
    /// 当前等待的提示点
    current_hint: Option<f64>,
    /// 非视频流的滞留采样
    pending: VecDeque<AlignedOutput>,
}

impl CueAlignmentHandler {
    /// 创建处理器
    pub fn new(queue: Arc<SyncPointQueue>, kind: CueStreamKind, time_scale: u32) -> Self {
        let current_hint = queue.next_hint(f64::MIN);
        Self {
            queue,
            kind,
            time_scale,
            current_hint,
            pending: VecDeque::new(),
        }
    }

    fn to_seconds(&self, ticks: i64) -> f64 {
        ticks as f64 / f64::from(self.time_scale)
    }

    /// 处理一个媒体采样
    pub fn process_media(&mut self, sample: MediaSample) -> FengResult<Vec<AlignedOutput>> {
        if sample.is_eos {
            let mut out = self.flush()?;
            out.push(AlignedOutput::Media(sample));
            return Ok(out);
        }
        let Some(hint) = self.current_hint else {
            return Ok(vec![AlignedOutput::Media(sample)]);
        };

        match self.kind {
            CueStreamKind::Video => {
                let pts_sec = self.to_seconds(sample.pts);
                if sample.is_key_frame && pts_sec >= hint {
                    let promoted = self.queue.promote(hint, pts_sec);
                    self.current_hint = self.queue.next_hint(hint);
                    Ok(vec![
                        AlignedOutput::Cue(CueEvent {
                            time_in_seconds: promoted,
                        }),
                        AlignedOutput::Media(sample),
                    ])
                } else {
                    Ok(vec![AlignedOutput::Media(sample)])
                }
            }
            CueStreamKind::Audio | CueStreamKind::Text => {
                let end_sec = self.to_seconds(sample.dts + sample.duration as i64);
                self.push_pending(AlignedOutput::Media(sample))?;
                if end_sec >= hint {
                    self.drain_at_promotion(hint)
                } else {
                    Ok(Vec::new())
                }
            }
        }
    }

    /// 处理一个文本采样
    pub fn process_text(&mut self, sample: TextSample) -> FengResult<Vec<AlignedOutput>> {
        let Some(hint) = self.current_hint else {
            return Ok(vec![AlignedOutput::Text(sample)]);
        };
        let end_sec = self.to_seconds(sample.end_time);
        self.push_pending(AlignedOutput::Text(sample))?;
        if end_sec >= hint {
            self.drain_at_promotion(hint)
        } else {
            Ok(Vec::new())
        }
    }

    /// 输入结束: 放出所有滞留采样
    pub fn flush(&mut self) -> FengResult<Vec<AlignedOutput>> {
        Ok(self.pending.drain(..).collect())
    }

    fn push_pending(&mut self, item: AlignedOutput) -> FengResult<()> {
        if self.pending.len() >= MAX_BUFFERED_SAMPLES {
            return Err(FengError::InvalidArgument(
                "streams are not properly multiplexed".into(),
            ));
        }
        self.pending.push_back(item);
        Ok(())
    }

    /// 断点已到: 等待提升并按规则划分滞留采样
    fn drain_at_promotion(&mut self, hint: f64) -> FengResult<Vec<AlignedOutput>> {
        let promoted = self.queue.wait_promoted(hint)?;
        self.current_hint = self.queue.next_hint(hint);

        let mut before = Vec::new();
        let mut after = Vec::new();
        for item in self.pending.drain(..) {
            match item {
                AlignedOutput::Media(sample) => {
                    let midpoint =
                        (sample.dts as f64 + sample.duration as f64 / 2.0) / f64::from(self.time_scale);
                    if midpoint < promoted {
                        before.push(AlignedOutput::Media(sample));
                    } else {
                        after.push(AlignedOutput::Media(sample));
                    }
                }
                AlignedOutput::Text(sample) => {
                    let start_sec = sample.start_time as f64 / f64::from(self.time_scale);
                    let end_sec = sample.end_time as f64 / f64::from(self.time_scale);
                    if end_sec <= promoted {
                        before.push(AlignedOutput::Text(sample));
                    } else if start_sec >= promoted {
                        after.push(AlignedOutput::Text(sample));
                    } else {
                        // 跨断点: 恰好在断点处剪开
                        let cut = (promoted * f64::from(self.time_scale)).round() as i64;
                        let mut head = sample.clone();
                        head.end_time = cut;
                        let mut tail = sample;
                        tail.start_time = cut;
                        before.push(AlignedOutput::Text(head));
                        after.push(AlignedOutput::Text(tail));
                    }
                }
                cue @ AlignedOutput::Cue(_) => before.push(cue),
            }
        }

        let mut out = before;
        out.push(AlignedOutput::Cue(CueEvent {
            time_in_seconds: promoted,
        }));
        // 断点之后的采样放回滞留区? 不需要: 它们已确定在断点之后
        out.extend(after);
        Ok(out)
    }
}
