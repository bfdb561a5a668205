//! WebVTT 文本解析器.
//!
//! 行驱动状态机:
//! ```text
//! Header → Metadata → CueIdentifierOrTimingOrComment
//!        → CueTiming → CuePayload → (回到 CueIdentifier…)
//!        | Comment | ParseError
//! ```
//! 时间基固定为毫秒 (1000 tick/秒).

use std::sync::Arc;

use feng_core::{FengError, FengResult};
use feng_crypto::KeySource;

use crate::parser::{MediaParser, ParserCallbacks};
use crate::sample::TextSample;
use crate::stream_info::{Codec, StreamInfo, StreamKind, TextInfo};

/// WebVTT 时间基 (毫秒)
pub const WEBVTT_TIME_SCALE: u32 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Metadata,
    CueIdentifierOrTimingOrComment,
    CueTiming,
    CuePayload,
    Comment,
}

/// WebVTT 解析器
pub struct WebVttParser {
    callbacks: Option<ParserCallbacks>,
    state: State,
    /// 未组成整行的残余字节
    line_buffer: Vec<u8>,
    /// 头部区文本 (codec_config)
    header_lines: Vec<String>,
    /// 当前 cue
    cue_id: String,
    cue_start: i64,
    cue_end: i64,
    cue_settings: String,
    cue_payload: Vec<String>,
    init_sent: bool,
    failed: bool,
}

impl Default for WebVttParser {
    fn default() -> Self {
        Self::new()
    }
}

impl WebVttParser {
    /// 创建解析器
    pub fn new() -> Self {
        Self {
            callbacks: None,
            state: State::Header,
            line_buffer: Vec::new(),
            header_lines: Vec::new(),
            cue_id: String::new(),
            cue_start: 0,
            cue_end: 0,
            cue_settings: String::new(),
            cue_payload: Vec::new(),
            init_sent: false,
            failed: false,
        }
    }

    fn fail(&mut self, msg: impl Into<String>) -> FengError {
        self.failed = true;
        FengError::ParserFailure(msg.into())
    }

    fn send_init(&mut self) {
        if self.init_sent {
            return;
        }
        self.init_sent = true;
        let config = self.header_lines.join("\n");
        let info = Arc::new(StreamInfo {
            track_id: 1,
            time_scale: WEBVTT_TIME_SCALE,
            duration: 0,
            codec: Codec::Webvtt,
            codec_string: "wvtt".to_string(),
            language: String::new(),
            is_encrypted: false,
            extra_data: config.as_bytes().to_vec(),
            kind: StreamKind::Text(TextInfo {
                width: 0,
                height: 0,
                codec_config: config.into_bytes(),
            }),
        });
        if let Some(cb) = self.callbacks.as_mut() {
            (cb.on_init)(&[info]);
        }
    }

    fn emit_cue(&mut self) -> FengResult<()> {
        let sample = TextSample {
            id: std::mem::take(&mut self.cue_id),
            start_time: self.cue_start,
            end_time: self.cue_end,
            settings: std::mem::take(&mut self.cue_settings),
            payload: self.cue_payload.join("\n"),
        };
        self.cue_payload.clear();
        if let Some(cb) = self.callbacks.as_mut() {
            if !(cb.on_text_sample)(1, sample) {
                return Err(FengError::Cancelled);
            }
        }
        Ok(())
    }

    fn process_line(&mut self, line: &str) -> FengResult<()> {
        match self.state {
            State::Header => {
                let line = line.trim_start_matches('\u{feff}');
                if !line.starts_with("WEBVTT") {
                    return Err(self.fail("缺少 WEBVTT 头"));
                }
                self.header_lines.push(line.to_string());
                self.state = State::Metadata;
            }
            State::Metadata => {
                if line.is_empty() {
                    self.send_init();
                    self.state = State::CueIdentifierOrTimingOrComment;
                } else {
                    self.header_lines.push(line.to_string());
                }
            }
            State::CueIdentifierOrTimingOrComment => {
                if line.is_empty() {
                    // 连续空行
                } else if line.starts_with("NOTE") {
                    self.state = State::Comment;
                } else if line.contains("-->") {
                    self.parse_timing(line)?;
                    self.state = State::CuePayload;
                } else {
                    self.cue_id = line.to_string();
                    self.state = State::CueTiming;
                }
            }
            State::CueTiming => {
                if !line.contains("-->") {
                    return Err(self.fail(format!("期望时间行, 实际: {line}")));
                }
                self.parse_timing(line)?;
                self.state = State::CuePayload;
            }
            State::CuePayload => {
                if line.is_empty() {
                    self.emit_cue()?;
                    self.state = State::CueIdentifierOrTimingOrComment;
                } else {
                    self.cue_payload.push(line.to_string());
                }
            }
            State::Comment => {
                if line.is_empty() {
                    self.state = State::CueIdentifierOrTimingOrComment;
                }
            }
        }
        Ok(())
    }

    fn parse_timing(&mut self, line: &str) -> FengResult<()> {
        let (start_part, rest) = line
            .split_once("-->")
            .ok_or_else(|| FengError::ParserFailure("时间行缺少 -->".into()))?;
        let mut rest_parts = rest.trim().splitn(2, char::is_whitespace);
        let end_part = rest_parts.next().unwrap_or("");
        let settings = rest_parts.next().unwrap_or("").trim();

        self.cue_start = parse_timestamp(start_part.trim())
            .ok_or_else(|| FengError::ParserFailure(format!("非法时间戳: {start_part}")))?;
        self.cue_end = parse_timestamp(end_part)
            .ok_or_else(|| FengError::ParserFailure(format!("非法时间戳: {end_part}")))?;
        self.cue_settings = settings.to_string();
        Ok(())
    }
}

/// 解析 `HH:MM:SS.mmm` 或 `MM:SS.mmm` 为毫秒
fn parse_timestamp(s: &str) -> Option<i64> {
    let (main, millis) = s.split_once('.')?;
    let millis: i64 = millis.parse().ok()?;
    if millis > 999 {
        return None;
    }

    let parts: Vec<&str> = main.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<i64>().ok()?, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        [m, s] => (0, m.parse::<i64>().ok()?, s.parse::<i64>().ok()?),
        _ => return None,
    };
    if minutes > 59 || seconds > 59 {
        return None;
    }
    Some(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

impl MediaParser for WebVttParser {
    fn init(&mut self, callbacks: ParserCallbacks, _key_source: Option<Arc<dyn KeySource>>) {
        self.callbacks = Some(callbacks);
    }

    fn parse(&mut self, data: &[u8]) -> FengResult<()> {
        if self.failed {
            return Err(FengError::ParserFailure("解析器已失败".into()));
        }
        self.line_buffer.extend_from_slice(data);

        // 按行切分, 残行留待下一块
        while let Some(newline_pos) = self.line_buffer.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.line_buffer.drain(..=newline_pos).collect();
            line.pop(); // \n
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line).to_string();
            self.process_line(&line)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> FengResult<()> {
        // 末尾可能没有换行/空行
        if !self.line_buffer.is_empty() {
            let line = String::from_utf8_lossy(&std::mem::take(&mut self.line_buffer)).to_string();
            let line = line.trim_end_matches('\r').to_string();
            self.process_line(&line)?;
        }
        if self.state == State::CuePayload {
            self.emit_cue()?;
            self.state = State::CueIdentifierOrTimingOrComment;
        }
        if !self.init_sent && self.state != State::Header {
            self.send_init();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect(input: &str, chunk_size: usize) -> (usize, Vec<TextSample>) {
        let samples = Arc::new(Mutex::new(Vec::new()));
        let samples_cb = Arc::clone(&samples);
        let inits = Arc::new(Mutex::new(0usize));
        let inits_cb = Arc::clone(&inits);

        let mut parser = WebVttParser::new();
        parser.init(
            ParserCallbacks {
                on_init: Box::new(move |_| {
                    *inits_cb.lock().unwrap() += 1;
                }),
                on_sample: Box::new(|_, _| true),
                on_text_sample: Box::new(move |_, sample| {
                    samples_cb.lock().unwrap().push(sample);
                    true
                }),
            },
            None,
        );
        for chunk in input.as_bytes().chunks(chunk_size) {
            parser.parse(chunk).unwrap();
        }
        parser.flush().unwrap();

        let init_count = *inits.lock().unwrap();
        let samples = samples.lock().unwrap().clone();
        (init_count, samples)
    }

    const SIMPLE: &str = "WEBVTT\n\n00:00:01.000 --> 00:00:02.500\nHello\nWorld\n\n\
                          id-2\n00:01:00.000 --> 00:01:01.000 align:start\nSecond cue\n";

    #[test]
    fn test_simple_cues() {
        let (inits, samples) = collect(SIMPLE, 1024);
        assert_eq!(inits, 1);
        assert_eq!(samples.len(), 2);

        assert_eq!(samples[0].start_time, 1000);
        assert_eq!(samples[0].end_time, 2500);
        assert_eq!(samples[0].payload, "Hello\nWorld");
        assert_eq!(samples[0].id, "");

        assert_eq!(samples[1].id, "id-2");
        assert_eq!(samples[1].start_time, 60_000);
        assert_eq!(samples[1].settings, "align:start");
    }

    #[test]
    fn test_chunked_input_resumable() {
        // 单字节分块喂入, 结果与整块一致
        let (_, samples) = collect(SIMPLE, 1);
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].payload, "Second cue");
    }

    #[test]
    fn test_comment_and_metadata() {
        let input = "WEBVTT - meta\nKind: captions\n\nNOTE comment line\nstill comment\n\n\
                     00:00.000 --> 00:01.000\nText\n";
        let (inits, samples) = collect(input, 16);
        assert_eq!(inits, 1);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].end_time, 1000);
    }

    #[test]
    fn test_missing_header_fails() {
        let mut parser = WebVttParser::new();
        parser.init(
            ParserCallbacks::media_only(Box::new(|_| {}), Box::new(|_, _| true)),
            None,
        );
        assert!(parser.parse(b"NOT A VTT\n").is_err());
        // 永久失败
        assert!(parser.parse(b"WEBVTT\n").is_err());
    }

    #[test]
    fn test_timestamp_forms() {
        assert_eq!(parse_timestamp("00:00:01.000"), Some(1000));
        assert_eq!(parse_timestamp("01:02.003"), Some(62_003));
        assert_eq!(parse_timestamp("10:00:00.500"), Some(36_000_500));
        assert_eq!(parse_timestamp("bad"), None);
        assert_eq!(parse_timestamp("00:61.000"), None);
    }
}
