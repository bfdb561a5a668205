//! Opus 包时长解码.
//!
//! WebM 输入缺少 BlockDuration 时, 从包首字节 (TOC) 恢复采样时长:
//! config 字段决定单帧时长, code 字段决定帧数 (code 3 的帧数在次字节).

use feng_core::{FengError, FengResult};

/// Opus 内部时钟 (48 kHz)
pub const OPUS_TIME_SCALE: u32 = 48000;

/// 单帧时长 (48 kHz tick), 按 config (TOC 高 5 位) 查表
fn frame_duration_ticks(config: u8) -> u64 {
    // SILK (0..11): 10/20/40/60 ms; Hybrid (12..15): 10/20 ms;
    // CELT (16..31): 2.5/5/10/20 ms
    match config {
        0..=11 => [480, 960, 1920, 2880][(config % 4) as usize],
        12..=15 => [480, 960][(config % 2) as usize],
        _ => [120, 240, 480, 960][(config % 4) as usize],
    }
}

/// 解码一个 Opus 包的时长 (48 kHz tick)
pub fn packet_duration(packet: &[u8]) -> FengResult<u64> {
    let toc = *packet
        .first()
        .ok_or_else(|| FengError::ParserFailure("空 Opus 包".into()))?;
    let config = toc >> 3;
    let code = toc & 0x3;

    let frame_count = match code {
        0 => 1,
        1 | 2 => 2,
        _ => {
            let count_byte = *packet
                .get(1)
                .ok_or_else(|| FengError::ParserFailure("Opus code 3 包缺少帧数字节".into()))?;
            u64::from(count_byte & 0x3F)
        }
    };

    Ok(frame_duration_ticks(config) * frame_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_0_single_frame() {
        // config 3 (SILK 60ms), code 0
        let toc = 3 << 3;
        assert_eq!(packet_duration(&[toc, 0x00]).unwrap(), 2880);
    }

    #[test]
    fn test_code_1_two_frames() {
        // config 1 (SILK 20ms), code 1 → 2 帧
        let toc = (1 << 3) | 1;
        assert_eq!(packet_duration(&[toc]).unwrap(), 1920);
    }

    #[test]
    fn test_code_3_count_byte() {
        // config 17 (CELT 5ms), code 3, 帧数 6
        let toc = (17 << 3) | 3;
        assert_eq!(packet_duration(&[toc, 6]).unwrap(), 240 * 6);
    }

    #[test]
    fn test_celt_short_frames() {
        // config 16 (CELT 2.5ms), code 0
        let toc = 16 << 3;
        assert_eq!(packet_duration(&[toc]).unwrap(), 120);
    }

    #[test]
    fn test_empty_packet_fails() {
        assert!(packet_duration(&[]).is_err());
    }

    #[test]
    fn test_code_3_missing_count() {
        let toc = (0 << 3) | 3;
        assert!(packet_duration(&[toc]).is_err());
    }
}
