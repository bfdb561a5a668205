//! ISO-BMFF 分片器.
//!
//! 每轨一个: 把采样累积进一个 traf+mdat 分片, 维护 trun 条目、
//! mdat 负载与加密时的 saiz/saio/senc 辅助信息. `finalize_fragment`
//! 把所有条目一致的字段提升为 tfhd 默认值, 并产出一条分段引用.

use feng_core::FengResult;

use crate::boxes::{
    SampleAuxiliaryInfoOffsetBox, SampleAuxiliaryInfoSizeBox, SampleEncryptionBox,
    SampleEncryptionEntry, TrackFragmentBox, TrackFragmentDecodeTimeBox,
    TrackFragmentHeaderBox, TrackRunBox, TrackRunEntry, SAMPLE_FLAGS_KEY_FRAME,
    SAMPLE_FLAGS_NON_KEY_FRAME,
};
use crate::sample::MediaSample;

/// 分段引用: 一个分片对 sidx / 清单的贡献
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentReference {
    /// 起始解码时间
    pub start_time: i64,
    /// 最早呈现时间
    pub earliest_presentation_time: i64,
    /// 分片时长 (tick)
    pub duration: u64,
    /// 被引用的字节大小 (moof+mdat, 由分段器序列化后填充)
    pub referenced_size: u32,
    /// SAP 类型 (1 = 关键帧起始, 0 = 未知)
    pub sap_type: u8,
    /// 最早呈现时间到首个 SAP 的时间差
    pub sap_delta_time: u32,
}

/// 完成的分片
pub struct FinalizedFragment {
    /// traf (含 trun/senc/saiz/saio)
    pub traf: TrackFragmentBox,
    /// mdat 负载
    pub mdat: Vec<u8>,
    /// 分段引用 (referenced_size 待分段器填充)
    pub reference: FragmentReference,
}

/// 分片器
pub struct Fragmenter {
    /// 输出轨道 ID
    track_id: u32,
    /// 目标分片时长 (tick)
    fragment_duration: u64,
    /// 是否要求分片在关键帧处闭合
    sap_aligned: bool,
    /// 加密采样的 IV 大小 (辅助信息)
    iv_size: u8,

    entries: Vec<TrackRunEntry>,
    mdat: Vec<u8>,
    senc_entries: Vec<SampleEncryptionEntry>,
    fragment_start_dts: Option<i64>,
    earliest_pts: Option<i64>,
    first_sap_time: Option<i64>,
    accumulated_duration: u64,
}

impl Fragmenter {
    /// 创建分片器
    pub fn new(track_id: u32, fragment_duration: u64, sap_aligned: bool) -> Self {
        Self {
            track_id,
            fragment_duration,
            sap_aligned,
            iv_size: 0,
            entries: Vec::new(),
            mdat: Vec::new(),
            senc_entries: Vec::new(),
            fragment_start_dts: None,
            earliest_pts: None,
            first_sap_time: None,
            accumulated_duration: 0,
        }
    }

    /// 是否为空分片
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 当前分片累计时长
    pub fn duration(&self) -> u64 {
        self.accumulated_duration
    }

    /// 当前分片起始时间
    pub fn start_dts(&self) -> Option<i64> {
        self.fragment_start_dts
    }

    /// 按闭合策略判断是否应在 `next` 之前闭合分片
    ///
    /// 时长达标即闭合; 要求 SAP 对齐时推迟到下一个关键帧.
    pub fn should_close_before(&self, next: &MediaSample) -> bool {
        if self.is_empty() || self.accumulated_duration < self.fragment_duration {
            return false;
        }
        !self.sap_aligned || next.is_key_frame
    }

    /// 追加一个采样
    pub fn add_sample(&mut self, sample: &MediaSample) -> FengResult<()> {
        if self.fragment_start_dts.is_none() {
            self.fragment_start_dts = Some(sample.dts);
        }
        let pts = sample.pts;
        if self.earliest_pts.is_none_or(|e| pts < e) {
            self.earliest_pts = Some(pts);
        }
        if sample.is_key_frame && self.first_sap_time.is_none() {
            self.first_sap_time = Some(pts);
        }

        self.mdat.extend_from_slice(&sample.data);
        self.entries.push(TrackRunEntry {
            sample_duration: sample.duration as u32,
            sample_size: sample.data.len() as u32,
            sample_flags: if sample.is_key_frame {
                SAMPLE_FLAGS_KEY_FRAME
            } else {
                SAMPLE_FLAGS_NON_KEY_FRAME
            },
            sample_composition_time_offset: (sample.pts - sample.dts) as i32,
        });
        self.accumulated_duration += sample.duration;

        if let Some(config) = &sample.encryption_config {
            self.iv_size = config.iv.len() as u8;
            self.senc_entries.push(SampleEncryptionEntry {
                iv: config.iv.clone(),
                subsamples: config
                    .subsamples
                    .iter()
                    .map(|s| (s.clear_bytes, s.cipher_bytes))
                    .collect(),
            });
        } else if !self.senc_entries.is_empty() {
            // 分片内混有明文采样: 为其记录空 IV 条目以保持计数一致
            self.senc_entries.push(SampleEncryptionEntry {
                iv: vec![0u8; self.iv_size as usize],
                subsamples: Vec::new(),
            });
        }
        Ok(())
    }

    /// 闭合当前分片
    pub fn finalize_fragment(&mut self) -> FengResult<FinalizedFragment> {
        let start_time = self.fragment_start_dts.take().unwrap_or(0);
        let earliest = self.earliest_pts.take().unwrap_or(start_time);
        let sap_time = self.first_sap_time.take();
        let entries = std::mem::take(&mut self.entries);
        let mdat = std::mem::take(&mut self.mdat);
        let senc_entries = std::mem::take(&mut self.senc_entries);
        let duration = std::mem::take(&mut self.accumulated_duration);

        // 所有条目一致的字段提升为 tfhd 默认值
        let all_same = |get: fn(&TrackRunEntry) -> u32| -> Option<u32> {
            let first = get(entries.first()?);
            entries.iter().all(|e| get(e) == first).then_some(first)
        };
        let default_duration = all_same(|e| e.sample_duration);
        let default_size = all_same(|e| e.sample_size);
        let default_flags = all_same(|e| e.sample_flags);
        let uniform_cts_zero = entries.iter().all(|e| e.sample_composition_time_offset == 0);

        let mut tfhd_flags = TrackFragmentHeaderBox::FLAG_DEFAULT_BASE_IS_MOOF;
        let mut trun_flags = TrackRunBox::FLAG_DATA_OFFSET;
        if default_duration.is_some() {
            tfhd_flags |= TrackFragmentHeaderBox::FLAG_DEFAULT_DURATION;
        } else {
            trun_flags |= TrackRunBox::FLAG_SAMPLE_DURATION;
        }
        if default_size.is_some() {
            tfhd_flags |= TrackFragmentHeaderBox::FLAG_DEFAULT_SIZE;
        } else {
            trun_flags |= TrackRunBox::FLAG_SAMPLE_SIZE;
        }
        if default_flags.is_some() {
            tfhd_flags |= TrackFragmentHeaderBox::FLAG_DEFAULT_FLAGS;
        } else {
            trun_flags |= TrackRunBox::FLAG_SAMPLE_FLAGS;
        }
        if !uniform_cts_zero {
            trun_flags |= TrackRunBox::FLAG_SAMPLE_CTS;
        }

        let sample_count = entries.len() as u32;
        let mut traf = TrackFragmentBox {
            header: TrackFragmentHeaderBox {
                flags: tfhd_flags,
                track_id: self.track_id,
                default_sample_duration: default_duration.unwrap_or(0),
                default_sample_size: default_size.unwrap_or(0),
                default_sample_flags: default_flags.unwrap_or(0),
            },
            decode_time: Some(TrackFragmentDecodeTimeBox {
                base_media_decode_time: start_time.max(0) as u64,
                ..Default::default()
            }),
            runs: vec![TrackRunBox {
                flags: trun_flags,
                sample_count,
                data_offset: 0, // 分段器序列化时回填
                entries,
                ..Default::default()
            }],
            ..Default::default()
        };

        if !senc_entries.is_empty() {
            let with_subsamples = senc_entries.iter().any(|e| !e.subsamples.is_empty());
            let senc_flags = if with_subsamples {
                SampleEncryptionBox::FLAG_SUBSAMPLES
            } else {
                0
            };
            traf.aux_size = Some(SampleAuxiliaryInfoSizeBox {
                default_sample_info_size: 0,
                sample_count,
                sample_info_sizes: senc_entries
                    .iter()
                    .map(|e| e.byte_len(with_subsamples) as u8)
                    .collect(),
            });
            // 偏移相对 moof 起点, 分段器序列化时回填
            traf.aux_offset = Some(SampleAuxiliaryInfoOffsetBox {
                version: 0,
                offsets: vec![0],
            });
            traf.sample_encryption = Some(SampleEncryptionBox {
                flags: senc_flags,
                iv_size: self.iv_size,
                entries: senc_entries,
            });
        }

        let reference = FragmentReference {
            start_time,
            earliest_presentation_time: earliest,
            duration,
            referenced_size: 0,
            sap_type: match sap_time {
                Some(_) => 1,
                None => 0,
            },
            sap_delta_time: sap_time
                .map(|t| (t - earliest).max(0) as u32)
                .unwrap_or(0),
        };

        Ok(FinalizedFragment {
            traf,
            mdat,
            reference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn sample(dts: i64, duration: u64, size: usize, key: bool) -> MediaSample {
        let mut s = MediaSample::new(dts, dts, key, Bytes::from(vec![0xAB; size]));
        s.duration = duration;
        s
    }

    #[test]
    fn test_duration_and_size_invariants() {
        let mut fragmenter = Fragmenter::new(1, 9000, true);
        let sizes = [100usize, 200, 150];
        for (i, size) in sizes.iter().enumerate() {
            fragmenter
                .add_sample(&sample(i as i64 * 3000, 3000, *size, i == 0))
                .unwrap();
        }
        let fragment = fragmenter.finalize_fragment().unwrap();

        // Σ sample_duration == 分片时长
        assert_eq!(fragment.reference.duration, 9000);
        // Σ sample_size == mdat 负载大小
        let total: usize = sizes.iter().sum();
        assert_eq!(fragment.mdat.len(), total);

        // 时长一致 → 提升为 tfhd 默认值
        let tfhd = &fragment.traf.header;
        assert_ne!(tfhd.flags & TrackFragmentHeaderBox::FLAG_DEFAULT_DURATION, 0);
        assert_eq!(tfhd.default_sample_duration, 3000);
        // 大小不一致 → 留在 trun
        let trun = &fragment.traf.runs[0];
        assert_ne!(trun.flags & TrackRunBox::FLAG_SAMPLE_SIZE, 0);
        assert_eq!(
            trun.entries.iter().map(|e| e.sample_size).sum::<u32>(),
            total as u32
        );
    }

    #[test]
    fn test_sap_reference() {
        let mut fragmenter = Fragmenter::new(1, 6000, true);
        fragmenter.add_sample(&sample(100, 3000, 10, true)).unwrap();
        fragmenter.add_sample(&sample(3100, 3000, 10, false)).unwrap();
        let fragment = fragmenter.finalize_fragment().unwrap();

        assert_eq!(fragment.reference.sap_type, 1);
        assert_eq!(fragment.reference.start_time, 100);
        assert_eq!(fragment.reference.earliest_presentation_time, 100);
        assert_eq!(fragment.reference.sap_delta_time, 0);
    }

    #[test]
    fn test_close_policy_waits_for_key_frame() {
        let mut fragmenter = Fragmenter::new(1, 5000, true);
        fragmenter.add_sample(&sample(0, 3000, 10, true)).unwrap();
        fragmenter.add_sample(&sample(3000, 3000, 10, false)).unwrap();

        // 时长已达标, 但 SAP 对齐要求等待关键帧
        assert!(!fragmenter.should_close_before(&sample(6000, 3000, 10, false)));
        assert!(fragmenter.should_close_before(&sample(6000, 3000, 10, true)));

        // 非对齐模式: 到时长即闭合
        let mut free = Fragmenter::new(1, 5000, false);
        free.add_sample(&sample(0, 3000, 10, true)).unwrap();
        free.add_sample(&sample(3000, 3000, 10, false)).unwrap();
        assert!(free.should_close_before(&sample(6000, 3000, 10, false)));
    }

    #[test]
    fn test_encrypted_fragment_aux_info() {
        use crate::sample::{EncryptionConfig, SubsampleEntry};
        use feng_crypto::ProtectionScheme;

        let mut fragmenter = Fragmenter::new(1, 9000, false);
        let mut s = sample(0, 3000, 48, true);
        s.encryption_config = Some(EncryptionConfig {
            scheme: ProtectionScheme::Cenc,
            iv: vec![0x01; 8],
            key_id: [0x02; 16],
            subsamples: vec![SubsampleEntry::new(16, 32)],
        });
        fragmenter.add_sample(&s).unwrap();
        let fragment = fragmenter.finalize_fragment().unwrap();

        let senc = fragment.traf.sample_encryption.as_ref().unwrap();
        assert_eq!(senc.entries.len(), 1);
        assert_eq!(senc.entries[0].iv, vec![0x01; 8]);
        assert_eq!(senc.entries[0].subsamples, vec![(16, 32)]);

        let saiz = fragment.traf.aux_size.as_ref().unwrap();
        // iv(8) + count(2) + 1 条 * 6 = 16
        assert_eq!(saiz.sample_info_sizes, vec![16]);
        assert!(fragment.traf.aux_offset.is_some());
    }

    #[test]
    fn test_negative_cts_kept_per_sample() {
        let mut fragmenter = Fragmenter::new(1, 9000, false);
        let mut s1 = sample(0, 3000, 10, true);
        s1.pts = 3000;
        let mut s2 = sample(3000, 3000, 10, false);
        s2.pts = 1500;
        fragmenter.add_sample(&s1).unwrap();
        fragmenter.add_sample(&s2).unwrap();
        let fragment = fragmenter.finalize_fragment().unwrap();

        let trun = &fragment.traf.runs[0];
        assert_ne!(trun.flags & TrackRunBox::FLAG_SAMPLE_CTS, 0);
        assert_eq!(trun.entries[0].sample_composition_time_offset, 3000);
        assert_eq!(trun.entries[1].sample_composition_time_offset, -1500);
    }
}
