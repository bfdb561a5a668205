//! AVC (H.264) 配置记录与片头解析.
//!
//! - `AvcDecoderConfigurationRecord`: ISO 14496-15 avcC 负载的解析/序列化,
//!   并推导 `nalu_length_size` 与 `avc1.PPCCLL` 编解码器字符串
//! - SPS/PPS 解析: 提取分辨率与片头解析所需的熵编码参数
//! - 片头长度计算: 子采样加密需要把加密起点精确到片头之后的字节边界

use feng_core::{BitReader, BufferReader, BufferWriter, FengError, FengResult};

use super::nalu::{strip_emulation_prevention, H264NaluType};

/// avcC 负载 (AVCDecoderConfigurationRecord)
#[derive(Debug, Clone, Default)]
pub struct AvcDecoderConfigurationRecord {
    /// 配置版本 (1)
    pub version: u8,
    /// profile_idc
    pub profile_indication: u8,
    /// constraint flags
    pub profile_compatibility: u8,
    /// level_idc
    pub level_indication: u8,
    /// NALU 长度前缀字节数
    pub nalu_length_size: u8,
    /// SPS NALU 列表
    pub sps_list: Vec<Vec<u8>>,
    /// PPS NALU 列表
    pub pps_list: Vec<Vec<u8>>,
}

impl AvcDecoderConfigurationRecord {
    /// 解析 avcC 负载
    pub fn parse(data: &[u8]) -> FengResult<Self> {
        let mut r = BufferReader::new(data);
        let version = r.read_u8()?;
        if version != 1 {
            return Err(FengError::ParserFailure(format!(
                "avcC 版本非法: {version}"
            )));
        }
        let profile_indication = r.read_u8()?;
        let profile_compatibility = r.read_u8()?;
        let level_indication = r.read_u8()?;
        let nalu_length_size = (r.read_u8()? & 0x3) + 1;
        let sps_count = r.read_u8()? & 0x1F;
        let mut sps_list = Vec::with_capacity(sps_count as usize);
        for _ in 0..sps_count {
            let len = r.read_u16()? as usize;
            sps_list.push(r.read_vec(len)?);
        }
        let pps_count = r.read_u8()?;
        let mut pps_list = Vec::with_capacity(pps_count as usize);
        for _ in 0..pps_count {
            let len = r.read_u16()? as usize;
            pps_list.push(r.read_vec(len)?);
        }
        Ok(Self {
            version,
            profile_indication,
            profile_compatibility,
            level_indication,
            nalu_length_size,
            sps_list,
            pps_list,
        })
    }

    /// 序列化为 avcC 负载
    pub fn serialize(&self) -> Vec<u8> {
        let mut w = BufferWriter::new();
        w.put_u8(1);
        w.put_u8(self.profile_indication);
        w.put_u8(self.profile_compatibility);
        w.put_u8(self.level_indication);
        w.put_u8(0xFC | (self.nalu_length_size - 1));
        w.put_u8(0xE0 | self.sps_list.len() as u8);
        for sps in &self.sps_list {
            w.put_u16(sps.len() as u16);
            w.put_bytes(sps);
        }
        w.put_u8(self.pps_list.len() as u8);
        for pps in &self.pps_list {
            w.put_u16(pps.len() as u16);
            w.put_bytes(pps);
        }
        w.into_vec()
    }

    /// RFC 6381 编解码器字符串 (avc1.PPCCLL)
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_indication, self.profile_compatibility, self.level_indication
        )
    }
}

/// SPS 中片头解析需要的字段
#[derive(Debug, Clone, Default)]
pub struct AvcSps {
    /// seq_parameter_set_id
    pub id: u32,
    /// profile_idc
    pub profile_idc: u8,
    /// 色度平面独立编码
    pub separate_colour_plane_flag: bool,
    /// log2(max_frame_num)
    pub log2_max_frame_num: u32,
    /// pic_order_cnt_type
    pub pic_order_cnt_type: u32,
    /// log2(max_pic_order_cnt_lsb)
    pub log2_max_pic_order_cnt_lsb: u32,
    /// delta_pic_order_always_zero_flag
    pub delta_pic_order_always_zero_flag: bool,
    /// 仅帧编码
    pub frame_mbs_only_flag: bool,
    /// 编码宽度
    pub width: u32,
    /// 编码高度
    pub height: u32,
}

/// 解析 SPS NALU (含 NAL 头)
pub fn parse_sps(nalu: &[u8]) -> FengResult<AvcSps> {
    if nalu.is_empty() || H264NaluType::from_header(nalu[0]) != H264NaluType::Sps {
        return Err(FengError::ParserFailure("不是 SPS NALU".into()));
    }
    let rbsp = strip_emulation_prevention(&nalu[1..]);
    let mut br = BitReader::new(&rbsp);

    let mut sps = AvcSps {
        profile_idc: br.read_bits(8)? as u8,
        ..Default::default()
    };
    br.skip_bits(8)?; // constraint flags + reserved
    br.skip_bits(8)?; // level_idc
    sps.id = br.read_ue()?;

    let mut chroma_format_idc = 1;
    if matches!(
        sps.profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = br.read_ue()?;
        if chroma_format_idc == 3 {
            sps.separate_colour_plane_flag = br.read_bit()? != 0;
        }
        br.read_ue()?; // bit_depth_luma_minus8
        br.read_ue()?; // bit_depth_chroma_minus8
        br.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag
        if br.read_bit()? != 0 {
            // seq_scaling_matrix_present: 跳过缩放表
            let count = if chroma_format_idc == 3 { 12 } else { 8 };
            for i in 0..count {
                if br.read_bit()? != 0 {
                    skip_scaling_list(&mut br, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    sps.log2_max_frame_num = br.read_ue()? + 4;
    sps.pic_order_cnt_type = br.read_ue()?;
    if sps.pic_order_cnt_type == 0 {
        sps.log2_max_pic_order_cnt_lsb = br.read_ue()? + 4;
    } else if sps.pic_order_cnt_type == 1 {
        sps.delta_pic_order_always_zero_flag = br.read_bit()? != 0;
        br.read_se()?; // offset_for_non_ref_pic
        br.read_se()?; // offset_for_top_to_bottom_field
        let cycle = br.read_ue()?;
        for _ in 0..cycle {
            br.read_se()?;
        }
    }
    br.read_ue()?; // max_num_ref_frames
    br.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = br.read_ue()? + 1;
    let pic_height_in_map_units = br.read_ue()? + 1;
    sps.frame_mbs_only_flag = br.read_bit()? != 0;
    if !sps.frame_mbs_only_flag {
        br.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    br.skip_bits(1)?; // direct_8x8_inference_flag

    let mut crop = [0u32; 4];
    if br.read_bit()? != 0 {
        for c in &mut crop {
            *c = br.read_ue()?;
        }
    }

    let frame_height_mult = if sps.frame_mbs_only_flag { 1 } else { 2 };
    let (crop_x, crop_y) = match chroma_format_idc {
        0 => (1, 1),
        1 => (2, 2),
        2 => (2, 1),
        _ => (1, 1),
    };
    sps.width = pic_width_in_mbs * 16 - crop_x * (crop[0] + crop[1]);
    sps.height =
        frame_height_mult * pic_height_in_map_units * 16 - crop_y * frame_height_mult * (crop[2] + crop[3]);
    Ok(sps)
}

fn skip_scaling_list(br: &mut BitReader<'_>, size: u32) -> FengResult<()> {
    let mut last_scale = 8i32;
    let mut next_scale = 8i32;
    for _ in 0..size {
        if next_scale != 0 {
            let delta = br.read_se()?;
            next_scale = (last_scale + delta + 256) % 256;
        }
        if next_scale != 0 {
            last_scale = next_scale;
        }
    }
    Ok(())
}

/// PPS 中片头解析需要的字段
#[derive(Debug, Clone, Default)]
pub struct AvcPps {
    /// pic_parameter_set_id
    pub id: u32,
    /// 关联的 SPS id
    pub sps_id: u32,
    /// CABAC 熵编码
    pub entropy_coding_mode_flag: bool,
    /// bottom_field_pic_order_in_frame_present_flag
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    /// 默认 L0 参考数
    pub num_ref_idx_l0_default: u32,
    /// 默认 L1 参考数
    pub num_ref_idx_l1_default: u32,
    /// 加权预测
    pub weighted_pred_flag: bool,
    /// 加权双向预测 idc
    pub weighted_bipred_idc: u32,
    /// 去块滤波控制存在
    pub deblocking_filter_control_present_flag: bool,
    /// 冗余图像计数存在
    pub redundant_pic_cnt_present_flag: bool,
}

/// 解析 PPS NALU (含 NAL 头)
pub fn parse_pps(nalu: &[u8]) -> FengResult<AvcPps> {
    if nalu.is_empty() || H264NaluType::from_header(nalu[0]) != H264NaluType::Pps {
        return Err(FengError::ParserFailure("不是 PPS NALU".into()));
    }
    let rbsp = strip_emulation_prevention(&nalu[1..]);
    let mut br = BitReader::new(&rbsp);

    let mut pps = AvcPps {
        id: br.read_ue()?,
        sps_id: br.read_ue()?,
        ..Default::default()
    };
    pps.entropy_coding_mode_flag = br.read_bit()? != 0;
    pps.bottom_field_pic_order_in_frame_present_flag = br.read_bit()? != 0;
    let num_slice_groups = br.read_ue()? + 1;
    if num_slice_groups > 1 {
        // FMO 片组在打包输入中不出现
        return Err(FengError::Unimplemented("H.264 FMO 片组".into()));
    }
    pps.num_ref_idx_l0_default = br.read_ue()? + 1;
    pps.num_ref_idx_l1_default = br.read_ue()? + 1;
    pps.weighted_pred_flag = br.read_bit()? != 0;
    pps.weighted_bipred_idc = br.read_bits(2)?;
    br.read_se()?; // pic_init_qp_minus26
    br.read_se()?; // pic_init_qs_minus26
    br.read_se()?; // chroma_qp_index_offset
    pps.deblocking_filter_control_present_flag = br.read_bit()? != 0;
    br.skip_bits(1)?; // constrained_intra_pred_flag
    pps.redundant_pic_cnt_present_flag = br.read_bit()? != 0;
    Ok(pps)
}

/// 片类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    fn from_value(v: u32) -> FengResult<Self> {
        match v % 5 {
            0 => Ok(Self::P),
            1 => Ok(Self::B),
            2 => Ok(Self::I),
            3 => Ok(Self::Sp),
            4 => Ok(Self::Si),
            _ => unreachable!(),
        }
    }
}

/// H.264 片头解析器
///
/// 持有已解析的 SPS/PPS, 对每个片 NALU 计算片头的字节长度
/// (含 NAL 头, 向上取整到字节边界).
#[derive(Default)]
pub struct H264SliceHeaderParser {
    sps_map: Vec<AvcSps>,
    pps_map: Vec<AvcPps>,
}

impl H264SliceHeaderParser {
    /// 从配置记录创建
    pub fn new(config: &AvcDecoderConfigurationRecord) -> FengResult<Self> {
        let mut parser = Self::default();
        for sps in &config.sps_list {
            parser.sps_map.push(parse_sps(sps)?);
        }
        for pps in &config.pps_list {
            parser.pps_map.push(parse_pps(pps)?);
        }
        Ok(parser)
    }

    fn find_sps(&self, id: u32) -> FengResult<&AvcSps> {
        self.sps_map
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| FengError::ParserFailure(format!("未知 SPS id {id}")))
    }

    fn find_pps(&self, id: u32) -> FengResult<&AvcPps> {
        self.pps_map
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| FengError::ParserFailure(format!("未知 PPS id {id}")))
    }

    /// 计算片 NALU 的头部字节数 (含 1 字节 NAL 头)
    pub fn header_size(&self, nalu: &[u8]) -> FengResult<usize> {
        if nalu.is_empty() {
            return Err(FengError::ParserFailure("空 NALU".into()));
        }
        let nal_ref_idc = (nalu[0] >> 5) & 0x3;
        let nalu_type = nalu[0] & 0x1F;
        let is_idr = nalu_type == 5;

        let rbsp = strip_emulation_prevention(&nalu[1..]);
        let mut br = BitReader::new(&rbsp);

        br.read_ue()?; // first_mb_in_slice
        let slice_type = SliceType::from_value(br.read_ue()?)?;
        let pps = self.find_pps(br.read_ue()?)?;
        let sps = self.find_sps(pps.sps_id)?;

        if sps.separate_colour_plane_flag {
            br.skip_bits(2)?; // colour_plane_id
        }
        br.skip_bits(sps.log2_max_frame_num)?; // frame_num

        let mut field_pic_flag = false;
        if !sps.frame_mbs_only_flag {
            field_pic_flag = br.read_bit()? != 0;
            if field_pic_flag {
                br.skip_bits(1)?; // bottom_field_flag
            }
        }
        if is_idr {
            br.read_ue()?; // idr_pic_id
        }
        if sps.pic_order_cnt_type == 0 {
            br.skip_bits(sps.log2_max_pic_order_cnt_lsb)?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                br.read_se()?; // delta_pic_order_cnt_bottom
            }
        } else if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero_flag {
            br.read_se()?;
            if pps.bottom_field_pic_order_in_frame_present_flag && !field_pic_flag {
                br.read_se()?;
            }
        }
        if pps.redundant_pic_cnt_present_flag {
            br.read_ue()?; // redundant_pic_cnt
        }

        let mut num_ref_idx_l0 = pps.num_ref_idx_l0_default;
        let mut num_ref_idx_l1 = pps.num_ref_idx_l1_default;
        if slice_type == SliceType::B {
            br.skip_bits(1)?; // direct_spatial_mv_pred_flag
        }
        if matches!(slice_type, SliceType::P | SliceType::Sp | SliceType::B) {
            if br.read_bit()? != 0 {
                num_ref_idx_l0 = br.read_ue()? + 1;
                if slice_type == SliceType::B {
                    num_ref_idx_l1 = br.read_ue()? + 1;
                }
            }
            // ref_pic_list_modification
            self.skip_ref_pic_list_modification(&mut br)?;
            if slice_type == SliceType::B {
                self.skip_ref_pic_list_modification(&mut br)?;
            }
        }

        let weighted = (pps.weighted_pred_flag
            && matches!(slice_type, SliceType::P | SliceType::Sp))
            || (pps.weighted_bipred_idc == 1 && slice_type == SliceType::B);
        if weighted {
            self.skip_pred_weight_table(&mut br, slice_type, num_ref_idx_l0, num_ref_idx_l1)?;
        }

        if nal_ref_idc != 0 {
            // dec_ref_pic_marking
            if is_idr {
                br.skip_bits(2)?; // no_output_of_prior_pics + long_term_reference
            } else if br.read_bit()? != 0 {
                // adaptive_ref_pic_marking_mode
                loop {
                    let op = br.read_ue()?;
                    if op == 0 {
                        break;
                    }
                    if matches!(op, 1 | 3) {
                        br.read_ue()?;
                    }
                    if op == 2 {
                        br.read_ue()?;
                    }
                    if matches!(op, 3 | 4) {
                        br.read_ue()?;
                    }
                    if op == 6 {
                        br.read_ue()?;
                    }
                }
            }
        }

        if pps.entropy_coding_mode_flag && slice_type != SliceType::I && slice_type != SliceType::Si
        {
            br.read_ue()?; // cabac_init_idc
        }
        br.read_se()?; // slice_qp_delta
        if matches!(slice_type, SliceType::Sp | SliceType::Si) {
            if slice_type == SliceType::Sp {
                br.skip_bits(1)?; // sp_for_switch_flag
            }
            br.read_se()?; // slice_qs_delta
        }
        if pps.deblocking_filter_control_present_flag {
            let disable = br.read_ue()?;
            if disable != 1 {
                br.read_se()?; // slice_alpha_c0_offset_div2
                br.read_se()?; // slice_beta_offset_div2
            }
        }

        // 片头位数换算回转义前的字节数: 片头中的 RBSP 位置与原始 NALU
        // 一一对应 (片头内出现防竞争字节的概率极低, 但仍需校正)
        let header_bits = br.bits_read();
        let header_bytes_rbsp = header_bits.div_ceil(8);
        let header_bytes = rbsp_to_raw_offset(&nalu[1..], header_bytes_rbsp);
        Ok(1 + header_bytes)
    }

    fn skip_ref_pic_list_modification(&self, br: &mut BitReader<'_>) -> FengResult<()> {
        if br.read_bit()? != 0 {
            loop {
                let idc = br.read_ue()?;
                if idc == 3 {
                    break;
                }
                br.read_ue()?; // abs_diff_pic_num_minus1 / long_term_pic_num
            }
        }
        Ok(())
    }

    fn skip_pred_weight_table(
        &self,
        br: &mut BitReader<'_>,
        slice_type: SliceType,
        num_l0: u32,
        num_l1: u32,
    ) -> FengResult<()> {
        br.read_ue()?; // luma_log2_weight_denom
        br.read_ue()?; // chroma_log2_weight_denom
        for _ in 0..num_l0 {
            self.skip_weight_entry(br)?;
        }
        if slice_type == SliceType::B {
            for _ in 0..num_l1 {
                self.skip_weight_entry(br)?;
            }
        }
        Ok(())
    }

    fn skip_weight_entry(&self, br: &mut BitReader<'_>) -> FengResult<()> {
        if br.read_bit()? != 0 {
            br.read_se()?; // luma_weight
            br.read_se()?; // luma_offset
        }
        if br.read_bit()? != 0 {
            for _ in 0..4 {
                br.read_se()?; // chroma weight/offset x2
            }
        }
        Ok(())
    }
}

/// 把 RBSP 偏移映射回含防竞争字节的原始偏移
fn rbsp_to_raw_offset(raw: &[u8], rbsp_offset: usize) -> usize {
    let mut rbsp_pos = 0usize;
    let mut zeros = 0usize;
    for (raw_pos, &b) in raw.iter().enumerate() {
        if rbsp_pos >= rbsp_offset {
            return raw_pos;
        }
        if zeros >= 2 && b == 0x03 && raw.get(raw_pos + 1).is_some_and(|&n| n <= 0x03) {
            zeros = 0;
            continue; // 防竞争字节不计入 RBSP
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        rbsp_pos += 1;
    }
    raw.len().min(rbsp_offset.max(rbsp_pos))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 把 '0'/'1' 位串打包为字节 (末尾补零)
    fn pack_bits(bits: &str) -> Vec<u8> {
        let mut out = Vec::new();
        let mut cur = 0u8;
        let mut n = 0;
        for c in bits.chars().filter(|c| *c == '0' || *c == '1') {
            cur = (cur << 1) | u8::from(c == '1');
            n += 1;
            if n == 8 {
                out.push(cur);
                cur = 0;
                n = 0;
            }
        }
        if n > 0 {
            out.push(cur << (8 - n));
        }
        out
    }

    fn ue(v: u32) -> String {
        let code = v + 1;
        let bits = 32 - code.leading_zeros();
        format!("{}{:0width$b}", "0".repeat(bits as usize - 1), code, width = bits as usize)
    }

    /// Baseline 640x480 SPS: id=0, log2_max_frame_num=4, poc_type=2
    fn make_sps() -> Vec<u8> {
        let mut bits = String::new();
        bits += &ue(0); // seq_parameter_set_id
        bits += &ue(0); // log2_max_frame_num_minus4
        bits += &ue(2); // pic_order_cnt_type
        bits += &ue(1); // max_num_ref_frames
        bits += "0"; // gaps_in_frame_num_value_allowed
        bits += &ue(39); // pic_width_in_mbs_minus1 (640/16-1)
        bits += &ue(29); // pic_height_in_map_units_minus1 (480/16-1)
        bits += "1"; // frame_mbs_only_flag
        bits += "0"; // direct_8x8_inference_flag
        bits += "0"; // frame_cropping_flag
        bits += "0"; // vui_parameters_present_flag
        bits += "1"; // rbsp stop bit

        let mut sps = vec![0x67, 66, 0x00, 30]; // NAL 头 + profile + constraints + level
        sps.extend_from_slice(&pack_bits(&bits));
        sps
    }

    /// PPS: id=0, sps_id=0, CABAC, 去块滤波控制存在
    fn make_pps() -> Vec<u8> {
        let mut bits = String::new();
        bits += &ue(0); // pic_parameter_set_id
        bits += &ue(0); // seq_parameter_set_id
        bits += "1"; // entropy_coding_mode_flag (CABAC)
        bits += "0"; // bottom_field_pic_order_in_frame_present
        bits += &ue(0); // num_slice_groups_minus1
        bits += &ue(0); // num_ref_idx_l0_default_active_minus1
        bits += &ue(0); // num_ref_idx_l1_default_active_minus1
        bits += "0"; // weighted_pred_flag
        bits += "00"; // weighted_bipred_idc
        bits += "1"; // pic_init_qp_minus26 = se(0)
        bits += "1"; // pic_init_qs_minus26 = se(0)
        bits += "1"; // chroma_qp_index_offset = se(0)
        bits += "1"; // deblocking_filter_control_present_flag
        bits += "0"; // constrained_intra_pred_flag
        bits += "0"; // redundant_pic_cnt_present_flag
        bits += "1"; // rbsp stop bit

        let mut pps = vec![0x68];
        pps.extend_from_slice(&pack_bits(&bits));
        pps
    }

    #[test]
    fn test_avcc_roundtrip() {
        let config = AvcDecoderConfigurationRecord {
            version: 1,
            profile_indication: 0x42,
            profile_compatibility: 0xC0,
            level_indication: 0x1E,
            nalu_length_size: 4,
            sps_list: vec![make_sps()],
            pps_list: vec![make_pps()],
        };
        let bytes = config.serialize();
        let parsed = AvcDecoderConfigurationRecord::parse(&bytes).unwrap();
        assert_eq!(parsed.profile_indication, 0x42);
        assert_eq!(parsed.nalu_length_size, 4);
        assert_eq!(parsed.sps_list, config.sps_list);
        assert_eq!(parsed.pps_list, config.pps_list);
        assert_eq!(parsed.codec_string(), "avc1.42c01e");
    }

    #[test]
    fn test_parse_sps_dimensions() {
        let sps = parse_sps(&make_sps()).unwrap();
        assert_eq!(sps.width, 640);
        assert_eq!(sps.height, 480);
        assert!(sps.frame_mbs_only_flag);
        assert_eq!(sps.log2_max_frame_num, 4);
        assert_eq!(sps.pic_order_cnt_type, 2);
    }

    #[test]
    fn test_parse_pps() {
        let pps = parse_pps(&make_pps()).unwrap();
        assert_eq!(pps.id, 0);
        assert_eq!(pps.sps_id, 0);
        assert!(pps.entropy_coding_mode_flag);
        assert!(pps.deblocking_filter_control_present_flag);
        assert!(!pps.weighted_pred_flag);
    }

    #[test]
    fn test_idr_slice_header_size_exact() {
        let config = AvcDecoderConfigurationRecord {
            version: 1,
            nalu_length_size: 4,
            sps_list: vec![make_sps()],
            pps_list: vec![make_pps()],
            ..Default::default()
        };
        let parser = H264SliceHeaderParser::new(&config).unwrap();

        // IDR I 片头 (nal_ref_idc=3): first_mb=ue(0) 1 位, slice_type=ue(2)
        // 3 位, pps_id=ue(0) 1 位, frame_num 4 位, idr_pic_id=ue(0) 1 位,
        // dec_ref_pic_marking 2 位, slice_qp_delta=se(0) 1 位,
        // disable_deblocking=ue(1) 3 位 → 共 16 位 → RBSP 2 字节 → 总 3 字节
        let mut bits = String::new();
        bits += &ue(0); // first_mb_in_slice
        bits += &ue(2); // slice_type = I
        bits += &ue(0); // pic_parameter_set_id
        bits += "0000"; // frame_num (4 位)
        bits += &ue(0); // idr_pic_id
        bits += "00"; // no_output_of_prior_pics + long_term_reference
        bits += "1"; // slice_qp_delta = se(0)
        bits += &ue(1); // disable_deblocking_filter_idc = 1 (无偏移)

        let mut slice = vec![0x65]; // IDR, nal_ref_idc=3
        slice.extend_from_slice(&pack_bits(&bits));
        slice.extend_from_slice(&[0xAB; 16]); // 片体

        let size = parser.header_size(&slice).unwrap();
        assert_eq!(size, 3);
    }
}
