//! CENC 加密器.
//!
//! 每轨一个状态机: 透明期 (clear lead) 直通, 之后按子采样布局加密;
//! 配置了密钥轮换时按 `dts / 周期长度` 推进周期, 新密钥在下一个关键帧
//! 生效, 并先行下发一条配置变更让分段器在切换处关闭当前分段.

use std::sync::Arc;

use log::{debug, info};

use feng_core::{FengError, FengResult};
use feng_crypto::{
    AesCbcEncryptor, AesCtrCipher, CbcPadding, EncryptionKey, KeySelector, KeySource,
    ProtectionScheme, TrackType, AES_BLOCK_SIZE,
};

use super::subsample::SubsampleLayout;
use crate::sample::{EncryptionConfig, MediaSample, SubsampleEntry};

/// 加密器配置
pub struct EncryptorConfig {
    /// 保护方案
    pub scheme: ProtectionScheme,
    /// 透明期 (tick)
    pub clear_lead_ticks: i64,
    /// 轮换周期 (tick), None 表示不轮换
    pub crypto_period_ticks: Option<i64>,
    /// 每采样 IV 大小 (8 或 16)
    pub iv_size: usize,
    /// 轨道保护级别
    pub track_type: TrackType,
    /// 是否为视频轨 (关键帧边界约束只对视频有意义)
    pub is_video: bool,
}

/// 单轨 CENC 加密器
pub struct Encryptor {
    config: EncryptorConfig,
    layout: SubsampleLayout,
    key_source: Arc<dyn KeySource>,
    key: Option<EncryptionKey>,
    cipher: Option<AesCtrCipher>,
    /// 当前轮换周期
    crypto_period_index: Option<u32>,
    /// 已拉取、等待关键帧生效的新密钥
    pending: Option<(u32, EncryptionKey)>,
}

/// 处理一个采样的结果
pub struct EncryptOutcome {
    /// 需要先于采样下发的配置变更 (密钥轮换)
    pub config_change: Option<EncryptionConfig>,
}

impl Encryptor {
    /// 创建加密器
    pub fn new(
        config: EncryptorConfig,
        layout: SubsampleLayout,
        key_source: Arc<dyn KeySource>,
    ) -> Self {
        Self {
            config,
            layout,
            key_source,
            key: None,
            cipher: None,
            crypto_period_index: None,
            pending: None,
        }
    }

    /// 处理一个采样; 透明期内不做修改
    pub fn process_sample(&mut self, sample: &mut MediaSample) -> FengResult<EncryptOutcome> {
        let mut outcome = EncryptOutcome {
            config_change: None,
        };
        if sample.is_eos {
            return Ok(outcome);
        }

        // 1. 透明期直通
        if sample.dts < self.config.clear_lead_ticks {
            return Ok(outcome);
        }

        // 2. 轮换: 计算目标周期, 提前取好密钥, 关键帧处生效
        if let Some(period_ticks) = self.config.crypto_period_ticks {
            let new_period = (sample.dts / period_ticks) as u32;
            let current = self.crypto_period_index;
            if current != Some(new_period) && self.pending.as_ref().map(|p| p.0) != Some(new_period)
            {
                let mut key = EncryptionKey::default();
                self.key_source.get_crypto_period_key(
                    new_period,
                    self.config.track_type,
                    &mut key,
                )?;
                self.pending = Some((new_period, key));
            }
        } else if self.key.is_none() && self.pending.is_none() {
            // 非轮换: 首个加密采样前取固定密钥
            let mut key = EncryptionKey::default();
            self.key_source
                .get_key(KeySelector::TrackType(self.config.track_type), &mut key)?;
            self.pending = Some((0, key));
        }

        // 密钥切换只发生在关键帧边界 (音频随采样即切)
        let at_boundary = sample.is_key_frame || !self.config.is_video;
        if at_boundary {
            if let Some((period, key)) = self.pending.take() {
                let had_key = self.key.is_some();
                self.apply_key(period, key)?;
                let config = self.current_config(&[])?;
                if had_key {
                    info!("密钥轮换: 周期 {period} 自关键帧 dts={} 生效", sample.dts);
                }
                outcome.config_change = Some(config);
            }
        }
        let Some(cipher) = self.cipher.as_mut() else {
            // 新周期密钥已拉取但尚未到关键帧: 继续用旧密钥;
            // 完全没有密钥时说明透明期尚未结束到首个关键帧, 直通
            return Ok(outcome);
        };

        // 3-5. 布局 + 加密
        let iv = cipher.iv().to_vec();
        let subsamples = self.layout.build(&sample.data)?;
        let mut data = sample.data.to_vec();
        encrypt_in_place(
            self.config.scheme,
            cipher,
            self.key.as_ref().expect("cipher 存在则必有密钥"),
            &iv,
            &subsamples,
            &mut data,
        )?;

        // 6. 推进 IV
        cipher.update_iv();

        let key = self.key.as_ref().expect("已有密钥");
        sample.data = data.into();
        sample.encryption_config = Some(EncryptionConfig {
            scheme: self.config.scheme,
            iv,
            key_id: key.key_id,
            subsamples,
        });
        Ok(outcome)
    }

    fn apply_key(&mut self, period: u32, key: EncryptionKey) -> FengResult<()> {
        // 首个密钥优先使用密钥源给出的显式 IV, 之后随机生成
        let iv = match (&key.iv, self.key.is_some()) {
            (Some(iv), false) => iv.clone(),
            _ => {
                let mut iv = vec![0u8; self.config.iv_size];
                rand::Rng::fill(&mut rand::thread_rng(), iv.as_mut_slice());
                iv
            }
        };
        let kid: String = key.key_id.iter().map(|b| format!("{b:02x}")).collect();
        debug!("轨道密钥就绪: 周期 {period}, key_id {kid}");
        self.cipher = Some(AesCtrCipher::new(&key.key, &iv)?);
        self.key = Some(key);
        self.crypto_period_index = Some(period);
        Ok(())
    }

    /// 当前密钥的保护描述
    fn current_config(&self, subsamples: &[SubsampleEntry]) -> FengResult<EncryptionConfig> {
        let key = self
            .key
            .as_ref()
            .ok_or_else(|| FengError::EncryptionFailure("密钥尚未就绪".into()))?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| FengError::EncryptionFailure("加密核心尚未就绪".into()))?;
        Ok(EncryptionConfig {
            scheme: self.config.scheme,
            iv: cipher.iv().to_vec(),
            key_id: key.key_id,
            subsamples: subsamples.to_vec(),
        })
    }
}

/// 按方案加密子采样布局的密文区
///
/// CTR 的块计数器跨子采样延续; CBC 族按整块处理, cbcs 每个子采样
/// 重置为采样 IV.
pub(crate) fn encrypt_in_place(
    scheme: ProtectionScheme,
    ctr: &mut AesCtrCipher,
    key: &EncryptionKey,
    iv: &[u8],
    subsamples: &[SubsampleEntry],
    data: &mut [u8],
) -> FengResult<()> {
    match scheme {
        ProtectionScheme::Cenc | ProtectionScheme::Cens => {
            let mut pos = 0usize;
            for entry in iter_or_whole(subsamples, data.len()) {
                pos += entry.clear_bytes as usize;
                let end = pos + entry.cipher_bytes as usize;
                ctr.encrypt_in_place(&mut data[pos..end]);
                pos = end;
            }
        }
        ProtectionScheme::Cbc1 | ProtectionScheme::Cbcs => {
            let mut iv16 = [0u8; 16];
            iv16[..iv.len().min(16)].copy_from_slice(&iv[..iv.len().min(16)]);
            let mut pos = 0usize;
            for entry in iter_or_whole(subsamples, data.len()) {
                pos += entry.clear_bytes as usize;
                let end = pos + entry.cipher_bytes as usize;
                let whole = (end - pos) & !(AES_BLOCK_SIZE - 1);
                if whole > 0 {
                    let encryptor = AesCbcEncryptor::new(&key.key, &iv16, CbcPadding::None)?;
                    let encrypted = encryptor.encrypt(&data[pos..pos + whole])?;
                    if scheme == ProtectionScheme::Cbc1 {
                        // cbc1: 链式 IV 贯穿整个采样
                        iv16.copy_from_slice(&encrypted[whole - AES_BLOCK_SIZE..]);
                    }
                    data[pos..pos + whole].copy_from_slice(&encrypted);
                    if scheme == ProtectionScheme::Cbcs {
                        // cbcs: 下一个子采样重置为采样 IV
                        iv16[..iv.len().min(16)].copy_from_slice(&iv[..iv.len().min(16)]);
                    }
                }
                pos = end;
            }
        }
    }
    Ok(())
}

/// 空布局表示整采样加密
pub(crate) fn iter_or_whole(
    subsamples: &[SubsampleEntry],
    total: usize,
) -> Vec<SubsampleEntry> {
    if subsamples.is_empty() {
        vec![SubsampleEntry::new(0, total as u32)]
    } else {
        subsamples.to_vec()
    }
}
