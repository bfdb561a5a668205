//! 固定密钥源.
//!
//! 从十六进制字符串 `(key_id, key, pssh_data, iv?)` 构造, 任何选择器
//! 都返回同一把密钥. 轮换取键也返回它, 方便用固定密钥验证轮换管线.

use crate::key::{synthesize_pssh_box, EncryptionKey, ProtectionSystemInfo, TrackType, COMMON_SYSTEM_ID};
use crate::key_source::{
    FetchRequest, KeySelector, KeySource, CAP_ASSET_ID, CAP_CONTENT_ID, CAP_CRYPTO_PERIOD,
    CAP_KEY_IDS, CAP_PSSH,
};
use feng_core::{FengError, FengResult};

/// 固定密钥源
pub struct FixedKeySource {
    key: EncryptionKey,
}

impl FixedKeySource {
    /// 从十六进制字符串构造
    ///
    /// `pssh_data_hex` 为空时不合成 pssh; `iv_hex` 为空时 IV 由加密器生成.
    pub fn from_hex(
        key_id_hex: &str,
        key_hex: &str,
        pssh_data_hex: &str,
        iv_hex: &str,
    ) -> FengResult<Self> {
        Self::from_hex_with_system_id(key_id_hex, key_hex, pssh_data_hex, iv_hex, COMMON_SYSTEM_ID)
    }

    /// 从十六进制字符串构造, 指定 pssh 的系统 ID
    pub fn from_hex_with_system_id(
        key_id_hex: &str,
        key_hex: &str,
        pssh_data_hex: &str,
        iv_hex: &str,
        system_id: [u8; 16],
    ) -> FengResult<Self> {
        let key_id_vec = decode_hex("key_id", key_id_hex)?;
        let key_id: [u8; 16] = key_id_vec
            .try_into()
            .map_err(|_| FengError::InvalidArgument("key_id 必须为 16 字节".into()))?;

        let key = decode_hex("key", key_hex)?;
        if key.len() != 16 {
            return Err(FengError::InvalidArgument("key 必须为 16 字节".into()));
        }

        let iv = if iv_hex.is_empty() {
            None
        } else {
            let iv = decode_hex("iv", iv_hex)?;
            if iv.len() != 8 && iv.len() != 16 {
                return Err(FengError::InvalidArgument("iv 必须为 8 或 16 字节".into()));
            }
            Some(iv)
        };

        let protection_systems = if pssh_data_hex.is_empty() {
            Vec::new()
        } else {
            let pssh_data = decode_hex("pssh_data", pssh_data_hex)?;
            vec![ProtectionSystemInfo {
                system_id,
                pssh: synthesize_pssh_box(&system_id, &pssh_data),
            }]
        };

        Ok(Self {
            key: EncryptionKey {
                key_id,
                key,
                iv,
                protection_systems,
            },
        })
    }
}

fn decode_hex(field: &str, hex_str: &str) -> FengResult<Vec<u8>> {
    hex::decode(hex_str)
        .map_err(|e| FengError::InvalidArgument(format!("{field} 不是合法的十六进制: {e}")))
}

impl KeySource for FixedKeySource {
    fn fetch_keys(&self, _request: FetchRequest<'_>) -> FengResult<()> {
        // 密钥在构造时已就绪
        Ok(())
    }

    fn get_key(&self, selector: KeySelector<'_>, key: &mut EncryptionKey) -> FengResult<()> {
        if let KeySelector::KeyId(key_id) = selector {
            if *key_id != self.key.key_id {
                return Err(FengError::NotFound(format!(
                    "key_id {} 不在固定密钥集中",
                    hex::encode(key_id)
                )));
            }
        }
        *key = self.key.clone();
        Ok(())
    }

    fn get_crypto_period_key(
        &self,
        _period_index: u32,
        track_type: TrackType,
        key: &mut EncryptionKey,
    ) -> FengResult<()> {
        self.get_key(KeySelector::TrackType(track_type), key)
    }

    fn uuid(&self) -> String {
        "1077efec-c0b2-4d02-ace3-3c1e52e2fb4b".to_string()
    }

    fn system_name(&self) -> String {
        "FixedKey".to_string()
    }

    fn capabilities(&self) -> u32 {
        CAP_CONTENT_ID | CAP_PSSH | CAP_KEY_IDS | CAP_ASSET_ID | CAP_CRYPTO_PERIOD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_ID: &str = "000102030405060708090a0b0c0d0e0f";
    const KEY: &str = "101112131415161718191a1b1c1d1e1f";

    #[test]
    fn test_same_key_for_every_selector() {
        let source = FixedKeySource::from_hex(KEY_ID, KEY, "deadbeef", "").unwrap();

        let mut k1 = EncryptionKey::default();
        source
            .get_key(KeySelector::TrackType(TrackType::Hd), &mut k1)
            .unwrap();
        let mut k2 = EncryptionKey::default();
        source
            .get_crypto_period_key(7, TrackType::Audio, &mut k2)
            .unwrap();

        assert_eq!(k1.key, k2.key);
        assert_eq!(k1.key_id, k2.key_id);
        assert_eq!(k1.protection_systems.len(), 1);
    }

    #[test]
    fn test_get_key_by_id_mismatch() {
        let source = FixedKeySource::from_hex(KEY_ID, KEY, "", "").unwrap();
        let other = [0xEEu8; 16];
        let mut key = EncryptionKey::default();
        assert!(source.get_key(KeySelector::KeyId(&other), &mut key).is_err());
    }

    #[test]
    fn test_invalid_hex_rejected() {
        assert!(FixedKeySource::from_hex("zz", KEY, "", "").is_err());
        assert!(FixedKeySource::from_hex("0011", KEY, "", "").is_err());
    }
}
