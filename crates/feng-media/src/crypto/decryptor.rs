//! CENC 解密器.
//!
//! 加密器的逆过程: 按采样携带的保护描述 (IV、key_id、子采样布局)
//! 从密钥源取键解密, 输出明文采样.

use std::collections::HashMap;
use std::sync::Arc;

use feng_core::{FengError, FengResult};
use feng_crypto::{
    AesCbcDecryptor, AesCtrCipher, CbcPadding, EncryptionKey, KeySelector, KeySource,
    ProtectionScheme, AES_BLOCK_SIZE,
};

use super::encryptor::iter_or_whole;
use crate::sample::MediaSample;

/// 单轨解密器
pub struct Decryptor {
    key_source: Arc<dyn KeySource>,
    /// key_id → 密钥缓存
    keys: HashMap<[u8; 16], EncryptionKey>,
}

impl Decryptor {
    /// 创建解密器
    pub fn new(key_source: Arc<dyn KeySource>) -> Self {
        Self {
            key_source,
            keys: HashMap::new(),
        }
    }

    /// 就地解密一个采样; 无保护描述的采样直通
    pub fn process_sample(&mut self, sample: &mut MediaSample) -> FengResult<()> {
        let Some(config) = sample.encryption_config.take() else {
            return Ok(());
        };

        let key = match self.keys.get(&config.key_id) {
            Some(key) => key,
            None => {
                let mut key = EncryptionKey::default();
                self.key_source
                    .get_key(KeySelector::KeyId(&config.key_id), &mut key)?;
                self.keys.insert(config.key_id, key);
                &self.keys[&config.key_id]
            }
        };

        let mut data = sample.data.to_vec();
        match config.scheme {
            ProtectionScheme::Cenc | ProtectionScheme::Cens => {
                let mut cipher = AesCtrCipher::new(&key.key, &config.iv)?;
                let mut pos = 0usize;
                for entry in iter_or_whole(&config.subsamples, data.len()) {
                    pos += entry.clear_bytes as usize;
                    let end = pos + entry.cipher_bytes as usize;
                    if end > data.len() {
                        return Err(FengError::EncryptionFailure(
                            "子采样布局超出采样长度".into(),
                        ));
                    }
                    cipher.encrypt_in_place(&mut data[pos..end]);
                    pos = end;
                }
            }
            ProtectionScheme::Cbc1 | ProtectionScheme::Cbcs => {
                let mut iv16 = [0u8; 16];
                iv16[..config.iv.len().min(16)]
                    .copy_from_slice(&config.iv[..config.iv.len().min(16)]);
                let mut pos = 0usize;
                for entry in iter_or_whole(&config.subsamples, data.len()) {
                    pos += entry.clear_bytes as usize;
                    let end = pos + entry.cipher_bytes as usize;
                    if end > data.len() {
                        return Err(FengError::EncryptionFailure(
                            "子采样布局超出采样长度".into(),
                        ));
                    }
                    let whole = (end - pos) & !(AES_BLOCK_SIZE - 1);
                    if whole > 0 {
                        let next_iv_src = data[pos + whole - AES_BLOCK_SIZE..pos + whole].to_vec();
                        let decryptor = AesCbcDecryptor::new(&key.key, &iv16, CbcPadding::None)?;
                        let decrypted = decryptor.decrypt(&data[pos..pos + whole])?;
                        data[pos..pos + whole].copy_from_slice(&decrypted);
                        match config.scheme {
                            ProtectionScheme::Cbc1 => iv16.copy_from_slice(&next_iv_src),
                            _ => iv16[..config.iv.len().min(16)]
                                .copy_from_slice(&config.iv[..config.iv.len().min(16)]),
                        }
                    }
                    pos = end;
                }
            }
        }

        sample.data = data.into();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encryptor::encrypt_in_place;
    use crate::sample::{EncryptionConfig, SubsampleEntry};
    use feng_crypto::FixedKeySource;

    const KEY_ID: &str = "000102030405060708090a0b0c0d0e0f";
    const KEY: &str = "101112131415161718191a1b1c1d1e1f";

    fn key_source() -> Arc<dyn KeySource> {
        Arc::new(FixedKeySource::from_hex(KEY_ID, KEY, "", "").unwrap())
    }

    #[test]
    fn test_cenc_roundtrip_with_subsamples() {
        let original: Vec<u8> = (0u8..=255).cycle().take(300).collect();
        let iv = vec![0x11u8; 8];
        let subsamples = vec![
            SubsampleEntry::new(20, 160),
            SubsampleEntry::new(8, 96),
            SubsampleEntry::new(16, 0),
        ];
        let key = {
            let mut k = EncryptionKey::default();
            key_source()
                .get_key(KeySelector::TrackType(feng_crypto::TrackType::Sd), &mut k)
                .unwrap();
            k
        };

        let mut data = original.clone();
        let mut cipher = AesCtrCipher::new(&key.key, &iv).unwrap();
        encrypt_in_place(
            ProtectionScheme::Cenc,
            &mut cipher,
            &key,
            &iv,
            &subsamples,
            &mut data,
        )
        .unwrap();
        assert_ne!(data, original);
        // 明文区未被改动
        assert_eq!(&data[..20], &original[..20]);

        let mut sample = MediaSample::new(0, 0, true, data);
        sample.encryption_config = Some(EncryptionConfig {
            scheme: ProtectionScheme::Cenc,
            iv,
            key_id: key.key_id,
            subsamples,
        });

        let mut decryptor = Decryptor::new(key_source());
        decryptor.process_sample(&mut sample).unwrap();
        assert_eq!(sample.data.as_ref(), &original[..]);
        assert!(sample.encryption_config.is_none());
    }

    #[test]
    fn test_cbcs_roundtrip() {
        let original = vec![0x5Au8; 160];
        let iv = vec![0x22u8; 16];
        let subsamples = vec![SubsampleEntry::new(0, 160)];
        let key = {
            let mut k = EncryptionKey::default();
            key_source()
                .get_key(KeySelector::TrackType(feng_crypto::TrackType::Audio), &mut k)
                .unwrap();
            k
        };

        let mut data = original.clone();
        let mut cipher = AesCtrCipher::new(&key.key, &iv).unwrap();
        encrypt_in_place(
            ProtectionScheme::Cbcs,
            &mut cipher,
            &key,
            &iv,
            &subsamples,
            &mut data,
        )
        .unwrap();

        let mut sample = MediaSample::new(0, 0, true, data);
        sample.encryption_config = Some(EncryptionConfig {
            scheme: ProtectionScheme::Cbcs,
            iv,
            key_id: key.key_id,
            subsamples,
        });
        let mut decryptor = Decryptor::new(key_source());
        decryptor.process_sample(&mut sample).unwrap();
        assert_eq!(sample.data.as_ref(), &original[..]);
    }
}
