//! AES 加密核心.
//!
//! 基于 RustCrypto 系列 crate 封装打包管线需要的两种模式:
//! - `AesCtrCipher`: AES-128 CTR, 支持 8/16 字节 IV 与按采样推进 IV,
//!   密钥流在子采样边界之间连续 (块计数器不复位)
//! - `AesCbcEncryptor` / `AesCbcDecryptor`: AES-128/192/256 CBC,
//!   PKCS#7 填充或无填充
//!
//! CTR 计数器块构成:
//! - 16 字节 IV: IV 本身即计数器块, 按 128 位大端整数进位递增
//! - 8 字节 IV: IV 占据高 8 字节, 低 8 字节为从 0 开始的块计数器

use aes::{Aes128, Aes192, Aes256};
use cipher::block_padding::{NoPadding, Pkcs7};
use cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use feng_core::{FengError, FengResult};

/// AES 块大小 (字节)
pub const AES_BLOCK_SIZE: usize = 16;

type Aes128CtrBe = ctr::Ctr128BE<Aes128>;

/// AES-128 CTR 流加密器
///
/// CTR 模式下加解密是同一运算, 解密方向直接复用 `encrypt`.
pub struct AesCtrCipher {
    key: [u8; 16],
    /// 当前采样的 IV (8 或 16 字节)
    iv: Vec<u8>,
    /// 密钥流状态
    cipher: Aes128CtrBe,
    /// 自 `set_iv` 以来已处理的字节数
    bytes_processed: u64,
}

impl AesCtrCipher {
    /// 以密钥和初始 IV 创建
    ///
    /// `key` 必须为 16 字节, `iv` 必须为 8 或 16 字节, 否则返回 `Unimplemented`.
    pub fn new(key: &[u8], iv: &[u8]) -> FengResult<Self> {
        if key.len() != 16 {
            return Err(FengError::Unimplemented(format!(
                "AES-CTR 仅支持 16 字节密钥, 实际 {} 字节",
                key.len()
            )));
        }
        if iv.len() != 8 && iv.len() != 16 {
            return Err(FengError::Unimplemented(format!(
                "AES-CTR 仅支持 8/16 字节 IV, 实际 {} 字节",
                iv.len()
            )));
        }
        let mut key_arr = [0u8; 16];
        key_arr.copy_from_slice(key);
        let cipher = Self::make_cipher(&key_arr, iv);
        Ok(Self {
            key: key_arr,
            iv: iv.to_vec(),
            cipher,
            bytes_processed: 0,
        })
    }

    fn make_cipher(key: &[u8; 16], iv: &[u8]) -> Aes128CtrBe {
        let mut counter_block = [0u8; AES_BLOCK_SIZE];
        counter_block[..iv.len()].copy_from_slice(iv);
        Aes128CtrBe::new(key.into(), &counter_block.into())
    }

    /// 加密 (或解密) 一段数据, 密钥流延续上一次调用的位置
    pub fn encrypt(&mut self, input: &[u8], output: &mut Vec<u8>) -> FengResult<()> {
        let start = output.len();
        output.extend_from_slice(input);
        self.cipher.apply_keystream(&mut output[start..]);
        self.bytes_processed += input.len() as u64;
        Ok(())
    }

    /// 就地加密 (或解密)
    pub fn encrypt_in_place(&mut self, data: &mut [u8]) {
        self.cipher.apply_keystream(data);
        self.bytes_processed += data.len() as u64;
    }

    /// 当前 AES 块内的字节偏移 (0..16)
    pub fn block_offset(&self) -> usize {
        (self.bytes_processed % AES_BLOCK_SIZE as u64) as usize
    }

    /// 当前 IV
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// 重设 IV 并把块计数器归零
    pub fn set_iv(&mut self, iv: &[u8]) -> FengResult<()> {
        if iv.len() != 8 && iv.len() != 16 {
            return Err(FengError::Unimplemented(format!(
                "AES-CTR 仅支持 8/16 字节 IV, 实际 {} 字节",
                iv.len()
            )));
        }
        self.iv = iv.to_vec();
        self.cipher = Self::make_cipher(&self.key, &self.iv);
        self.bytes_processed = 0;
        Ok(())
    }

    /// 为下一个采样推进 IV
    ///
    /// - 16 字节 IV: 把上一采样消耗的计数器块数加到 IV 上 (128 位大端回绕)
    /// - 8 字节 IV: IV 作为 64 位大端整数加 1 (回绕)
    pub fn update_iv(&mut self) {
        if self.iv.len() == 16 {
            let blocks = self.bytes_processed.div_ceil(AES_BLOCK_SIZE as u64);
            let mut iv_arr = [0u8; 16];
            iv_arr.copy_from_slice(&self.iv);
            let val = u128::from_be_bytes(iv_arr).wrapping_add(u128::from(blocks));
            self.iv.copy_from_slice(&val.to_be_bytes());
        } else {
            let mut iv_arr = [0u8; 8];
            iv_arr.copy_from_slice(&self.iv);
            let val = u64::from_be_bytes(iv_arr).wrapping_add(1);
            self.iv.copy_from_slice(&val.to_be_bytes());
        }
        self.cipher = Self::make_cipher(&self.key, &self.iv);
        self.bytes_processed = 0;
    }
}

// ============================================================
// CBC
// ============================================================

/// CBC 填充方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CbcPadding {
    /// PKCS#5/7 填充 (空明文产生一个整块填充)
    Pkcs7,
    /// 无填充 (输入长度必须为块大小的整数倍)
    None,
}

macro_rules! cbc_dispatch {
    ($key:expr, $iv:expr, $body:ident, $($args:expr),*) => {
        match $key.len() {
            16 => $body::<Aes128>($key, $iv, $($args),*),
            24 => $body::<Aes192>($key, $iv, $($args),*),
            32 => $body::<Aes256>($key, $iv, $($args),*),
            n => Err(FengError::Unimplemented(format!(
                "AES-CBC 仅支持 16/24/32 字节密钥, 实际 {n} 字节"
            ))),
        }
    };
}

fn cbc_encrypt_impl<C>(key: &[u8], iv: &[u8; 16], padding: CbcPadding, input: &[u8]) -> FengResult<Vec<u8>>
where
    C: BlockEncryptMut + cipher::BlockCipher + cipher::KeyInit,
{
    let enc = cbc::Encryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| FengError::EncryptionFailure(format!("CBC 初始化失败: {e}")))?;
    match padding {
        CbcPadding::Pkcs7 => Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(input)),
        CbcPadding::None => {
            if input.len() % AES_BLOCK_SIZE != 0 {
                return Err(FengError::EncryptionFailure(format!(
                    "无填充 CBC 要求整块输入, 实际 {} 字节",
                    input.len()
                )));
            }
            Ok(enc.encrypt_padded_vec_mut::<NoPadding>(input))
        }
    }
}

fn cbc_decrypt_impl<C>(key: &[u8], iv: &[u8; 16], padding: CbcPadding, input: &[u8]) -> FengResult<Vec<u8>>
where
    C: BlockDecryptMut + cipher::BlockCipher + cipher::KeyInit,
{
    let dec = cbc::Decryptor::<C>::new_from_slices(key, iv)
        .map_err(|e| FengError::EncryptionFailure(format!("CBC 初始化失败: {e}")))?;
    let result = match padding {
        CbcPadding::Pkcs7 => dec.decrypt_padded_vec_mut::<Pkcs7>(input),
        CbcPadding::None => dec.decrypt_padded_vec_mut::<NoPadding>(input),
    };
    result.map_err(|e| FengError::EncryptionFailure(format!("CBC 解密失败: {e}")))
}

/// AES-CBC 加密器 (128/192/256 位密钥)
pub struct AesCbcEncryptor {
    key: Vec<u8>,
    iv: [u8; 16],
    padding: CbcPadding,
}

impl AesCbcEncryptor {
    /// 以密钥、IV 和填充方式创建
    pub fn new(key: &[u8], iv: &[u8], padding: CbcPadding) -> FengResult<Self> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(FengError::Unimplemented(format!(
                "AES-CBC 仅支持 16/24/32 字节密钥, 实际 {} 字节",
                key.len()
            )));
        }
        if iv.len() != 16 {
            return Err(FengError::Unimplemented(format!(
                "AES-CBC 要求 16 字节 IV, 实际 {} 字节",
                iv.len()
            )));
        }
        let mut iv_arr = [0u8; 16];
        iv_arr.copy_from_slice(iv);
        Ok(Self {
            key: key.to_vec(),
            iv: iv_arr,
            padding,
        })
    }

    /// 加密一段明文
    pub fn encrypt(&self, input: &[u8]) -> FengResult<Vec<u8>> {
        let iv = &self.iv;
        let padding = self.padding;
        cbc_dispatch!(&self.key, iv, cbc_encrypt_impl, padding, input)
    }
}

/// AES-CBC 解密器 (128/192/256 位密钥)
pub struct AesCbcDecryptor {
    key: Vec<u8>,
    iv: [u8; 16],
    padding: CbcPadding,
}

impl AesCbcDecryptor {
    /// 以密钥、IV 和填充方式创建
    pub fn new(key: &[u8], iv: &[u8], padding: CbcPadding) -> FengResult<Self> {
        if !matches!(key.len(), 16 | 24 | 32) {
            return Err(FengError::Unimplemented(format!(
                "AES-CBC 仅支持 16/24/32 字节密钥, 实际 {} 字节",
                key.len()
            )));
        }
        if iv.len() != 16 {
            return Err(FengError::Unimplemented(format!(
                "AES-CBC 要求 16 字节 IV, 实际 {} 字节",
                iv.len()
            )));
        }
        let mut iv_arr = [0u8; 16];
        iv_arr.copy_from_slice(iv);
        Ok(Self {
            key: key.to_vec(),
            iv: iv_arr,
            padding,
        })
    }

    /// 解密一段密文
    pub fn decrypt(&self, input: &[u8]) -> FengResult<Vec<u8>> {
        let iv = &self.iv;
        let padding = self.padding;
        cbc_dispatch!(&self.key, iv, cbc_decrypt_impl, padding, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // NIST SP 800-38A F.5.1 CTR-AES128.Encrypt
    const NIST_KEY: [u8; 16] = [
        0x2b, 0x7e, 0x15, 0x16, 0x28, 0xae, 0xd2, 0xa6, 0xab, 0xf7, 0x15, 0x88, 0x09, 0xcf, 0x4f,
        0x3c,
    ];
    const NIST_IV: [u8; 16] = [
        0xf0, 0xf1, 0xf2, 0xf3, 0xf4, 0xf5, 0xf6, 0xf7, 0xf8, 0xf9, 0xfa, 0xfb, 0xfc, 0xfd, 0xfe,
        0xff,
    ];
    const NIST_PLAINTEXT: [u8; 64] = [
        0x6b, 0xc1, 0xbe, 0xe2, 0x2e, 0x40, 0x9f, 0x96, 0xe9, 0x3d, 0x7e, 0x11, 0x73, 0x93, 0x17,
        0x2a, 0xae, 0x2d, 0x8a, 0x57, 0x1e, 0x03, 0xac, 0x9c, 0x9e, 0xb7, 0x6f, 0xac, 0x45, 0xaf,
        0x8e, 0x51, 0x30, 0xc8, 0x1c, 0x46, 0xa3, 0x5c, 0xe4, 0x11, 0xe5, 0xfb, 0xc1, 0x19, 0x1a,
        0x0a, 0x52, 0xef, 0xf6, 0x9f, 0x24, 0x45, 0xdf, 0x4f, 0x9b, 0x17, 0xad, 0x2b, 0x41, 0x7b,
        0xe6, 0x6c, 0x37, 0x10,
    ];
    const NIST_CIPHERTEXT: [u8; 64] = [
        0x87, 0x4d, 0x61, 0x91, 0xb6, 0x20, 0xe3, 0x26, 0x1b, 0xef, 0x68, 0x64, 0x99, 0x0d, 0xb6,
        0xce, 0x98, 0x06, 0xf6, 0x6b, 0x79, 0x70, 0xfd, 0xff, 0x86, 0x17, 0x18, 0x7b, 0xb9, 0xff,
        0xfd, 0xff, 0x5a, 0xe4, 0xdf, 0x3e, 0xdb, 0xd5, 0xd3, 0x5e, 0x5b, 0x4f, 0x09, 0x02, 0x0d,
        0xb0, 0x3e, 0xab, 0x1e, 0x03, 0x1d, 0xda, 0x2f, 0xbe, 0x03, 0xd1, 0x79, 0x21, 0x70, 0xa0,
        0xf3, 0x00, 0x9c, 0xee,
    ];

    #[test]
    fn test_nist_ctr_vector() {
        let mut cipher = AesCtrCipher::new(&NIST_KEY, &NIST_IV).unwrap();
        let mut out = Vec::new();
        cipher.encrypt(&NIST_PLAINTEXT, &mut out).unwrap();
        assert_eq!(out, NIST_CIPHERTEXT);

        // CTR 解密即再次加密
        let mut cipher = AesCtrCipher::new(&NIST_KEY, &NIST_IV).unwrap();
        let mut plain = Vec::new();
        cipher.encrypt(&NIST_CIPHERTEXT, &mut plain).unwrap();
        assert_eq!(plain, NIST_PLAINTEXT);
    }

    #[test]
    fn test_subsample_split_matches_single_call() {
        // 按 {3,16,45} 切分多次调用, 输出与一次性加密一致,
        // 且每次调用后的块内偏移为 3, 3, 0
        let mut cipher = AesCtrCipher::new(&NIST_KEY, &NIST_IV).unwrap();
        let mut out = Vec::new();
        cipher.encrypt(&NIST_PLAINTEXT[..3], &mut out).unwrap();
        assert_eq!(cipher.block_offset(), 3);
        cipher.encrypt(&NIST_PLAINTEXT[3..19], &mut out).unwrap();
        assert_eq!(cipher.block_offset(), 3);
        cipher.encrypt(&NIST_PLAINTEXT[19..64], &mut out).unwrap();
        assert_eq!(cipher.block_offset(), 0);
        assert_eq!(out, NIST_CIPHERTEXT);
    }

    #[test]
    fn test_update_iv_128bit_carry() {
        // IV = 0xFFFF...FE, 加密 4 个整块后 update_iv → 0x0000...0002
        let mut iv = [0xFFu8; 16];
        iv[15] = 0xFE;
        let mut cipher = AesCtrCipher::new(&NIST_KEY, &iv).unwrap();
        let mut out = Vec::new();
        cipher.encrypt(&[0u8; 64], &mut out).unwrap();
        cipher.update_iv();

        let mut expected = [0u8; 16];
        expected[15] = 0x02;
        assert_eq!(cipher.iv(), &expected);
    }

    #[test]
    fn test_update_iv_64bit_wrap() {
        let iv = [0xFFu8; 8];
        let mut cipher = AesCtrCipher::new(&NIST_KEY, &iv).unwrap();
        let mut out = Vec::new();
        cipher.encrypt(&[0u8; 100], &mut out).unwrap();
        cipher.update_iv();
        assert_eq!(cipher.iv(), &[0u8; 8]);
    }

    #[test]
    fn test_8_byte_iv_counter_low_bytes() {
        // 8 字节 IV: 计数器占低 8 字节, 第一块与 16 字节 IV (iv||0) 等价
        let iv8 = [0xF0, 0xF1, 0xF2, 0xF3, 0xF4, 0xF5, 0xF6, 0xF7];
        let mut iv16 = [0u8; 16];
        iv16[..8].copy_from_slice(&iv8);

        let mut c8 = AesCtrCipher::new(&NIST_KEY, &iv8).unwrap();
        let mut c16 = AesCtrCipher::new(&NIST_KEY, &iv16).unwrap();
        let mut out8 = Vec::new();
        let mut out16 = Vec::new();
        c8.encrypt(&NIST_PLAINTEXT, &mut out8).unwrap();
        c16.encrypt(&NIST_PLAINTEXT, &mut out16).unwrap();
        assert_eq!(out8, out16);
    }

    #[test]
    fn test_invalid_sizes_rejected() {
        assert!(AesCtrCipher::new(&[0u8; 24], &NIST_IV).is_err());
        assert!(AesCtrCipher::new(&NIST_KEY, &[0u8; 12]).is_err());
    }

    #[test]
    fn test_cbc_roundtrip_all_key_sizes() {
        let iv = [0x11u8; 16];
        for key_len in [16usize, 24, 32] {
            let key = vec![0x42u8; key_len];
            let enc = AesCbcEncryptor::new(&key, &iv, CbcPadding::Pkcs7).unwrap();
            let dec = AesCbcDecryptor::new(&key, &iv, CbcPadding::Pkcs7).unwrap();
            let plain = b"feng cbc roundtrip payload";
            let ct = enc.encrypt(plain).unwrap();
            assert_eq!(dec.decrypt(&ct).unwrap(), plain);
        }
    }

    #[test]
    fn test_cbc_empty_plaintext_pads_one_block() {
        let key = [0x42u8; 16];
        let iv = [0x11u8; 16];
        let enc = AesCbcEncryptor::new(&key, &iv, CbcPadding::Pkcs7).unwrap();
        let ct = enc.encrypt(b"").unwrap();
        assert_eq!(ct.len(), AES_BLOCK_SIZE);
    }

    #[test]
    fn test_cbc_no_padding_requires_full_blocks() {
        let key = [0x42u8; 16];
        let iv = [0x11u8; 16];
        let enc = AesCbcEncryptor::new(&key, &iv, CbcPadding::None).unwrap();
        assert!(enc.encrypt(b"short").is_err());
        assert_eq!(enc.encrypt(&[0u8; 32]).unwrap().len(), 32);
    }
}
