//! # feng-crypto
//!
//! Feng 流媒体打包框架加密库.
//!
//! 提供 CENC 打包所需的加密基础设施:
//! - AES-CTR / AES-CBC 核心 (RustCrypto)
//! - 密钥与保护方案模型 (密钥 ID、pssh、轨道保护级别)
//! - 密钥源抽象与两种实现: 固定密钥、远端轮换密钥提供方

pub mod aes;
pub mod fixed_key;
pub mod key;
pub mod key_source;
pub mod remote_key;

// 重导出常用类型
pub use aes::{AesCbcDecryptor, AesCbcEncryptor, AesCtrCipher, CbcPadding, AES_BLOCK_SIZE};
pub use fixed_key::FixedKeySource;
pub use key::{
    EncryptionKey, ProtectionLevelThresholds, ProtectionScheme, ProtectionSystemInfo, TrackType,
};
pub use key_source::{FetchRequest, KeySelector, KeySource};
pub use remote_key::{KeyFetcher, RemoteKeyConfig, RemoteKeySource, RequestSigner, RsaRequestSigner};
