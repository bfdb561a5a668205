//! CENC 加解密管线阶段.
//!
//! AES 核心与密钥源在 feng-crypto; 这里是媒体侧的状态机:
//! 子采样布局构建、透明期与密钥轮换、采样级加解密.

pub mod decryptor;
pub mod encryptor;
pub mod subsample;

pub use decryptor::Decryptor;
pub use encryptor::{EncryptOutcome, Encryptor, EncryptorConfig};
pub use subsample::SubsampleLayout;
