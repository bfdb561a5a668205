//! 密钥源抽象.
//!
//! 四种取键入口折叠为一个 `FetchRequest` 和一个 `KeySelector` 和类型,
//! 配合 `capabilities()` 位掩码让调用方对不支持的选择器快速失败.

use crate::key::{EncryptionKey, TrackType};
use feng_core::FengResult;

/// 能力位: 支持 (content_id, policy) 取键
pub const CAP_CONTENT_ID: u32 = 1 << 0;
/// 能力位: 支持 pssh box 取键
pub const CAP_PSSH: u32 = 1 << 1;
/// 能力位: 支持按 key_id 列表取键
pub const CAP_KEY_IDS: u32 = 1 << 2;
/// 能力位: 支持按 asset_id 取键 (WVM 输入)
pub const CAP_ASSET_ID: u32 = 1 << 3;
/// 能力位: 支持按加密周期轮换取键
pub const CAP_CRYPTO_PERIOD: u32 = 1 << 4;

/// 取键请求
#[derive(Debug, Clone)]
pub enum FetchRequest<'a> {
    /// 按内容 ID 与策略
    ContentId {
        /// 内容标识字节
        content_id: &'a [u8],
        /// 策略名
        policy: &'a str,
    },
    /// 按自含 pssh box
    Pssh(&'a [u8]),
    /// 按密钥 ID 列表
    KeyIds(&'a [[u8; 16]]),
    /// 按资产 ID (WVM 容器)
    AssetId(u32),
}

/// 密钥选择器
#[derive(Debug, Clone, Copy)]
pub enum KeySelector<'a> {
    /// 按轨道保护级别
    TrackType(TrackType),
    /// 按密钥 ID (解密路径)
    KeyId(&'a [u8; 16]),
}

/// 密钥源 trait
///
/// 实现方负责按需获取并缓存密钥. `get_crypto_period_key` 在生产者尚未
/// 填充该周期时阻塞, 直到密钥就绪、源失败或被取消.
pub trait KeySource: Send + Sync {
    /// 预取一组密钥
    fn fetch_keys(&self, request: FetchRequest<'_>) -> FengResult<()>;

    /// 取得当前密钥
    fn get_key(&self, selector: KeySelector<'_>, key: &mut EncryptionKey) -> FengResult<()>;

    /// 取得指定加密周期的密钥 (阻塞直到就绪)
    fn get_crypto_period_key(
        &self,
        period_index: u32,
        track_type: TrackType,
        key: &mut EncryptionKey,
    ) -> FengResult<()>;

    /// DRM 系统 UUID
    fn uuid(&self) -> String;

    /// DRM 系统名称
    fn system_name(&self) -> String;

    /// 支持的操作位掩码 (CAP_* 组合)
    fn capabilities(&self) -> u32;
}
