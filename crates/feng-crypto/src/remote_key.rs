//! 远端轮换密钥源.
//!
//! 后台生产者线程向密钥服务器发出签名请求, 按加密周期批量拉取密钥并
//! 填入有界缓存; 消费者在 `get_crypto_period_key` 上阻塞直到对应周期
//! 就绪. 瞬态错误 (5xx / 超时) 指数退避重试, 永久错误闩锁后所有
//! `get_*` 调用永远返回该错误.
//!
//! 线路协议 (JSON):
//! ```text
//! 请求体:   { content_id: b64, policy, tracks: [{type}], drm_types,
//!             first_crypto_period_index, crypto_period_count, request_id }
//! 签名封套: { request: b64(请求体), signer: 名称, signature: b64(RSA-SHA1(请求体)) }
//! 响应:     { response: b64(内层 JSON) }
//! 内层:     { status: "OK"|..., tracks: [{type, key_id: b64, key: b64,
//!             pssh: [{drm_type, data: b64}], iv: b64?}] }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::{debug, warn};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use crate::key::{EncryptionKey, ProtectionSystemInfo, TrackType};
use crate::key_source::{
    FetchRequest, KeySelector, KeySource, CAP_CONTENT_ID, CAP_CRYPTO_PERIOD, CAP_PSSH,
};
use feng_core::{FengError, FengResult};

/// 请求签名器 trait
pub trait RequestSigner: Send + Sync {
    /// 签名者名称 (进入签名封套)
    fn name(&self) -> &str;
    /// 对请求体签名
    fn sign(&self, message: &[u8]) -> FengResult<Vec<u8>>;
}

/// RSA 签名器 (PKCS#1 v1.5 over SHA-1)
pub struct RsaRequestSigner {
    name: String,
    key: RsaPrivateKey,
}

impl RsaRequestSigner {
    /// 从 PKCS#1 PEM 私钥创建
    pub fn from_pkcs1_pem(name: impl Into<String>, pem: &str) -> FengResult<Self> {
        let key = RsaPrivateKey::from_pkcs1_pem(pem)
            .map_err(|e| FengError::InvalidArgument(format!("RSA 私钥解析失败: {e}")))?;
        Ok(Self {
            name: name.into(),
            key,
        })
    }
}

impl RequestSigner for RsaRequestSigner {
    fn name(&self) -> &str {
        &self.name
    }

    fn sign(&self, message: &[u8]) -> FengResult<Vec<u8>> {
        let digest = Sha1::digest(message);
        self.key
            .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
            .map_err(|e| FengError::EncryptionFailure(format!("RSA 签名失败: {e}")))
    }
}

/// HTTP 传输 trait (传输实现由外部注入)
pub trait KeyFetcher: Send + Sync {
    /// POST 请求体并返回响应体
    fn post(&self, url: &str, body: &[u8], timeout: Duration) -> FengResult<Vec<u8>>;
}

// ============================================================
// 线路类型
// ============================================================

#[derive(Serialize)]
struct RequestTrack {
    #[serde(rename = "type")]
    track_type: &'static str,
}

#[derive(Serialize)]
struct KeyRequest<'a> {
    content_id: String,
    policy: &'a str,
    tracks: Vec<RequestTrack>,
    drm_types: Vec<&'static str>,
    first_crypto_period_index: u32,
    crypto_period_count: u32,
    request_id: String,
}

#[derive(Serialize)]
struct SignedEnvelope<'a> {
    request: String,
    signer: &'a str,
    signature: String,
}

#[derive(Deserialize)]
struct ResponseWrapper {
    response: String,
}

#[derive(Deserialize)]
struct KeyResponse {
    status: String,
    #[serde(default)]
    tracks: Vec<ResponseTrack>,
}

#[derive(Deserialize)]
struct ResponseTrack {
    #[serde(rename = "type")]
    track_type: String,
    key_id: String,
    key: String,
    #[serde(default)]
    pssh: Vec<ResponsePssh>,
    #[serde(default)]
    iv: Option<String>,
    #[serde(default)]
    crypto_period_index: Option<u32>,
}

#[derive(Deserialize)]
struct ResponsePssh {
    drm_type: String,
    data: String,
}

// ============================================================
// 配置与缓存
// ============================================================

/// 远端密钥源配置
#[derive(Clone)]
pub struct RemoteKeyConfig {
    /// 密钥服务器 URL
    pub server_url: String,
    /// 内容 ID
    pub content_id: Vec<u8>,
    /// 策略名
    pub policy: String,
    /// 每次批量拉取的周期数
    pub crypto_period_count: u32,
    /// 瞬态错误最大重试次数
    pub max_retries: u32,
    /// 单次请求超时
    pub request_timeout: Duration,
}

impl Default for RemoteKeyConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            content_id: Vec::new(),
            policy: String::new(),
            crypto_period_count: 10,
            max_retries: 5,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// 缓存保留的周期上限, 超出后淘汰最旧周期
const MAX_CACHED_PERIODS: u32 = 100;

#[derive(Default)]
struct KeyCache {
    /// (周期, 轨道类型) → 密钥; 非轮换模式使用周期 0
    keys: HashMap<(u32, TrackType), EncryptionKey>,
    /// 消费者请求过的最大周期 (生产者拉取到此为止)
    requested_period: Option<u32>,
    /// 生产者下一个要拉取的周期
    next_fetch_period: u32,
    /// 闩锁错误
    latched: Option<FengError>,
}

/// 请求构造与执行 (同步路径与生产者线程共用)
struct KeyClient {
    config: RemoteKeyConfig,
    signer: Arc<dyn RequestSigner>,
    fetcher: Arc<dyn KeyFetcher>,
}

impl KeyClient {
    fn build_signed_request(&self, first_period: u32, count: u32) -> FengResult<Vec<u8>> {
        let request_id: [u8; 16] = rand::random();
        let body = KeyRequest {
            content_id: BASE64.encode(&self.config.content_id),
            policy: &self.config.policy,
            tracks: [
                TrackType::Sd,
                TrackType::Hd,
                TrackType::Uhd1,
                TrackType::Uhd2,
                TrackType::Audio,
            ]
            .iter()
            .map(|t| RequestTrack {
                track_type: t.as_str(),
            })
            .collect(),
            drm_types: vec!["WIDEVINE"],
            first_crypto_period_index: first_period,
            crypto_period_count: count,
            request_id: hex::encode(request_id),
        };
        let body_json = serde_json::to_vec(&body)
            .map_err(|e| FengError::Unknown(format!("请求序列化失败: {e}")))?;

        let envelope = SignedEnvelope {
            request: BASE64.encode(&body_json),
            signer: self.signer.name(),
            signature: BASE64.encode(self.signer.sign(&body_json)?),
        };
        serde_json::to_vec(&envelope)
            .map_err(|e| FengError::Unknown(format!("封套序列化失败: {e}")))
    }

    /// 发出一次签名请求并解析响应, 瞬态错误指数退避重试
    fn fetch_batch(&self, first_period: u32, count: u32) -> FengResult<Vec<(u32, TrackType, EncryptionKey)>> {
        let body = self.build_signed_request(first_period, count)?;
        let mut attempt = 0u32;
        loop {
            match self
                .fetcher
                .post(&self.config.server_url, &body, self.config.request_timeout)
            {
                Ok(response) => return parse_key_response(&response, first_period),
                Err(e) if e.is_transient() && attempt < self.config.max_retries => {
                    let backoff = Duration::from_millis(200u64.saturating_mul(1 << attempt.min(6)));
                    warn!(
                        "密钥服务器瞬态错误 (第 {} 次重试, 退避 {:?}): {e}",
                        attempt + 1,
                        backoff
                    );
                    thread::sleep(backoff);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// 解析密钥服务器响应
fn parse_key_response(
    response: &[u8],
    first_period: u32,
) -> FengResult<Vec<(u32, TrackType, EncryptionKey)>> {
    let wrapper: ResponseWrapper = serde_json::from_slice(response)
        .map_err(|e| FengError::ServerError(format!("响应外层解析失败: {e}")))?;
    let inner = BASE64
        .decode(&wrapper.response)
        .map_err(|e| FengError::ServerError(format!("响应 base64 解码失败: {e}")))?;
    let parsed: KeyResponse = serde_json::from_slice(&inner)
        .map_err(|e| FengError::ServerError(format!("响应内层解析失败: {e}")))?;

    if parsed.status != "OK" {
        return Err(FengError::ServerError(format!(
            "密钥服务器返回状态 {}",
            parsed.status
        )));
    }

    let mut out = Vec::with_capacity(parsed.tracks.len());
    for track in parsed.tracks {
        let track_type = TrackType::parse(&track.track_type)?;
        let key_id_vec = BASE64
            .decode(&track.key_id)
            .map_err(|e| FengError::ServerError(format!("key_id 解码失败: {e}")))?;
        let key_id: [u8; 16] = key_id_vec
            .try_into()
            .map_err(|_| FengError::ServerError("key_id 不是 16 字节".into()))?;
        let key = BASE64
            .decode(&track.key)
            .map_err(|e| FengError::ServerError(format!("key 解码失败: {e}")))?;
        let iv = match &track.iv {
            Some(iv_b64) => Some(
                BASE64
                    .decode(iv_b64)
                    .map_err(|e| FengError::ServerError(format!("iv 解码失败: {e}")))?,
            ),
            None => None,
        };

        let mut protection_systems = Vec::new();
        for pssh in &track.pssh {
            // data 即自含 pssh box, 系统 ID 位于 box 头之后
            let data = BASE64
                .decode(&pssh.data)
                .map_err(|e| FengError::ServerError(format!("pssh 解码失败: {e}")))?;
            let mut system_id = [0u8; 16];
            if data.len() >= 28 {
                system_id.copy_from_slice(&data[12..28]);
            }
            debug!("密钥响应携带 {} pssh ({} 字节)", pssh.drm_type, data.len());
            protection_systems.push(ProtectionSystemInfo {
                system_id,
                pssh: data,
            });
        }

        let period = track.crypto_period_index.unwrap_or(first_period);
        out.push((
            period,
            track_type,
            EncryptionKey {
                key_id,
                key,
                iv,
                protection_systems,
            },
        ));
    }
    Ok(out)
}

// ============================================================
// 密钥源
// ============================================================

/// 远端轮换密钥源
pub struct RemoteKeySource {
    client: Arc<KeyClient>,
    state: Arc<(Mutex<KeyCache>, Condvar)>,
    cancelled: Arc<AtomicBool>,
    producer: Mutex<Option<thread::JoinHandle<()>>>,
    rotation_enabled: bool,
}

impl RemoteKeySource {
    /// 创建远端密钥源
    ///
    /// `rotation_enabled` 为 true 时, 首次轮换取键会启动后台生产者线程.
    pub fn new(
        config: RemoteKeyConfig,
        signer: Arc<dyn RequestSigner>,
        fetcher: Arc<dyn KeyFetcher>,
        rotation_enabled: bool,
    ) -> Self {
        Self {
            client: Arc::new(KeyClient {
                config,
                signer,
                fetcher,
            }),
            state: Arc::new((Mutex::new(KeyCache::default()), Condvar::new())),
            cancelled: Arc::new(AtomicBool::new(false)),
            producer: Mutex::new(None),
            rotation_enabled,
        }
    }

    /// 取消所有阻塞中的调用并停止生产者
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let (_, cvar) = &*self.state;
        cvar.notify_all();
    }

    fn ensure_producer(&self) {
        let mut producer = self.producer.lock().unwrap();
        if producer.is_some() {
            return;
        }

        let client = Arc::clone(&self.client);
        let state = Arc::clone(&self.state);
        let cancelled = Arc::clone(&self.cancelled);

        let handle = thread::Builder::new()
            .name("feng-key-producer".into())
            .spawn(move || producer_loop(client, state, cancelled))
            .expect("创建密钥生产者线程失败");
        *producer = Some(handle);
    }
}

/// 生产者主循环: 按需批量拉取周期密钥
fn producer_loop(
    client: Arc<KeyClient>,
    state: Arc<(Mutex<KeyCache>, Condvar)>,
    cancelled: Arc<AtomicBool>,
) {
    let (lock, cvar) = &*state;
    loop {
        // 等到有尚未拉取的周期需求
        let fetch_from = {
            let mut cache = lock.lock().unwrap();
            loop {
                if cancelled.load(Ordering::Acquire) || cache.latched.is_some() {
                    return;
                }
                match cache.requested_period {
                    Some(req) if cache.next_fetch_period <= req => break cache.next_fetch_period,
                    _ => cache = cvar.wait(cache).unwrap(),
                }
            }
        };

        let count = client.config.crypto_period_count;
        debug!("拉取加密周期 [{fetch_from}, {})", fetch_from + count);
        match client.fetch_batch(fetch_from, count) {
            Ok(entries) => {
                let mut cache = lock.lock().unwrap();
                for (period, track_type, key) in entries {
                    cache.keys.insert((period, track_type), key);
                }
                cache.next_fetch_period = fetch_from + count;
                let min_keep = cache.next_fetch_period.saturating_sub(MAX_CACHED_PERIODS);
                cache.keys.retain(|(p, _), _| *p >= min_keep);
                cvar.notify_all();
            }
            Err(e) => {
                let mut cache = lock.lock().unwrap();
                cache.latched = Some(e);
                cvar.notify_all();
                return;
            }
        }
    }
}

impl KeySource for RemoteKeySource {
    fn fetch_keys(&self, request: FetchRequest<'_>) -> FengResult<()> {
        match request {
            FetchRequest::ContentId { .. } | FetchRequest::Pssh(_) => {
                // 非轮换模式: 同步拉取周期 0 的密钥集
                let entries = self.client.fetch_batch(0, 1)?;
                let (lock, cvar) = &*self.state;
                let mut cache = lock.lock().unwrap();
                for (_, track_type, key) in entries {
                    cache.keys.insert((0, track_type), key);
                }
                cvar.notify_all();
                Ok(())
            }
            FetchRequest::KeyIds(_) | FetchRequest::AssetId(_) => Err(FengError::Unimplemented(
                "远端密钥源不支持该取键方式".into(),
            )),
        }
    }

    fn get_key(&self, selector: KeySelector<'_>, key: &mut EncryptionKey) -> FengResult<()> {
        let (lock, _) = &*self.state;
        let cache = lock.lock().unwrap();
        if let Some(e) = &cache.latched {
            return Err(e.clone());
        }
        match selector {
            KeySelector::TrackType(track_type) => match cache.keys.get(&(0, track_type)) {
                Some(k) => {
                    *key = k.clone();
                    Ok(())
                }
                None => Err(FengError::NotFound(format!(
                    "轨道类型 {} 的密钥尚未拉取",
                    track_type.as_str()
                ))),
            },
            KeySelector::KeyId(key_id) => cache
                .keys
                .values()
                .find(|k| &k.key_id == key_id)
                .map(|k| *key = k.clone())
                .ok_or_else(|| FengError::NotFound(format!("key_id {}", hex::encode(key_id)))),
        }
    }

    fn get_crypto_period_key(
        &self,
        period_index: u32,
        track_type: TrackType,
        key: &mut EncryptionKey,
    ) -> FengResult<()> {
        if !self.rotation_enabled {
            return Err(FengError::InvalidArgument("密钥轮换未启用".into()));
        }
        self.ensure_producer();

        let (lock, cvar) = &*self.state;
        let mut cache = lock.lock().unwrap();

        // 登记需求并唤醒生产者
        if cache.requested_period.is_none_or(|r| r < period_index) {
            cache.requested_period = Some(period_index);
            cvar.notify_all();
        }

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(FengError::Cancelled);
            }
            if let Some(e) = &cache.latched {
                return Err(e.clone());
            }
            if let Some(k) = cache.keys.get(&(period_index, track_type)) {
                *key = k.clone();
                return Ok(());
            }
            cache = cvar.wait(cache).unwrap();
        }
    }

    fn uuid(&self) -> String {
        "edef8ba9-79d6-4ace-a3c8-27dcd51d21ed".to_string()
    }

    fn system_name(&self) -> String {
        "RemoteKeyProvider".to_string()
    }

    fn capabilities(&self) -> u32 {
        CAP_CONTENT_ID | CAP_PSSH | CAP_CRYPTO_PERIOD
    }
}

impl Drop for RemoteKeySource {
    fn drop(&mut self) {
        self.cancel();
        if let Some(handle) = self.producer.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 内存密钥服务器: 按协议应答, 每个周期派生不同密钥
    struct MockFetcher {
        fail_status: Option<&'static str>,
    }

    impl KeyFetcher for MockFetcher {
        fn post(&self, _url: &str, body: &[u8], _timeout: Duration) -> FengResult<Vec<u8>> {
            // 校验封套结构
            let envelope: serde_json::Value = serde_json::from_slice(body).unwrap();
            assert!(envelope.get("signature").is_some());
            let request_b64 = envelope["request"].as_str().unwrap();
            let request: serde_json::Value =
                serde_json::from_slice(&BASE64.decode(request_b64).unwrap()).unwrap();
            let first = request["first_crypto_period_index"].as_u64().unwrap() as u32;
            let count = request["crypto_period_count"].as_u64().unwrap() as u32;

            let status = self.fail_status.unwrap_or("OK");
            let mut tracks = Vec::new();
            for period in first..first + count {
                for track_type in ["SD", "HD", "UHD1", "UHD2", "AUDIO"] {
                    let mut key_id = [0u8; 16];
                    key_id[0] = period as u8;
                    key_id[1] = track_type.len() as u8;
                    tracks.push(serde_json::json!({
                        "type": track_type,
                        "key_id": BASE64.encode(key_id),
                        "key": BASE64.encode([period as u8; 16]),
                        "pssh": [],
                        "crypto_period_index": period,
                    }));
                }
            }
            let inner = serde_json::json!({ "status": status, "tracks": tracks });
            let outer = serde_json::json!({
                "response": BASE64.encode(serde_json::to_vec(&inner).unwrap()),
            });
            Ok(serde_json::to_vec(&outer).unwrap())
        }
    }

    struct NoopSigner;
    impl RequestSigner for NoopSigner {
        fn name(&self) -> &str {
            "test-signer"
        }
        fn sign(&self, _message: &[u8]) -> FengResult<Vec<u8>> {
            Ok(vec![0xAB; 4])
        }
    }

    fn make_source(fail_status: Option<&'static str>) -> RemoteKeySource {
        RemoteKeySource::new(
            RemoteKeyConfig {
                server_url: "http://keys.test/".into(),
                content_id: b"content".to_vec(),
                policy: "policy".into(),
                crypto_period_count: 2,
                max_retries: 0,
                request_timeout: Duration::from_secs(1),
            },
            Arc::new(NoopSigner),
            Arc::new(MockFetcher { fail_status }),
            true,
        )
    }

    #[test]
    fn test_rotation_blocks_until_ready() {
        let source = make_source(None);
        let mut key = EncryptionKey::default();
        source
            .get_crypto_period_key(3, TrackType::Hd, &mut key)
            .unwrap();
        assert_eq!(key.key, vec![3u8; 16]);

        // 更早的周期已在同批或更早批次中
        let mut key0 = EncryptionKey::default();
        source
            .get_crypto_period_key(0, TrackType::Audio, &mut key0)
            .unwrap();
        assert_eq!(key0.key, vec![0u8; 16]);
    }

    #[test]
    fn test_failure_latches() {
        let source = make_source(Some("FAILED"));
        let mut key = EncryptionKey::default();
        let err = source
            .get_crypto_period_key(0, TrackType::Sd, &mut key)
            .unwrap_err();
        assert!(matches!(err, FengError::ServerError(_)));

        // 闩锁后再次调用立即失败
        let err2 = source
            .get_crypto_period_key(1, TrackType::Sd, &mut key)
            .unwrap_err();
        assert!(matches!(err2, FengError::ServerError(_)));
    }

    #[test]
    fn test_non_rotating_fetch() {
        let source = make_source(None);
        source
            .fetch_keys(FetchRequest::ContentId {
                content_id: b"content",
                policy: "policy",
            })
            .unwrap();
        let mut key = EncryptionKey::default();
        source
            .get_key(KeySelector::TrackType(TrackType::Sd), &mut key)
            .unwrap();
        assert_eq!(key.key, vec![0u8; 16]);
    }
}
