//! feng - 自适应流媒体打包命令行工具
//!
//! 把一个或多个输入的基本流重封装为 DASH/HLS 输出, 可选 CENC 加密.
//! 每个位置参数是一条流描述符:
//! `input=in.mp4,stream=video,output=video.mp4[,segment_template=video-$Number$.m4s,...]`

mod logging;

use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use feng::packager::{Packager, PackagingParams, StreamDescriptor};
use feng_crypto::{
    FixedKeySource, KeyFetcher, RemoteKeyConfig, RemoteKeySource, RsaRequestSigner,
};

#[derive(Parser, Debug)]
#[command(name = "feng", version, about = "纯 Rust 自适应流媒体打包工具")]
struct Cli {
    /// 流描述符 (可多条)
    #[arg(required = true)]
    stream_descriptors: Vec<String>,

    /// DASH MPD 输出路径
    #[arg(long = "mpd_output")]
    mpd_output: Option<String>,

    /// HLS 主播放列表输出路径
    #[arg(long = "hls_master_playlist_output")]
    hls_master_playlist_output: Option<String>,

    /// 生成动态 (直播) MPD
    #[arg(long = "generate_dynamic_mpd")]
    generate_dynamic_mpd: bool,

    /// 分段时长 (秒)
    #[arg(long = "segment_duration", default_value_t = 6.0)]
    segment_duration: f64,

    /// 分片时长 (秒)
    #[arg(long = "fragment_duration", default_value_t = 2.0)]
    fragment_duration: f64,

    /// 时移缓冲深度 (秒)
    #[arg(long = "time_shift_buffer_depth", default_value_t = 0.0)]
    time_shift_buffer_depth: f64,

    /// 默认语言 (HLS DEFAULT 标记)
    #[arg(long = "default_language", default_value = "")]
    default_language: String,

    /// 启用固定密钥加密
    #[arg(long = "enable_raw_key_encryption")]
    enable_raw_key_encryption: bool,

    /// 固定密钥: key_id (十六进制, 16 字节)
    #[arg(long = "key_id", default_value = "")]
    key_id: String,

    /// 固定密钥: key (十六进制, 16 字节)
    #[arg(long = "key", default_value = "")]
    key: String,

    /// 固定密钥: pssh 负载 (十六进制)
    #[arg(long = "pssh", default_value = "")]
    pssh: String,

    /// 固定密钥: IV (十六进制, 8 或 16 字节; 空则随机)
    #[arg(long = "iv", default_value = "")]
    iv: String,

    /// 密钥服务器 URL (远端轮换密钥源)
    #[arg(long = "key_server_url", default_value = "")]
    key_server_url: String,

    /// 内容 ID (十六进制, 远端密钥源)
    #[arg(long = "content_id", default_value = "")]
    content_id: String,

    /// 密钥策略名
    #[arg(long = "policy", default_value = "")]
    policy: String,

    /// 请求签名者名称
    #[arg(long = "signer", default_value = "")]
    signer: String,

    /// RSA 签名私钥路径 (PKCS#1 PEM)
    #[arg(long = "rsa_signing_key_path", default_value = "")]
    rsa_signing_key_path: String,

    /// 保护方案 (cenc / cbc1 / cens / cbcs)
    #[arg(long = "protection_scheme", default_value = "cenc")]
    protection_scheme: String,

    /// 透明期 (秒)
    #[arg(long = "clear_lead", default_value_t = 0.0)]
    clear_lead: f64,

    /// 密钥轮换周期 (秒, 0 = 不轮换)
    #[arg(long = "crypto_period_duration", default_value_t = 0.0)]
    crypto_period_duration: f64,

    /// HLS EXT-X-KEY 的 URI
    #[arg(long = "hls_key_uri", default_value = "")]
    hls_key_uri: String,

    /// 提示点时间列表 (秒, 分号分隔)
    #[arg(long = "ad_cues", default_value = "")]
    ad_cues: String,

    /// 日志级别 (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() {
    let cli = Cli::parse();
    logging::init("feng", cli.verbose);

    if let Err(err) = run(cli) {
        tracing::error!("打包失败: {err:#}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let descriptors = cli
        .stream_descriptors
        .iter()
        .map(|text| StreamDescriptor::parse(text).map_err(anyhow::Error::from))
        .collect::<Result<Vec<_>>>()
        .context("解析流描述符失败")?;

    let ad_cues = if cli.ad_cues.is_empty() {
        Vec::new()
    } else {
        cli.ad_cues
            .split(';')
            .map(|s| {
                s.trim()
                    .parse::<f64>()
                    .with_context(|| format!("提示点时间非法: {s}"))
            })
            .collect::<Result<Vec<_>>>()?
    };

    let params = PackagingParams {
        mpd_output: cli.mpd_output.unwrap_or_default(),
        hls_master_playlist_output: cli.hls_master_playlist_output.unwrap_or_default(),
        generate_dynamic_mpd: cli.generate_dynamic_mpd,
        segment_duration_seconds: cli.segment_duration,
        fragment_duration_seconds: cli.fragment_duration,
        protection_scheme: cli.protection_scheme.clone(),
        clear_lead_seconds: cli.clear_lead,
        crypto_period_duration_seconds: cli.crypto_period_duration,
        time_shift_buffer_depth: cli.time_shift_buffer_depth,
        default_language: cli.default_language.clone(),
        hls_key_uri: cli.hls_key_uri.clone(),
        ad_cues,
        ..Default::default()
    };

    let mut packager = Packager::new(params, descriptors);

    if cli.enable_raw_key_encryption {
        let source = FixedKeySource::from_hex(&cli.key_id, &cli.key, &cli.pssh, &cli.iv)
            .context("固定密钥参数非法")?;
        let source: Arc<dyn feng_crypto::KeySource> = Arc::new(source);
        packager.set_encryption_key_source(Arc::clone(&source));
        packager.set_decryption_key_source(source);
    } else if !cli.key_server_url.is_empty() {
        if cli.signer.is_empty() || cli.rsa_signing_key_path.is_empty() {
            bail!("远端密钥源需要 --signer 与 --rsa_signing_key_path");
        }
        let pem = std::fs::read_to_string(&cli.rsa_signing_key_path)
            .with_context(|| format!("读取 {} 失败", cli.rsa_signing_key_path))?;
        let signer = RsaRequestSigner::from_pkcs1_pem(&cli.signer, &pem)?;
        let content_id = hex::decode(&cli.content_id).context("content_id 不是合法十六进制")?;
        let source = RemoteKeySource::new(
            RemoteKeyConfig {
                server_url: cli.key_server_url.clone(),
                content_id,
                policy: cli.policy.clone(),
                ..Default::default()
            },
            Arc::new(signer),
            Arc::new(CurlFetcher),
            cli.crypto_period_duration > 0.0,
        );
        packager.set_encryption_key_source(Arc::new(source));
    }

    packager.run()?;
    tracing::info!("打包完成");
    Ok(())
}

/// 外部 curl 进程承担 HTTP 传输 (核心不内置 HTTP 客户端)
struct CurlFetcher;

impl KeyFetcher for CurlFetcher {
    fn post(
        &self,
        url: &str,
        body: &[u8],
        timeout: Duration,
    ) -> feng_core::FengResult<Vec<u8>> {
        use std::io::Write;
        use std::process::{Command, Stdio};

        let mut child = Command::new("curl")
            .arg("--silent")
            .arg("--show-error")
            .arg("--fail-with-body")
            .arg("--max-time")
            .arg(timeout.as_secs().to_string())
            .arg("--data-binary")
            .arg("@-")
            .arg("--header")
            .arg("Content-Type: application/json")
            .arg(url)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| feng_core::FengError::HttpFailure(format!("启动 curl 失败: {e}")))?;
        child
            .stdin
            .take()
            .expect("stdin 已配置")
            .write_all(body)
            .map_err(|e| feng_core::FengError::HttpFailure(format!("写请求体失败: {e}")))?;
        let output = child
            .wait_with_output()
            .map_err(|e| feng_core::FengError::HttpFailure(format!("等待 curl 失败: {e}")))?;
        if !output.status.success() {
            // curl 28 = 超时; 22 + 5xx 无法细分, 统一按瞬态服务端错误处理
            let code = output.status.code().unwrap_or(-1);
            let stderr = String::from_utf8_lossy(&output.stderr);
            if code == 28 {
                return Err(feng_core::FengError::TimeOut(format!("密钥服务器: {stderr}")));
            }
            return Err(feng_core::FengError::ServerError(format!(
                "curl 退出码 {code}: {stderr}"
            )));
        }
        Ok(output.stdout)
    }
}
