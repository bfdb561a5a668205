//! 统一错误类型定义.
//!
//! 所有 Feng crate 共用的错误类型, 每个变体对应一个稳定的状态码.
//! 跨层传播时各阶段将上游错误转换为本层最贴切的状态码
//! (字节 I/O 失败保持 `FileFailure`, 损坏的 box 布局变为 `ParserFailure`).

use thiserror::Error;

/// Feng 框架统一错误类型
///
/// 所有变体只携带描述字符串, 因此可以跨线程克隆 (密钥源闩锁错误需要).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FengError {
    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),

    /// 无效参数
    #[error("无效参数: {0}")]
    InvalidArgument(String),

    /// 功能未实现
    #[error("功能未实现: {0}")]
    Unimplemented(String),

    /// 未找到指定对象
    #[error("未找到: {0}")]
    NotFound(String),

    /// 对象已存在
    #[error("已存在: {0}")]
    AlreadyExists(String),

    /// 数值超出可表示范围
    #[error("超出范围: {0}")]
    OutOfRange(String),

    /// 容器/码流结构错误, 解析器进入永久失败态
    #[error("解析失败: {0}")]
    ParserFailure(String),

    /// 加密/解密失败
    #[error("加密失败: {0}")]
    EncryptionFailure(String),

    /// HTTP 传输失败
    #[error("HTTP 失败: {0}")]
    HttpFailure(String),

    /// 文件/字节流 I/O 失败
    #[error("文件 I/O 失败: {0}")]
    FileFailure(String),

    /// 服务端错误 (5xx), 密钥源视为瞬态可重试
    #[error("服务端错误: {0}")]
    ServerError(String),

    /// 客户端错误 (4xx), 不可重试
    #[error("客户端错误: {0}")]
    ClientError(String),

    /// 超时
    #[error("超时: {0}")]
    TimeOut(String),

    /// 已到达流末尾 (良性信号, 用于冲刷管线, 不上报给用户)
    #[error("已到达流末尾")]
    EndOfStream,

    /// 操作被取消
    #[error("操作被取消")]
    Cancelled,
}

impl From<std::io::Error> for FengError {
    fn from(err: std::io::Error) -> Self {
        FengError::FileFailure(err.to_string())
    }
}

impl FengError {
    /// 是否为瞬态错误 (密钥源重试判定)
    pub fn is_transient(&self) -> bool {
        matches!(self, FengError::ServerError(_) | FengError::TimeOut(_))
    }
}

/// Feng 框架统一 Result 类型
pub type FengResult<T> = Result<T, FengError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_maps_to_file_failure() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: FengError = io.into();
        assert!(matches!(err, FengError::FileFailure(_)));
    }

    #[test]
    fn test_transient_classification() {
        assert!(FengError::ServerError("503".into()).is_transient());
        assert!(FengError::TimeOut("key server".into()).is_transient());
        assert!(!FengError::ClientError("400".into()).is_transient());
        assert!(!FengError::ParserFailure("bad box".into()).is_transient());
    }
}
