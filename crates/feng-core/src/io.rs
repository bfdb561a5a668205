//! 字节 I/O 抽象层.
//!
//! 为整个打包管线提供统一的读写接口. `name` 是类 URI 字符串, scheme 前缀
//! 选择后端实现 (默认本地文件). 流式阶段不要求 seek; 单段分段器只在自己的
//! 临时文件上 seek.
//!
//! 后端:
//! - `FileBackend`: 本地文件
//! - `MemoryBackend`: 内存缓冲区 (测试与内存中处理)
//! - `TempFileBackend`: 具名临时文件, 写入完成后可重新读取
//! - `AtomicFileBackend`: 写入临时路径, close 时原子重命名到目标路径;
//!   未 close 即丢弃则目标文件不受影响 (清单写入使用)

use std::fs;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::{FengError, FengResult};

/// I/O 后端 trait
pub trait IoBackend: Send {
    /// 读取数据到缓冲区, 返回读取的字节数 (0 表示 EOF)
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// 全部写入
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// 定位 (seek)
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64>;
    /// 获取当前位置
    fn position(&mut self) -> io::Result<u64>;
    /// 获取总大小 (如果可知)
    fn size(&self) -> Option<u64>;
    /// 是否支持 seek
    fn is_seekable(&self) -> bool;
    /// 完成写入并提交 (原子后端在此重命名)
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// 默认读缓冲区大小 (64 KB)
const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// 打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// 只读
    Read,
    /// 写入 (截断)
    Write,
    /// 写入临时路径, close 时原子重命名
    AtomicWrite,
}

/// I/O 上下文
///
/// 封装底层后端并提供读缓冲. 每个分段器独占自己的输出句柄, 句柄不跨线程共享.
pub struct IoContext {
    inner: Box<dyn IoBackend>,
    buffer: Vec<u8>,
    buf_len: usize,
    buf_pos: usize,
    eof: bool,
}

impl IoContext {
    /// 从 I/O 后端创建上下文
    pub fn new(backend: Box<dyn IoBackend>) -> Self {
        Self {
            inner: backend,
            buffer: vec![0u8; DEFAULT_BUFFER_SIZE],
            buf_len: 0,
            buf_pos: 0,
            eof: false,
        }
    }

    /// 按名称打开资源
    ///
    /// scheme 前缀选择后端: `file://` 或无 scheme 为本地文件;
    /// `memory://` 为内存缓冲区 (写模式).
    pub fn open(name: &str, mode: OpenMode) -> FengResult<Self> {
        if let Some(rest) = name.strip_prefix("memory://") {
            let _ = rest;
            return Ok(Self::new(Box::new(MemoryBackend::new())));
        }
        let path = name.strip_prefix("file://").unwrap_or(name);
        match mode {
            OpenMode::Read => {
                let file = fs::File::open(path)
                    .map_err(|e| FengError::FileFailure(format!("打开 {path} 失败: {e}")))?;
                Ok(Self::new(Box::new(FileBackend::new(file))))
            }
            OpenMode::Write => {
                let file = fs::File::create(path)
                    .map_err(|e| FengError::FileFailure(format!("创建 {path} 失败: {e}")))?;
                Ok(Self::new(Box::new(FileBackend::new(file))))
            }
            OpenMode::AtomicWrite => Ok(Self::new(Box::new(AtomicFileBackend::create(path)?))),
        }
    }

    /// 读取数据, 返回实际读取的字节数 (0 表示 EOF)
    pub fn read(&mut self, buf: &mut [u8]) -> FengResult<usize> {
        let buffered = self.buf_len - self.buf_pos;
        if buffered > 0 {
            let to_copy = buffered.min(buf.len());
            buf[..to_copy].copy_from_slice(&self.buffer[self.buf_pos..self.buf_pos + to_copy]);
            self.buf_pos += to_copy;
            return Ok(to_copy);
        }
        let n = self.inner.read(buf)?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }

    /// 读取指定字节数, 不足则失败
    pub fn read_exact(&mut self, buf: &mut [u8]) -> FengResult<()> {
        let mut total = 0;
        while total < buf.len() {
            let n = self.read(&mut buf[total..])?;
            if n == 0 {
                return Err(FengError::EndOfStream);
            }
            total += n;
        }
        Ok(())
    }

    /// 预读而不消耗: 读取至多 n 字节到内部缓冲区并返回其引用
    ///
    /// 容器格式探测使用; 之后的 `read` 从缓冲区头部开始.
    pub fn peek(&mut self, n: usize) -> FengResult<&[u8]> {
        if self.buf_pos != 0 && self.buf_len > self.buf_pos {
            // 把残留数据挪到头部
            self.buffer.copy_within(self.buf_pos..self.buf_len, 0);
            self.buf_len -= self.buf_pos;
            self.buf_pos = 0;
        } else if self.buf_pos == self.buf_len {
            self.buf_pos = 0;
            self.buf_len = 0;
        }
        if self.buffer.len() < n {
            self.buffer.resize(n, 0);
        }
        while self.buf_len < n {
            let read = self.inner.read(&mut self.buffer[self.buf_len..n])?;
            if read == 0 {
                break;
            }
            self.buf_len += read;
        }
        Ok(&self.buffer[..self.buf_len.min(n)])
    }

    /// 写入全部数据
    pub fn write_all(&mut self, buf: &[u8]) -> FengResult<()> {
        self.inner.write_all(buf)?;
        Ok(())
    }

    /// 定位 (会清空读缓冲区)
    pub fn seek(&mut self, pos: io::SeekFrom) -> FengResult<u64> {
        self.buf_pos = 0;
        self.buf_len = 0;
        self.eof = false;
        Ok(self.inner.seek(pos)?)
    }

    /// 获取当前位置 (考虑读缓冲区中尚未消耗的数据量)
    pub fn position(&mut self) -> FengResult<u64> {
        let raw = self.inner.position()?;
        let buffered = (self.buf_len - self.buf_pos) as u64;
        Ok(raw - buffered)
    }

    /// 是否已到达末尾
    pub fn eof(&self) -> bool {
        self.eof && self.buf_pos >= self.buf_len
    }

    /// 获取总大小
    pub fn size(&self) -> Option<u64> {
        self.inner.size()
    }

    /// 是否支持随机访问
    pub fn is_seekable(&self) -> bool {
        self.inner.is_seekable()
    }

    /// 完成写入并提交
    pub fn close(&mut self) -> FengResult<()> {
        self.inner.close()?;
        Ok(())
    }

    /// 取出底层后端 (测试取回 MemoryBackend 数据用)
    pub fn into_backend(self) -> Box<dyn IoBackend> {
        self.inner
    }
}

// ============================================================
// 文件后端
// ============================================================

/// 本地文件后端
pub struct FileBackend {
    file: fs::File,
    size: Option<u64>,
}

impl FileBackend {
    /// 包装一个已打开的文件
    pub fn new(file: fs::File) -> Self {
        let size = file.metadata().ok().map(|m| m.len());
        Self { file, size }
    }
}

impl IoBackend for FileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.write_all(buf)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.stream_position()
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn close(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

// ============================================================
// 内存后端
// ============================================================

/// 内存缓冲区后端
pub struct MemoryBackend {
    data: Vec<u8>,
    pos: usize,
}

impl MemoryBackend {
    /// 创建空缓冲区 (用于写入)
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            pos: 0,
        }
    }

    /// 从已有数据创建 (用于读取)
    pub fn from_data(data: Vec<u8>) -> Self {
        Self { data, pos: 0 }
    }

    /// 获取内部数据的引用
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// 消耗自身, 返回内部数据
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl IoBackend for MemoryBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.data.len().saturating_sub(self.pos);
        let to_read = buf.len().min(available);
        if to_read == 0 {
            return Ok(0);
        }
        buf[..to_read].copy_from_slice(&self.data[self.pos..self.pos + to_read]);
        self.pos += to_read;
        Ok(to_read)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.pos >= self.data.len() {
            self.data.extend_from_slice(buf);
        } else {
            let overlap = (self.data.len() - self.pos).min(buf.len());
            self.data[self.pos..self.pos + overlap].copy_from_slice(&buf[..overlap]);
            if buf.len() > overlap {
                self.data.extend_from_slice(&buf[overlap..]);
            }
        }
        self.pos += buf.len();
        Ok(())
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let new_pos = match pos {
            io::SeekFrom::Start(offset) => offset as i64,
            io::SeekFrom::End(offset) => self.data.len() as i64 + offset,
            io::SeekFrom::Current(offset) => self.pos as i64 + offset,
        };
        if new_pos < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek 位置不能为负",
            ));
        }
        self.pos = new_pos as usize;
        Ok(self.pos as u64)
    }

    fn position(&mut self) -> io::Result<u64> {
        Ok(self.pos as u64)
    }

    fn size(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

// ============================================================
// 临时文件后端
// ============================================================

/// 具名临时文件后端
///
/// 单段分段器先把分片流式写入临时文件, finalize 时再整体读回;
/// seek 只发生在写入结束之后. drop 时临时文件自动删除.
pub struct TempFileBackend {
    file: tempfile::NamedTempFile,
}

impl TempFileBackend {
    /// 在指定目录创建 (None 使用系统临时目录)
    pub fn create(dir: Option<&Path>) -> FengResult<Self> {
        let file = match dir {
            Some(d) => tempfile::NamedTempFile::new_in(d),
            None => tempfile::NamedTempFile::new(),
        }
        .map_err(|e| FengError::FileFailure(format!("创建临时文件失败: {e}")))?;
        Ok(Self { file })
    }

    /// 临时文件路径
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl IoBackend for TempFileBackend {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.as_file_mut().read(buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.file.as_file_mut().write_all(buf)
    }

    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        self.file.as_file_mut().seek(pos)
    }

    fn position(&mut self) -> io::Result<u64> {
        self.file.as_file_mut().stream_position()
    }

    fn size(&self) -> Option<u64> {
        self.file.as_file().metadata().ok().map(|m| m.len())
    }

    fn is_seekable(&self) -> bool {
        true
    }
}

// ============================================================
// 原子写入后端
// ============================================================

/// 原子写入后端
///
/// 写入 `<目标>.tmp.<随机>` 旁路文件, close 时重命名到目标路径.
/// 未 close 即 drop 则旁路文件被删除, 目标文件保持旧内容.
pub struct AtomicFileBackend {
    target: PathBuf,
    temp_path: PathBuf,
    file: Option<fs::File>,
    committed: bool,
}

impl AtomicFileBackend {
    /// 创建指向目标路径的原子写入后端
    pub fn create(target: impl Into<PathBuf>) -> FengResult<Self> {
        let target = target.into();
        let temp_path = target.with_extension(format!(
            "{}tmp{}",
            target
                .extension()
                .map(|e| format!("{}.", e.to_string_lossy()))
                .unwrap_or_default(),
            std::process::id(),
        ));
        let file = fs::File::create(&temp_path)
            .map_err(|e| FengError::FileFailure(format!("创建 {} 失败: {e}", temp_path.display())))?;
        Ok(Self {
            target,
            temp_path,
            file: Some(file),
            committed: false,
        })
    }
}

impl IoBackend for AtomicFileBackend {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "原子后端只写"))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.write_all(buf),
            None => Err(io::Error::new(io::ErrorKind::Other, "后端已关闭")),
        }
    }

    fn seek(&mut self, _pos: io::SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "原子后端不支持 seek"))
    }

    fn position(&mut self) -> io::Result<u64> {
        match self.file.as_mut() {
            Some(f) => f.stream_position(),
            None => Ok(0),
        }
    }

    fn size(&self) -> Option<u64> {
        None
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn close(&mut self) -> io::Result<()> {
        if let Some(mut f) = self.file.take() {
            f.flush()?;
            drop(f);
            fs::rename(&self.temp_path, &self.target)?;
            self.committed = true;
        }
        Ok(())
    }
}

impl Drop for AtomicFileBackend {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mut io = IoContext::new(Box::new(MemoryBackend::new()));
        io.write_all(b"hello feng").unwrap();
        io.seek(io::SeekFrom::Start(0)).unwrap();

        let mut buf = [0u8; 5];
        io.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn test_peek_does_not_consume() {
        let backend = MemoryBackend::from_data(b"ftypisom....".to_vec());
        let mut io = IoContext::new(Box::new(backend));

        let head = io.peek(4).unwrap().to_vec();
        assert_eq!(&head, b"ftyp");

        // peek 之后 read 仍从头开始
        let mut buf = [0u8; 8];
        io.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ftypisom");
    }

    #[test]
    fn test_peek_short_input() {
        let backend = MemoryBackend::from_data(b"ab".to_vec());
        let mut io = IoContext::new(Box::new(backend));
        assert_eq!(io.peek(16).unwrap(), b"ab");
    }

    #[test]
    fn test_atomic_rename_on_close() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("manifest.mpd");

        let mut io = IoContext::new(Box::new(AtomicFileBackend::create(&target).unwrap()));
        io.write_all(b"<MPD/>").unwrap();
        assert!(!target.exists(), "close 前目标文件不应存在");
        io.close().unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"<MPD/>");
    }

    #[test]
    fn test_atomic_discard_without_close() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("manifest.mpd");
        {
            let mut io = IoContext::new(Box::new(AtomicFileBackend::create(&target).unwrap()));
            io.write_all(b"partial").unwrap();
            // 不 close 即丢弃
        }
        assert!(!target.exists());
        // 旁路临时文件也被清掉
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_temp_file_write_then_read() {
        let mut io = IoContext::new(Box::new(TempFileBackend::create(None).unwrap()));
        io.write_all(b"fragment data").unwrap();
        io.seek(io::SeekFrom::Start(0)).unwrap();
        let mut buf = vec![0u8; 13];
        io.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"fragment data");
    }
}
