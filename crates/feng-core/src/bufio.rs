//! 内存缓冲区读写器.
//!
//! `BufferReader` 从字节切片顺序读取大端整数, `BufferWriter` 是可增长的
//! 大端写缓冲区. 容器格式 (ISO-BMFF box、EBML 元素) 的解析与序列化都建立
//! 在这两个类型上.

use crate::io::IoContext;
use crate::{FengError, FengResult};

/// 大端整数顺序读取器
pub struct BufferReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BufferReader<'a> {
    /// 从字节切片创建
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// 当前读取位置
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// 剩余可读字节数
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// 是否还有数据
    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    fn take(&mut self, n: usize) -> FengResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(FengError::EndOfStream);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    /// 读取 u8
    pub fn read_u8(&mut self) -> FengResult<u8> {
        Ok(self.take(1)?[0])
    }

    /// 读取 u16 大端
    pub fn read_u16(&mut self) -> FengResult<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    /// 读取 u24 大端 (3 字节无符号整数)
    pub fn read_u24(&mut self) -> FengResult<u32> {
        let b = self.take(3)?;
        Ok((u32::from(b[0]) << 16) | (u32::from(b[1]) << 8) | u32::from(b[2]))
    }

    /// 读取 u32 大端
    pub fn read_u32(&mut self) -> FengResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// 读取 u64 大端
    pub fn read_u64(&mut self) -> FengResult<u64> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    /// 读取 i16 大端
    pub fn read_i16(&mut self) -> FengResult<i16> {
        Ok(self.read_u16()? as i16)
    }

    /// 读取 i32 大端
    pub fn read_i32(&mut self) -> FengResult<i32> {
        Ok(self.read_u32()? as i32)
    }

    /// 读取 i64 大端
    pub fn read_i64(&mut self) -> FengResult<i64> {
        Ok(self.read_u64()? as i64)
    }

    /// 读取任意宽度 (1..=8 字节) 的大端无符号整数
    pub fn read_n_bytes(&mut self, width: usize) -> FengResult<u64> {
        if width == 0 || width > 8 {
            return Err(FengError::InvalidArgument(format!(
                "read_n_bytes: 无效宽度 {width}"
            )));
        }
        let b = self.take(width)?;
        let mut val = 0u64;
        for byte in b {
            val = (val << 8) | u64::from(*byte);
        }
        Ok(val)
    }

    /// 读取 N 个字节
    pub fn read_bytes(&mut self, n: usize) -> FengResult<&'a [u8]> {
        self.take(n)
    }

    /// 读取 N 个字节到 Vec
    pub fn read_vec(&mut self, n: usize) -> FengResult<Vec<u8>> {
        Ok(self.take(n)?.to_vec())
    }

    /// 读取 4 字节 FourCC
    pub fn read_fourcc(&mut self) -> FengResult<[u8; 4]> {
        let b = self.take(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// 跳过 N 个字节
    pub fn skip(&mut self, n: usize) -> FengResult<()> {
        self.take(n).map(|_| ())
    }
}

/// 可增长的大端写缓冲区
///
/// 所有 box/元素序列化先写入 `BufferWriter`, 再一次性交给字节汇,
/// 使得输出文件中不会出现半写的结构.
#[derive(Default)]
pub struct BufferWriter {
    buf: Vec<u8>,
}

impl BufferWriter {
    /// 创建空缓冲区
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// 以预分配容量创建
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// 当前长度
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// 写入 u8
    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// 写入 u16 大端
    pub fn put_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 写入 u24 大端
    pub fn put_u24(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes()[1..]);
    }

    /// 写入 u32 大端
    pub fn put_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 写入 u64 大端
    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 写入 i16 大端
    pub fn put_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 写入 i32 大端
    pub fn put_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 写入 i64 大端
    pub fn put_i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    /// 写入任意宽度 (1..=8 字节) 的大端无符号整数
    pub fn put_n_bytes(&mut self, v: u64, width: usize) {
        debug_assert!((1..=8).contains(&width));
        let bytes = v.to_be_bytes();
        self.buf.extend_from_slice(&bytes[8 - width..]);
    }

    /// 写入字节切片
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// 写入 4 字节 FourCC
    pub fn put_fourcc(&mut self, tag: &[u8; 4]) {
        self.buf.extend_from_slice(tag);
    }

    /// 回填之前预留的 u32 大端值 (box 大小字段)
    pub fn patch_u32(&mut self, pos: usize, v: u32) {
        debug_assert!(pos + 4 <= self.buf.len());
        self.buf[pos..pos + 4].copy_from_slice(&v.to_be_bytes());
    }

    /// 查看已写入的数据
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// 消耗自身, 返回内部数据
    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }

    /// 清空缓冲区 (保留容量)
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// 将缓冲区内容一次性写入字节汇并清空
    pub fn flush_to(&mut self, io: &mut IoContext) -> FengResult<()> {
        io.write_all(&self.buf)?;
        self.buf.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_widths() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let mut r = BufferReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0203);
        assert_eq!(r.read_u24().unwrap(), 0x040506);
        assert_eq!(r.remaining(), 2);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn test_reader_n_bytes() {
        let data = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE];
        let mut r = BufferReader::new(&data);
        assert_eq!(r.read_n_bytes(5).unwrap(), 0xAABBCCDDEE);
        assert!(r.read_n_bytes(9).is_err());
    }

    #[test]
    fn test_writer_roundtrip() {
        let mut w = BufferWriter::new();
        w.put_u8(0x01);
        w.put_u16(0x0203);
        w.put_u24(0x040506);
        w.put_u32(0x0708090A);
        w.put_u64(0x0B0C0D0E0F101112);
        w.put_n_bytes(0x1314, 2);
        w.put_fourcc(b"ftyp");

        let data = w.into_vec();
        let mut r = BufferReader::new(&data);
        assert_eq!(r.read_u8().unwrap(), 0x01);
        assert_eq!(r.read_u16().unwrap(), 0x0203);
        assert_eq!(r.read_u24().unwrap(), 0x040506);
        assert_eq!(r.read_u32().unwrap(), 0x0708090A);
        assert_eq!(r.read_u64().unwrap(), 0x0B0C0D0E0F101112);
        assert_eq!(r.read_u16().unwrap(), 0x1314);
        assert_eq!(&r.read_fourcc().unwrap(), b"ftyp");
    }

    #[test]
    fn test_writer_signed() {
        let mut w = BufferWriter::new();
        w.put_i32(-1000);
        w.put_i16(-2);
        let data = w.into_vec();
        let mut r = BufferReader::new(&data);
        assert_eq!(r.read_i32().unwrap(), -1000);
        assert_eq!(r.read_i16().unwrap(), -2);
    }
}
