//! ISO-BMFF Box 读写框架.
//!
//! ISO 14496-12 定义的 Box 结构:
//! ```text
//! Size:       4 bytes (big-endian, 含头部本身)
//! Type:       4 bytes (FourCC)
//! [LargeSize]: 8 bytes (仅当 Size==1 时存在)
//! ```
//! FullBox 在负载前还有 version(1) + flags(3).
//!
//! 每个 box 类型实现 [`Mp4Box::read_write`], 同一段代码通过双模式
//! [`BoxBuffer`] 完成解析与序列化, 保证往返一致. 写入时大小字段在
//! 负载写完后回填; 版本升级 (0→1)、stco↔co64、stsz↔stz2 的切换在
//! 各 box 的 `read_write` 内自动完成.

mod basic;
mod fragment;
mod protection;
mod sample_table;

pub use basic::*;
pub use fragment::*;
pub use protection::*;
pub use sample_table::*;

use feng_core::{BufferReader, BufferWriter, FengError, FengResult};

/// 4 字节 box 类型标签
pub type FourCc = [u8; 4];

/// 已解析的 Box 头部
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    /// Box 总大小 (含头部, 0 表示延伸到文件末尾)
    pub size: u64,
    /// Box 类型
    pub fourcc: FourCc,
    /// 头部大小 (8 或 16 字节)
    pub header_size: u64,
}

impl BoxHeader {
    /// 负载大小 (不含头部)
    pub fn payload_size(&self) -> u64 {
        if self.size == 0 {
            u64::MAX
        } else {
            self.size.saturating_sub(self.header_size)
        }
    }

    /// 从缓冲读取一个 box 头部
    pub fn read(r: &mut BufferReader<'_>) -> FengResult<Self> {
        let size32 = r.read_u32()?;
        let fourcc = r.read_fourcc()?;
        let (size, header_size) = if size32 == 1 {
            (r.read_u64()?, 16u64)
        } else {
            (u64::from(size32), 8u64)
        };
        if size != 0 && size < header_size {
            return Err(FengError::ParserFailure(format!(
                "box {} 大小 {} 小于头部",
                fourcc_str(&fourcc),
                size
            )));
        }
        Ok(Self {
            size,
            fourcc,
            header_size,
        })
    }
}

/// FourCC 的可读形式
pub fn fourcc_str(cc: &FourCc) -> String {
    cc.iter()
        .map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                char::from(b)
            } else {
                '?'
            }
        })
        .collect()
}

/// Box 类型 trait
///
/// `read_write` 对读写两个方向使用同一段字段序列代码;
/// FullBox 在开头调用 [`BoxBuffer::rw_version_flags`].
pub trait Mp4Box {
    /// box 类型标签 (可随内容变化, 如 stco/co64)
    fn fourcc(&self) -> FourCc;

    /// 读取时可接受的其他标签 (stco↔co64, stsz↔stz2)
    fn alternate_fourcc(&self) -> Option<FourCc> {
        None
    }

    /// 按当前模式读取或写入负载
    fn read_write(&mut self, buf: &mut BoxBuffer<'_, '_>) -> FengResult<()>;
}

/// 子 box 条目 (读取模式下的预扫描结果)
struct ChildEntry<'a> {
    fourcc: FourCc,
    /// 负载字节
    payload: &'a [u8],
    consumed: bool,
}

enum Mode<'a, 'w> {
    Read {
        reader: BufferReader<'a>,
        children: Vec<ChildEntry<'a>>,
        scanned: bool,
    },
    Write {
        writer: &'w mut BufferWriter,
    },
}

/// 双模式 box 缓冲
pub struct BoxBuffer<'a, 'w> {
    mode: Mode<'a, 'w>,
    /// 读取模式下父级记录的实际 fourcc (stco/co64 等双名 box 使用)
    actual: Option<FourCc>,
}

macro_rules! rw_int {
    ($name:ident, $ty:ty, $read:ident, $write:ident) => {
        /// 读写一个定宽整数字段
        pub fn $name(&mut self, v: &mut $ty) -> FengResult<()> {
            match &mut self.mode {
                Mode::Read { reader, .. } => {
                    *v = reader.$read()?;
                }
                Mode::Write { writer } => writer.$write(*v),
            }
            Ok(())
        }
    };
}

impl<'a, 'w> BoxBuffer<'a, 'w> {
    /// 创建读取模式缓冲 (data 为 box 负载)
    pub fn reader(data: &'a [u8]) -> Self {
        Self {
            mode: Mode::Read {
                reader: BufferReader::new(data),
                children: Vec::new(),
                scanned: false,
            },
            actual: None,
        }
    }

    /// 创建写入模式缓冲
    pub fn writer(writer: &'w mut BufferWriter) -> Self {
        Self {
            mode: Mode::Write { writer },
            actual: None,
        }
    }

    /// 是否为读取模式
    pub fn reading(&self) -> bool {
        matches!(self.mode, Mode::Read { .. })
    }

    rw_int!(rw_u8, u8, read_u8, put_u8);
    rw_int!(rw_u16, u16, read_u16, put_u16);
    rw_int!(rw_u24, u32, read_u24, put_u24);
    rw_int!(rw_u32, u32, read_u32, put_u32);
    rw_int!(rw_u64, u64, read_u64, put_u64);
    rw_int!(rw_i16, i16, read_i16, put_i16);
    rw_int!(rw_i32, i32, read_i32, put_i32);
    rw_int!(rw_i64, i64, read_i64, put_i64);

    /// 读写 FullBox 的 version + flags
    pub fn rw_version_flags(&mut self, version: &mut u8, flags: &mut u32) -> FengResult<()> {
        self.rw_u8(version)?;
        self.rw_u24(flags)
    }

    /// 按版本标志读写 u32 或 u64 字段
    pub fn rw_u32_or_u64(&mut self, v: &mut u64, use_u64: bool) -> FengResult<()> {
        if use_u64 {
            self.rw_u64(v)
        } else {
            let mut v32 = *v as u32;
            self.rw_u32(&mut v32)?;
            if self.reading() {
                *v = u64::from(v32);
            }
            Ok(())
        }
    }

    /// 按版本标志读写 i32 或 i64 字段
    pub fn rw_i32_or_i64(&mut self, v: &mut i64, use_i64: bool) -> FengResult<()> {
        if use_i64 {
            self.rw_i64(v)
        } else {
            let mut v32 = *v as i32;
            self.rw_i32(&mut v32)?;
            if self.reading() {
                *v = i64::from(v32);
            }
            Ok(())
        }
    }

    /// 读写 FourCC
    pub fn rw_fourcc(&mut self, v: &mut FourCc) -> FengResult<()> {
        match &mut self.mode {
            Mode::Read { reader, .. } => {
                *v = reader.read_fourcc()?;
            }
            Mode::Write { writer } => writer.put_fourcc(v),
        }
        Ok(())
    }

    /// 读写定长字节区
    pub fn rw_fixed_bytes(&mut self, v: &mut [u8]) -> FengResult<()> {
        match &mut self.mode {
            Mode::Read { reader, .. } => {
                let bytes = reader.read_bytes(v.len())?;
                v.copy_from_slice(bytes);
            }
            Mode::Write { writer } => writer.put_bytes(v),
        }
        Ok(())
    }

    /// 读取 n 字节到 Vec / 写出 Vec 全部内容
    pub fn rw_vec(&mut self, v: &mut Vec<u8>, n: usize) -> FengResult<()> {
        match &mut self.mode {
            Mode::Read { reader, .. } => {
                *v = reader.read_vec(n)?;
            }
            Mode::Write { writer } => writer.put_bytes(v),
        }
        Ok(())
    }

    /// 读取剩余全部字节 / 写出 Vec 全部内容
    pub fn rw_vec_to_end(&mut self, v: &mut Vec<u8>) -> FengResult<()> {
        match &mut self.mode {
            Mode::Read { reader, .. } => {
                let n = reader.remaining();
                *v = reader.read_vec(n)?;
            }
            Mode::Write { writer } => writer.put_bytes(v),
        }
        Ok(())
    }

    /// 跳过 (读取) 或填零 (写入) n 字节
    pub fn skip(&mut self, n: usize) -> FengResult<()> {
        match &mut self.mode {
            Mode::Read { reader, .. } => reader.skip(n),
            Mode::Write { writer } => {
                for _ in 0..n {
                    writer.put_u8(0);
                }
                Ok(())
            }
        }
    }

    /// 读取模式下剩余字节数 (写入模式返回 0)
    pub fn remaining(&self) -> usize {
        match &self.mode {
            Mode::Read { reader, .. } => reader.remaining(),
            Mode::Write { .. } => 0,
        }
    }

    // ========================
    // 子 box 操作
    // ========================

    /// 预扫描剩余负载中的全部子 box (读取模式; 写入模式为空操作)
    pub fn scan_children(&mut self) -> FengResult<()> {
        if let Mode::Read {
            reader,
            children,
            scanned,
        } = &mut self.mode
        {
            if *scanned {
                return Ok(());
            }
            *scanned = true;
            while reader.remaining() >= 8 {
                let header = BoxHeader::read(reader)?;
                let payload_size = if header.size == 0 {
                    reader.remaining() as u64
                } else {
                    header.payload_size()
                };
                if payload_size > reader.remaining() as u64 {
                    return Err(FengError::ParserFailure(format!(
                        "子 box {} 超出父 box 边界",
                        fourcc_str(&header.fourcc)
                    )));
                }
                let payload = reader.read_bytes(payload_size as usize)?;
                children.push(ChildEntry {
                    fourcc: header.fourcc,
                    payload,
                    consumed: false,
                });
            }
        }
        Ok(())
    }

    /// 指定类型的子 box 是否存在 (读取模式)
    pub fn child_exists(&mut self, fourcc: &FourCc) -> FengResult<bool> {
        self.scan_children()?;
        if let Mode::Read { children, .. } = &self.mode {
            Ok(children.iter().any(|c| &c.fourcc == fourcc))
        } else {
            Ok(false)
        }
    }

    /// 读写一个必需的子 box
    pub fn rw_child<T: Mp4Box>(&mut self, child: &mut T) -> FengResult<()> {
        match self.try_rw_child_impl(child)? {
            true => Ok(()),
            false => Err(FengError::ParserFailure(format!(
                "缺少必需的子 box {}",
                fourcc_str(&child.fourcc())
            ))),
        }
    }

    /// 读写一个可选的子 box
    pub fn try_rw_child<T: Mp4Box + Default>(&mut self, child: &mut Option<T>) -> FengResult<()> {
        if self.reading() {
            let mut candidate = T::default();
            if self.try_rw_child_impl(&mut candidate)? {
                *child = Some(candidate);
            }
            Ok(())
        } else if let Some(c) = child {
            self.try_rw_child_impl(c).map(|_| ())
        } else {
            Ok(())
        }
    }

    /// 读写同类型的全部子 box
    pub fn rw_children<T: Mp4Box + Default>(&mut self, items: &mut Vec<T>) -> FengResult<()> {
        if self.reading() {
            self.scan_children()?;
            let template = T::default();
            let fourcc = template.fourcc();
            let alt = template.alternate_fourcc();
            let payloads: Vec<Vec<u8>> = if let Mode::Read { children, .. } = &mut self.mode {
                children
                    .iter_mut()
                    .filter(|c| {
                        !c.consumed && (c.fourcc == fourcc || Some(c.fourcc) == alt)
                    })
                    .map(|c| {
                        c.consumed = true;
                        c.payload.to_vec()
                    })
                    .collect()
            } else {
                Vec::new()
            };
            for payload in payloads {
                let mut item = T::default();
                let mut sub = BoxBuffer::reader(&payload);
                item.read_write(&mut sub)?;
                items.push(item);
            }
            Ok(())
        } else {
            for item in items {
                self.try_rw_child_impl(item)?;
            }
            Ok(())
        }
    }

    fn try_rw_child_impl<T: Mp4Box>(&mut self, child: &mut T) -> FengResult<bool> {
        if self.reading() {
            self.scan_children()?;
            let fourcc = child.fourcc();
            let alt = child.alternate_fourcc();
            let found = if let Mode::Read { children, .. } = &mut self.mode {
                children
                    .iter_mut()
                    .find(|c| !c.consumed && (c.fourcc == fourcc || Some(c.fourcc) == alt))
                    .map(|c| {
                        c.consumed = true;
                        (c.fourcc, c.payload.to_vec())
                    })
            } else {
                None
            };
            match found {
                Some((actual, payload)) => {
                    let mut sub = BoxBuffer::reader(&payload);
                    sub.set_actual_fourcc(actual);
                    child.read_write(&mut sub)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        } else {
            if let Mode::Write { writer } = &mut self.mode {
                write_box(child, writer)?;
            }
            Ok(true)
        }
    }

    /// 读取模式下记录实际匹配到的 fourcc (stco/co64 等双名 box 使用)
    pub(crate) fn set_actual_fourcc(&mut self, fourcc: FourCc) {
        self.actual = Some(fourcc);
    }

    /// 实际匹配到的 fourcc (仅读取模式下由父级填充)
    pub fn actual_fourcc(&self) -> Option<FourCc> {
        self.actual
    }

    /// 把一个 box 值作为子 box 写出 (读取模式下为空操作, 供手工分派的父级使用)
    pub fn write_child<T: Mp4Box>(&mut self, child: &mut T) -> FengResult<()> {
        if let Mode::Write { writer } = &mut self.mode {
            write_box(child, writer)?;
        }
        Ok(())
    }

    /// 取出一个子 box 的原始负载 (透传型 box 使用, 如 pssh 收集)
    pub fn take_child_payloads(&mut self, fourcc: &FourCc) -> FengResult<Vec<Vec<u8>>> {
        self.scan_children()?;
        if let Mode::Read { children, .. } = &mut self.mode {
            Ok(children
                .iter_mut()
                .filter(|c| !c.consumed && &c.fourcc == fourcc)
                .map(|c| {
                    c.consumed = true;
                    c.payload.to_vec()
                })
                .collect())
        } else {
            Ok(Vec::new())
        }
    }
}

/// 把一个 box (含头部) 写入缓冲, 大小字段在负载写完后回填
pub fn write_box<T: Mp4Box + ?Sized>(bx: &mut T, w: &mut BufferWriter) -> FengResult<()> {
    let size_pos = w.len();
    w.put_u32(0);
    w.put_fourcc(&bx.fourcc());
    {
        let mut buf = BoxBuffer::writer(w);
        bx.read_write(&mut buf)?;
    }
    let size = (w.len() - size_pos) as u32;
    w.patch_u32(size_pos, size);
    Ok(())
}

/// 把一个 box 序列化为独立的字节向量
pub fn box_to_vec<T: Mp4Box + ?Sized>(bx: &mut T) -> FengResult<Vec<u8>> {
    let mut w = BufferWriter::new();
    write_box(bx, &mut w)?;
    Ok(w.into_vec())
}

/// 从完整 box 字节 (含头部) 解析出指定类型
pub fn parse_box<T: Mp4Box + Default>(data: &[u8]) -> FengResult<T> {
    let mut r = BufferReader::new(data);
    let header = BoxHeader::read(&mut r)?;
    let mut bx = T::default();
    if header.fourcc != bx.fourcc() && Some(header.fourcc) != bx.alternate_fourcc() {
        return Err(FengError::ParserFailure(format!(
            "期望 box {}, 实际 {}",
            fourcc_str(&bx.fourcc()),
            fourcc_str(&header.fourcc)
        )));
    }
    let payload = r.read_bytes(header.payload_size().min(r.remaining() as u64) as usize)?;
    let mut buf = BoxBuffer::reader(payload);
    buf.set_actual_fourcc(header.fourcc);
    bx.read_write(&mut buf)?;
    Ok(bx)
}
