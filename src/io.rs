//! 文件读写能力抽象
//!
//! - [`FileWriter`] — 只追加、需显式 close 的写入端（Builder 使用）
//! - [`FileReader`] — 随机访问的区间读取端（Reader 使用），可跨扫描共享
//!
//! 提供本地文件与内存两种实现。

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use crate::common::{OlapError, Result};

pub trait FileWriter {
    fn append(&mut self, data: &[u8]) -> Result<()>;

    /// 已写入的字节数（即下一次 append 的起始偏移）
    fn bytes_appended(&self) -> u64;

    fn close(&mut self) -> Result<()>;
}

pub trait FileReader: Send + Sync {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>>;

    fn size(&self) -> u64;
}

pub type FileReaderPtr = Arc<dyn FileReader>;

impl<W: FileWriter + ?Sized> FileWriter for &mut W {
    fn append(&mut self, data: &[u8]) -> Result<()> { (**self).append(data) }
    fn bytes_appended(&self) -> u64 { (**self).bytes_appended() }
    fn close(&mut self) -> Result<()> { (**self).close() }
}

// ── 本地文件 ──────────────────────────────────────────────────────────────────

pub struct LocalFileWriter {
    path:    PathBuf,
    file:    Option<File>,
    written: u64,
}

impl LocalFileWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self { path, file: Some(file), written: 0 })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl FileWriter for LocalFileWriter {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        let file = self.file.as_mut()
            .ok_or_else(|| OlapError::SegmentIo(format!("{} already closed", self.path.display())))?;
        file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn bytes_appended(&self) -> u64 { self.written }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
            file.sync_all()?;
        }
        Ok(())
    }
}

pub struct LocalFileReader {
    path: PathBuf,
    file: Mutex<File>,
    size: u64,
}

impl LocalFileReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();
        Ok(Self { path, file: Mutex::new(file), size })
    }
}

impl FileReader for LocalFileReader {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset + len as u64 > self.size {
            return Err(OlapError::SegmentIo(format!(
                "read [{offset}, +{len}) beyond end of {} (size={})",
                self.path.display(), self.size,
            )));
        }
        let mut file = self.file.lock()
            .map_err(|_| OlapError::Internal("file lock poisoned".into()))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn size(&self) -> u64 { self.size }
}

// ── 内存文件 ──────────────────────────────────────────────────────────────────

/// 内存文件：写端与读端共享同一块缓冲区
#[derive(Debug, Clone, Default)]
pub struct MemFile {
    data: Arc<RwLock<Vec<u8>>>,
}

impl MemFile {
    pub fn new() -> Self { Self::default() }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data: Arc::new(RwLock::new(data)) }
    }

    pub fn writer(&self) -> MemFileWriter {
        MemFileWriter { file: self.clone(), closed: false }
    }

    pub fn reader(&self) -> FileReaderPtr {
        Arc::new(self.clone())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().map(|d| d.clone()).unwrap_or_default()
    }
}

impl FileReader for MemFile {
    fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let data = self.data.read()
            .map_err(|_| OlapError::Internal("mem file lock poisoned".into()))?;
        let start = offset as usize;
        let end   = start.checked_add(len)
            .filter(|&e| e <= data.len())
            .ok_or_else(|| OlapError::SegmentIo(format!(
                "read [{offset}, +{len}) beyond end of mem file (size={})", data.len(),
            )))?;
        Ok(data[start..end].to_vec())
    }

    fn size(&self) -> u64 {
        self.data.read().map(|d| d.len() as u64).unwrap_or(0)
    }
}

pub struct MemFileWriter {
    file:   MemFile,
    closed: bool,
}

impl FileWriter for MemFileWriter {
    fn append(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(OlapError::SegmentIo("mem file already closed".into()));
        }
        self.file.data.write()
            .map_err(|_| OlapError::Internal("mem file lock poisoned".into()))?
            .extend_from_slice(data);
        Ok(())
    }

    fn bytes_appended(&self) -> u64 { self.file.size() }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
