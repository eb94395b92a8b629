//! 索引结构（对应 OLAP Segment V2 index/）
//!
//! - **PagePointer** — 页在文件中的 (offset, size)
//! - **PageIndex**   — 每个 key 页的首行号与 min/max key，查找时先按页剪枝
//! - **BloomFilter** — 双哈希位数组，按期望行数与目标 FPP 定长

use std::io::{Cursor, Read};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::common::{OlapError, Ordinal, Result};

fn corrupt(what: &'static str) -> impl Fn(std::io::Error) -> OlapError {
    move |e| OlapError::Corruption(format!("{what}: {e}"))
}

pub(crate) fn read_bytes(cur: &mut Cursor<&[u8]>, what: &'static str) -> Result<Vec<u8>> {
    let len = cur.read_u32::<LittleEndian>().map_err(corrupt(what))? as usize;
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    if len > remaining {
        return Err(OlapError::Corruption(format!("{what}: length {len} exceeds {remaining}")));
    }
    let mut buf = vec![0u8; len];
    cur.read_exact(&mut buf).map_err(corrupt(what))?;
    Ok(buf)
}

fn write_bytes(out: &mut Vec<u8>, b: &[u8]) -> Result<()> {
    out.write_u32::<LittleEndian>(b.len() as u32)?;
    out.extend_from_slice(b);
    Ok(())
}

/// 追加 CRC32 尾部
fn seal(mut body: Vec<u8>) -> Result<Vec<u8>> {
    let crc = crc32fast::hash(&body);
    body.write_u32::<LittleEndian>(crc)?;
    Ok(body)
}

/// 校验并剥离 CRC32 尾部
fn unseal(data: &[u8]) -> Result<&[u8]> {
    if data.len() < 4 {
        return Err(OlapError::Corruption("index block too short".into()));
    }
    let (body, tail) = data.split_at(data.len() - 4);
    let stored = Cursor::new(tail).read_u32::<LittleEndian>()?;
    if crc32fast::hash(body) != stored {
        return Err(OlapError::ChecksumMismatch);
    }
    Ok(body)
}

// ── Page Pointer ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PagePointer {
    pub offset: u64,
    pub size:   u32,
}

impl PagePointer {
    pub fn new(offset: u64, size: u32) -> Self { Self { offset, size } }

    pub fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.write_u64::<LittleEndian>(self.offset)?;
        out.write_u32::<LittleEndian>(self.size)?;
        Ok(())
    }

    pub fn read_from(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let offset = cur.read_u64::<LittleEndian>().map_err(corrupt("page pointer"))?;
        let size   = cur.read_u32::<LittleEndian>().map_err(corrupt("page pointer"))?;
        Ok(Self { offset, size })
    }
}

// ── Page Index ────────────────────────────────────────────────────────────────

const PAGE_INDEX_MAGIC: u32 = 0x504b_4958; // "PKIX"

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIndexEntry {
    pub pointer:       PagePointer,
    pub first_ordinal: Ordinal,
    pub num_values:    u32,
    pub min_key:       Vec<u8>,
    pub max_key:       Vec<u8>,
}

#[derive(Debug, Default, Clone)]
pub struct PageIndex {
    entries: Vec<PageIndexEntry>,
}

impl PageIndex {
    pub fn add(&mut self, entry: PageIndexEntry) {
        self.entries.push(entry);
    }

    pub fn page_count(&self) -> usize { self.entries.len() }

    pub fn entry(&self, idx: usize) -> Option<&PageIndexEntry> { self.entries.get(idx) }

    /// 第一个 max_key >= key 的页（二分查找）；key 大于所有页时返回 None
    pub fn find_page_for_key(&self, key: &[u8]) -> Option<usize> {
        let idx = self.entries.partition_point(|e| e.max_key.as_slice() < key);
        (idx < self.entries.len()).then_some(idx)
    }

    /// 包含行号 ordinal 的页
    pub fn find_page_for_ordinal(&self, ordinal: Ordinal) -> Option<usize> {
        let pos = self.entries.partition_point(|e| e.first_ordinal <= ordinal);
        if pos == 0 { return None; }
        let e = &self.entries[pos - 1];
        (ordinal - e.first_ordinal < e.num_values).then_some(pos - 1)
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.write_u32::<LittleEndian>(PAGE_INDEX_MAGIC)?;
        out.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for e in &self.entries {
            e.pointer.write_to(&mut out)?;
            out.write_u32::<LittleEndian>(e.first_ordinal)?;
            out.write_u32::<LittleEndian>(e.num_values)?;
            write_bytes(&mut out, &e.min_key)?;
            write_bytes(&mut out, &e.max_key)?;
        }
        seal(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let body = unseal(data)?;
        let mut cur = Cursor::new(body);
        let magic = cur.read_u32::<LittleEndian>().map_err(corrupt("page index"))?;
        if magic != PAGE_INDEX_MAGIC {
            return Err(OlapError::Corruption(format!("bad page index magic {magic:#x}")));
        }
        let n = cur.read_u32::<LittleEndian>().map_err(corrupt("page index"))? as usize;
        let mut entries = Vec::with_capacity(n.min(1 << 16));
        let mut expected_ordinal = 0u32;
        for _ in 0..n {
            let pointer       = PagePointer::read_from(&mut cur)?;
            let first_ordinal = cur.read_u32::<LittleEndian>().map_err(corrupt("page index"))?;
            let num_values    = cur.read_u32::<LittleEndian>().map_err(corrupt("page index"))?;
            let min_key       = read_bytes(&mut cur, "page index min key")?;
            let max_key       = read_bytes(&mut cur, "page index max key")?;
            if first_ordinal != expected_ordinal || min_key > max_key {
                return Err(OlapError::Corruption(format!(
                    "page index entry out of order at ordinal {first_ordinal}",
                )));
            }
            expected_ordinal = first_ordinal.checked_add(num_values).ok_or_else(|| {
                OlapError::Corruption(format!("page index ordinal overflow at {first_ordinal}"))
            })?;
            entries.push(PageIndexEntry { pointer, first_ordinal, num_values, min_key, max_key });
        }
        Ok(Self { entries })
    }
}

// ── Bloom Filter ──────────────────────────────────────────────────────────────

/// 双哈希 Bloom Filter（FNV-1a + splitmix 派生第二哈希）
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits:       Vec<u8>,
    num_bits:   usize,
    num_hashes: u32,
}

impl BloomFilter {
    /// 按期望行数与目标误判率建过滤器：m = -n·ln(p) / ln²2，k = m/n·ln2
    pub fn with_fpp(expected_rows: usize, fpp: f64) -> Self {
        let n   = expected_rows.max(1) as f64;
        let fpp = fpp.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let num_bits   = ((-n * fpp.ln() / (ln2 * ln2)).ceil() as usize).max(64);
        let num_hashes = ((num_bits as f64 / n) * ln2).round().clamp(1.0, 30.0) as u32;
        Self { bits: vec![0u8; (num_bits + 7) / 8], num_bits, num_hashes }
    }

    fn hashes(value: &[u8]) -> (u64, u64) {
        let mut h1: u64 = 0xcbf29ce484222325;
        for &b in value {
            h1 ^= b as u64;
            h1 = h1.wrapping_mul(0x100000001b3);
        }
        let mut h2 = h1.wrapping_add(0x9e3779b97f4a7c15);
        h2 = (h2 ^ (h2 >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        h2 = (h2 ^ (h2 >> 27)).wrapping_mul(0x94d049bb133111eb);
        h2 ^= h2 >> 31;
        (h1, h2 | 1)
    }

    fn probe_bits(&self, value: &[u8]) -> impl Iterator<Item = usize> {
        let (h1, h2) = Self::hashes(value);
        let nb = self.num_bits as u64;
        (0..self.num_hashes as u64)
            .map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % nb) as usize)
    }

    pub fn add(&mut self, value: &[u8]) {
        let bits: Vec<usize> = self.probe_bits(value).collect();
        for bit in bits {
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
    }

    pub fn may_contain(&self, value: &[u8]) -> bool {
        self.probe_bits(value)
            .all(|bit| self.bits[bit / 8] & (1 << (bit % 8)) != 0)
    }

    pub fn num_hashes(&self) -> u32 { self.num_hashes }
    pub fn num_bits(&self) -> usize { self.num_bits }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.bits.len() + 12);
        out.write_u32::<LittleEndian>(self.num_bits as u32)?;
        out.write_u32::<LittleEndian>(self.num_hashes)?;
        out.extend_from_slice(&self.bits);
        seal(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let body = unseal(data)?;
        let mut cur    = Cursor::new(body);
        let num_bits   = cur.read_u32::<LittleEndian>().map_err(corrupt("bloom filter"))? as usize;
        let num_hashes = cur.read_u32::<LittleEndian>().map_err(corrupt("bloom filter"))?;
        let bits       = body[8..].to_vec();
        if num_bits == 0 || num_hashes == 0 || bits.len() != (num_bits + 7) / 8 {
            return Err(OlapError::Corruption(format!(
                "bloom filter header mismatch: num_bits={num_bits} num_hashes={num_hashes} bytes={}",
                bits.len(),
            )));
        }
        Ok(Self { bits, num_bits, num_hashes })
    }
}
