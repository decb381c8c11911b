//! Fixed, versioned, little-endian wire types for placement, exchange and
//! consolidation messages.
//!
//! Records are `#[repr(C)]` bytemuck `Pod` structs whose multi-byte fields
//! are stored pre-LE with `.to_le()` and decoded with `.from_le()`. Variable
//! arrays follow a record as packed little-endian `u32`/`u64` words; `f64`
//! values travel as the LE bit pattern of `f64::to_bits`.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::delaunay_error::DelaunayError;

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 2;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), DelaunayError> {
    if actual == expected {
        Ok(())
    } else {
        Err(DelaunayError::WireDecode(format!("expected {expected} bytes, got {actual}")))
    }
}

/// Decode a packed array of records. The input need not be aligned.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, DelaunayError> {
    let sz = size_of::<T>();
    if bytes.len() % sz != 0 {
        return Err(DelaunayError::WireDecode(format!(
            "{} bytes is not a whole number of {sz}-byte records",
            bytes.len()
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / sz];
    cast_slice_mut(&mut out).copy_from_slice(bytes);
    Ok(out)
}

// ===== Records ==============================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u32,
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u32).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u32::from_le(self.n_le) as usize
    }
}

/// Header of one exchange batch `(src leaf, dst leaf, points, announced)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireExchangeHdr {
    pub src_le: u32,
    pub dst_le: u32,
    pub npts_le: u32,
    pub nneigh_le: u32,
}
impl WireExchangeHdr {
    pub fn new(src: u32, dst: u32, npts: usize, nneigh: usize) -> Self {
        Self {
            src_le: src.to_le(),
            dst_le: dst.to_le(),
            npts_le: (npts as u32).to_le(),
            nneigh_le: (nneigh as u32).to_le(),
        }
    }
    pub fn src(&self) -> u32 {
        u32::from_le(self.src_le)
    }
    pub fn dst(&self) -> u32 {
        u32::from_le(self.dst_le)
    }
    pub fn npts(&self) -> usize {
        u32::from_le(self.npts_le) as usize
    }
    pub fn nneigh(&self) -> usize {
        u32::from_le(self.nneigh_le) as usize
    }
}

/// Header of a leaf snapshot sent during placement.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireLeafHdr {
    pub version_le: u16,
    pub ndim_le: u16,
    pub id_le: u32,
    pub npts_le: u64,
    pub nleaves_le: u32,
    pub nneigh_le: u32,
}
impl WireLeafHdr {
    pub fn new(ndim: usize, id: u32, npts: usize, nleaves: usize, nneigh: usize) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            ndim_le: (ndim as u16).to_le(),
            id_le: id.to_le(),
            npts_le: (npts as u64).to_le(),
            nleaves_le: (nleaves as u32).to_le(),
            nneigh_le: (nneigh as u32).to_le(),
        }
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
    pub fn ndim(&self) -> usize {
        u16::from_le(self.ndim_le) as usize
    }
    pub fn id(&self) -> u32 {
        u32::from_le(self.id_le)
    }
    pub fn npts(&self) -> usize {
        u64::from_le(self.npts_le) as usize
    }
    pub fn nleaves(&self) -> usize {
        u32::from_le(self.nleaves_le) as usize
    }
    pub fn nneigh(&self) -> usize {
        u32::from_le(self.nneigh_le) as usize
    }
}

/// Header of a serialized leaf tessellation sent to the coordinator.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireSerializedHdr {
    pub leaf_le: u32,
    pub ndim_le: u32,
    pub nverts_le: u64,
    pub ncells_le: u64,
    pub sentinel_le: u64,
}
impl WireSerializedHdr {
    pub fn new(leaf: u32, ndim: usize, nverts: u64, ncells: u64, sentinel: u64) -> Self {
        Self {
            leaf_le: leaf.to_le(),
            ndim_le: (ndim as u32).to_le(),
            nverts_le: nverts.to_le(),
            ncells_le: ncells.to_le(),
            sentinel_le: sentinel.to_le(),
        }
    }
    pub fn leaf(&self) -> u32 {
        u32::from_le(self.leaf_le)
    }
    pub fn ndim(&self) -> usize {
        u32::from_le(self.ndim_le) as usize
    }
    pub fn nverts(&self) -> u64 {
        u64::from_le(self.nverts_le)
    }
    pub fn ncells(&self) -> u64 {
        u64::from_le(self.ncells_le)
    }
    pub fn sentinel(&self) -> u64 {
        u64::from_le(self.sentinel_le)
    }
}

const_assert_eq!(size_of::<WireCount>(), 4);
const_assert_eq!(size_of::<WireExchangeHdr>(), 16);
const_assert_eq!(size_of::<WireLeafHdr>(), 24);
const_assert_eq!(size_of::<WireSerializedHdr>(), 32);

// ===== Cursor codec =========================================================

/// Append-only encoder for a record followed by packed arrays.
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: Vec<u8>,
}

impl WireWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Self {
            buf: Vec::with_capacity(n),
        }
    }

    pub fn put<T: Pod>(&mut self, rec: &T) -> &mut Self {
        self.buf.extend_from_slice(bytemuck::bytes_of(rec));
        self
    }

    pub fn put_u32s(&mut self, v: &[u32]) -> &mut Self {
        for x in v {
            self.buf.extend_from_slice(&x.to_le_bytes());
        }
        self
    }

    pub fn put_u64s(&mut self, v: &[u64]) -> &mut Self {
        for x in v {
            self.buf.extend_from_slice(&x.to_le_bytes());
        }
        self
    }

    pub fn put_f64s(&mut self, v: &[f64]) -> &mut Self {
        for x in v {
            self.buf.extend_from_slice(&x.to_bits().to_le_bytes());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Decoder matching [`WireWriter`]; every read is bounds-checked.
#[derive(Debug)]
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DelaunayError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| {
                DelaunayError::WireDecode(format!(
                    "need {n} bytes at offset {}, buffer has {}",
                    self.pos,
                    self.buf.len()
                ))
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn get<T: Pod>(&mut self) -> Result<T, DelaunayError> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn u32s(&mut self, n: usize) -> Result<Vec<u32>, DelaunayError> {
        let bytes = self.take(n.saturating_mul(4))?;
        Ok(bytes
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect())
    }

    pub fn u64s(&mut self, n: usize) -> Result<Vec<u64>, DelaunayError> {
        let bytes = self.take(n.saturating_mul(8))?;
        Ok(bytes.chunks_exact(8).map(le_u64).collect())
    }

    pub fn f64s(&mut self, n: usize) -> Result<Vec<f64>, DelaunayError> {
        let bytes = self.take(n.saturating_mul(8))?;
        Ok(bytes.chunks_exact(8).map(|c| f64::from_bits(le_u64(c))).collect())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Fail unless the whole buffer was consumed.
    pub fn finish(self) -> Result<(), DelaunayError> {
        expect_exact_len(self.buf.len(), self.pos)
    }
}

#[inline]
fn le_u64(c: &[u8]) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(c);
    u64::from_le_bytes(w)
}

/// Pack `f64` values as little-endian bit patterns.
pub fn f64s_to_bytes(v: &[f64]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(v.len() * 8);
    w.put_f64s(v);
    w.finish()
}

pub fn u64s_to_bytes(v: &[u64]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(v.len() * 8);
    w.put_u64s(v);
    w.finish()
}

pub fn u32s_to_bytes(v: &[u32]) -> Vec<u8> {
    let mut w = WireWriter::with_capacity(v.len() * 4);
    w.put_u32s(v);
    w.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_header_records() {
        let hdrs = vec![WireExchangeHdr::new(1, 2, 3, 4), WireExchangeHdr::new(5, 6, 0, 0)];
        let bytes = cast_slice(&hdrs).to_vec();
        // offset by one byte to exercise the unaligned path
        let mut shifted = vec![0u8];
        shifted.extend_from_slice(&bytes);
        let back: Vec<WireExchangeHdr> = decode_records(&shifted[1..]).unwrap();
        assert_eq!((back[0].src(), back[0].dst(), back[0].npts(), back[0].nneigh()), (1, 2, 3, 4));
        assert_eq!(back[1].src(), 5);
        assert!(decode_records::<WireExchangeHdr>(&bytes[..15]).is_err());
    }

    #[test]
    fn cursor_roundtrip() {
        let mut w = WireWriter::new();
        w.put(&WireLeafHdr::new(3, 7, 2, 4, 1))
            .put_u64s(&[10, 11])
            .put_f64s(&[0.5, -0.0, f64::MAX])
            .put_u32s(&[9]);
        let buf = w.finish();
        let mut r = WireReader::new(&buf);
        let hdr: WireLeafHdr = r.get().unwrap();
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!((hdr.ndim(), hdr.id(), hdr.npts(), hdr.nleaves(), hdr.nneigh()), (3, 7, 2, 4, 1));
        assert_eq!(r.u64s(2).unwrap(), vec![10, 11]);
        let f = r.f64s(3).unwrap();
        assert!(f[1].is_sign_negative() && f[2] == f64::MAX);
        assert_eq!(r.u32s(1).unwrap(), vec![9]);
        r.finish().unwrap();
    }

    #[test]
    fn reader_detects_truncation_and_trailing_bytes() {
        let buf = u64s_to_bytes(&[1, 2]);
        let mut r = WireReader::new(&buf);
        assert!(matches!(r.u64s(3), Err(DelaunayError::WireDecode(_))));
        let mut r = WireReader::new(&buf);
        r.u64s(1).unwrap();
        assert!(r.finish().is_err());
    }
}
