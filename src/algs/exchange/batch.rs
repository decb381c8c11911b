//! Per-rank packing of outgoing batches and unpacking of received ones.
//!
//! The payload for one peer rank is the concatenation, in header order, of
//! each batch's ids (`u64`), coordinates (`f64`) and announced neighbors
//! (`u32`).

use crate::algs::wire::{cast_slice, WireExchangeHdr, WireReader, WireWriter};
use crate::delaunay_error::DelaunayError;
use crate::leaf::{GlobalId, LeafId, OutgoingBatch};

/// Rank that owns leaf `leaf` in a group of `size` ranks.
#[inline]
pub fn owner_of(leaf: LeafId, size: usize) -> usize {
    leaf as usize % size.max(1)
}

/// Bytes of payload announced by one header.
#[inline]
pub fn payload_len(hdr: &WireExchangeHdr, ndim: usize) -> usize {
    8 * hdr.npts() + 8 * hdr.npts() * ndim + 4 * hdr.nneigh()
}

/// Everything this rank sends to one peer rank in a round.
#[derive(Debug, Default)]
pub struct RankPayload {
    pub headers: Vec<WireExchangeHdr>,
    data: WireWriter,
}

impl RankPayload {
    fn push(&mut self, b: &OutgoingBatch) {
        self.headers
            .push(WireExchangeHdr::new(b.src, b.dst, b.npts(), b.neighbors.len()));
        self.data
            .put_u64s(&b.ids)
            .put_f64s(&b.coords)
            .put_u32s(&b.neighbors);
    }

    pub fn header_bytes(&self) -> Vec<u8> {
        cast_slice(&self.headers).to_vec()
    }

    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data.finish()
    }
}

/// Route batches to the ranks owning their destination leaves. Batches
/// without points carry nothing and are not sent.
pub fn route<'a>(batches: impl IntoIterator<Item = &'a OutgoingBatch>, size: usize) -> Vec<RankPayload> {
    let mut out: Vec<RankPayload> = (0..size).map(|_| RankPayload::default()).collect();
    for b in batches.into_iter().filter(|b| b.npts() > 0) {
        out[owner_of(b.dst, size)].push(b);
    }
    out
}

/// A batch as received by the destination leaf's owner.
#[derive(Clone, Debug, PartialEq)]
pub struct IncomingBatch {
    pub src: LeafId,
    pub dst: LeafId,
    pub ids: Vec<GlobalId>,
    pub coords: Vec<f64>,
    pub neighbors: Vec<LeafId>,
}

/// Split one peer's payload according to its headers.
pub fn unpack(
    peer: usize,
    headers: &[WireExchangeHdr],
    data: &[u8],
    ndim: usize,
) -> Result<Vec<IncomingBatch>, DelaunayError> {
    let expected: usize = headers.iter().map(|h| payload_len(h, ndim)).sum();
    if data.len() != expected {
        return Err(DelaunayError::ProtocolViolation(format!(
            "rank {peer} sent {} payload bytes, its headers announce {expected}",
            data.len()
        )));
    }
    let mut r = WireReader::new(data);
    let mut out = Vec::with_capacity(headers.len());
    for h in headers {
        out.push(IncomingBatch {
            src: h.src(),
            dst: h.dst(),
            ids: r.u64s(h.npts())?,
            coords: r.f64s(h.npts() * ndim)?,
            neighbors: r.u32s(h.nneigh())?,
        });
    }
    r.finish()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(src: LeafId, dst: LeafId, ids: &[u64]) -> OutgoingBatch {
        OutgoingBatch {
            src,
            dst,
            ids: ids.to_vec(),
            coords: ids.iter().flat_map(|&i| [i as f64, -(i as f64)]).collect(),
            neighbors: if ids.is_empty() { vec![] } else { vec![src, 9] },
        }
    }

    #[test]
    fn routes_by_destination_owner() {
        let bs = vec![batch(0, 1, &[1, 2]), batch(0, 2, &[3]), batch(1, 3, &[]), batch(2, 3, &[4])];
        let p = route(&bs, 2);
        assert_eq!(p[0].headers.len(), 1);
        assert_eq!(p[1].headers.len(), 2);
        assert_eq!(p[1].headers[1].dst(), 3);
        assert_eq!(p[1].data_len(), payload_len(&p[1].headers[0], 2) + payload_len(&p[1].headers[1], 2));
    }

    #[test]
    fn unpack_restores_batches() {
        let bs = vec![batch(4, 1, &[7, 8]), batch(5, 3, &[9])];
        let mut p = route(&bs, 1);
        let hdrs = std::mem::take(&mut p[0].headers);
        let data = p.pop().unwrap().into_data();
        let got = unpack(0, &hdrs, &data, 2).unwrap();
        assert_eq!(got[0].ids, vec![7, 8]);
        assert_eq!(got[0].coords, vec![7.0, -7.0, 8.0, -8.0]);
        assert_eq!(got[1].neighbors, vec![5, 9]);
        assert!(matches!(
            unpack(0, &hdrs, &data[..data.len() - 4], 2),
            Err(DelaunayError::ProtocolViolation(_))
        ));
    }
}
