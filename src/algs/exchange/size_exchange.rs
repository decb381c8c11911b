//! Phase 1 of a round: every rank learns which batches are headed its way.
//!
//! A fixed-length all-to-all of header counts sizes the receive side of a
//! variable-length all-to-all of the [`WireExchangeHdr`] records themselves.

use std::mem::size_of;

use crate::algs::communicator::Communicator;
use crate::algs::exchange::batch::RankPayload;
use crate::algs::wire::{decode_records, WireExchangeHdr};
use crate::delaunay_error::DelaunayError;

/// Exchange batch headers; returns, per source rank, the headers of the
/// batches that rank is about to send here.
pub fn exchange_headers<C>(comm: &C, payloads: &[RankPayload]) -> Result<Vec<Vec<WireExchangeHdr>>, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let counts: Vec<u64> = payloads.iter().map(|p| p.headers.len() as u64).collect();
    let incoming = comm.all_to_all_counts(&counts)?;
    let recv_sizes: Vec<usize> = incoming
        .iter()
        .map(|&n| n as usize * size_of::<WireExchangeHdr>())
        .collect();
    let send: Vec<Vec<u8>> = payloads.iter().map(RankPayload::header_bytes).collect();
    let bufs = comm.all_to_all_v(&send, &recv_sizes)?;
    bufs.iter()
        .zip(&incoming)
        .enumerate()
        .map(|(peer, (buf, &n))| {
            let hdrs: Vec<WireExchangeHdr> = decode_records(buf)?;
            if hdrs.len() != n as usize {
                return Err(DelaunayError::ProtocolViolation(format!(
                    "rank {peer} announced {n} headers and sent {}",
                    hdrs.len()
                )));
            }
            Ok(hdrs)
        })
        .collect()
}
