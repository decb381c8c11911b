//! Phase 2 of a round: ship the payloads sized by the exchanged headers.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::batch::{payload_len, unpack, IncomingBatch, RankPayload};
use crate::algs::wire::WireExchangeHdr;
use crate::delaunay_error::DelaunayError;

/// Exchange payloads and split them into batches, ordered by source rank
/// and then by header order.
pub fn exchange_payloads<C>(
    comm: &C,
    payloads: Vec<RankPayload>,
    incoming: &[Vec<WireExchangeHdr>],
    ndim: usize,
) -> Result<Vec<IncomingBatch>, DelaunayError>
where
    C: Communicator + ?Sized,
{
    let recv_sizes: Vec<usize> = incoming
        .iter()
        .map(|hdrs| hdrs.iter().map(|h| payload_len(h, ndim)).sum())
        .collect();
    let send: Vec<Vec<u8>> = payloads.into_iter().map(RankPayload::into_data).collect();
    let bufs = comm.all_to_all_v(&send, &recv_sizes)?;
    let mut out = Vec::new();
    for (peer, (hdrs, buf)) in incoming.iter().zip(&bufs).enumerate() {
        out.extend(unpack(peer, hdrs, buf, ndim)?);
    }
    Ok(out)
}
