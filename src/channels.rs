//! Pure helpers over channel listings.
//!
//! Kept apart from [`LndNode`](crate::LndNode) so the set logic can be tested without a daemon.

use std::collections::HashSet;

use crate::lnrpc::{self, channel_point::FundingTxid, pending_channels_response::PendingOpenChannel};
use crate::NodeError;

/// Collects the remote node keys of open channels and, optionally, of pending-open ones.
pub fn remote_pubkeys<'a>(open: &'a [lnrpc::Channel], pending: Option<&'a [PendingOpenChannel]>) -> HashSet<&'a str> {
    let open_keys = open.iter().map(|channel| channel.remote_pubkey.as_str());
    let pending_keys = pending
        .unwrap_or(&[])
        .iter()
        .filter_map(|pending| pending.channel.as_ref())
        .map(|channel| channel.remote_node_pub.as_str());

    open_keys.chain(pending_keys).collect()
}

/// Returns `true` if `pubkey` has an open (or, with `pending`, pending-open) channel.
pub fn has_channel_with(pubkey: &str, open: &[lnrpc::Channel], pending: Option<&[PendingOpenChannel]>) -> bool {
    remote_pubkeys(open, pending).contains(pubkey)
}

/// Parses LND's `<funding txid>:<output index>` notation.
pub fn parse_channel_point(channel_point: &str) -> Result<lnrpc::ChannelPoint, NodeError> {
    let invalid = || NodeError::InvalidChannelPoint { channel_point: channel_point.to_owned(), };

    let (txid, index) = channel_point.split_once(':').ok_or_else(invalid)?;
    if txid.len() != 64 || hex::decode(txid).is_err() {
        return Err(invalid());
    }
    let output_index = index.parse::<u32>().map_err(|_| invalid())?;

    Ok(lnrpc::ChannelPoint {
        funding_txid: Some(FundingTxid::FundingTxidStr(txid.to_owned())),
        output_index,
    })
}
