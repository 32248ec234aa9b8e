//! Pull the fields the forwarding decision needs out of a packet-in.

use thiserror::Error;

use crate::mac::MacAddress;
use crate::ofp_controller::{DatapathId, PacketInEvent};
use crate::packet::{EthernetFrame, FrameError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("packet-in carries no ingress port")]
    MissingInPort,
    #[error("unusable frame: {0}")]
    Frame(#[from] FrameError),
}

/// Addressing of one packet-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    pub switch: DatapathId,
    pub in_port: u32,
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
}

pub fn classify(event: &PacketInEvent) -> Result<Classified, ClassifyError> {
    let in_port = event.packet_in.in_port().ok_or(ClassifyError::MissingInPort)?;
    let frame = EthernetFrame::parse(event.packet_in.input_payload.bytes())?;
    Ok(Classified {
        switch: event.dpid,
        in_port,
        src_mac: frame.dl_src,
        dst_mac: frame.dl_dst,
    })
}
