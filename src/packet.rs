use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::mac::MacAddress;

/// Failure to read a link-layer header out of a frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame of {0} bytes is shorter than an Ethernet header")]
    Truncated(usize),
    #[error("802.1Q tag truncated in frame of {0} bytes")]
    TruncatedVlan(usize),
}

#[repr(u16)]
enum EthTyp {
    EthTypVLAN = 0x8100,
}

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// 802.1Q tag carried between the source address and the ethertype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    pub vid: u16,
    pub dei: bool,
    pub pcp: u8,
}

/// Represents a packet at the ethernet protocol level.
///
/// Only the header is decoded; the payload stays in the buffer it was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dl_dst: MacAddress,
    pub dl_src: MacAddress,
    pub dl_vlan: Option<VlanTag>,
    pub dl_typ: u16,
}

fn read_mac(bytes: &mut Cursor<&[u8]>) -> std::io::Result<MacAddress> {
    let mut arr = [0u8; 6];
    std::io::Read::read_exact(bytes, &mut arr)?;
    Ok(MacAddress::new(arr))
}

impl EthernetFrame {
    pub fn parse(buf: &[u8]) -> Result<EthernetFrame, FrameError> {
        if buf.len() < ETH_HEADER_LEN {
            return Err(FrameError::Truncated(buf.len()));
        }
        let truncated = |_| FrameError::Truncated(buf.len());
        let mut bytes = Cursor::new(buf);
        let dl_dst = read_mac(&mut bytes).map_err(truncated)?;
        let dl_src = read_mac(&mut bytes).map_err(truncated)?;
        let typ = bytes.read_u16::<BigEndian>().map_err(truncated)?;

        let (dl_vlan, dl_typ) = if typ == EthTyp::EthTypVLAN as u16 {
            if buf.len() < ETH_HEADER_LEN + VLAN_TAG_LEN {
                return Err(FrameError::TruncatedVlan(buf.len()));
            }
            let tci = bytes
                .read_u16::<BigEndian>()
                .map_err(|_| FrameError::TruncatedVlan(buf.len()))?;
            let inner = bytes
                .read_u16::<BigEndian>()
                .map_err(|_| FrameError::TruncatedVlan(buf.len()))?;
            let tag = VlanTag {
                vid: tci & 0xfff,
                dei: tci & 0x1000 != 0,
                pcp: (tci >> 13) as u8,
            };
            (Some(tag), inner)
        } else {
            (None, typ)
        };

        Ok(EthernetFrame {
            dl_dst,
            dl_src,
            dl_vlan,
            dl_typ,
        })
    }
}

#[cfg(test)]
pub(crate) fn ethernet_frame(src: MacAddress, dst: MacAddress, typ: u16, body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(ETH_HEADER_LEN + body.len());
    frame.extend_from_slice(dst.as_bytes());
    frame.extend_from_slice(src.as_bytes());
    frame.extend_from_slice(&typ.to_be_bytes());
    frame.extend_from_slice(body);
    frame
}
