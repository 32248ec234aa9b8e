//! L2 learning switch backed by the host-location directory.
//!
//! Nothing about host locations is kept in process. Every packet-in records
//! its source in the directory and asks the directory where its destination
//! lives; a known destination gets a packet-out plus a flow, anything else is
//! flooded.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::classifier::classify;
use crate::directory::HostLocationDirectory;
use crate::error::Result;
use crate::flow_programmer::FlowProgrammer;
use crate::ofp_controller::{PacketInEvent, PacketInHandler, SwitchConnection};

/// Dispatch priority for `LearningSwitch`. High, so more specific handlers
/// see packet-ins first.
pub const LEARNING_SWITCH_PRIORITY: i32 = 100;

/// What the switch did with one packet-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The frame could not be classified; left for other handlers.
    Rejected,
    /// Group source address. Neither learned nor forwarded.
    Dropped,
    Unicast(u32),
    Flooded,
}

impl Decision {
    pub fn handled(self) -> bool {
        self != Decision::Rejected
    }
}

pub struct LearningSwitch {
    directory: Arc<dyn HostLocationDirectory>,
    programmer: FlowProgrammer,
}

impl LearningSwitch {
    pub fn new(directory: Arc<dyn HostLocationDirectory>) -> LearningSwitch {
        LearningSwitch::with_programmer(directory, FlowProgrammer::default())
    }

    pub fn with_programmer(directory: Arc<dyn HostLocationDirectory>, programmer: FlowProgrammer) -> LearningSwitch {
        LearningSwitch {
            directory,
            programmer,
        }
    }

    /// Run one packet-in through learn, lookup and forward.
    ///
    /// Only failures to talk to the switch are returned; directory trouble
    /// degrades to flooding.
    pub async fn process(&self, event: &PacketInEvent, conn: &SwitchConnection) -> Result<Decision> {
        let fields = match classify(event) {
            Ok(fields) => fields,
            Err(e) => {
                debug!(dpid = %event.dpid, error = %e, "ignoring packet-in");
                return Ok(Decision::Rejected);
            }
        };

        if fields.src_mac.is_multicast() {
            info!(dpid = %fields.switch, src = %fields.src_mac, "dropping frame with group source address");
            return Ok(Decision::Dropped);
        }

        if let Err(e) = self
            .directory
            .record(fields.switch, fields.src_mac, fields.in_port)
            .await
        {
            warn!(dpid = %fields.switch, mac = %fields.src_mac, port = fields.in_port, error = %e,
                  "failed to record host location");
        }

        match self.directory.resolve(fields.switch, fields.dst_mac).await {
            Some(port) => {
                debug!(dpid = %fields.switch, src = %fields.src_mac, dst = %fields.dst_mac, port,
                       "forwarding to known host");
                self.programmer.unicast(conn, port, event, &fields).await?;
                Ok(Decision::Unicast(port))
            }
            None => {
                debug!(dpid = %fields.switch, src = %fields.src_mac, dst = %fields.dst_mac,
                       "destination unknown, flooding");
                self.programmer.broadcast(conn, event, &fields).await?;
                Ok(Decision::Flooded)
            }
        }
    }
}

#[async_trait]
impl PacketInHandler for LearningSwitch {
    async fn packet_in(&self, event: &PacketInEvent, conn: &SwitchConnection) -> Result<bool> {
        self.process(event, conn).await.map(Decision::handled)
    }
}
