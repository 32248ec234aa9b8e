//! Installs the table-miss rule on every switch that comes up.

use async_trait::async_trait;
use tracing::{error, info};

use crate::error::Result;
use crate::ofp_controller::{SwitchConnection, SwitchUpListener};
use crate::openflow0x04::message::{add_flow, Message};
use crate::openflow0x04::{Action, FlowMod, Pattern, PseudoPort, SwitchFeatures, OFPCML_NO_BUFFER};

/// Priority of the rule that punts unmatched traffic to the controller.
pub const TABLE_MISS_PRIORITY: u16 = 1;

/// Matches everything and sends the whole frame to the controller. Never expires.
pub fn table_miss_flow() -> FlowMod {
    add_flow(
        TABLE_MISS_PRIORITY,
        Pattern::match_all(),
        vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))],
    )
}

pub struct SwitchBootstrapper;

#[async_trait]
impl SwitchUpListener for SwitchBootstrapper {
    async fn switch_up(&self, conn: &SwitchConnection, _: &SwitchFeatures) -> Result<()> {
        match conn.send(Message::FlowMod(table_miss_flow())).await {
            Ok(()) => {
                info!(dpid = %conn.dpid(), "table-miss rule installed");
                Ok(())
            }
            Err(e) => {
                error!(dpid = %conn.dpid(), error = %e, "could not install table-miss rule");
                Err(e)
            }
        }
    }
}
