//! Turns forwarding decisions into OpenFlow messages.

use crate::classifier::Classified;
use crate::error::Result;
use crate::mac::MacAddress;
use crate::ofp_controller::{PacketInEvent, SwitchConnection};
use crate::openflow0x04::message::{add_flow, Message};
use crate::openflow0x04::{
    Action, FlowMod, PacketOut, Pattern, Payload, PseudoPort, Timeout, OFPCML_NO_BUFFER,
};

/// Priority of flows learned from traffic. Sits above the table-miss rule.
pub const LEARNED_FLOW_PRIORITY: u16 = 2;
pub const LEARNED_IDLE_TIMEOUT: u16 = 60;
pub const LEARNED_HARD_TIMEOUT: u16 = 1800;

/// Emits packet-outs and learned flows on a switch connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowProgrammer {
    pub priority: u16,
    pub idle_timeout: u16,
    pub hard_timeout: u16,
}

impl Default for FlowProgrammer {
    fn default() -> FlowProgrammer {
        FlowProgrammer {
            priority: LEARNED_FLOW_PRIORITY,
            idle_timeout: LEARNED_IDLE_TIMEOUT,
            hard_timeout: LEARNED_HARD_TIMEOUT,
        }
    }
}

impl FlowProgrammer {
    /// Flow sending traffic from `src` to `dst` out of `out_port`.
    ///
    /// Matches only on the address pair, so the rule holds whatever port the
    /// source later shows up on.
    pub fn learned_flow(&self, src: MacAddress, dst: MacAddress, out_port: u32) -> FlowMod {
        let pattern = Pattern {
            dl_src: Some(src),
            dl_dst: Some(dst),
            ..Pattern::default()
        };
        let mut flow = add_flow(
            self.priority,
            pattern,
            vec![Action::Output(PseudoPort::PhysicalPort(out_port))],
        );
        flow.idle_timeout = Timeout::ExpiresAfter(self.idle_timeout);
        flow.hard_timeout = Timeout::ExpiresAfter(self.hard_timeout);
        flow
    }

    /// Deliver the current frame to `target_port`, then install the learned
    /// flow for its address pair. The packet-out goes first so this frame is
    /// not delayed behind the flow installation.
    pub async fn unicast(
        &self,
        conn: &SwitchConnection,
        target_port: u32,
        event: &PacketInEvent,
        fields: &Classified,
    ) -> Result<()> {
        let packet_out = PacketOut {
            output_payload: Payload::NotBuffered(event.packet_in.input_payload.bytes().to_vec()),
            in_port: PseudoPort::Controller(OFPCML_NO_BUFFER),
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(target_port))],
        };
        conn.send(Message::PacketOut(packet_out)).await?;
        let flow = self.learned_flow(fields.src_mac, fields.dst_mac, target_port);
        conn.send(Message::FlowMod(flow)).await
    }

    /// Send the current frame out of every port but the one it arrived on.
    /// No flow is installed.
    pub async fn broadcast(
        &self,
        conn: &SwitchConnection,
        event: &PacketInEvent,
        fields: &Classified,
    ) -> Result<()> {
        let packet_out = PacketOut {
            output_payload: Payload::NotBuffered(event.packet_in.input_payload.bytes().to_vec()),
            in_port: PseudoPort::PhysicalPort(fields.in_port),
            apply_actions: vec![Action::Output(PseudoPort::AllPorts)],
        };
        conn.send(Message::PacketOut(packet_out)).await
    }
}
