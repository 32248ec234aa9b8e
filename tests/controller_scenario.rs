//! A simulated switch talking to the controller over TCP.

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use rust_ofp_l2::bootstrap::{table_miss_flow, SwitchBootstrapper};
    use rust_ofp_l2::directory::{DirectoryError, HostLocationDirectory};
    use rust_ofp_l2::learning_switch::{LearningSwitch, LEARNING_SWITCH_PRIORITY};
    use rust_ofp_l2::mac::MacAddress;
    use rust_ofp_l2::ofp_controller::{Controller, DatapathId};
    use rust_ofp_l2::ofp_header::{OfpHeader, Xid};
    use rust_ofp_l2::openflow0x04::message::Message;
    use rust_ofp_l2::openflow0x04::{
        Action, Capabilities, Instruction, PacketIn, PacketInReason, Pattern, Payload, PseudoPort,
        SwitchFeatures, Timeout,
    };

    const AA: MacAddress = MacAddress::new([0x00, 0x00, 0x00, 0x00, 0x00, 0xaa]);
    const BB: MacAddress = MacAddress::new([0x00, 0x00, 0x00, 0x00, 0x00, 0xbb]);
    const WAIT: Duration = Duration::from_secs(5);

    #[derive(Default)]
    struct MemoryDirectory {
        hosts: Mutex<HashMap<(DatapathId, MacAddress), u32>>,
    }

    #[async_trait]
    impl HostLocationDirectory for MemoryDirectory {
        async fn record(&self, switch: DatapathId, mac: MacAddress, port: u32) -> Result<(), DirectoryError> {
            self.hosts.lock().unwrap().insert((switch, mac), port);
            Ok(())
        }

        async fn resolve(&self, switch: DatapathId, mac: MacAddress) -> Option<u32> {
            self.hosts.lock().unwrap().get(&(switch, mac)).copied()
        }
    }

    struct FakeSwitch {
        stream: TcpStream,
        next_xid: Xid,
    }

    impl FakeSwitch {
        async fn connect(controller: Arc<Controller>) -> (FakeSwitch, Arc<Controller>) {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(controller.clone().run(listener));
            let stream = TcpStream::connect(addr).await.unwrap();
            (FakeSwitch { stream, next_xid: 100 }, controller)
        }

        async fn send(&mut self, msg: Message) -> Xid {
            self.next_xid += 1;
            self.reply(self.next_xid, msg).await;
            self.next_xid
        }

        async fn reply(&mut self, xid: Xid, msg: Message) {
            let bytes = Message::marshal(xid, msg).unwrap();
            self.stream.write_all(&bytes).await.unwrap();
        }

        async fn recv(&mut self) -> (Xid, Message) {
            tokio::time::timeout(WAIT, async {
                let mut buf = [0u8; 8];
                self.stream.read_exact(&mut buf).await.unwrap();
                let header = OfpHeader::parse(buf).unwrap();
                let mut body = vec![0u8; header.length() - OfpHeader::size()];
                self.stream.read_exact(&mut body).await.unwrap();
                Message::parse(&header, &body).unwrap()
            })
            .await
            .expect("controller went quiet")
        }

        async fn handshake(&mut self, dpid: u64) {
            assert_eq!(self.recv().await.1, Message::Hello);
            self.send(Message::Hello).await;
            let (xid, msg) = self.recv().await;
            assert_eq!(msg, Message::FeaturesReq);
            let features = SwitchFeatures {
                datapath_id: dpid,
                num_buffers: 256,
                num_tables: 254,
                auxiliary_id: 0,
                supported_capabilities: Capabilities::default(),
            };
            self.reply(xid, Message::FeaturesReply(features)).await;
        }

        async fn packet_in(&mut self, in_port: u32, src: MacAddress, dst: MacAddress) {
            let mut frame = Vec::new();
            frame.extend_from_slice(dst.as_bytes());
            frame.extend_from_slice(src.as_bytes());
            frame.extend_from_slice(&[0x08, 0x00]);
            frame.extend_from_slice(&[0u8; 46]);
            let packet_in = PacketIn {
                total_len: frame.len() as u16,
                input_payload: Payload::NotBuffered(frame),
                reason: PacketInReason::NoMatch,
                table_id: 0,
                cookie: 0,
                pattern: Pattern {
                    in_port: Some(in_port),
                    ..Pattern::default()
                },
            };
            self.send(Message::PacketIn(packet_in)).await;
        }
    }

    fn learning_controller(directory: Arc<MemoryDirectory>) -> Arc<Controller> {
        let mut controller = Controller::new();
        controller.subscribe_switch_up(Arc::new(SwitchBootstrapper));
        controller.register_handler(LEARNING_SWITCH_PRIORITY, Arc::new(LearningSwitch::new(directory)));
        Arc::new(controller)
    }

    #[tokio::test]
    async fn learn_flood_then_unicast() {
        let directory = Arc::new(MemoryDirectory::default());
        let (mut switch, _controller) = FakeSwitch::connect(learning_controller(directory.clone())).await;

        switch.handshake(1).await;
        assert_eq!(switch.recv().await.1, Message::FlowMod(table_miss_flow()));

        switch.packet_in(3, AA, BB).await;
        match switch.recv().await.1 {
            Message::PacketOut(po) => {
                assert_eq!(po.in_port, PseudoPort::PhysicalPort(3));
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::AllPorts)]);
            }
            other => panic!("expected flood, got {:?}", other),
        }
        assert_eq!(directory.resolve(DatapathId(1), AA).await, Some(3));

        switch.packet_in(7, BB, AA).await;
        match switch.recv().await.1 {
            Message::PacketOut(po) => {
                assert_eq!(po.apply_actions, vec![Action::Output(PseudoPort::PhysicalPort(3))]);
                let frame = po.output_payload.bytes();
                assert_eq!(&frame[..6], AA.as_bytes());
                assert_eq!(&frame[6..12], BB.as_bytes());
            }
            other => panic!("expected unicast packet-out, got {:?}", other),
        }
        match switch.recv().await.1 {
            Message::FlowMod(flow) => {
                assert_eq!(flow.priority, 2);
                assert_eq!(flow.pattern.dl_src, Some(BB));
                assert_eq!(flow.pattern.dl_dst, Some(AA));
                assert_eq!(flow.pattern.in_port, None);
                assert_eq!(flow.idle_timeout, Timeout::ExpiresAfter(60));
                assert_eq!(flow.hard_timeout, Timeout::ExpiresAfter(1800));
                assert_eq!(
                    flow.instructions,
                    vec![Instruction::ApplyActions(vec![Action::Output(PseudoPort::PhysicalPort(3))])]
                );
            }
            other => panic!("expected flow-mod, got {:?}", other),
        }
        assert_eq!(directory.resolve(DatapathId(1), BB).await, Some(7));
    }

    #[tokio::test]
    async fn echo_requests_are_answered() {
        let (mut switch, _controller) =
            FakeSwitch::connect(learning_controller(Arc::new(MemoryDirectory::default()))).await;
        switch.handshake(9).await;
        assert_eq!(switch.recv().await.1, Message::FlowMod(table_miss_flow()));

        let xid = switch.send(Message::EchoRequest(b"ping".to_vec())).await;
        assert_eq!(switch.recv().await, (xid, Message::EchoReply(b"ping".to_vec())));
    }

    #[tokio::test]
    async fn old_protocol_versions_are_refused() {
        let (mut switch, _controller) =
            FakeSwitch::connect(learning_controller(Arc::new(MemoryDirectory::default()))).await;
        assert_eq!(switch.recv().await.1, Message::Hello);

        // OpenFlow 1.0 hello.
        switch.stream.write_all(&[0x01, 0, 0, 8, 0, 0, 0, 1]).await.unwrap();
        let mut buf = [0u8; 8];
        let n = tokio::time::timeout(WAIT, switch.stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 0);
    }
}
