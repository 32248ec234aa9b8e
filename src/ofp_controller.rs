//! OpenFlow 1.3 controller runtime.
//!
//! Each switch connection gets a reader loop and a writer task joined by a
//! bounded channel. The reader performs the handshake, answers echo requests,
//! announces the switch to every `SwitchUpListener` once its features are
//! known, and hands each packet-in to the registered `PacketInHandler`s on a
//! task of its own.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, Result};
use crate::ofp_header::{OfpHeader, Xid};
use crate::ofp_message::OfpSerializationError;
use crate::openflow0x04::message::Message;
use crate::openflow0x04::{PacketIn, SwitchFeatures};

const WRITING_CHANNEL_SIZE: usize = 1000;

/// Datapath identifier reported by a switch in its features reply.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DatapathId(pub u64);

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Handle for sending messages to one switch.
///
/// Cheap to clone; every clone feeds the same writer task. Once the switch
/// disconnects, `send` fails with `ControllerError::ConnectionClosed`.
#[derive(Clone, Debug)]
pub struct SwitchConnection {
    dpid: DatapathId,
    writer: mpsc::Sender<(Xid, Message)>,
    next_xid: Arc<AtomicU32>,
}

impl SwitchConnection {
    pub fn new(dpid: DatapathId, writer: mpsc::Sender<(Xid, Message)>) -> SwitchConnection {
        SwitchConnection {
            dpid,
            writer,
            next_xid: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn dpid(&self) -> DatapathId {
        self.dpid
    }

    /// Queue `message` under a fresh transaction id.
    pub async fn send(&self, message: Message) -> Result<()> {
        let xid = self.next_xid.fetch_add(1, Ordering::Relaxed);
        self.send_with_xid(xid, message).await
    }

    async fn send_with_xid(&self, xid: Xid, message: Message) -> Result<()> {
        self.writer
            .send((xid, message))
            .await
            .map_err(|_| ControllerError::ConnectionClosed(self.dpid))
    }
}

/// A packet the switch sent up, tagged with the switch it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketInEvent {
    pub dpid: DatapathId,
    pub packet_in: PacketIn,
}

/// Notified once per connection, after the features reply and before any
/// packet-in from that switch is dispatched.
#[async_trait]
pub trait SwitchUpListener: Send + Sync {
    async fn switch_up(&self, conn: &SwitchConnection, features: &SwitchFeatures) -> Result<()>;
}

/// Packet-in consumer. Returning `Ok(true)` stops dispatch to later handlers.
#[async_trait]
pub trait PacketInHandler: Send + Sync {
    async fn packet_in(&self, event: &PacketInEvent, conn: &SwitchConnection) -> Result<bool>;
}

/// Accepts switch connections and routes their events to applications.
#[derive(Default)]
pub struct Controller {
    switch_up_listeners: Vec<Arc<dyn SwitchUpListener>>,
    packet_in_handlers: Vec<(i32, Arc<dyn PacketInHandler>)>,
}

impl Controller {
    pub fn new() -> Controller {
        Controller::default()
    }

    /// Listeners run in subscription order.
    pub fn subscribe_switch_up(&mut self, listener: Arc<dyn SwitchUpListener>) {
        self.switch_up_listeners.push(listener);
    }

    /// Handlers run in ascending `priority`; equal priorities keep
    /// registration order.
    pub fn register_handler(&mut self, priority: i32, handler: Arc<dyn PacketInHandler>) {
        self.packet_in_handlers.push((priority, handler));
        self.packet_in_handlers.sort_by_key(|(priority, _)| *priority);
    }

    /// Offer `event` to each handler until one claims it. Returns whether any did.
    pub async fn dispatch_packet_in(&self, event: &PacketInEvent, conn: &SwitchConnection) -> bool {
        for (priority, handler) in &self.packet_in_handlers {
            match handler.packet_in(event, conn).await {
                Ok(true) => return true,
                Ok(false) => (),
                Err(e) => {
                    warn!(dpid = %event.dpid, priority, error = %e, "packet-in handler failed");
                    return false;
                }
            }
        }
        debug!(dpid = %event.dpid, "packet-in left unhandled");
        false
    }

    /// Accept switches on `listener` until the task is dropped.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = ?listener.local_addr()?, "Waiting for switches");
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            info!(%peer, "New device connected");
            let controller = self.clone();
            tokio::spawn(async move {
                match controller.handle_client_connected(stream).await {
                    Ok(()) => info!(%peer, "Device disconnected"),
                    Err(e) => warn!(%peer, error = %e, "Device connection ended with error"),
                }
            });
        }
    }

    /// Perform the handshake and process messages from `stream` until the
    /// switch goes away.
    pub async fn handle_client_connected(self: Arc<Self>, stream: TcpStream) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();
        let (tx, rx) = mpsc::channel(WRITING_CHANNEL_SIZE);
        tokio::spawn(write_messages(writer, rx));

        tx.send((0, Message::Hello))
            .await
            .map_err(|_| ControllerError::Handshake("writer closed before hello".to_string()))?;

        let mut conn: Option<SwitchConnection> = None;
        while let Some((header, body)) = read_frame(&mut reader).await? {
            let (xid, message) = match Message::parse(&header, &body) {
                Ok(parsed) => parsed,
                Err(OfpSerializationError::UnsupportedVersion { version }) if conn.is_none() => {
                    return Err(ControllerError::Handshake(format!(
                        "switch speaks OpenFlow version {:#04x}",
                        version
                    )));
                }
                Err(e) => {
                    warn!(error = %e, xid = header.xid(), "dropping unparseable message");
                    continue;
                }
            };
            match message {
                Message::Hello => {
                    debug!("Received Hello message, sending a Features Req");
                    send_raw(&tx, xid, Message::FeaturesReq).await?;
                }
                Message::EchoRequest(bytes) => send_raw(&tx, xid, Message::EchoReply(bytes)).await?,
                Message::EchoReply(_) => (),
                Message::Error(err) => {
                    warn!(typ = err.typ, code = err.code, xid, "switch reported an error");
                }
                Message::FeaturesReply(feats) => {
                    if conn.is_some() {
                        warn!(dpid = %DatapathId(feats.datapath_id), "ignoring repeated features reply");
                        continue;
                    }
                    let switch = SwitchConnection::new(DatapathId(feats.datapath_id), tx.clone());
                    info!(dpid = %switch.dpid(), tables = feats.num_tables, "Switch up");
                    self.announce_switch_up(&switch, &feats).await?;
                    conn = Some(switch);
                }
                Message::PacketIn(packet_in) => match conn {
                    Some(ref switch) => {
                        let event = PacketInEvent {
                            dpid: switch.dpid(),
                            packet_in,
                        };
                        let controller = self.clone();
                        let switch = switch.clone();
                        tokio::spawn(async move {
                            controller.dispatch_packet_in(&event, &switch).await;
                        });
                    }
                    None => warn!("packet-in before features reply, dropping"),
                },
                other => debug!(message = ?other, "ignoring message"),
            }
        }
        if let Some(switch) = conn {
            info!(dpid = %switch.dpid(), "Switch down");
        }
        Ok(())
    }

    async fn announce_switch_up(&self, conn: &SwitchConnection, features: &SwitchFeatures) -> Result<()> {
        for listener in &self.switch_up_listeners {
            if let Err(e) = listener.switch_up(conn, features).await {
                error!(dpid = %conn.dpid(), error = %e, "switch setup failed, dropping connection");
                return Err(e);
            }
        }
        Ok(())
    }
}

async fn send_raw(tx: &mpsc::Sender<(Xid, Message)>, xid: Xid, message: Message) -> Result<()> {
    tx.send((xid, message))
        .await
        .map_err(|_| ControllerError::Handshake("writer closed".to_string()))
}

/// Read one OpenFlow frame. `Ok(None)` on a clean end of stream.
async fn read_frame(reader: &mut OwnedReadHalf) -> Result<Option<(OfpHeader, Vec<u8>)>> {
    let mut buf = [0u8; 8];
    match reader.read_exact(&mut buf).await {
        Ok(_) => (),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = OfpHeader::parse(buf)?;
    let mut body = vec![0u8; header.length() - OfpHeader::size()];
    reader.read_exact(&mut body).await?;
    Ok(Some((header, body)))
}

async fn write_messages(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<(Xid, Message)>) {
    while let Some((xid, message)) = rx.recv().await {
        let bytes = match Message::marshal(xid, message) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(xid, error = %e, "failed to encode message");
                continue;
            }
        };
        if let Err(e) = writer.write_all(&bytes).await {
            warn!(error = %e, "write to switch failed");
            break;
        }
    }
}
