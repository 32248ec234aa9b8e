use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::mac::MacAddress;
use crate::ofp_header::OPENFLOW_0_04_VERSION;
use crate::ofp_message::OfpSerializationError;

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, OfpSerializationError>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: Self, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError>;
}

/// OpenFlow 1.3 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Experimenter,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    GroupMod,
    PortMod,
    TableMod,
    MultipartReq,
    MultipartResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
    RoleReq,
    RoleResp,
    GetAsyncReq,
    GetAsyncResp,
    SetAsync,
    MeterMod,
}

impl TryFrom<u8> for MsgCode {
    type Error = OfpSerializationError;

    fn try_from(code: u8) -> Result<MsgCode, OfpSerializationError> {
        use self::MsgCode::*;
        const CODES: [MsgCode; 30] = [
            Hello,
            Error,
            EchoReq,
            EchoResp,
            Experimenter,
            FeaturesReq,
            FeaturesResp,
            GetConfigReq,
            GetConfigResp,
            SetConfig,
            PacketIn,
            FlowRemoved,
            PortStatus,
            PacketOut,
            FlowMod,
            GroupMod,
            PortMod,
            TableMod,
            MultipartReq,
            MultipartResp,
            BarrierReq,
            BarrierResp,
            QueueGetConfigReq,
            QueueGetConfigResp,
            RoleReq,
            RoleResp,
            GetAsyncReq,
            GetAsyncResp,
            SetAsync,
            MeterMod,
        ];
        CODES
            .get(code as usize)
            .copied()
            .ok_or(OfpSerializationError::UnsupportedMessageCode {
                version: OPENFLOW_0_04_VERSION,
                code,
            })
    }
}

/// Buffer id meaning "the frame travels in the message itself".
pub const OFP_NO_BUFFER: u32 = 0xffff_ffff;
/// `max_len` asking the switch to send the whole frame to the controller.
pub const OFPCML_NO_BUFFER: u16 = 0xffff;
const OFPG_ANY: u32 = 0xffff_ffff;

fn remaining(bytes: &Cursor<&[u8]>) -> usize {
    bytes.get_ref().len().saturating_sub(bytes.position() as usize)
}

fn truncated(field: &str, wanted: usize, left: usize) -> OfpSerializationError {
    OfpSerializationError::ParsingError {
        message: format!("{} needs {} bytes, {} left", field, wanted, left),
    }
}

fn consume(bytes: &mut Cursor<&[u8]>, count: usize) -> Result<(), OfpSerializationError> {
    let left = remaining(bytes);
    if left < count {
        return Err(truncated("padding", count, left));
    }
    bytes.set_position(bytes.position() + count as u64);
    Ok(())
}

fn take<'a>(
    bytes: &mut Cursor<&'a [u8]>,
    count: usize,
    field: &str,
) -> Result<&'a [u8], OfpSerializationError> {
    let left = remaining(bytes);
    if left < count {
        return Err(truncated(field, count, left));
    }
    let buf: &'a [u8] = *bytes.get_ref();
    let start = bytes.position() as usize;
    bytes.set_position((start + count) as u64);
    Ok(&buf[start..start + count])
}

fn rest<'a>(bytes: &Cursor<&'a [u8]>) -> &'a [u8] {
    let buf: &'a [u8] = *bytes.get_ref();
    buf.get(bytes.position() as usize..).unwrap_or(&[])
}

fn write_padding_bytes(bytes: &mut Vec<u8>, count: usize) {
    bytes.resize(bytes.len() + count, 0);
}

/// Bytes needed to round `len` up to a multiple of 8.
fn pad_len(len: usize) -> usize {
    (len + 7) / 8 * 8 - len
}

/// Reserved port numbers.
#[repr(u32)]
#[derive(Copy, Clone, Debug)]
pub enum OfpPort {
    OFPPMax = 0xffff_ff00,
    OFPPInPort = 0xffff_fff8,
    OFPPTable = 0xffff_fff9,
    OFPPNormal = 0xffff_fffa,
    OFPPFlood = 0xffff_fffb,
    OFPPAll = 0xffff_fffc,
    OFPPController = 0xffff_fffd,
    OFPPLocal = 0xffff_fffe,
    OFPPAny = 0xffff_ffff,
}

/// Port behavior.
///
/// `Controller` carries the number of frame bytes the switch should send up.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u32),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u16),
    Local,
}

impl PseudoPort {
    /// Decode a port number, mapping `OFPP_ANY` to `None`.
    pub fn of_int(p: u32) -> Result<Option<PseudoPort>, OfpSerializationError> {
        if p == OfpPort::OFPPAny as u32 {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    pub fn make(p: u32, len: u16) -> Result<PseudoPort, OfpSerializationError> {
        let res = match p {
            p if p == OfpPort::OFPPInPort as u32 => PseudoPort::InPort,
            p if p == OfpPort::OFPPTable as u32 => PseudoPort::Table,
            p if p == OfpPort::OFPPNormal as u32 => PseudoPort::Normal,
            p if p == OfpPort::OFPPFlood as u32 => PseudoPort::Flood,
            p if p == OfpPort::OFPPAll as u32 => PseudoPort::AllPorts,
            p if p == OfpPort::OFPPController as u32 => PseudoPort::Controller(len),
            p if p == OfpPort::OFPPLocal as u32 => PseudoPort::Local,
            p if p <= OfpPort::OFPPMax as u32 => PseudoPort::PhysicalPort(p),
            _ => {
                return Err(OfpSerializationError::UnexpectedValueError {
                    value: format!("{:x}", p),
                    field: "port number".to_string(),
                    message: "".to_string(),
                })
            }
        };
        Ok(res)
    }

    pub fn to_int(&self) -> u32 {
        match *self {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u32,
            PseudoPort::Table => OfpPort::OFPPTable as u32,
            PseudoPort::Normal => OfpPort::OFPPNormal as u32,
            PseudoPort::Flood => OfpPort::OFPPFlood as u32,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u32,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u32,
            PseudoPort::Local => OfpPort::OFPPLocal as u32,
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput = 0,
}

const OFP_ACTION_OUTPUT_LEN: usize = 16;

impl Action {
    fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => OFP_ACTION_OUTPUT_LEN,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Action, OfpSerializationError> {
        let action_code = bytes.read_u16::<BigEndian>()?;
        let len = bytes.read_u16::<BigEndian>()? as usize;
        if action_code != OfpActionType::OFPATOutput as u16 || len != OFP_ACTION_OUTPUT_LEN {
            return Err(OfpSerializationError::UnexpectedValueError {
                value: format!("type {} len {}", action_code, len),
                field: "action".to_string(),
                message: "action list".to_string(),
            });
        }
        let port_code = bytes.read_u32::<BigEndian>()?;
        let max_len = bytes.read_u16::<BigEndian>()?;
        consume(bytes, 6)?;
        Ok(Action::Output(PseudoPort::make(port_code, max_len)?))
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Action>, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let mut actions = vec![];
        while remaining(&bytes) > 0 {
            actions.push(Action::parse(&mut bytes)?);
        }
        Ok(actions)
    }

    fn move_controller_last(acts: Vec<Action>) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .into_iter()
            .partition(|act| matches!(act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: Action, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        match act {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(OfpActionType::OFPATOutput as u16)?;
                bytes.write_u16::<BigEndian>(OFP_ACTION_OUTPUT_LEN as u16)?;
                bytes.write_u32::<BigEndian>(pp.to_int())?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w,
                    _ => 0,
                })?;
                write_padding_bytes(bytes, 6);
            }
        }
        Ok(())
    }
}

/// Instructions attached to a flow entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    ApplyActions(Vec<Action>),
}

const OFPIT_APPLY_ACTIONS: u16 = 4;
const OFP_INSTRUCTION_HEADER_LEN: usize = 8;

impl Instruction {
    fn size_of(i: &Instruction) -> usize {
        match *i {
            Instruction::ApplyActions(ref acts) => {
                OFP_INSTRUCTION_HEADER_LEN + Action::size_of_sequence(acts)
            }
        }
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Instruction>, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let mut instructions = vec![];
        while remaining(&bytes) > 0 {
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if typ != OFPIT_APPLY_ACTIONS || len < OFP_INSTRUCTION_HEADER_LEN {
                return Err(OfpSerializationError::UnexpectedValueError {
                    value: format!("type {} len {}", typ, len),
                    field: "instruction".to_string(),
                    message: "flow mod".to_string(),
                });
            }
            consume(&mut bytes, 4)?;
            let actions = take(&mut bytes, len - OFP_INSTRUCTION_HEADER_LEN, "apply actions")?;
            instructions.push(Instruction::ApplyActions(Action::parse_sequence(actions)?));
        }
        Ok(instructions)
    }

    fn marshal(i: Instruction, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let len = Instruction::size_of(&i);
        match i {
            Instruction::ApplyActions(acts) => {
                bytes.write_u16::<BigEndian>(OFPIT_APPLY_ACTIONS)?;
                bytes.write_u16::<BigEndian>(len as u16)?;
                write_padding_bytes(bytes, 4);
                for act in Action::move_controller_last(acts) {
                    if act == Action::Output(PseudoPort::Table) {
                        return Err(OfpSerializationError::UnexpectedValueError {
                            value: "OFPP_TABLE".to_string(),
                            field: "output port".to_string(),
                            message: "flow mod".to_string(),
                        });
                    }
                    Action::marshal(act, bytes)?;
                }
            }
        }
        Ok(())
    }
}

const OFPMT_OXM: u16 = 1;
const OFPXMC_OPENFLOW_BASIC: u16 = 0x8000;

#[repr(u8)]
enum OxmField {
    InPort = 0,
    EthDst = 3,
    EthSrc = 4,
}

fn oxm_header(field: OxmField, len: u8) -> u32 {
    ((OFPXMC_OPENFLOW_BASIC as u32) << 16) | ((field as u32) << 9) | len as u32
}

/// Fields to match against flows.
///
/// Absent fields are wildcarded, so `Pattern::match_all()` matches every frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u32>,
    pub dl_dst: Option<MacAddress>,
    pub dl_src: Option<MacAddress>,
}

impl Pattern {
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Unpadded `ofp_match` length, as carried in its `length` field.
    fn match_len(p: &Pattern) -> usize {
        4 + p.in_port.map_or(0, |_| 8) + p.dl_dst.map_or(0, |_| 10) + p.dl_src.map_or(0, |_| 10)
    }

    fn size_of(p: &Pattern) -> usize {
        let len = Pattern::match_len(p);
        len + pad_len(len)
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern, OfpSerializationError> {
        let typ = bytes.read_u16::<BigEndian>()?;
        let length = bytes.read_u16::<BigEndian>()? as usize;
        if typ != OFPMT_OXM || length < 4 {
            return Err(OfpSerializationError::UnexpectedValueError {
                value: format!("type {} len {}", typ, length),
                field: "match".to_string(),
                message: "ofp_match".to_string(),
            });
        }
        let fields = take(bytes, length - 4, "oxm fields")?;
        consume(bytes, pad_len(length))?;

        let mut oxm = Cursor::new(fields);
        let mut pattern = Pattern::match_all();
        while remaining(&oxm) > 0 {
            let header = oxm.read_u32::<BigEndian>()?;
            let class = (header >> 16) as u16;
            let field = ((header >> 9) & 0x7f) as u8;
            let has_mask = header & 0x100 != 0;
            let len = (header & 0xff) as usize;
            let value = take(&mut oxm, len, "oxm value")?;
            if class != OFPXMC_OPENFLOW_BASIC || has_mask {
                continue;
            }
            match (field, len) {
                (f, 4) if f == OxmField::InPort as u8 => {
                    let mut arr = [0u8; 4];
                    arr.copy_from_slice(value);
                    pattern.in_port = Some(u32::from_be_bytes(arr));
                }
                (f, 6) if f == OxmField::EthDst as u8 => {
                    let mut arr = [0u8; 6];
                    arr.copy_from_slice(value);
                    pattern.dl_dst = Some(MacAddress::new(arr));
                }
                (f, 6) if f == OxmField::EthSrc as u8 => {
                    let mut arr = [0u8; 6];
                    arr.copy_from_slice(value);
                    pattern.dl_src = Some(MacAddress::new(arr));
                }
                _ => (),
            }
        }
        Ok(pattern)
    }

    fn marshal(p: Pattern, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        let len = Pattern::match_len(&p);
        bytes.write_u16::<BigEndian>(OFPMT_OXM)?;
        bytes.write_u16::<BigEndian>(len as u16)?;
        if let Some(port) = p.in_port {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::InPort, 4))?;
            bytes.write_u32::<BigEndian>(port)?;
        }
        if let Some(mac) = p.dl_dst {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::EthDst, 6))?;
            bytes.extend_from_slice(mac.as_bytes());
        }
        if let Some(mac) = p.dl_src {
            bytes.write_u32::<BigEndian>(oxm_header(OxmField::EthSrc, 6))?;
            bytes.extend_from_slice(mac.as_bytes());
        }
        write_padding_bytes(bytes, pad_len(len));
        Ok(())
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    pub fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    pub fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub group_stats: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub port_blocked: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        let test = |bit: u32| (d >> bit) & 1 == 1;
        Capabilities {
            flow_stats: test(0),
            table_stats: test(1),
            port_stats: test(2),
            group_stats: test(3),
            ip_reasm: test(5),
            queue_stats: test(6),
            port_blocked: test(8),
        }
    }

    fn to_int(c: &Capabilities) -> u32 {
        [
            (c.flow_stats, 0u32),
            (c.table_stats, 1),
            (c.port_stats, 2),
            (c.group_stats, 3),
            (c.ip_reasm, 5),
            (c.queue_stats, 6),
            (c.port_blocked, 8),
        ]
        .iter()
        .filter(|&&(set, _)| set)
        .fold(0u32, |acc, &(_, bit)| acc | (1 << bit))
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub auxiliary_id: u8,
    pub supported_capabilities: Capabilities,
}

const OFP_SWITCH_FEATURES_LEN: usize = 24;

impl MessageType for SwitchFeatures {
    fn size_of(_: &SwitchFeatures) -> usize {
        OFP_SWITCH_FEATURES_LEN
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        let auxiliary_id = bytes.read_u8()?;
        consume(&mut bytes, 2)?;
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        consume(&mut bytes, 4)?;
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            auxiliary_id,
            supported_capabilities,
        })
    }

    fn marshal(sf: SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.write_u8(sf.auxiliary_id)?;
        write_padding_bytes(bytes, 2);
        bytes.write_u32::<BigEndian>(Capabilities::to_int(&sf.supported_capabilities))?;
        write_padding_bytes(bytes, 4);
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl TryFrom<u8> for FlowModCmd {
    type Error = OfpSerializationError;

    fn try_from(code: u8) -> Result<FlowModCmd, OfpSerializationError> {
        match code {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(OfpSerializationError::UnexpectedValueError {
                value: c.to_string(),
                field: "command".to_string(),
                message: "flow mod".to_string(),
            }),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub table_id: u8,
    pub pattern: Pattern,
    pub priority: u16,
    pub instructions: Vec<Instruction>,
    pub cookie: u64,
    pub cookie_mask: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub out_group: Option<u32>,
    pub check_overlap: bool,
}

const OFP_FLOW_MOD_LEN: usize = 40;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        (if check_overlap { 1 << 1 } else { 0 }) | (if notify_when_removed { 1 << 0 } else { 0 })
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        2 & flags != 0
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        1 & flags != 0
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        OFP_FLOW_MOD_LEN
            + Pattern::size_of(&msg.pattern)
            + msg.instructions.iter().map(Instruction::size_of).sum::<usize>()
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let cookie = bytes.read_u64::<BigEndian>()?;
        let cookie_mask = bytes.read_u64::<BigEndian>()?;
        let table_id = bytes.read_u8()?;
        let command = FlowModCmd::try_from(bytes.read_u8()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u32::<BigEndian>()?)?;
        let out_group = bytes.read_u32::<BigEndian>()?;
        let flags = bytes.read_u16::<BigEndian>()?;
        consume(&mut bytes, 2)?;
        let pattern = Pattern::parse(&mut bytes)?;
        let instructions = Instruction::parse_sequence(rest(&bytes))?;
        Ok(FlowMod {
            command,
            table_id,
            pattern,
            priority,
            instructions,
            cookie,
            cookie_mask,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: match buffer_id {
                OFP_NO_BUFFER => None,
                n => Some(n),
            },
            out_port,
            out_group: match out_group {
                OFPG_ANY => None,
                g => Some(g),
            },
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u64::<BigEndian>(fm.cookie_mask)?;
        bytes.write_u8(fm.table_id)?;
        bytes.write_u8(fm.command as u8)?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.idle_timeout))?;
        bytes.write_u16::<BigEndian>(Timeout::to_int(fm.hard_timeout))?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u32::<BigEndian>(
            fm.out_port.map_or(OfpPort::OFPPAny as u32, |p| p.to_int()),
        )?;
        bytes.write_u32::<BigEndian>(fm.out_group.unwrap_or(OFPG_ANY))?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(
            fm.check_overlap,
            fm.notify_when_removed,
        ))?;
        write_padding_bytes(bytes, 2);
        Pattern::marshal(fm.pattern, bytes)?;
        for instruction in fm.instructions {
            Instruction::marshal(instruction, bytes)?;
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        payload.bytes().len()
    }

    /// The frame bytes carried in the message, whether or not the switch also buffered it.
    pub fn bytes(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    fn buffer_id(&self) -> u32 {
        match *self {
            Payload::Buffered(n, _) => n,
            Payload::NotBuffered(_) => OFP_NO_BUFFER,
        }
    }

    fn of_parts(buffer_id: u32, data: &[u8]) -> Payload {
        match buffer_id {
            OFP_NO_BUFFER => Payload::NotBuffered(data.to_vec()),
            n => Payload::Buffered(n, data.to_vec()),
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    Action,
    InvalidTtl,
}

impl TryFrom<u8> for PacketInReason {
    type Error = OfpSerializationError;

    fn try_from(code: u8) -> Result<PacketInReason, OfpSerializationError> {
        match code {
            0 => Ok(PacketInReason::NoMatch),
            1 => Ok(PacketInReason::Action),
            2 => Ok(PacketInReason::InvalidTtl),
            c => Err(OfpSerializationError::UnexpectedValueError {
                value: c.to_string(),
                field: "reason".to_string(),
                message: "packet in".to_string(),
            }),
        }
    }
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub reason: PacketInReason,
    pub table_id: u8,
    pub cookie: u64,
    pub pattern: Pattern,
}

const OFP_PACKET_IN_LEN: usize = 16;

impl PacketIn {
    /// Ingress port, carried in the packet-in match since OpenFlow 1.2.
    pub fn in_port(&self) -> Option<u32> {
        self.pattern.in_port
    }
}

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        OFP_PACKET_IN_LEN + Pattern::size_of(&pi.pattern) + 2 + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let reason = PacketInReason::try_from(bytes.read_u8()?)?;
        let table_id = bytes.read_u8()?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let pattern = Pattern::parse(&mut bytes)?;
        consume(&mut bytes, 2)?;
        Ok(PacketIn {
            input_payload: Payload::of_parts(buffer_id, rest(&bytes)),
            total_len,
            reason,
            table_id,
            cookie,
            pattern,
        })
    }

    fn marshal(pi: PacketIn, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u32::<BigEndian>(pi.input_payload.buffer_id())?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(pi.table_id)?;
        bytes.write_u64::<BigEndian>(pi.cookie)?;
        Pattern::marshal(pi.pattern, bytes)?;
        write_padding_bytes(bytes, 2);
        bytes.extend_from_slice(pi.input_payload.bytes());
        Ok(())
    }
}

/// Send a packet out of the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    /// Port the frame is considered to have entered on. `AllPorts` and `Flood` skip it.
    pub in_port: PseudoPort,
    pub apply_actions: Vec<Action>,
}

const OFP_PACKET_OUT_LEN: usize = 16;

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        OFP_PACKET_OUT_LEN
            + Action::size_of_sequence(&po.apply_actions)
            + Payload::size_of(&po.output_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let in_port = PseudoPort::make(bytes.read_u32::<BigEndian>()?, 0)?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        consume(&mut bytes, 6)?;
        let actions = Action::parse_sequence(take(&mut bytes, actions_len, "actions")?)?;
        Ok(PacketOut {
            output_payload: Payload::of_parts(buffer_id, rest(&bytes)),
            in_port,
            apply_actions: actions,
        })
    }

    fn marshal(po: PacketOut, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u32::<BigEndian>(po.output_payload.buffer_id())?;
        bytes.write_u32::<BigEndian>(po.in_port.to_int())?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        write_padding_bytes(bytes, 6);
        for act in Action::move_controller_last(po.apply_actions) {
            Action::marshal(act, bytes)?;
        }
        bytes.extend_from_slice(po.output_payload.bytes());
        Ok(())
    }
}

/// Error reported by the switch, with the offending request's leading bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg, OfpSerializationError> {
        let mut bytes = Cursor::new(buf);
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(ErrorMsg {
            typ,
            code,
            data: rest(&bytes).to_vec(),
        })
    }

    fn marshal(err: ErrorMsg, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
        bytes.write_u16::<BigEndian>(err.typ)?;
        bytes.write_u16::<BigEndian>(err.code)?;
        bytes.extend_from_slice(&err.data);
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::{OfpHeader, Xid};
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        /// A well-formed message the controller has no use for.
        Unhandled(MsgCode),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::Unhandled(code) => code,
            }
        }

        /// Return the byte-size of a `Message`.
        fn size_of(msg: &Message) -> usize {
            let body = match *msg {
                Message::Hello | Message::FeaturesReq | Message::Unhandled(_) => 0,
                Message::Error(ref err) => ErrorMsg::size_of(err),
                Message::EchoRequest(ref buf) | Message::EchoReply(ref buf) => buf.len(),
                Message::FeaturesReply(ref feats) => SwitchFeatures::size_of(feats),
                Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                Message::PacketOut(ref packet_out) => PacketOut::size_of(packet_out),
            };
            OfpHeader::size() + body
        }

        /// Create an `OfpHeader` for the given `xid` and `msg`.
        fn header_of(xid: Xid, msg: &Message) -> Result<OfpHeader, OfpSerializationError> {
            let sizeof_buf = Self::size_of(msg);
            let length = u16::try_from(sizeof_buf).map_err(|_| {
                OfpSerializationError::UnexpectedValueError {
                    value: sizeof_buf.to_string(),
                    field: "length".to_string(),
                    message: "header".to_string(),
                }
            })?;
            Ok(OfpHeader::new(
                OPENFLOW_0_04_VERSION,
                Self::msg_code_of_message(msg) as u8,
                length,
                xid,
            ))
        }

        /// Marshal the OpenFlow message `msg`.
        fn marshal_body(msg: Message, bytes: &mut Vec<u8>) -> Result<(), OfpSerializationError> {
            match msg {
                Message::Hello | Message::FeaturesReq => Ok(()),
                Message::Error(err) => ErrorMsg::marshal(err, bytes),
                Message::EchoRequest(buf) | Message::EchoReply(buf) => {
                    bytes.extend_from_slice(&buf);
                    Ok(())
                }
                Message::FeaturesReply(feats) => SwitchFeatures::marshal(feats, bytes),
                Message::FlowMod(flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(packet_out) => PacketOut::marshal(packet_out, bytes),
                Message::Unhandled(code) => Err(OfpSerializationError::UnsupportedMessageCode {
                    version: OPENFLOW_0_04_VERSION,
                    code: code as u8,
                }),
            }
        }

        /// Returns a `u8` buffer containing a marshaled OpenFlow header and the message `msg`.
        pub fn marshal(xid: Xid, msg: Message) -> Result<Vec<u8>, OfpSerializationError> {
            let hdr = Self::header_of(xid, &msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        /// Returns a pair `(Xid, Message)` of the transaction id and OpenFlow message parsed from
        /// the given OpenFlow header `header`, and buffer `buf`.
        ///
        /// A Hello of any newer version is accepted since both ends settle on 1.3.
        pub fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Message), OfpSerializationError> {
            let typ = header.type_code()?;
            let version_ok = match typ {
                MsgCode::Hello => header.version() >= OPENFLOW_0_04_VERSION,
                _ => header.version() == OPENFLOW_0_04_VERSION,
            };
            if !version_ok {
                return Err(OfpSerializationError::UnsupportedVersion {
                    version: header.version(),
                });
            }
            let msg = match typ {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                code => Message::Unhandled(code),
            };
            Ok((header.xid(), msg))
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            Message::size_of(msg)
        }

        fn header_of(xid: Xid, msg: &Message) -> Result<OfpHeader, OfpSerializationError> {
            Message::header_of(xid, msg)
        }

        fn marshal(xid: Xid, msg: Message) -> Result<Vec<u8>, OfpSerializationError> {
            Message::marshal(xid, msg)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(Xid, Message), OfpSerializationError> {
            Message::parse(header, buf)
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            table_id: 0,
            pattern,
            priority: prio,
            instructions: vec![Instruction::ApplyActions(actions)],
            cookie: 0,
            cookie_mask: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            apply_to_packet: None,
            out_port: None,
            out_group: None,
            check_overlap: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::message::{add_flow, Message};
    use super::*;
    use crate::ofp_header::OfpHeader;

    fn split(bytes: &[u8]) -> (OfpHeader, &[u8]) {
        let mut hdr = [0u8; 8];
        hdr.copy_from_slice(&bytes[..8]);
        (OfpHeader::parse(hdr).unwrap(), &bytes[8..])
    }

    #[test]
    fn learned_flow_mod_wire_layout() {
        let src = MacAddress::from_u64(0xbb);
        let dst = MacAddress::from_u64(0xaa);
        let mut fm = add_flow(
            2,
            Pattern {
                dl_src: Some(src),
                dl_dst: Some(dst),
                ..Pattern::match_all()
            },
            vec![Action::Output(PseudoPort::PhysicalPort(3))],
        );
        fm.idle_timeout = Timeout::ExpiresAfter(60);
        fm.hard_timeout = Timeout::ExpiresAfter(1800);

        let bytes = Message::marshal(9, Message::FlowMod(fm.clone())).unwrap();
        // header + fixed body + 24 byte match + apply-actions with one output
        assert_eq!(bytes.len(), 8 + 40 + 24 + 24);
        assert_eq!(&bytes[2..4], &96u16.to_be_bytes());
        assert_eq!(bytes[1], MsgCode::FlowMod as u8);
        assert_eq!(&bytes[26..28], &60u16.to_be_bytes());
        assert_eq!(&bytes[28..30], &1800u16.to_be_bytes());
        assert_eq!(&bytes[30..32], &2u16.to_be_bytes());
        assert_eq!(&bytes[32..36], &OFP_NO_BUFFER.to_be_bytes());
        assert_eq!(&bytes[48..52], &[0, 1, 0, 24]);
        assert_eq!(&bytes[52..56], &[0x80, 0x00, 0x06, 0x06]);
        assert_eq!(&bytes[56..62], dst.as_bytes());
        assert_eq!(&bytes[62..66], &[0x80, 0x00, 0x08, 0x06]);
        assert_eq!(&bytes[66..72], src.as_bytes());
        assert_eq!(&bytes[72..76], &[0, 4, 0, 24]);
        assert_eq!(&bytes[80..84], &[0, 0, 0, 16]);
        assert_eq!(&bytes[84..88], &3u32.to_be_bytes());

        let (header, body) = split(&bytes);
        let (xid, parsed) = Message::parse(&header, body).unwrap();
        assert_eq!(xid, 9);
        assert_eq!(parsed, Message::FlowMod(fm));
    }

    #[test]
    fn empty_match_is_padded_to_eight_bytes() {
        let fm = add_flow(
            1,
            Pattern::match_all(),
            vec![Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER))],
        );
        let bytes = Message::marshal(0, Message::FlowMod(fm)).unwrap();
        assert_eq!(bytes.len(), 8 + 40 + 8 + 24);
        assert_eq!(&bytes[48..56], &[0, 1, 0, 4, 0, 0, 0, 0]);
        assert_eq!(&bytes[68..72], &0xffff_fffdu32.to_be_bytes());
        assert_eq!(&bytes[72..74], &[0xff, 0xff]);
    }

    #[test]
    fn parses_packet_in_from_switch_bytes() {
        let frame: Vec<u8> = (0u8..60).collect();
        let mut body = vec![];
        body.extend_from_slice(&OFP_NO_BUFFER.to_be_bytes());
        body.extend_from_slice(&60u16.to_be_bytes());
        body.push(0); // no match
        body.push(0); // table 0
        body.extend_from_slice(&0u64.to_be_bytes());
        // ofp_match: type OXM, length 12, IN_PORT=7, padded to 16
        body.extend_from_slice(&[0, 1, 0, 12, 0x80, 0x00, 0x00, 0x04, 0, 0, 0, 7, 0, 0, 0, 0]);
        body.extend_from_slice(&[0, 0]);
        body.extend_from_slice(&frame);

        let pi = PacketIn::parse(&body).unwrap();
        assert_eq!(pi.in_port(), Some(7));
        assert_eq!(pi.reason, PacketInReason::NoMatch);
        assert_eq!(pi.input_payload, Payload::NotBuffered(frame));
    }

    #[test]
    fn unknown_oxm_fields_are_skipped() {
        // IN_PORT plus a masked ETH_TYPE the controller never asks for.
        let mut buf = vec![0, 1, 0, 4 + 8 + 8];
        buf.extend_from_slice(&[0x80, 0x00, 0x00, 0x04, 0, 0, 0, 2]);
        buf.extend_from_slice(&[0x80, 0x00, 0x0b, 0x04, 0x08, 0x00, 0xff, 0xff]);
        buf.extend_from_slice(&[0; 4]);
        let mut bytes = Cursor::new(&buf[..]);
        let pattern = Pattern::parse(&mut bytes).unwrap();
        assert_eq!(pattern.in_port, Some(2));
        assert_eq!(pattern.dl_src, None);
        assert_eq!(remaining(&bytes), 0);
    }

    #[test]
    fn truncated_packet_in_is_an_error() {
        let body = [0xff, 0xff, 0xff, 0xff, 0, 60, 0, 0, 0, 0, 0, 0];
        assert!(PacketIn::parse(&body).is_err());
    }

    #[test]
    fn packet_out_carries_in_port_actions_and_frame() {
        let po = PacketOut {
            output_payload: Payload::NotBuffered(vec![1, 2, 3]),
            in_port: PseudoPort::PhysicalPort(3),
            apply_actions: vec![Action::Output(PseudoPort::AllPorts)],
        };
        let bytes = Message::marshal(1, Message::PacketOut(po.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 16 + 16 + 3);
        assert_eq!(&bytes[12..16], &3u32.to_be_bytes());
        assert_eq!(&bytes[16..18], &16u16.to_be_bytes());
        assert_eq!(&bytes[28..32], &0xffff_fffcu32.to_be_bytes());
        assert_eq!(&bytes[40..], &[1, 2, 3]);

        let (header, body) = split(&bytes);
        assert_eq!(Message::parse(&header, body).unwrap().1, Message::PacketOut(po));
    }

    #[test]
    fn features_reply_capabilities() {
        let feats = SwitchFeatures {
            datapath_id: 0x0000_0000_0000_0001,
            num_buffers: 256,
            num_tables: 254,
            auxiliary_id: 0,
            supported_capabilities: Capabilities {
                flow_stats: true,
                port_blocked: true,
                ..Capabilities::default()
            },
        };
        let bytes = Message::marshal(3, Message::FeaturesReply(feats.clone())).unwrap();
        assert_eq!(bytes.len(), 32);
        assert_eq!(&bytes[24..28], &0x101u32.to_be_bytes());
        let (header, body) = split(&bytes);
        assert_eq!(Message::parse(&header, body).unwrap().1, Message::FeaturesReply(feats));
    }

    #[test]
    fn version_checks() {
        let hello = OfpHeader::new(0x06, MsgCode::Hello as u8, 8, 1);
        assert_eq!(Message::parse(&hello, &[]).unwrap().1, Message::Hello);

        let old_hello = OfpHeader::new(0x01, MsgCode::Hello as u8, 8, 1);
        assert!(Message::parse(&old_hello, &[]).is_err());

        let echo = OfpHeader::new(0x05, MsgCode::EchoReq as u8, 8, 1);
        assert!(Message::parse(&echo, &[]).is_err());
    }

    #[test]
    fn unneeded_messages_parse_as_unhandled() {
        let header = OfpHeader::new(0x04, MsgCode::PortStatus as u8, 72, 0);
        let (_, msg) = Message::parse(&header, &[0u8; 64]).unwrap();
        assert_eq!(msg, Message::Unhandled(MsgCode::PortStatus));
        assert!(Message::marshal(0, msg).is_err());
    }

    #[test]
    fn table_output_is_refused_in_flows() {
        let fm = add_flow(1, Pattern::match_all(), vec![Action::Output(PseudoPort::Table)]);
        assert!(Message::marshal(0, Message::FlowMod(fm)).is_err());
    }
}
