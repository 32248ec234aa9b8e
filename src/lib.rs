//! OpenFlow 1.3 controller that forwards L2 traffic using an external
//! host-location directory.

pub mod bootstrap;
pub mod classifier;
pub mod config;
pub mod directory;
pub mod error;
pub mod flow_programmer;
pub mod learning_switch;
pub mod mac;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x04;
pub mod packet;
