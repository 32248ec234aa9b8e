use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use reqwest::Url;

use crate::learning_switch::LEARNING_SWITCH_PRIORITY;

/// Command line of the controller binary. Every flag may also come from the
/// environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "rust_ofp_l2_controller", version, about = "OpenFlow 1.3 L2 learning controller")]
pub struct Config {
    /// Address switches connect to.
    #[arg(long, env = "OFP_LISTEN", default_value = "0.0.0.0:6653")]
    pub listen: SocketAddr,

    /// Base URL of the host-location directory.
    #[arg(long, env = "OFP_DIRECTORY_URL", default_value = "http://localhost:6666/")]
    pub directory_url: Url,

    /// Deadline for each directory request, in milliseconds.
    #[arg(long, env = "OFP_DIRECTORY_TIMEOUT_MS", default_value_t = 50)]
    pub directory_timeout_ms: u64,

    /// Dispatch priority of the learning switch; lower runs first.
    #[arg(long, env = "OFP_HANDLER_PRIORITY", default_value_t = LEARNING_SWITCH_PRIORITY, allow_negative_numbers = true)]
    pub handler_priority: i32,

    /// Default log filter. `RUST_LOG` takes precedence.
    #[arg(long, env = "OFP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn directory_timeout(&self) -> Duration {
        Duration::from_millis(self.directory_timeout_ms)
    }
}
