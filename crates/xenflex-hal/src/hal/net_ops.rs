//! Local network interface enumeration.

use crate::HalResult;

/// A local network interface as seen by the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetInterface {
    pub name: String,
    /// Lowercase colon-separated hardware address; `None` when the interface has none.
    pub mac: Option<String>,
    /// Administratively up (IFF_UP).
    pub up: bool,
}

impl NetInterface {
    pub fn new(name: impl Into<String>, mac: Option<&str>, up: bool) -> Self {
        Self {
            name: name.into(),
            mac: mac.map(|m| m.to_ascii_lowercase()),
            up,
        }
    }
}

pub trait NetOps {
    fn network_interfaces(&self) -> HalResult<Vec<NetInterface>>;
}
