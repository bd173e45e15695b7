//! Per-endpoint IP allow-list.

use std::net::IpAddr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::RequestRejected;

/// Ranges appended to every non-empty allow-list so local tooling can always
/// reach the endpoint.
pub const LOOPBACK_RANGES: [&str; 2] = ["127.0.0.0/16", "::1/128"];

/// Network ranges permitted to reach an endpoint.
///
/// An empty filter allows every address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessFilter {
    ranges: Vec<IpNet>,
}

impl AccessFilter {
    /// A filter that allows every address.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Builds a filter from `ranges`.
    ///
    /// If `ranges` is non-empty the loopback ranges are appended.
    pub fn from_ranges(ranges: impl IntoIterator<Item = IpNet>) -> Self {
        let mut ranges: Vec<IpNet> = ranges.into_iter().collect();
        if !ranges.is_empty() {
            for loopback in LOOPBACK_RANGES {
                if let Ok(net) = loopback.parse::<IpNet>() {
                    if !ranges.contains(&net) {
                        ranges.push(net);
                    }
                }
            }
        }
        Self { ranges }
    }

    /// Returns `true` if every address is allowed.
    pub fn is_open(&self) -> bool {
        self.ranges.is_empty()
    }

    /// The configured ranges, including appended loopback ranges.
    pub fn ranges(&self) -> &[IpNet] {
        &self.ranges
    }

    /// Returns `true` if `addr` may reach the endpoint.
    ///
    /// IPv4-mapped IPv6 addresses are matched as their IPv4 form.
    pub fn allows(&self, addr: IpAddr) -> bool {
        if self.ranges.is_empty() {
            return true;
        }
        let addr = addr.to_canonical();
        self.ranges.iter().any(|net| net.contains(&addr))
    }

    /// Allows `addr` or rejects it with a 401-equivalent.
    pub fn check(&self, addr: IpAddr) -> Result<(), RequestRejected> {
        if self.allows(addr) {
            Ok(())
        } else {
            Err(RequestRejected::IpNotWhitelisted(addr))
        }
    }
}
