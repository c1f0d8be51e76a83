use serde::{Deserialize, Serialize};

use crate::keyspace::KeyRange;

/// Comparable network address of a process in the cluster.
///
/// Host stays a string so operators can hand out names as well as literal
/// addresses; resolution happens at send time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub host: String,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NetworkAddress {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl std::str::FromStr for NetworkAddress {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected host:port, got {s:?}"))?;
        if host.is_empty() {
            anyhow::bail!("expected host:port, got {s:?}");
        }
        let port: u16 = port
            .parse()
            .map_err(|e| anyhow::anyhow!("bad port in {s:?}: {e}"))?;
        Ok(NetworkAddress::new(host, port))
    }
}

/// Everything the cluster knows about one worker: its master-assigned name,
/// where to reach it, and the key range it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub name: u32,
    pub address: NetworkAddress,
    pub range: KeyRange,
}

impl std::fmt::Display for WorkerRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "name={} address={} range={}",
            self.name, self.address, self.range
        )
    }
}
