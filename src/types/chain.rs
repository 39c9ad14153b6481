use std::fmt;
use std::str::FromStr;

/// Supported networks. Case-insensitive on the wire (`ethereum`, `Ethereum`,
/// `ETHEREUM` all resolve), canonical lowercase internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
}

impl Chain {
    pub fn chain_id(self) -> u64 {
        match self {
            Chain::Ethereum => 1,
            Chain::Polygon => 137,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Chain::Ethereum => "ethereum",
            Chain::Polygon => "polygon",
        }
    }

    pub fn all() -> [Chain; 2] {
        [Chain::Ethereum, Chain::Polygon]
    }

    pub fn from_chain_id(id: u64) -> Option<Chain> {
        Chain::all().into_iter().find(|c| c.chain_id() == id)
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Chain {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ethereum" | "eth" => Ok(Chain::Ethereum),
            "polygon" | "matic" => Ok(Chain::Polygon),
            _ => Err(()),
        }
    }
}
