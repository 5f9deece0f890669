//! Traffic Light Protocol marking levels

use std::fmt;
use std::str::FromStr;

/// TLP level, ordered from least to most restricted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TlpLevel {
    White,
    Green,
    Amber,
    Red,
}

impl TlpLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::White => "TLP:WHITE",
            Self::Green => "TLP:GREEN",
            Self::Amber => "TLP:AMBER",
            Self::Red => "TLP:RED",
        }
    }
}

impl FromStr for TlpLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "TLP:WHITE" => Ok(Self::White),
            "TLP:GREEN" => Ok(Self::Green),
            "TLP:AMBER" => Ok(Self::Amber),
            "TLP:RED" => Ok(Self::Red),
            other => Err(format!("unknown TLP level '{}'", other)),
        }
    }
}

impl fmt::Display for TlpLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether data marked `tlp` may be handled by a connector capped at
/// `max_tlp`.
///
/// An unrecognised cap only allows `TLP:WHITE`; an unrecognised marking is
/// never allowed.
pub fn check_max_tlp(tlp: &str, max_tlp: &str) -> bool {
    let Ok(level) = tlp.parse::<TlpLevel>() else {
        return false;
    };
    let cap = max_tlp.parse::<TlpLevel>().unwrap_or(TlpLevel::White);
    level <= cap
}
