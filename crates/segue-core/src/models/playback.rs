//! Playback mode enums shared by the playlist, the config and the CLI.
//!
//! String enums: lowercase on the wire, typed in Rust.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What happens when the end (or start) of the playlist is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackRepeat {
    #[default]
    None,
    Current,
    All,
}

/// Sequential or randomizer-driven traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackOrder {
    #[default]
    Normal,
    Random,
}

impl FromStr for PlaybackRepeat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" | "off" => Ok(Self::None),
            "current" | "one" => Ok(Self::Current),
            "all" => Ok(Self::All),
            other => Err(format!("unknown repeat mode: {}", other)),
        }
    }
}

impl FromStr for PlaybackOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(Self::Normal),
            "random" | "shuffle" => Ok(Self::Random),
            other => Err(format!("unknown playback order: {}", other)),
        }
    }
}

impl fmt::Display for PlaybackRepeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Current => "current",
            Self::All => "all",
        })
    }
}

impl fmt::Display for PlaybackOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Normal => "normal",
            Self::Random => "random",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!("off".parse::<PlaybackRepeat>(), Ok(PlaybackRepeat::None));
        assert_eq!("one".parse::<PlaybackRepeat>(), Ok(PlaybackRepeat::Current));
        assert_eq!("shuffle".parse::<PlaybackOrder>(), Ok(PlaybackOrder::Random));
        assert!("sideways".parse::<PlaybackOrder>().is_err());
    }

    #[test]
    fn serde_lowercase() {
        let v = serde_json::to_value(PlaybackRepeat::All).unwrap();
        assert_eq!(v, "all");
        let o: PlaybackOrder = serde_json::from_value("random".into()).unwrap();
        assert_eq!(o, PlaybackOrder::Random);
    }
}
