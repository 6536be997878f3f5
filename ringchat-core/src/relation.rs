use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// A peer connection's role relative to the local node.
///
/// `None` is the transient state between accepting a socket and receiving
/// the `connect` message that assigns a real relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    None,
    Next,
    Prev,
    Leader,
    Follower,
}

impl Relation {
    pub fn as_str(self) -> &'static str {
        match self {
            Relation::None => "none",
            Relation::Next => "next",
            Relation::Prev => "prev",
            Relation::Leader => "leader",
            Relation::Follower => "follower",
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relation {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Relation::None),
            "next" => Ok(Relation::Next),
            "prev" => Ok(Relation::Prev),
            "leader" => Ok(Relation::Leader),
            "follower" => Ok(Relation::Follower),
            other => Err(ProtocolError::InvalidRelation(other.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for r in [
            Relation::None,
            Relation::Next,
            Relation::Prev,
            Relation::Leader,
            Relation::Follower,
        ] {
            let s = r.to_string();
            assert_eq!(s.parse::<Relation>().unwrap(), r);
        }
    }

    #[test]
    fn rejects_unknown_relation() {
        assert!("bogus".parse::<Relation>().is_err());
    }
}
