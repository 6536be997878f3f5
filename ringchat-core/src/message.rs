use crate::error::ProtocolError;
use crate::id::NodeId;
use crate::relation::Relation;

/// Fixed token identifying this wire version; messages with any other value
/// in the first field are rejected outright.
pub const MAGIC: &str = "DISTROCHYA-R1";

const SEPARATOR: char = ';';

/// One parsed line of the wire protocol: `MAGIC;TIMESTAMP;VERB;ARGS...\n`.
///
/// `Message::encode` / `Message::decode` are the only place that knows the
/// field layout; every connection-handling module above this speaks `Verb`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub timestamp: u64,
    pub verb: Verb,
}

/// A single ring/chat protocol verb and its decoded arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    /// Joiner (or re-joiner) announcing itself with a requested relation.
    /// `extra` carries the nickname for `follower` joins.
    Connect {
        id: NodeId,
        relation: Relation,
        extra: Vec<String>,
    },
    /// Response to `connect(none)`: who to dial next, current leader, and
    /// the second-successor.
    NetInfo {
        my_id: NodeId,
        next_id: NodeId,
        leader_id: NodeId,
        twice_next_id: NodeId,
    },
    /// Ring-repair token, forwarded predecessor-ward until it reaches its
    /// sender.
    CloseRing { sender_id: NodeId },
    /// Chang-Roberts election token.
    Election { candidate_id: NodeId },
    /// Announces the elected leader; travels one full ring lap.
    Elected { leader_id: NodeId },
    /// Leader -> follower push of the current nickname set.
    UserList { names: Vec<String> },
    /// Follower -> leader chat submission.
    ChatMessageSend { text: String },
    /// Leader -> follower chat broadcast.
    ChatMessage { user: String, text: String },
    /// Successor telling its predecessor "your second-successor is now X".
    NextInfo { new_next_id: NodeId },
    /// Keep-alive ping.
    AliveCheck,
    /// Keep-alive pong.
    AliveResp,
}

impl Verb {
    pub fn name(&self) -> &'static str {
        match self {
            Verb::Connect { .. } => "connect",
            Verb::NetInfo { .. } => "netinfo",
            Verb::CloseRing { .. } => "closering",
            Verb::Election { .. } => "election",
            Verb::Elected { .. } => "elected",
            Verb::UserList { .. } => "userlist",
            Verb::ChatMessageSend { .. } => "chatmessagesend",
            Verb::ChatMessage { .. } => "chatmessage",
            Verb::NextInfo { .. } => "nextinfo",
            Verb::AliveCheck => "alivecheck",
            Verb::AliveResp => "aliveresp",
        }
    }
}

impl Message {
    pub fn new(timestamp: u64, verb: Verb) -> Message {
        Message { timestamp, verb }
    }

    /// Renders the message as a single line, without the trailing `\n`.
    pub fn encode(&self) -> String {
        let mut fields: Vec<String> = vec![
            MAGIC.to_owned(),
            self.timestamp.to_string(),
            self.verb.name().to_owned(),
        ];

        match &self.verb {
            Verb::Connect {
                id,
                relation,
                extra,
            } => {
                fields.push(id.to_hex());
                fields.push(relation.as_str().to_owned());
                fields.extend(extra.iter().cloned());
            }
            Verb::NetInfo {
                my_id,
                next_id,
                leader_id,
                twice_next_id,
            } => {
                fields.push(my_id.to_hex());
                fields.push(next_id.to_hex());
                fields.push(leader_id.to_hex());
                fields.push(twice_next_id.to_hex());
            }
            Verb::CloseRing { sender_id } => fields.push(sender_id.to_hex()),
            Verb::Election { candidate_id } => fields.push(candidate_id.to_hex()),
            Verb::Elected { leader_id } => fields.push(leader_id.to_hex()),
            Verb::UserList { names } => fields.extend(names.iter().cloned()),
            Verb::ChatMessageSend { text } => fields.push(text.clone()),
            Verb::ChatMessage { user, text } => {
                fields.push(user.clone());
                fields.push(text.clone());
            }
            Verb::NextInfo { new_next_id } => fields.push(new_next_id.to_hex()),
            Verb::AliveCheck | Verb::AliveResp => {}
        }

        fields.join(&SEPARATOR.to_string())
    }

    /// Parses a single line (already trimmed of its trailing newline).
    ///
    /// Free-text tails (chat text, nicknames) are rejoined with the
    /// separator rather than truncated at the first split, since the
    /// separator character can legally appear inside chat messages.
    pub fn decode(line: &str) -> Result<Message, ProtocolError> {
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        if fields.len() < 3 {
            return Err(ProtocolError::TooFewFields(line.to_owned()));
        }
        if fields[0] != MAGIC {
            return Err(ProtocolError::BadMagic {
                expected: MAGIC,
                found: fields[0].to_owned(),
            });
        }
        let timestamp: u64 = fields[1]
            .parse()
            .map_err(|_| ProtocolError::InvalidTimestamp(fields[1].to_owned()))?;
        let verb_name = fields[2];
        let args = &fields[3..];

        let arg = |index: usize| -> Result<&str, ProtocolError> {
            args.get(index)
                .copied()
                .ok_or(ProtocolError::MissingArgument {
                    verb: verb_name_static(verb_name),
                    index,
                })
        };

        let verb = match verb_name {
            "connect" => {
                let id = NodeId::from_hex(arg(0)?)?;
                let relation: Relation = arg(1)?.parse()?;
                let extra = args.get(2..).unwrap_or(&[]).iter().map(|s| s.to_string()).collect();
                Verb::Connect {
                    id,
                    relation,
                    extra,
                }
            }
            "netinfo" => Verb::NetInfo {
                my_id: NodeId::from_hex(arg(0)?)?,
                next_id: NodeId::from_hex(arg(1)?)?,
                leader_id: NodeId::from_hex(arg(2)?)?,
                twice_next_id: NodeId::from_hex(arg(3)?)?,
            },
            "closering" => Verb::CloseRing {
                sender_id: NodeId::from_hex(arg(0)?)?,
            },
            "election" => Verb::Election {
                candidate_id: NodeId::from_hex(arg(0)?)?,
            },
            "elected" => Verb::Elected {
                leader_id: NodeId::from_hex(arg(0)?)?,
            },
            "userlist" => Verb::UserList {
                names: args.iter().map(|s| s.to_string()).collect(),
            },
            "chatmessagesend" => Verb::ChatMessageSend {
                text: args.join(&SEPARATOR.to_string()),
            },
            "chatmessage" => {
                let user = arg(0)?.to_owned();
                let text = args.get(1..).unwrap_or(&[]).join(&SEPARATOR.to_string());
                Verb::ChatMessage { user, text }
            }
            "nextinfo" => Verb::NextInfo {
                new_next_id: NodeId::from_hex(arg(0)?)?,
            },
            "alivecheck" => Verb::AliveCheck,
            "aliveresp" => Verb::AliveResp,
            other => return Err(ProtocolError::UnknownVerb(other.to_owned())),
        };

        Ok(Message { timestamp, verb })
    }
}

/// `MissingArgument` wants a `&'static str`; this maps a decoded verb name
/// back onto one without allocating (the match is exhaustive over what
/// `decode` itself dispatches on).
fn verb_name_static(name: &str) -> &'static str {
    match name {
        "connect" => "connect",
        "netinfo" => "netinfo",
        "closering" => "closering",
        "election" => "election",
        "elected" => "elected",
        "userlist" => "userlist",
        "chatmessagesend" => "chatmessagesend",
        "chatmessage" => "chatmessage",
        "nextinfo" => "nextinfo",
        "alivecheck" => "alivecheck",
        "aliveresp" => "aliveresp",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn id(a: u8, b: u8, c: u8, d: u8, port: u16) -> NodeId {
        NodeId::new(Ipv4Addr::new(a, b, c, d), port, 7)
    }

    #[test]
    fn connect_round_trips() {
        let msg = Message::new(
            42,
            Verb::Connect {
                id: id(10, 0, 0, 1, 9999),
                relation: Relation::Follower,
                extra: vec!["alice".to_owned()],
            },
        );
        let line = msg.encode();
        let decoded = Message::decode(&line).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn netinfo_round_trips() {
        let msg = Message::new(
            1,
            Verb::NetInfo {
                my_id: id(10, 0, 0, 1, 9999),
                next_id: id(10, 0, 0, 2, 9998),
                leader_id: NodeId::ZERO,
                twice_next_id: id(10, 0, 0, 1, 9999),
            },
        );
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn chat_text_preserves_embedded_separators() {
        let msg = Message::new(
            5,
            Verb::ChatMessage {
                user: "alice".to_owned(),
                text: "a;b;c semicolons galore".to_owned(),
            },
        );
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn chatmessagesend_preserves_embedded_separators() {
        let msg = Message::new(
            5,
            Verb::ChatMessageSend {
                text: "semicolon; inside; the; text".to_owned(),
            },
        );
        let decoded = Message::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = Message::decode("NOT-THE-MAGIC;1;alivecheck").unwrap_err();
        assert!(matches!(err, ProtocolError::BadMagic { .. }));
    }

    #[test]
    fn rejects_too_few_fields() {
        let err = Message::decode("DISTROCHYA-R1;1").unwrap_err();
        assert!(matches!(err, ProtocolError::TooFewFields(_)));
    }

    #[test]
    fn rejects_unknown_verb() {
        let err = Message::decode("DISTROCHYA-R1;1;bogus").unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownVerb(_)));
    }

    #[test]
    fn alivecheck_has_no_args() {
        let msg = Message::new(1, Verb::AliveCheck);
        assert_eq!(msg.encode(), "DISTROCHYA-R1;1;alivecheck");
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn userlist_round_trips_many_names() {
        let msg = Message::new(
            1,
            Verb::UserList {
                names: vec!["alice".to_owned(), "bob".to_owned(), "carol".to_owned()],
            },
        );
        assert_eq!(Message::decode(&msg.encode()).unwrap(), msg);
    }
}
