use std::io::{self, BufRead, Write};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use clap::Parser;
use ringchat_core::RingConfig;
use ringchat_node::{ControlSurface, TracingSink};

/// A slash-command REPL over stdin driving `ControlSurface`.
#[derive(Parser, Debug)]
#[command(name = "ringchat", about = "Peer-to-peer ring chat overlay")]
struct Args {
    /// Local address this node advertises to the rest of the ring. Peers
    /// dial this address back, so it must be reachable from them.
    #[arg(long, default_value = "127.0.0.1")]
    host: Ipv4Addr,

    /// Nickname to use once chat participation is turned on.
    #[arg(long)]
    nick: Option<String>,
}

struct Session {
    host: Ipv4Addr,
    config: RingConfig,
    control: Option<ControlSurface>,
    pending_nick: Option<String>,
}

impl Session {
    fn new(host: Ipv4Addr, config: RingConfig) -> Session {
        Session {
            host,
            config,
            control: None,
            pending_nick: None,
        }
    }

    /// The node's identity (and listen port) is fixed for the lifetime of
    /// the process once the first `/start` or `/join` picks one.
    fn control_for(&mut self, port: u16) -> Option<&ControlSurface> {
        if self.control.is_none() {
            self.control = Some(ControlSurface::new(
                self.host,
                port,
                self.config.clone(),
                Arc::new(TracingSink),
            ));
        } else if self.control.as_ref().unwrap().node_id().port() != port {
            println!("this session is already using port {}; restart to pick a different one", self.control.as_ref().unwrap().node_id().port());
            return None;
        }
        self.control.as_ref()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::try_init().ok();
    let args = Args::parse();
    let config = RingConfig::from_env().unwrap_or_default();
    let mut session = Session::new(args.host, config);

    if let Some(nick) = args.nick {
        // Applied once a control surface exists (first /start or /join).
        session.pending_nick = Some(nick);
    }

    println!("ringchat ready. type /help for a list of commands.");
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        handle_command(&mut session, line).await;
        io::stdout().flush().ok();
    }

    if let Some(control) = session.control.as_ref() {
        if control.is_connected() {
            control.disconnect().await;
        }
    }
    Ok(())
}

async fn handle_command(session: &mut Session, line: &str) {
    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();

    match command {
        "/help" => print_help(),
        "/start" => match rest.parse::<u16>() {
            Ok(port) => {
                if let Some(control) = session.control_for(port) {
                    control.start_network(port).await;
                    apply_pending_nick(session);
                }
            }
            Err(_) => println!("usage: /start <port>"),
        },
        "/join" => {
            let mut fields = rest.split_whitespace();
            let addr = fields.next();
            let port = fields.next().and_then(|p| p.parse::<u16>().ok());
            match (addr, port) {
                (Some(addr), Some(port)) => match format!("{addr}:{port}").parse::<SocketAddr>() {
                    Ok(bootstrap) => {
                        if let Some(control) = session.control_for(port) {
                            control.join_network(bootstrap, port).await;
                            apply_pending_nick(session);
                        }
                    }
                    Err(_) => println!("invalid address: {addr}:{port}"),
                },
                _ => println!("usage: /join <addr> <port>"),
            }
        }
        "/disconnect" => match session.control.as_ref() {
            Some(control) => control.disconnect().await,
            None => println!("not connected to a network"),
        },
        "/nick" => {
            if rest.is_empty() {
                println!("usage: /nick <name>");
            } else {
                match session.control.as_ref() {
                    Some(control) => control.set_nickname(rest.to_owned()),
                    None => session.pending_nick = Some(rest.to_owned()),
                }
            }
        }
        "/chat" => match (rest, session.control.as_ref()) {
            ("on", Some(control)) => control.set_chat_participation(true).await,
            ("off", Some(control)) => control.set_chat_participation(false).await,
            (_, None) => println!("not connected to a network"),
            _ => println!("usage: /chat on|off"),
        },
        "/say" => match session.control.as_ref() {
            Some(control) if !rest.is_empty() => control.send_chat_message(rest.to_owned()).await,
            Some(_) => println!("usage: /say <text>"),
            None => println!("not connected to a network"),
        },
        _ => println!("unknown command: {command} (try /help)"),
    }
}

fn apply_pending_nick(session: &mut Session) {
    if let (Some(nick), Some(control)) = (session.pending_nick.take(), session.control.as_ref()) {
        control.set_nickname(nick);
    }
}

fn print_help() {
    println!("/start <port>        start a new network, listening on <port>");
    println!("/join <addr> <port>  join an existing network through <addr>:<port>");
    println!("/disconnect          leave the current network");
    println!("/nick <name>         set your chat nickname");
    println!("/chat on|off         join or leave the chat as a follower");
    println!("/say <text>          send a chat message");
    println!("/quit                exit");
}
