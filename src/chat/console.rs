/// Operator console for a running hub.
///
/// Commands are looked up by their first word; everything after it is
/// handed to the command as arguments. Output is a plain string so the
/// caller decides where it goes (stdout for the bundled binary).
use async_trait::async_trait;

use super::hub::Hub;

#[async_trait]
pub trait ConsoleCommand: Send + Sync {
    fn name(&self) -> &'static str;
    fn usage(&self) -> &'static str;
    async fn execute(&self, hub: &Hub, args: &[&str]) -> String;
}

/// Registered console commands plus the built-in `help`.
pub struct CommandSet {
    commands: Vec<Box<dyn ConsoleCommand>>,
}

impl CommandSet {
    /// The full built-in set.
    pub fn standard() -> CommandSet {
        let mut set = CommandSet {
            commands: Vec::new(),
        };
        set.register(Box::new(ClientsCommand));
        set.register(Box::new(SendCommand));
        set.register(Box::new(BroadcastCommand));
        set
    }

    pub fn register(&mut self, command: Box<dyn ConsoleCommand>) {
        self.commands.push(command);
    }

    /// Run one console line. Unknown commands get the help text.
    pub async fn dispatch(&self, hub: &Hub, line: &str) -> String {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return String::new();
        };
        if name == "help" {
            return self.help();
        }

        let args: Vec<&str> = words.collect();
        match self.commands.iter().find(|c| c.name() == name) {
            Some(command) => command.execute(hub, &args).await,
            None => format!("unknown command: {name}\n{}", self.help()),
        }
    }

    pub fn help(&self) -> String {
        let mut out = String::from("available commands:");
        for command in &self.commands {
            out.push_str("\n  ");
            out.push_str(command.usage());
        }
        out.push_str("\n  help");
        out.push_str("\n  exit");
        out
    }
}

/// `clients` — connection introspection and forced disconnects.
struct ClientsCommand;

#[async_trait]
impl ConsoleCommand for ClientsCommand {
    fn name(&self) -> &'static str {
        "clients"
    }

    fn usage(&self) -> &'static str {
        "clients <count|list|disconnect <addr>|info <addr>>"
    }

    async fn execute(&self, hub: &Hub, args: &[&str]) -> String {
        match args {
            ["count"] => format!("{} connected", hub.connected_count().await),

            ["list"] => {
                let mut infos = hub.connections().await;
                if infos.is_empty() {
                    return "no connected clients".into();
                }
                infos.sort_by_key(|i| i.addr);
                infos
                    .iter()
                    .map(|i| i.addr.to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            }

            ["disconnect", raw] => match raw.parse() {
                Ok(addr) => {
                    if hub.disconnect(addr).await {
                        format!("disconnecting {addr}")
                    } else {
                        format!("no client at {addr}")
                    }
                }
                Err(_) => format!("not a host:port address: {raw}"),
            },

            ["info", raw] => match raw.parse() {
                Ok(addr) => match hub.connection_info(addr).await {
                    Some(info) => format!(
                        "{addr}: connected for {}s",
                        info.connected_for.as_secs()
                    ),
                    None => format!("no client at {addr}"),
                },
                Err(_) => format!("not a host:port address: {raw}"),
            },

            _ => format!("usage: {}", self.usage()),
        }
    }
}

/// `send` — SERVER_DIRECT notice to one client.
struct SendCommand;

#[async_trait]
impl ConsoleCommand for SendCommand {
    fn name(&self) -> &'static str {
        "send"
    }

    fn usage(&self) -> &'static str {
        "send <addr> <text>"
    }

    async fn execute(&self, hub: &Hub, args: &[&str]) -> String {
        let (raw, text) = match args.split_first() {
            Some((raw, rest)) if !rest.is_empty() => (*raw, rest.join(" ")),
            _ => return format!("usage: {}", self.usage()),
        };
        match raw.parse() {
            Ok(addr) => {
                if hub.notify(addr, &text).await {
                    format!("sent to {addr}")
                } else {
                    format!("no client at {addr}")
                }
            }
            Err(_) => format!("not a host:port address: {raw}"),
        }
    }
}

/// `broadcast` — SERVER_BROADCAST notice to every client.
struct BroadcastCommand;

#[async_trait]
impl ConsoleCommand for BroadcastCommand {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn usage(&self) -> &'static str {
        "broadcast <text>"
    }

    async fn execute(&self, hub: &Hub, args: &[&str]) -> String {
        if args.is_empty() {
            return format!("usage: {}", self.usage());
        }
        let sent = hub.notify_all(&args.join(" ")).await;
        format!("broadcast to {sent} clients")
    }
}
