//! Address resolution (C10, `spec.md` §4.10): parses the
//! `[host[@args]:]record.field` address grammar and maps a host/args pair
//! onto a concrete endpoint.

use crate::connection::{ConnectOptions, Server};
use crate::error::{ErrorKind, MxNetError, Result};
use crate::logging::Logger;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Default MX network port, unchanged since `mx_net.c` (`spec.md` §4.10).
pub const DEFAULT_PORT: u16 = 9727;

/// A connection endpoint: either a TCP host/port or a Unix-domain socket
/// path (`spec.md` §4.10 - "`@args` is a port number if every character is
/// a digit, else a Unix socket path").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Tcp { host: String, port: u16 },
    Unix { path: String },
}

/// A fully parsed address: where to connect, and which record.field to
/// talk to once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub endpoint: Endpoint,
    pub record: String,
    pub field: String,
}

impl NetworkAddress {
    /// Parses `text` per the grammar in `spec.md` §4.10. Examples:
    ///
    /// - `"theta.position"` -> `localhost:9727`, record `theta`, field `position`
    /// - `"myhost:theta.position"` -> `myhost:9727`
    /// - `"myhost@9999:theta.position"` -> `myhost:9999`
    /// - `"myhost@/tmp/mx.sock:theta.position"` -> Unix socket `/tmp/mx.sock`
    pub fn parse(text: &str) -> Result<NetworkAddress> {
        let (host_part, record_field) = match text.rfind(':') {
            Some(idx) => (Some(&text[..idx]), &text[idx + 1..]),
            None => (None, text),
        };

        let dot = record_field
            .find('.')
            .ok_or_else(|| MxNetError::new(ErrorKind::IllegalArgument, format!("missing '.' in address {:?}", text)))?;
        let record = record_field[..dot].to_string();
        let field = record_field[dot + 1..].to_string();
        if record.is_empty() || field.is_empty() {
            return Err(MxNetError::new(
                ErrorKind::IllegalArgument,
                format!("empty record or field name in address {:?}", text),
            ));
        }

        let endpoint = match host_part {
            None => Endpoint::Tcp {
                host: "localhost".to_string(),
                port: DEFAULT_PORT,
            },
            Some(host_part) => match host_part.find('@') {
                None => Endpoint::Tcp {
                    host: host_part.to_string(),
                    port: DEFAULT_PORT,
                },
                Some(at) => {
                    let host = host_part[..at].to_string();
                    let args = &host_part[at + 1..];
                    if !args.is_empty() && args.chars().all(|c| c.is_ascii_digit()) {
                        let port = args.parse::<u16>().map_err(|_| {
                            MxNetError::new(ErrorKind::IllegalArgument, format!("invalid port {:?}", args))
                        })?;
                        Endpoint::Tcp { host, port }
                    } else {
                        Endpoint::Unix { path: args.to_string() }
                    }
                }
            },
        };

        Ok(NetworkAddress { endpoint, record, field })
    }

    pub fn name(&self) -> String {
        format!("{}.{}", self.record, self.field)
    }
}

/// Parameters for a [`Server`] the directory does not already have one
/// for (`spec.md` §4.10).
pub struct ResolveDefaults {
    pub options: ConnectOptions,
    pub logger: Logger,
    /// `spec.md` §4.10: "retry the TCP connect once per second".
    pub retry_interval: Duration,
    /// `None` waits forever, matching `spec.md`'s "a negative timeout
    /// means wait forever".
    pub connect_timeout: Option<Duration>,
}

impl ResolveDefaults {
    pub fn new(options: ConnectOptions, logger: Logger) -> ResolveDefaults {
        ResolveDefaults {
            options,
            logger,
            retry_interval: Duration::from_secs(1),
            connect_timeout: None,
        }
    }
}

/// Holds the ordered sequence of `Server`s a process has resolved
/// addresses to, reusing one `Server` per distinct endpoint
/// (`spec.md` §4.10 "Address Parser & Server Directory").
#[derive(Default)]
pub struct ServerDirectory {
    servers: Mutex<Vec<(Endpoint, Arc<Server>)>>,
}

impl ServerDirectory {
    pub fn new() -> ServerDirectory {
        ServerDirectory {
            servers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the existing `Server` for `address`'s endpoint, or creates
    /// one and retries its initial connect once per `defaults.retry_interval`
    /// until `defaults.connect_timeout` elapses (`spec.md` §4.10).
    pub fn resolve(&self, address: &NetworkAddress, defaults: ResolveDefaults) -> Result<Arc<Server>> {
        if let Some(server) = self.lookup(&address.endpoint) {
            return Ok(server);
        }

        let server = Arc::new(Server::new(address.endpoint.clone(), defaults.options, defaults.logger));
        let deadline = defaults.connect_timeout.map(|d| Instant::now() + d);
        loop {
            match server.ensure_connected() {
                Ok(()) => break,
                Err(e) if e.is_connection_loss() => {
                    if deadline.map(|d| Instant::now() >= d).unwrap_or(false) {
                        return Err(e);
                    }
                    std::thread::sleep(defaults.retry_interval);
                }
                Err(e) => return Err(e),
            }
        }

        self.register(address.endpoint.clone(), server.clone());
        Ok(server)
    }

    fn lookup(&self, endpoint: &Endpoint) -> Option<Arc<Server>> {
        let servers = self.servers.lock().unwrap();
        servers.iter().find(|(ep, _)| ep == endpoint).map(|(_, server)| server.clone())
    }

    /// Inserts a pre-built `Server` under `endpoint`, used by `resolve`
    /// after a successful connect and by callers that already hold a
    /// connected `Server` they want the directory to start tracking.
    pub fn register(&self, endpoint: Endpoint, server: Arc<Server>) {
        self.servers.lock().unwrap().push((endpoint, server));
    }

    pub fn len(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
