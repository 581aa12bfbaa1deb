//! Connection Manager (C6, `spec.md` §4.6): owns the socket, negotiates
//! header length / data format / 64-bit longs / client version, and
//! reconnects transparently when the transport reports loss.

use crate::address::Endpoint;
use crate::buffer::{DataFormat, MessageBuffer};
use crate::callback::{Callback, CallbackKind, CallbackRegistry};
use crate::codec::{codec_for, ValueShape};
use crate::error::{ErrorKind, MxNetError, Result};
use crate::handle_cache::{HandleCache, NetworkHandle};
use crate::header::{MessageHeader, CURRENT_HEADER_LENGTH};
use crate::logging::{self, Logger};
use crate::message_id::{self, Classification, MessageIdGenerator};
use crate::request::{self, decode_handle, encode_handle, option, pad_name};
use crate::transport::{Socket, Transport};
use crate::value::DataType;
use byteorder::{BigEndian, ByteOrder};
use slog::{debug, info, warn};
use std::net::TcpStream;
#[cfg(unix)]
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Legacy APS fork version range remapped to a single canonical value
/// (`spec.md` §4.6 step 4, `mx_net.c` bring-up).
pub fn remap_legacy_version(numeric_version: u32) -> u32 {
    if (1_006_000..2_000_000).contains(&numeric_version) {
        1_005_004
    } else {
        numeric_version
    }
}

/// Minimum remote version required to negotiate 64-bit longs
/// (`spec.md` §4.6 step 6).
const MIN_VERSION_FOR_64BIT_LONGS: u32 = 1_002_000;

const WELL_KNOWN_DISCOVERY_FIELD: &str = "mx_database.list_is_active";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteVersion {
    pub numeric: u32,
    pub version_time: u32,
}

/// `spec.md` §3 "Server... connection status".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    ConnectionLost,
    Reconnected,
}

/// What data format the caller wants negotiated at connect time
/// (`spec.md` §4.6 step 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestedFormat {
    Negotiate,
    Fixed(DataFormat),
}

/// Caller-supplied connection parameters (`spec.md` §4.6).
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub requested_format: RequestedFormat,
    pub request_64bit_longs: bool,
    /// Deadline applied to each bring-up RPC. `None` waits forever.
    pub timeout: Option<Duration>,
    pub username: String,
    pub program_name: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            requested_format: RequestedFormat::Negotiate,
            request_64bit_longs: false,
            timeout: Some(Duration::from_secs(5)),
            username: whoami_fallback(),
            program_name: "mx-net-client".to_string(),
        }
    }
}

fn whoami_fallback() -> String {
    std::env::var("USER").unwrap_or_else(|_| "unknown".to_string())
}

struct ServerInner {
    endpoint: Endpoint,
    transport: Option<Transport>,
    header_length: u32,
    data_format: DataFormat,
    use_64bit_longs: bool,
    remote_version: Option<RemoteVersion>,
    message_ids: MessageIdGenerator,
    status: ConnectionStatus,
    handles_valid: bool,
    generation: u64,
    ever_connected: bool,
    supports_network_handles: bool,
    handle_cache: HandleCache,
    callbacks: CallbackRegistry,
    buffer: MessageBuffer,
    options: ConnectOptions,
    logger: Logger,
}

impl ServerInner {
    fn new(endpoint: Endpoint, options: ConnectOptions, logger: Logger) -> ServerInner {
        ServerInner {
            endpoint,
            transport: None,
            header_length: CURRENT_HEADER_LENGTH,
            data_format: DataFormat::Ascii,
            use_64bit_longs: false,
            remote_version: None,
            message_ids: MessageIdGenerator::new(),
            status: ConnectionStatus::Disconnected,
            handles_valid: false,
            generation: 0,
            ever_connected: false,
            supports_network_handles: true,
            handle_cache: HandleCache::new(),
            callbacks: CallbackRegistry::new(),
            buffer: MessageBuffer::default(),
            options,
            logger,
        }
    }

    fn needs_reconnect(&self) -> bool {
        self.transport.is_none() || self.status == ConnectionStatus::ConnectionLost
    }

    fn deadline(&self) -> Option<Instant> {
        self.options.timeout.map(|d| Instant::now() + d)
    }

    fn mark_lost(&mut self) {
        self.transport = None;
        self.handles_valid = false;
        self.status = ConnectionStatus::ConnectionLost;
    }

    /// The id-correlation send/wait loop (`spec.md` §4.5). Does not touch
    /// `needs_reconnect` - callers are responsible for bringing the
    /// connection up first.
    fn send_and_wait(
        &mut self,
        callback_in_progress: &AtomicBool,
        request_opcode: u32,
        data_type: u32,
        body: &[u8],
        deadline: Option<Instant>,
    ) -> Result<(MessageHeader, Vec<u8>)> {
        let id = self.message_ids.next_id();
        let header = MessageHeader {
            header_length: self.header_length,
            message_length: 0,
            message_type: request_opcode,
            status_code: 0,
            data_type,
            message_id: id,
        };
        let transport = self.transport.as_mut().expect("connection brought up before send_and_wait");
        if let Err(e) = transport.send(header, body) {
            if e.is_connection_loss() {
                self.mark_lost();
            }
            return Err(e);
        }

        loop {
            let remaining = match deadline {
                None => None,
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(MxNetError::new(ErrorKind::TimedOut, "deadline exceeded waiting for response"));
                    }
                    Some(d - now)
                }
            };

            let transport = self.transport.as_mut().expect("connection brought up before send_and_wait");
            let received_header = match transport.receive(&mut self.buffer, remaining) {
                Ok(h) => h,
                Err(e) => {
                    // A read timeout is not connection loss: the peer may
                    // still answer late (`spec.md` §8 scenario 4), and the
                    // connection stays up so that reply can be recognized as
                    // stale rather than forcing a pointless reconnect.
                    if e.is_connection_loss() {
                        self.mark_lost();
                    }
                    return Err(e);
                }
            };
            let start = received_header.header_length as usize;
            let end = start + received_header.message_length as usize;
            let received_body = self.buffer.as_bytes()[start..end].to_vec();

            match message_id::classify(received_header.message_id, id) {
                Classification::Match => {
                    if received_header.is_error() {
                        let message = String::from_utf8_lossy(&received_body).into_owned();
                        return Err(MxNetError::from_wire_status(received_header.status_code, message));
                    }
                    return Ok((received_header, received_body));
                }
                Classification::Callback => {
                    self.dispatch_callback(callback_in_progress, received_header.message_id, received_header.data_type, &received_body);
                }
                Classification::Stale => {
                    warn!(self.logger, "discarding stale reply"; "received_id" => received_header.message_id, "expected_id" => id);
                }
                Classification::Unexpected => {
                    return Err(MxNetError::new(
                        ErrorKind::NetworkIo,
                        format!("unexpected message id {} while awaiting {}", received_header.message_id, id),
                    ));
                }
            }
        }
    }

    /// Pumps the socket for a single pending server-initiated callback push
    /// without waiting on any particular RPC id, used by
    /// `Server::wait_for_messages` (`spec.md` §3 "Collaborator interfaces").
    /// Returns promptly if nothing is waiting; a read timeout is not an
    /// error here, since having nothing to deliver is the common case.
    fn pump_once(&mut self, callback_in_progress: &AtomicBool, deadline: Option<Instant>) -> Result<()> {
        let remaining = match deadline {
            None => None,
            Some(d) => {
                let now = Instant::now();
                if now >= d {
                    return Ok(());
                }
                Some(d - now)
            }
        };
        let transport = self.transport.as_mut().expect("connection brought up before pump_once");
        let received_header = match transport.receive(&mut self.buffer, remaining) {
            Ok(h) => h,
            Err(e) if e.kind == ErrorKind::TimedOut => return Ok(()),
            Err(e) => {
                if e.is_connection_loss() {
                    self.mark_lost();
                }
                return Err(e);
            }
        };
        let start = received_header.header_length as usize;
        let end = start + received_header.message_length as usize;
        let body = self.buffer.as_bytes()[start..end].to_vec();

        if received_header.is_callback_id() {
            self.dispatch_callback(callback_in_progress, received_header.message_id, received_header.data_type, &body);
        } else {
            warn!(self.logger, "dropping unsolicited non-callback message seen while pumping for callbacks";
                "message_id" => received_header.message_id);
        }
        Ok(())
    }

    /// Invokes the user handler registered for `callback_id`, if any, under
    /// the reentrancy guard (`spec.md` §4.9, §5 "Callback reentrancy").
    /// Decodes the pushed value as a scalar of the header's declared
    /// datatype; MX does not carry array shape on a callback push, so a
    /// scalar is the most it can assume without a prior `get_field_type`.
    fn dispatch_callback(&mut self, callback_in_progress: &AtomicBool, callback_id: u32, data_type: u32, body: &[u8]) {
        let value = DataType::from_wire(data_type).ok().and_then(|dt| {
            codec_for(self.data_format)
                .decode(&ValueShape::scalar(dt), self.use_64bit_longs, body)
                .ok()
        });
        let Some(value) = value else {
            warn!(self.logger, "dropping undecodable callback payload"; "callback_id" => callback_id);
            return;
        };
        callback_in_progress.store(true, Ordering::SeqCst);
        self.callbacks.dispatch(callback_id, &value);
        callback_in_progress.store(false, Ordering::SeqCst);
    }

    fn get_option_raw(&mut self, callback_in_progress: &AtomicBool, option_id: u32, deadline: Option<Instant>) -> Result<u32> {
        let mut body = [0u8; 4];
        BigEndian::write_u32(&mut body, option_id);
        let (_, response) = self.send_and_wait(callback_in_progress, request::opcode::GET_OPTION, 0, &body, deadline)?;
        if response.len() < 4 {
            return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short get-option response"));
        }
        Ok(BigEndian::read_u32(&response[0..4]))
    }

    fn set_option_raw(
        &mut self,
        callback_in_progress: &AtomicBool,
        option_id: u32,
        value: u32,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut body = [0u8; 8];
        BigEndian::write_u32(&mut body[0..4], option_id);
        BigEndian::write_u32(&mut body[4..8], value);
        self.send_and_wait(callback_in_progress, request::opcode::SET_OPTION, 0, &body, deadline)?;
        Ok(())
    }

    fn open_socket(&self) -> Result<Socket> {
        Ok(match &self.endpoint {
            Endpoint::Tcp { host, port } => Socket::Tcp(TcpStream::connect((host.as_str(), *port))?),
            #[cfg(unix)]
            Endpoint::Unix { path } => Socket::Unix(UnixStream::connect(path)?),
        })
    }

    fn bring_up(&mut self, callback_in_progress: &AtomicBool) -> Result<()> {
        let deadline = self.deadline();
        let socket = self.open_socket()?;
        self.transport = Some(Transport::new(socket));

        // Step 2: discover header length from the first real reply.
        let (header, _) = self.send_and_wait(
            callback_in_progress,
            request::opcode::GET_ARRAY_BY_NAME,
            0,
            &pad_name(WELL_KNOWN_DISCOVERY_FIELD),
            deadline,
        )?;
        self.header_length = header.header_length;
        if let Some(transport) = self.transport.as_mut() {
            transport.set_local_header_length(self.header_length);
        }

        // Step 3: negotiate data format.
        self.negotiate_data_format(callback_in_progress, deadline)?;

        // Step 4: fetch and remap remote version.
        self.fetch_remote_version(callback_in_progress, deadline)?;

        // Step 5: report client identity.
        self.report_client_info(callback_in_progress, deadline)?;

        // Step 6: optionally negotiate 64-bit longs.
        self.negotiate_64bit_longs(callback_in_progress, deadline)?;

        if self.ever_connected {
            self.generation += 1;
            self.handle_cache.bump_generation();
            self.status = ConnectionStatus::Reconnected;
        } else {
            self.ever_connected = true;
            self.status = ConnectionStatus::Connected;
        }
        self.handles_valid = false;
        info!(self.logger, "connection established";
            "header_length" => self.header_length,
            "data_format" => format!("{:?}", self.data_format),
            "use_64bit_longs" => self.use_64bit_longs,
        );
        Ok(())
    }

    fn negotiate_data_format(&mut self, callback_in_progress: &AtomicBool, deadline: Option<Instant>) -> Result<()> {
        let target = match self.options.requested_format {
            RequestedFormat::Fixed(format) => format,
            RequestedFormat::Negotiate => {
                let peer_endianness = self.get_option_raw(callback_in_progress, option::NATIVE_DATAFMT, deadline);
                let peer_wordsize = self.get_option_raw(callback_in_progress, option::WORDSIZE, deadline);
                match (peer_endianness, peer_wordsize) {
                    (Ok(endianness), Ok(wordsize)) if endianness == local_endianness_flag() && wordsize == local_wordsize() => {
                        DataFormat::Raw
                    }
                    (Ok(_), Ok(_)) => DataFormat::Xdr,
                    _ => {
                        debug!(self.logger, "peer does not support format introspection, falling back to XDR");
                        DataFormat::Xdr
                    }
                }
            }
        };

        match self.set_option_raw(callback_in_progress, option::DATAFMT, target.wire_tag(), deadline) {
            Ok(()) => {
                self.data_format = target;
                self.buffer.set_format(target);
            }
            Err(e) if e.is_not_yet_implemented() => {
                debug!(self.logger, "peer cannot negotiate data format, staying on ASCII");
                self.data_format = DataFormat::Ascii;
            }
            Err(e) if target != DataFormat::Ascii => {
                warn!(self.logger, "data format refused, falling back to ASCII"; "requested" => format!("{:?}", target), "error" => e.to_string());
                self.data_format = DataFormat::Ascii;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn fetch_remote_version(&mut self, callback_in_progress: &AtomicBool, deadline: Option<Instant>) -> Result<()> {
        let numeric = match self.get_option_raw(callback_in_progress, option::CLIENT_VERSION, deadline) {
            Ok(v) => remap_legacy_version(v),
            Err(e) if e.is_not_yet_implemented() => 0,
            Err(e) => return Err(e),
        };
        let version_time = match self.get_option_raw(callback_in_progress, option::CLIENT_VERSION_TIME, deadline) {
            Ok(v) => v,
            Err(e) if e.is_not_yet_implemented() => 0,
            Err(e) => return Err(e),
        };
        self.remote_version = Some(RemoteVersion { numeric, version_time });
        Ok(())
    }

    fn report_client_info(&mut self, callback_in_progress: &AtomicBool, deadline: Option<Instant>) -> Result<()> {
        let sanitize = |s: &str| -> String { s.chars().map(|c| if c.is_whitespace() { '_' } else { c }).collect() };
        let info = format!(
            "{} {} {}",
            sanitize(&self.options.username),
            sanitize(&self.options.program_name),
            std::process::id()
        );
        match self.send_and_wait(callback_in_progress, request::opcode::SET_CLIENT_INFO, 0, info.as_bytes(), deadline) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_yet_implemented() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn negotiate_64bit_longs(&mut self, callback_in_progress: &AtomicBool, deadline: Option<Instant>) -> Result<()> {
        if !self.options.request_64bit_longs || self.data_format != DataFormat::Raw {
            return Ok(());
        }
        let eligible = self.remote_version.map(|v| v.numeric >= MIN_VERSION_FOR_64BIT_LONGS).unwrap_or(false);
        if !eligible {
            return Ok(());
        }
        match self.set_option_raw(callback_in_progress, option::USE_64BIT_LONG, 1, deadline) {
            Ok(()) => {
                self.use_64bit_longs = true;
                Ok(())
            }
            Err(e) if e.is_not_yet_implemented() => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Re-issues every NetworkField callback after a reconnect, storing the
    /// server's freshly assigned id (`spec.md` §4.9, §8 invariant).
    /// Field-level callbacks never traveled to the server, so they are
    /// skipped here but remain registered locally.
    fn reregister_callbacks(&mut self, callback_in_progress: &AtomicBool) -> Result<()> {
        let deadline = self.deadline();
        let snapshot: Vec<(u32, String, u32, CallbackKind)> = self
            .callbacks
            .iter()
            .map(|c| (c.id, c.field_name.clone(), c.mask, c.kind))
            .collect();

        for (old_id, name, mask, kind) in snapshot {
            if kind != CallbackKind::NetworkField {
                continue;
            }
            let (_, body) = self.send_and_wait(callback_in_progress, request::opcode::GET_NETWORK_HANDLE, 0, &pad_name(&name), deadline)?;
            let handle = decode_handle(&body)?;
            self.handle_cache.insert(name.clone(), handle);

            let mut add_body = encode_handle(handle).to_vec();
            let mut mask_bytes = [0u8; 4];
            BigEndian::write_u32(&mut mask_bytes, mask);
            add_body.extend_from_slice(&mask_bytes);
            let (_, response) = self.send_and_wait(callback_in_progress, request::opcode::ADD_CALLBACK, 0, &add_body, deadline)?;
            if response.len() < 4 {
                return Err(MxNetError::new(ErrorKind::CorruptDataStructure, "short add-callback response"));
            }
            let new_id = BigEndian::read_u32(&response[0..4]);
            self.callbacks.reassign_id(old_id, new_id);
        }
        self.handles_valid = true;
        Ok(())
    }
}

fn local_endianness_flag() -> u32 {
    if cfg!(target_endian = "big") {
        1
    } else {
        0
    }
}

fn local_wordsize() -> u32 {
    std::mem::size_of::<usize>() as u32
}

/// A connection endpoint (`spec.md` §3 "Server"). Safe to share across
/// threads: one RPC is in flight per `Server` at a time
/// (`spec.md` §5 "Per-Server serialisation").
pub struct Server {
    inner: Mutex<ServerInner>,
    callback_in_progress: AtomicBool,
}

impl Server {
    pub fn new(endpoint: Endpoint, options: ConnectOptions, logger: Logger) -> Server {
        Server {
            inner: Mutex::new(ServerInner::new(endpoint, options, logger)),
            callback_in_progress: AtomicBool::new(false),
        }
    }

    pub fn with_default_logger(endpoint: Endpoint, options: ConnectOptions) -> Server {
        Server::new(endpoint, options, logging::discard())
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.lock().unwrap().status
    }

    pub fn handles_valid(&self) -> bool {
        self.inner.lock().unwrap().handles_valid
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().unwrap().generation
    }

    pub fn remote_version(&self) -> Option<RemoteVersion> {
        self.inner.lock().unwrap().remote_version
    }

    pub fn negotiated_format(&self) -> (DataFormat, bool) {
        let inner = self.inner.lock().unwrap();
        (inner.data_format, inner.use_64bit_longs)
    }

    pub fn supports_network_handles(&self) -> bool {
        self.inner.lock().unwrap().supports_network_handles
    }

    pub fn mark_network_handles_unsupported(&self) {
        self.inner.lock().unwrap().supports_network_handles = false;
    }

    pub fn cached_handle(&self, name: &str) -> Option<NetworkHandle> {
        self.inner.lock().unwrap().handle_cache.get(name)
    }

    pub fn cache_handle(&self, name: String, handle: NetworkHandle) {
        self.inner.lock().unwrap().handle_cache.insert(name, handle);
    }

    pub fn invalidate_handle(&self, name: &str) {
        self.inner.lock().unwrap().handle_cache.invalidate_one(name);
    }

    pub fn add_registered_callback(&self, callback: Callback) {
        self.inner.lock().unwrap().callbacks.add(callback);
    }

    pub fn remove_registered_callback(&self, id: u32) -> Option<Callback> {
        self.inner.lock().unwrap().callbacks.remove(id)
    }

    pub fn registered_callback_count(&self) -> usize {
        self.inner.lock().unwrap().callbacks.len()
    }

    pub fn default_deadline(&self) -> Option<Instant> {
        self.inner.lock().unwrap().deadline()
    }

    /// Sends `body` as `request_opcode` and waits for the matching
    /// response, reconnecting first if the transport was previously lost
    /// (`spec.md` §4.6 "Reconnect", §4.5 "Concurrency").
    pub fn raw_call(
        &self,
        request_opcode: u32,
        data_type: u32,
        body: &[u8],
        deadline: Option<Instant>,
    ) -> Result<(MessageHeader, Vec<u8>)> {
        if self.callback_in_progress.load(Ordering::SeqCst) {
            return Err(MxNetError::new(
                ErrorKind::CallbackInProgress,
                "RPC attempted on a Server from within its own callback handler",
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        self.bring_up_if_needed(&mut inner)?;
        inner.send_and_wait(&self.callback_in_progress, request_opcode, data_type, body, deadline)
    }

    fn bring_up_if_needed(&self, inner: &mut ServerInner) -> Result<()> {
        if inner.needs_reconnect() {
            inner.bring_up(&self.callback_in_progress)?;
            if inner.status == ConnectionStatus::Reconnected {
                inner.reregister_callbacks(&self.callback_in_progress)?;
            }
        }
        Ok(())
    }

    /// Processes one pending server-initiated callback, reconnecting and
    /// re-registering every `NetworkField` callback first if the connection
    /// had been lost since the last call (`spec.md` §3: "a `wait_for_messages`
    /// pump that processes any pending callbacks on a record list").
    /// Returns promptly if nothing is waiting. A connection that died since
    /// the previous call is only discovered by attempting I/O on it, so the
    /// call that first notices the loss reports the error; the following
    /// call reconnects and re-registers.
    pub fn wait_for_messages(&self, deadline: Option<Instant>) -> Result<()> {
        if self.callback_in_progress.load(Ordering::SeqCst) {
            return Err(MxNetError::new(
                ErrorKind::CallbackInProgress,
                "wait_for_messages called on a Server from within its own callback handler",
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        self.bring_up_if_needed(&mut inner)?;
        inner.pump_once(&self.callback_in_progress, deadline)
    }

    /// Forces the connection up without issuing a caller-visible RPC, used
    /// by the Server Directory's creation-time connect retry
    /// (`spec.md` §4.10: "Creation may retry the TCP connect once per
    /// second up to a caller-supplied timeout").
    pub fn ensure_connected(&self) -> Result<()> {
        if self.callback_in_progress.load(Ordering::SeqCst) {
            return Err(MxNetError::new(
                ErrorKind::CallbackInProgress,
                "connect attempted on a Server from within its own callback handler",
            ));
        }
        let mut inner = self.inner.lock().unwrap();
        self.bring_up_if_needed(&mut inner)
    }
}
