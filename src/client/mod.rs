//! SMB client connection, session and share-binding lifecycle.
//!
//! One [`Connection`] owns one transport stream and everything layered on
//! it: negotiated dialect, message-id counter, credit state, the sessions
//! authenticated over it and the share bindings under those. All state is
//! reached through `&mut self`, which pins a connection and its dependents
//! to a single execution context; independent connections need no
//! coordination with each other.

pub mod dircache;


use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::auth::{AuthIdentity, Authenticator};
use crate::error::{Error, NtStatus, Result};
use crate::protocol::constants::{SessionFlags, Smb2Command, Smb2Dialect};
use crate::protocol::frame;
use crate::protocol::header::{ParsedMessage, Smb2Header};
use crate::protocol::messages::common::pad_to_structure_size;
use crate::protocol::messages::negotiate::{NegotiateRequest, NegotiateResponse};
use crate::protocol::messages::session::{LogoffRequest, SessionSetupRequest, SessionSetupResponse};
use crate::protocol::messages::tree::{TreeConnectRequest, TreeConnectResponse, TreeDisconnectRequest};
use crate::protocol::messages::SmbMessage;
use crate::protocol::signing::SigningContext;
use crate::transport::tcp::TcpTransport;
use crate::transport::SmbTransport;
use dircache::DirCache;

/// Offsets between the Windows (1601) and Unix (1970) epochs, in seconds
const FILETIME_UNIX_DIFF: i64 = 11_644_473_600;

/// Server/client clock skew beyond this is treated as a misconfigured
/// clock and ignored rather than folded into timestamp translation
const MAX_TIME_SKEW_SECS: i64 = 18 * 3600;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Client GUID sent in negotiate
    pub client_guid: Uuid,
    /// Offered dialects, lowest to highest
    pub dialects: Vec<Smb2Dialect>,
    /// Workstation name reported during authentication
    pub workstation: String,
    /// Server name used to build UNC paths; defaults to the host given to
    /// `connect`
    pub server_name: String,
    /// Bound on each read while waiting for a response
    pub read_timeout: Duration,
    /// Credits asked for with every request
    pub credit_request: u16,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_guid: Uuid::new_v4(),
            dialects: Smb2Dialect::all().to_vec(),
            workstation: String::from("RUST-SMB2-CLIENT"),
            server_name: String::new(),
            read_timeout: Duration::from_secs(10),
            credit_request: 31,
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Negotiating,
    Established,
}

/// Handle to an authenticated session on a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u32);

/// Handle to a mounted share under a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeHandle {
    session: u32,
    tree: u32,
}

/// One authenticated identity bound to the connection
#[derive(Debug)]
struct Session {
    session_id: u64,
    identity: AuthIdentity,
    flags: SessionFlags,
    /// Present iff signing was negotiated and the session is neither
    /// guest nor anonymous
    signing: Option<SigningContext>,
    established: bool,
    trees: HashMap<u32, Tree>,
}

/// One mounted share bound to a session
#[derive(Debug)]
struct Tree {
    tree_id: u32,
    share_name: String,
    /// Bumped on every (re)connect of this share; cached directory state
    /// from an earlier epoch is stale
    epoch: u64,
    dir: DirCache,
}

/// A decoded response handed back to the caller
#[derive(Debug, Clone)]
pub struct ResponseView {
    pub header: Smb2Header,
    pub body: Vec<u8>,
}

impl ResponseView {
    pub fn status(&self) -> NtStatus {
        self.header.nt_status()
    }
}

/// Terminal classification of one request/response exchange
#[derive(Debug)]
pub(crate) enum Terminal {
    Done(ParsedMessage),
    MoreProcessingRequired(ParsedMessage),
    Failed(ParsedMessage, NtStatus),
}

/// Outcome of a reconnect walk: sessions that could not be re-established
/// are reported without blocking their siblings.
#[derive(Debug, Default)]
pub struct ReconnectReport {
    pub failed_sessions: Vec<(SessionHandle, Error)>,
    pub failed_trees: Vec<(TreeHandle, Error)>,
}

impl ReconnectReport {
    pub fn is_clean(&self) -> bool {
        self.failed_sessions.is_empty() && self.failed_trees.is_empty()
    }
}

/// SMB client connection
pub struct Connection {
    config: ClientConfig,
    transport: Box<dyn SmbTransport>,
    state: ConnectionState,
    dialect: Option<Smb2Dialect>,
    signing_required: bool,
    next_message_id: u64,
    granted_credits: u16,
    read_buffer: BytesMut,
    /// Well-formed responses that arrived while a different message id was
    /// being awaited; claimed later by `await_terminal`. Bounded; overflow
    /// falls back to discarding.
    parked_responses: Vec<(Vec<u8>, ParsedMessage)>,
    /// Seconds to add to server timestamps to get local time; retained
    /// across reconnects so a stable server clock keeps a stable offset
    time_offset_secs: Option<i64>,
    last_activity: Instant,
    max_transact_size: u32,
    sessions: HashMap<u32, Session>,
    next_handle: u32,
    epoch_counter: u64,
}

impl Connection {
    /// Connect to a server and negotiate the protocol.
    pub async fn connect(host: &str, port: u16, mut config: ClientConfig) -> Result<Self> {
        if config.server_name.is_empty() {
            config.server_name = host.to_string();
        }
        let transport = Box::new(TcpTransport::new(host, port));
        let mut conn = Self::with_transport(transport, config);
        conn.establish().await?;
        Ok(conn)
    }

    /// Build a connection over an arbitrary transport (tests drive the
    /// engine through an in-memory one). The caller still runs
    /// [`Connection::establish`].
    pub fn with_transport(transport: Box<dyn SmbTransport>, config: ClientConfig) -> Self {
        Self {
            config,
            transport,
            state: ConnectionState::Disconnected,
            dialect: None,
            signing_required: false,
            next_message_id: 0,
            granted_credits: 1,
            read_buffer: BytesMut::new(),
            parked_responses: Vec::new(),
            time_offset_secs: None,
            last_activity: Instant::now(),
            max_transact_size: 65536,
            sessions: HashMap::new(),
            next_handle: 1,
            epoch_counter: 0,
        }
    }

    /// Dial the transport and negotiate.
    pub async fn establish(&mut self) -> Result<()> {
        self.transport.connect().await?;
        self.read_buffer.clear();
        self.parked_responses.clear();
        self.next_message_id = 0;
        self.granted_credits = 1;
        self.negotiate().await
    }

    pub fn dialect(&self) -> Option<Smb2Dialect> {
        self.dialect
    }

    pub fn signing_required(&self) -> bool {
        self.signing_required
    }

    /// Credits the server granted on the most recent response.
    pub fn granted_credits(&self) -> u16 {
        self.granted_credits
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Whether a session authenticated as guest or null; such sessions
    /// never carry a signing key.
    pub fn session_is_guest_or_anonymous(&self, handle: SessionHandle) -> Option<bool> {
        self.sessions
            .get(&handle.0)
            .map(|session| session.flags.is_guest_or_anonymous())
    }

    /// Translate a server FILETIME into local Unix seconds using the
    /// offset recorded at negotiate.
    pub fn server_time_to_local(&self, filetime: u64) -> i64 {
        let server_unix = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DIFF;
        server_unix + self.time_offset_secs.unwrap_or(0)
    }

    // --- negotiate ---------------------------------------------------

    async fn negotiate(&mut self) -> Result<()> {
        self.state = ConnectionState::Negotiating;
        let request =
            NegotiateRequest::new(self.config.dialects.clone(), self.config.client_guid);
        let terminal = self
            .transact(Smb2Command::Negotiate, 0, 0, None, request.serialize()?)
            .await?;

        let message = match terminal {
            Terminal::Done(message) => message,
            Terminal::MoreProcessingRequired(_) => {
                return Err(Error::Wire("unexpected continuation to negotiate".into()))
            }
            Terminal::Failed(_, status) => return Err(Error::server(status)),
        };

        let response = NegotiateResponse::parse(&message.body)?;
        self.dialect = Some(response.dialect);
        self.signing_required = response.signing_required();
        self.max_transact_size = response.max_transact_size;
        self.record_server_time(response.system_time);
        self.state = ConnectionState::Established;
        debug!(
            dialect = ?response.dialect,
            signing = self.signing_required,
            "negotiated"
        );
        Ok(())
    }

    fn record_server_time(&mut self, filetime: u64) {
        if filetime == 0 {
            return;
        }
        let server_unix = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DIFF;
        let local_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let mut offset = local_unix - server_unix;
        if offset.abs() > MAX_TIME_SKEW_SECS {
            warn!(offset, "server clock skew beyond 18h, ignoring");
            offset = 0;
        }
        // A reconnect to the same server lands within a couple of seconds
        // of the previous offset; keep the old value so translated
        // timestamps do not jitter between connections.
        if let Some(prev) = self.time_offset_secs {
            if (offset - prev).abs() <= 2 {
                offset = prev;
            }
        }
        self.time_offset_secs = Some(offset);
    }

    // --- wire send/receive -------------------------------------------

    fn reserve_message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }

    /// Frame, pad, sign and send one request; returns the reserved
    /// message id for correlation.
    async fn post(
        &mut self,
        command: Smb2Command,
        tree_id: u32,
        session_id: u64,
        signing: Option<&SigningContext>,
        body: Vec<u8>,
    ) -> Result<u64> {
        let message_id = self.reserve_message_id();
        let header = Smb2Header::request(
            command,
            message_id,
            tree_id,
            session_id,
            self.config.credit_request,
            signing.is_some(),
        );

        let body = match command.request_structure_size() {
            Some(declared) => pad_to_structure_size(body, declared),
            None => body,
        };

        let mut message = header.serialize()?;
        message.extend_from_slice(&body);
        if let Some(ctx) = signing {
            ctx.sign(&mut message);
        }

        let framed = frame::encode_frame(&message)?;
        self.transport.send(&framed).await?;
        self.last_activity = Instant::now();
        trace!(?command, message_id, "request sent");
        Ok(message_id)
    }

    /// Read one frame off the stream, each read bounded by the configured
    /// timeout.
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = frame::split_frame(&mut self.read_buffer)? {
                return Ok(frame);
            }
            let chunk =
                tokio::time::timeout(self.config.read_timeout, self.transport.receive())
                    .await
                    .map_err(|_| Error::Timeout)??;
            self.read_buffer.extend_from_slice(&chunk);
        }
    }

    /// Cap on responses parked for later collection; beyond it the oldest
    /// are dropped, which a well-behaved exchange never reaches.
    const MAX_PARKED_RESPONSES: usize = 64;

    /// Loop-read until the response matching `message_id`/`command`
    /// arrives, classifying the terminal outcome.
    ///
    /// Interleaved async interim responses (STATUS_PENDING) are skipped;
    /// well-formed responses for other outstanding message ids are parked
    /// so pipelined requests can be collected in any order; frames that
    /// fail validation are retryable noise within the read timeout. An
    /// inbound signed message that fails verification is fatal to the
    /// call.
    async fn await_terminal(
        &mut self,
        message_id: u64,
        command: Smb2Command,
        signing: Option<&SigningContext>,
    ) -> Result<Terminal> {
        if let Some(pos) = self
            .parked_responses
            .iter()
            .position(|(_, p)| p.header.message_id == message_id && p.header.command == command)
        {
            let (raw, parsed) = self.parked_responses.remove(pos);
            if let Some(terminal) = self.classify(&raw, parsed, message_id, signing)? {
                return Ok(terminal);
            }
        }

        loop {
            let raw = self.read_frame().await?;
            let parsed = match ParsedMessage::decode_and_validate(&raw) {
                Ok(parsed) => parsed,
                Err(error) => {
                    trace!(%error, "discarding malformed frame");
                    continue;
                }
            };

            if !parsed.header.is_response()
                || parsed.header.message_id != message_id
                || parsed.header.command != command
            {
                if parsed.header.is_response()
                    && self.parked_responses.len() < Self::MAX_PARKED_RESPONSES
                {
                    trace!(
                        got = parsed.header.message_id,
                        want = message_id,
                        "parking response for another message id"
                    );
                    self.parked_responses.push((raw, parsed));
                } else {
                    trace!(
                        got = parsed.header.message_id,
                        want = message_id,
                        "discarding non-matching response"
                    );
                }
                continue;
            }

            if let Some(terminal) = self.classify(&raw, parsed, message_id, signing)? {
                return Ok(terminal);
            }
        }
    }

    /// Classify one matching response; `None` means an interim pending
    /// answer that the read loop should skip.
    fn classify(
        &mut self,
        raw: &[u8],
        parsed: ParsedMessage,
        message_id: u64,
        signing: Option<&SigningContext>,
    ) -> Result<Option<Terminal>> {
        let status = parsed.header.nt_status();
        if parsed.header.is_async() && status == NtStatus::Pending {
            trace!(message_id, "interim pending response, still waiting");
            return Ok(None);
        }

        if parsed.header.is_signed() {
            if let Some(ctx) = signing {
                if !ctx.verify(raw) {
                    return Err(Error::Wire(format!(
                        "signature verification failed on message {}",
                        message_id
                    )));
                }
            }
        }

        self.granted_credits = parsed.header.credits;
        self.last_activity = Instant::now();

        Ok(Some(match status {
            NtStatus::Success => Terminal::Done(parsed),
            NtStatus::MoreProcessingRequired => Terminal::MoreProcessingRequired(parsed),
            status => Terminal::Failed(parsed, status),
        }))
    }

    async fn transact(
        &mut self,
        command: Smb2Command,
        tree_id: u32,
        session_id: u64,
        signing: Option<SigningContext>,
        body: Vec<u8>,
    ) -> Result<Terminal> {
        let message_id = self
            .post(command, tree_id, session_id, signing.as_ref(), body)
            .await?;
        self.await_terminal(message_id, command, signing.as_ref()).await
    }

    // --- session lifecycle -------------------------------------------

    /// Authenticate an identity and bind it to this connection.
    pub async fn session_setup(&mut self, identity: AuthIdentity) -> Result<SessionHandle> {
        self.require_established()?;
        let (session_id, flags, signing) =
            self.run_session_setup(identity.clone(), 0).await?;

        let key = self.next_handle;
        self.next_handle += 1;
        self.sessions.insert(
            key,
            Session {
                session_id,
                identity,
                flags,
                signing,
                established: true,
                trees: HashMap::new(),
            },
        );
        debug!(session_id, handle = key, "session established");
        Ok(SessionHandle(key))
    }

    /// Drive the auth engine through the SessionSetup exchange. Returns
    /// the new session id, its flags and the signing context if one
    /// applies.
    async fn run_session_setup(
        &mut self,
        identity: AuthIdentity,
        previous_session_id: u64,
    ) -> Result<(u64, SessionFlags, Option<SigningContext>)> {
        let dialect = self
            .dialect
            .ok_or_else(|| Error::InvalidState("no negotiated dialect".into()))?;

        let mut authenticator = Authenticator::new(identity.clone());
        let mut token = authenticator.step(&[])?;
        let mut session_id = 0u64;

        loop {
            let request = SessionSetupRequest::new(token, previous_session_id);
            let terminal = self
                .transact(
                    Smb2Command::SessionSetup,
                    0,
                    session_id,
                    None,
                    request.serialize()?,
                )
                .await?;

            match terminal {
                Terminal::MoreProcessingRequired(message) => {
                    session_id = message.header.session_id;
                    let response = SessionSetupResponse::parse(&message.body)?;
                    token = authenticator.step(&response.security_blob)?;
                }
                Terminal::Done(message) => {
                    session_id = message.header.session_id;
                    let response = SessionSetupResponse::parse(&message.body)?;
                    let flags = response.session_flags;

                    let signing = if self.signing_required
                        && !flags.is_guest_or_anonymous()
                        && !identity.is_anonymous()
                    {
                        let key = authenticator.session_key().ok_or_else(|| {
                            Error::Auth("handshake finished without a session key".into())
                        })?;
                        Some(SigningContext::new(dialect, key))
                    } else {
                        None
                    };
                    return Ok((session_id, flags, signing));
                }
                Terminal::Failed(_, status) => {
                    return Err(if status == NtStatus::LogonFailure {
                        Error::Auth("server rejected the credentials".into())
                    } else {
                        Error::server(status)
                    });
                }
            }
        }
    }

    /// Issue a best-effort logoff and drop the session and its trees.
    pub async fn logoff(&mut self, handle: SessionHandle) -> Result<()> {
        let (session_id, signing) = match self.sessions.get(&handle.0) {
            Some(session) => (session.session_id, session.signing.clone()),
            None => return Err(Error::InvalidState("unknown session handle".into())),
        };
        // Cleanup errors never mask the teardown
        if let Err(error) = self
            .transact(
                Smb2Command::Logoff,
                0,
                session_id,
                signing,
                LogoffRequest.serialize()?,
            )
            .await
        {
            debug!(%error, "logoff failed, tearing down locally");
        }
        self.sessions.remove(&handle.0);
        Ok(())
    }

    // --- share binding -----------------------------------------------

    /// Bind a share to a session.
    pub async fn tree_connect(
        &mut self,
        session: SessionHandle,
        share: &str,
    ) -> Result<TreeHandle> {
        self.require_established()?;
        let (session_id, signing) = self.session_context(session)?;

        let tree_id = self
            .run_tree_connect(session_id, signing, share)
            .await?;

        self.epoch_counter += 1;
        let epoch = self.epoch_counter;
        let key = self.next_handle;
        self.next_handle += 1;

        let session_entry = self
            .sessions
            .get_mut(&session.0)
            .ok_or_else(|| Error::InvalidState("unknown session handle".into()))?;
        session_entry.trees.insert(
            key,
            Tree {
                tree_id,
                share_name: share.to_string(),
                epoch,
                dir: DirCache::default(),
            },
        );
        debug!(tree_id, share, "tree connected");
        Ok(TreeHandle {
            session: session.0,
            tree: key,
        })
    }

    async fn run_tree_connect(
        &mut self,
        session_id: u64,
        signing: Option<SigningContext>,
        share: &str,
    ) -> Result<u32> {
        let server_name = self.config.server_name.clone();
        let request = TreeConnectRequest::new(&server_name, share);
        let terminal = self
            .transact(
                Smb2Command::TreeConnect,
                0,
                session_id,
                signing,
                request.serialize()?,
            )
            .await?;

        match terminal {
            Terminal::Done(message) => {
                TreeConnectResponse::parse(&message.body)?;
                Ok(message.header.tree_id)
            }
            Terminal::MoreProcessingRequired(_) => {
                Err(Error::Wire("unexpected continuation to tree connect".into()))
            }
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }

    /// Best-effort unbind: the share state is torn down locally whether or
    /// not the server acknowledges the disconnect.
    pub async fn tree_disconnect(&mut self, handle: TreeHandle) -> Result<()> {
        let (session_id, tree_id, signing) = self.tree_context(handle)?;

        // Close the enumeration handle first, also best-effort
        let dir_handle = match self.tree_mut(handle) {
            Ok(tree) => tree.dir.take_handle(),
            Err(_) => None,
        };
        if let Some(file_id) = dir_handle {
            let _ = self.close_file(handle, file_id).await;
        }

        let request = TreeDisconnectRequest.serialize()?;
        if let Err(error) = self
            .transact(Smb2Command::TreeDisconnect, tree_id, session_id, signing, request)
            .await
        {
            debug!(%error, "tree disconnect failed, tearing down locally");
        }

        if let Some(session) = self.sessions.get_mut(&handle.session) {
            session.trees.remove(&handle.tree);
        }
        Ok(())
    }

    // --- generic request path ----------------------------------------

    /// Send an arbitrary command under a share binding and wait for its
    /// terminal response. `MoreProcessingRequired` is handed back to the
    /// caller in the view; failure statuses become `Error::Server`.
    pub async fn send_request(
        &mut self,
        handle: TreeHandle,
        command: Smb2Command,
        body: Vec<u8>,
    ) -> Result<ResponseView> {
        self.require_established()?;
        let (session_id, tree_id, signing) = self.tree_context(handle)?;
        let terminal = self
            .transact(command, tree_id, session_id, signing, body)
            .await?;
        match terminal {
            Terminal::Done(message) | Terminal::MoreProcessingRequired(message) => {
                Ok(ResponseView {
                    header: message.header,
                    body: message.body,
                })
            }
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }

    /// Post a request without waiting, for callers that pipeline several
    /// commands before collecting responses.
    pub async fn post_request(
        &mut self,
        handle: TreeHandle,
        command: Smb2Command,
        body: Vec<u8>,
    ) -> Result<u64> {
        self.require_established()?;
        let (session_id, tree_id, signing) = self.tree_context(handle)?;
        self.post(command, tree_id, session_id, signing.as_ref(), body)
            .await
    }

    /// Collect the response for a previously posted request, regardless of
    /// arrival order.
    pub async fn await_response(
        &mut self,
        handle: TreeHandle,
        message_id: u64,
        command: Smb2Command,
    ) -> Result<ResponseView> {
        let (_, _, signing) = self.tree_context(handle)?;
        let terminal = self
            .await_terminal(message_id, command, signing.as_ref())
            .await?;
        match terminal {
            Terminal::Done(message) | Terminal::MoreProcessingRequired(message) => {
                Ok(ResponseView {
                    header: message.header,
                    body: message.body,
                })
            }
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }

    /// SMB2 ECHO keep-alive; refreshes the activity clock.
    pub async fn echo(&mut self) -> Result<()> {
        self.require_established()?;
        let body = crate::protocol::messages::echo::EchoRequest.serialize()?;
        match self.transact(Smb2Command::Echo, 0, 0, None, body).await? {
            Terminal::Done(_) => Ok(()),
            Terminal::MoreProcessingRequired(_) => {
                Err(Error::Wire("unexpected continuation to echo".into()))
            }
            Terminal::Failed(_, status) => Err(Error::server(status)),
        }
    }

    // --- reconnection ------------------------------------------------

    /// Re-establish the transport after a failure and rebuild every
    /// dependent session and share binding.
    ///
    /// Caller-triggered: invoked by whichever operation observed the
    /// transport error. Sessions re-authenticate from their retained
    /// identities (prior session id supplied as a continuation hint) and
    /// every tree re-connects under a fresh epoch, invalidating cached
    /// directory state. A failing session or tree is reported without
    /// blocking its siblings.
    pub async fn reconnect(&mut self) -> Result<ReconnectReport> {
        debug!("reconnecting");
        self.transport.abort().await;
        self.state = ConnectionState::Disconnected;
        for session in self.sessions.values_mut() {
            session.established = false;
        }

        // Negotiation failure aborts the whole reconnect; dependents are
        // only rebuilt on a freshly negotiated stream.
        self.establish().await?;

        let mut report = ReconnectReport::default();
        let session_keys: Vec<u32> = self.sessions.keys().copied().collect();
        for key in session_keys {
            let (identity, old_session_id) = {
                let session = &self.sessions[&key];
                (session.identity.clone(), session.session_id)
            };

            match self.run_session_setup(identity, old_session_id).await {
                Ok((session_id, flags, signing)) => {
                    let session = self.sessions.get_mut(&key).expect("session present");
                    session.session_id = session_id;
                    session.flags = flags;
                    session.signing = signing;
                    session.established = true;
                    debug!(session_id, handle = key, "session re-established");
                }
                Err(error) => {
                    warn!(handle = key, %error, "session re-authentication failed");
                    report.failed_sessions.push((SessionHandle(key), error));
                    continue;
                }
            }

            let tree_keys: Vec<u32> = self.sessions[&key].trees.keys().copied().collect();
            for tree_key in tree_keys {
                let handle = TreeHandle {
                    session: key,
                    tree: tree_key,
                };
                if let Err(error) = self.rebind_tree(handle).await {
                    warn!(?handle, %error, "tree re-connect failed");
                    report.failed_trees.push((handle, error));
                }
            }
        }
        Ok(report)
    }

    async fn rebind_tree(&mut self, handle: TreeHandle) -> Result<()> {
        let (session_id, signing) = self.session_context(SessionHandle(handle.session))?;
        let share = self.tree(handle)?.share_name.clone();
        let tree_id = self.run_tree_connect(session_id, signing, &share).await?;

        self.epoch_counter += 1;
        let epoch = self.epoch_counter;
        let tree = self.tree_mut(handle)?;
        tree.tree_id = tree_id;
        tree.epoch = epoch;
        // The enumeration handle died with the old stream; cached entries
        // become invisible through the epoch mismatch and are dropped on
        // next use.
        tree.dir.forget_stale_handle();
        debug!(tree_id, share = %share, epoch, "tree re-established");
        Ok(())
    }

    /// Tear the connection down: best-effort logoff for each session, then
    /// abort the stream.
    pub async fn disconnect(&mut self) -> Result<()> {
        let handles: Vec<SessionHandle> =
            self.sessions.keys().copied().map(SessionHandle).collect();
        for handle in handles {
            let _ = self.logoff(handle).await;
        }
        self.transport.abort().await;
        self.state = ConnectionState::Disconnected;
        self.read_buffer.clear();
        Ok(())
    }

    // --- lookups -----------------------------------------------------

    fn require_established(&self) -> Result<()> {
        if self.state != ConnectionState::Established {
            return Err(Error::InvalidState(format!(
                "connection is {:?}",
                self.state
            )));
        }
        Ok(())
    }

    fn session_context(
        &self,
        handle: SessionHandle,
    ) -> Result<(u64, Option<SigningContext>)> {
        let session = self
            .sessions
            .get(&handle.0)
            .ok_or_else(|| Error::InvalidState("unknown session handle".into()))?;
        if !session.established {
            return Err(Error::InvalidState(
                "session is not established; reconnect first".into(),
            ));
        }
        Ok((session.session_id, session.signing.clone()))
    }

    fn tree_context(
        &self,
        handle: TreeHandle,
    ) -> Result<(u64, u32, Option<SigningContext>)> {
        let (session_id, signing) = self.session_context(SessionHandle(handle.session))?;
        let tree = self.tree(handle)?;
        Ok((session_id, tree.tree_id, signing))
    }

    fn tree(&self, handle: TreeHandle) -> Result<&Tree> {
        self.sessions
            .get(&handle.session)
            .and_then(|session| session.trees.get(&handle.tree))
            .ok_or_else(|| Error::InvalidState("unknown tree handle".into()))
    }

    fn tree_mut(&mut self, handle: TreeHandle) -> Result<&mut Tree> {
        self.sessions
            .get_mut(&handle.session)
            .and_then(|session| session.trees.get_mut(&handle.tree))
            .ok_or_else(|| Error::InvalidState("unknown tree handle".into()))
    }

    #[cfg(test)]
    pub(crate) fn session_id_of(&self, handle: SessionHandle) -> Option<u64> {
        self.sessions.get(&handle.0).map(|s| s.session_id)
    }

    #[cfg(test)]
    pub(crate) fn tree_epoch_of(&self, handle: TreeHandle) -> Option<u64> {
        self.sessions
            .get(&handle.session)
            .and_then(|s| s.trees.get(&handle.tree))
            .map(|t| t.epoch)
    }
}
