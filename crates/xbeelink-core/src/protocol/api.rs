//! XBee API session
//!
//! [`XBee`] owns the framer, hands out frame IDs, matches replies to pending
//! requests and forwards unsolicited frames to the [`NetworkListener`].
//!
//! Received data is delivered from the transport's reader thread. Every lock
//! in here is a short critical section: none is held across an `.await` and
//! none is held while the listener runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::at_commands::{at_command_type, AtValue};
use super::command_mode::{CommandModeResponse, TransitionState};
use super::commands::{Command, ExplicitTxParams, Response};
use super::gateway::{Gateway, Inbound};
use super::state::ConnectionState;
use super::stream::{EventSink, SerialTransport, Transport, TransportEvent};
use super::types::{
    AtCommandStatus, Eui64, Field, FrameId, ModemStatus, Nwk, RegistrationStatus,
    RemoteAtOptions, TxStatus,
};
use super::{
    reconnect_delay, ProtocolError, AT_COMMAND_TIMEOUT, RECONNECT_ATTEMPT_TIMEOUT,
    REMOTE_AT_COMMAND_TIMEOUT, TX_STATUS_TIMEOUT,
};
use crate::config::DeviceConfig;

/// Application data received from the network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplicitRx {
    pub src_ieee: Eui64,
    pub src_nwk: Nwk,
    pub src_ep: u8,
    pub dst_ep: u8,
    pub cluster: u16,
    pub profile: u16,
    pub rx_options: u8,
    pub data: Vec<u8>,
}

/// Upward interface to the network layer
pub trait NetworkListener: Send + Sync {
    /// A modem status frame arrived
    fn handle_modem_status(&self, status: ModemStatus);

    /// Application data arrived
    fn handle_rx(&self, rx: ExplicitRx);

    /// The serial link went away unexpectedly
    fn connection_lost(&self, error: &ProtocolError);
}

/// Successful outcome of a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Value of a local or remote AT command, `None` if it returns nothing
    At(Option<AtValue>),
    Tx(TxStatus),
    Registration(RegistrationStatus),
}

impl Reply {
    pub fn into_at_value(self) -> Result<Option<AtValue>, ProtocolError> {
        match self {
            Reply::At(value) => Ok(value),
            other => Err(ProtocolError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub fn into_tx_status(self) -> Result<TxStatus, ProtocolError> {
        match self {
            Reply::Tx(status) => Ok(status),
            other => Err(ProtocolError::UnexpectedReply(format!("{:?}", other))),
        }
    }

    pub fn into_registration_status(self) -> Result<RegistrationStatus, ProtocolError> {
        match self {
            Reply::Registration(status) => Ok(status),
            other => Err(ProtocolError::UnexpectedReply(format!("{:?}", other))),
        }
    }
}

type ReplySender = oneshot::Sender<Result<Reply, ProtocolError>>;

/// Future side of a request that expects a reply
#[derive(Debug)]
pub struct PendingReply {
    frame_id: FrameId,
    rx: oneshot::Receiver<Result<Reply, ProtocolError>>,
}

impl PendingReply {
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    /// Wait for the reply. Dropping this instead abandons the request
    pub async fn recv(self) -> Result<Reply, ProtocolError> {
        let frame_id = self.frame_id;
        self.rx
            .await
            .map_err(|_| ProtocolError::ReplyDropped(frame_id))?
    }
}

/// Frame ID sequence and the requests waiting on a reply
#[derive(Debug)]
struct PendingRequests {
    seq: FrameId,
    awaiting: HashMap<FrameId, ReplySender>,
}

impl PendingRequests {
    fn new() -> Self {
        Self {
            seq: 1,
            awaiting: HashMap::new(),
        }
    }

    /// 1..=255, never 0
    fn advance(&mut self) {
        self.seq = (self.seq % 255) + 1;
    }

    fn insert(&mut self, frame_id: FrameId) -> oneshot::Receiver<Result<Reply, ProtocolError>> {
        // Requests whose callers gave up
        self.awaiting.retain(|_, tx| !tx.is_closed());

        let (tx, rx) = oneshot::channel();
        if self.awaiting.insert(frame_id, tx).is_some() {
            debug!("Frame ID {} reused while a request was still pending", frame_id);
        }
        rx
    }
}

type FrameHandler = fn(&XBee, Vec<Field>) -> Result<(), ProtocolError>;

/// Opens the transport for a session, wiring received data into `EventSink`
pub type Opener =
    Arc<dyn Fn(&DeviceConfig, EventSink) -> Result<Box<dyn Transport>, ProtocolError> + Send + Sync>;

fn serial_opener() -> Opener {
    Arc::new(|config: &DeviceConfig, sink: EventSink| {
        let transport = SerialTransport::open(&config.path, config.baud_rate, sink)?;
        Ok(Box::new(transport) as Box<dyn Transport>)
    })
}

pub(crate) struct Shared {
    config: DeviceConfig,
    opener: Opener,
    gateway: Mutex<Option<Gateway>>,
    /// Bumped on every connect/close so events of a previous link are ignored
    generation: AtomicU64,
    pending: Mutex<PendingRequests>,
    pub(crate) command_mode: Mutex<Option<oneshot::Sender<CommandModeResponse>>>,
    pub(crate) transition: Mutex<TransitionState>,
    listener: RwLock<Option<Arc<dyn NetworkListener>>>,
    handlers: HashMap<Response, FrameHandler>,
    state: ConnectionState,
    reconnect_task: Mutex<Option<JoinHandle<()>>>,
    runtime: Option<Handle>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A session with one XBee module
#[derive(Clone)]
pub struct XBee {
    pub(crate) shared: Arc<Shared>,
}

impl XBee {
    /// Session over the serial port named in `config`. Nothing is opened yet
    pub fn new(config: DeviceConfig) -> Self {
        Self::with_opener(config, serial_opener())
    }

    /// Session over a custom transport
    pub fn with_opener(config: DeviceConfig, opener: Opener) -> Self {
        let shared = Shared {
            config,
            opener,
            gateway: Mutex::new(None),
            generation: AtomicU64::new(0),
            pending: Mutex::new(PendingRequests::new()),
            command_mode: Mutex::new(None),
            transition: Mutex::new(TransitionState::Idle),
            listener: RwLock::new(None),
            handlers: default_handlers(),
            state: ConnectionState::new(),
            reconnect_task: Mutex::new(None),
            runtime: Handle::try_current().ok(),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.shared.config
    }

    /// Reset / started / associated latches
    pub fn state(&self) -> &ConnectionState {
        &self.shared.state
    }

    /// True once the coordinator reported it started its network
    pub fn is_running(&self) -> bool {
        self.shared.state.coordinator_started.is_set()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.shared.gateway).is_some()
    }

    pub fn set_listener(&self, listener: Arc<dyn NetworkListener>) {
        let mut slot = self
            .shared
            .listener
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *slot = Some(listener);
    }

    fn listener(&self) -> Option<Arc<dyn NetworkListener>> {
        self.shared
            .listener
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Frame ID the next sequenced request will carry
    pub fn next_frame_id(&self) -> FrameId {
        lock(&self.shared.pending).seq
    }

    /// Open the transport and wait until it reports it is up
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        self.shared.config.validate()?;

        let (connected_tx, connected_rx) = oneshot::channel();
        let generation = {
            let mut gateway = lock(&self.shared.gateway);
            if gateway.is_some() {
                return Err(ProtocolError::AlreadyConnected);
            }
            *gateway = Some(Gateway::new(Some(connected_tx)));
            self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let sink = self.event_sink(generation);
        let mut transport = match (self.shared.opener)(&self.shared.config, sink) {
            Ok(transport) => transport,
            Err(e) => {
                self.drop_gateway();
                return Err(e);
            }
        };

        {
            let mut gateway = lock(&self.shared.gateway);
            match gateway.as_mut() {
                Some(gateway) if self.shared.generation.load(Ordering::SeqCst) == generation => {
                    gateway.attach(transport)
                }
                _ => {
                    transport.close();
                    return Err(ProtocolError::ConnectionFailed(
                        "closed while connecting".to_string(),
                    ));
                }
            }
        }

        match connected_rx.await {
            Ok(Ok(())) => {
                info!(
                    "Connected to '{}' at {} baud",
                    self.shared.config.path, self.shared.config.baud_rate
                );
                Ok(())
            }
            Ok(Err(e)) => {
                self.drop_gateway();
                Err(e)
            }
            Err(_) => {
                self.drop_gateway();
                Err(ProtocolError::ConnectionFailed(
                    "transport closed before it started".to_string(),
                ))
            }
        }
    }

    /// Close the transport and stop reconnecting
    pub fn close(&self) {
        if let Some(task) = lock(&self.shared.reconnect_task).take() {
            task.abort();
        }
        self.drop_gateway();
    }

    fn drop_gateway(&self) {
        let gateway = {
            let mut slot = lock(&self.shared.gateway);
            self.shared.generation.fetch_add(1, Ordering::SeqCst);
            slot.take()
        };
        if let Some(mut gateway) = gateway {
            gateway.close();
        }
    }

    fn event_sink(&self, generation: u64) -> EventSink {
        let weak = Arc::downgrade(&self.shared);
        Box::new(move |event| {
            let Some(shared) = weak.upgrade() else {
                return;
            };
            if shared.generation.load(Ordering::SeqCst) != generation {
                debug!("Ignoring {:?} from a previous connection", event);
                return;
            }
            XBee { shared }.transport_event(event);
        })
    }

    fn transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Opened => {
                if let Some(gateway) = lock(&self.shared.gateway).as_mut() {
                    gateway.connection_made();
                }
            }
            TransportEvent::Data(data) => self.data_received(&data),
            TransportEvent::Closed(error) => self.transport_closed(error),
        }
    }

    fn transport_closed(&self, error: Option<std::io::Error>) {
        let lost = match lock(&self.shared.gateway).as_mut() {
            Some(gateway) => gateway.connection_lost(error),
            None => return,
        };
        if let Some(error) = lost {
            self.connection_lost(error);
        }
    }

    /// Tear down after an unexpected disconnect and start reconnecting
    pub fn connection_lost(&self, error: ProtocolError) {
        warn!(
            "Serial '{}' connection lost unexpectedly: {}",
            self.shared.config.path, error
        );
        self.drop_gateway();

        if let Some(listener) = self.listener() {
            listener.connection_lost(&error);
        }
        if self.shared.config.reconnect {
            self.spawn_reconnect();
        }
    }

    fn spawn_reconnect(&self) {
        let Some(runtime) = self.shared.runtime.as_ref() else {
            warn!("No async runtime available, not reconnecting");
            return;
        };
        let mut task = lock(&self.shared.reconnect_task);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let weak = Arc::downgrade(&self.shared);
        *task = Some(runtime.spawn(reconnect_till_done(weak)));
    }

    /// Feed bytes received from the transport
    pub fn data_received(&self, data: &[u8]) {
        let inbound = match lock(&self.shared.gateway).as_mut() {
            Some(gateway) => gateway.data_received(data),
            None => {
                debug!("Dropping {} bytes received while disconnected", data.len());
                return;
            }
        };

        for item in inbound {
            match item {
                Inbound::Frame(frame) => self.frame_received(&frame),
                Inbound::CommandModeResponse(line) => self.handle_command_mode_rsp(&line),
            }
        }
    }

    /// Send a request frame.
    ///
    /// Returns a [`PendingReply`] if the request has a reply type and was not
    /// sent with a masked (zero) frame ID.
    pub fn send_command(
        &self,
        command: Command,
        args: Vec<Field>,
        mask_frame_id: bool,
    ) -> Result<Option<PendingReply>, ProtocolError> {
        debug!("Command {} {:?}", command, args);

        let mut gateway = lock(&self.shared.gateway);
        let gateway = gateway.as_mut().ok_or(ProtocolError::NotConnected)?;
        let mut pending = lock(&self.shared.pending);

        let frame_id = if mask_frame_id { 0 } else { pending.seq };
        let mut fields = Vec::with_capacity(args.len() + 1);
        fields.push(Field::FrameId(frame_id));
        fields.extend(args);
        let payload = command.encode(&fields)?;

        let reply = if command.reply().is_some() && frame_id != 0 {
            Some(PendingReply {
                frame_id,
                rx: pending.insert(frame_id),
            })
        } else {
            None
        };

        if let Err(e) = gateway.send(&payload) {
            if reply.is_some() {
                pending.awaiting.remove(&frame_id);
            }
            return Err(e);
        }
        pending.advance();
        Ok(reply)
    }

    fn send_expecting_reply(
        &self,
        command: Command,
        args: Vec<Field>,
    ) -> Result<PendingReply, ProtocolError> {
        self.send_command(command, args, false)?.ok_or_else(|| {
            ProtocolError::UnexpectedReply(format!("{} does not produce a reply", command))
        })
    }

    /// Run a local AT command and return its value
    pub async fn at_command(
        &self,
        command: &str,
        value: Option<AtValue>,
    ) -> Result<Option<AtValue>, ProtocolError> {
        self.at_partial(Command::At, command, value).await
    }

    /// Queue a local AT command; it takes effect on `AC` or `WR`
    pub async fn queued_at_command(
        &self,
        command: &str,
        value: Option<AtValue>,
    ) -> Result<Option<AtValue>, ProtocolError> {
        self.at_partial(Command::QueuedAt, command, value).await
    }

    async fn at_partial(
        &self,
        kind: Command,
        command: &str,
        value: Option<AtValue>,
    ) -> Result<Option<AtValue>, ProtocolError> {
        debug!("{} command: {} {:?}", kind, command, value);
        let (mnemonic, data) = encode_at_request(command, value.as_ref())?;
        let reply =
            self.send_expecting_reply(kind, vec![Field::AtCommand(mnemonic), Field::Bytes(data)])?;

        match await_reply(reply, AT_COMMAND_TIMEOUT).await {
            Some(result) => result?.into_at_value(),
            None => {
                warn!("{}: No response to {} command", kind, command);
                Err(ProtocolError::Timeout(command.to_string()))
            }
        }
    }

    /// Run an AT command on another module in the network
    pub async fn remote_at_command(
        &self,
        ieee: Eui64,
        nwk: Nwk,
        options: RemoteAtOptions,
        command: &str,
        value: Option<AtValue>,
    ) -> Result<Option<AtValue>, ProtocolError> {
        debug!("Remote AT command: {} {:?}", command, value);
        let (mnemonic, data) = encode_at_request(command, value.as_ref())?;
        let reply = self.send_expecting_reply(
            Command::RemoteAt,
            vec![
                Field::Eui64(ieee),
                Field::Nwk(nwk),
                Field::U8(options.0),
                Field::AtCommand(mnemonic),
                Field::Bytes(data),
            ],
        )?;

        match await_reply(reply, REMOTE_AT_COMMAND_TIMEOUT).await {
            Some(result) => result?.into_at_value(),
            None => {
                warn!("No response to {} command", command);
                Err(ProtocolError::Timeout(command.to_string()))
            }
        }
    }

    /// Transmit application data and wait for the delivery report
    pub async fn tx_explicit(&self, params: ExplicitTxParams) -> Result<TxStatus, ProtocolError> {
        let reply = self.send_expecting_reply(Command::TxExplicit, params.into_fields())?;

        match await_reply(reply, TX_STATUS_TIMEOUT).await {
            Some(result) => result?.into_tx_status(),
            None => {
                warn!("No delivery report for tx_explicit");
                Err(ProtocolError::Timeout(Command::TxExplicit.to_string()))
            }
        }
    }

    /// Register a device allowed to join with `key` (link key or install code)
    pub async fn register_joining_device(
        &self,
        ieee: Eui64,
        key_options: u8,
        key: Vec<u8>,
    ) -> Result<RegistrationStatus, ProtocolError> {
        let reply = self.send_expecting_reply(
            Command::RegisterJoiningDevice,
            vec![
                Field::Eui64(ieee),
                Field::U16(Nwk::UNKNOWN.0),
                Field::U8(key_options),
                Field::Bytes(key),
            ],
        )?;

        match await_reply(reply, AT_COMMAND_TIMEOUT).await {
            Some(result) => result?.into_registration_status(),
            None => {
                warn!("No response to register_joining_device for {}", ieee);
                Err(ProtocolError::Timeout(
                    Command::RegisterJoiningDevice.to_string(),
                ))
            }
        }
    }

    /// Install a source route to `ieee`/`nwk` through `relays`
    pub fn create_source_route(
        &self,
        ieee: Eui64,
        nwk: Nwk,
        relays: Vec<Nwk>,
    ) -> Result<(), ProtocolError> {
        self.send_command(
            Command::CreateSourceRoute,
            vec![
                Field::Eui64(ieee),
                Field::Nwk(nwk),
                Field::U8(0),
                Field::Relays(relays),
            ],
            true,
        )?;
        Ok(())
    }

    pub(crate) fn baud_rate(&self) -> Result<u32, ProtocolError> {
        lock(&self.shared.gateway)
            .as_ref()
            .and_then(|g| g.baud_rate())
            .ok_or(ProtocolError::NotConnected)
    }

    pub(crate) fn set_baud_rate(&self, baud_rate: u32) -> Result<(), ProtocolError> {
        lock(&self.shared.gateway)
            .as_mut()
            .ok_or(ProtocolError::NotConnected)?
            .set_baud_rate(baud_rate)
    }

    pub(crate) fn with_gateway<T>(
        &self,
        f: impl FnOnce(&mut Gateway) -> Result<T, ProtocolError>,
    ) -> Result<T, ProtocolError> {
        let mut gateway = lock(&self.shared.gateway);
        f(gateway.as_mut().ok_or(ProtocolError::NotConnected)?)
    }

    /// Decode an API frame and hand it to its handler
    pub fn frame_received(&self, frame: &[u8]) {
        let Some((&frame_type, body)) = frame.split_first() else {
            warn!("Empty API frame");
            return;
        };
        let Some(response) = Response::from_frame_type(frame_type) else {
            error!("Unknown frame type {:#04x}. Data: {:02x?}", frame_type, body);
            return;
        };
        debug!("Frame received: {}", response);

        let fields = match response.decode(body) {
            Ok(fields) => fields,
            Err(e) => {
                warn!("Failed to decode {} frame: {}", response, e);
                return;
            }
        };
        let Some(handler) = self.shared.handlers.get(&response) else {
            error!("No '{}' handler. Data: {:02x?}", response, body);
            return;
        };
        if let Err(e) = handler(self, fields) {
            warn!("Failed to handle {} frame: {}", response, e);
        }
    }

    fn take_pending(&self, frame_id: FrameId) -> Option<ReplySender> {
        lock(&self.shared.pending).awaiting.remove(&frame_id)
    }

    fn resolve(&self, frame_id: FrameId, tx: ReplySender, result: Result<Reply, ProtocolError>) {
        if tx.send(result).is_err() {
            debug!("Nobody is waiting for the reply to frame {}", frame_id);
        }
    }

    fn handle_at_response(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        let [Field::FrameId(frame_id), Field::AtCommand(command), Field::U8(status), Field::Bytes(value)] =
            fields.as_slice()
        else {
            return Err(schema_error(Response::AtResponse, &fields));
        };
        self.at_response(*frame_id, *command, *status, value);
        Ok(())
    }

    fn at_response(&self, frame_id: FrameId, command: [u8; 2], status: u8, value: &[u8]) {
        let Some(tx) = self.take_pending(frame_id) else {
            debug!("AT response for frame {} with no pending request", frame_id);
            return;
        };
        let command = String::from_utf8_lossy(&command).into_owned();
        let result = at_response_result(&command, status, value).map(Reply::At);
        self.resolve(frame_id, tx, result);
    }

    fn handle_remote_at_response(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        let [Field::FrameId(frame_id), Field::Eui64(ieee), Field::Nwk(nwk), Field::AtCommand(command), Field::U8(status), Field::Bytes(value)] =
            fields.as_slice()
        else {
            return Err(schema_error(Response::RemoteAtResponse, &fields));
        };
        debug!(
            "Remote AT command response from {}/{}: frame {} status {}",
            ieee, nwk, frame_id, status
        );
        self.at_response(*frame_id, *command, *status, value);
        Ok(())
    }

    fn handle_modem_status(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        let [Field::ModemStatus(status)] = fields.as_slice() else {
            return Err(schema_error(Response::ModemStatus, &fields));
        };
        debug!("Handle modem status frame: {}", status);
        self.shared.state.apply(*status);

        if let Some(listener) = self.listener() {
            listener.handle_modem_status(*status);
        }
        Ok(())
    }

    fn handle_tx_status(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        let [Field::FrameId(frame_id), Field::Nwk(nwk), Field::U8(tries), Field::TxStatus(status), Field::DiscoveryStatus(discovery)] =
            fields.as_slice()
        else {
            return Err(schema_error(Response::TxStatus, &fields));
        };
        debug!(
            "tx_explicit to {}: {} after {} tries. Discovery Status: {}, Frame #{}",
            nwk, status, tries, discovery, frame_id
        );

        let Some(tx) = self.take_pending(*frame_id) else {
            debug!("unexpected tx_status report received");
            return Ok(());
        };
        let result = if status.is_success() {
            Ok(Reply::Tx(*status))
        } else {
            Err(ProtocolError::DeliveryFailed(*status))
        };
        if tx.send(result).is_err() {
            debug!("duplicate tx_status for {} nwk?", nwk);
        }
        Ok(())
    }

    fn handle_registration_status(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        let [Field::FrameId(frame_id), Field::RegistrationStatus(status)] = fields.as_slice()
        else {
            return Err(schema_error(Response::RegistrationStatus, &fields));
        };
        let Some(tx) = self.take_pending(*frame_id) else {
            debug!("Registration status for frame {} with no pending request", frame_id);
            return Ok(());
        };
        debug!("Registration Status: {}", status);
        let result = match status {
            RegistrationStatus::Success => Ok(Reply::Registration(*status)),
            other => Err(ProtocolError::RegistrationFailed(*other)),
        };
        self.resolve(*frame_id, tx, result);
        Ok(())
    }

    fn handle_explicit_rx_indicator(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        let mut fields = fields.into_iter();
        let (
            Some(Field::Eui64(src_ieee)),
            Some(Field::Nwk(src_nwk)),
            Some(Field::U8(src_ep)),
            Some(Field::U8(dst_ep)),
            Some(Field::U16(cluster)),
            Some(Field::U16(profile)),
            Some(Field::U8(rx_options)),
            Some(Field::Bytes(data)),
        ) = (
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
            fields.next(),
        )
        else {
            return Err(ProtocolError::SchemaMismatch(
                Response::ExplicitRxIndicator.to_string(),
            ));
        };
        debug!(
            "_handle_explicit_rx: {} {} ep {} cluster {:#06x} opts {:#04x} {:02x?}",
            src_ieee, src_nwk, dst_ep, cluster, rx_options, data
        );

        let rx = ExplicitRx {
            src_ieee,
            src_nwk,
            src_ep,
            dst_ep,
            cluster,
            profile,
            rx_options,
            data,
        };
        match self.listener() {
            Some(listener) => listener.handle_rx(rx),
            None => debug!("No listener for received data, dropping it"),
        }
        Ok(())
    }

    fn handle_route_record_indicator(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        debug!("_handle_route_record_indicator: {:?}", fields);
        Ok(())
    }

    fn handle_many_to_one_rri(&self, fields: Vec<Field>) -> Result<(), ProtocolError> {
        debug!("_handle_many_to_one_rri: {:?}", fields);
        Ok(())
    }
}

fn default_handlers() -> HashMap<Response, FrameHandler> {
    let mut handlers: HashMap<Response, FrameHandler> = HashMap::new();
    handlers.insert(Response::AtResponse, XBee::handle_at_response);
    handlers.insert(Response::RemoteAtResponse, XBee::handle_remote_at_response);
    handlers.insert(Response::ModemStatus, XBee::handle_modem_status);
    handlers.insert(Response::TxStatus, XBee::handle_tx_status);
    handlers.insert(Response::RegistrationStatus, XBee::handle_registration_status);
    handlers.insert(Response::ExplicitRxIndicator, XBee::handle_explicit_rx_indicator);
    handlers.insert(Response::RouteRecordIndicator, XBee::handle_route_record_indicator);
    handlers.insert(Response::ManyToOneRri, XBee::handle_many_to_one_rri);
    handlers
}

fn schema_error(response: Response, fields: &[Field]) -> ProtocolError {
    ProtocolError::SchemaMismatch(format!("{}: {:?}", response, fields))
}

/// Mnemonic bytes and serialized argument of an AT request
fn encode_at_request(
    command: &str,
    value: Option<&AtValue>,
) -> Result<([u8; 2], Vec<u8>), ProtocolError> {
    let value_type = at_command_type(command)
        .ok_or_else(|| ProtocolError::UnknownAtCommand(command.to_string()))?;
    let mnemonic: [u8; 2] = command
        .as_bytes()
        .try_into()
        .map_err(|_| ProtocolError::UnknownAtCommand(command.to_string()))?;
    Ok((mnemonic, value_type.encode(command, value)?))
}

/// Map an AT response status and value to the caller's result
fn at_response_result(
    command: &str,
    status: u8,
    value: &[u8],
) -> Result<Option<AtValue>, ProtocolError> {
    let command_name = command.to_string();
    match AtCommandStatus::from(status) {
        AtCommandStatus::Ok => {}
        AtCommandStatus::Error => {
            return Err(ProtocolError::AtCommandFailed {
                command: command_name,
            })
        }
        AtCommandStatus::InvalidCommand => {
            return Err(ProtocolError::InvalidCommand {
                command: command_name,
            })
        }
        AtCommandStatus::InvalidParameter => {
            return Err(ProtocolError::InvalidParameter {
                command: command_name,
            })
        }
        AtCommandStatus::TxFailure => {
            return Err(ProtocolError::TransmissionFailure {
                command: command_name,
            })
        }
        AtCommandStatus::Unknown(raw) => {
            return Err(ProtocolError::UnexpectedAtStatus {
                command: command_name,
                status: raw,
            })
        }
    }

    let value_type =
        at_command_type(command).ok_or(ProtocolError::UnknownAtCommand(command_name))?;
    value_type.decode(command, value)
}

/// `None` on timeout
async fn await_reply(
    reply: PendingReply,
    timeout: Duration,
) -> Option<Result<Reply, ProtocolError>> {
    tokio::time::timeout(timeout, reply.recv()).await.ok()
}

async fn reconnect_till_done(weak: Weak<Shared>) {
    let mut attempt: u32 = 1;
    loop {
        let Some(shared) = weak.upgrade() else {
            return;
        };
        let xbee = XBee { shared };
        debug!(
            "Reconnecting '{}' serial port using {}",
            xbee.shared.config.path, xbee.shared.config.baud_rate
        );

        let error = match tokio::time::timeout(RECONNECT_ATTEMPT_TIMEOUT, xbee.connect()).await {
            Ok(Ok(())) => {
                info!(
                    "Reconnected '{}' serial port after {} attempts",
                    xbee.shared.config.path, attempt
                );
                return;
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => {
                xbee.drop_gateway();
                "timed out".to_string()
            }
        };

        let wait = reconnect_delay(attempt);
        attempt += 1;
        debug!(
            "Couldn't re-open '{}' serial port, retrying in {:?}: {}",
            xbee.shared.config.path, wait, error
        );
        drop(xbee);
        tokio::time::sleep(wait).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_frame_id_sequence_skips_zero() {
        let mut pending = PendingRequests::new();
        let mut seen = Vec::new();
        for _ in 0..256 {
            seen.push(pending.seq);
            pending.advance();
        }
        assert_eq!(seen[0], 1);
        assert_eq!(seen[254], 255);
        assert_eq!(seen[255], 1);
        assert!(!seen.contains(&0));
    }

    #[test]
    fn test_closed_requests_are_purged() {
        let mut pending = PendingRequests::new();
        let rx = pending.insert(1);
        drop(rx);
        let _rx2 = pending.insert(2);
        assert_eq!(pending.awaiting.len(), 1);
        assert!(pending.awaiting.contains_key(&2));
    }

    #[test]
    fn test_at_status_mapping() {
        assert!(matches!(
            at_response_result("AI", 1, &[]),
            Err(ProtocolError::AtCommandFailed { .. })
        ));
        assert!(matches!(
            at_response_result("AI", 2, &[]),
            Err(ProtocolError::InvalidCommand { .. })
        ));
        assert!(matches!(
            at_response_result("AI", 3, &[]),
            Err(ProtocolError::InvalidParameter { .. })
        ));
        assert!(matches!(
            at_response_result("AI", 4, &[]),
            Err(ProtocolError::TransmissionFailure { .. })
        ));
        assert!(matches!(
            at_response_result("AI", 0xEE, &[]),
            Err(ProtocolError::UnexpectedAtStatus { status: 0xEE, .. })
        ));
    }

    #[test]
    fn test_at_response_values() {
        assert_eq!(at_response_result("AI", 0, &[0x00]).unwrap(), Some(AtValue::U8(0)));
        assert_eq!(at_response_result("WR", 0, &[]).unwrap(), None);
        assert_eq!(at_response_result("MY", 0, &[]).unwrap(), None);
        assert!(matches!(
            at_response_result("ZZ", 0, &[0x01]),
            Err(ProtocolError::UnknownAtCommand(_))
        ));
    }

    #[test]
    fn test_encode_at_request() {
        assert_eq!(
            encode_at_request("NJ", Some(&AtValue::U8(0x3C))).unwrap(),
            (*b"NJ", vec![0x3C])
        );
        assert!(matches!(
            encode_at_request("QQ", None),
            Err(ProtocolError::UnknownAtCommand(_))
        ));
    }

    #[test]
    fn test_send_without_connection() {
        let xbee = XBee::new(DeviceConfig::new("/dev/null"));
        assert!(matches!(
            xbee.send_command(Command::At, vec![], false),
            Err(ProtocolError::NotConnected)
        ));
    }

    #[test]
    fn test_every_handled_response_is_known() {
        for response in default_handlers().keys() {
            assert!(Response::ALL.contains(response));
        }
    }
}
