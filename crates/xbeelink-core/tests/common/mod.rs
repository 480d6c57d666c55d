#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use xbeelink_core::config::DeviceConfig;
use xbeelink_core::protocol::codec::encode_frame;
use xbeelink_core::protocol::gateway::{Extract, FrameBuffer};
use xbeelink_core::protocol::{
    EventSink, ExplicitRx, ModemStatus, NetworkListener, Opener, ProtocolError, Transport,
    TransportEvent, XBee,
};

/// Produces the bytes the "module" answers a write with, given the link speed
pub type Responder = Box<dyn FnMut(&[u8], u32) -> Option<Vec<u8>> + Send>;

/// Everything the mock link observed
#[derive(Debug, Default)]
pub struct LinkLog {
    pub written: Vec<Vec<u8>>,
    pub baud_rates: Vec<u32>,
    pub opens: usize,
    pub closes: usize,
}

/// In-memory transport recording writes and baud changes
pub struct MockTransport {
    log: Arc<Mutex<LinkLog>>,
    baud_rate: u32,
    events: Option<mpsc::UnboundedSender<TransportEvent>>,
    responder: Arc<Mutex<Option<Responder>>>,
}

impl MockTransport {
    pub fn new(baud_rate: u32) -> (Self, Arc<Mutex<LinkLog>>) {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        let transport = Self {
            log: log.clone(),
            baud_rate,
            events: None,
            responder: Arc::new(Mutex::new(None)),
        };
        (transport, log)
    }
}

impl Transport for MockTransport {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.log.lock().unwrap().written.push(data.to_vec());
        let reply = match self.responder.lock().unwrap().as_mut() {
            Some(responder) => responder(data, self.baud_rate),
            None => None,
        };
        if let (Some(reply), Some(events)) = (reply, self.events.as_ref()) {
            let _ = events.send(TransportEvent::Data(reply));
        }
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> Result<(), ProtocolError> {
        self.log.lock().unwrap().baud_rates.push(baud_rate);
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn close(&mut self) {
        self.log.lock().unwrap().closes += 1;
    }
}

/// Opener side of the mock: hands out [`MockTransport`]s sharing one log
#[derive(Clone)]
pub struct MockLink {
    pub log: Arc<Mutex<LinkLog>>,
    events: Arc<Mutex<Option<mpsc::UnboundedSender<TransportEvent>>>>,
    responder: Arc<Mutex<Option<Responder>>>,
    failing_opens: Arc<Mutex<usize>>,
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(LinkLog::default())),
            events: Arc::new(Mutex::new(None)),
            responder: Arc::new(Mutex::new(None)),
            failing_opens: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_responder(self, responder: Responder) -> Self {
        *self.responder.lock().unwrap() = Some(responder);
        self
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        *self.failing_opens.lock().unwrap() = count;
    }

    pub fn opener(&self) -> Opener {
        let link = self.clone();
        Arc::new(move |config: &DeviceConfig, mut sink: EventSink| {
            link.log.lock().unwrap().opens += 1;
            {
                let mut failing = link.failing_opens.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(ProtocolError::ConnectionFailed("mock open failed".to_string()));
                }
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            *link.events.lock().unwrap() = Some(tx.clone());
            sink(TransportEvent::Opened);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    sink(event);
                }
            });

            Ok(Box::new(MockTransport {
                log: link.log.clone(),
                baud_rate: config.baud_rate,
                events: Some(tx),
                responder: link.responder.clone(),
            }) as Box<dyn Transport>)
        })
    }

    /// Connected session over this link
    pub async fn connect(&self, config: DeviceConfig) -> XBee {
        let xbee = XBee::with_opener(config, self.opener());
        xbee.connect().await.expect("mock link connects");
        xbee
    }

    /// Deliver an event as if the reader thread had produced it
    pub fn inject(&self, event: TransportEvent) {
        let events = self.events.lock().unwrap();
        events
            .as_ref()
            .expect("link was opened")
            .send(event)
            .expect("forwarder running");
    }

    pub fn written(&self) -> Vec<Vec<u8>> {
        self.log.lock().unwrap().written.clone()
    }

    /// Unescaped payloads of the API frames written so far
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.written().iter().map(|w| unframe(w)).collect()
    }

    pub fn baud_rates(&self) -> Vec<u32> {
        self.log.lock().unwrap().baud_rates.clone()
    }

    pub fn opens(&self) -> usize {
        self.log.lock().unwrap().opens
    }

    /// Yield until `count` writes happened
    pub async fn wait_for_writes(&self, count: usize) {
        for _ in 0..1000 {
            if self.written().len() >= count {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {} writes, saw {}", count, self.written().len());
    }
}

pub fn config() -> DeviceConfig {
    DeviceConfig::new("/dev/ttyMOCK0").with_reconnect(false)
}

/// Wire bytes of an API frame
pub fn frame(payload: &[u8]) -> Vec<u8> {
    encode_frame(payload).expect("frame fits")
}

pub fn unframe(wire: &[u8]) -> Vec<u8> {
    let mut buffer = FrameBuffer::new();
    buffer.extend(wire);
    match buffer.extract() {
        Extract::Frame(payload) => payload,
        other => panic!("not a frame: {:02x?} ({:?})", wire, other),
    }
}

/// Poll `condition` on paused time for up to a minute
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..600 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached");
}

/// Listener recording everything it is told
#[derive(Default)]
pub struct RecordingListener {
    pub modem_status: Mutex<Vec<ModemStatus>>,
    pub received: Mutex<Vec<ExplicitRx>>,
    pub lost: Mutex<Vec<String>>,
}

impl NetworkListener for RecordingListener {
    fn handle_modem_status(&self, status: ModemStatus) {
        self.modem_status.lock().unwrap().push(status);
    }

    fn handle_rx(&self, rx: ExplicitRx) {
        self.received.lock().unwrap().push(rx);
    }

    fn connection_lost(&self, error: &ProtocolError) {
        self.lost.lock().unwrap().push(error.to_string());
    }
}
