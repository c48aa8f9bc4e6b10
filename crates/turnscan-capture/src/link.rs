//! Serial protocol state machine for the turntable controller.
//!
//! The protocol is one byte per message with no framing, acknowledgment or
//! checksum:
//!
//! | Dir | Byte  | Meaning                                   |
//! |-----|-------|-------------------------------------------|
//! | out | `R`   | reset rotation counters                   |
//! | out | `T`   | begin "set total turns"                   |
//! | out | `<n>` | image count, sent right after `T`         |
//! | out | `I`   | single manual step                        |
//! | out | `S`   | one capture step during a running scan    |
//! | in  | `D`   | one step completed                        |
//! | in  | `F`   | full scan cycle completed                 |
//!
//! Incoming bytes are consumed one at a time from a FIFO. A background
//! reader thread refills the FIFO; a new read is requested only after the
//! previous result was consumed, so at most one read is ever in flight.
//!
//! A dropped or garbled byte is not detected. The motor then simply stays
//! busy; [`TurntableLink::busy_for`] lets the caller surface that.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use turnscan_core::{Result, ScanError};

use crate::transport::{connection_error, SerialTransport};

/// Outbound command bytes.
pub mod command {
    /// Reset rotation counters.
    pub const RESET: u8 = b'R';
    /// Begin "set total turns"; the image count byte follows.
    pub const SET_TURNS: u8 = b'T';
    /// Single manual step.
    pub const MANUAL_STEP: u8 = b'I';
    /// One capture step.
    pub const STEP: u8 = b'S';
}

/// Inbound response bytes.
pub mod response {
    /// One step completed.
    pub const STEP_DONE: u8 = b'D';
    /// Full cycle completed.
    pub const CYCLE_DONE: u8 = b'F';
}

/// Size of the buffer handed to each background read.
pub const DEFAULT_READ_BUFFER: usize = 255;

/// Connection state of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transport is open.
    Disconnected,
    /// Connected and the motor is idle.
    Idle,
    /// Connected and the motor is moving (or the controller awaits the next step).
    Busy,
}

/// What a consumed byte meant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkEvent {
    /// A capture step finished; the next shot should be sampled before advancing.
    SampleRequested,
    /// A manual step finished.
    StepDone,
    /// The controller finished the whole capture cycle.
    CycleComplete,
}

type SharedTransport = Arc<Mutex<Box<dyn SerialTransport>>>;

struct Reader {
    requests: Sender<()>,
    results: Receiver<Result<Vec<u8>>>,
    handle: JoinHandle<()>,
    in_flight: bool,
}

enum Refill {
    Pending,
    Bytes(Vec<u8>),
    Failed(ScanError),
}

impl Reader {
    fn spawn(transport: SharedTransport, buffer_size: usize) -> Result<Self> {
        let (request_tx, request_rx) = bounded::<()>(1);
        let (result_tx, result_rx) = bounded::<Result<Vec<u8>>>(1);

        let handle = std::thread::Builder::new()
            .name("turntable-reader".into())
            .spawn(move || {
                while request_rx.recv().is_ok() {
                    let mut buffer = vec![0_u8; buffer_size];
                    let result = transport
                        .lock()
                        .read_available(&mut buffer)
                        .map(|n| {
                            buffer.truncate(n);
                            buffer
                        });
                    if result_tx.send(result).is_err() {
                        break;
                    }
                }
                log::debug!("turntable reader stopped");
            })
            .map_err(connection_error)?;

        Ok(Self {
            requests: request_tx,
            results: result_rx,
            handle,
            in_flight: false,
        })
    }

    fn refill(&mut self) -> Refill {
        if !self.in_flight {
            if self.requests.try_send(()).is_err() {
                return Refill::Failed(ScanError::Connection("serial reader stopped".into()));
            }
            self.in_flight = true;
        }
        match self.results.try_recv() {
            Ok(Ok(bytes)) => {
                self.in_flight = false;
                Refill::Bytes(bytes)
            }
            Ok(Err(err)) => {
                self.in_flight = false;
                Refill::Failed(err)
            }
            Err(TryRecvError::Empty) => Refill::Pending,
            Err(TryRecvError::Disconnected) => {
                Refill::Failed(ScanError::Connection("serial reader stopped".into()))
            }
        }
    }

    fn stop(self) {
        drop(self.requests);
        if self.handle.join().is_err() {
            log::warn!("turntable reader panicked");
        }
    }
}

/// The host side of the turntable protocol.
///
/// All methods are non-blocking except [`TurntableLink::poll_timeout`].
pub struct TurntableLink {
    transport: Option<SharedTransport>,
    reader: Option<Reader>,
    fifo: VecDeque<u8>,
    state: LinkState,
    capturing: bool,
    awaiting_advance: bool,
    busy_since: Option<Instant>,
    buffer_size: usize,
}

impl Default for TurntableLink {
    fn default() -> Self {
        Self::new()
    }
}

impl TurntableLink {
    /// Creates a disconnected link.
    pub fn new() -> Self {
        Self {
            transport: None,
            reader: None,
            fifo: VecDeque::new(),
            state: LinkState::Disconnected,
            capturing: false,
            awaiting_advance: false,
            busy_since: None,
            buffer_size: DEFAULT_READ_BUFFER,
        }
    }

    /// Sets the size of each background read.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Returns the connection state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Returns true unless the link is disconnected.
    pub fn is_connected(&self) -> bool {
        self.state != LinkState::Disconnected
    }

    /// Returns true while the motor is moving.
    pub fn is_busy(&self) -> bool {
        self.state == LinkState::Busy
    }

    /// Returns true between [`begin_capture`](Self::begin_capture) and the
    /// cycle-complete response.
    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    /// Returns how long the motor has been busy since the last step command.
    pub fn busy_for(&self) -> Option<Duration> {
        self.busy_since.map(|since| since.elapsed())
    }

    /// Opens `transport` and starts the background reader.
    ///
    /// An already open connection is closed first.
    pub fn connect(&mut self, mut transport: Box<dyn SerialTransport>) -> Result<()> {
        if self.is_connected() {
            self.disconnect();
        }

        transport.open()?;
        let shared: SharedTransport = Arc::new(Mutex::new(transport));
        let reader = match Reader::spawn(Arc::clone(&shared), self.buffer_size) {
            Ok(reader) => reader,
            Err(err) => {
                shared.lock().close();
                return Err(err);
            }
        };

        self.transport = Some(shared);
        self.reader = Some(reader);
        self.state = LinkState::Idle;
        log::info!("turntable connected");
        Ok(())
    }

    /// Stops the reader and closes the transport.
    pub fn disconnect(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop();
        }
        if let Some(transport) = self.transport.take() {
            transport.lock().close();
            log::info!("turntable disconnected");
        }
        self.fifo.clear();
        self.state = LinkState::Disconnected;
        self.capturing = false;
        self.awaiting_advance = false;
        self.busy_since = None;
    }

    /// Sends the `R, T, <n>` burst that configures a capture of `images` shots.
    pub fn begin_capture(&mut self, images: u8) -> Result<()> {
        self.require_idle()?;
        self.write(command::RESET)?;
        self.write(command::SET_TURNS)?;
        self.write(images)?;
        self.capturing = true;
        self.awaiting_advance = false;
        log::info!("turntable configured for {images} images");
        Ok(())
    }

    /// Sends `S` to advance one capture step.
    ///
    /// Allowed while capturing, either before the first step or right after
    /// a step-done response requested the next sample.
    pub fn advance(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(ScanError::NotConnected);
        }
        let first_step = self.state == LinkState::Idle;
        if !self.capturing || !(first_step || self.awaiting_advance) {
            return Err(ScanError::LinkBusy);
        }
        self.write(command::STEP)?;
        self.awaiting_advance = false;
        self.mark_busy();
        Ok(())
    }

    /// Sends `I` for one manual step outside a capture.
    pub fn manual_step(&mut self) -> Result<()> {
        self.require_idle()?;
        if self.capturing {
            return Err(ScanError::LinkBusy);
        }
        self.write(command::MANUAL_STEP)?;
        self.mark_busy();
        Ok(())
    }

    /// Sends `R` to reset the controller's rotation counters.
    pub fn reset(&mut self) -> Result<()> {
        self.require_idle()?;
        self.write(command::RESET)?;
        self.capturing = false;
        self.awaiting_advance = false;
        Ok(())
    }

    /// Consumes at most one incoming byte.
    ///
    /// Returns `Ok(None)` when nothing is buffered yet or the byte was not a
    /// known response. A read failure tears the connection down.
    pub fn poll(&mut self) -> Result<Option<LinkEvent>> {
        if !self.is_connected() {
            return Ok(None);
        }

        if self.fifo.is_empty() {
            let outcome = match self.reader.as_mut() {
                Some(reader) => reader.refill(),
                None => Refill::Pending,
            };
            match outcome {
                Refill::Pending => {}
                Refill::Bytes(bytes) => self.fifo.extend(bytes),
                Refill::Failed(err) => return Err(self.fail(err)),
            }
        }

        Ok(self.fifo.pop_front().and_then(|byte| self.handle_byte(byte)))
    }

    /// Polls until an event arrives or `timeout` elapses.
    pub fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<LinkEvent>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.poll()? {
                return Ok(Some(event));
            }
            if Instant::now() >= deadline || !self.is_connected() {
                return Ok(None);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn handle_byte(&mut self, byte: u8) -> Option<LinkEvent> {
        match byte {
            response::STEP_DONE if self.capturing => {
                // The controller waits for the next S; the table stays busy until then.
                self.awaiting_advance = true;
                Some(LinkEvent::SampleRequested)
            }
            response::STEP_DONE => {
                self.mark_idle();
                Some(LinkEvent::StepDone)
            }
            response::CYCLE_DONE => {
                self.capturing = false;
                self.awaiting_advance = false;
                self.mark_idle();
                Some(LinkEvent::CycleComplete)
            }
            other => {
                log::warn!("ignoring unexpected turntable byte 0x{other:02x}");
                None
            }
        }
    }

    fn require_idle(&self) -> Result<()> {
        match self.state {
            LinkState::Disconnected => Err(ScanError::NotConnected),
            LinkState::Busy => Err(ScanError::LinkBusy),
            LinkState::Idle => Ok(()),
        }
    }

    fn mark_busy(&mut self) {
        self.state = LinkState::Busy;
        self.busy_since = Some(Instant::now());
    }

    fn mark_idle(&mut self) {
        self.state = LinkState::Idle;
        self.busy_since = None;
    }

    fn write(&mut self, byte: u8) -> Result<()> {
        let Some(transport) = self.transport.as_ref() else {
            return Err(ScanError::NotConnected);
        };
        let result = transport.lock().write_byte(byte);
        result.map_err(|err| self.fail(err))
    }

    fn fail(&mut self, err: ScanError) -> ScanError {
        log::error!("turntable link failed: {err}");
        self.disconnect();
        match err {
            ScanError::Connection(_) => err,
            other => ScanError::Connection(other.to_string()),
        }
    }
}

impl Drop for TurntableLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}
