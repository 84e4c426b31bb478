// src/extcap/capture.rs
//
// Capture command: adapter connection -> splitter chain -> collector ->
// pcap records on the FIFO Wireshark reads from.

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::pcap::PcapWriter;
use super::{ExtcapError, ExtcapSession};
use crate::io::debug_channel::{
    debug_channel_chain, DebugMessage, DebugMessageCollector, DebugMessageListener,
};
use crate::io::{AdapterConnection, IoError};
use crate::logging::Logger;

// ============================================================================
// Filter
// ============================================================================

/// Set of debug message type codes to keep. Empty keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureFilter {
    types: BTreeSet<u16>,
}

impl CaptureFilter {
    /// Parse a comma or space separated list of type codes, decimal or `0x` hex.
    pub fn parse(expr: Option<&str>) -> Result<Self, String> {
        let mut types = BTreeSet::new();
        for token in expr
            .unwrap_or("")
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
        {
            let parsed = match token
                .strip_prefix("0x")
                .or_else(|| token.strip_prefix("0X"))
            {
                Some(hex) => u16::from_str_radix(hex, 16),
                None => token.parse::<u16>(),
            };
            let code = parsed.map_err(|_| format!("'{}' is not a message type", token))?;
            types.insert(code);
        }
        Ok(CaptureFilter { types })
    }

    pub fn accepts(&self, message_type: u16) -> bool {
        self.types.is_empty() || self.types.contains(&message_type)
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Message listener that appends every accepted message to a pcap stream.
///
/// The first write failure is kept and raises the connection's stop flag;
/// later messages are discarded.
pub struct PcapSink<W: Write + Send> {
    writer: Mutex<PcapWriter<W>>,
    filter: CaptureFilter,
    device: String,
    failure: Mutex<Option<IoError>>,
    stop: Arc<AtomicBool>,
    first_logged: AtomicBool,
    log: Logger,
}

impl<W: Write + Send> PcapSink<W> {
    pub fn new(
        writer: PcapWriter<W>,
        filter: CaptureFilter,
        device: impl Into<String>,
        stop: Arc<AtomicBool>,
        log: Logger,
    ) -> Self {
        PcapSink {
            writer: Mutex::new(writer),
            filter,
            device: device.into(),
            failure: Mutex::new(None),
            stop,
            first_logged: AtomicBool::new(false),
            log,
        }
    }

    pub fn take_failure(&self) -> Option<IoError> {
        self.failure.lock().ok().and_then(|mut f| f.take())
    }

    fn fail(&self, error: IoError) -> IoError {
        self.stop.store(true, Ordering::SeqCst);
        if let Ok(mut slot) = self.failure.lock() {
            if slot.is_none() {
                *slot = Some(error.clone());
            }
        }
        error
    }
}

impl<W: Write + Send> DebugMessageListener for PcapSink<W> {
    fn process_message(&self, message: DebugMessage) -> Result<(), IoError> {
        if self.stop.load(Ordering::SeqCst) || !self.filter.accepts(message.message_type()) {
            return Ok(());
        }

        if !self.first_logged.swap(true, Ordering::SeqCst) {
            tlog!(
                self.log,
                "[capture] First frame from {}: {} {}",
                message.originator_id(),
                serde_json::to_string(message.header()).unwrap_or_default(),
                hex::encode(message.raw())
            );
        }

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| self.fail(IoError::write(&self.device, "writer lock poisoned")))?;
        writer
            .write_record(message.pc_time_us(), message.raw())
            .map_err(|e| self.fail(IoError::write(&self.device, e.to_string())))
    }
}

// ============================================================================
// Command
// ============================================================================

/// Open the FIFO for writing. Opening a FIFO blocks until Wireshark has the
/// reading end open, so this runs off the async workers.
async fn open_fifo(path: &Path) -> Result<File, IoError> {
    let device = path.display().to_string();
    let owned = path.to_path_buf();
    tokio::task::spawn_blocking(move || OpenOptions::new().write(true).create(true).open(owned))
        .await
        .map_err(|e| IoError::write(&device, e.to_string()))?
        .map_err(|e| IoError::write(&device, format!("open: {}", e)))
}

pub(super) async fn run_capture(session: &ExtcapSession) -> Result<(), ExtcapError> {
    let interface = session.require_interface()?;
    let fifo = session.require_fifo()?;
    let filter =
        CaptureFilter::parse(session.filter.as_deref()).map_err(ExtcapError::InvalidFilter)?;

    let file = open_fifo(fifo).await?;
    capture_to(session, interface, filter, file, &fifo.display().to_string()).await
}

/// Connect to the adapter and stream its frames into `out` until the
/// connection ends or a write fails.
async fn capture_to<W: Write + Send + 'static>(
    session: &ExtcapSession,
    interface: &str,
    filter: CaptureFilter,
    out: W,
    out_name: &str,
) -> Result<(), ExtcapError> {
    let settings = &session.settings;
    let log = &session.log;

    let connection = AdapterConnection::connect(
        interface,
        settings.debug_channel_port,
        settings.connect_timeout(),
        log.clone(),
    )
    .await?;
    let device = connection.device().to_string();

    let writer = PcapWriter::new(out, settings.snaplen)
        .map_err(|e| IoError::write(out_name, e.to_string()))?;
    let sink = Arc::new(PcapSink::new(
        writer,
        filter,
        out_name,
        connection.stop_handle(),
        log.clone(),
    ));

    let originator = settings.originator_id.as_deref().unwrap_or(interface);
    let collector = Arc::new(DebugMessageCollector::new(originator, log.clone()));
    collector.set_debug_message_listener(sink.clone());
    connection.set_listener(collector.clone());

    let chain = debug_channel_chain().map_err(|e| IoError::configuration(&device, e))?;

    tlog!(log, "[capture] Capturing from {} into {}", device, out_name);
    let end = tokio::spawn(connection.run(chain))
        .await
        .map_err(|e| IoError::read(&device, e.to_string()))?;
    collector.clear_debug_message_listener();

    tlog!(
        log,
        "[capture] {} stopped ({:?}) after {} messages",
        device,
        end,
        collector.count()
    );

    match sink.take_failure() {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}
