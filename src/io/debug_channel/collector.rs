// src/io/debug_channel/collector.rs
//
// Connection listener that turns framed byte spans into DebugMessages and
// hands them to a single message listener.
//
// Dispatch is isolated: whatever the listener does (return an error or
// panic) is logged as a warning and the stream keeps flowing.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::message::DebugMessage;
use crate::io::connection::ConnectionListener;
use crate::io::{IoError, Subscription};
use crate::logging::Logger;

/// Consumer of decoded debug messages.
pub trait DebugMessageListener: Send + Sync {
    fn process_message(&self, message: DebugMessage) -> Result<(), IoError>;
}

pub struct DebugMessageCollector {
    originator_id: String,
    listener: Subscription<dyn DebugMessageListener>,
    /// Messages handed to the listener so far
    count: AtomicUsize,
    /// Serializes dispatch when the connection delivers from several contexts
    dispatch: Mutex<()>,
    log: Logger,
}

impl DebugMessageCollector {
    pub fn new(originator_id: impl Into<String>, log: Logger) -> Self {
        DebugMessageCollector {
            originator_id: originator_id.into(),
            listener: Subscription::new(),
            count: AtomicUsize::new(0),
            dispatch: Mutex::new(()),
            log,
        }
    }

    pub fn originator_id(&self) -> &str {
        &self.originator_id
    }

    pub fn set_debug_message_listener(&self, listener: Arc<dyn DebugMessageListener>) {
        self.listener.set(listener);
    }

    pub fn clear_debug_message_listener(&self) {
        self.listener.clear();
    }

    /// Build a message from `frame` and dispatch it.
    ///
    /// Malformed frames are dropped without a trace; without a listener the
    /// message is dropped and not counted.
    pub fn on_bytes_received(&self, frame: &[u8], pc_time_us: u64) {
        let Some(message) = DebugMessage::make(&self.originator_id, frame, pc_time_us) else {
            return;
        };
        let Some(listener) = self.listener.current() else {
            return;
        };

        // A panicking listener is caught below, so the lock is never poisoned
        // by dispatch itself.
        let _guard = self.dispatch.lock().unwrap_or_else(|p| p.into_inner());
        self.count.fetch_add(1, Ordering::SeqCst);

        match catch_unwind(AssertUnwindSafe(|| listener.process_message(message))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                twarn!(self.log, "[dch] Message listener error: {}", e);
            }
            Err(panic) => {
                twarn!(
                    self.log,
                    "[dch] Message listener panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ConnectionListener for DebugMessageCollector {
    fn message_received(&self, frame: &[u8], pc_time_us: u64) {
        self.on_bytes_received(frame, pc_time_us);
    }

    fn connection_state_changed(&self, is_connected: bool) {
        tlog!(
            self.log,
            "[dch] {} {} ({} messages so far)",
            self.originator_id,
            if is_connected { "connected" } else { "disconnected" },
            self.count()
        );
    }

    fn count(&self) -> usize {
        DebugMessageCollector::count(self)
    }
}

#[cfg(test)]
mod tests {
    use super::super::frame::{encode_frame, v2_header};
    use super::*;

    #[derive(Default)]
    struct Recorder {
        messages: Mutex<Vec<DebugMessage>>,
    }

    impl DebugMessageListener for Recorder {
        fn process_message(&self, message: DebugMessage) -> Result<(), IoError> {
            self.messages.lock().unwrap().push(message);
            Ok(())
        }
    }

    struct Failing;

    impl DebugMessageListener for Failing {
        fn process_message(&self, _message: DebugMessage) -> Result<(), IoError> {
            Err(IoError::write("fifo", "broken pipe"))
        }
    }

    struct Panicking;

    impl DebugMessageListener for Panicking {
        fn process_message(&self, _message: DebugMessage) -> Result<(), IoError> {
            panic!("listener blew up");
        }
    }

    #[test]
    fn test_valid_frame_dispatched_once() {
        let collector = DebugMessageCollector::new("adapter", Logger::capture());
        let recorder = Arc::new(Recorder::default());
        collector.set_debug_message_listener(recorder.clone());

        let frame = encode_frame(&v2_header(5), b"abc");
        collector.on_bytes_received(&frame, 42);

        let messages = recorder.messages.lock().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].originator_id(), "adapter");
        assert_eq!(messages[0].pc_time_us(), 42);
        assert_eq!(messages[0].payload(), b"abc");
        assert_eq!(collector.count(), 1);
    }

    #[test]
    fn test_malformed_frame_ignored() {
        let log = Logger::capture();
        let collector = DebugMessageCollector::new("adapter", log.clone());
        let recorder = Arc::new(Recorder::default());
        collector.set_debug_message_listener(recorder.clone());

        collector.on_bytes_received(b"[garbage]", 1);

        assert!(recorder.messages.lock().unwrap().is_empty());
        assert_eq!(collector.count(), 0);
        assert!(log.captured().is_empty());
    }

    #[test]
    fn test_listener_error_counted_and_logged() {
        let log = Logger::capture();
        let collector = DebugMessageCollector::new("adapter", log.clone());
        collector.set_debug_message_listener(Arc::new(Failing));

        let frame = encode_frame(&v2_header(5), b"");
        collector.on_bytes_received(&frame, 1);
        collector.on_bytes_received(&frame, 2);

        assert_eq!(collector.count(), 2);
        let lines = log.captured();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[WARN]"));
        assert!(lines[0].contains("broken pipe"));
    }

    #[test]
    fn test_listener_panic_contained() {
        let log = Logger::capture();
        let collector = DebugMessageCollector::new("adapter", log.clone());
        collector.set_debug_message_listener(Arc::new(Panicking));

        let frame = encode_frame(&v2_header(5), b"");
        collector.on_bytes_received(&frame, 1);

        // Still usable after the panic
        let recorder = Arc::new(Recorder::default());
        collector.set_debug_message_listener(recorder.clone());
        collector.on_bytes_received(&frame, 2);

        assert_eq!(collector.count(), 2);
        assert_eq!(recorder.messages.lock().unwrap().len(), 1);
        assert!(log.captured()[0].contains("listener blew up"));
    }

    #[test]
    fn test_no_listener_drops_without_counting() {
        let collector = DebugMessageCollector::new("adapter", Logger::capture());
        let frame = encode_frame(&v2_header(5), b"");
        collector.on_bytes_received(&frame, 1);
        assert_eq!(collector.count(), 0);

        let recorder = Arc::new(Recorder::default());
        collector.set_debug_message_listener(recorder.clone());
        collector.clear_debug_message_listener();
        collector.on_bytes_received(&frame, 1);
        assert_eq!(collector.count(), 0);
    }

    #[test]
    fn test_concurrent_delivery_counts_every_message() {
        let collector = Arc::new(DebugMessageCollector::new("adapter", Logger::capture()));
        let recorder = Arc::new(Recorder::default());
        collector.set_debug_message_listener(recorder.clone());
        let frame = encode_frame(&v2_header(5), b"x");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let collector = collector.clone();
                let frame = frame.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        collector.on_bytes_received(&frame, i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(collector.count(), 200);
        assert_eq!(recorder.messages.lock().unwrap().len(), 200);
    }
}
