// src/io/connection.rs
//
// TCP connection to the debug channel port of a WSTK adapter.
//
// The read loop runs on its own task. Every chunk is stamped with the host
// arrival time and pushed through a splitter chain: recognized frames go to
// the single subscribed ConnectionListener, everything else is logged as
// adapter text.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

use super::splitter::{Bucket, ByteListener, Splitter, SplitterChain};
use super::{now_us, IoError, Subscription};
use crate::logging::Logger;

/// Receiver of framed bytes and connection state from an adapter connection.
pub trait ConnectionListener: Send + Sync {
    /// One complete frame, with its host arrival time in microseconds.
    fn message_received(&self, frame: &[u8], pc_time_us: u64);
    fn connection_state_changed(&self, is_connected: bool);
    /// Number of messages successfully handed on so far.
    fn count(&self) -> usize;
}

/// Why the read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The adapter closed the connection
    Closed,
    /// The stop flag was raised
    Stopped,
    /// A read failed; the error has been logged
    Lost,
}

/// Split an interface id into host and port.
///
/// Accepts `host`, `ip`, `ip:port` and `host:port`; without a port the
/// debug channel default is used.
pub fn resolve_target(interface: &str, default_port: u16) -> (String, u16) {
    if let Ok(addr) = interface.parse::<std::net::SocketAddr>() {
        return (addr.ip().to_string(), addr.port());
    }
    if let Some((host, port)) = interface.rsplit_once(':') {
        if !host.contains(':') {
            if let Ok(port) = port.parse::<u16>() {
                return (host.to_string(), port);
            }
        }
    }
    (interface.to_string(), default_port)
}

pub struct AdapterConnection {
    device: String,
    stream: TcpStream,
    listener: Arc<Subscription<dyn ConnectionListener>>,
    stop_flag: Arc<AtomicBool>,
    log: Logger,
}

impl AdapterConnection {
    /// Connect to the adapter named by `interface`.
    pub async fn connect(
        interface: &str,
        default_port: u16,
        timeout: Duration,
        log: Logger,
    ) -> Result<Self, IoError> {
        let (host, port) = resolve_target(interface, default_port);
        let device = format!("dch({}:{})", host, port);

        let stream = match tokio::time::timeout(timeout, TcpStream::connect((host.as_str(), port)))
            .await
        {
            Ok(Ok(s)) => s,
            Ok(Err(e)) => return Err(IoError::connection(&device, e.to_string())),
            Err(_) => return Err(IoError::timeout(&device, "connect")),
        };
        let _ = stream.set_nodelay(true);

        tlog!(log, "[dch] Connected to {}:{}", host, port);

        Ok(AdapterConnection {
            device,
            stream,
            listener: Arc::new(Subscription::new()),
            stop_flag: Arc::new(AtomicBool::new(false)),
            log,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn set_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.listener.set(listener);
    }

    /// Flag that ends the read loop when raised.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop_flag.clone()
    }

    /// Read until the adapter closes the connection, a read fails or the
    /// stop flag is raised. The chain is flushed before returning.
    pub async fn run(mut self, mut chain: SplitterChain) -> ConnectionEnd {
        let arrival = Arc::new(AtomicU64::new(0));
        let text = Arc::new(TextLines::new(self.device.clone(), self.log.clone()));
        chain.set_listener(
            Bucket::Matched,
            Some(Arc::new(FrameForwarder {
                listener: self.listener.clone(),
                arrival: arrival.clone(),
            })),
        );
        chain.set_listener(Bucket::Unmatched, Some(text.clone()));

        if let Some(l) = self.listener.current() {
            l.connection_state_changed(true);
        }

        let mut read_buf = [0u8; 2048];
        let end = loop {
            if self.stop_flag.load(Ordering::SeqCst) {
                break ConnectionEnd::Stopped;
            }

            match tokio::time::timeout(Duration::from_millis(50), self.stream.read(&mut read_buf))
                .await
            {
                Ok(Ok(0)) => break ConnectionEnd::Closed,
                Ok(Ok(n)) => {
                    arrival.store(now_us(), Ordering::SeqCst);
                    chain.received(&read_buf[..n]);
                }
                Ok(Err(e)) => {
                    twarn!(self.log, "{}", IoError::read(&self.device, e.to_string()));
                    break ConnectionEnd::Lost;
                }
                Err(_) => {
                    // Timeout - check the stop flag again
                }
            }
        };

        chain.flush();
        text.flush();

        if let Some(l) = self.listener.current() {
            l.connection_state_changed(false);
        }
        tlog!(self.log, "[dch] {} ended: {:?}", self.device, end);
        end
    }
}

/// Forwards recognized frames to the current subscriber.
struct FrameForwarder {
    listener: Arc<Subscription<dyn ConnectionListener>>,
    arrival: Arc<AtomicU64>,
}

impl ByteListener for FrameForwarder {
    fn received(&self, data: &[u8]) {
        if let Some(l) = self.listener.current() {
            l.message_received(data, self.arrival.load(Ordering::SeqCst));
        }
    }
}

/// Text without a newline is logged in pieces of this size.
const MAX_TEXT_LINE: usize = 4096;

/// Logs adapter text line by line.
struct TextLines {
    device: String,
    partial: Mutex<Vec<u8>>,
    log: Logger,
}

impl TextLines {
    fn new(device: String, log: Logger) -> Self {
        TextLines {
            device,
            partial: Mutex::new(Vec::new()),
            log,
        }
    }

    fn emit(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if !line.is_empty() {
            tlog!(self.log, "[dch] {} text: {}", self.device, String::from_utf8_lossy(line));
        }
    }

    fn flush(&self) {
        if let Ok(mut partial) = self.partial.lock() {
            let rest = std::mem::take(&mut *partial);
            self.emit(&rest);
        }
    }
}

impl ByteListener for TextLines {
    fn received(&self, data: &[u8]) {
        let Ok(mut partial) = self.partial.lock() else {
            return;
        };
        partial.extend_from_slice(data);
        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = partial.drain(..=pos).collect();
            self.emit(&line[..line.len() - 1]);
        }
        if partial.len() >= MAX_TEXT_LINE {
            let long = std::mem::take(&mut *partial);
            self.emit(&long);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::debug_channel::debug_channel_chain;
    use crate::io::debug_channel::frame::{encode_frame, v2_header, v3_header};
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(Vec<u8>, u64)>>,
        states: Mutex<Vec<bool>>,
    }

    impl ConnectionListener for Recorder {
        fn message_received(&self, frame: &[u8], pc_time_us: u64) {
            self.frames.lock().unwrap().push((frame.to_vec(), pc_time_us));
        }

        fn connection_state_changed(&self, is_connected: bool) {
            self.states.lock().unwrap().push(is_connected);
        }

        fn count(&self) -> usize {
            self.frames.lock().unwrap().len()
        }
    }

    #[test]
    fn test_resolve_target() {
        assert_eq!(resolve_target("10.0.0.5", 4905), ("10.0.0.5".to_string(), 4905));
        assert_eq!(resolve_target("10.0.0.5:4000", 4905), ("10.0.0.5".to_string(), 4000));
        assert_eq!(resolve_target("wstk.local:4001", 4905), ("wstk.local".to_string(), 4001));
        assert_eq!(resolve_target("wstk.local", 4905), ("wstk.local".to_string(), 4905));
        assert_eq!(resolve_target("fe80::1", 4905), ("fe80::1".to_string(), 4905));
        assert_eq!(resolve_target("[::1]:4002", 4905), ("::1".to_string(), 4002));
    }

    #[tokio::test]
    async fn test_frames_forwarded_until_close() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let f1 = encode_frame(&v2_header(1), b"one");
        let f2 = encode_frame(&v3_header(2, 7), b"two");
        let mut stream_bytes = b"WSTK boot\r\n".to_vec();
        stream_bytes.extend_from_slice(&f1);
        stream_bytes.extend_from_slice(b"> prompt\n");
        stream_bytes.extend_from_slice(&f2);

        let to_send = stream_bytes.clone();
        let server_task = tokio::spawn(async move {
            let (mut sock, _) = server.accept().await.unwrap();
            for chunk in to_send.chunks(5) {
                sock.write_all(chunk).await.unwrap();
                sock.flush().await.unwrap();
            }
        });

        let log = Logger::capture();
        let conn = AdapterConnection::connect(
            &format!("127.0.0.1:{}", port),
            4905,
            Duration::from_secs(2),
            log.clone(),
        )
        .await
        .unwrap();
        let recorder = Arc::new(Recorder::default());
        conn.set_listener(recorder.clone());

        let end = tokio::spawn(conn.run(debug_channel_chain().unwrap()))
            .await
            .unwrap();
        server_task.await.unwrap();

        assert_eq!(end, ConnectionEnd::Closed);
        let frames = recorder.frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, f1);
        assert_eq!(frames[1].0, f2);
        assert!(frames.iter().all(|(_, t)| *t > 0));
        assert_eq!(*recorder.states.lock().unwrap(), vec![true, false]);

        let lines = log.captured();
        assert!(lines.iter().any(|l| l.ends_with("text: WSTK boot")));
        assert!(lines.iter().any(|l| l.ends_with("text: > prompt")));
    }

    #[tokio::test]
    async fn test_stop_flag_ends_read_loop() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();
        let server_task = tokio::spawn(async move {
            let (sock, _) = server.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(sock);
        });

        let conn = AdapterConnection::connect(
            &format!("127.0.0.1:{}", port),
            4905,
            Duration::from_secs(2),
            Logger::capture(),
        )
        .await
        .unwrap();
        let stop = conn.stop_handle();
        let run = tokio::spawn(conn.run(debug_channel_chain().unwrap()));

        stop.store(true, Ordering::SeqCst);
        let end = tokio::time::timeout(Duration::from_secs(1), run)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(end, ConnectionEnd::Stopped);
        server_task.abort();
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        // Grab a free port, then close it so nothing listens there.
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let result = AdapterConnection::connect(
            "127.0.0.1",
            port,
            Duration::from_secs(2),
            Logger::capture(),
        )
        .await;
        assert!(matches!(result, Err(IoError::Connection { .. })));
    }

    #[test]
    fn test_text_without_newline_is_bounded() {
        let log = Logger::capture();
        let text = TextLines::new("adapter".to_string(), log.clone());

        text.received(&[b'a'; 5000]);
        assert_eq!(log.captured().len(), 1);
        assert!(text.partial.lock().unwrap().is_empty());

        text.received(b"tail\n");
        let lines = log.captured();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("[dch] adapter text: tail"));
    }
}
