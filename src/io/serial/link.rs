// src/io/serial/link.rs
//
// Device link: exclusive owner of the serial channel.
//
// One dedicated reader thread per link performs bounded blocking reads, frames
// lines, classifies them and fans each packet out to the observer and (for
// telemetry) the latest-value slot. Outbound commands are written directly by
// the calling thread and never wait on the reader.

use std::io::{ErrorKind, Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use super::codec::{parse_line, Command};
use super::config::{LinkOptions, SerialConfig};
use super::framer::{LineFrame, LineFramer};
use crate::io::error::LinkError;
use crate::io::slot::LatestValueSlot;
use crate::observer::PacketObserver;
use crate::packet::SensorPacket;
use crate::tlog;

// ============================================================================
// Device Link
// ============================================================================

pub struct DeviceLink {
    port_name: String,
    /// Write half; `None` once closed
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    slot: Arc<LatestValueSlot<SensorPacket>>,
    cancel_flag: Arc<AtomicBool>,
    reader_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeviceLink {
    /// Open the serial port and start the reader immediately.
    ///
    /// Failing to open the device is the only fatal error and is returned
    /// here rather than retried.
    pub fn open(
        config: &SerialConfig,
        observer: Option<Arc<dyn PacketObserver>>,
    ) -> Result<Self, LinkError> {
        let port = config
            .builder()?
            .open()
            .map_err(|e| LinkError::open(&config.port, e))?;

        let writer = port
            .try_clone()
            .map_err(|e| LinkError::open(&config.port, e))?;

        tlog!(
            "[link:{}] Opened at {} baud {}",
            config.port,
            config.baud_rate,
            config.framing()
        );

        Self::from_transport(&config.port, port, writer, config.options.clone(), observer)
    }

    /// Run a link over any byte transport. The reader half must honour a read
    /// timeout (returning `TimedOut`/`WouldBlock`) for `close` to stay bounded.
    pub fn from_transport<R, W>(
        port_name: &str,
        reader: R,
        writer: W,
        options: LinkOptions,
        observer: Option<Arc<dyn PacketObserver>>,
    ) -> Result<Self, LinkError>
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        let slot = Arc::new(LatestValueSlot::new());
        let cancel_flag = Arc::new(AtomicBool::new(false));

        let ctx = ReaderContext {
            port_name: port_name.to_string(),
            options,
            observer,
            slot: slot.clone(),
            cancel_flag: cancel_flag.clone(),
        };

        let handle = thread::Builder::new()
            .name(format!("senselink-reader:{}", port_name))
            .spawn(move || run_reader(reader, ctx))
            .map_err(LinkError::Spawn)?;

        Ok(DeviceLink {
            port_name: port_name.to_string(),
            writer: Mutex::new(Some(Box::new(writer))),
            slot,
            cancel_flag,
            reader_handle: Mutex::new(Some(handle)),
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        !self.cancel_flag.load(Ordering::Relaxed)
    }

    /// Write one command line and flush it.
    ///
    /// Each line is written under the writer lock so it is never torn, but
    /// concurrent callers are not ordered relative to each other.
    pub fn send(&self, command: &Command) -> Result<(), LinkError> {
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let writer = guard.as_mut().ok_or(LinkError::Closed)?;
        writer.write_all(&command.encode())?;
        writer.flush()?;
        Ok(())
    }

    pub fn send_goto(&self, x: f64, y: f64, z: f64) -> Result<(), LinkError> {
        self.send(&Command::Goto { x, y, z })
    }

    /// Components outside 0-255 are clamped.
    pub fn send_rgb(&self, r: i32, g: i32, b: i32) -> Result<(), LinkError> {
        self.send(&Command::rgb_clamped(r, g, b))
    }

    pub fn send_led(&self, on: bool) -> Result<(), LinkError> {
        self.send(&Command::Led(on))
    }

    pub fn red_led(&self) -> Result<(), LinkError> {
        self.send_rgb(255, 0, 0)
    }

    pub fn yellow_led(&self) -> Result<(), LinkError> {
        self.send_rgb(255, 255, 0)
    }

    pub fn green_led(&self) -> Result<(), LinkError> {
        self.send_rgb(0, 255, 0)
    }

    pub fn led_off(&self) -> Result<(), LinkError> {
        self.send_rgb(0, 0, 0)
    }

    /// Take the freshest telemetry snapshot, waiting up to `timeout`.
    ///
    /// The read is destructive: a snapshot returned here is not returned to
    /// any other caller.
    pub fn get_state(&self, timeout: Duration) -> Option<SensorPacket> {
        self.slot.consume(timeout)
    }

    /// Stop the reader and release the port.
    ///
    /// The reader notices the stop request after its current read times out,
    /// so this returns within roughly one read timeout. Later sends fail with
    /// `LinkError::Closed`.
    pub fn close(&self) {
        if self.cancel_flag.swap(true, Ordering::SeqCst) {
            return;
        }

        // Drop the write half
        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = None;

        let handle = self
            .reader_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            // An observer closing the link runs on the reader thread itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tlog!("[link:{}] Reader thread panicked", self.port_name);
            }
        }
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// Reader Thread
// ============================================================================

struct ReaderContext {
    port_name: String,
    options: LinkOptions,
    observer: Option<Arc<dyn PacketObserver>>,
    slot: Arc<LatestValueSlot<SensorPacket>>,
    cancel_flag: Arc<AtomicBool>,
}

fn run_reader<R: Read>(mut reader: R, ctx: ReaderContext) {
    let mut framer = LineFramer::new(ctx.options.max_line_length);
    let mut buf = [0u8; 256];

    tlog!("[link:{}] Reader started", ctx.port_name);

    while !ctx.cancel_flag.load(Ordering::Relaxed) {
        match reader.read(&mut buf) {
            Ok(0) => {
                // EOF - port closed/disconnected
                tlog!(
                    "[link:{}] Port reported end of stream, retrying in {:?}",
                    ctx.port_name,
                    ctx.options.io_backoff
                );
                drop_partial(&ctx, &mut framer);
                backoff(&ctx);
            }
            Ok(n) => {
                for line in framer.feed(&buf[..n]) {
                    handle_line(&ctx, line);
                }
            }
            Err(ref e)
                if matches!(
                    e.kind(),
                    ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                ) =>
            {
                // Nothing read within the bound
            }
            Err(e) => {
                tlog!(
                    "[link:{}] Serial error: {} (retrying in {:?})",
                    ctx.port_name,
                    e,
                    ctx.options.io_backoff
                );
                drop_partial(&ctx, &mut framer);
                backoff(&ctx);
            }
        }
    }

    tlog!("[link:{}] Reader stopped", ctx.port_name);
}

fn handle_line(ctx: &ReaderContext, line: LineFrame) {
    if line.incomplete {
        tlog!(
            "[link:{}] Discarding {} bytes of a line over the {} byte limit",
            ctx.port_name,
            line.bytes.len(),
            ctx.options.max_line_length
        );
        return;
    }

    let Some(packet) = parse_line(&line.decode(), Utc::now()) else {
        return;
    };

    if let Some(observer) = &ctx.observer {
        notify(&ctx.port_name, observer.as_ref(), &packet);
    }

    if packet.is_telemetry() {
        ctx.slot.publish(packet);
    }
}

/// Run the observer, logging instead of propagating its failures.
fn notify(port_name: &str, observer: &dyn PacketObserver, packet: &SensorPacket) {
    match panic::catch_unwind(AssertUnwindSafe(|| observer.on_packet(packet))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            tlog!("[link:{}] Observer error: {}", port_name, e);
        }
        Err(_) => {
            tlog!(
                "[link:{}] Observer panicked on {} packet",
                port_name,
                packet.kind().as_str()
            );
        }
    }
}

fn drop_partial(ctx: &ReaderContext, framer: &mut LineFramer) {
    let dropped = framer.discard_partial();
    if dropped > 0 {
        tlog!(
            "[link:{}] Dropped {} bytes of a line cut off by the stream break",
            ctx.port_name,
            dropped
        );
    }
}

/// Sleep for the backoff interval in read-timeout slices, leaving early on stop.
fn backoff(ctx: &ReaderContext) {
    let deadline = Instant::now() + ctx.options.io_backoff;
    let step = ctx.options.read_timeout.max(Duration::from_millis(1));
    while !ctx.cancel_flag.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(step.min(deadline - now));
    }
}

// ============================================================================
// Test Transport
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::packet::{Frame, PacketKind};
    use std::io;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::sync::OnceLock;

    const WAIT: Duration = Duration::from_secs(2);

    fn feed(tx: &Feed, text: &str) {
        tx.send(Ok(text.as_bytes().to_vec())).unwrap();
    }

    #[test]
    fn test_observer_sees_every_packet_in_order() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        feed(&tx, "READY\r\n{\"temp_c\":21.5}\n");
        feed(&tx, "ACK=TARGET_SET,1,2,3\nERR=BAD_RGB\n");

        let kinds: Vec<PacketKind> = (0..4)
            .map(|_| packets.recv_timeout(WAIT).unwrap().kind())
            .collect();
        assert_eq!(
            kinds,
            vec![PacketKind::Text, PacketKind::Json, PacketKind::Ack, PacketKind::Err]
        );
        link.close();
    }

    #[test]
    fn test_get_state_returns_latest_telemetry_only() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        feed(&tx, "{\"temp_c\":20.0}\n{\"temp_c\":21.0}\nACK=LED_ON\n");
        for _ in 0..3 {
            packets.recv_timeout(WAIT).unwrap();
        }

        let state = link.get_state(Duration::from_millis(200)).unwrap();
        assert_eq!(state.telemetry().unwrap().temp_c, Some(21.0));

        // Destructive read: nothing left for a second caller
        assert!(link.get_state(Duration::from_millis(50)).is_none());
        link.close();
    }

    #[test]
    fn test_get_state_waits_for_next_publish() {
        let (link, tx, _) = scripted_link(None);
        let feeder = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            feed(&tx, "{\"humidity_rh\":44.5}\n");
            tx
        });

        let state = link.get_state(WAIT).unwrap();
        assert_eq!(state.telemetry().unwrap().humidity_rh, Some(44.5));
        drop(feeder.join().unwrap());
        link.close();
    }

    #[test]
    fn test_get_state_without_data_times_out() {
        let (link, _tx, _) = scripted_link(None);
        let start = Instant::now();
        assert!(link.get_state(Duration::from_millis(100)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
        link.close();
    }

    #[test]
    fn test_commands_written_to_wire() {
        let (link, _tx, writer) = scripted_link(None);

        link.send_goto(1.5, 2.0, -3.0).unwrap();
        link.send_rgb(300, 128, -1).unwrap();
        link.send_led(true).unwrap();
        link.red_led().unwrap();
        link.yellow_led().unwrap();
        link.green_led().unwrap();
        link.led_off().unwrap();

        assert_eq!(
            writer.contents(),
            "GOTO=1.5,2,-3\nRGB=255,128,0\nLED=ON\nRGB=255,0,0\nRGB=255,255,0\nRGB=0,255,0\nRGB=0,0,0\n"
        );
        link.close();
    }

    #[test]
    fn test_close_stops_reader_and_rejects_writes() {
        let (link, _tx, writer) = scripted_link(None);
        assert!(link.is_open());

        let start = Instant::now();
        link.close();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(!link.is_open());

        assert!(matches!(link.send_goto(0.0, 0.0, 0.0), Err(LinkError::Closed)));
        assert!(writer.contents().is_empty());

        // Second close is a no-op
        link.close();
    }

    #[test]
    fn test_failing_observer_does_not_stop_reader() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let observer: Arc<dyn PacketObserver> = Arc::new(move |_: &SensorPacket| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("observer bug");
            }
            Err("observer unavailable".to_string())
        });
        let (link, tx, _) = scripted_link(Some(observer));

        feed(&tx, "{\"temp_c\":1.0}\n");
        feed(&tx, "{\"temp_c\":2.0}\n");

        let mut last = None;
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if let Some(p) = link.get_state(Duration::from_millis(50)) {
                last = p.telemetry().and_then(|t| t.temp_c);
                if last == Some(2.0) {
                    break;
                }
            }
        }
        assert_eq!(last, Some(2.0));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        link.close();
    }

    #[test]
    fn test_io_error_backs_off_and_recovers() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        tx.send(Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")))
            .unwrap();
        feed(&tx, "READY\n");

        let start = Instant::now();
        let packet = packets.recv_timeout(WAIT).unwrap();
        assert_eq!(packet.raw_line, "READY");
        assert!(start.elapsed() >= Duration::from_millis(50));
        link.close();
    }

    #[test]
    fn test_end_of_stream_backs_off_and_drops_partial_line() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        feed(&tx, "{\"temp_c\":2");
        tx.send(Ok(Vec::new())).unwrap(); // zero-byte read
        feed(&tx, "READY\n");

        let start = Instant::now();
        let packet = packets.recv_timeout(WAIT).unwrap();
        assert_eq!(packet.raw_line, "READY");
        assert_eq!(packet.kind(), PacketKind::Text);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(link.get_state(Duration::from_millis(20)).is_none());
        link.close();
    }

    #[test]
    fn test_observer_can_close_link_from_reader_thread() {
        let cell: Arc<OnceLock<Arc<DeviceLink>>> = Arc::new(OnceLock::new());
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let done_tx = Mutex::new(done_tx);
        let handle = cell.clone();
        let observer: Arc<dyn PacketObserver> = Arc::new(move |p: &SensorPacket| {
            if p.raw_line == "BYE" {
                if let Some(link) = handle.get() {
                    link.close();
                }
            }
            done_tx.lock().unwrap().send(()).map_err(|e| e.to_string())
        });
        let (link, tx, writer) = scripted_link(Some(observer));
        let link = Arc::new(link);
        assert!(cell.set(link.clone()).is_ok());

        feed(&tx, "BYE\n");
        done_rx.recv_timeout(WAIT).unwrap();

        // The reader exits and drops the observer, disconnecting the channel
        assert_eq!(
            done_rx.recv_timeout(WAIT),
            Err(RecvTimeoutError::Disconnected)
        );
        assert!(!link.is_open());
        assert!(matches!(link.send_led(true), Err(LinkError::Closed)));
        assert!(writer.contents().is_empty());

        // Closing again from the owning thread is a no-op
        link.close();
    }

    #[test]
    fn test_close_during_backoff_is_bounded() {
        let mut options = test_options();
        options.io_backoff = Duration::from_secs(30);
        let (link, tx, _) = scripted_link_with(options, None);

        tx.send(Err(io::Error::new(ErrorKind::BrokenPipe, "unplugged")))
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        let start = Instant::now();
        link.close();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_over_length_line_discarded() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        let long = "x".repeat(100);
        feed(&tx, &format!("{}\nERR=CMD_TOO_LONG\n", long));

        let packet = packets.recv_timeout(WAIT).unwrap();
        assert_eq!(
            packet.frame,
            Frame::Err(crate::packet::ErrFrame {
                error: "CMD_TOO_LONG".to_string()
            })
        );
        link.close();
    }

    #[test]
    fn test_line_at_length_limit_with_crlf_is_kept() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        let prefix = "{\"temp_c\":21.5,\"note\":\"";
        let pad = "x".repeat(test_options().max_line_length - prefix.len() - 2);
        let line = format!("{}{}\"}}", prefix, pad);
        assert_eq!(line.len(), test_options().max_line_length);
        feed(&tx, &format!("{}\r\nREADY\r\n", line));

        let packet = packets.recv_timeout(WAIT).unwrap();
        assert_eq!(packet.kind(), PacketKind::Json);
        assert_eq!(packet.telemetry().unwrap().temp_c, Some(21.5));
        assert_eq!(packets.recv_timeout(WAIT).unwrap().raw_line, "READY");
        link.close();
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let (observer, packets) = channel_observer();
        let (link, tx, _) = scripted_link(Some(observer));

        tx.send(Ok(vec![b'h', b'i', 0xFE, b'\n'])).unwrap();
        let packet = packets.recv_timeout(WAIT).unwrap();
        assert_eq!(packet.raw_line, "hi\u{FFFD}");
        link.close();
    }

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/senselink-no-such-port", 115200);
        let result = DeviceLink::open(&config, None);
        assert!(matches!(result, Err(LinkError::Open { .. })));
    }

    #[test]
    fn test_open_rejects_unsupported_framing() {
        let mut config = SerialConfig::new("/dev/senselink-no-such-port", 115200);
        config.data_bits = 4;
        let result = DeviceLink::open(&config, None);
        assert!(matches!(result, Err(LinkError::Config(_))));
    }
}
