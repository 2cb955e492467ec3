//! MIDI transport bridge: wires the BLE-MIDI parser to one BLE link and
//! two local MIDI FIFOs.
//!
//! Three watches run concurrently: one reads the BLE link and feeds the
//! parser, forwarding reassembled messages to the `midi_in` FIFO; one
//! watches `midi_in` for its reader going away; one reads `midi_out` and
//! forwards raw bytes to the BLE link. The original transport dispatches
//! all three on a single-threaded GLib event loop with blocking reads
//! inside each watch callback; here each watch is its own OS thread,
//! parked in a bounded `poll()` so `stop()` can ask it to exit without
//! blocking forever.

use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use crate::config::BridgeConfig;
use crate::error::{TransportError, TransportResult};
use crate::parser::{BleMidiParser, ParseOutcome};

/// A byte channel usable as the BLE link or a MIDI FIFO: readable,
/// writable, and backed by a raw descriptor so a watch thread can `poll`
/// it without holding the channel lock.
pub trait Channel: Read + Write + AsRawFd + Send {}
impl<T: Read + Write + AsRawFd + Send + ?Sized> Channel for T {}

struct Endpoint {
    fd: AtomicI32,
    channel: Mutex<Option<Box<dyn Channel>>>,
}

impl Endpoint {
    fn empty() -> Self {
        Endpoint {
            fd: AtomicI32::new(-1),
            channel: Mutex::new(None),
        }
    }

    fn install(&self, channel: Box<dyn Channel>) {
        let fd = channel.as_raw_fd();
        *self.channel.lock().expect("endpoint mutex poisoned") = Some(channel);
        self.fd.store(fd, Ordering::Release);
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.load(Ordering::Acquire)
    }

    fn is_open(&self) -> bool {
        self.raw_fd() != -1
    }

    fn close(&self) {
        self.fd.store(-1, Ordering::Release);
        *self.channel.lock().expect("endpoint mutex poisoned") = None;
    }
}

struct Inner {
    ble: Endpoint,
    midi_in: Endpoint,
    midi_out: Endpoint,
    mtu_write: AtomicU16,
    stopping: AtomicBool,
    config: BridgeConfig,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Owns the BLE link and the two local MIDI FIFOs and drives the
/// BLE-MIDI parser between them.
///
/// Cloning is not provided; instead `start`/`stop` take `&self` so the
/// same handle may be shared (e.g. behind an `Arc`) and controlled from
/// more than one thread, matching the original's "separate threads may
/// call the start/stop entry points" requirement.
pub struct BleMidiTransport {
    inner: Arc<Inner>,
}

impl BleMidiTransport {
    pub fn new(config: BridgeConfig) -> Self {
        BleMidiTransport {
            inner: Arc::new(Inner {
                ble: Endpoint::empty(),
                midi_in: Endpoint::empty(),
                midi_out: Endpoint::empty(),
                mtu_write: AtomicU16::new(0),
                stopping: AtomicBool::new(false),
                config,
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Installs the BLE GATT channel. `mtu_write` gates the output path:
    /// bytes read from `midi_out` are only forwarded once it is non-zero.
    pub fn set_ble_link(&self, channel: impl Channel + 'static, mtu_write: u16) {
        self.inner.ble.install(Box::new(channel));
        self.inner.mtu_write.store(mtu_write, Ordering::Release);
    }

    pub fn set_midi_in(&self, channel: impl Channel + 'static) {
        self.inner.midi_in.install(Box::new(channel));
    }

    pub fn set_midi_out(&self, channel: impl Channel + 'static) {
        self.inner.midi_out.install(Box::new(channel));
    }

    /// Starts a watch thread for each endpoint that is currently open and
    /// not already watched. Resets the BLE-MIDI parser to a fresh state.
    pub fn start(&self) -> TransportResult<()> {
        let mut handles = self.inner.handles.lock().expect("handles mutex poisoned");
        if !handles.is_empty() {
            return Err(TransportError::AlreadyRunning { endpoint: "transport" });
        }
        self.inner.stopping.store(false, Ordering::Release);

        if self.inner.ble.is_open() {
            let inner = Arc::clone(&self.inner);
            debug!(fd = inner.ble.raw_fd(), "starting BLE-MIDI IO watch");
            handles.push(thread::spawn(move || ble_read_watch(inner)));
        }
        if self.inner.midi_in.is_open() {
            let inner = Arc::clone(&self.inner);
            debug!(fd = inner.midi_in.raw_fd(), "starting MIDI input IO watch");
            handles.push(thread::spawn(move || midi_in_watch(inner)));
        }
        if self.inner.midi_out.is_open() {
            let inner = Arc::clone(&self.inner);
            debug!(fd = inner.midi_out.raw_fd(), "starting MIDI output IO watch");
            handles.push(thread::spawn(move || midi_out_watch(inner)));
        }

        Ok(())
    }

    /// Signals every watch thread to exit and joins them. Each watch
    /// releases its `Arc<Inner>` clone as it returns.
    pub fn stop(&self) {
        self.inner.stopping.store(true, Ordering::Release);
        let mut handles = self.inner.handles.lock().expect("handles mutex poisoned");
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }

    pub fn mtu_write(&self) -> u16 {
        self.inner.mtu_write.load(Ordering::Acquire)
    }
}

enum Readiness {
    Timeout,
    Readable,
    Closed,
}

fn poll_fd(fd: RawFd, watch_readable: bool, timeout_ms: i32) -> Readiness {
    let events = if watch_readable { libc::POLLIN } else { 0 };
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // Safety: `pfd` is a valid, uniquely-owned pollfd for the duration of
    // this call, and we pass exactly one entry.
    let rv = unsafe { libc::poll(&mut pfd as *mut libc::pollfd, 1, timeout_ms) };
    if rv < 0 {
        return Readiness::Closed;
    }
    if rv == 0 {
        return Readiness::Timeout;
    }
    if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Readiness::Closed;
    }
    if watch_readable && pfd.revents & libc::POLLIN != 0 {
        return Readiness::Readable;
    }
    Readiness::Timeout
}

enum ReadOutcome {
    Data(usize),
    Eof,
    Transient,
}

fn try_read(endpoint: &Endpoint, buf: &mut [u8], label: &'static str) -> ReadOutcome {
    let mut guard = endpoint.channel.lock().expect("endpoint mutex poisoned");
    match guard.as_mut() {
        Some(channel) => match channel.read(buf) {
            Ok(0) => ReadOutcome::Eof,
            Ok(n) => ReadOutcome::Data(n),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => ReadOutcome::Transient,
            Err(err) => {
                error!(%err, "{label} read error");
                ReadOutcome::Transient
            }
        },
        None => ReadOutcome::Eof,
    }
}

fn forward_to_midi_in(inner: &Inner, bytes: &[u8]) {
    if !inner.midi_in.is_open() {
        return;
    }
    let mut guard = inner.midi_in.channel.lock().expect("midi_in mutex poisoned");
    if let Some(channel) = guard.as_mut() {
        if let Err(err) = channel.write_all(bytes) {
            warn!(%err, "failed writing decoded MIDI to input FIFO");
        }
    }
}

fn ble_read_watch(inner: Arc<Inner>) {
    let mut parser = BleMidiParser::with_config(inner.config);
    let mut buf = vec![0u8; inner.config.ble_read_chunk];

    loop {
        if inner.stopping.load(Ordering::Acquire) {
            break;
        }
        let fd = inner.ble.raw_fd();
        if fd < 0 {
            break;
        }
        match poll_fd(fd, true, inner.config.poll_timeout_ms) {
            Readiness::Timeout => continue,
            Readiness::Closed => {
                debug!(fd, "BLE-MIDI link closed");
                break;
            }
            Readiness::Readable => {}
        }

        let n = match try_read(&inner.ble, &mut buf, "BLE-MIDI link") {
            ReadOutcome::Data(n) => n,
            ReadOutcome::Transient => continue,
            ReadOutcome::Eof => break,
        };

        loop {
            match parser.parse(&buf[..n]) {
                Ok(ParseOutcome::MessageEmitted { truncated, .. }) => {
                    if truncated {
                        warn!("BLE-MIDI SysEx truncated at reassembly buffer capacity");
                    }
                    forward_to_midi_in(&inner, parser.message());
                }
                Ok(ParseOutcome::NoMore) => break,
                Err(err) => {
                    debug!(%err, "couldn't parse BLE-MIDI packet");
                    break;
                }
            }
        }
    }

    inner.ble.close();
}

fn midi_in_watch(inner: Arc<Inner>) {
    loop {
        if inner.stopping.load(Ordering::Acquire) {
            break;
        }
        let fd = inner.midi_in.raw_fd();
        if fd < 0 {
            break;
        }
        match poll_fd(fd, false, inner.config.poll_timeout_ms) {
            Readiness::Closed => break,
            Readiness::Timeout | Readiness::Readable => continue,
        }
    }
    debug!(fd = inner.midi_in.raw_fd(), "closing MIDI input");
    inner.midi_in.close();
}

fn midi_out_watch(inner: Arc<Inner>) {
    let mut buf = vec![0u8; inner.config.ble_read_chunk];

    loop {
        if inner.stopping.load(Ordering::Acquire) {
            break;
        }
        let fd = inner.midi_out.raw_fd();
        if fd < 0 {
            break;
        }
        match poll_fd(fd, true, inner.config.poll_timeout_ms) {
            Readiness::Timeout => continue,
            Readiness::Closed => break,
            Readiness::Readable => {}
        }

        match try_read(&inner.midi_out, &mut buf, "MIDI output") {
            ReadOutcome::Data(n) => {
                if inner.ble.is_open() && inner.mtu_write.load(Ordering::Acquire) != 0 {
                    let mut guard = inner.ble.channel.lock().expect("ble mutex poisoned");
                    if let Some(channel) = guard.as_mut() {
                        if let Err(err) = channel.write_all(&buf[..n]) {
                            warn!(%err, "failed forwarding MIDI output to BLE-MIDI link");
                        }
                    }
                }
            }
            ReadOutcome::Transient => {}
            ReadOutcome::Eof => break,
        }
    }
    debug!(fd = inner.midi_out.raw_fd(), "closing MIDI output");
    inner.midi_out.close();
}
