//! The batching wire sender.
//!
//! Frames each event as a `u32` little-endian length prefix followed by a
//! `bincode`-encoded `EventRecord`, the same framing
//! `distributed-vm::gateway::message` uses between coordinator and worker,
//! now writing to a `UnixStream` instead of a gRPC stream.

use log::{error, warn};
use std::io::{ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use crate::error::{Result, TracerError};
use crate::events::EventRecord;

/// Fixed batch size chosen as the balance between host-callback latency and
/// socket-write syscall overhead.
pub const DEFAULT_BATCH_SIZE: usize = 64;

const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);
const CONNECT_MAX_ATTEMPTS: u32 = 200;

/// Anything that can accept completed events from the callback state
/// machine. Implementations are responsible for their own internal
/// synchronization: `submit`/`teardown` are called concurrently from every
/// host callback thread.
pub trait EventSink: Send + Sync {
    fn submit(&self, record: EventRecord);
    fn teardown(&self);
}

enum Connection {
    Open {
        stream: UnixStream,
        pending: Vec<EventRecord>,
    },
    Failed,
}

/// Owns the outbound socket connection and the in-memory batch buffer.
pub struct BatchSender {
    batch_size: usize,
    inner: Mutex<Connection>,
}

impl BatchSender {
    /// Connects to `socket_path`, retrying while the consumer isn't yet
    /// listening. Blocking here is acceptable: this only runs during
    /// plugin install.
    pub fn connect(socket_path: &Path, batch_size: usize) -> Result<Self> {
        let stream = Self::connect_retrying(socket_path)?;
        Ok(BatchSender {
            batch_size,
            inner: Mutex::new(Connection::Open {
                stream,
                pending: Vec::with_capacity(batch_size),
            }),
        })
    }

    fn connect_retrying(socket_path: &Path) -> Result<UnixStream> {
        let mut attempts = 0;
        loop {
            match UnixStream::connect(socket_path) {
                Ok(stream) => return Ok(stream),
                Err(e)
                    if attempts < CONNECT_MAX_ATTEMPTS
                        && matches!(
                            e.kind(),
                            ErrorKind::NotFound | ErrorKind::ConnectionRefused
                        ) =>
                {
                    attempts += 1;
                    thread::sleep(CONNECT_RETRY_INTERVAL);
                }
                Err(e) => {
                    return Err(TracerError::SenderInitError(format!(
                        "connecting to {}: {e}",
                        socket_path.display()
                    )))
                }
            }
        }
    }

    fn flush_locked(
        stream: &mut UnixStream,
        pending: &mut Vec<EventRecord>,
    ) -> std::io::Result<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let mut buf = Vec::new();
        for record in pending.drain(..) {
            let encoded =
                bincode::serialize(&record).expect("EventRecord contains no unserializable type");
            buf.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
            buf.extend_from_slice(&encoded);
        }
        stream.write_all(&buf)
    }
}

impl EventSink for BatchSender {
    fn submit(&self, record: EventRecord) {
        let mut guard = self.inner.lock().unwrap();
        match &mut *guard {
            Connection::Failed => {}
            Connection::Open { stream, pending } => {
                pending.push(record);
                if pending.len() >= self.batch_size {
                    if let Err(e) = Self::flush_locked(stream, pending) {
                        error!("sender flush failed, dropping subsequent events: {e}");
                        *guard = Connection::Failed;
                    }
                }
            }
        }
    }

    fn teardown(&self) {
        let mut guard = self.inner.lock().unwrap();
        if let Connection::Open { stream, pending } = &mut *guard {
            if let Err(e) = Self::flush_locked(stream, pending) {
                warn!("final flush on teardown failed: {e}");
            }
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        *guard = Connection::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use crate::flags::FlagSet;
    use std::io::Read;
    use std::os::unix::net::UnixListener;

    fn pc_record(pc: u64) -> EventRecord {
        EventRecord::new(
            FlagSet::PC,
            Event::Pc(crate::events::PcEvent { pc, branch: false }),
        )
    }

    #[test]
    fn flushes_at_batch_size_and_frames_each_record() {
        let dir = std::env::temp_dir().join(format!("cannonball-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let sock_path = dir.join("sender.sock");
        let _ = std::fs::remove_file(&sock_path);
        let listener = UnixListener::bind(&sock_path).unwrap();

        let accept_thread = thread::spawn(move || listener.accept().unwrap().0);
        let sender = BatchSender::connect(&sock_path, 2).unwrap();
        let mut server = accept_thread.join().unwrap();

        sender.submit(pc_record(1));
        sender.submit(pc_record(2));

        let mut header = [0u8; 4];
        server.read_exact(&mut header).unwrap();
        let len = u32::from_le_bytes(header) as usize;
        let mut body = vec![0u8; len];
        server.read_exact(&mut body).unwrap();
        let decoded: EventRecord = bincode::deserialize(&body).unwrap();
        assert_eq!(decoded, pc_record(1));

        sender.teardown();
        std::fs::remove_file(&sock_path).ok();
    }
}
