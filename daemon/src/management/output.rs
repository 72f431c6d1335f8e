use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::Notify;

pub const OUTPUT_BUFFER_CAPACITY: usize = 1000;

/// Fans console lines out to any number of subscribers. Each subscriber has
/// its own bounded buffer; when it is full the oldest line is dropped, so
/// publishing never waits on a slow reader.
pub struct OutputHub {
    capacity: usize,
    subscribers: Mutex<Vec<Weak<OutputRing>>>,
}

struct OutputRing {
    buffer: Mutex<RingBuffer>,
    notify: Notify,
}

struct RingBuffer {
    lines: VecDeque<String>,
    skipped: u64,
    closed: bool,
}

impl OutputRing {
    fn lock(&self) -> MutexGuard<'_, RingBuffer> {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutputHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe(&self) -> OutputReceiver {
        let ring = Arc::new(OutputRing {
            buffer: Mutex::new(RingBuffer {
                lines: VecDeque::with_capacity(self.capacity),
                skipped: 0,
                closed: false,
            }),
            notify: Notify::new(),
        });
        self.subscribers().push(Arc::downgrade(&ring));
        OutputReceiver { ring }
    }

    pub fn publish(&self, line: &str) {
        self.subscribers().retain(|subscriber| {
            let Some(ring) = subscriber.upgrade() else {
                return false;
            };
            {
                let mut buffer = ring.lock();
                if buffer.lines.len() == self.capacity {
                    buffer.lines.pop_front();
                    buffer.skipped += 1;
                }
                buffer.lines.push_back(line.to_owned());
            }
            ring.notify.notify_one();
            true
        });
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<Weak<OutputRing>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for OutputHub {
    fn drop(&mut self) {
        for ring in self.subscribers().drain(..).filter_map(|r| r.upgrade()) {
            ring.lock().closed = true;
            ring.notify.notify_one();
        }
    }
}

/// One subscriber's view of the console.
pub struct OutputReceiver {
    ring: Arc<OutputRing>,
}

impl OutputReceiver {
    /// Next buffered line, waiting for one if needed. `None` once the hub
    /// is gone and the buffer is drained.
    pub async fn recv(&mut self) -> Option<String> {
        loop {
            {
                let mut buffer = self.ring.lock();
                if let Some(line) = buffer.lines.pop_front() {
                    return Some(line);
                }
                if buffer.closed {
                    return None;
                }
            }
            self.ring.notify.notified().await;
        }
    }

    /// Lines dropped so far because this subscriber fell behind.
    pub fn skipped(&self) -> u64 {
        self.ring.lock().skipped
    }
}
