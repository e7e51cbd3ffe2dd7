// src/sampler.rs
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on the ring's total footprint.
pub const RING_BYTES: usize = 1 << 20;

pub const SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Fixed-capacity ring of snapshots; the oldest entry is overwritten on overflow.
#[derive(Debug)]
pub struct SnapshotRing<T> {
    entries: Vec<T>,
    capacity: usize,
    /// Index of the next write once the ring is full.
    next: usize,
}

impl<T: Clone> SnapshotRing<T> {
    /// Ring holding `⌊RING_BYTES / size_of::<T>()⌋` entries, or `None` if not even one fits.
    pub fn new() -> Option<Self> {
        Self::with_budget(RING_BYTES)
    }

    /// Ring sized to fit within `bytes`.
    pub fn with_budget(bytes: usize) -> Option<Self> {
        let size = std::mem::size_of::<T>().max(1);
        Self::with_capacity(bytes / size)
    }

    pub fn with_capacity(capacity: usize) -> Option<Self> {
        if capacity == 0 {
            return None;
        }
        Some(Self {
            entries: Vec::new(),
            capacity,
            next: 0,
        })
    }

    pub fn push(&mut self, value: T) {
        if self.entries.len() < self.capacity {
            self.entries.push(value);
        } else {
            self.entries[self.next] = value;
            self.next = (self.next + 1) % self.capacity;
        }
    }

    /// Most recent snapshot.
    pub fn last(&self) -> Option<T> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = if self.entries.len() < self.capacity {
            self.entries.len() - 1
        } else {
            (self.next + self.capacity - 1) % self.capacity
        };
        Some(self.entries[idx].clone())
    }

    /// The `min(k, len)` most recent snapshots, oldest first.
    pub fn last_n(&self, k: usize) -> Vec<T> {
        let n = k.min(self.entries.len());
        let len = self.entries.len();
        // Chronological start of the stored window.
        let oldest = if len < self.capacity { 0 } else { self.next };
        (len - n..len)
            .map(|i| self.entries[(oldest + i) % len].clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

type Collector<T> = Arc<dyn Fn() -> T + Send + Sync>;

struct Shared<T> {
    ring: Mutex<SnapshotRing<T>>,
    stop: AtomicBool,
}

impl<T> Shared<T> {
    fn ring(&self) -> MutexGuard<'_, SnapshotRing<T>> {
        self.ring.lock().unwrap_or_else(|e| e.into_inner())
    }
}

enum Mode<T> {
    Ring {
        shared: Arc<Shared<T>>,
        thread: Mutex<Option<JoinHandle<()>>>,
    },
    /// Ring unavailable: every read collects synchronously.
    Direct,
}

/// Background sampler started on first use.
pub struct Sampler<T> {
    name: String,
    interval: Duration,
    ring_bytes: usize,
    collect: Collector<T>,
    mode: OnceLock<Mode<T>>,
}

impl<T: Clone + Send + 'static> Sampler<T> {
    pub fn new(name: &str, interval: Duration, collect: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self::with_budget(name, interval, RING_BYTES, collect)
    }

    pub fn with_budget(
        name: &str,
        interval: Duration,
        ring_bytes: usize,
        collect: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.to_string(),
            interval,
            ring_bytes,
            collect: Arc::new(collect),
            mode: OnceLock::new(),
        }
    }

    fn mode(&self) -> &Mode<T> {
        self.mode.get_or_init(|| self.start())
    }

    fn start(&self) -> Mode<T> {
        let Some(mut ring) = SnapshotRing::with_budget(self.ring_bytes) else {
            tracing::warn!(sampler = %self.name, "snapshot too large for ring, sampling synchronously");
            return Mode::Direct;
        };
        // Seed so the first reader never sees an empty ring.
        ring.push((self.collect)());

        let shared = Arc::new(Shared {
            ring: Mutex::new(ring),
            stop: AtomicBool::new(false),
        });
        let worker_shared = shared.clone();
        let collect = self.collect.clone();
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name(format!("miniweb-{}", self.name))
            .spawn(move || {
                while !worker_shared.stop.load(Ordering::Acquire) {
                    thread::sleep(interval);
                    if worker_shared.stop.load(Ordering::Acquire) {
                        break;
                    }
                    let snapshot = collect();
                    worker_shared.ring().push(snapshot);
                }
            });

        match spawned {
            Ok(handle) => {
                tracing::debug!(sampler = %self.name, capacity = shared.ring().capacity(), "sampler started");
                Mode::Ring {
                    shared,
                    thread: Mutex::new(Some(handle)),
                }
            }
            Err(e) => {
                tracing::warn!(sampler = %self.name, error = %e, "cannot start sampler thread, sampling synchronously");
                Mode::Direct
            }
        }
    }

    /// Most recent snapshot.
    pub fn last(&self) -> Option<T> {
        match self.mode() {
            Mode::Ring { shared, .. } => shared.ring().last(),
            Mode::Direct => Some((self.collect)()),
        }
    }

    /// Up to `k` recent snapshots, oldest first.
    pub fn last_n(&self, k: usize) -> Vec<T> {
        match self.mode() {
            Mode::Ring { shared, .. } => shared.ring().last_n(k),
            Mode::Direct if k > 0 => vec![(self.collect)()],
            Mode::Direct => Vec::new(),
        }
    }

    /// Whether the background thread is feeding a ring (false before first use or in fallback).
    pub fn is_sampling(&self) -> bool {
        matches!(self.mode.get(), Some(Mode::Ring { .. }))
    }

    /// Stop and join the background thread, if one was started.
    pub fn shutdown(&self) {
        if let Some(Mode::Ring { shared, thread }) = self.mode.get() {
            shared.stop.store(true, Ordering::Release);
            let handle = thread.lock().unwrap_or_else(|e| e.into_inner()).take();
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }
}
