use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Performance counters maintained by the layout engine.
#[derive(Debug)]
pub struct LayoutStatistics {
    /// Blocks successfully read back (sync and async paths).
    pub block_reads: Counter,

    /// Blocks successfully written (async completions included).
    pub block_writes: Counter,

    /// Blocks removed through `delete_block`.
    pub blocks_deleted: Counter,

    /// Bytes read from the data file, compressed form.
    pub bytes_read: Counter,

    /// Bytes written to the data file, compressed form and page padding
    /// included.
    pub bytes_written: Counter,

    /// Logical payload bytes handed to the write path.
    pub inflated_bytes_written: Counter,

    /// Payload bytes after compression, before page rounding.
    pub compressed_bytes_written: Counter,

    /// Reads that failed on I/O, checksum or decompression.
    pub read_failures: Counter,

    /// Writes whose extent had to be returned to the free list.
    pub write_failures: Counter,

    /// Extents inserted into the hole list.
    pub holes_created: Counter,

    /// Bytes currently sitting in the hole list.
    pub hole_bytes: Counter,

    /// Releases absorbed by retracting the logical end of file.
    pub tail_reclaims: Counter,

    /// Completed `flush` calls.
    pub flushes: Counter,

    /// Index blocks actually rewritten by a flush.
    pub index_flushes: Counter,

    /// Superblock double-writes performed.
    pub superblock_flushes: Counter,

    /// Compressed over inflated bytes written, 1.0 when nothing was written.
    pub compression_ratio: Gauge,
}

impl LayoutStatistics {
    pub fn new() -> Arc<Self> {
        let inflated_bytes_written = Counter::new("inflated_bytes_written");
        let compressed_bytes_written = Counter::new("compressed_bytes_written");

        Arc::new(Self {
            block_reads: Counter::new("block_reads"),
            block_writes: Counter::new("block_writes"),
            blocks_deleted: Counter::new("blocks_deleted"),
            bytes_read: Counter::new("bytes_read"),
            bytes_written: Counter::new("bytes_written"),
            inflated_bytes_written: inflated_bytes_written.clone(),
            compressed_bytes_written: compressed_bytes_written.clone(),
            read_failures: Counter::new("read_failures"),
            write_failures: Counter::new("write_failures"),
            holes_created: Counter::new("holes_created"),
            hole_bytes: Counter::new("hole_bytes"),
            tail_reclaims: Counter::new("tail_reclaims"),
            flushes: Counter::new("flushes"),
            index_flushes: Counter::new("index_flushes"),
            superblock_flushes: Counter::new("superblock_flushes"),
            compression_ratio: Gauge::new(
                "compression_ratio",
                Box::new({
                    let inflated = inflated_bytes_written;
                    let compressed = compressed_bytes_written;
                    move || {
                        let i = inflated.get() as f64;
                        let c = compressed.get() as f64;
                        if i == 0.0 {
                            1.0
                        } else {
                            c / i
                        }
                    }
                }),
            ),
        })
    }
}

/// A common trait implemented by all metric types (e.g., `Counter`, `Gauge`),
/// providing a uniform view for export and debugging.
pub trait Metric: Send + Sync {
    fn name(&self) -> &str;
    fn as_f64(&self) -> f64;
}

/// A `Counter` tracks a 64-bit unsigned value that is mostly incremented,
/// occasionally decremented, and safe for concurrent updates.
///
/// # Examples
///
/// ```
/// use wallabydb::statistics::Counter;
/// let counter = Counter::new("requests");
/// counter.inc(1);
/// assert_eq!(counter.get(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct Counter {
    name: String,
    atomic: Arc<AtomicU64>,
}

impl Counter {
    /// Creates a new counter with the given name.
    pub fn new(name: &str) -> Self {
        Counter { name: name.to_string(), atomic: Arc::new(AtomicU64::new(0)) }
    }

    /// Returns the current value of the counter.
    pub fn get(&self) -> u64 {
        self.atomic.load(Ordering::Relaxed)
    }

    /// Increments the counter by the given amount.
    pub fn inc(&self, amount: u64) {
        self.atomic.fetch_add(amount, Ordering::Relaxed);
    }

    /// Decrements the counter by the given amount.
    pub fn dec(&self, amount: u64) {
        self.atomic.fetch_sub(amount, Ordering::Relaxed);
    }
}

impl Metric for Counter {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_f64(&self) -> f64 {
        self.get() as f64
    }
}

/// A `Gauge` is a floating-point metric computed on demand from a closure,
/// used for derived values such as ratios. It holds no state of its own.
pub struct Gauge {
    name: String,
    compute: Box<dyn Fn() -> f64 + Send + Sync>,
}

impl Gauge {
    /// Creates a new gauge with a name and a closure to compute its value.
    pub fn new(name: &str, compute: Box<dyn Fn() -> f64 + Send + Sync>) -> Self {
        Self { name: name.to_string(), compute }
    }

    /// Returns the current computed value of the gauge.
    pub fn value(&self) -> f64 {
        (self.compute)()
    }
}

impl Metric for Gauge {
    fn name(&self) -> &str {
        &self.name
    }
    fn as_f64(&self) -> f64 {
        self.value()
    }
}

impl std::fmt::Debug for Gauge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gauge")
            .field("name", &self.name)
            .field("value", &self.value())
            .finish()
    }
}
