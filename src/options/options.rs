use crate::io::compressor::CompressorType;
use crate::options::storage_quantity::{StorageQuantity, StorageUnit};

#[derive(Default)]
pub struct Options {
    layout_options: Option<LayoutOptions>,
}

impl Options {
    pub fn layout_options(&self) -> &LayoutOptions {
        static DEFAULT_LAYOUT_OPTIONS: LayoutOptions = LayoutOptions {
            compressor_type: None,
            io_threads: None,
            buffer_pool_capacity: None,
        };
        self.layout_options.as_ref().unwrap_or(&DEFAULT_LAYOUT_OPTIONS)
    }

    pub fn with_layout_options(mut self, layout_options: LayoutOptions) -> Self {
        self.layout_options = Some(layout_options);
        self
    }
}

#[derive(Default, Clone)]
pub struct LayoutOptions {
    /// Compression codec applied to block payloads. The codec is recorded in
    /// the superblock and must match on every subsequent open.
    compressor_type: Option<CompressorType>,

    /// Number of worker threads servicing asynchronous file requests.
    io_threads: Option<usize>,

    /// Upper bound on the bytes of freed aligned buffers kept for reuse.
    buffer_pool_capacity: Option<StorageQuantity>,
}

impl LayoutOptions {
    pub fn compressor_type(&self) -> CompressorType {
        self.compressor_type.unwrap_or(CompressorType::Snappy)
    }

    pub fn io_threads(&self) -> usize {
        self.io_threads.unwrap_or(2)
    }

    pub fn buffer_pool_capacity(&self) -> StorageQuantity {
        self.buffer_pool_capacity
            .unwrap_or(StorageQuantity::new(4, StorageUnit::Mebibytes))
    }

    pub fn with_compressor_type(mut self, compressor_type: CompressorType) -> Self {
        self.compressor_type = Some(compressor_type);
        self
    }

    pub fn with_io_threads(mut self, io_threads: usize) -> Self {
        self.io_threads = Some(io_threads);
        self
    }

    pub fn with_buffer_pool_capacity(mut self, capacity: StorageQuantity) -> Self {
        self.buffer_pool_capacity = Some(capacity);
        self
    }
}
