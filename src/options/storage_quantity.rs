/// Represents different storage units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageUnit {
    /// Bytes (B).
    Bytes,
    /// Kibibytes (KiB, 1024 bytes).
    Kibibytes,
    /// Mebibytes (MiB, 1024^2 bytes).
    Mebibytes,
    /// Gibibytes (GiB, 1024^3 bytes).
    Gibibytes,
}

/// A storage quantity, combining a value and a unit.
///
/// # Examples
///
/// ```
/// use wallabydb::options::storage_quantity::{StorageQuantity, StorageUnit};
///
/// let size = StorageQuantity::new(4, StorageUnit::Kibibytes);
/// assert_eq!(size.to_bytes(), 4096);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageQuantity {
    value: usize,
    unit: StorageUnit,
}

impl StorageQuantity {
    /// Creates a new `StorageQuantity` with the given value and unit.
    pub const fn new(value: usize, unit: StorageUnit) -> Self {
        Self { value, unit }
    }

    /// Converts the storage quantity to bytes.
    pub fn to_bytes(&self) -> usize {
        match self.unit {
            StorageUnit::Bytes => self.value,
            StorageUnit::Kibibytes => self.value * 1024,
            StorageUnit::Mebibytes => self.value * 1024 * 1024,
            StorageUnit::Gibibytes => self.value * 1024 * 1024 * 1024,
        }
    }
}
