//! Local data arrays bound to an index map.

use std::fmt;

use crate::index::IndexMap;

/// The type of the elements of a data array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DataType {
    /// Raw byte.
    Byte,
    /// 32-bit signed integer.
    Int,
    /// 64-bit signed integer.
    Long,
    /// 32-bit floating point number.
    Float,
    /// 64-bit floating point number.
    Double,
    /// Opaque element of the specified size in bytes.
    Custom(usize),
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            Self::Byte => 1,
            Self::Int | Self::Float => 4,
            Self::Long | Self::Double => 8,
            Self::Custom(size) => *size,
        }
    }
}

/// A local array whose elements are addressed through an [`IndexMap`].
pub trait DataMap {
    /// The index map describing the global indices stored locally.
    fn index_map(&self) -> &dyn IndexMap;

    /// The type of the array elements.
    fn data_type(&self) -> DataType;

    /// The raw bytes of the local array.
    fn base(&self) -> &[u8];

    /// The raw bytes of the local array, mutably.
    fn base_mut(&mut self) -> &mut [u8];
}

/// A heap-allocated local array owning its index map.
pub struct ArrayData<I> {
    data_type: DataType,
    index_map: I,
    bytes: Vec<u8>,
}

impl<I: IndexMap> ArrayData<I> {
    /// Creates a zero-filled array of `len` elements.
    pub fn new(data_type: DataType, len: usize, index_map: I) -> Self {
        Self {
            data_type,
            index_map,
            bytes: vec![0; len * data_type.size()],
        }
    }

    /// Creates an array of 64-bit floats from the provided values.
    pub fn from_f64(values: &[f64], index_map: I) -> Self {
        let bytes = values.iter().flat_map(|v| v.to_ne_bytes()).collect();

        Self {
            data_type: DataType::Double,
            index_map,
            bytes,
        }
    }

    /// Number of elements in the array.
    pub fn len(&self) -> usize {
        match self.data_type.size() {
            0 => 0,
            size => self.bytes.len() / size,
        }
    }

    /// Checks whether the array has no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decodes the array as 64-bit floats.
    ///
    /// Trailing bytes that do not make up a whole element are ignored.
    pub fn to_f64(&self) -> Vec<f64> {
        self.bytes
            .chunks_exact(8)
            .map(|c| {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(c);
                f64::from_ne_bytes(buf)
            })
            .collect()
    }
}

impl<I: IndexMap> DataMap for ArrayData<I> {
    fn index_map(&self) -> &dyn IndexMap {
        &self.index_map
    }

    fn data_type(&self) -> DataType {
        self.data_type
    }

    fn base(&self) -> &[u8] {
        &self.bytes
    }

    fn base_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl<I> fmt::Debug for ArrayData<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArrayData")
            .field("data_type", &self.data_type)
            .field("bytes", &self.bytes.len())
            .finish_non_exhaustive()
    }
}
