pub const BYTES_PER_FIELD_ELEMENT: usize = 32;
pub const FIELD_ELEMENTS_PER_BLOB: usize = 4096;

/// 31 usable bytes per field element; the leading byte stays zero so the
/// element fits the BLS scalar field.
pub const MAX_BLOB_DATA_SIZE: usize = FIELD_ELEMENTS_PER_BLOB * (BYTES_PER_FIELD_ELEMENT - 1);
