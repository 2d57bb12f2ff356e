use thiserror::Error;

/// Errors surfaced by the codec, the container and the filter surface.
#[derive(Error, Debug)]
pub enum TrpxError {
    /// A frame was inserted with a value count that differs from the
    /// count fixed by the first frame.
    #[error("frame has {got} values, container frames have {expected}")]
    ShapeMismatch { expected: usize, got: usize },

    /// Dimensions whose product does not match the per-frame value count.
    #[error("dimensions {dims:?} do not multiply to {size} values")]
    DimMismatch { dims: Vec<usize>, size: usize },

    /// Signed data offered to an unsigned container or vice versa, or a
    /// signed payload unpacked into an unsigned destination.
    #[error("signedness mismatch between container and data")]
    SignednessMismatch,

    /// Signed data admits only the signed encoding.
    #[error("signed data can only be encoded in signed mode")]
    ModeConflict,

    /// Unpacking into a value type with fewer bits than the stored data.
    #[error("destination width {dest} bits is narrower than stored {stored} bits")]
    NarrowingPop { stored: u32, dest: u32 },

    #[error("frame index {index} out of range for {len} frames")]
    IndexOutOfRange { index: usize, len: usize },

    /// Block sizes outside 8..=64 are not encodable.
    #[error("block size {0} outside supported range 8..=64")]
    BlockSize(usize),

    /// Malformed or inconsistent container prelude.
    #[error("malformed container header: {0}")]
    Header(String),

    /// A payload whose block headers or bit budget do not parse.
    #[error("corrupt frame payload: {0}")]
    Corrupt(String),

    /// A backgrounded encode was lost, usually to a worker panic.
    #[error("worker pool failure: {0}")]
    Pool(String),

    /// Propagated stream I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
