use crate::api::FlagCoord;

pub type Result<T> = std::result::Result<T, WindowLibError>;

#[derive(Clone, Debug, thiserror::Error)]
pub enum WindowLibError {
    /// A `Wait*` spin exhausted its budget. In the original protocol this
    /// state is an unbounded hang; here it surfaces as an error so a missing
    /// peer `Set*` is assertable instead of wedging the caller.
    #[error("flag wait timed out after {spins} spins: {kind} flag at {coord}")]
    FlagTimeout { kind: &'static str, coord: FlagCoord, spins: u64 },
    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),
    #[error("slot index out of bounds: {0}")]
    SlotOutOfBounds(FlagCoord),
    #[error("peer window does not match the local window layout")]
    WindowMismatch,
    #[error("unsupported element/operator combination: {0}")]
    UnsupportedElement(&'static str),
}
