pub mod frame;
pub mod pending;
pub mod priority;

pub use frame::{
    declared_frame_len, transaction_id, Frame, FrameError, MbapHeader, MAX_FRAME_LEN,
    MAX_MBAP_LENGTH, MBAP_HEADER_LEN, MBAP_PREFIX_LEN,
};
pub use pending::{DuplicatePolicy, PendingError, PendingRequests};
pub use priority::{Priority, PriorityBuffer};
