// Speech-recognition worker
// A persistent subprocess driven over line-delimited JSON

pub mod channel;
pub mod protocol;

pub use channel::{WorkerCall, WorkerChannel, WorkerEvent};
pub use protocol::{SegmentData, WorkerMessage, WorkerRequest, WorkerTask};
