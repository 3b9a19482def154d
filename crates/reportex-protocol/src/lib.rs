pub mod codec;
pub mod constants;
pub mod execute;
pub mod receive;
pub mod send;
pub mod target;
pub mod timer;

pub use codec::StatusCodec;
pub use execute::ExecutionMode;
pub use receive::{ReceiveCollaborators, ReceiveSettings, ReceiveState, ReceiveTransaction};
pub use send::{SendCollaborators, SendSettings, SendState, SendTransaction};
pub use target::Target;
pub use timer::{TimerSettings, parse_duration};
