mod control_plane;
mod message;
mod sender;

pub use control_plane::{
    blocking_sender_factory, queue_name, LocalQualityLevel, MessagingControlPlane,
    DEFAULT_NON_BLOCKING_RING_SIZE,
};
pub use message::Message;
pub use sender::{
    blocking_channel, BlockingSender, NonBlockingSender, SendError, Sender,
    QUEUE_SIZE_UPPER_LIMIT,
};
