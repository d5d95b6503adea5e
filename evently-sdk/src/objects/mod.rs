pub mod channel;
pub mod ids;
pub mod push;

pub use channel::{Channel, ParseChannelError};
pub use ids::{EventId, ParticipantId};
