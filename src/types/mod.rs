pub mod delay;
pub mod events;
pub mod payload;

pub use delay::Delay;
pub use events::{topics, QueueEvent};
pub use payload::{EntityRef, Payload};
