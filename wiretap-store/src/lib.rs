pub mod ring;
pub mod session;

pub use ring::{RingBuffer, SubscriberHandle};
pub use session::SessionStore;
