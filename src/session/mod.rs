mod events;
mod manager;

pub use events::{EventQueue, QueuedEvent};
pub use manager::PageSessionManager;
