//! Request handlers that outlive a single request/response cycle.

mod events;

pub use events::handle_event_socket;
