pub mod envelope;
pub mod listen;
pub mod server_sent_event;
