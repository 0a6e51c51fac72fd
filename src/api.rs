pub mod client;
pub mod logging;
pub mod mock_client;
pub mod stream;

pub use client::{ChatBackend, EventStream, HttpBackend};
pub use mock_client::{MockBackend, MockStream};
