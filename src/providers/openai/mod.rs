pub mod adapter;
pub mod client;
pub mod models;
pub mod stream;

pub use adapter::RemoteBackend;
