pub mod adapter;
pub mod engine;

pub use adapter::LocalBackend;
pub use engine::EngineConfig;
