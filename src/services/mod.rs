pub mod chat;
pub mod database;
pub mod download;
pub mod queue;
pub mod session;
pub mod settings;
pub mod store;

pub use chat::ChatController;
pub use database::Database;
pub use download::ModelDownloader;
pub use settings::SettingsService;
