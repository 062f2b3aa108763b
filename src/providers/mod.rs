pub mod context;
pub mod local;
pub mod openai;
pub mod router;
pub mod traits;
pub mod types;

pub use router::BackendRouter;
pub use traits::ChatBackend;
pub use types::{BackendError, BackendId, GenerateOutcome, StreamEvent};
