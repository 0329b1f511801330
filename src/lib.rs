pub mod audio;
pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod ui;

pub use audio::{EngineEvent, EngineNotifier, SimEngine, TrackEngine};
pub use config::SessionConfig;
pub use error::{Error, Result};
pub use session::{Notice, Session};
pub use store::{FsStorage, MemoryStorage, Storage};
