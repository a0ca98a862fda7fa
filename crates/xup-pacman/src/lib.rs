pub mod cache;
pub mod commands;
pub mod lock;
pub mod log;
pub mod parser;

pub use cache::CacheManager;
pub use commands::PacmanConfig;
pub use lock::{reconcile, LockState, DB_LOCK, LOCK_HOLDERS};
pub use parser::{parse, strip_ansi, ActiveMode, LineBuffer, ParseEvent, Phase};
