pub mod clock;
pub mod config;
pub mod error;
pub mod host;
pub mod lock;
pub mod logging;
pub mod lua;
pub mod pinned;
pub mod record;
pub mod registry;
pub mod script;
pub mod scripting;
pub mod signal;
pub mod slot;
pub mod tick;
pub mod timer;

// Re-export key types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ScriptingConfig;
pub use error::{Result, ScriptingError};
pub use host::{Delivery, HostEvents, StubHost};
pub use record::{CallbackId, CallbackKind, HandlerId};
pub use script::{ScriptId, ScriptState};
pub use scripting::{Scripting, WeakScripting};
pub use timer::TimerState;
