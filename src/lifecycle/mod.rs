//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup:
//!     Load config → build Application → run startup hooks → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Drain connections
//!     → run shutdown hooks → Exit
//!
//! Signals (signals.rs):
//!     SIGINT (Ctrl-C) → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - One shared signal; every long-running task waits on a clone
//! - Lifespan hooks run in the server, around the serve loop

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::shutdown_on_ctrl_c;
