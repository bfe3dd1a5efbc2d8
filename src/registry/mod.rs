//! Session registry
//!
//! Maps session ids to live session tasks. Starting a session inserts an
//! entry; stopping or a fatal condition removes it exactly once.
//!
//! ```text
//!                 Arc<SessionRegistry>
//!            ┌──────────────────────────┐
//!            │ sessions: HashMap<scid,  │
//!            │   SessionEntry {         │
//!            │     device_id, port,     │
//!            │     commands: mpsc::Tx,  │
//!            │   }                      │
//!            │ >                        │
//!            └─────────────┬────────────┘
//!                          │
//!        ┌─────────────────┼─────────────────┐
//!        ▼                 ▼                 ▼
//!  SessionManager     [session task]    [session task]
//!  start / stop       teardown: remove  teardown: remove
//! ```

pub mod entry;
pub mod store;

pub use entry::{SessionCommand, SessionEntry, SessionInfo};
pub use store::SessionRegistry;
