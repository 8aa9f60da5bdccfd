//! xtal-core
//!
//! Asynchronous task execution for external computational programs.
//!
//! ```text
//! collaborator ──add(task)──▶ Manager ──attach──▶ Arc<dyn Backend>
//!                               │                      │
//!                               │   TaskEvent (mpsc)   ▼
//!                               ◀──────────────── TaskCore::run(work)
//!                               │
//!                               └──▶ ManagerEvent (broadcast) ──▶ listeners
//! ```
//!
//! - [`task`]: the `Task` trait, its shared `TaskCore` state and a closure-backed task.
//! - [`backend`]: sequential and threaded execution strategies.
//! - [`manager`]: weighted admission control with a FIFO pending queue.
//! - [`external`]: staging, launching and collecting results of external programs.
//! - [`runner`]: the process-spawning seam used by external program tasks.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod external;
pub mod ids;
pub mod manager;
pub mod runner;
pub mod task;
pub mod util;
