//! # paddock
//!
//! Supervision engine for local dev processes.
//!
//! Takes an ordered list of process definitions (shell command, optional
//! working directory, port, and group), starts and stops them on demand,
//! captures their interleaved stdout/stderr, and detects port conflicts
//! before spawning. A rendering layer drives it through the operations on
//! [`Supervisor`] and redraws on each change notification.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use paddock::{ProcessDef, Supervisor, SupervisorConfig};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let defs = vec![ProcessDef {
//!     id: "web".into(),
//!     title: "Web dev server".into(),
//!     command: "npm run dev".into(),
//!     cwd: None,
//!     port: Some(5173),
//!     group: Some("frontend".into()),
//! }];
//!
//! let sup = Supervisor::new(
//!     defs,
//!     SupervisorConfig { log_dir: "/tmp/paddock/logs".into() },
//! );
//! sup.start("web").await.unwrap();
//! # }
//! ```

pub mod output;
pub mod ports;
pub mod supervisor;
pub mod types;

pub use output::OutputCapture;
pub use ports::{PortInspector, SystemPorts, TerminationError};
pub use supervisor::{ConfirmRequest, Supervisor, SupervisorConfig};
pub use types::*;
