//! Device sessions: admission, process pairs and teardown.
//!
//! Each device in the run goes through a fixed pipeline before its automation
//! server and test runner are registered as a pair:
//!
//! ```text
//! check availability ─▶ create dirs ─▶ reserve ─▶ bridge connect
//!         │                                            │
//!         ▼                                            ▼
//!      skipped                              start server ─▶ start client
//!                                                              │
//!                                                              ▼
//!                                                    ChildRegistry (pair)
//!                                                              │
//!                                             client exit/error ▼
//!                                            release ─▶ disconnect ─▶ kill
//! ```
//!
//! Every device gets its own REST and bootstrap port from [`PortAllocator`].

mod directory;
mod launcher;
mod orchestrator;
mod port_allocator;
mod process;
mod registry;
mod supervisor;
mod types;

pub use directory::SessionDirectories;
pub use launcher::{
    ClientLaunch, CommandLauncher, ProcessLauncher, ServerLaunch, CLIENT_PROCESS, SERVER_PROCESS,
};
pub use orchestrator::Orchestrator;
pub use port_allocator::PortAllocator;
#[cfg(test)]
pub(crate) use port_allocator::is_port_free;
#[cfg(test)]
pub(crate) use process::ProcessControl;
pub use process::{ProcessHandle, ProcessState, ProcessWatch};
pub use registry::ChildRegistry;
pub use supervisor::ProcessSupervisor;
pub use types::{DeviceReport, DeviceState, PairKey, ProcessPair, RunContext, RunReport};
