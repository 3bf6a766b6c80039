//! vmhalt - controlled shutdown of a provisioned virtual machine.
//!
//! The core of this crate is [`ShutdownStep`], a single pipeline step that:
//! - asks the VM to stop, either through an in-guest command or the driver
//! - waits for the driver to report the VM as stopped, bounded by a timeout
//! - waits an optional grace period so backend locks can clear
//!
//! Collaborators are injected through [`ShutdownContext`]:
//! - [`Driver`]: virtualization backend control
//! - [`Communicator`]: remote command execution in the guest
//! - [`Ui`]: operator-facing messages

pub mod communicator;
pub mod config;
pub mod driver;
pub mod error;
pub mod step;
pub mod ui;

pub use communicator::{Communicator, RemoteCmd, RemoteOutput, SshCommunicator};
pub use config::{ShutdownMode, StepConfig, VmId};
pub use driver::{Driver, ProcessDriver};
pub use error::{Error, Result, ShutdownError};
pub use step::{ShutdownContext, ShutdownStep, Step, StepAction, POLL_INTERVAL};
pub use ui::{ConsoleUi, MemoryUi, Ui, UiMessage};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
