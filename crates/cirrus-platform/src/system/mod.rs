//! OS-boundary capabilities: commands, files, time
//!
//! Components take these as `Arc<dyn ...>` so a reconciliation pass can be
//! driven entirely by fakes in tests (see [`crate::fakes`]).

mod clock;
mod cmd;
mod fs;

pub use clock::{Clock, TokioClock};
pub use cmd::{command_line, CmdRunner, CommandOutput, ExecCmdRunner};
pub use fs::{ConvergeOpts, FileSystem, OsFileSystem};
