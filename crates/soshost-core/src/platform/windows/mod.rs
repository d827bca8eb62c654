//! Windows process access through Win32: process handles, ToolHelp thread
//! lists, `SuspendThread` and PSS snapshots.

pub mod handle;
pub mod process;
pub mod threads;

pub use process::WindowsProcessReader;
pub use threads::WindowsThreadControl;
