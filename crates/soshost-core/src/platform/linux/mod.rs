//! Linux process access through `/proc`, `process_vm_readv` and `ptrace`.

pub mod context;
pub mod process;
pub mod threads;

pub use process::LinuxProcessReader;
pub use threads::LinuxThreadControl;
