#[macro_use]
mod macros;
pub mod common;
pub(crate) mod cutils;
pub(crate) mod defaults;
pub mod eventlog;
pub mod iolog;
pub(crate) mod log;
pub mod logsrv;
pub mod sudoers;
pub mod system;

mod sendlog;

pub use sendlog::main as sendlog_main;

#[cfg(feature = "do-not-use-all-features")]
compile_error!("Refusing to compile using 'cargo --all-features' --- please read the README");
