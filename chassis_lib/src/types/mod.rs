pub mod config;
pub mod device;
pub mod motion_command;

pub use config::*;
pub use device::*;
pub use motion_command::*;
