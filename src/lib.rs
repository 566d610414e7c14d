#[cfg(not(target_os = "linux"))]
compile_error!("myruntime only works on linux");

#[macro_use] extern crate lazy_static;

pub mod capabilities;
pub mod cgroup;
pub mod errors;
pub mod image;
pub mod init;
pub mod network;
pub mod overlay;
pub mod sandbox;

pub use crate::{
    errors::{ImageError, NetworkError, RuntimeError},
    image::ImageName,
    sandbox::{ExitStatus, SandboxConfig},
};
