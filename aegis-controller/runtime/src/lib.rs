#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use aegis_controller_core as core;
pub use aegis_controller_identity as identity;
pub use aegis_controller_k8s_api as k8s;

mod admission;
mod args;
pub mod controller;
pub mod inject;
pub mod rbac;
pub mod resolver;
pub mod scripts;
pub mod store;
mod tokens;

pub use self::args::Args;
