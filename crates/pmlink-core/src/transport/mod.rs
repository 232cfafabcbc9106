//! Transport bindings for pmlink.
//!
//! Three incompatible mechanisms hide behind one surface:
//! - Pipe: an agent subprocess, stdin/stdout as the duplex channel
//! - Socket: Unix-domain, or loopback INET/IPv6
//! - Module: an in-process agent called directly, no byte stream involved
//!
//! Pipe and socket both yield a [`FrameStream`]; the module binding yields a
//! [`DsoBinding`] wrapping a boxed [`crate::module::AgentModule`].

mod dso;
mod frame;
mod pipe;
mod socket;

pub use dso::{DsoBinding, ModuleRegistry};
pub use frame::{CloseHandle, FrameStream};
pub use pipe::spawn_agent;
pub use socket::{connect_inet, connect_inet6, connect_unix};
