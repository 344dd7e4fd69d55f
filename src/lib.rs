pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod http;
pub mod procedures;
pub mod registry;
pub mod rpc;

pub mod crypto;

pub use config::Config;
pub use error::Error;
