pub mod client;
pub mod message;
pub mod server;

pub use client::RpcClient;
pub use server::RpcServer;
