//! Network plumbing around the pool
//!
//! - [`TcpConnector`]: a connection factory dialling plain TCP
//! - [`run_echo_server`]: a local echo target for benchmarking

pub mod echo;
pub mod tcp;

pub use echo::run_echo_server;
pub use tcp::{TcpConnection, TcpConnector};
