//! CLI commands for connpool
//!
//! - `serve`: run a local echo target
//! - `bench`: drive echo round-trips through the pool, or dial per request
//!   with `--no-pool`, and print throughput plus pool statistics
//!
//! ```bash
//! connpool serve --listen 127.0.0.1:18081
//! connpool bench --workers 64 --requests 100000
//! connpool bench --workers 64 --requests 100000 --no-pool
//! ```

pub mod commands;
