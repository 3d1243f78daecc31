//! # CLI Module
//!
//! Command-line front end for the `webasync-demo` binary.
//!
//! ## Commands
//!
//! ### `run`
//!
//! Drive one request through a full async cycle on the in-process transport
//! and print what the dispatch thread sees:
//!
//! ```bash
//! webasync-demo run --mode callable --delay-ms 200
//! webasync-demo run --mode deferred --delay-ms 500 --timeout-ms 100
//! webasync-demo run --mode callable --fail
//! ```
//!
//! Options:
//! - `--mode <MODE>` - `callable` or `deferred` (default: callable)
//! - `--delay-ms <MS>` - how long the work or producer takes (default: 100)
//! - `--timeout-ms <MS>` - request timeout
//! - `--fail` - produce a failure instead of a value
//! - `--config <FILE>` - YAML configuration file
//!
//! ### `config`
//!
//! Print the effective configuration as YAML:
//!
//! ```bash
//! webasync-demo config --file webasync.yaml
//! ```

mod commands;


pub use commands::{run_cli, run_demo, Cli, Commands, DemoOptions, DemoReport, Mode};
