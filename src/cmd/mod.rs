//! CLI command implementations.
//!
//! | Module     | Commands handled |
//! |------------|------------------|
//! | `simulate` | `Simulate`       |
//! | `config`   | `Config`         |

pub mod config;
pub mod simulate;

pub use config::cmd_config;
pub use simulate::cmd_simulate;
