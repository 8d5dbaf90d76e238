mod config;
mod constants;
mod report;
mod window;

pub use config::*;
pub use constants::*;
pub use report::*;
pub use window::*;
