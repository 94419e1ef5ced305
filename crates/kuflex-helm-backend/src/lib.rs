pub mod cli;
pub mod traits;

pub use cli::HelmCli;
pub use traits::{ChartInstaller, ChartRelease};
