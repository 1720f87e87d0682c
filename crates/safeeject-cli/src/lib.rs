/// SafeEject CLI - command-line frontend.
///
/// This crate contains all presentation code. Business logic lives in
/// `safeeject-core`.
pub mod app;
pub mod render;
pub mod state;

pub use app::{run, Cli, Command};
pub use state::Session;
