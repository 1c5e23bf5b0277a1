//! CLI command handlers.
//!
//! Each submodule handles a specific CLI command:
//! - `pack` - Compile a rule source into a packed policy tree
//! - `reduce` - Prune a rule source against an image manifest
//! - `show` - Inspect a previously packed policy blob

pub mod pack;
pub mod reduce;
pub mod show;

pub use pack::cmd_pack;
pub use reduce::cmd_reduce;
pub use show::cmd_show;
