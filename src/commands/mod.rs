//! CLI commands implementation

pub mod digest;
pub mod init;
pub mod items;
pub mod run;
pub mod sources;
pub mod status;
pub mod summarize;

pub use digest::*;
pub use init::*;
pub use items::*;
pub use run::*;
pub use sources::*;
pub use status::*;
pub use summarize::*;
