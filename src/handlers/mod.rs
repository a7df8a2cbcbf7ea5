pub mod batch;
pub mod config;
pub mod media;

pub use batch::*;
pub use config::*;
pub use media::*;
