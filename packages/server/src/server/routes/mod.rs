pub mod health;
pub mod jobs;

pub use health::*;
pub use jobs::*;
