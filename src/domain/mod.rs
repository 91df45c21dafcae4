pub mod comment;
pub mod event;

pub use comment::*;
pub use event::*;
