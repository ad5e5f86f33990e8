// src/models/mod.rs
pub mod live;
pub mod ride;
pub mod user;
pub mod view;

pub use live::*;
pub use ride::*;
pub use user::*;
pub use view::*;
