pub mod def;
pub mod edit;
pub mod interp;
pub mod print;
pub mod types;
pub mod verify;

pub use def::*;
pub use edit::{Builder, InsertPoint};
pub use types::*;
