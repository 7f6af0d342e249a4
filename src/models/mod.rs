pub mod key;
pub mod point;

pub use key::*;
pub use point::*;
