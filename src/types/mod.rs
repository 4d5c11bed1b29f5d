pub mod bar;
pub mod position;
pub mod trading;

pub use bar::*;
pub use position::*;
pub use trading::*;
