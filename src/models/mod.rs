pub mod chunk;
pub mod marker;
pub mod report;
pub mod score;

pub use chunk::*;
pub use marker::*;
pub use report::*;
pub use score::*;
