mod index;

pub use index::*;
