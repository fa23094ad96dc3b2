mod cast;

pub use cast::*;
