pub mod preprocessing;
pub mod detection;
pub mod extraction;
pub mod polygonize;
pub mod simplification;
pub mod accuracy;

pub use preprocessing::*;
pub use detection::*;
pub use extraction::*;
pub use polygonize::*;
pub use simplification::*;
pub use accuracy::*;
