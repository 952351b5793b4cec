// Workspace geometry: labeled regions and the 2D free-space model

pub mod map2d;
pub mod region;

pub use map2d::*;
pub use region::*;
