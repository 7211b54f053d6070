pub mod divider;

pub use divider::*;
