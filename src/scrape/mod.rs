pub mod engine;
pub mod fetcher;
pub mod subdivide;
pub mod url_gen;

pub use engine::*;
pub use fetcher::*;
pub use subdivide::*;
pub use url_gen::*;
