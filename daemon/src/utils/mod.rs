pub use archive::*;

mod archive;
