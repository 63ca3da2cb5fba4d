pub mod mapper;

pub use mapper::{Coord, SourceMapMapper};
