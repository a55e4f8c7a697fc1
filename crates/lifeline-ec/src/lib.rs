//! Erasure codec for segment healing.
//!
//! A segment is a group of equally sized blocks: `data` blocks carrying the
//! content followed by `check` blocks derived from them. The codec rebuilds
//! missing data blocks from any sufficient subset and regenerates check
//! blocks from a complete data set.
//!
//! ```text
//!   data[0..k]        check[0..m]
//!  ┌──┬──┬──┬──┐     ┌──┬──┐
//!  │d0│  │d2│  │  +  │c0│c1│   decode ──► d0 d1 d2 d3
//!  └──┴──┴──┴──┘     └──┴──┘   encode ──► c0 c1
//! ```

mod codec;
mod error;
mod geometry;
mod reed_solomon;

pub use codec::SegmentCodec;
pub use error::{Error, Result};
pub use geometry::SegmentGeometry;
pub use reed_solomon::ReedSolomonCodec;
