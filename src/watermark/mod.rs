//! Tiled watermark previews.
//!
//! - [`policy`]: tiling and encoding parameters, with a stable version string.
//! - [`compositor`]: decodes a source, tiles the logo over it and encodes JPEG.
//! - [`cache`]: memoizes derivatives on disk under the media root.

pub mod cache;
pub mod compositor;
pub mod policy;

pub use cache::{Derived, DerivedImageCache};
pub use compositor::{composite, Compositor, Rendered};
pub use policy::{Spacing, WatermarkPolicy};
