//! Sea-ORM entities.
//!
//! - [`gallery`]: password-gated client galleries.
//! - [`photo`]: photos owned by a gallery.
//! - [`client_session`]: browser sessions holding carts.

pub mod client_session;
pub mod gallery;
pub mod photo;
