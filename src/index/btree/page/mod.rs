pub mod internal;
pub mod leaf;
pub mod tree_page;

pub use internal::{InternalMut, InternalRef};
pub use leaf::{LeafMut, LeafRef};
