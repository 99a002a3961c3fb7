//! External service integrations.

pub mod registry {
    pub use crate::registry::*;
}

pub mod geo {
    pub use crate::geo::*;
}

pub mod cache {
    pub use crate::cache::*;
}
