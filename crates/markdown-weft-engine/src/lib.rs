pub mod direction;
pub mod fingerprint;
pub mod parsing;
pub mod placeholder;
pub mod serialize;
pub mod session;
pub mod store;
pub mod tree;

#[cfg(test)]
pub mod tests;

// Re-export key types for easier usage
pub use direction::*;
pub use fingerprint::*;
pub use parsing::*;
pub use placeholder::*;
pub use serialize::*;
pub use session::*;
pub use store::*;
pub use tree::*;
