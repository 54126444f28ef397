// crates/backend-lib/src/middleware/mod.rs

//! Middleware for the Gatehouse HTTP surface.

pub mod gate;

pub use gate::authorize;

#[cfg(test)]
mod tests;
