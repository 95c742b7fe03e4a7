//! Top layers exposing the application API.
//!
//! A device sits at the top of a stack: it has no upper neighbor and turns
//! the layer interface into something an application can call — blocking
//! reads and writes in the case of [`Generic`], an automatic responder in
//! the case of [`Echo`].

pub mod generic;
pub use generic::Generic;

pub mod echo;
pub use echo::Echo;
