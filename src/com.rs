//! Bottom layers that need no hardware.
//!
//! Communicators sit at the bottom of a stack: they have no lower neighbor
//! and bridge the layer interface to the outside world. The communicators
//! here stay inside the process — a [`Loopback`] pair connects two stacks
//! back to back, [`Generic`] is a programmable endpoint for exercising the
//! layers above it, and [`Null`] swallows everything.
//!
//! A communicator indicates [`Connected`](crate::Status::Connected) /
//! [`Disconnected`](crate::Status::Disconnected) around its lifetime and
//! acknowledges each accepted send with exactly one
//! [`TxDone`](crate::Status::TxDone) or [`TxError`](crate::Status::TxError).

pub mod generic;
pub use generic::Generic;

pub mod loopback;
pub use loopback::Loopback;

pub mod null;
pub use null::Null;
