//! Composable, non-blocking device-communication stacks built from
//! OSI-style layers.
//!
//! A stack is an ordered chain of nodes: one *communicator* at the bottom
//! touching the OS or hardware, zero or more *protocols* in the middle, and
//! one *device* on top exposing the application API. Every node implements
//! the same five-operation [`Layer`] interface: data flows down via `send`
//! and up via `receive`, status flows up via `indication`, and the lifecycle
//! is controlled by `open`/`close`.
//!
//! ```text
//!   device (top)      write/read ──┐
//!     │ send ▼        ▲ receive    │ application API
//!   protocol                       │
//!     │               ▲ indication │
//!   communicator (bottom)  ◄── hardware / OS
//! ```
//!
//! # Organization
//!
//! - [`Message`] is a paged, pool-backed byte container with reference-counted
//!   cheap copies; [`message::pool`] holds the process-wide page pool.
//! - [`Layer`], [`Status`] and [`Eid`] define the contract every node honors.
//! - [`protocols`] contains the transport protocols: [`protocols::Iso15765`]
//!   (ISO 15765-2 / CAN-TP), [`protocols::Slip`] (RFC 1055) and the
//!   transparent [`protocols::Trace`] tap.
//! - [`com`] contains the bottom layers that need no hardware: loopback
//!   pairs and test endpoints.
//! - [`dev`] contains the top layers: the generic read/write device and an
//!   echo responder.
//! - [`util`] contains the timer and event primitives the protocols
//!   schedule with.
//!
//! Stacks are built bottom-up and torn down top-down. Constructing a layer
//! wires it on top of its lower neighbor; `open` then cascades to the bottom
//! and back. Nothing on the steady-state data path allocates from the heap:
//! message bytes live in pool pages and move between layers by reference.

pub mod eid;
pub use eid::Eid;

pub mod layer;
pub use layer::{Layer, OpenError, SendError, Status, UpperLink};

pub mod message;
pub use message::{Message, MessageError};

pub mod com;
pub mod dev;
pub mod protocols;
pub mod util;
