//! Message delivery between named processes.
//!
//! A transport moves a [`TypedMessage`] (and the handle attached to it) to a
//! [`ProcessAddress`]. Each process reads its own inbound messages through a
//! [`MessageSource`].
//!
//! Two implementations are provided:
//!
//! - [`LocalNetwork`]: in-process channels, for tests and single-binary setups
//! - [`UnixTransport`]: Unix datagram sockets with descriptors passed as
//!   `SCM_RIGHTS` ancillary data, for real multi-process deployments

mod local;
mod unix;

pub use local::{LocalInbox, LocalNetwork};
pub use unix::{UnixEndpoint, UnixTransport};

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::{ProcessAddress, TypedMessage};

/// Sending half of the inter-process message channel.
///
/// Takes `&self` so it can be called from `RefCell` borrows. Sending does not
/// wait for the destination to process the message.
pub trait Transport {
    /// Deliver a message, and any handle it carries, to `destination`.
    ///
    /// On failure the message and its handle are dropped.
    fn send(&self, destination: &ProcessAddress, message: TypedMessage) -> Result<(), TransportError>;
}

/// Receiving half: the inbound messages addressed to one process.
#[async_trait(?Send)]
pub trait MessageSource {
    /// Wait for the next message.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(message))`: next inbound message
    /// - `Ok(None)`: the source is closed and no more messages will arrive
    /// - `Err(TransportError)`: the message could not be received
    async fn recv(&self) -> Result<Option<TypedMessage>, TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::rc::Rc<T> {
    fn send(&self, destination: &ProcessAddress, message: TypedMessage) -> Result<(), TransportError> {
        (**self).send(destination, message)
    }
}
