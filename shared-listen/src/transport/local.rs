//! In-process transport over Tokio channels.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::{MessageSource, Transport};
use crate::error::TransportError;
use crate::message::{ProcessAddress, TypedMessage};

/// Registry of in-process endpoints.
///
/// Clones share the same registry. Handles travel inside the message, so a
/// "transfer" here is a move between tasks of the same process.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    endpoints: Rc<RefCell<HashMap<ProcessAddress, mpsc::UnboundedSender<TypedMessage>>>>,
}

impl LocalNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the inbox for `address`, replacing any previous registration.
    pub fn register(&self, address: ProcessAddress) -> LocalInbox {
        let (sender, receiver) = mpsc::unbounded_channel();
        if self.endpoints.borrow_mut().insert(address, sender).is_some() {
            tracing::debug!("LocalNetwork: replaced endpoint for {}", address);
        }
        LocalInbox {
            address,
            receiver: RefCell::new(receiver),
        }
    }

    /// Remove the endpoint for `address`. Its inbox sees the end of the stream
    /// once queued messages are drained.
    pub fn unregister(&self, address: &ProcessAddress) {
        self.endpoints.borrow_mut().remove(address);
    }
}

impl Transport for LocalNetwork {
    fn send(&self, destination: &ProcessAddress, message: TypedMessage) -> Result<(), TransportError> {
        let endpoints = self.endpoints.borrow();
        let sender = endpoints
            .get(destination)
            .ok_or(TransportError::UnknownDestination(*destination))?;
        tracing::trace!("LocalNetwork: {} -> {}", message.kind, destination);
        sender.send(message).map_err(|_| TransportError::Closed)
    }
}

/// Inbound queue of one registered process.
pub struct LocalInbox {
    address: ProcessAddress,
    receiver: RefCell<mpsc::UnboundedReceiver<TypedMessage>>,
}

impl LocalInbox {
    /// Address this inbox receives for.
    pub fn address(&self) -> ProcessAddress {
        self.address
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&self) -> Option<TypedMessage> {
        self.receiver.borrow_mut().try_recv().ok()
    }
}

#[async_trait(?Send)]
impl MessageSource for LocalInbox {
    async fn recv(&self) -> Result<Option<TypedMessage>, TransportError> {
        // Borrow only while polling so the RefCell is never held across a suspension.
        Ok(std::future::poll_fn(|cx| self.receiver.borrow_mut().poll_recv(cx)).await)
    }
}
