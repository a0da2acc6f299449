use crate::error::constants::{ERR_DISPATCHER_READ_LOCK, ERR_DISPATCHER_WRITE_LOCK};
use crate::error::{ProtocolError, Result};
use crate::protocol::message::Message;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

type HandlerFn = dyn Fn(&Message) -> Result<Message> + Send + Sync + 'static;

/// Routes requests to handlers by message type.
///
/// Opcodes are the `type` strings of [`Message::type_name`], so routing never
/// allocates.
pub struct Dispatcher {
    handlers: Arc<RwLock<HashMap<&'static str, Box<HandlerFn>>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register<F>(&self, opcode: &'static str, handler: F) -> Result<()>
    where
        F: Fn(&Message) -> Result<Message> + Send + Sync + 'static,
    {
        let mut handlers = self
            .handlers
            .write()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_WRITE_LOCK.to_string()))?;

        if handlers.insert(opcode, Box::new(handler)).is_some() {
            debug!(opcode, "Replaced message handler");
        }
        Ok(())
    }

    pub fn dispatch(&self, msg: &Message) -> Result<Message> {
        let opcode = msg.type_name();

        let handlers = self
            .handlers
            .read()
            .map_err(|_| ProtocolError::Custom(ERR_DISPATCHER_READ_LOCK.to_string()))?;

        match handlers.get(opcode) {
            Some(handler) => handler(msg),
            None => {
                warn!(opcode, "No handler registered for message type");
                Err(ProtocolError::UnexpectedMessage)
            }
        }
    }

    /// Whether a handler is registered for `opcode`.
    pub fn handles(&self, opcode: &str) -> bool {
        self.handlers
            .read()
            .map(|handlers| handlers.contains_key(opcode))
            .unwrap_or(false)
    }
}
