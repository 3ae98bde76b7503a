//! Action messages exchanged between blocks

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use super::block_args::BlockArgs;
use super::block_id::BlockId;

static NEXT_ACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Action key used by blocks to request a stream command downstream/upstream
pub const ACTION_KEY_STREAM_CMD: &str = "stream_cmd";

/// An asynchronous message routed to a block port.
///
/// Every action gets a process-wide unique `id` when created.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: u64,
    pub key: String,
    pub payload: Vec<u8>,
    pub args: BlockArgs,
}

impl Action {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            id: NEXT_ACTION_ID.fetch_add(1, Ordering::Relaxed),
            key: key.into(),
            payload: Vec::new(),
            args: BlockArgs::new(),
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn with_args(mut self, args: BlockArgs) -> Self {
        self.args = args;
        self
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "Action[id={}, key={}, payload={}B]",
            self.id,
            self.key,
            self.payload.len()
        )
    }
}

/// Source endpoint of an action, `None` for actions injected by the host
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub block: BlockId,
    pub port: usize,
}

/// An action in flight, addressed to a destination port
#[derive(Debug, Clone)]
pub(crate) struct Envelope {
    pub(crate) source: Option<Endpoint>,
    pub(crate) port: usize,
    pub(crate) action: Action,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_unique() {
        let a = Action::new("stop");
        let b = Action::new("stop");
        assert_ne!(a.id, b.id);
        assert!(b.id > a.id);
    }

    #[test]
    fn test_builder() {
        let action = Action::new(ACTION_KEY_STREAM_CMD)
            .with_payload(vec![1, 2, 3])
            .with_args(BlockArgs::parse("mode=continuous"));
        assert_eq!(action.payload.len(), 3);
        assert_eq!(action.args.get("mode"), Some("continuous"));
        assert!(action.to_string().contains("key=stream_cmd"));
    }
}
