//! Node trait shared by every graph participant
//!
//! Defines the capability set the graph and the action router rely on:
//! identity, port counts, properties and action delivery. [`Block`] is the
//! framework's implementation for hardware blocks.
//!
//! [`Block`]: super::block::Block

use tracing::warn;

use super::action::Action;
use super::errors::PropertyError;
use super::property::{PropertyEdge, Scope};
use super::resolver::PropertyStore;

pub trait Node: Send + Sync {
    /// ID unique within the session, e.g. `0/FFT#1`
    fn unique_id(&self) -> String;

    /// Number of active input ports
    fn num_input_ports(&self) -> usize;

    /// Number of active output ports
    fn num_output_ports(&self) -> usize;

    /// Properties and resolvers owned by this node
    fn properties(&self) -> &PropertyStore;

    /// Deliver an action that arrived on `port`.
    ///
    /// Unhandled actions are dropped with a warning.
    fn dispatch_action(&self, port: usize, action: Action) {
        warn!(
            "[{}] Dropping unhandled action '{}' (id {}) on input port {}",
            self.unique_id(),
            action.key,
            action.id,
            port
        );
    }

    /// Register a property, checking that an edge scope addresses an
    /// existing port.
    fn register_property(&self, prop: PropertyEdge) -> Result<(), PropertyError> {
        let in_range = match prop.scope() {
            Scope::InputEdge(port) => port < self.num_input_ports(),
            Scope::OutputEdge(port) => port < self.num_output_ports(),
            Scope::User | Scope::Block => true,
        };
        if !in_range {
            return Err(PropertyError::PortOutOfRange {
                node: self.unique_id(),
                name: prop.name().to_string(),
                scope: prop.scope(),
            });
        }
        self.properties().register(prop)
    }
}
