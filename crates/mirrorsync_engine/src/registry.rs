//! The subscriber's table of entity handlers.

use crate::dependency::DependencyRequirement;
use crate::schema::MirrorSchema;
use mirrorsync_protocol::SyncMessage;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Consumer-side filter deciding whether a message is relevant.
pub type HandleWhen = Arc<dyn Fn(&SyncMessage) -> bool + Send + Sync>;

/// How one entity kind is mirrored locally.
#[derive(Clone)]
pub struct MirrorHandler {
    schema: MirrorSchema,
    requirements: Vec<DependencyRequirement>,
    handle_when: Option<HandleWhen>,
}

impl MirrorHandler {
    /// Creates a handler that accepts every message of the schema's kind.
    pub fn new(schema: MirrorSchema) -> Self {
        Self {
            schema,
            requirements: Vec::new(),
            handle_when: None,
        }
    }

    /// Adds a dependency that must exist before messages are applied.
    pub fn requires(mut self, requirement: DependencyRequirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Sets the message filter.
    pub fn handle_when(
        mut self,
        predicate: impl Fn(&SyncMessage) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.handle_when = Some(Arc::new(predicate));
        self
    }

    /// Entity kind handled.
    pub fn kind(&self) -> &str {
        self.schema.kind()
    }

    /// Mirror schema.
    pub fn schema(&self) -> &MirrorSchema {
        &self.schema
    }

    /// Declared dependencies.
    pub fn requirements(&self) -> &[DependencyRequirement] {
        &self.requirements
    }

    /// Returns true if the message passes the filter.
    pub fn accepts(&self, message: &SyncMessage) -> bool {
        self.handle_when
            .as_ref()
            .map_or(true, |predicate| predicate(message))
    }
}

impl fmt::Debug for MirrorHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MirrorHandler")
            .field("schema", &self.schema)
            .field("requirements", &self.requirements)
            .field("handle_when", &self.handle_when.is_some())
            .finish()
    }
}

/// Maps entity kinds to their handlers.
///
/// Built by the integrating service and handed to the consumer; there is no
/// process-wide registration.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, MirrorHandler>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handler, builder style. A later handler for the same kind
    /// replaces the earlier one.
    pub fn with(mut self, handler: MirrorHandler) -> Self {
        self.register(handler);
        self
    }

    /// Adds a handler, returning the one it replaced.
    pub fn register(&mut self, handler: MirrorHandler) -> Option<MirrorHandler> {
        self.handlers.insert(handler.kind().to_string(), handler)
    }

    /// Looks up the handler for a kind.
    pub fn get(&self, kind: &str) -> Option<&MirrorHandler> {
        self.handlers.get(kind)
    }

    /// Registered kinds in order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns true if no handler is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
