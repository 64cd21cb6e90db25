//! Exchange, binding and queue names for a logical stream.

/// Where messages of one stream are published and consumed.
///
/// For a stream `s` the direct exchange is `s_ex`, the binding key `s_key`,
/// and the queue defaults to `s`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub binding_key: String,
    pub queue: String,
}

impl Topology {
    pub fn for_stream(stream: &str) -> Self {
        Self {
            exchange: format!("{stream}_ex"),
            binding_key: format!("{stream}_key"),
            queue: stream.to_string(),
        }
    }

    /// Builder: consume from a differently named queue.
    #[must_use]
    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }
}
