use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Formatter};

/// Opaque server-issued token identifying one delivered task. Carried back on
/// every respond call; encodes the service-side cursor for the task.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskToken(pub Vec<u8>);

impl TaskToken {
    /// The service signals "no task available" with an empty token
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for TaskToken {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "TaskToken({} bytes)", self.0.len())
    }
}

impl From<Vec<u8>> for TaskToken {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}
