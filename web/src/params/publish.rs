use hub::{InvalidationInstruction, MessageScope};
use serde::{Deserialize, Serialize};

/// Body of an internal publish request
///
/// # Fields
///
/// * `scope` - Who receives the invalidation: one user, one organization or everyone
/// * `invalidation` - The cache invalidation instruction forwarded to each client
#[derive(Debug, Deserialize)]
pub(crate) struct PublishParams {
    pub(crate) scope: MessageScope,
    pub(crate) invalidation: InvalidationInstruction,
}

#[derive(Debug, Serialize)]
pub(crate) struct PublishResponse {
    pub(crate) delivered: usize,
}
