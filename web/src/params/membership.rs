use events::Id;
use serde::{Deserialize, Serialize};

/// Body of an internal membership update: the complete set of organizations
/// `subject_id` belongs to after the change.
#[derive(Debug, Deserialize)]
pub(crate) struct MembershipParams {
    pub(crate) subject_id: Id,
    #[serde(default)]
    pub(crate) group_ids: Vec<Id>,
}

#[derive(Debug, Serialize)]
pub(crate) struct MembershipResponse {
    pub(crate) clients: usize,
}
