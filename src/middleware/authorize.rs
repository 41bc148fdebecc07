//! Group-scoped authorization.
//!
//! Group-scoped routes carry a `groupid` header. The gate loads that group,
//! checks the caller holds one of the allowed roles in it and hands the
//! handler a [`GroupScope`] with the loaded document, so handlers never
//! re-fetch the group.

use axum::http::HeaderMap;

use crate::error::ApiError;
use crate::models::group::{self, Group};
use crate::store::DocStore;
use crate::types::Role;

/// The caller's standing inside the group named by the request.
#[derive(Debug)]
pub struct GroupScope {
    pub group: Group,
    pub role: Role,
    pub uid: String,
}

/// Resolve the `groupid` header into a [`GroupScope`], refusing callers
/// who hold none of the allowed roles.
pub async fn require_role(
    store: &dyn DocStore,
    headers: &HeaderMap,
    uid: &str,
    allowed: &[Role],
) -> Result<GroupScope, ApiError> {
    let group_id = headers
        .get("groupid")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::forbidden("Group ID header required"))?;

    let group = group::get(store, group_id).await?;
    let role = allowed
        .iter()
        .copied()
        .find(|role| group.roles.list(*role).iter().any(|u| u == uid))
        .ok_or_else(|| ApiError::forbidden("Insufficient role in group"))?;

    Ok(GroupScope { group, role, uid: uid.to_string() })
}
