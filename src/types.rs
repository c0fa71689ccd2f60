use serde::{Deserialize, Serialize};

/// Body of `GET /me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeResponse {
    pub anonymous: bool,
    pub user_id: Option<String>,
}

impl MeResponse {
    pub fn for_user(user_id: Option<&str>) -> Self {
        Self { anonymous: user_id.is_none(), user_id: user_id.map(str::to_string) }
    }
}
