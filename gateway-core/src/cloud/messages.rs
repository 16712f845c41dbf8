//! Wire shapes for the cloud backend's tenant API. Snake_case on the wire
//! (matching the backend's JSON), camelCase in the names we use internally —
//! `serde(rename_all)` does the translation at the boundary so nothing
//! downstream has to think about it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tenant::TenantStatus;

/// `POST /auth/verify-token?token=...` success body: `{ data: { ... } }`.
#[derive(Debug, Deserialize)]
pub struct VerifyTokenResponse {
    pub data: VerifyTokenData,
}

#[derive(Debug, Deserialize)]
pub struct VerifyTokenData {
    pub user_id: String,
    pub status: TenantStatus,
    pub openclaw_config: Value,
}

/// One tenant record as pulled from `GET /gateway/configs`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CloudTenantRecord {
    pub user_id: String,
    pub gateway_token: String,
    pub openclaw_config: Value,
    pub status: TenantStatus,
    #[serde(default)]
    pub llm_api_key: Option<String>,
    pub updated_at: String,
}

/// `GET /gateway/configs?since=...` response envelope. Unlike
/// [`CloudTenantRecord`], this envelope is camelCase on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigsResponse {
    pub users: Vec<CloudTenantRecord>,
    pub sync_timestamp: String,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}
