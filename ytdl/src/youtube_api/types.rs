//! Types shared by every Google API response.

use serde::{Deserialize, Serialize};

/// Paging details for lists of resources.
///
/// See: <https://developers.google.com/youtube/v3/docs/videos/list#pageInfo>
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInfo {
    /// The total number of results in the result set.
    #[serde(rename = "totalResults", default)]
    pub total_results: u32,
    /// The number of results included in the API response.
    #[serde(rename = "resultsPerPage", default)]
    pub results_per_page: u32,
}

/// Body Google sends alongside a non-2xx status.
///
/// The YouTube Data API puts machine-readable reasons in `error.errors[]`, the People API in
/// `error.details[]`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub errors: Vec<ApiErrorItem>,
    #[serde(default)]
    pub details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorItem {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(rename = "@type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl ApiError {
    /// Every reason code in the body, from both the v3 and the newer error formats.
    pub fn reasons(&self) -> Vec<String> {
        self.errors
            .iter()
            .filter(|e| !e.reason.is_empty())
            .map(|e| e.reason.clone())
            .chain(self.details.iter().filter_map(|d| d.reason.clone()))
            .collect()
    }
}
