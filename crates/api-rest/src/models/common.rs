//! Common request/response models

use abtest_types::ExperimentStatus;
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Query parameters for listing experiments
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ListExperimentsQuery {
    /// Only experiments in this state
    #[serde(default)]
    pub status: Option<ExperimentStatus>,
    /// Page number (starting from 1)
    #[serde(default = "default_page")]
    #[validate(range(min = 1))]
    pub page: u32,
    /// Page size
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1, max = 500))]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    20
}

impl Default for ListExperimentsQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: default_page(),
            page_size: default_page_size(),
        }
    }
}

impl ListExperimentsQuery {
    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.page_size as usize
    }

    pub fn limit(&self) -> usize {
        self.page_size as usize
    }
}

/// Paginated response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    /// Items in current page
    pub items: Vec<T>,
    /// Total number of items
    pub total: u64,
    /// Current page number
    pub page: u32,
    /// Page size
    pub page_size: u32,
    /// Total number of pages
    pub total_pages: u32,
}

impl<T> PaginatedResponse<T> {
    /// Slice one page out of the full list
    pub fn paginate(all: Vec<T>, query: &ListExperimentsQuery) -> Self {
        let total = all.len() as u64;
        let total_pages = ((total as f64) / (query.page_size as f64)).ceil() as u32;
        let items = all
            .into_iter()
            .skip(query.offset())
            .take(query.limit())
            .collect();

        Self {
            items,
            total,
            page: query.page,
            page_size: query.page_size,
            total_pages,
        }
    }
}

/// Query parameters for the results endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsQuery {
    /// Require a verdict backed by the minimum sample
    #[serde(default, rename = "final")]
    pub require_final: bool,
}

/// Health check body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub experiments: usize,
}
