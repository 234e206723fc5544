//! Pagination and filter state for the report stage, and its translation into
//! query parameters.

use std::num::NonZeroU32;

pub const DEFAULT_PAGE_SIZE: NonZeroU32 = match NonZeroU32::new(10) {
    Some(size) => size,
    None => unreachable!(),
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub page_index: u32,
    pub page_size: NonZeroU32,
    pub id_filter: Option<String>,
    pub class_filter: Option<String>,
}

impl Default for QuerySpec {
    fn default() -> Self {
        Self {
            page_index: 0,
            page_size: DEFAULT_PAGE_SIZE,
            id_filter: None,
            class_filter: None,
        }
    }
}

/// Trim a filter; blank filters are absent.
fn normalize_filter(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl QuerySpec {
    pub fn new(
        page_index: u32,
        page_size: NonZeroU32,
        id_filter: Option<&str>,
        class_filter: Option<&str>,
    ) -> Self {
        Self {
            page_index,
            page_size,
            id_filter: normalize_filter(id_filter),
            class_filter: normalize_filter(class_filter),
        }
    }

    /// Replace both filters and go back to the first page.
    pub fn apply_filters(&mut self, id_filter: Option<&str>, class_filter: Option<&str>) {
        self.id_filter = normalize_filter(id_filter);
        self.class_filter = normalize_filter(class_filter);
        self.page_index = 0;
    }

    pub fn clear_filters(&mut self) {
        self.id_filter = None;
        self.class_filter = None;
        self.page_index = 0;
    }

    pub fn change_page(&mut self, page_index: u32, page_size: NonZeroU32) {
        self.page_index = page_index;
        self.page_size = page_size;
    }
}

/// Query parameters for the students endpoint, in request order.
///
/// `page` and `size` are always present; `studentId` and `class` only when the
/// corresponding filter is non-blank.
pub fn build(spec: &QuerySpec) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page", spec.page_index.to_string()),
        ("size", spec.page_size.to_string()),
    ];
    if let Some(id) = spec.id_filter.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        params.push(("studentId", id.to_string()));
    }
    if let Some(class) = spec
        .class_filter
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        params.push(("class", class.to_string()));
    }
    params
}
