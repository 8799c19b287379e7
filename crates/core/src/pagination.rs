use serde::{Deserialize, Serialize};

pub const DEFAULT_PAGE_LIMIT: u32 = 10;
pub const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "asc" => Some(Self::Asc),
            "desc" => Some(Self::Desc),
            _ => None,
        }
    }
}

/// Raw `?page=&limit=&sortBy=&sortOrder=` parameters as received.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

/// A sortable column exposed to clients, mapped onto its SQL column.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortColumn {
    pub key: &'static str,
    pub column: &'static str,
}

pub const CREATED_AT: SortColumn = SortColumn { key: "createdAt", column: "created_at" };

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
    pub sort_column: &'static str,
    pub sort_order: SortOrder,
}

impl PageRequest {
    /// Clamps paging values and maps `sortBy` onto an allow-listed column.
    /// Unknown sort keys fall back to the first entry of `allowed`.
    pub fn resolve(query: &PageQuery, allowed: &[SortColumn]) -> Self {
        let fallback = allowed.first().copied().unwrap_or(CREATED_AT);
        let sort_column = query
            .sort_by
            .as_deref()
            .and_then(|key| allowed.iter().find(|candidate| candidate.key.eq_ignore_ascii_case(key)))
            .copied()
            .unwrap_or(fallback);

        Self {
            page: query.page.unwrap_or(1).max(1),
            limit: query.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            sort_column: sort_column.column,
            sort_order: query.sort_order.as_deref().and_then(SortOrder::parse).unwrap_or_default(),
        }
    }

    pub fn offset(&self) -> u32 {
        (self.page - 1).saturating_mul(self.limit)
    }

    pub fn order_clause(&self) -> String {
        format!("ORDER BY {} {}", self.sort_column, self.sort_order.as_sql())
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::resolve(&PageQuery::default(), &[CREATED_AT])
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub total: u64,
    pub page: u32,
    pub limit: u32,
    pub total_pages: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub meta: PageMeta,
}

impl<T> Paginated<T> {
    pub fn new(data: Vec<T>, total: u64, request: &PageRequest) -> Self {
        let limit = u64::from(request.limit.max(1));
        let total_pages = u32::try_from(total.div_ceil(limit)).unwrap_or(u32::MAX);
        Self {
            data,
            meta: PageMeta { total, page: request.page, limit: request.limit, total_pages },
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated { data: self.data.into_iter().map(f).collect(), meta: self.meta }
    }
}
