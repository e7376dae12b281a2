use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::Serialize;

use crate::domain::EntityType;
use crate::ValidationError;

/// Largest page the listing endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 250;

/// Attribute listings are ordered by unless told otherwise.
pub const DEFAULT_SORT_KEY: &str = "lastModifiedDate";

/// Comparison applied by a listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Ge,
    Le,
}

impl FilterOp {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ge => "ge",
            Self::Le => "le",
        }
    }
}

/// One caller-supplied criterion such as `postedDate >= 2020-01-01`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Filter {
    field: String,
    op: FilterOp,
    value: String,
}

impl Filter {
    pub fn new(
        field: impl Into<String>,
        op: FilterOp,
        value: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let field = field.into().trim().to_owned();
        let value = value.into().trim().to_owned();

        if field.is_empty() {
            return Err(ValidationError::EmptyFilterField);
        }
        if let Some(ch) = field
            .chars()
            .find(|ch| !(ch.is_ascii_alphanumeric() || *ch == '_' || *ch == '.'))
        {
            return Err(ValidationError::InvalidFilterField { field, ch });
        }
        if value.is_empty() {
            return Err(ValidationError::EmptyFilterValue { field });
        }

        Ok(Self { field, op, value })
    }

    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Result<Self, ValidationError> {
        Self::new(field, FilterOp::Eq, value)
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub const fn op(&self) -> FilterOp {
        self.op
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Query parameter name, e.g. `filter[postedDate][ge]`.
    pub fn param_name(&self) -> String {
        match self.op {
            FilterOp::Eq => format!("filter[{}]", self.field),
            op => format!("filter[{}][{}]", self.field, op.as_str()),
        }
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let op = match self.op {
            FilterOp::Eq => "=",
            FilterOp::Ge => ">=",
            FilterOp::Le => "<=",
        };
        write!(f, "{}{op}{}", self.field, self.value)
    }
}

impl FromStr for Filter {
    type Err = ValidationError;

    /// Parse `field=value`, `field>=value` or `field<=value`.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let syntax = || ValidationError::InvalidFilterSyntax {
            value: input.to_owned(),
        };
        if let Some((field, value)) = input.split_once(">=") {
            return Self::new(field, FilterOp::Ge, value);
        }
        if let Some((field, value)) = input.split_once("<=") {
            return Self::new(field, FilterOp::Le, value);
        }
        let (field, value) = input.split_once('=').ok_or_else(syntax)?;
        Self::new(field, FilterOp::Eq, value)
    }
}

/// Criteria for a header harvest: entity, filters, sort attribute and sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuerySpec {
    entity: EntityType,
    filters: Vec<Filter>,
    sort_key: String,
    page_size: u32,
    max_items: Option<u64>,
}

impl QuerySpec {
    pub fn builder(entity: EntityType) -> QuerySpecBuilder {
        QuerySpecBuilder {
            entity,
            filters: Vec::new(),
            sort_key: String::from(DEFAULT_SORT_KEY),
            page_size: MAX_PAGE_SIZE,
            max_items: None,
        }
    }

    /// Unfiltered query with default sort key and page size.
    pub fn all(entity: EntityType) -> Self {
        Self {
            entity,
            filters: Vec::new(),
            sort_key: String::from(DEFAULT_SORT_KEY),
            page_size: MAX_PAGE_SIZE,
            max_items: None,
        }
    }

    pub const fn entity(&self) -> EntityType {
        self.entity
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub const fn max_items(&self) -> Option<u64> {
        self.max_items
    }

    /// Canonical form of what the query selects: entity, sort key and the
    /// filters in sorted order. Paging and the item limit are left out.
    pub fn criteria(&self) -> String {
        let mut filters = self.filters.iter().map(Filter::to_string).collect::<Vec<_>>();
        filters.sort();
        filters.dedup();
        format!("{}|{}|{}", self.entity, self.sort_key, filters.join("&"))
    }
}

#[derive(Debug, Clone)]
pub struct QuerySpecBuilder {
    entity: EntityType,
    filters: Vec<Filter>,
    sort_key: String,
    page_size: u32,
    max_items: Option<u64>,
}

impl QuerySpecBuilder {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn filters(mut self, filters: impl IntoIterator<Item = Filter>) -> Self {
        self.filters.extend(filters);
        self
    }

    pub fn sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = sort_key.into();
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn max_items(mut self, max_items: Option<u64>) -> Self {
        self.max_items = max_items;
        self
    }

    pub fn build(self) -> Result<QuerySpec, ValidationError> {
        let sort_key = self.sort_key.trim().to_owned();
        if sort_key.is_empty() {
            return Err(ValidationError::EmptySortKey);
        }
        if self.page_size == 0 || self.page_size > MAX_PAGE_SIZE {
            return Err(ValidationError::PageSizeOutOfRange {
                value: self.page_size,
                max: MAX_PAGE_SIZE,
            });
        }
        if self.max_items == Some(0) {
            return Err(ValidationError::ZeroMaxItems);
        }
        if self
            .filters
            .iter()
            .any(|filter| filter.field() == sort_key && filter.op() == FilterOp::Ge)
        {
            return Err(ValidationError::ReservedSortFilter { field: sort_key });
        }

        Ok(QuerySpec {
            entity: self.entity,
            filters: self.filters,
            sort_key,
            page_size: self.page_size,
            max_items: self.max_items,
        })
    }
}
