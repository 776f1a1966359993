//! Options for `find_many`

use sea_query::{Condition, Order};

/// Filter, ordering and pagination for a multi-row select
///
/// Column names in `order_by` are snake_case column names.
#[derive(Debug, Clone, Default)]
pub struct FindManyOptions {
    pub filter: Option<Condition>,
    pub order_by: Vec<(String, Order)>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl FindManyOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, condition: impl Into<Condition>) -> Self {
        self.filter = Some(condition.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: Order) -> Self {
        self.order_by.push((column.into(), order));
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Pagination only makes sense over a stable order
    pub fn is_paginated(&self) -> bool {
        self.offset.is_some() || self.limit.is_some()
    }
}
