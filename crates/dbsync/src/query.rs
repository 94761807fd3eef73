//! Builders for the operations [`crate::DbSync`] exposes.
//!
//! Each builder is a plain struct with chained methods returning
//! `self`; the engine consumes the built value directly.

use serde_json::Value;

/// Single-row synchronization request (one or more rows for one table).
#[derive(Debug, Clone, Default)]
pub struct SyncRowQuery {
    table: String,
    data: Vec<Value>,
    ignored: Vec<String>,
    return_old_data: bool,
}

impl SyncRowQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Appends one row to be synchronized.
    pub fn data(mut self, row: Value) -> Self {
        self.data.push(row);
        self
    }

    /// Excludes `column` from the change comparison.
    pub fn ignore_column(mut self, column: impl Into<String>) -> Self {
        self.ignored.push(column.into());
        self
    }

    /// Emit the pre-existing row under `"old"` inside MODIFIED payloads.
    pub fn return_old_data(mut self) -> Self {
        self.return_old_data = true;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> &[Value] {
        &self.data
    }

    pub fn ignored(&self) -> &[String] {
        &self.ignored
    }

    pub fn wants_old_data(&self) -> bool {
        self.return_old_data
    }
}

/// Bulk insert request.
#[derive(Debug, Clone, Default)]
pub struct InsertQuery {
    table: String,
    data: Vec<Value>,
}

impl InsertQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            data: Vec::new(),
        }
    }

    /// Appends a row; an array value appends every element.
    pub fn data(mut self, rows: Value) -> Self {
        match rows {
            Value::Array(items) => self.data.extend(items),
            row => self.data.push(row),
        }
        self
    }

    pub fn reset(mut self) -> Self {
        self.data.clear();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> &[Value] {
        &self.data
    }
}

/// Deletion request: by PK rows, by predicate, or both.
#[derive(Debug, Clone, Default)]
pub struct DeleteQuery {
    table: String,
    data: Vec<Value>,
    where_filter: String,
}

impl DeleteQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Appends a row whose primary key identifies a row to delete.
    pub fn data(mut self, row: Value) -> Self {
        self.data.push(row);
        self
    }

    /// Raw predicate (without the `WHERE` keyword) selecting rows to
    /// delete. Applied when no PK rows were given.
    pub fn row_filter(mut self, filter: impl Into<String>) -> Self {
        self.where_filter = filter.into();
        self
    }

    pub fn reset(mut self) -> Self {
        self.data.clear();
        self.where_filter.clear();
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn rows(&self) -> &[Value] {
        &self.data
    }

    pub fn filter(&self) -> &str {
        &self.where_filter
    }
}

/// Select descriptor: `{column_list, row_filter, distinct, order_by,
/// count}` assembled into a SELECT statement by the engine.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    table: String,
    column_list: Vec<String>,
    row_filter: String,
    distinct: bool,
    order_by: String,
    count: Option<u32>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    pub fn column_list<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.column_list = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Predicate without the `WHERE` keyword (a leading `WHERE` is
    /// tolerated for compatibility with older callers).
    pub fn row_filter(mut self, filter: impl Into<String>) -> Self {
        self.row_filter = filter.into();
        self
    }

    pub fn distinct_opt(mut self, distinct: bool) -> Self {
        self.distinct = distinct;
        self
    }

    pub fn order_by_opt(mut self, order_by: impl Into<String>) -> Self {
        self.order_by = order_by.into();
        self
    }

    pub fn count_opt(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[String] {
        &self.column_list
    }

    pub fn filter(&self) -> &str {
        &self.row_filter
    }

    pub fn is_distinct(&self) -> bool {
        self.distinct
    }

    pub fn order_by(&self) -> &str {
        &self.order_by
    }

    pub fn limit(&self) -> Option<u32> {
        self.count
    }
}

/// Cascade specification: deleting or re-keying a row in `base_table`
/// propagates to each child through the listed column pairs.
#[derive(Debug, Clone, Default)]
pub struct TableRelationship {
    base_table: String,
    children: Vec<RelatedTable>,
}

#[derive(Debug, Clone)]
pub struct RelatedTable {
    pub table: String,
    /// Pairs of (parent column, child column) that must match.
    pub field_match: Vec<(String, String)>,
}

impl TableRelationship {
    pub fn new(base_table: impl Into<String>) -> Self {
        Self {
            base_table: base_table.into(),
            children: Vec::new(),
        }
    }

    pub fn relate(
        mut self,
        table: impl Into<String>,
        field_match: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        self.children.push(RelatedTable {
            table: table.into(),
            field_match: field_match.into_iter().collect(),
        });
        self
    }

    pub fn base_table(&self) -> &str {
        &self.base_table
    }

    pub fn children(&self) -> &[RelatedTable] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sync_row_query_accumulates() {
        let q = SyncRowQuery::new("packages")
            .data(json!({"name": "a"}))
            .data(json!({"name": "b"}))
            .ignore_column("location")
            .return_old_data();
        assert_eq!(q.table(), "packages");
        assert_eq!(q.rows().len(), 2);
        assert_eq!(q.ignored(), ["location".to_owned()]);
        assert!(q.wants_old_data());
    }

    #[test]
    fn insert_query_flattens_arrays() {
        let q = InsertQuery::new("t").data(json!([{"a": 1}, {"a": 2}])).data(json!({"a": 3}));
        assert_eq!(q.rows().len(), 3);
        assert_eq!(q.reset().rows().len(), 0);
    }

    #[test]
    fn delete_query_reset_clears_both_forms() {
        let q = DeleteQuery::new("t").data(json!({"a": 1})).row_filter("a > 0");
        assert_eq!(q.rows().len(), 1);
        assert_eq!(q.filter(), "a > 0");
        let q = q.reset();
        assert!(q.rows().is_empty());
        assert!(q.filter().is_empty());
    }

    #[test]
    fn select_query_carries_all_options() {
        let q = SelectQuery::new("ports")
            .column_list(["inode", "local_port"])
            .row_filter("local_port > 1024")
            .distinct_opt(true)
            .order_by_opt("inode")
            .count_opt(10);
        assert_eq!(q.columns(), ["inode".to_owned(), "local_port".to_owned()]);
        assert!(q.is_distinct());
        assert_eq!(q.limit(), Some(10));
    }
}
