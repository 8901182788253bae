//! Multi-row `INSERT` statement text for product batches.
//!
//! A batch of `n` rows becomes one statement with `n` groups of seven placeholders,
//! numbered row-major: row `i` binds `$7i+1 ..= $7i+7` in column order.

use crate::config::{MAX_BIND_PARAMS, PRODUCT_COLUMNS};
use std::borrow::Cow;
use std::fmt::Write;

pub const PRODUCT_COLUMN_LIST: &str = "id, price, title, category, brand, url, description";

/// Build the statement for exactly `rows` rows (`rows` ≥ 1).
pub fn build_insert(rows: usize) -> String {
    // "($nnnnn," per placeholder is at most 7 bytes.
    let mut sql = String::with_capacity(96 + rows * PRODUCT_COLUMNS * 8);
    sql.push_str("INSERT INTO products (");
    sql.push_str(PRODUCT_COLUMN_LIST);
    sql.push_str(") VALUES ");

    for row in 0..rows {
        if row > 0 {
            sql.push(',');
        }
        sql.push('(');
        for col in 0..PRODUCT_COLUMNS {
            if col > 0 {
                sql.push(',');
            }
            // Writing into a String cannot fail.
            let _ = write!(sql, "${}", row * PRODUCT_COLUMNS + col + 1);
        }
        sql.push(')');
    }

    sql.push_str(" ON CONFLICT (id) DO NOTHING");
    sql
}

/// Statement text for one run: the full-batch shape is built once and shared by every
/// full batch, any other size (the residual) is built on demand.
#[derive(Debug, Clone)]
pub struct InsertStatements {
    full_rows: usize,
    full_sql: String,
}

impl InsertStatements {
    pub fn new(full_rows: usize) -> Self {
        Self {
            full_rows,
            full_sql: build_insert(full_rows.max(1)),
        }
    }

    pub fn full_rows(&self) -> usize {
        self.full_rows
    }

    /// Statement for `rows` rows, or `None` if it cannot be expressed in one statement.
    pub fn for_rows(&self, rows: usize) -> Option<Cow<'_, str>> {
        if rows == 0 || rows * PRODUCT_COLUMNS > MAX_BIND_PARAMS {
            return None;
        }
        if rows == self.full_rows {
            Some(Cow::Borrowed(self.full_sql.as_str()))
        } else {
            Some(Cow::Owned(build_insert(rows)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_row_statement() {
        assert_eq!(
            build_insert(1),
            "INSERT INTO products (id, price, title, category, brand, url, description) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) ON CONFLICT (id) DO NOTHING"
        );
    }

    #[test]
    fn placeholders_are_row_major() {
        let sql = build_insert(3);
        assert!(sql.contains("($1,$2,$3,$4,$5,$6,$7),($8,$9,$10,$11,$12,$13,$14),($15,"));
        assert!(sql.ends_with("$21) ON CONFLICT (id) DO NOTHING"));
        assert_eq!(sql.matches('$').count(), 21);
        assert!(!sql.contains("$22"));
    }

    #[test]
    fn full_shape_is_shared() {
        let statements = InsertStatements::new(4000);
        let a = statements.for_rows(4000).unwrap();
        let b = statements.for_rows(4000).unwrap();

        assert!(matches!(a, Cow::Borrowed(_)));
        assert_eq!(a.as_ptr(), b.as_ptr());
        assert_eq!(a.matches('$').count(), 28_000);
        assert!(a.contains("$28000)"));
    }

    #[test]
    fn residual_shape_is_built_separately() {
        let statements = InsertStatements::new(4000);
        let residual = statements.for_rows(3).unwrap();

        assert!(matches!(residual, Cow::Owned(_)));
        assert_eq!(residual, build_insert(3));
    }

    #[test]
    fn rejects_empty_and_oversized_batches() {
        let statements = InsertStatements::new(10);
        assert!(statements.for_rows(0).is_none());
        assert!(statements.for_rows(MAX_BIND_PARAMS / PRODUCT_COLUMNS).is_some());
        assert!(statements.for_rows(MAX_BIND_PARAMS / PRODUCT_COLUMNS + 1).is_none());
    }
}
