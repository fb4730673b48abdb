use crate::error::ModelError;

/// Bulk constructor from a query-row iterator, the same role
/// `extractResult(queryResult)` plays for every entity list.
///
/// `R` is left generic rather than tied to a concrete SQL row type so that
/// this crate has no dependency on the query engine; `pimd-query`
/// implements `FromRow<sqlx::sqlite::SqliteRow>` for each entity.
pub trait FromRow<R>: Sized {
    fn from_row(row: &R) -> Result<Self, ModelError>;
}

pub fn extract_result<T, R>(rows: impl IntoIterator<Item = R>) -> Result<Vec<T>, ModelError>
where
    T: FromRow<R>,
{
    rows.into_iter().map(|row| T::from_row(&row)).collect()
}
