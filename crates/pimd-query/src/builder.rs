use crate::value::{CompareOp, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    fn as_sql(self) -> &'static str {
        match self {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left => "LEFT JOIN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    fn as_sql(self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

/// `column <op> value` (or `IS NULL`/`IN (...)` depending on the operand).
#[derive(Debug, Clone)]
pub struct ValueCondition {
    pub column: String,
    pub op: CompareOp,
    pub value: Value,
}

/// `lhs <op> rhs`, two columns compared to each other (implicit joins).
#[derive(Debug, Clone)]
pub struct ColumnCondition {
    pub lhs: String,
    pub op: CompareOp,
    pub rhs: String,
}

#[derive(Debug, Clone)]
enum Condition {
    Value(ValueCondition),
    Column(ColumnCondition),
    Group {
        conjunction: Conjunction,
        conditions: Vec<Condition>,
    },
}

struct Join {
    kind: JoinKind,
    table: String,
    lhs: String,
    rhs: String,
}

/// Renders a condition tree and appends its bound values in left-to-right
/// order, matching positional `?` placeholders.
fn render_condition(condition: &Condition, sql: &mut String, values: &mut Vec<Value>) {
    match condition {
        Condition::Value(vc) => render_value_condition(vc, sql, values),
        Condition::Column(cc) => {
            sql.push_str(&format!("{} {} {}", cc.lhs, cc.op.as_sql(), cc.rhs));
        }
        Condition::Group {
            conjunction,
            conditions,
        } => {
            sql.push('(');
            for (i, inner) in conditions.iter().enumerate() {
                if i > 0 {
                    sql.push_str(&format!(" {} ", conjunction.as_sql()));
                }
                render_condition(inner, sql, values);
            }
            sql.push(')');
        }
    }
}

fn render_value_condition(vc: &ValueCondition, sql: &mut String, values: &mut Vec<Value>) {
    match (&vc.value, vc.op) {
        (Value::Null, CompareOp::Equals | CompareOp::Is) => {
            sql.push_str(&format!("{} IS NULL", vc.column));
        }
        (Value::Null, CompareOp::NotEquals | CompareOp::IsNot) => {
            sql.push_str(&format!("{} IS NOT NULL", vc.column));
        }
        (Value::List(items), CompareOp::In | CompareOp::NotIn) => {
            let placeholders = vec!["?"; items.len()].join(", ");
            sql.push_str(&format!("{} {} ({})", vc.column, vc.op.as_sql(), placeholders));
            values.extend(items.iter().cloned());
        }
        _ => {
            sql.push_str(&format!("{} {} ?", vc.column, vc.op.as_sql()));
            values.push(vc.value.clone());
        }
    }
}

/// Shared clause state every builder composes from.
#[derive(Default)]
struct ClauseState {
    tables: Vec<String>,
    joins: Vec<Join>,
    conditions: Vec<Condition>,
    sorts: Vec<(String, bool)>,
}

impl ClauseState {
    fn add_table(&mut self, name: impl Into<String>) {
        self.tables.push(name.into());
    }

    fn add_join(&mut self, kind: JoinKind, table: impl Into<String>, lhs: impl Into<String>, rhs: impl Into<String>) {
        self.joins.push(Join {
            kind,
            table: table.into(),
            lhs: lhs.into(),
            rhs: rhs.into(),
        });
    }

    fn add_value_condition(&mut self, column: impl Into<String>, op: CompareOp, value: Value) {
        self.conditions.push(Condition::Value(ValueCondition {
            column: column.into(),
            op,
            value,
        }));
    }

    fn add_column_condition(&mut self, lhs: impl Into<String>, op: CompareOp, rhs: impl Into<String>) {
        self.conditions.push(Condition::Column(ColumnCondition {
            lhs: lhs.into(),
            op,
            rhs: rhs.into(),
        }));
    }

    fn render_from(&self, sql: &mut String) {
        sql.push_str(" FROM ");
        sql.push_str(&self.tables.join(", "));
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(join.kind.as_sql());
            sql.push(' ');
            sql.push_str(&join.table);
            sql.push_str(" ON ");
            sql.push_str(&join.lhs);
            sql.push_str(" = ");
            sql.push_str(&join.rhs);
        }
    }

    fn render_where(&self, sql: &mut String, values: &mut Vec<Value>) {
        if self.conditions.is_empty() {
            return;
        }
        sql.push_str(" WHERE ");
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                sql.push_str(" AND ");
            }
            render_condition(condition, sql, values);
        }
    }

    fn render_order_by(&self, sql: &mut String) {
        if self.sorts.is_empty() {
            return;
        }
        sql.push_str(" ORDER BY ");
        let rendered: Vec<String> = self
            .sorts
            .iter()
            .map(|(col, asc)| format!("{} {}", col, if *asc { "ASC" } else { "DESC" }))
            .collect();
        sql.push_str(&rendered.join(", "));
    }
}

pub struct SelectBuilder {
    state: ClauseState,
    columns: Vec<String>,
    group_by: Vec<String>,
    limit: Option<u64>,
}

impl SelectBuilder {
    pub fn new() -> Self {
        Self {
            state: ClauseState::default(),
            columns: Vec::new(),
            group_by: Vec::new(),
            limit: None,
        }
    }

    pub fn add_table(mut self, name: impl Into<String>) -> Self {
        self.state.add_table(name);
        self
    }

    pub fn add_join(mut self, kind: JoinKind, table: impl Into<String>, lhs: impl Into<String>, rhs: impl Into<String>) -> Self {
        self.state.add_join(kind, table, lhs, rhs);
        self
    }

    pub fn add_column(mut self, name: impl Into<String>) -> Self {
        self.columns.push(name.into());
        self
    }

    pub fn add_columns(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn add_value_condition(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.state.add_value_condition(column, op, value.into());
        self
    }

    pub fn add_column_condition(mut self, lhs: impl Into<String>, op: CompareOp, rhs: impl Into<String>) -> Self {
        self.state.add_column_condition(lhs, op, rhs);
        self
    }

    pub fn add_group_column(mut self, name: impl Into<String>) -> Self {
        self.group_by.push(name.into());
        self
    }

    pub fn add_sort_column(mut self, name: impl Into<String>, ascending: bool) -> Self {
        self.state.sorts.push((name.into(), ascending));
        self
    }

    pub fn set_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = String::from("SELECT ");
        if self.columns.is_empty() {
            sql.push('*');
        } else {
            sql.push_str(&self.columns.join(", "));
        }
        self.state.render_from(&mut sql);
        let mut values = Vec::new();
        self.state.render_where(&mut sql, &mut values);
        if !self.group_by.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&self.group_by.join(", "));
        }
        self.state.render_order_by(&mut sql);
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, values)
    }
}

impl Default for SelectBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `Select count(*)`; the driver maps any SQL error to `-1` per §4.3
/// rather than propagating, matching how callers use it as a cheap probe.
pub struct CountQueryBuilder {
    inner: SelectBuilder,
}

impl CountQueryBuilder {
    pub fn new() -> Self {
        Self {
            inner: SelectBuilder::new().add_column("COUNT(*)"),
        }
    }

    pub fn add_table(mut self, name: impl Into<String>) -> Self {
        self.inner = self.inner.add_table(name);
        self
    }

    pub fn add_value_condition(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.inner = self.inner.add_value_condition(column, op, value);
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        self.inner.build()
    }
}

impl Default for CountQueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InsertBuilder {
    table: String,
    columns: Vec<String>,
    /// Each inner `Vec` is one row; multi-row inserts bind row-wise.
    rows: Vec<Vec<Value>>,
}

impl InsertBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            rows: vec![Vec::new()],
        }
    }

    /// Sets a column's value for every row currently buffered. Pass a
    /// [`Value::List`] to bind one row per list element (multi-row insert).
    ///
    /// When rows are already buffered (from an earlier multi-value column),
    /// a multi-value list expands the *cartesian product* of the existing
    /// rows with the new list, rather than replacing the buffered rows —
    /// two successive multi-value columns of length m and n yield m*n rows.
    pub fn set_column_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        let column = column.into();
        let value = value.into();
        match value {
            Value::List(items) if items.len() > 1 => {
                self.rows = self
                    .rows
                    .iter()
                    .flat_map(|row| {
                        items.iter().map(move |item| {
                            let mut row = row.clone();
                            row.push(item.clone());
                            row
                        })
                    })
                    .collect();
            }
            Value::List(mut items) => {
                let scalar = items.pop().unwrap_or(Value::Null);
                for row in &mut self.rows {
                    row.push(scalar.clone());
                }
            }
            scalar => {
                for row in &mut self.rows {
                    row.push(scalar.clone());
                }
            }
        }
        self.columns.push(column);
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let placeholders = format!("({})", vec!["?"; self.columns.len()].join(", "));
        let all_placeholders = vec![placeholders; self.rows.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.table,
            self.columns.join(", "),
            all_placeholders
        );
        let values = self.rows.iter().flatten().cloned().collect();
        (sql, values)
    }
}

pub struct UpdateBuilder {
    table: String,
    assignments: Vec<(String, Value)>,
    state: ClauseState,
}

impl UpdateBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            assignments: Vec::new(),
            state: ClauseState::default(),
        }
    }

    pub fn set_column_value(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.assignments.push((column.into(), value.into()));
        self
    }

    pub fn add_value_condition(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.state.add_value_condition(column, op, value.into());
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let assignment_sql = self
            .assignments
            .iter()
            .map(|(col, _)| format!("{col} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut sql = format!("UPDATE {} SET {}", self.table, assignment_sql);
        let mut values: Vec<Value> = self.assignments.iter().map(|(_, v)| v.clone()).collect();
        self.state.render_where(&mut sql, &mut values);
        (sql, values)
    }
}

pub struct DeleteBuilder {
    table: String,
    state: ClauseState,
}

impl DeleteBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            state: ClauseState::default(),
        }
    }

    pub fn add_value_condition(mut self, column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        self.state.add_value_condition(column, op, value.into());
        self
    }

    pub fn build(&self) -> (String, Vec<Value>) {
        let mut sql = format!("DELETE FROM {}", self.table);
        let mut values = Vec::new();
        self.state.render_where(&mut sql, &mut values);
        (sql, values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_with_join_and_condition() {
        let (sql, values) = SelectBuilder::new()
            .add_table("items")
            .add_join(JoinKind::Inner, "collections", "items.collection_id", "collections.id")
            .add_column("items.id")
            .add_value_condition("collections.id", CompareOp::Equals, 7i64)
            .build();
        assert_eq!(
            sql,
            "SELECT items.id FROM items INNER JOIN collections ON items.collection_id = collections.id WHERE collections.id = ?"
        );
        assert_eq!(values, vec![Value::Int(7)]);
    }

    #[test]
    fn null_equals_renders_is_null() {
        let (sql, values) = SelectBuilder::new()
            .add_table("items")
            .add_value_condition("remote_id", CompareOp::Equals, Value::Null)
            .build();
        assert_eq!(sql, "SELECT * FROM items WHERE remote_id IS NULL");
        assert!(values.is_empty());
    }

    #[test]
    fn in_list_condition_expands_placeholders() {
        let (sql, values) = SelectBuilder::new()
            .add_table("items")
            .add_value_condition("id", CompareOp::In, Value::List(vec![Value::Int(1), Value::Int(2)]))
            .build();
        assert_eq!(sql, "SELECT * FROM items WHERE id IN (?, ?)");
        assert_eq!(values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn multi_row_insert_binds_row_wise() {
        let (sql, values) = InsertBuilder::new("item_flags")
            .set_column_value("item_id", 1i64)
            .set_column_value("flag_id", Value::List(vec![Value::Int(10), Value::Int(11)]))
            .build();
        assert_eq!(sql, "INSERT INTO item_flags (item_id, flag_id) VALUES (?, ?), (?, ?)");
        assert_eq!(
            values,
            vec![Value::Int(1), Value::Int(10), Value::Int(1), Value::Int(11)]
        );
    }

    #[test]
    fn two_multi_value_columns_expand_to_the_cartesian_product() {
        let (sql, values) = InsertBuilder::new("item_flags")
            .set_column_value("item_id", Value::List(vec![Value::Int(1), Value::Int(2), Value::Int(3)]))
            .set_column_value("flag_id", Value::List(vec![Value::Int(10), Value::Int(11)]))
            .build();
        assert_eq!(
            sql,
            "INSERT INTO item_flags (item_id, flag_id) VALUES (?, ?), (?, ?), (?, ?), (?, ?), (?, ?), (?, ?)"
        );
        assert_eq!(
            values,
            vec![
                Value::Int(1),
                Value::Int(10),
                Value::Int(1),
                Value::Int(11),
                Value::Int(2),
                Value::Int(10),
                Value::Int(2),
                Value::Int(11),
                Value::Int(3),
                Value::Int(10),
                Value::Int(3),
                Value::Int(11),
            ]
        );
    }

    #[test]
    fn count_builder_wraps_select() {
        let (sql, _) = CountQueryBuilder::new().add_table("items").build();
        assert_eq!(sql, "SELECT COUNT(*) FROM items");
    }

    #[test]
    fn update_builder_renders_assignments_and_where() {
        let (sql, values) = UpdateBuilder::new("items")
            .set_column_value("dirty", 0i64)
            .add_value_condition("id", CompareOp::Equals, 5i64)
            .build();
        assert_eq!(sql, "UPDATE items SET dirty = ? WHERE id = ?");
        assert_eq!(values, vec![Value::Int(0), Value::Int(5)]);
    }
}
