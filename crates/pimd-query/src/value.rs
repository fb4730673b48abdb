use sqlx::sqlite::SqliteArguments;
use sqlx::Arguments;

/// Comparison operators available to `addValueCondition`/`addColumnCondition` (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    Less,
    LessOrEqual,
    Greater,
    GreaterOrEqual,
    Is,
    IsNot,
    In,
    NotIn,
    Like,
}

impl CompareOp {
    pub(crate) fn as_sql(self) -> &'static str {
        match self {
            CompareOp::Equals => "=",
            CompareOp::NotEquals => "!=",
            CompareOp::Less => "<",
            CompareOp::LessOrEqual => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterOrEqual => ">=",
            CompareOp::Is => "IS",
            CompareOp::IsNot => "IS NOT",
            CompareOp::In => "IN",
            CompareOp::NotIn => "NOT IN",
            CompareOp::Like => "LIKE",
        }
    }
}

/// A bindable scalar or list value. Lists bind either as an `IN (...)`
/// list or, for inserts, row-wise for a multi-row `INSERT` (§4.3).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Blob(Vec<u8>),
    List(Vec<Value>),
}

impl Value {
    pub(crate) fn bind_into(&self, args: &mut SqliteArguments<'_>) -> Result<(), sqlx::Error> {
        match self {
            Value::Null => args.add(Option::<i64>::None).map_err(sqlx::Error::Encode),
            Value::Int(v) => args.add(*v).map_err(sqlx::Error::Encode),
            Value::Text(v) => args.add(v.clone()).map_err(sqlx::Error::Encode),
            Value::Blob(v) => args.add(v.clone()).map_err(sqlx::Error::Encode),
            Value::List(_) => {
                unreachable!("lists are expanded into placeholders before binding")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}
