//! Query Module - Statement descriptions consumed by repositories

pub mod builder;
pub mod evaluation;
pub mod types;
pub mod where_clause;

pub use builder::Query;
pub use types::{Condition, OrderDirection, QueryOperator, QueryType, WhereCondition};
