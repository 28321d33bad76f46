//! Query construction: filter parameters and the SQL text built from them.

mod builder;
mod filters;

pub use builder::{build_municipality_lookup, build_query, filter_clauses};
pub use filters::{
    parse_date, parse_municipalities, parse_row_limit, FilterError, FilterParams, StateFilter,
    DATE_FORMAT, DEFAULT_ROW_LIMIT,
};
