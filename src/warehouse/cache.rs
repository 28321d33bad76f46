//! Read-through cache for the municipality lookup query.
//!
//! The lookup result only depends on the state and on who is asking, so it is
//! keyed by `(state, identity)` and kept for the life of the process.

use std::collections::HashMap;

use crate::query::{build_municipality_lookup, StateFilter};

use super::client::{Warehouse, WarehouseError};
use super::models::CellValue;

#[derive(Debug, Default)]
pub struct LookupCache {
    municipalities: HashMap<(StateFilter, String), Vec<String>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Municipality names for `state`, querying the warehouse only on a miss
    pub fn municipalities(
        &mut self,
        warehouse: &dyn Warehouse,
        state: &StateFilter,
    ) -> Result<&[String], WarehouseError> {
        let key = (state.clone(), warehouse.identity().to_string());

        if !self.municipalities.contains_key(&key) {
            tracing::debug!(state = %state, "Municipality lookup cache miss");
            let result = warehouse.run_query(&build_municipality_lookup(state))?;
            let names: Vec<String> = result
                .rows
                .iter()
                .filter_map(|row| row.first())
                .filter(|cell| !cell.is_null())
                .map(CellValue::to_string)
                .collect();
            self.municipalities.insert(key.clone(), names);
        } else {
            tracing::debug!(state = %state, "Municipality lookup cache hit");
        }

        Ok(self
            .municipalities
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default())
    }

    pub fn is_cached(&self, state: &StateFilter, identity: &str) -> bool {
        self.municipalities
            .contains_key(&(state.clone(), identity.to_string()))
    }

    pub fn invalidate(&mut self) {
        self.municipalities.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::warehouse::{Column, ColumnType, QueryResult};

    struct CountingWarehouse {
        identity: String,
        calls: Cell<usize>,
    }

    impl CountingWarehouse {
        fn new(identity: &str) -> Self {
            CountingWarehouse {
                identity: identity.to_string(),
                calls: Cell::new(0),
            }
        }
    }

    impl Warehouse for CountingWarehouse {
        fn identity(&self) -> &str {
            &self.identity
        }

        fn run_query(&self, sql: &str) -> Result<QueryResult, WarehouseError> {
            self.calls.set(self.calls.get() + 1);
            assert!(sql.contains("SELECT DISTINCT nome"));
            Ok(QueryResult::new(
                vec![Column {
                    name: "nome".into(),
                    column_type: ColumnType::String,
                }],
                vec![
                    vec![CellValue::Text("Cascavel".into())],
                    vec![CellValue::Null],
                    vec![CellValue::Text("Curitiba".into())],
                ],
            ))
        }
    }

    #[test]
    fn test_lookup_is_cached_per_state_and_identity() {
        let mut cache = LookupCache::new();
        let warehouse = CountingWarehouse::new("billing-a");
        let pr = StateFilter::Code("PR".into());

        let names = cache.municipalities(&warehouse, &pr).unwrap().to_vec();
        assert_eq!(names, vec!["Cascavel", "Curitiba"]);
        cache.municipalities(&warehouse, &pr).unwrap();
        assert_eq!(warehouse.calls.get(), 1);
        assert!(cache.is_cached(&pr, "billing-a"));

        // A different state is a different key
        cache.municipalities(&warehouse, &StateFilter::All).unwrap();
        assert_eq!(warehouse.calls.get(), 2);

        // So is a different caller
        let other = CountingWarehouse::new("billing-b");
        cache.municipalities(&other, &pr).unwrap();
        assert_eq!(other.calls.get(), 1);
    }

    #[test]
    fn test_invalidate_forces_requery() {
        let mut cache = LookupCache::new();
        let warehouse = CountingWarehouse::new("billing-a");
        let sc = StateFilter::Code("SC".into());

        cache.municipalities(&warehouse, &sc).unwrap();
        cache.invalidate();
        assert!(!cache.is_cached(&sc, "billing-a"));
        cache.municipalities(&warehouse, &sc).unwrap();
        assert_eq!(warehouse.calls.get(), 2);
    }
}
