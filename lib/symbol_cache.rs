//! In-process lookup of tracked rate symbols, shared by every job.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::db::models::RateSymbol;
use crate::store::{ReferenceStore, StoreResult};

#[derive(Debug, Default)]
pub struct SymbolTable {
    by_symbol: HashMap<String, RateSymbol>,
    by_name: HashMap<String, String>,
}

impl SymbolTable {
    fn build(symbols: Vec<RateSymbol>) -> Self {
        let mut table = Self::default();
        for symbol in symbols {
            table
                .by_name
                .insert(symbol.name.clone(), symbol.symbol.clone());
            table.by_symbol.insert(symbol.symbol.clone(), symbol);
        }
        table
    }

    pub fn get(&self, symbol: &str) -> Option<&RateSymbol> {
        self.by_symbol.get(symbol)
    }

    /// Accepts either a symbol or a display name. Unknown input is returned trimmed.
    pub fn resolve(&self, input: &str) -> String {
        let input = input.trim();
        if self.by_symbol.contains_key(input) {
            return input.to_string();
        }
        self.by_name
            .get(input)
            .cloned()
            .unwrap_or_else(|| input.to_string())
    }

    pub fn len(&self) -> usize {
        self.by_symbol.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_symbol.is_empty()
    }
}

/// Readers clone the current `Arc<SymbolTable>`; a reload builds a fresh table and swaps it in.
#[derive(Debug, Default)]
pub struct SymbolCache {
    current: RwLock<Arc<SymbolTable>>,
}

impl SymbolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_symbols(symbols: Vec<RateSymbol>) -> Self {
        Self {
            current: RwLock::new(Arc::new(SymbolTable::build(symbols))),
        }
    }

    pub fn snapshot(&self) -> Arc<SymbolTable> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn replace(&self, symbols: Vec<RateSymbol>) -> usize {
        let table = Arc::new(SymbolTable::build(symbols));
        let loaded = table.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = table;
        loaded
    }

    pub async fn reload(&self, store: &dyn ReferenceStore) -> StoreResult<usize> {
        let symbols = store.active_rate_symbols().await?;
        let loaded = self.replace(symbols);
        info!(event = "symbol_cache_loaded", symbols = loaded, "symbol cache refreshed");
        Ok(loaded)
    }

    pub fn resolve(&self, input: &str) -> String {
        self.snapshot().resolve(input)
    }
}

#[cfg(test)]
mod tests {
    use super::SymbolCache;
    use crate::db::models::RateSymbol;
    use crate::store::MemoryStore;

    fn rate(symbol: &str, name: &str) -> RateSymbol {
        RateSymbol {
            symbol: symbol.to_string(),
            name: name.to_string(),
            currency: Some("KRW".to_string()),
            is_active: true,
        }
    }

    #[test]
    fn resolves_display_names_and_passes_unknowns_through() {
        let cache =
            SymbolCache::from_symbols(vec![rate("KRW=X", "원/달러"), rate("^KS11", "코스피")]);

        assert_eq!(cache.resolve("코스피"), "^KS11");
        assert_eq!(cache.resolve(" KRW=X "), "KRW=X");
        assert_eq!(cache.resolve("JPY=X"), "JPY=X");
    }

    #[test]
    fn snapshots_survive_a_swap() {
        let cache = SymbolCache::from_symbols(vec![rate("KRW=X", "원/달러")]);
        let before = cache.snapshot();

        let replaced = cache.replace(vec![rate("EURKRW=X", "원/유로"), rate("^KS11", "코스피")]);
        assert_eq!(replaced, 2);

        assert!(before.get("KRW=X").is_some());
        assert!(cache.snapshot().get("KRW=X").is_none());
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn reload_reads_active_symbols_from_store() {
        let store = MemoryStore::new();
        store.seed_rate_symbols(vec![
            rate("KRW=X", "원/달러"),
            RateSymbol {
                is_active: false,
                ..rate("OLD=X", "old")
            },
        ]);
        let cache = SymbolCache::new();

        let loaded = cache.reload(&store).await.expect("memory store is online");

        assert_eq!(loaded, 1);
        assert!(cache.snapshot().get("OLD=X").is_none());
    }
}
