//! Compiled expression cache
//!
//! Binds, controls and submissions re-evaluate the same handful of
//! expressions on every pass, so compiled programs are kept in a bounded
//! LRU keyed by expression text. The engine is single-threaded; interior
//! mutability is a `RefCell`.

use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::rc::Rc;

use lru::LruCache;

use super::compiler::{self, CompiledExpr};
use super::Result;

/// Default maximum number of cached programs
pub const DEFAULT_CAPACITY: usize = 256;

/// Size-bounded cache of compiled XPath programs
pub struct ExpressionCache {
    map: RefCell<LruCache<String, Rc<CompiledExpr>>>,
}

impl Default for ExpressionCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for ExpressionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpressionCache")
            .field("len", &self.len())
            .finish()
    }
}

impl ExpressionCache {
    /// Create a cache holding at most `capacity` programs (minimum 1)
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        ExpressionCache {
            map: RefCell::new(LruCache::new(cap)),
        }
    }

    /// Get the compiled program for `xpath`, compiling and caching on miss
    ///
    /// Syntax errors are not cached.
    pub fn get_or_compile(&self, xpath: &str) -> Result<Rc<CompiledExpr>> {
        if let Some(found) = self.map.borrow_mut().get(xpath).cloned() {
            return Ok(found);
        }
        let compiled = Rc::new(compiler::compile(xpath)?);
        self.map.borrow_mut().put(xpath.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Number of cached programs
    pub fn len(&self) -> usize {
        self.map.borrow().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_returns_same_program() {
        let cache = ExpressionCache::with_capacity(4);
        let a = cache.get_or_compile("a/b").unwrap();
        let b = cache.get_or_compile("a/b").unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let cache = ExpressionCache::with_capacity(2);
        let first = cache.get_or_compile("a").unwrap();
        cache.get_or_compile("b").unwrap();
        cache.get_or_compile("c").unwrap();
        assert_eq!(cache.len(), 2);
        let again = cache.get_or_compile("a").unwrap();
        assert!(!Rc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_errors_not_cached() {
        let cache = ExpressionCache::default();
        assert!(cache.get_or_compile("a[").is_err());
        assert!(cache.is_empty());
    }
}
