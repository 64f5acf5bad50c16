//! # Category Budgets
//!
//! A memory ceiling per resource category. Budgets are checked *before*
//! a load touches the page allocator, debited on residency, and credited
//! on unload - `used` can never exceed `capacity`.

use crate::resource::ResourceCategory;

/// One category's ceiling and current usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CategoryBudget {
    /// The ceiling in bytes.
    pub capacity: usize,
    /// Bytes currently resident.
    pub used: usize,
}

impl CategoryBudget {
    /// Whether `bytes` more would still fit under the ceiling.
    #[inline]
    #[must_use]
    pub const fn has_available(&self, bytes: usize) -> bool {
        self.used + bytes <= self.capacity
    }
}

/// The full budget table, indexed by category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryBudgets {
    /// Per-category budgets in `ResourceCategory::ALL` order.
    table: [CategoryBudget; ResourceCategory::COUNT],
}

impl MemoryBudgets {
    /// Builds a table from per-category capacities.
    #[must_use]
    pub fn with_capacities(capacities: [usize; ResourceCategory::COUNT]) -> Self {
        let mut table = [CategoryBudget::default(); ResourceCategory::COUNT];
        for (budget, capacity) in table.iter_mut().zip(capacities) {
            budget.capacity = capacity;
        }
        Self { table }
    }

    /// The budget for one category.
    #[inline]
    #[must_use]
    pub const fn get(&self, category: ResourceCategory) -> CategoryBudget {
        self.table[category.index()]
    }

    /// Whether `bytes` more of `category` would fit.
    #[inline]
    #[must_use]
    pub const fn has_available(&self, category: ResourceCategory, bytes: usize) -> bool {
        self.table[category.index()].has_available(bytes)
    }

    /// Debits a successful load. Callers must have checked
    /// [`MemoryBudgets::has_available`] first; an overshoot is clamped and
    /// reported rather than silently breaking the ceiling invariant.
    pub fn debit(&mut self, category: ResourceCategory, bytes: usize) {
        let budget = &mut self.table[category.index()];
        if budget.used + bytes > budget.capacity {
            tracing::warn!(
                ?category,
                bytes,
                used = budget.used,
                capacity = budget.capacity,
                "budget debit over ceiling, clamping"
            );
            budget.used = budget.capacity;
        } else {
            budget.used += bytes;
        }
    }

    /// Credits an unload.
    pub fn credit(&mut self, category: ResourceCategory, bytes: usize) {
        let budget = &mut self.table[category.index()];
        if bytes > budget.used {
            tracing::warn!(?category, bytes, used = budget.used, "budget over-credit");
            budget.used = 0;
        } else {
            budget.used -= bytes;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budgets() -> MemoryBudgets {
        MemoryBudgets::with_capacities([1000, 2000, 500, 100, 100])
    }

    #[test]
    fn test_check_debit_credit_cycle() {
        let mut budgets = budgets();
        assert!(budgets.has_available(ResourceCategory::Texture, 1500));
        budgets.debit(ResourceCategory::Texture, 1500);
        assert!(!budgets.has_available(ResourceCategory::Texture, 600));
        assert_eq!(budgets.get(ResourceCategory::Texture).used, 1500);

        budgets.credit(ResourceCategory::Texture, 1500);
        assert_eq!(budgets.get(ResourceCategory::Texture).used, 0);
    }

    #[test]
    fn test_categories_are_independent() {
        let mut budgets = budgets();
        budgets.debit(ResourceCategory::Geometry, 1000);
        assert!(!budgets.has_available(ResourceCategory::Geometry, 1));
        assert!(budgets.has_available(ResourceCategory::Audio, 500));
    }

    #[test]
    fn test_used_never_exceeds_capacity() {
        let mut budgets = budgets();
        budgets.debit(ResourceCategory::Audio, 400);
        // A buggy caller skipping the check still cannot break the ceiling.
        budgets.debit(ResourceCategory::Audio, 400);
        assert_eq!(budgets.get(ResourceCategory::Audio).used, 500);

        budgets.credit(ResourceCategory::Audio, 9999);
        assert_eq!(budgets.get(ResourceCategory::Audio).used, 0);
    }
}
