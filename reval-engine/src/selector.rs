use crate::types::ProductEffect;

/// Selectors rank and truncate a list of results.
pub trait Selector<C>: Send + Sync {
    /// Sort, then truncate to `size()` when set.
    fn select(&self, candidates: Vec<C>) -> Vec<C> {
        let mut sorted = self.sort(candidates);
        if let Some(limit) = self.size() {
            sorted.truncate(limit);
        }
        sorted
    }

    /// Extract the score from a candidate to use for sorting.
    fn score(&self, candidate: &C) -> f64;

    /// Sort candidates by their scores in descending order.
    ///
    /// NaN scores are pushed to the end of the list so they never appear
    /// as top candidates.
    fn sort(&self, candidates: Vec<C>) -> Vec<C> {
        let mut sorted = candidates;
        sorted.sort_by(|a, b| {
            let sa = self.score(a);
            let sb = self.score(b);
            match (sa.is_nan(), sb.is_nan()) {
                (true, true) => std::cmp::Ordering::Equal,
                (true, false) => std::cmp::Ordering::Greater,
                (false, true) => std::cmp::Ordering::Less,
                (false, false) => sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal),
            }
        });
        sorted
    }

    /// Maximum number of candidates to keep; `None` keeps all.
    fn size(&self) -> Option<usize> {
        None
    }

    /// Short type name for logging.
    fn name(&self) -> &str {
        let full = std::any::type_name::<Self>();
        full.rsplit("::").next().unwrap_or(full)
    }
}

/// Products with the largest positive revenue effect first.
#[derive(Clone, Copy, Debug)]
pub struct TopGrowth {
    pub limit: usize,
}

impl Selector<ProductEffect> for TopGrowth {
    fn score(&self, candidate: &ProductEffect) -> f64 {
        candidate.total_effect_revenue
    }

    fn size(&self) -> Option<usize> {
        Some(self.limit)
    }
}

/// Products with the largest revenue loss first.
#[derive(Clone, Copy, Debug)]
pub struct TopDecline {
    pub limit: usize,
}

impl Selector<ProductEffect> for TopDecline {
    fn score(&self, candidate: &ProductEffect) -> f64 {
        -candidate.total_effect_revenue
    }

    fn size(&self) -> Option<usize> {
        Some(self.limit)
    }
}

/// Top growth and decline products among those with at least one valid week.
pub fn top_movers(products: &[ProductEffect], limit: usize) -> (Vec<ProductEffect>, Vec<ProductEffect>) {
    let (growth, decline): (Vec<ProductEffect>, Vec<ProductEffect>) = products
        .iter()
        .filter(|p| !p.is_fully_excluded())
        .cloned()
        .partition(|p| p.total_effect_revenue > 0.0);
    let growth_sel = TopGrowth { limit };
    let decline_sel = TopDecline { limit };
    log::debug!(
        "{}: {} candidates, {}: {} candidates",
        growth_sel.name(),
        growth.len(),
        decline_sel.name(),
        decline.len()
    );
    (growth_sel.select(growth), decline_sel.select(decline))
}
