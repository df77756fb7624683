use crate::score::ScoredCoverage;

/// Plan lookup criteria. Text filters match case-insensitively on the
/// whole value; `None` leaves a dimension unfiltered.
#[derive(Debug, Clone, Default)]
pub struct LookupFilter {
    pub organization: Option<String>,
    pub product: Option<String>,
    pub min_score: Option<f64>,
    pub limit: Option<usize>,
}

fn matches_text(filter: Option<&str>, value: &str) -> bool {
    filter.is_none_or(|wanted| wanted.trim().eq_ignore_ascii_case(value.trim()))
}

impl LookupFilter {
    pub fn matches(&self, scored: &ScoredCoverage) -> bool {
        let record = &scored.record;
        matches_text(self.organization.as_deref(), &record.plan.organization_name)
            && matches_text(self.product.as_deref(), &record.product.name)
            && self.min_score.is_none_or(|min| scored.access_score >= min)
    }
}

/// Matching records, best access first. Ties keep plan-key order.
pub fn lookup<'a>(records: &'a [ScoredCoverage], filter: &LookupFilter) -> Vec<&'a ScoredCoverage> {
    let mut hits: Vec<&ScoredCoverage> = records.iter().filter(|r| filter.matches(r)).collect();
    hits.sort_by(|a, b| {
        b.access_score
            .total_cmp(&a.access_score)
            .then_with(|| a.record.plan.key.cmp(&b.record.plan.key))
            .then_with(|| a.record.product.name.cmp(&b.record.product.name))
    });
    if let Some(limit) = filter.limit {
        hits.truncate(limit);
    }
    hits
}
