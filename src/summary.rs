use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::{
    catalog::{Indication, ProductCatalog},
    constants::TOP_ORGANIZATIONS,
    loader::PlanKey,
    score::ScoredCoverage,
};

/// Share of records carrying each utilization-management restriction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrictionRates {
    pub pa_rate: f64,
    pub st_rate: f64,
    pub ql_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductSummary {
    pub product: String,
    pub molecule: String,
    pub indication: Indication,
    pub records: usize,
    pub plans_covering: usize,
    pub mean_score: Option<f64>,
    #[serde(flatten)]
    pub friction: FrictionRates,
    pub tier_distribution: BTreeMap<u8, usize>,
}

/// Aggregate over several products sharing an indication or a molecule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSummary {
    pub group: String,
    pub records: usize,
    pub plans_covering: usize,
    pub mean_score: Option<f64>,
    #[serde(flatten)]
    pub friction: FrictionRates,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrganizationSummary {
    pub organization_name: String,
    pub records: usize,
    pub plans: usize,
    pub mean_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_records: usize,
    pub unique_plans: usize,
    pub average_score: Option<f64>,
    pub friction: FrictionRates,
    pub by_product: Vec<ProductSummary>,
    pub by_indication: Vec<GroupSummary>,
    pub by_molecule: Vec<GroupSummary>,
    pub tier_distribution: BTreeMap<u8, usize>,
    pub top_organizations: Vec<OrganizationSummary>,
    pub missing_cost_records: usize,
}

#[derive(Debug, Default)]
struct Tally<'a> {
    records: usize,
    score_sum: f64,
    prior_auth: usize,
    step_therapy: usize,
    quantity_limit: usize,
    plans: BTreeSet<&'a PlanKey>,
    tiers: BTreeMap<u8, usize>,
}

impl<'a> Tally<'a> {
    fn add(&mut self, scored: &'a ScoredCoverage) {
        let record = &scored.record;
        self.records += 1;
        self.score_sum += scored.access_score;
        self.prior_auth += usize::from(record.prior_auth);
        self.step_therapy += usize::from(record.step_therapy);
        self.quantity_limit += usize::from(record.quantity_limit);
        self.plans.insert(&record.plan.key);
        *self.tiers.entry(record.tier.level()).or_default() += 1;
    }

    fn mean_score(&self) -> Option<f64> {
        (self.records > 0).then(|| self.score_sum / self.records as f64)
    }

    fn rate(&self, count: usize) -> f64 {
        if self.records == 0 {
            0.0
        } else {
            count as f64 / self.records as f64
        }
    }

    fn friction(&self) -> FrictionRates {
        FrictionRates {
            pa_rate: self.rate(self.prior_auth),
            st_rate: self.rate(self.step_therapy),
            ql_rate: self.rate(self.quantity_limit),
        }
    }

    fn group(&self, group: String) -> GroupSummary {
        GroupSummary {
            group,
            records: self.records,
            plans_covering: self.plans.len(),
            mean_score: self.mean_score(),
            friction: self.friction(),
        }
    }
}

/// Aggregates scored records per product, indication, molecule and
/// organization. Every catalog product gets an entry, covered or not.
pub fn summarize(records: &[ScoredCoverage], catalog: &ProductCatalog) -> RunSummary {
    let mut overall = Tally::default();
    let mut by_product: HashMap<&str, Tally> = HashMap::new();
    let mut by_indication: BTreeMap<Indication, Tally> = BTreeMap::new();
    let mut by_molecule: BTreeMap<&str, Tally> = BTreeMap::new();
    let mut by_organization: HashMap<&str, Tally> = HashMap::new();

    for product in catalog.products() {
        by_indication.entry(product.indication).or_default();
        by_molecule.entry(product.molecule.as_str()).or_default();
    }

    let mut missing_cost_records = 0;
    for scored in records {
        let record = &scored.record;
        overall.add(scored);
        by_product.entry(record.product.name.as_str()).or_default().add(scored);
        by_indication.entry(record.product.indication).or_default().add(scored);
        by_molecule.entry(record.product.molecule.as_str()).or_default().add(scored);
        by_organization
            .entry(record.plan.organization_name.as_str())
            .or_default()
            .add(scored);
        if record.cost.is_missing() {
            missing_cost_records += 1;
        }
    }

    let empty = Tally::default();
    let product_summaries = catalog
        .products()
        .map(|product| {
            let tally = by_product.get(product.name.as_str()).unwrap_or(&empty);
            ProductSummary {
                product: product.name.clone(),
                molecule: product.molecule.clone(),
                indication: product.indication,
                records: tally.records,
                plans_covering: tally.plans.len(),
                mean_score: tally.mean_score(),
                friction: tally.friction(),
                tier_distribution: tally.tiers.clone(),
            }
        })
        .collect();

    let mut top_organizations: Vec<OrganizationSummary> = by_organization
        .iter()
        .map(|(name, tally)| OrganizationSummary {
            organization_name: name.to_string(),
            records: tally.records,
            plans: tally.plans.len(),
            mean_score: tally.mean_score(),
        })
        .collect();
    top_organizations.sort_by(|a, b| {
        b.records
            .cmp(&a.records)
            .then_with(|| a.organization_name.cmp(&b.organization_name))
    });
    top_organizations.truncate(TOP_ORGANIZATIONS);

    RunSummary {
        total_records: overall.records,
        unique_plans: overall.plans.len(),
        average_score: overall.mean_score(),
        friction: overall.friction(),
        by_product: product_summaries,
        by_indication: by_indication
            .iter()
            .map(|(indication, tally)| tally.group(indication.to_string()))
            .collect(),
        by_molecule: by_molecule
            .iter()
            .map(|(molecule, tally)| tally.group(molecule.to_string()))
            .collect(),
        tier_distribution: overall.tiers.clone(),
        top_organizations,
        missing_cost_records,
    }
}
