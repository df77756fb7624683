use std::collections::{BTreeMap, btree_map::Entry};

use serde::Serialize;

use crate::{
    catalog::{Indication, Ndc, NdcResolution, Product, ProductCatalog},
    error::{Diagnostics, MissingCostData, SkipReason, TableKind},
    loader::{
        CostEntry, CostType, FormularyEntry, Pharmacy, Plan, PlanKey, ReferenceTables, Tier,
    },
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductRef {
    pub name: String,
    pub molecule: String,
    pub indication: Indication,
}

impl From<&Product> for ProductRef {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            molecule: product.molecule.clone(),
            indication: product.indication,
        }
    }
}

/// Beneficiary cost sharing attached to a coverage record.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostShare {
    pub cost_type: CostType,
    pub retail_preferred: f64,
    pub retail_standard: f64,
    pub mail_order: f64,
}

impl CostShare {
    /// Placeholder used when the plan publishes no cost row for the tier.
    pub fn missing() -> Self {
        Self {
            cost_type: CostType::Unknown,
            retail_preferred: 0.0,
            retail_standard: 0.0,
            mail_order: 0.0,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.cost_type == CostType::Unknown
    }

    pub fn amount(&self, pharmacy: Pharmacy) -> f64 {
        match pharmacy {
            Pharmacy::RetailPreferred => self.retail_preferred,
            Pharmacy::RetailStandard => self.retail_standard,
            Pharmacy::MailOrder => self.mail_order,
        }
    }
}

impl From<&CostEntry> for CostShare {
    fn from(entry: &CostEntry) -> Self {
        Self {
            cost_type: entry.cost_type,
            retail_preferred: entry.retail_preferred,
            retail_standard: entry.retail_standard,
            mail_order: entry.mail_order,
        }
    }
}

/// One product's placement on one plan's formulary, joined with the plan and
/// its cost sharing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRecord {
    pub plan: Plan,
    pub product: ProductRef,
    pub ndc: Ndc,
    pub tier: Tier,
    pub prior_auth: bool,
    pub step_therapy: bool,
    pub quantity_limit: bool,
    pub quantity_limit_amount: Option<f64>,
    pub quantity_limit_days: Option<u32>,
    pub cost: CostShare,
}

// Lowest tier first, then fewest restrictions, then the smaller NDC so the
// choice never depends on input order.
fn better_access(candidate: &FormularyEntry, incumbent: &FormularyEntry) -> bool {
    (candidate.tier, candidate.restriction_count(), &candidate.ndc)
        < (incumbent.tier, incumbent.restriction_count(), &incumbent.ndc)
}

/// Joins formulary placements with plans, products and cost sharing.
///
/// Each (plan, product) pair yields at most one record: when several of a
/// product's NDCs sit on the same formulary the best-access placement wins.
/// Records come out ordered by plan key, then product name.
pub fn extract_coverage(
    tables: &ReferenceTables,
    catalog: &ProductCatalog,
    diagnostics: &mut Diagnostics,
) -> Vec<CoverageRecord> {
    let mut best: BTreeMap<(PlanKey, String), (&Plan, &Product, &FormularyEntry)> = BTreeMap::new();

    for ((plan_key, ndc), entry) in &tables.formulary {
        let product = match catalog.resolve(ndc) {
            NdcResolution::Product(product) => product,
            NdcResolution::Ambiguous => {
                tracing::warn!(
                    "Dropping {plan_key} / NDC {ndc}: NDC maps to more than one product"
                );
                diagnostics.skip(
                    TableKind::Formulary,
                    None,
                    SkipReason::AmbiguousNdc {
                        ndc: ndc.to_string(),
                    },
                );
                continue;
            }
            NdcResolution::Unknown => continue,
        };

        let Some(plan) = tables.plans.get(plan_key) else {
            tracing::warn!("Dropping {plan_key} / {}: plan not found in plan table", product.name);
            diagnostics.skip(
                TableKind::Formulary,
                None,
                SkipReason::UnknownPlan {
                    plan: plan_key.to_string(),
                },
            );
            continue;
        };

        match best.entry((plan_key.clone(), product.name.clone())) {
            Entry::Vacant(slot) => {
                slot.insert((plan, product, entry));
            }
            Entry::Occupied(mut slot) => {
                if better_access(entry, slot.get().2) {
                    slot.insert((plan, product, entry));
                }
            }
        }
    }

    let records: Vec<CoverageRecord> = best
        .into_values()
        .map(|(plan, product, entry)| {
            let cost = match tables.costs.get(&(plan.key.clone(), entry.tier)) {
                Some(cost) => CostShare::from(cost),
                None => {
                    diagnostics.missing_cost.push(MissingCostData {
                        plan: plan.key.to_string(),
                        product: product.name.clone(),
                        tier: entry.tier.level(),
                    });
                    CostShare::missing()
                }
            };
            CoverageRecord {
                plan: plan.clone(),
                product: ProductRef::from(product),
                ndc: entry.ndc.clone(),
                tier: entry.tier,
                prior_auth: entry.prior_auth,
                step_therapy: entry.step_therapy,
                quantity_limit: entry.quantity_limit,
                quantity_limit_amount: entry.quantity_limit_amount,
                quantity_limit_days: entry.quantity_limit_days,
                cost,
            }
        })
        .collect();

    if !diagnostics.missing_cost.is_empty() {
        tracing::info!(
            "{} coverage records have no cost-sharing row for their tier",
            diagnostics.missing_cost.len()
        );
    }
    tracing::info!("Extracted {} coverage records", records.len());
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::normalize_ndc, loader::CoveragePhase};

    fn plan(contract: &str, plan_id: &str) -> Plan {
        Plan {
            key: PlanKey::new(contract, plan_id),
            plan_name: format!("{contract} plan {plan_id}"),
            plan_type: "PDP".to_string(),
            organization_name: format!("{contract} Org"),
            formulary_id: None,
        }
    }

    fn entry(key: &PlanKey, ndc: &str, tier: u8, pa: bool) -> FormularyEntry {
        FormularyEntry {
            plan: key.clone(),
            ndc: normalize_ndc(ndc).unwrap(),
            tier: Tier::new(tier).unwrap(),
            prior_auth: pa,
            step_therapy: false,
            quantity_limit: false,
            quantity_limit_amount: None,
            quantity_limit_days: None,
        }
    }

    fn tables(plans: Vec<Plan>, entries: Vec<FormularyEntry>) -> ReferenceTables {
        let mut tables = ReferenceTables::default();
        for p in plans {
            tables.plans.insert(p.key.clone(), p);
        }
        for e in entries {
            tables.formulary.insert((e.plan.clone(), e.ndc.clone()), e);
        }
        tables
    }

    fn copay(key: &PlanKey, tier: u8, amount: f64) -> CostEntry {
        CostEntry {
            plan: key.clone(),
            tier: Tier::new(tier).unwrap(),
            phase: CoveragePhase::Initial,
            cost_type: CostType::Copay,
            retail_preferred: amount,
            retail_standard: amount,
            mail_order: amount,
        }
    }

    #[test]
    fn keeps_lowest_tier_when_product_has_several_ndcs() {
        let p = plan("H0001", "001");
        let key = p.key.clone();
        // Two Wegovy strengths on the same formulary.
        let t = tables(
            vec![p],
            vec![entry(&key, "00169451701", 4, true), entry(&key, "00169453001", 2, false)],
        );
        let mut diagnostics = Diagnostics::default();
        let records = extract_coverage(&t, &ProductCatalog::builtin(), &mut diagnostics);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].product.name, "Wegovy");
        assert_eq!(records[0].tier, Tier::new(2).unwrap());
        assert_eq!(records[0].ndc.as_str(), "00169453001");
    }

    #[test]
    fn equal_tiers_prefer_fewer_restrictions() {
        let p = plan("H0001", "001");
        let key = p.key.clone();
        let t = tables(
            vec![p],
            vec![entry(&key, "00169451701", 3, false), entry(&key, "00169453001", 3, true)],
        );
        let records =
            extract_coverage(&t, &ProductCatalog::builtin(), &mut Diagnostics::default());
        assert_eq!(records.len(), 1);
        assert!(!records[0].prior_auth);
    }

    #[test]
    fn joins_cost_or_falls_back_to_sentinel() {
        let p = plan("H0001", "001");
        let key = p.key.clone();
        let mut t = tables(
            vec![p],
            vec![entry(&key, "00169406001", 2, false), entry(&key, "00002230001", 3, true)],
        );
        t.costs.insert((key.clone(), Tier::new(2).unwrap()), copay(&key, 2, 47.0));

        let mut diagnostics = Diagnostics::default();
        let records = extract_coverage(&t, &ProductCatalog::builtin(), &mut diagnostics);

        assert_eq!(records.len(), 2);
        let names: Vec<&str> = records.iter().map(|r| r.product.name.as_str()).collect();
        assert_eq!(names, vec!["Mounjaro", "Ozempic"]);
        assert!(records[0].cost.is_missing());
        assert_eq!(records[1].cost.retail_preferred, 47.0);
        assert_eq!(
            diagnostics.missing_cost,
            vec![MissingCostData {
                plan: "H0001-001".to_string(),
                product: "Mounjaro".to_string(),
                tier: 3,
            }]
        );
    }

    #[test]
    fn drops_entries_for_unknown_plans() {
        let known = plan("H0001", "001");
        let orphan = PlanKey::new("H9999", "001");
        let known_key = known.key.clone();
        let t = tables(
            vec![known],
            vec![
                entry(&known_key, "00169406001", 2, false),
                entry(&orphan, "00169406001", 2, false),
            ],
        );
        let mut diagnostics = Diagnostics::default();
        let records = extract_coverage(&t, &ProductCatalog::builtin(), &mut diagnostics);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].plan.key, known_key);
        assert_eq!(
            diagnostics.skipped[0].reason,
            SkipReason::UnknownPlan {
                plan: "H9999-001".to_string()
            }
        );
    }

    #[test]
    fn orders_by_plan_then_product() {
        let a = plan("S0002", "001");
        let b = plan("H0001", "002");
        let (ka, kb) = (a.key.clone(), b.key.clone());
        let t = tables(
            vec![a, b],
            vec![
                entry(&ka, "00169406001", 2, false),
                entry(&ka, "00002466601", 2, false),
                entry(&kb, "00169451701", 2, false),
            ],
        );
        let records =
            extract_coverage(&t, &ProductCatalog::builtin(), &mut Diagnostics::default());
        let order: Vec<(String, &str)> = records
            .iter()
            .map(|r| (r.plan.key.to_string(), r.product.name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("H0001-002".to_string(), "Wegovy"),
                ("S0002-001".to_string(), "Ozempic"),
                ("S0002-001".to_string(), "Zepbound"),
            ]
        );
    }
}
