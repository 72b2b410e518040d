//! KPI contribution adapter.
//!
//! Aggregates model scores per target KPI with representative-wins
//! semantics and honors PM overrides on the active map.

use anyhow::Result;
use roadmap_db::{ContributionSource, Db, InitiativeMathModel};
use std::collections::HashMap;
use tracing::debug;

/// Result of `update_initiative_contributions`.
#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct ContributionOutcome {
    pub updated: bool,
    pub skipped_due_to_override: bool,
    pub invalid_kpis: Vec<String>,
    pub computed_keys: Vec<String>,
}

/// Compute the initiative's KPI contribution map.
///
/// Models are grouped by `target_kpi_key`; within a group the primary model
/// wins, else the highest `computed_score`. Scores are never summed across
/// models for the same KPI. Keys outside the active north-star/strategic
/// registry are dropped and reported.
pub async fn compute_kpi_contributions(
    db: &Db,
    initiative_key: &str,
) -> Result<(HashMap<String, f64>, Vec<String>)> {
    let models = db.math_models().list_for_initiative(initiative_key).await?;

    let valid_keys: Vec<String> = db
        .metrics()
        .list_active()
        .await?
        .into_iter()
        .filter(|m| m.kpi_level.contributes())
        .map(|m| m.kpi_key)
        .collect();

    let mut groups: HashMap<String, Vec<&InitiativeMathModel>> = HashMap::new();
    for model in &models {
        let (Some(kpi), Some(_)) = (&model.target_kpi_key, model.computed_score) else {
            continue;
        };
        groups.entry(kpi.clone()).or_default().push(model);
    }

    let mut contributions = HashMap::new();
    let mut dropped = Vec::new();
    for (kpi, group) in groups {
        if !valid_keys.contains(&kpi) {
            dropped.push(kpi);
            continue;
        }
        let representative = group
            .iter()
            .find(|m| m.is_primary)
            .copied()
            .or_else(|| {
                group.iter().copied().max_by(|a, b| {
                    a.computed_score
                        .partial_cmp(&b.computed_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.model_name.cmp(&a.model_name))
                })
            });
        if let Some(model) = representative {
            if let Some(score) = model.computed_score {
                contributions.insert(kpi, score);
            }
        }
    }
    dropped.sort();

    Ok((contributions, dropped))
}

/// Write the adapter output back to the initiative.
///
/// The computed snapshot is always overwritten; the active map only moves
/// when the PM has not overridden it.
pub async fn update_initiative_contributions(
    db: &Db,
    initiative_key: &str,
) -> Result<ContributionOutcome> {
    let (contributions, dropped) = compute_kpi_contributions(db, initiative_key).await?;
    let mut outcome = ContributionOutcome {
        invalid_kpis: dropped,
        ..Default::default()
    };

    let Some(initiative) = db.initiatives().find_by_key(initiative_key).await? else {
        return Ok(outcome);
    };

    let computed_json = serde_json::to_string(&ordered(&contributions))?;
    db.initiatives()
        .update_kpi_computed(initiative_key, &computed_json)
        .await?;

    outcome.computed_keys = {
        let mut keys: Vec<String> = contributions.keys().cloned().collect();
        keys.sort();
        keys
    };

    if initiative.kpi_contribution_source == Some(ContributionSource::PmOverride) {
        outcome.skipped_due_to_override = true;
        debug!("{initiative_key}: active KPI map kept (pm_override)");
        return Ok(outcome);
    }

    db.initiatives()
        .update_kpi_active(
            initiative_key,
            Some(&computed_json),
            Some(ContributionSource::Computed),
        )
        .await?;
    outcome.updated = true;
    Ok(outcome)
}

fn ordered(map: &HashMap<String, f64>) -> std::collections::BTreeMap<String, f64> {
    map.iter().map(|(k, v)| (k.clone(), *v)).collect()
}
