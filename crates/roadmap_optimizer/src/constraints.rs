//! Constraint compilation: raw sheet rows → compiled constraint sets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

/// The unscoped target bucket key.
pub const ALL: &str = "all";

/// One raw constraint row, already cell-parsed by the reader.
#[derive(Debug, Clone, Default)]
pub struct RawConstraintRow {
    pub row_number: usize,
    pub scenario_name: String,
    pub constraint_set_name: String,
    pub kind: String,
    pub dimension: Option<String>,
    pub dimension_key: Option<String>,
    pub members: Vec<String>,
    pub value: Option<f64>,
    pub bonus: Option<f64>,
    pub notes: Option<String>,
}

/// One raw target row.
#[derive(Debug, Clone, Default)]
pub struct RawTargetRow {
    pub row_number: usize,
    pub scenario_name: String,
    pub constraint_set_name: String,
    pub dimension: Option<String>,
    pub dimension_key: Option<String>,
    pub kpi_key: String,
    pub target_type: String,
    pub value: Option<f64>,
    pub notes: Option<String>,
}

/// The constraint kinds as a single tagged union. The compiler dispatches
/// on tag; the feasibility checker and solver each traverse the compiled
/// buckets independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintKind {
    CapacityFloor { dimension: String, dimension_key: String, tokens: i64 },
    CapacityCap { dimension: String, dimension_key: String, tokens: i64 },
    Mandatory { initiative_key: String },
    Bundle { name: String, members: Vec<String> },
    ExclusionPair { a: String, b: String },
    ExclusionInitiative { initiative_key: String },
    Prerequisite { dependent: String, requires: Vec<String> },
    SynergyBonus { members: Vec<String>, bonus: f64 },
    Target { dimension: String, dimension_key: String, kpi_key: String, spec: TargetSpec },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetType {
    Floor,
    Goal,
}

impl TargetType {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "floor" => Some(Self::Floor),
            "goal" => Some(Self::Goal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    #[serde(rename = "type")]
    pub target_type: TargetType,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bundle {
    pub name: String,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynergyBonus {
    pub members: Vec<String>,
    pub bonus: f64,
}

/// A compiled, deduplicated constraint container for one
/// `(scenario_name, constraint_set_name)` pair.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSetCompiled {
    pub scenario_name: String,
    pub set_name: String,
    /// dimension → dimension_key → token count
    pub capacity_floors: BTreeMap<String, BTreeMap<String, i64>>,
    pub capacity_caps: BTreeMap<String, BTreeMap<String, i64>>,
    pub mandatory: BTreeSet<String>,
    pub bundles: Vec<Bundle>,
    /// Normalized so `a < b`.
    pub exclusion_pairs: Vec<(String, String)>,
    pub exclusion_initiatives: BTreeSet<String>,
    /// dependent → required keys, merged as sets for O(1) lookup.
    pub prerequisites: BTreeMap<String, Vec<String>>,
    pub synergy_bonuses: Vec<SynergyBonus>,
    /// dimension → dimension_key → kpi_key → spec; `all`/`all` is the
    /// unscoped bucket.
    pub targets: BTreeMap<String, BTreeMap<String, BTreeMap<String, TargetSpec>>>,
}

impl ConstraintSetCompiled {
    fn new(scenario_name: &str, set_name: &str) -> Self {
        Self {
            scenario_name: scenario_name.to_string(),
            set_name: set_name.to_string(),
            ..Default::default()
        }
    }

    /// Every initiative key any bucket references.
    pub fn referenced_keys(&self) -> BTreeSet<&str> {
        let mut keys: BTreeSet<&str> = BTreeSet::new();
        keys.extend(self.mandatory.iter().map(String::as_str));
        keys.extend(self.exclusion_initiatives.iter().map(String::as_str));
        for (a, b) in &self.exclusion_pairs {
            keys.insert(a);
            keys.insert(b);
        }
        for bundle in &self.bundles {
            keys.extend(bundle.members.iter().map(String::as_str));
        }
        for (dependent, requires) in &self.prerequisites {
            keys.insert(dependent);
            keys.extend(requires.iter().map(String::as_str));
        }
        for synergy in &self.synergy_bonuses {
            keys.extend(synergy.members.iter().map(String::as_str));
        }
        keys
    }

    /// The unscoped target value for a KPI, if declared.
    pub fn unscoped_target(&self, kpi_key: &str) -> Option<&TargetSpec> {
        self.targets.get(ALL)?.get(ALL)?.get(kpi_key)
    }

    /// Maximum declared target value for a KPI across every dimension.
    pub fn max_target_value(&self, kpi_key: &str) -> Option<f64> {
        let mut best: Option<f64> = None;
        for by_key in self.targets.values() {
            for by_kpi in by_key.values() {
                if let Some(spec) = by_kpi.get(kpi_key) {
                    best = Some(best.map_or(spec.value, |b: f64| b.max(spec.value)));
                }
            }
        }
        best
    }
}

/// Parse one raw row into the tagged union; `Err` carries the validation
/// message for the row.
fn parse_row(row: &RawConstraintRow) -> Result<Vec<ConstraintKind>, String> {
    let kind = row.kind.trim().to_ascii_lowercase();
    match kind.as_str() {
        "capacity_floor" | "capacity_cap" => {
            let dimension = row
                .dimension
                .clone()
                .ok_or("capacity constraint requires a dimension")?;
            let dimension_key = row
                .dimension_key
                .clone()
                .ok_or("capacity constraint requires a dimension key")?;
            let value = row.value.ok_or("capacity constraint requires a value")?;
            if value < 0.0 {
                return Err(format!("capacity value must be >= 0, got {value}"));
            }
            let tokens = value.round() as i64;
            Ok(vec![if kind == "capacity_floor" {
                ConstraintKind::CapacityFloor { dimension, dimension_key, tokens }
            } else {
                ConstraintKind::CapacityCap { dimension, dimension_key, tokens }
            }])
        }
        "mandatory" => {
            if row.members.is_empty() {
                return Err("mandatory row names no initiatives".to_string());
            }
            Ok(row
                .members
                .iter()
                .map(|key| ConstraintKind::Mandatory { initiative_key: key.clone() })
                .collect())
        }
        "exclusion_initiative" => {
            if row.members.is_empty() {
                return Err("exclusion row names no initiatives".to_string());
            }
            Ok(row
                .members
                .iter()
                .map(|key| ConstraintKind::ExclusionInitiative { initiative_key: key.clone() })
                .collect())
        }
        "exclusion_pair" => {
            let [a, b] = row.members.as_slice() else {
                return Err(format!(
                    "exclusion pair requires exactly 2 members, got {}",
                    row.members.len()
                ));
            };
            if a == b {
                return Err(format!("exclusion pair ({a}, {a}) is illegal"));
            }
            Ok(vec![ConstraintKind::ExclusionPair { a: a.clone(), b: b.clone() }])
        }
        "bundle" => {
            if row.members.len() < 2 {
                return Err(format!(
                    "bundle requires at least 2 members, got {}",
                    row.members.len()
                ));
            }
            let name = row
                .dimension_key
                .clone()
                .or_else(|| row.notes.clone())
                .unwrap_or_else(|| format!("bundle_row_{}", row.row_number));
            Ok(vec![ConstraintKind::Bundle { name, members: row.members.clone() }])
        }
        "prerequisite" => {
            // Either `dimension_key` names the dependent and members the
            // requirements, or the first member depends on the rest.
            let (dependent, requires) = match (&row.dimension_key, row.members.as_slice()) {
                (Some(dependent), requires) if !requires.is_empty() => {
                    (dependent.clone(), requires.to_vec())
                }
                (None, [dependent, rest @ ..]) if !rest.is_empty() => {
                    (dependent.clone(), rest.to_vec())
                }
                _ => return Err("prerequisite requires a dependent and requirements".to_string()),
            };
            Ok(vec![ConstraintKind::Prerequisite { dependent, requires }])
        }
        "synergy_bonus" => {
            if row.members.len() < 2 {
                return Err(format!(
                    "synergy requires at least 2 members, got {}",
                    row.members.len()
                ));
            }
            let bonus = row.bonus.or(row.value).ok_or("synergy requires a bonus")?;
            if bonus < 0.0 {
                return Err(format!("synergy bonus must be >= 0, got {bonus}"));
            }
            Ok(vec![ConstraintKind::SynergyBonus { members: row.members.clone(), bonus }])
        }
        other => Err(format!("unknown constraint type: {other}")),
    }
}

/// Compile raw constraint and target rows into per-(scenario, set) compiled
/// containers. All validation messages are collected; a bad row never
/// aborts its siblings.
pub fn compile_constraints(
    constraint_rows: &[RawConstraintRow],
    target_rows: &[RawTargetRow],
    valid_kpi_keys: Option<&HashSet<String>>,
) -> (BTreeMap<(String, String), ConstraintSetCompiled>, Vec<String>) {
    let mut sets: BTreeMap<(String, String), ConstraintSetCompiled> = BTreeMap::new();
    let mut messages = Vec::new();

    for row in constraint_rows {
        let group = (row.scenario_name.clone(), row.constraint_set_name.clone());
        let set = sets
            .entry(group)
            .or_insert_with(|| ConstraintSetCompiled::new(&row.scenario_name, &row.constraint_set_name));

        match parse_row(row) {
            Ok(kinds) => {
                for kind in kinds {
                    apply_kind(set, kind, row.row_number, &mut messages);
                }
            }
            Err(message) => {
                messages.push(format!("constraint row {}: {message}", row.row_number));
            }
        }
    }

    for row in target_rows {
        let group = (row.scenario_name.clone(), row.constraint_set_name.clone());
        let set = sets
            .entry(group)
            .or_insert_with(|| ConstraintSetCompiled::new(&row.scenario_name, &row.constraint_set_name));

        let Some(target_type) = TargetType::parse(&row.target_type) else {
            messages.push(format!(
                "target row {}: type must be floor or goal, got {:?}",
                row.row_number, row.target_type
            ));
            continue;
        };
        let Some(value) = row.value else {
            messages.push(format!("target row {}: missing value", row.row_number));
            continue;
        };
        if value < 0.0 {
            messages.push(format!(
                "target row {}: value must be >= 0, got {value}",
                row.row_number
            ));
            continue;
        }
        if let Some(valid) = valid_kpi_keys {
            if !valid.contains(&row.kpi_key) {
                messages.push(format!(
                    "target row {}: unknown kpi key {}",
                    row.row_number, row.kpi_key
                ));
                continue;
            }
        }

        let dimension = row.dimension.clone().unwrap_or_else(|| ALL.to_string());
        let dimension_key = row.dimension_key.clone().unwrap_or_else(|| ALL.to_string());
        apply_kind(
            set,
            ConstraintKind::Target {
                dimension,
                dimension_key,
                kpi_key: row.kpi_key.clone(),
                spec: TargetSpec {
                    target_type,
                    value,
                    notes: row.notes.clone(),
                },
            },
            row.row_number,
            &mut messages,
        );
    }

    (sets, messages)
}

/// Fold one parsed constraint into its bucket, deduplicating by natural key.
fn apply_kind(
    set: &mut ConstraintSetCompiled,
    kind: ConstraintKind,
    row_number: usize,
    messages: &mut Vec<String>,
) {
    match kind {
        ConstraintKind::CapacityFloor { dimension, dimension_key, tokens } => {
            let slot = set.capacity_floors.entry(dimension.clone()).or_default();
            if slot.contains_key(&dimension_key) {
                messages.push(format!(
                    "constraint row {row_number}: duplicate capacity_floor for ({dimension}, {dimension_key})"
                ));
            } else {
                slot.insert(dimension_key, tokens);
            }
        }
        ConstraintKind::CapacityCap { dimension, dimension_key, tokens } => {
            let slot = set.capacity_caps.entry(dimension.clone()).or_default();
            if slot.contains_key(&dimension_key) {
                messages.push(format!(
                    "constraint row {row_number}: duplicate capacity_cap for ({dimension}, {dimension_key})"
                ));
            } else {
                slot.insert(dimension_key, tokens);
            }
        }
        ConstraintKind::Mandatory { initiative_key } => {
            set.mandatory.insert(initiative_key);
        }
        ConstraintKind::ExclusionInitiative { initiative_key } => {
            set.exclusion_initiatives.insert(initiative_key);
        }
        ConstraintKind::ExclusionPair { a, b } => {
            let pair = if a <= b { (a, b) } else { (b, a) };
            if !set.exclusion_pairs.contains(&pair) {
                set.exclusion_pairs.push(pair);
            }
        }
        ConstraintKind::Bundle { name, members } => {
            if !set.bundles.iter().any(|b| b.members == members) {
                set.bundles.push(Bundle { name, members });
            }
        }
        ConstraintKind::Prerequisite { dependent, requires } => {
            let slot = set.prerequisites.entry(dependent).or_default();
            for requirement in requires {
                if !slot.contains(&requirement) {
                    slot.push(requirement);
                }
            }
            slot.sort();
        }
        ConstraintKind::SynergyBonus { members, bonus } => {
            set.synergy_bonuses.push(SynergyBonus { members, bonus });
        }
        ConstraintKind::Target { dimension, dimension_key, kpi_key, spec } => {
            set.targets
                .entry(dimension)
                .or_default()
                .entry(dimension_key)
                .or_default()
                .insert(kpi_key, spec);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(kind: &str) -> RawConstraintRow {
        RawConstraintRow {
            row_number: 4,
            scenario_name: "Q1-Growth".to_string(),
            constraint_set_name: "base".to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn groups_by_scenario_and_set() {
        let mut a = row("mandatory");
        a.members = vec!["INIT-000001".to_string()];
        let mut b = row("mandatory");
        b.constraint_set_name = "stretch".to_string();
        b.members = vec!["INIT-000002".to_string()];

        let (sets, messages) = compile_constraints(&[a, b], &[], None);
        assert_eq!(sets.len(), 2);
        assert!(messages.is_empty());
        assert!(sets[&("Q1-Growth".to_string(), "base".to_string())]
            .mandatory
            .contains("INIT-000001"));
    }

    #[test]
    fn capacity_rows_dedupe_with_message() {
        let mut first = row("capacity_floor");
        first.dimension = Some("country".to_string());
        first.dimension_key = Some("UK".to_string());
        first.value = Some(30.0);
        let mut duplicate = first.clone();
        duplicate.row_number = 5;
        duplicate.value = Some(99.0);

        let (sets, messages) = compile_constraints(&[first, duplicate], &[], None);
        let set = &sets[&("Q1-Growth".to_string(), "base".to_string())];
        assert_eq!(set.capacity_floors["country"]["UK"], 30);
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("duplicate"));
    }

    #[test]
    fn exclusion_pairs_normalize_and_reject_self() {
        let mut ab = row("exclusion_pair");
        ab.members = vec!["INIT-000002".to_string(), "INIT-000001".to_string()];
        let mut ba = row("exclusion_pair");
        ba.members = vec!["INIT-000001".to_string(), "INIT-000002".to_string()];
        let mut aa = row("exclusion_pair");
        aa.members = vec!["INIT-000001".to_string(), "INIT-000001".to_string()];

        let (sets, messages) = compile_constraints(&[ab, ba, aa], &[], None);
        let set = &sets[&("Q1-Growth".to_string(), "base".to_string())];
        assert_eq!(
            set.exclusion_pairs,
            vec![("INIT-000001".to_string(), "INIT-000002".to_string())]
        );
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("illegal"));
    }

    #[test]
    fn prerequisites_merge_as_sets() {
        let mut first = row("prerequisite");
        first.members = vec![
            "INIT-000003".to_string(),
            "INIT-000001".to_string(),
        ];
        let mut second = row("prerequisite");
        second.dimension_key = Some("INIT-000003".to_string());
        second.members = vec!["INIT-000002".to_string(), "INIT-000001".to_string()];

        let (sets, _) = compile_constraints(&[first, second], &[], None);
        let set = &sets[&("Q1-Growth".to_string(), "base".to_string())];
        assert_eq!(
            set.prerequisites["INIT-000003"],
            vec!["INIT-000001".to_string(), "INIT-000002".to_string()]
        );
    }

    #[test]
    fn small_bundles_and_synergies_are_rejected() {
        let mut bundle = row("bundle");
        bundle.members = vec!["INIT-000001".to_string()];
        let mut synergy = row("synergy_bonus");
        synergy.members = vec!["INIT-000001".to_string()];
        synergy.bonus = Some(5.0);

        let (sets, messages) = compile_constraints(&[bundle, synergy], &[], None);
        let set = &sets[&("Q1-Growth".to_string(), "base".to_string())];
        assert!(set.bundles.is_empty());
        assert!(set.synergy_bonuses.is_empty());
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn targets_nest_and_validate() {
        let targets = vec![
            RawTargetRow {
                row_number: 4,
                scenario_name: "Q1-Growth".to_string(),
                constraint_set_name: "base".to_string(),
                dimension: None,
                dimension_key: None,
                kpi_key: "revenue".to_string(),
                target_type: "floor".to_string(),
                value: Some(1000.0),
                notes: None,
            },
            RawTargetRow {
                row_number: 5,
                scenario_name: "Q1-Growth".to_string(),
                constraint_set_name: "base".to_string(),
                dimension: Some("country".to_string()),
                dimension_key: Some("UK".to_string()),
                kpi_key: "revenue".to_string(),
                target_type: "goal".to_string(),
                value: Some(400.0),
                notes: None,
            },
            RawTargetRow {
                row_number: 6,
                scenario_name: "Q1-Growth".to_string(),
                constraint_set_name: "base".to_string(),
                dimension: None,
                dimension_key: None,
                kpi_key: "ghost".to_string(),
                target_type: "floor".to_string(),
                value: Some(-1.0),
                notes: None,
            },
        ];
        let valid: HashSet<String> = ["revenue".to_string()].into_iter().collect();

        let (sets, messages) = compile_constraints(&[], &targets, Some(&valid));
        let set = &sets[&("Q1-Growth".to_string(), "base".to_string())];
        assert_eq!(set.unscoped_target("revenue").unwrap().value, 1000.0);
        assert_eq!(set.targets["country"]["UK"]["revenue"].target_type, TargetType::Goal);
        assert_eq!(set.max_target_value("revenue"), Some(1000.0));
        // The ghost row fails on the negative value first.
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn compiled_sets_serialize_round_trip() {
        let mut mandatory = row("mandatory");
        mandatory.members = vec!["INIT-000001".to_string()];
        let (sets, _) = compile_constraints(&[mandatory], &[], None);
        let set = &sets[&("Q1-Growth".to_string(), "base".to_string())];

        let json = serde_json::to_string(set).unwrap();
        let back: ConstraintSetCompiled = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, set);
    }
}
