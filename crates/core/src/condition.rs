//! Declarative automation condition trees.
//!
//! A tree is built once, when definitions load, and never mutated. Every
//! node carries a structural id computed at construction from its kind,
//! parameters and children's ids, so equal trees get equal ids across
//! processes and restarts.
//!
//! Trees compose with `&`, `|` and `!`:
//!
//! ```
//! use tickwise_core::AutomationCondition as C;
//!
//! let condition = C::missing() & !C::in_progress();
//! assert_eq!(condition.name(), "and");
//! ```

use crate::id::ConditionId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Node kinds: leaf operands and composite combinators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionKind {
    /// The entity's code version differs from the one seen last tick.
    CodeVersionChanged,
    /// First evaluation under the current partition-space representation.
    InitialEvaluation,
    /// Partitions never materialized or observed.
    Missing,
    /// Partitions targeted by an in-progress run.
    RunInProgress,
    /// Partitions targeted by an in-progress backfill.
    BackfillInProgress,
    /// Partitions whose latest run failed.
    ExecutionFailed,
    /// Partitions another entity already requested this tick.
    WillBeRequested,
    /// Partitions requested on the previous tick.
    NewlyRequested,
    /// Partitions whose latest run also targeted the root entity.
    ExecutedWithRootTarget,
    /// Partitions whose latest run carried matching tags.
    ExecutedWithTags {
        /// Tag keys that must be present
        #[serde(default)]
        tag_keys: Option<BTreeSet<String>>,
        /// Tags that must match exactly
        #[serde(default)]
        tag_values: Option<BTreeMap<String, String>>,
    },
    /// Partitions with a new event since the previous tick.
    NewlyUpdated,
    /// Partitions whose data version changed since the previous tick.
    DataVersionChanged,
    /// A cron boundary passed since the previous tick.
    CronTickPassed {
        /// Five-field cron expression
        cron_schedule: String,
        /// IANA timezone name
        cron_timezone: String,
    },
    /// Partitions in the latest time window.
    InLatestTimeWindow {
        /// Widen the window backward by this many seconds
        #[serde(default)]
        lookback_seconds: Option<i64>,
    },
    /// Check partitions whose latest evaluation passed (or failed).
    CheckResult {
        /// Match passing (`true`) or failing (`false`) evaluations
        passed: bool,
    },
    /// Intersection of operands, evaluated left to right.
    And {
        /// Operands
        operands: Vec<AutomationCondition>,
    },
    /// Union of operands.
    Or {
        /// Operands
        operands: Vec<AutomationCondition>,
    },
    /// Candidate minus the operand.
    Not {
        /// Operand
        operand: Box<AutomationCondition>,
    },
    /// True once `trigger` fires, until `reset` fires.
    Since {
        /// Sets the state
        trigger: Box<AutomationCondition>,
        /// Clears the state
        reset: Box<AutomationCondition>,
    },
    /// True where the operand just became true.
    NewlyTrue {
        /// Operand
        operand: Box<AutomationCondition>,
    },
    /// Operand true for any parent entity.
    AnyDepsMatch {
        /// Operand, evaluated once per parent
        operand: Box<AutomationCondition>,
    },
    /// Operand true for every parent entity.
    AllDepsMatch {
        /// Operand, evaluated once per parent
        operand: Box<AutomationCondition>,
    },
    /// Transparent labelled wrapper.
    Named {
        /// Display label
        label: String,
        /// Wrapped condition
        operand: Box<AutomationCondition>,
    },
}

/// An immutable condition tree node with its structural id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ConditionKind", into = "ConditionKind")]
pub struct AutomationCondition {
    kind: ConditionKind,
    unique_id: ConditionId,
}

impl From<ConditionKind> for AutomationCondition {
    fn from(kind: ConditionKind) -> Self {
        Self::new(kind)
    }
}

impl From<AutomationCondition> for ConditionKind {
    fn from(condition: AutomationCondition) -> Self {
        condition.kind
    }
}

impl AutomationCondition {
    /// Build a node, computing its id.
    pub fn new(kind: ConditionKind) -> Self {
        let unique_id = structural_id(&kind);
        Self { kind, unique_id }
    }

    /// Node kind.
    pub fn kind(&self) -> &ConditionKind {
        &self.kind
    }

    /// Structural id, used as the cursor key.
    pub fn unique_id(&self) -> &ConditionId {
        &self.unique_id
    }

    /// Short machine name of this node.
    pub fn name(&self) -> String {
        match &self.kind {
            ConditionKind::CodeVersionChanged => "code_version_changed".into(),
            ConditionKind::InitialEvaluation => "initial_evaluation".into(),
            ConditionKind::Missing => "missing".into(),
            ConditionKind::RunInProgress => "run_in_progress".into(),
            ConditionKind::BackfillInProgress => "backfill_in_progress".into(),
            ConditionKind::ExecutionFailed => "execution_failed".into(),
            ConditionKind::WillBeRequested => "will_be_requested".into(),
            ConditionKind::NewlyRequested => "newly_requested".into(),
            ConditionKind::ExecutedWithRootTarget => "executed_with_root_target".into(),
            ConditionKind::ExecutedWithTags {
                tag_keys,
                tag_values,
            } => {
                let mut props = Vec::new();
                if let Some(keys) = tag_keys {
                    let keys: Vec<&str> = keys.iter().map(String::as_str).collect();
                    props.push(format!("tag_keys={{{}}}", keys.join(",")));
                }
                if let Some(values) = tag_values {
                    let values: Vec<String> =
                        values.iter().map(|(k, v)| format!("{k}:{v}")).collect();
                    props.push(format!("tag_values={{{}}}", values.join(",")));
                }
                if props.is_empty() {
                    "executed_with_tags".into()
                } else {
                    format!("executed_with_tags({})", props.join(", "))
                }
            }
            ConditionKind::NewlyUpdated => "newly_updated".into(),
            ConditionKind::DataVersionChanged => "data_version_changed".into(),
            ConditionKind::CronTickPassed {
                cron_schedule,
                cron_timezone,
            } => format!(
                "cron_tick_passed(cron_schedule={cron_schedule}, cron_timezone={cron_timezone})"
            ),
            ConditionKind::InLatestTimeWindow { lookback_seconds } => match lookback_seconds {
                Some(secs) => format!("in_latest_time_window(lookback_seconds={secs})"),
                None => "in_latest_time_window".into(),
            },
            ConditionKind::CheckResult { passed: true } => "check_passed".into(),
            ConditionKind::CheckResult { passed: false } => "check_failed".into(),
            ConditionKind::And { .. } => "and".into(),
            ConditionKind::Or { .. } => "or".into(),
            ConditionKind::Not { .. } => "not".into(),
            ConditionKind::Since { .. } => "since".into(),
            ConditionKind::NewlyTrue { .. } => "newly_true".into(),
            ConditionKind::AnyDepsMatch { .. } => "any_deps_match".into(),
            ConditionKind::AllDepsMatch { .. } => "all_deps_match".into(),
            ConditionKind::Named { label, .. } => label.clone(),
        }
    }

    /// Direct children, in evaluation order.
    pub fn children(&self) -> Vec<&AutomationCondition> {
        match &self.kind {
            ConditionKind::And { operands } | ConditionKind::Or { operands } => {
                operands.iter().collect()
            }
            ConditionKind::Not { operand }
            | ConditionKind::NewlyTrue { operand }
            | ConditionKind::AnyDepsMatch { operand }
            | ConditionKind::AllDepsMatch { operand }
            | ConditionKind::Named { operand, .. } => vec![operand.as_ref()],
            ConditionKind::Since { trigger, reset } => vec![trigger.as_ref(), reset.as_ref()],
            _ => Vec::new(),
        }
    }

    /// Whether evaluating this tree reads results other entities publish
    /// during the same tick.
    pub fn reads_same_tick_results(&self) -> bool {
        matches!(self.kind, ConditionKind::WillBeRequested)
            || self.children().into_iter().any(Self::reads_same_tick_results)
    }

    // === Operands ===

    /// See [`ConditionKind::CodeVersionChanged`].
    pub fn code_version_changed() -> Self {
        Self::new(ConditionKind::CodeVersionChanged)
    }

    /// See [`ConditionKind::InitialEvaluation`].
    pub fn initial_evaluation() -> Self {
        Self::new(ConditionKind::InitialEvaluation)
    }

    /// See [`ConditionKind::Missing`].
    pub fn missing() -> Self {
        Self::new(ConditionKind::Missing)
    }

    /// See [`ConditionKind::RunInProgress`].
    pub fn run_in_progress() -> Self {
        Self::new(ConditionKind::RunInProgress)
    }

    /// See [`ConditionKind::BackfillInProgress`].
    pub fn backfill_in_progress() -> Self {
        Self::new(ConditionKind::BackfillInProgress)
    }

    /// See [`ConditionKind::ExecutionFailed`].
    pub fn execution_failed() -> Self {
        Self::new(ConditionKind::ExecutionFailed)
    }

    /// See [`ConditionKind::WillBeRequested`].
    pub fn will_be_requested() -> Self {
        Self::new(ConditionKind::WillBeRequested)
    }

    /// See [`ConditionKind::NewlyRequested`].
    pub fn newly_requested() -> Self {
        Self::new(ConditionKind::NewlyRequested)
    }

    /// See [`ConditionKind::ExecutedWithRootTarget`].
    pub fn executed_with_root_target() -> Self {
        Self::new(ConditionKind::ExecutedWithRootTarget)
    }

    /// See [`ConditionKind::ExecutedWithTags`].
    pub fn executed_with_tags(
        tag_keys: Option<BTreeSet<String>>,
        tag_values: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self::new(ConditionKind::ExecutedWithTags {
            tag_keys,
            tag_values,
        })
    }

    /// See [`ConditionKind::NewlyUpdated`].
    pub fn newly_updated() -> Self {
        Self::new(ConditionKind::NewlyUpdated)
    }

    /// See [`ConditionKind::DataVersionChanged`].
    pub fn data_version_changed() -> Self {
        Self::new(ConditionKind::DataVersionChanged)
    }

    /// See [`ConditionKind::CronTickPassed`].
    pub fn cron_tick_passed(cron_schedule: impl Into<String>, cron_timezone: impl Into<String>) -> Self {
        Self::new(ConditionKind::CronTickPassed {
            cron_schedule: cron_schedule.into(),
            cron_timezone: cron_timezone.into(),
        })
    }

    /// See [`ConditionKind::InLatestTimeWindow`].
    pub fn in_latest_time_window(lookback: Option<chrono::Duration>) -> Self {
        Self::new(ConditionKind::InLatestTimeWindow {
            lookback_seconds: lookback.map(|d| d.num_seconds()),
        })
    }

    /// See [`ConditionKind::CheckResult`].
    pub fn check_passed() -> Self {
        Self::new(ConditionKind::CheckResult { passed: true })
    }

    /// See [`ConditionKind::CheckResult`].
    pub fn check_failed() -> Self {
        Self::new(ConditionKind::CheckResult { passed: false })
    }

    // === Combinators ===

    /// Intersection of all operands.
    pub fn all(operands: Vec<AutomationCondition>) -> Self {
        Self::new(ConditionKind::And { operands })
    }

    /// Union of all operands.
    pub fn any(operands: Vec<AutomationCondition>) -> Self {
        Self::new(ConditionKind::Or { operands })
    }

    /// True from when `self` fires until `reset` fires.
    pub fn since(self, reset: AutomationCondition) -> Self {
        Self::new(ConditionKind::Since {
            trigger: Box::new(self),
            reset: Box::new(reset),
        })
    }

    /// True where `self` just became true.
    pub fn newly_true(self) -> Self {
        Self::new(ConditionKind::NewlyTrue {
            operand: Box::new(self),
        })
    }

    /// `operand` true for any parent.
    pub fn any_deps_match(operand: AutomationCondition) -> Self {
        Self::new(ConditionKind::AnyDepsMatch {
            operand: Box::new(operand),
        })
    }

    /// `operand` true for every parent.
    pub fn all_deps_match(operand: AutomationCondition) -> Self {
        Self::new(ConditionKind::AllDepsMatch {
            operand: Box::new(operand),
        })
    }

    /// Attach a display label.
    pub fn with_label(self, label: impl Into<String>) -> Self {
        Self::new(ConditionKind::Named {
            label: label.into(),
            operand: Box::new(self),
        })
    }

    /// Label of a `Named` node.
    pub fn label(&self) -> Option<&str> {
        match &self.kind {
            ConditionKind::Named { label, .. } => Some(label),
            _ => None,
        }
    }

    // === Built-in policies ===

    /// A run or a backfill is in progress.
    pub fn in_progress() -> Self {
        (Self::run_in_progress() | Self::backfill_in_progress()).with_label("in_progress")
    }

    /// Just became missing.
    pub fn newly_missing() -> Self {
        Self::missing().newly_true().with_label("newly_missing")
    }

    /// Any parent updated or about to be requested.
    pub fn any_deps_updated() -> Self {
        Self::any_deps_match(Self::newly_updated() | Self::will_be_requested())
            .with_label("any_deps_updated")
    }

    /// Any parent missing and not about to be requested.
    pub fn any_deps_missing() -> Self {
        Self::any_deps_match(Self::missing() & !Self::will_be_requested())
            .with_label("any_deps_missing")
    }

    /// Any parent in progress.
    pub fn any_deps_in_progress() -> Self {
        Self::any_deps_match(Self::in_progress()).with_label("any_deps_in_progress")
    }

    /// Requested, updated, or never evaluated before.
    pub fn handled() -> Self {
        (Self::newly_requested() | Self::newly_updated() | Self::initial_evaluation())
            .with_label("handled")
    }

    /// Request whenever missing or a parent updates, once parents are settled.
    pub fn eager() -> Self {
        (Self::in_latest_time_window(None)
            & (Self::newly_missing() | Self::any_deps_updated())
                .since(Self::handled())
                .with_label("newly_missing_or_any_deps_updated_since_last_handled")
            & !Self::any_deps_missing()
            & !Self::any_deps_in_progress()
            & !Self::in_progress())
        .with_label("eager")
    }

    /// Request once when newly missing, once parents are settled.
    pub fn on_missing() -> Self {
        (Self::in_latest_time_window(None)
            & Self::newly_missing()
                .since(Self::handled())
                .with_label("newly_missing_since_last_handled")
            & !Self::any_deps_missing()
            & !Self::any_deps_in_progress()
            & !Self::in_progress())
        .with_label("on_missing")
    }

    /// Request on each cron tick once every parent has updated since it.
    pub fn on_cron(cron_schedule: impl Into<String>, cron_timezone: impl Into<String>) -> Self {
        let cron_schedule = cron_schedule.into();
        let cron_timezone = cron_timezone.into();
        let tick = || Self::cron_tick_passed(cron_schedule.clone(), cron_timezone.clone());

        let all_deps_updated_since_cron = Self::all_deps_match(
            Self::newly_updated().since(tick()) | Self::will_be_requested(),
        )
        .with_label("all_deps_updated_since_cron");

        (Self::in_latest_time_window(None)
            & tick().since(Self::handled()).with_label("cron_tick_passed_since_last_handled")
            & all_deps_updated_since_cron)
            .with_label("on_cron")
    }
}

impl std::ops::BitAnd for AutomationCondition {
    type Output = AutomationCondition;

    /// Flattens into an existing unlabelled `And`.
    fn bitand(self, rhs: Self) -> Self::Output {
        match self.kind {
            ConditionKind::And { mut operands } => {
                operands.push(rhs);
                Self::all(operands)
            }
            kind => Self::all(vec![Self::new(kind), rhs]),
        }
    }
}

impl std::ops::BitOr for AutomationCondition {
    type Output = AutomationCondition;

    /// Flattens into an existing unlabelled `Or`.
    fn bitor(self, rhs: Self) -> Self::Output {
        match self.kind {
            ConditionKind::Or { mut operands } => {
                operands.push(rhs);
                Self::any(operands)
            }
            kind => Self::any(vec![Self::new(kind), rhs]),
        }
    }
}

impl std::ops::Not for AutomationCondition {
    type Output = AutomationCondition;

    fn not(self) -> Self::Output {
        Self::new(ConditionKind::Not {
            operand: Box::new(self),
        })
    }
}

/// Length-prefixed write so adjacent fields cannot collide.
fn write_field(hasher: &mut blake3::Hasher, bytes: &[u8]) {
    hasher.update(&(bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn structural_id(kind: &ConditionKind) -> ConditionId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"condition:");

    // Kind tag, then parameters in canonical order, then children ids.
    let tag = match kind {
        ConditionKind::CodeVersionChanged => "code_version_changed",
        ConditionKind::InitialEvaluation => "initial_evaluation",
        ConditionKind::Missing => "missing",
        ConditionKind::RunInProgress => "run_in_progress",
        ConditionKind::BackfillInProgress => "backfill_in_progress",
        ConditionKind::ExecutionFailed => "execution_failed",
        ConditionKind::WillBeRequested => "will_be_requested",
        ConditionKind::NewlyRequested => "newly_requested",
        ConditionKind::ExecutedWithRootTarget => "executed_with_root_target",
        ConditionKind::ExecutedWithTags { .. } => "executed_with_tags",
        ConditionKind::NewlyUpdated => "newly_updated",
        ConditionKind::DataVersionChanged => "data_version_changed",
        ConditionKind::CronTickPassed { .. } => "cron_tick_passed",
        ConditionKind::InLatestTimeWindow { .. } => "in_latest_time_window",
        ConditionKind::CheckResult { .. } => "check_result",
        ConditionKind::And { .. } => "and",
        ConditionKind::Or { .. } => "or",
        ConditionKind::Not { .. } => "not",
        ConditionKind::Since { .. } => "since",
        ConditionKind::NewlyTrue { .. } => "newly_true",
        ConditionKind::AnyDepsMatch { .. } => "any_deps_match",
        ConditionKind::AllDepsMatch { .. } => "all_deps_match",
        ConditionKind::Named { .. } => "named",
    };
    write_field(&mut hasher, tag.as_bytes());

    match kind {
        ConditionKind::ExecutedWithTags {
            tag_keys,
            tag_values,
        } => {
            match tag_keys {
                Some(keys) => {
                    write_field(&mut hasher, b"keys");
                    for key in keys {
                        write_field(&mut hasher, key.as_bytes());
                    }
                }
                None => write_field(&mut hasher, b"no_keys"),
            }
            match tag_values {
                Some(values) => {
                    write_field(&mut hasher, b"values");
                    for (key, value) in values {
                        write_field(&mut hasher, key.as_bytes());
                        write_field(&mut hasher, value.as_bytes());
                    }
                }
                None => write_field(&mut hasher, b"no_values"),
            }
        }
        ConditionKind::CronTickPassed {
            cron_schedule,
            cron_timezone,
        } => {
            write_field(&mut hasher, cron_schedule.as_bytes());
            write_field(&mut hasher, cron_timezone.as_bytes());
        }
        ConditionKind::InLatestTimeWindow { lookback_seconds } => match lookback_seconds {
            Some(secs) => write_field(&mut hasher, &secs.to_le_bytes()),
            None => write_field(&mut hasher, b"none"),
        },
        ConditionKind::CheckResult { passed } => write_field(&mut hasher, &[u8::from(*passed)]),
        ConditionKind::Named { label, .. } => write_field(&mut hasher, label.as_bytes()),
        _ => {}
    }

    let children: Vec<&AutomationCondition> = match kind {
        ConditionKind::And { operands } | ConditionKind::Or { operands } => operands.iter().collect(),
        ConditionKind::Not { operand }
        | ConditionKind::NewlyTrue { operand }
        | ConditionKind::AnyDepsMatch { operand }
        | ConditionKind::AllDepsMatch { operand }
        | ConditionKind::Named { operand, .. } => vec![operand],
        ConditionKind::Since { trigger, reset } => vec![trigger, reset],
        _ => Vec::new(),
    };
    hasher.update(&(children.len() as u64).to_le_bytes());
    for child in children {
        write_field(&mut hasher, child.unique_id().as_str().as_bytes());
    }

    ConditionId::from_hash(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use AutomationCondition as C;

    #[test]
    fn test_ids_are_structural() {
        assert_eq!(C::missing().unique_id(), C::missing().unique_id());
        assert_ne!(C::missing().unique_id(), C::newly_updated().unique_id());
        assert_eq!(
            (C::missing() & C::newly_updated()).unique_id(),
            (C::missing() & C::newly_updated()).unique_id()
        );
    }

    #[test]
    fn test_ids_depend_on_order_and_params() {
        assert_ne!(
            (C::missing() & C::newly_updated()).unique_id(),
            (C::newly_updated() & C::missing()).unique_id()
        );
        assert_ne!(
            C::cron_tick_passed("0 0 * * *", "UTC").unique_id(),
            C::cron_tick_passed("0 0 * * *", "Europe/Berlin").unique_id()
        );
        assert_ne!(C::check_passed().unique_id(), C::check_failed().unique_id());
        assert_ne!(
            C::missing().with_label("a").unique_id(),
            C::missing().with_label("b").unique_id()
        );
    }

    #[test]
    fn test_operators_flatten() {
        let c = C::missing() & C::newly_updated() & C::code_version_changed();
        assert_eq!(c.children().len(), 3);
        let c = C::missing() | C::newly_updated() | C::code_version_changed();
        assert_eq!(c.children().len(), 3);
        assert_eq!((!C::missing()).name(), "not");
    }

    #[test]
    fn test_serde_recomputes_ids() {
        let condition = C::eager();
        let json = serde_json::to_string(&condition).unwrap();
        let back: AutomationCondition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.unique_id(), condition.unique_id());
        assert_eq!(back, condition);
    }

    #[test]
    fn test_same_tick_reads_detected() {
        assert!(C::eager().reads_same_tick_results());
        assert!(!(C::missing() & C::code_version_changed()).reads_same_tick_results());
    }

    #[test]
    fn test_names() {
        let tags = C::executed_with_tags(
            Some(["a".to_string(), "b".to_string()].into_iter().collect()),
            Some([("k".to_string(), "v".to_string())].into_iter().collect()),
        );
        assert_eq!(tags.name(), "executed_with_tags(tag_keys={a,b}, tag_values={k:v})");
        assert_eq!(C::eager().name(), "eager");
        assert_eq!(
            C::in_latest_time_window(Some(chrono::Duration::hours(1))).name(),
            "in_latest_time_window(lookback_seconds=3600)"
        );
    }
}
