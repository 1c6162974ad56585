//! Add/change/destroy counting.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{PlanReport, field, type_name};
use crate::error::{HarnessError, HarnessResult};

/// Classified action of one resource change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    NoOp,
    Read,
    Create,
    Update,
    Delete,
    /// Destroyed and recreated. `create_before_destroy` records the order.
    Replace { create_before_destroy: bool },
    /// Removed from state without destroying the real object.
    Forget,
}

impl ChangeAction {
    /// Classify the engine's `change.actions` list.
    pub fn from_actions(actions: &[&str]) -> Option<Self> {
        let action = match actions {
            ["no-op"] => Self::NoOp,
            ["read"] => Self::Read,
            ["create"] => Self::Create,
            ["update"] => Self::Update,
            ["delete"] => Self::Delete,
            ["delete", "create"] => Self::Replace {
                create_before_destroy: false,
            },
            ["create", "delete"] => Self::Replace {
                create_before_destroy: true,
            },
            ["forget"] => Self::Forget,
            _ => return None,
        };
        Some(action)
    }

    pub fn adds(&self) -> bool {
        matches!(self, Self::Create | Self::Replace { .. })
    }

    pub fn changes(&self) -> bool {
        matches!(self, Self::Update)
    }

    pub fn destroys(&self) -> bool {
        matches!(self, Self::Delete | Self::Replace { .. })
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::NoOp => "no-op",
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Replace {
                create_before_destroy: false,
            } => "delete-then-create",
            Self::Replace {
                create_before_destroy: true,
            } => "create-then-delete",
            Self::Forget => "forget",
        };
        write!(f, "{label}")
    }
}

/// Resources to add, change and destroy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub add: u32,
    pub change: u32,
    pub destroy: u32,
}

impl PlanSummary {
    pub fn new(add: u32, change: u32, destroy: u32) -> Self {
        Self {
            add,
            change,
            destroy,
        }
    }

    /// True when nothing would be added, changed or destroyed.
    pub fn is_empty(&self) -> bool {
        self.add == 0 && self.change == 0 && self.destroy == 0
    }

    fn record(&mut self, action: ChangeAction) {
        if action.adds() {
            self.add += 1;
        }
        if action.changes() {
            self.change += 1;
        }
        if action.destroys() {
            self.destroy += 1;
        }
    }

    /// Parse the summary line of human-readable `plan`, `apply` or `destroy`
    /// output.
    pub fn parse_from_output(output: &str) -> HarnessResult<Self> {
        let output = ANSI_ESCAPE.replace_all(output, "");

        if let Some(caps) = PLAN_LINE.captures(&output) {
            return Ok(Self::new(
                capture_u32(&caps, 1)?,
                capture_u32(&caps, 2)?,
                capture_u32(&caps, 3)?,
            ));
        }
        if let Some(caps) = APPLY_LINE.captures(&output) {
            return Ok(Self::new(
                capture_u32(&caps, 1)?,
                capture_u32(&caps, 2)?,
                capture_u32(&caps, 3)?,
            ));
        }
        if let Some(caps) = DESTROY_LINE.captures(&output) {
            return Ok(Self::new(0, 0, capture_u32(&caps, 1)?));
        }
        if NO_CHANGES_LINE.is_match(&output) {
            return Ok(Self::default());
        }

        Err(HarnessError::malformed(
            "no resource summary line found in engine output",
        ))
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").expect("valid regex"));
static PLAN_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Plan: (?:\d+ to import, )?(\d+) to add, (\d+) to change, (\d+) to destroy")
        .expect("valid regex")
});
static APPLY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"Apply complete! Resources: (?:\d+ imported, )?(\d+) added, (\d+) changed, (\d+) destroyed",
    )
    .expect("valid regex")
});
static DESTROY_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Destroy complete! Resources: (\d+) destroyed").expect("valid regex")
});
static NO_CHANGES_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*No changes\.").expect("valid regex"));

fn capture_u32(caps: &regex::Captures<'_>, idx: usize) -> HarnessResult<u32> {
    caps.get(idx)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| HarnessError::malformed("resource count out of range"))
}

/// One entry of the report's `resource_changes`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceChange {
    pub address: String,
    pub module_address: Option<String>,
    pub action: ChangeAction,
    /// Planned attribute values after the change, `Null` when unknown or
    /// the resource is being deleted.
    pub after: Value,
}

impl ResourceChange {
    fn from_value(entry: &Value, position: usize) -> HarnessResult<Self> {
        let Some(address) = field(entry, "address").and_then(Value::as_str) else {
            return Err(HarnessError::malformed(format!(
                "resource_changes[{position}] has no address"
            )));
        };
        let Some(change) = field(entry, "change") else {
            return Err(HarnessError::malformed(format!(
                "resource change {address} has no change block"
            )));
        };
        let Some(actions) = field(change, "actions").and_then(Value::as_array) else {
            return Err(HarnessError::malformed(format!(
                "resource change {address} has no actions list"
            )));
        };

        let mut tags = Vec::with_capacity(actions.len());
        for action in actions {
            let Some(tag) = action.as_str() else {
                return Err(HarnessError::malformed(format!(
                    "resource change {address} has a {} action tag",
                    type_name(action)
                )));
            };
            tags.push(tag);
        }

        let Some(action) = ChangeAction::from_actions(&tags) else {
            return Err(HarnessError::malformed(format!(
                "resource change {address} has unknown actions {tags:?}"
            )));
        };

        Ok(Self {
            address: address.to_string(),
            module_address: field(entry, "module_address")
                .and_then(Value::as_str)
                .map(str::to_string),
            action,
            after: field(change, "after").cloned().unwrap_or(Value::Null),
        })
    }
}

fn change_entries(report: &PlanReport) -> HarnessResult<&[Value]> {
    match field(report.value(), "resource_changes") {
        None => Ok(&[]),
        Some(Value::Array(entries)) => Ok(entries),
        Some(other) => Err(HarnessError::malformed(format!(
            "resource_changes must be an array, got {}",
            type_name(other)
        ))),
    }
}

/// Count planned changes across every resource, nested modules included.
///
/// A replacement counts toward both `add` and `destroy`, never `change`.
/// Reads, no-ops and forgets count toward nothing.
pub fn count_resources(report: &PlanReport) -> HarnessResult<PlanSummary> {
    let mut summary = PlanSummary::default();
    for (position, entry) in change_entries(report)?.iter().enumerate() {
        let change = ResourceChange::from_value(entry, position)?;
        summary.record(change.action);
    }
    Ok(summary)
}

/// Classified change for every resource, keyed by address.
pub fn resource_changes(report: &PlanReport) -> HarnessResult<BTreeMap<String, ResourceChange>> {
    let mut changes = BTreeMap::new();
    for (position, entry) in change_entries(report)?.iter().enumerate() {
        let change = ResourceChange::from_value(entry, position)?;
        changes.insert(change.address.clone(), change);
    }
    Ok(changes)
}
