//! Plan inspection.
//!
//! The plan report is the engine's JSON plan document, whose shape is owned
//! by the engine. It is held as a [`serde_json::Value`] and navigated with
//! presence-checked accessors only: an absent or null field means "nothing
//! there", and only a field that must exist for the answer to be meaningful
//! turns into [`HarnessError::MalformedPlanReport`].

mod summary;
mod values;

use serde_json::Value;

use crate::error::{HarnessError, HarnessResult};

pub use summary::{ChangeAction, PlanSummary, ResourceChange, count_resources, resource_changes};
pub use values::{
    AttributeLookup, PlannedResource, PlannedResources, extract_planned_values, lookup_attribute,
};

/// A parsed plan document.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanReport {
    raw: Value,
}

impl PlanReport {
    /// Parse the output of `terraform show -json <planfile>`.
    pub fn from_json(json: &str) -> HarnessResult<Self> {
        let raw: Value = serde_json::from_str(json)
            .map_err(|e| HarnessError::malformed(format!("plan is not valid JSON: {e}")))?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> HarnessResult<Self> {
        if !raw.is_object() {
            return Err(HarnessError::malformed(format!(
                "plan root must be an object, got {}",
                type_name(&raw)
            )));
        }
        Ok(Self { raw })
    }

    /// The underlying document.
    pub fn value(&self) -> &Value {
        &self.raw
    }

    pub fn format_version(&self) -> Option<&str> {
        field(&self.raw, "format_version").and_then(Value::as_str)
    }

    pub fn terraform_version(&self) -> Option<&str> {
        field(&self.raw, "terraform_version").and_then(Value::as_str)
    }

    pub fn count_resources(&self) -> HarnessResult<PlanSummary> {
        count_resources(self)
    }

    pub fn planned_values(&self) -> HarnessResult<PlannedResources> {
        extract_planned_values(self)
    }

    /// Planned value of a root module output, if the plan knows it.
    pub fn planned_output(&self, name: &str) -> Option<&Value> {
        field(&self.raw, "planned_values")
            .and_then(|planned| field(planned, "outputs"))
            .and_then(|outputs| field(outputs, name))
            .and_then(|output| field(output, "value"))
    }
}

/// `value[key]`, treating an explicit null the same as an absent key.
pub(crate) fn field<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    value.get(key).filter(|v| !v.is_null())
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
