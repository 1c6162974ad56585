//! Planned attribute values keyed by resource address.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use super::{PlanReport, field, type_name};
use crate::error::{HarnessError, HarnessResult};

/// One resource from `planned_values`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedResource {
    /// Fully-qualified address, e.g. `module.alb.aws_lb.example` or
    /// `aws_instance.web[0]`.
    pub address: String,
    pub mode: String,
    pub resource_type: String,
    pub name: String,
    /// `count` or `for_each` key, if any.
    pub index: Option<Value>,
    pub attributes: Map<String, Value>,
}

impl PlannedResource {
    fn from_value(resource: &Value, module: &str) -> HarnessResult<Self> {
        let Some(address) = field(resource, "address").and_then(Value::as_str) else {
            return Err(HarnessError::malformed(format!(
                "resource in {module} has no address"
            )));
        };

        let attributes = match field(resource, "values") {
            None => Map::new(),
            Some(Value::Object(values)) => values.clone(),
            Some(other) => {
                return Err(HarnessError::malformed(format!(
                    "values of {address} must be an object, got {}",
                    type_name(other)
                )));
            }
        };

        let text = |key: &str| {
            field(resource, key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Ok(Self {
            address: address.to_string(),
            mode: text("mode"),
            resource_type: text("type"),
            name: text("name"),
            index: field(resource, "index").cloned(),
            attributes,
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

/// Result of [`lookup_attribute`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttributeLookup<'a> {
    /// No resource with this address is planned.
    ResourceNotFound,
    /// The resource is planned but has no such attribute.
    AttributeNotFound,
    /// The attribute is present. The value may be `null`.
    Found(&'a Value),
}

impl<'a> AttributeLookup<'a> {
    pub fn is_found(&self) -> bool {
        matches!(self, Self::Found(_))
    }

    pub fn value(&self) -> Option<&'a Value> {
        match self {
            Self::Found(value) => Some(value),
            _ => None,
        }
    }

    /// The value as a string slice, if it is a string.
    pub fn as_str(&self) -> Option<&'a str> {
        self.value().and_then(Value::as_str)
    }
}

/// Planned resources keyed by fully-qualified address.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedResources {
    resources: BTreeMap<String, PlannedResource>,
}

impl PlannedResources {
    pub fn get(&self, address: &str) -> Option<&PlannedResource> {
        self.resources.get(address)
    }

    pub fn contains(&self, address: &str) -> bool {
        self.resources.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    pub fn addresses(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlannedResource> {
        self.resources.values()
    }

    pub fn lookup_attribute(&self, address: &str, name: &str) -> AttributeLookup<'_> {
        lookup_attribute(self, address, name)
    }

    fn insert(&mut self, resource: PlannedResource) -> HarnessResult<()> {
        if self.resources.contains_key(&resource.address) {
            return Err(HarnessError::malformed(format!(
                "duplicate planned resource address {}",
                resource.address
            )));
        }
        self.resources.insert(resource.address.clone(), resource);
        Ok(())
    }
}

/// Collect every planned resource from the root module and all nested child
/// modules.
pub fn extract_planned_values(report: &PlanReport) -> HarnessResult<PlannedResources> {
    let mut resources = PlannedResources::default();
    let Some(root) =
        field(report.value(), "planned_values").and_then(|planned| field(planned, "root_module"))
    else {
        return Ok(resources);
    };
    collect_module(root, "root_module", &mut resources)?;
    Ok(resources)
}

fn collect_module(
    module: &Value,
    module_address: &str,
    out: &mut PlannedResources,
) -> HarnessResult<()> {
    if !module.is_object() {
        return Err(HarnessError::malformed(format!(
            "module {module_address} must be an object, got {}",
            type_name(module)
        )));
    }

    if let Some(resources) = field(module, "resources") {
        let Some(resources) = resources.as_array() else {
            return Err(HarnessError::malformed(format!(
                "resources of {module_address} must be an array"
            )));
        };
        for resource in resources {
            out.insert(PlannedResource::from_value(resource, module_address)?)?;
        }
    }

    if let Some(children) = field(module, "child_modules") {
        let Some(children) = children.as_array() else {
            return Err(HarnessError::malformed(format!(
                "child_modules of {module_address} must be an array"
            )));
        };
        for child in children {
            let child_address = field(child, "address")
                .and_then(Value::as_str)
                .unwrap_or(module_address);
            collect_module(child, child_address, out)?;
        }
    }

    Ok(())
}

/// Look up one planned attribute, distinguishing a missing resource, a
/// missing attribute and a present (possibly null) value.
pub fn lookup_attribute<'a>(
    resources: &'a PlannedResources,
    address: &str,
    name: &str,
) -> AttributeLookup<'a> {
    let Some(resource) = resources.get(address) else {
        return AttributeLookup::ResourceNotFound;
    };
    match resource.attribute(name) {
        Some(value) => AttributeLookup::Found(value),
        None => AttributeLookup::AttributeNotFound,
    }
}
