//! Per-invocation provisioning options.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;

/// Default engine binary.
pub const DEFAULT_TERRAFORM_BINARY: &str = "terraform";

/// Default upper bound on a single engine command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(3600);

/// Variable names whose values are hidden in logged command lines.
const SENSITIVE_MARKERS: &[&str] = &["password", "secret", "token", "private_key", "access_key"];

/// Configuration root, input variables and environment for one test case.
///
/// Owned by a single test case and never shared. Namespacing of externally
/// visible resource names comes from the variables (see
/// [`crate::random::IdGenerator::namespaced`]).
///
/// Commands run in a private copy of the configuration unless
/// [`Self::in_place`] is set. When the configuration refers to sibling
/// modules by relative path, [`Self::with_copy_root`] names the ancestor to
/// copy along with it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningOptions {
    pub terraform_dir: PathBuf,
    pub vars: BTreeMap<String, Value>,
    pub env_vars: BTreeMap<String, String>,
    pub binary: String,
    pub command_timeout: Duration,
    pub no_color: bool,
    pub copy_root: Option<PathBuf>,
    pub in_place: bool,
}

impl ProvisioningOptions {
    pub fn new(terraform_dir: impl Into<PathBuf>) -> Self {
        Self {
            terraform_dir: terraform_dir.into(),
            vars: BTreeMap::new(),
            env_vars: BTreeMap::new(),
            binary: DEFAULT_TERRAFORM_BINARY.to_string(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            no_color: true,
            copy_root: None,
            in_place: false,
        }
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_color(mut self, enabled: bool) -> Self {
        self.no_color = !enabled;
        self
    }

    pub fn with_copy_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.copy_root = Some(root.into());
        self
    }

    /// Run directly in `terraform_dir`, sharing its `.terraform/` and local
    /// state with anything else that uses it.
    pub fn in_place(mut self) -> Self {
        self.in_place = true;
        self
    }

    /// `-var name=value` pairs in name order.
    pub fn var_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.vars.len() * 2);
        for (name, value) in &self.vars {
            args.push("-var".to_string());
            args.push(format!("{name}={}", render_var(value)));
        }
        args
    }

    /// Same as [`Self::var_args`] with sensitive values replaced by `***`.
    pub fn redacted_var_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.vars.len() * 2);
        for (name, value) in &self.vars {
            args.push("-var".to_string());
            if is_sensitive(name) {
                args.push(format!("{name}=***"));
            } else {
                args.push(format!("{name}={}", render_var(value)));
            }
        }
        args
    }
}

fn is_sensitive(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    SENSITIVE_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Top-level strings are passed verbatim; everything else is rendered as an
/// expression.
pub(crate) fn render_var(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => render_expression(other),
    }
}

/// Render a value in the engine's expression syntax.
pub(crate) fn render_expression(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Array(items) => {
            let items: Vec<_> = items.iter().map(render_expression).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(entries) => {
            let entries: Vec<_> = entries
                .iter()
                .map(|(k, v)| format!("{} = {}", quote(k), render_expression(v)))
                .collect();
            format!("{{{}}}", entries.join(", "))
        }
    }
}

/// Quote a string literal, escaping template sequences so `${` and `%{`
/// stay literal.
fn quote(s: &str) -> String {
    let quoted = Value::String(s.to_string()).to_string();
    quoted.replace("${", "$${").replace("%{", "%%{")
}
