//! Submit-script rendering from per-host templates.

use essq_core::config::HostConfig;
use essq_core::errors::ConfigError;
use regex::Regex;

const TOKEN_PATTERN: &str = r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}|[{}]";

/// Values substituted into a submit-script template.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitContext {
    pub name: String,
    pub username: String,
    pub t_max: String,
    pub memory_mb: u64,
    pub cpus: u32,
    pub architecture: String,
    pub max_task_num: Option<u32>,
    pub install_path: String,
    pub batch_data_path: String,
}

impl SubmitContext {
    fn value(&self, placeholder: &str) -> Option<String> {
        Some(match placeholder {
            "name" => self.name.clone(),
            "un" => self.username.clone(),
            "t_max" => self.t_max.clone(),
            "memory" => self.memory_mb.to_string(),
            "cpus" => self.cpus.to_string(),
            "architecture" => self.architecture.clone(),
            "max_task_num" => self.max_task_num.map(|n| n.to_string()).unwrap_or_default(),
            "install_path" => self.install_path.clone(),
            "batch_data_path" => self.batch_data_path.clone(),
            _ => return None,
        })
    }
}

/// Picks the template for a job: the array template for batched jobs,
/// otherwise the backend's entry under `submit_templates`.
pub fn select_template<'a>(
    host_name: &str,
    host: &'a HostConfig,
    backend: &str,
    array: bool,
) -> Result<&'a str, ConfigError> {
    let found = if array {
        host.array_template.as_deref()
    } else {
        host.submit_templates.get(backend).map(String::as_str)
    };
    found.ok_or_else(|| ConfigError::MissingSubmitTemplate {
        kind: if array { "array" } else { "single" },
        host: host_name.to_string(),
        backend: backend.to_string(),
        available: host.submit_templates.keys().cloned().collect(),
    })
}

/// Substitutes `{placeholder}` tokens. `{{` and `}}` produce literal braces.
pub fn render_submit_script(
    host_name: &str,
    template: &str,
    ctx: &SubmitContext,
) -> Result<String, ConfigError> {
    let tokens = Regex::new(TOKEN_PATTERN).map_err(|e| ConfigError::General(e.to_string()))?;
    let mut rendered = String::with_capacity(template.len() + 64);
    let mut last = 0;
    for caps in tokens.captures_iter(template) {
        let Some(whole) = caps.get(0) else { continue };
        rendered.push_str(&template[last..whole.start()]);
        last = whole.end();
        match whole.as_str() {
            "{{" => rendered.push('{'),
            "}}" => rendered.push('}'),
            "{" | "}" => {
                return Err(ConfigError::MalformedTemplate {
                    host: host_name.to_string(),
                    offset: whole.start(),
                })
            }
            _ => {
                let key = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                let value = ctx
                    .value(key)
                    .ok_or_else(|| ConfigError::UnknownPlaceholder {
                        host: host_name.to_string(),
                        placeholder: key.to_string(),
                    })?;
                rendered.push_str(&value);
            }
        }
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}
