//! The static default-agent template, loaded once per process.

use std::sync::OnceLock;

use relay_domain::agent::AgentConfig;

static DEFAULT_AGENT: OnceLock<AgentConfig> = OnceLock::new();

/// Install the template at worker boot. Later calls are no-ops.
pub fn install(config: AgentConfig) {
    let _ = DEFAULT_AGENT.set(config);
}

/// The installed template, or the built-in fallback.
pub fn get() -> AgentConfig {
    DEFAULT_AGENT
        .get()
        .cloned()
        .unwrap_or_else(AgentConfig::default_template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_without_install() {
        // Process-global state: this test only asserts the fallback shape,
        // which holds whether or not another test installed a template.
        let config = get();
        assert!(!config.system_prompt.is_empty());
    }
}
