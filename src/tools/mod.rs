//! Agent-callable leaf tools.
//!
//! Each tool implements the [`Tool`] trait and is registered in
//! [`default_tools`]; the agent advertises tool specs to the completion
//! provider and dispatches function calls back through the registry.

pub mod clock;
pub mod traits;

pub use clock::ClockTool;
pub use traits::{Tool, ToolSpec};

/// Create the default tool registry.
pub fn default_tools() -> Vec<Box<dyn Tool>> {
    vec![Box::new(ClockTool)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_contains_clock() {
        let tools = default_tools();
        assert!(tools.iter().any(|t| t.name() == "get_current_time"));
    }

    #[test]
    fn specs_carry_schema() {
        for tool in default_tools() {
            let spec = tool.spec();
            assert!(!spec.name.is_empty());
            assert!(spec.parameters.is_object());
        }
    }
}
