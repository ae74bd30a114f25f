//! `stepwise tools`: list the built-in tools.

use stepwise_tools::default_registry;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let registry = default_registry();
    println!("Built-in tools:");
    for line in tool_lines(&registry) {
        println!("{line}");
    }
    println!();
    println!("Enable tools per run with `tools = [...]` under [agent] in the config file.");
    Ok(())
}

fn tool_lines(registry: &stepwise_core::tool::ToolRegistry) -> Vec<String> {
    registry
        .resolve(&registry.names())
        .iter()
        .map(|tool| format!("  {:<14} {}", tool.name(), tool.description()))
        .collect()
}
