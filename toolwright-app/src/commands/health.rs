use crate::bootstrap::Runtime;
use anyhow::Result;

/// Prints what the runtime came up with. Fails when the workspace is unusable.
pub fn run(runtime: &Runtime) -> Result<()> {
    println!("Health Check\n");

    let mut healthy = true;

    print!("Workspace root... ");
    let root = &runtime.config.workspace_root;
    if root.is_dir() {
        println!("ok ({})", root.display());
    } else {
        println!("missing ({})", root.display());
        healthy = false;
    }

    print!("Data directory... ");
    if runtime.config.data_dir.is_dir() {
        println!("ok");
    } else {
        println!("missing");
        healthy = false;
    }

    println!("Checkpoints... {}", if runtime.checkpoints.is_enabled() { "enabled" } else { "disabled" });
    println!("Confirmation handler... {}", if runtime.confirmation.has_handler() { "attached" } else { "none" });

    println!("\nTools ({}):", runtime.registry.count());
    for namespace in runtime.registry.get_namespaces() {
        let tools = runtime.registry.get_tools_by_namespace(&namespace);
        let names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        println!("  {namespace}: {}", names.join(", "));
    }

    let trusted = runtime.confirmation.trusted_tools();
    if !trusted.is_empty() {
        println!("\nTrusted tools: {}", trusted.join(", "));
    }
    let sources = runtime.confirmation.trusted_sources();
    if !sources.is_empty() {
        println!("Trusted sources: {}", sources.join(", "));
    }

    println!();
    if healthy {
        println!("All checks passed");
        Ok(())
    } else {
        anyhow::bail!("Health check failed");
    }
}
