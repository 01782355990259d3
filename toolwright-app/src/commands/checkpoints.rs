use crate::bootstrap::Runtime;
use anyhow::Result;
use toolwright_checkpoint::CheckpointOptions;

pub fn list(runtime: &Runtime) -> Result<()> {
    if !runtime.checkpoints.is_enabled() {
        println!("Checkpoints are disabled");
        return Ok(());
    }
    let checkpoints = runtime.checkpoints.get_checkpoints();
    if checkpoints.is_empty() {
        println!("No checkpoints");
    }
    for checkpoint in checkpoints {
        println!(
            "{}  {}  {}  ({} files)",
            checkpoint.id,
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S"),
            checkpoint.description,
            checkpoint.files.len()
        );
    }
    Ok(())
}

pub async fn create(runtime: &Runtime, description: &str) -> Result<()> {
    let checkpoint = runtime
        .checkpoints
        .create_checkpoint(CheckpointOptions::new(description))
        .await?;
    println!("Created checkpoint {}", checkpoint.id);
    Ok(())
}

pub async fn restore(runtime: &Runtime, id: &str) -> Result<()> {
    let checkpoint = runtime.checkpoints.restore_checkpoint(id).await?;
    println!("Restored {} ({})", checkpoint.id, checkpoint.description);
    Ok(())
}
