//! Run control: `advance`, `resume`, `abort`, `checkpoint`, `rollback`.

use anyhow::Result;
use console::style;
use waypoint::config::WaypointConfig;

use super::with_run;

pub fn cmd_advance(config: WaypointConfig) -> Result<()> {
    let stage = with_run(config, |run| Ok(run.advance()?))?;
    println!("{} Advanced to {}", style("✓").green(), style(stage).bold());
    Ok(())
}

pub fn cmd_resume(config: WaypointConfig) -> Result<()> {
    let stage = with_run(config, |run| Ok(run.resume()?))?;
    println!("{} Resumed at {}", style("✓").green(), style(stage).bold());
    Ok(())
}

pub fn cmd_abort(config: WaypointConfig) -> Result<()> {
    match with_run(config, |run| Ok(run.abort()?))? {
        Some(seq) => println!("Run aborted; state restored to checkpoint #{}", seq),
        None => println!("Run aborted; no checkpoint to restore"),
    }
    Ok(())
}

pub fn cmd_checkpoint(config: WaypointConfig, label: Option<&str>) -> Result<()> {
    let label = label.unwrap_or("manual");
    let seq = with_run(config, |run| Ok(run.checkpoint(label)))?;
    println!("Checkpoint #{} created ({})", seq, label);
    Ok(())
}

pub fn cmd_rollback(config: WaypointConfig, seq: Option<u64>) -> Result<()> {
    let (restored, phase) = with_run(config, |run| {
        let restored = run.rollback(seq)?;
        Ok((restored, run.phase()))
    })?;
    println!("Rolled back to checkpoint #{}", restored);
    println!("Phase: {}", phase);
    Ok(())
}
