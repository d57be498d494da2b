//! Execution plan inspection.

use cadence_config::EngineConfig;
use clap::Args;

use crate::demo::Demo;

#[derive(Args)]
pub struct PlanArgs {
    /// Demo graph to inspect
    #[arg(value_enum)]
    demo: Demo,
}

pub fn run(args: PlanArgs, config: &EngineConfig) -> anyhow::Result<()> {
    let sample_rate = config.sample_rate();
    let (plan, _) = args.demo.build(sample_rate)?;

    println!("Execution plan: {:?} ({} nodes)", args.demo, plan.len());
    println!("{plan}");

    let compensations = plan.latency_compensations();
    if compensations.is_empty() {
        println!("No latency compensation needed");
    } else {
        println!("Latency compensation");
        println!("--------------------");
        for c in compensations {
            println!(
                "  delay {} -> {} by {} samples (node {})",
                c.input.0, c.consumer.0, c.delay_samples, c.node.0
            );
        }
    }

    let latency = plan.latency_num_samples();
    println!();
    println!(
        "Total latency: {} samples ({:.2} ms at {} Hz)",
        latency,
        latency as f64 * 1000.0 / sample_rate,
        config.audio.sample_rate
    );
    Ok(())
}
