//! Minimal end-to-end example for `consistency-harness`.
//!
//! Samples five solutions to one word problem, asks the model which answer
//! the solutions agree on, and prints the chosen solution with its cost.
//!
//! To run:
//! - Set `OPENROUTER_API_KEY`
//! - `cargo run --example quickstart`

use std::sync::Arc;

use consistency_harness::{ChatGateway, CostLedger, ProviderGateway, SelfConsistency, SolverConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // -- Infrastructure setup ------------------------------------------------

    // CostLedger keeps a running total of every call's cost; the solver reads
    // it back through the gateway after each problem.
    let ledger = Arc::new(CostLedger::new());

    // OpenRouter gateway: reads OPENROUTER_API_KEY from the environment and
    // retries rate limits and 5xx responses with exponential backoff.
    let gateway: Arc<dyn ChatGateway> = Arc::new(ProviderGateway::from_env(ledger.clone())?);

    // Defaults: openai/gpt-4o-mini, 5 samples at temperature 0.7, tagged output.
    let config = SolverConfig {
        samples: 5,
        parallel_generation: true, // issue the 5 generation calls at once
        ..SolverConfig::default()
    };
    let solver = SelfConsistency::from_config(gateway, &config)?;

    // -- Run it --------------------------------------------------------------

    let problem = "If a train travels 60 miles in 2 hours, what is its speed?";
    let outcome = solver.solve(problem).await?;

    // -- Interpret results ---------------------------------------------------

    for (i, candidate) in outcome.candidates.iter().enumerate() {
        let last_line = candidate.as_str().lines().last().unwrap_or("");
        println!("  candidate {i}: {last_line}");
    }
    println!();
    println!(
        "chosen: {} (fallback used: {})",
        outcome.selection.label, outcome.selection.fallback_used
    );
    println!("why: {}", outcome.selection.thought);
    println!();
    println!("{}", outcome.answer);
    println!();
    println!("cost: ${:.6} over {} calls", ledger.total_usd(), ledger.calls());

    Ok(())
}
