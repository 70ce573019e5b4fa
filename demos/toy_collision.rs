//! End-to-end run on the toy compression function: construct a path for a
//! one-bit message differential, solve it, and hunt for a conforming message
//! pair across all cores.

use std::time::Duration;

use arx_collider::{
    progress_printer, solve, ArxSpec, PathConstructor, SearchBudget, SeedDifferential,
    TrialEngine, WorkerPool,
};

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let spec = ArxSpec::toy8();
    let seed = SeedDifferential::from_message_xor(spec.iv, vec![0x8000_0000, 0, 0, 0]);

    let mut constructor = PathConstructor::new(&spec, &seed)
        .expect("seed differential is consistent")
        .with_backtrack_limit(1 << 16);
    let path = match constructor.run() {
        Ok(path) => path.clone(),
        Err(err) => {
            eprintln!("path construction failed: {err}");
            return;
        }
    };
    println!("constructed path ({} backtracks):\n{path}", constructor.backtracks());

    let template = solve(&spec, &path).expect("complete paths solve");
    println!(
        "template: {} free bits, condition weight {}",
        template.free_count(),
        path.condition_weight()
    );

    let engine = TrialEngine::new(&spec, &path, &template).expect("shapes agree");
    let pool = WorkerPool::new(engine);
    let workers = num_cpus::get();
    let (outcome, stats) = pool.run(
        workers,
        SearchBudget::trials(1 << 24),
        progress_printer(Duration::from_secs(1), path.condition_weight()),
    );

    match outcome {
        Ok(result) => {
            println!("collision after {} trials:", stats.trials);
            println!("  m : {:08x?}", result.message_first);
            println!("  m': {:08x?}", result.message_second);
            println!("  h : {:08x?}", result.output_first);
            println!("  h': {:08x?}", result.output_second);
        }
        Err(err) => println!("{err}"),
    }
}
