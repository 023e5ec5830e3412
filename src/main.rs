use std::sync::Arc;

use env_logger::Env;
use log::error;
use procflow::demo;
use procflow::persistence;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let stores = match persistence::open_from_env() {
        Ok(s) => s,
        Err(e) => {
            error!("[procflow-demo] backend error: {e}");
            std::process::exit(5);
        }
    };
    let topic = std::env::args().nth(1).unwrap_or_else(|| "durable workflow engines".to_string());
    let agent = Arc::new(demo::scripted_agent());
    match demo::run(&stores, agent.clone(), &topic).await {
        Ok(state) => {
            println!("run {} -> {}", state.run_id, state.status);
            if let Some(result) = &state.result {
                match serde_json::to_string_pretty(result) {
                    Ok(text) => println!("{text}"),
                    Err(e) => error!("[procflow-demo] cannot render result: {e}"),
                }
            }
            if let Some(fp) = &state.run_fingerprint {
                println!("fingerprint {fp}");
            }
            println!("agent calls: {}", agent.total_calls());
        }
        Err(e) => {
            error!("[procflow-demo] {e}");
            std::process::exit(1);
        }
    }
}
