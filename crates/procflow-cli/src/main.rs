use clap::Parser;
use env_logger::Env;
use log::error;
use procflow_cli::{execute, open_stores, Cli};

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();
    let stores = match open_stores(&cli) {
        Ok(s) => s,
        Err(e) => {
            error!("no se pudo abrir el backend: {e}");
            eprintln!("[procflow] {e}");
            std::process::exit(e.exit_code());
        }
    };
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    if let Err(e) = execute(&cli, &stores, &mut out) {
        eprintln!("[procflow] {e}");
        std::process::exit(e.exit_code());
    }
}
