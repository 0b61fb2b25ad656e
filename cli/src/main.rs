//! The main entrypoint for the Vistula OS installer binary; delegates to `vistula_lib::cli`.

use anyhow::Result;

async fn run() -> Result<()> {
    vistula_lib::cli::run_from_iter(std::env::args()).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
