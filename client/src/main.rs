use anyhow::Result;

mod cli;

/// Un solo hilo: la única espera es el sleep del monitor entre lecturas.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "client=debug,common=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    cli::run().await
}
