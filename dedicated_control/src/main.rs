use dedicated_control::run_with_config;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Delegate to the framework entry point; startup failures end the process.
    run_with_config().await
}
