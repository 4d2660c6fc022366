use anyhow::Result;
use mailgate::{cli, telemetry};

#[tokio::main]
async fn main() -> Result<()> {
    let options = cli::start();
    telemetry::init(options.verbosity)?;

    mailgate::run(options).await
}
