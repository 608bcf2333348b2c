#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    let code = apicheck::App::new().run().await?;
    std::process::exit(code);
}
