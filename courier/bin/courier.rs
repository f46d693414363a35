#![deny(clippy::pedantic, clippy::all, clippy::nursery)]
#![allow(clippy::must_use_candidate)]

#[cfg(not(unix))]
compile_error!("Only unix-like platforms are currently supported");

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = courier::CourierConfig::load()?;
    courier::Courier::new(config).run().await
}
