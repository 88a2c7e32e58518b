mod gateway;
mod host;
mod hotwater;
mod monitor;
#[cfg(test)]
mod testutil;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
