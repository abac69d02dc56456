use anyhow::Result;
use kit_simulator::{config::Config, controller::Kit, domain::PeripheralData, telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing();

    let cfg = Config::load()?;
    let (mut kit, mut data) = Kit::build(&cfg)?;

    let drain = tokio::spawn(async move {
        while let Some(item) = data.recv().await {
            match item {
                PeripheralData::Measurement(m) => debug!(
                    peripheral = %m.peripheral,
                    quantity = %m.quantity,
                    value = m.value,
                    unit = %m.unit,
                    "measurement"
                ),
                PeripheralData::Aggregate(a) => info!(
                    peripheral = %a.peripheral,
                    quantity = %a.quantity,
                    count = a.count,
                    mean = a.mean,
                    min = a.min,
                    max = a.max,
                    "aggregate"
                ),
                PeripheralData::Media(media) => info!(
                    peripheral = %media.peripheral,
                    name = %media.name,
                    mime_type = %media.mime_type,
                    bytes = media.data.len(),
                    "media"
                ),
            }
        }
    });

    let cancel = CancellationToken::new();
    let tasks = kit.start(cancel.clone()).await?;
    info!(start_time = %cfg.simulation.start_time, "kit simulator running");

    telemetry::shutdown_signal().await;
    cancel.cancel();
    kit.control().close();
    tasks.wait().await;

    let snapshot = kit.environment().read();
    info!(
        clock = %snapshot.simulated_clock,
        kit_temperature = snapshot.kit_temperature,
        "shutdown complete"
    );
    drop(kit);
    if let Err(e) = drain.await {
        warn!(error = %e, "data drain task failed");
    }
    Ok(())
}
