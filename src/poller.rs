//! Periodic CO2 polling and ABC suppression.
//!
//! One task owns the serial client and drives two independent tickers: a fast
//! one reading the concentration and a slow one re-sending the command that
//! switches off automatic baseline correction.

use crate::router::TelemetryRouter;
use crate::serial::SerialFrameClient;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{error, info};

/// How often each exchange runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub read_interval: Duration,
    pub abc_interval: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        PollSchedule {
            read_interval: Duration::from_secs(10),
            abc_interval: Duration::from_secs(3600),
        }
    }
}

/// Read the CO2 concentration once and publish the outcome.
pub async fn poll_co2<T>(client: &mut SerialFrameClient<T>, router: &TelemetryRouter)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let result = client.read_co2().await;
    router.record_co2(&result);
}

/// Switch off automatic baseline correction, logging the outcome.
pub async fn suppress_abc<T>(client: &mut SerialFrameClient<T>)
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match client.disable_auto_calibration().await {
        Ok(()) => info!("automatic baseline correction disabled"),
        Err(e) => error!(error = %e, "failed to disable automatic baseline correction"),
    }
}

/// Run the polling loop forever.
///
/// ABC is suppressed once up front; after that both tickers first fire one
/// full period after start.
pub async fn run<T>(
    mut client: SerialFrameClient<T>,
    router: &TelemetryRouter,
    schedule: PollSchedule,
) where
    T: AsyncRead + AsyncWrite + Unpin,
{
    suppress_abc(&mut client).await;

    let start = Instant::now();
    let mut read_ticker = interval_at(start + schedule.read_interval, schedule.read_interval);
    let mut abc_ticker = interval_at(start + schedule.abc_interval, schedule.abc_interval);
    read_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    abc_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = read_ticker.tick() => poll_co2(&mut client, router).await,
            _ = abc_ticker.tick() => suppress_abc(&mut client).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roster::Roster;
    use crate::serial::frame::{DISABLE_ABC_COMMAND, READ_CO2_COMMAND};
    use crate::test_utils::{RecordingSink, SinkCall};
    use std::sync::Arc;
    use tokio_test::io::Builder;

    const RESPONSE_410_PPM: [u8; 9] = [0xFF, 0x86, 0x01, 0x9A, 0x47, 0x00, 0x00, 0x00, 0x98];
    const ABC_ACK: [u8; 9] = [0xFF, 0x79, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x86];

    fn router() -> (TelemetryRouter, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        (TelemetryRouter::new(Roster::default(), sink.clone()), sink)
    }

    #[tokio::test]
    async fn test_poll_co2_publishes_value() {
        let (router, sink) = router();
        let mock = Builder::new()
            .write(&READ_CO2_COMMAND)
            .read(&RESPONSE_410_PPM)
            .build();
        let mut client = SerialFrameClient::new(mock);

        poll_co2(&mut client, &router).await;

        assert_eq!(sink.calls(), vec![SinkCall::Co2(410.0)]);
    }

    #[tokio::test]
    async fn test_poll_co2_failure_publishes_nan_then_recovers() {
        let (router, sink) = router();
        let mock = Builder::new()
            .write(&READ_CO2_COMMAND)
            .read(&ABC_ACK)
            .write(&READ_CO2_COMMAND)
            .read(&RESPONSE_410_PPM)
            .build();
        let mut client = SerialFrameClient::new(mock);

        poll_co2(&mut client, &router).await;
        poll_co2(&mut client, &router).await;

        let calls = sink.calls();
        assert!(matches!(calls[0], SinkCall::Co2(v) if v.is_nan()));
        assert_eq!(calls[1], SinkCall::Co2(410.0));
    }

    #[tokio::test]
    async fn test_suppress_abc_has_no_metric_impact() {
        let (_router, sink) = router();
        let mock = Builder::new()
            .write(&DISABLE_ABC_COMMAND)
            .read(&ABC_ACK)
            .build();
        let mut client = SerialFrameClient::new(mock);

        suppress_abc(&mut client).await;

        assert!(sink.calls().is_empty());
    }

    #[tokio::test]
    async fn test_run_suppresses_abc_then_polls() {
        let (router, sink) = router();
        let mock = Builder::new()
            .write(&DISABLE_ABC_COMMAND)
            .read(&ABC_ACK)
            .write(&READ_CO2_COMMAND)
            .read(&RESPONSE_410_PPM)
            .build();
        let client = SerialFrameClient::new(mock);
        let schedule = PollSchedule {
            read_interval: Duration::from_millis(100),
            abc_interval: Duration::from_secs(3600),
        };

        // Stop once the first poll has been published.
        let published = async {
            while sink.calls().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::select! {
            _ = run(client, &router, schedule) => unreachable!("poller never returns"),
            _ = published => {}
        }

        assert_eq!(sink.calls(), vec![SinkCall::Co2(410.0)]);
    }
}
