//! Collects the number of processed videos over time and serves it to Prometheus on
//! `http://localhost:9999/metrics`. The same data is logged every second.
//!
//! Run with `RUST_LOG=info cargo run --example prometheus`.

use std::time::Duration;

use rand::Rng;
use statsview::{
    LogSink, MeasureRegistry, Reporter, TagSet, View, ViewManager, exporter::ExporterBuilder,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let measures = MeasureRegistry::new();
    let video_count =
        measures.define::<i64>("my.org/measures/video_count", "number of processed videos", "")?;

    let views = ViewManager::new(&measures);
    views.subscribe(
        View::builder("video_count", &video_count)
            .description("processed video size over time")
            .build()?,
    )?;
    views.set_reporting_period(Duration::from_secs(1))?;

    ExporterBuilder::new().with_address("0.0.0.0:9999").with_views(&views).install()?;
    let reporter = Reporter::builder(&views).with_sink(LogSink).start()?;

    let recorder = views.recorder();
    tokio::spawn(async move {
        loop {
            recorder.record(&TagSet::new(), [video_count.m(1)]);
            let delay = rand::rng().random_range(1..=400);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    });

    println!("Wait longer than the reporting period...");
    tokio::signal::ctrl_c().await?;

    reporter.shutdown().await;
    Ok(())
}
