// Copyright 2023 The SeamDB Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::time::Duration;

use anyhow::Result;
use bytesize::ByteSize;
use clap::Parser;
use futures::future::try_join_all;
use tabletxn::clock::Clock;
use tabletxn::config::TransactionConfig;
use tabletxn::local::LocalCluster;
use tabletxn::tablet::KeyWrite;
use tabletxn::timer::Timer;
use tracing::{info, instrument};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Comma separated participant tablets.
    #[arg(long = "tablets", value_delimiter = ',', default_value = "t1,t2,t3")]
    tablets: Vec<String>,
    /// Number of transactions to run.
    #[arg(long = "transactions", default_value_t = 100)]
    transactions: usize,
    /// Transactions running concurrently.
    #[arg(long = "concurrency", default_value_t = 8)]
    concurrency: usize,
    /// Interval at which transactions heartbeat.
    #[arg(long = "txn.heartbeat-interval-ms", default_value_t = 500)]
    heartbeat_interval_ms: u64,
    /// Heartbeat periods a transaction may miss before it expires.
    #[arg(long = "txn.max-missed-heartbeat-periods", default_value_t = 10.0)]
    max_missed_heartbeat_periods: f64,
    /// Poll interval of transaction coordinator.
    #[arg(long = "txn.check-interval-ms", default_value_t = 500)]
    check_interval_ms: u64,
    #[arg(long = "txn.resend-applying-interval-ms", default_value_t = 5000)]
    resend_applying_interval_ms: u64,
    #[arg(long = "txn.rpc-timeout-ms", default_value_t = 5000)]
    rpc_timeout_ms: u64,
    #[arg(long = "txn.enable-deadlock-detection", default_value_t = false)]
    enable_deadlock_detection: bool,
    /// Size budget of one batch applying intents, e.g. 4MiB.
    #[arg(long = "tablet.apply-intents-batch-size", default_value = "4MiB")]
    apply_intents_batch_size: ByteSize,
    /// Percent of transactions aborted instead of committed.
    #[arg(long = "abort-percent", default_value_t = 10)]
    abort_percent: usize,
}

impl Args {
    fn config(&self) -> TransactionConfig {
        TransactionConfig {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            max_missed_heartbeat_periods: self.max_missed_heartbeat_periods,
            check_interval: Duration::from_millis(self.check_interval_ms),
            resend_applying_interval: Duration::from_millis(self.resend_applying_interval_ms),
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            enable_deadlock_detection: self.enable_deadlock_detection,
            apply_intents_batch_size: self.apply_intents_batch_size,
            ..Default::default()
        }
    }
}

#[instrument(skip(cluster, tablets))]
async fn run_transaction(cluster: &LocalCluster, tablets: &[String], seq: usize, abort: bool) -> Result<()> {
    let id = cluster.begin().await?;
    let mut involved = Vec::new();
    for (i, tablet) in tablets.iter().enumerate() {
        if (seq + i) % 2 == 0 {
            continue;
        }
        let value = format!("value-{seq}").into_bytes();
        let writes: Vec<KeyWrite> =
            (0..4).map(|k| (format!("key-{seq}-{k}").into_bytes(), Some(value.clone()))).collect();
        cluster.write(id, tablet, writes)?;
        involved.push(tablet.as_str());
    }
    cluster.heartbeat(id).await?;
    if abort {
        let result = cluster.abort(id).await?;
        info!("transaction {} aborted: {:?}", id, result.status);
    } else {
        cluster.commit(id, &involved).await?;
        info!("transaction {} committed in {:?}", id, involved);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let (non_blocking, _guard) = tracing_appender::non_blocking(std::io::stdout());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_level(true).with_file(true).with_line_number(true))
        .with(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let tablets: Vec<&str> = args.tablets.iter().map(|tablet| tablet.as_str()).collect();
    let cluster = LocalCluster::start(args.config(), Clock::new(), &tablets);
    info!("Starting {} transactions over tablets {:?}", args.transactions, args.tablets);

    let concurrency = args.concurrency.max(1);
    let mut seq = 0;
    while seq < args.transactions {
        let end = (seq + concurrency).min(args.transactions);
        let abort_every = 100 / args.abort_percent.clamp(1, 100);
        let batch = (seq..end).map(|seq| {
            let abort = args.abort_percent != 0 && seq % abort_every == 0;
            run_transaction(&cluster, &args.tablets, seq, abort)
        });
        try_join_all(batch).await?;
        seq = end;
    }

    let mut timer = Timer::after(Duration::from_secs(10));
    while cluster.coordinator().count_transactions() != 0 {
        tokio::select! {
            _ = &mut timer => break,
            _ = Timer::after(Duration::from_millis(100)) => {},
        }
    }
    info!("Coordinator: {:?}", cluster.coordinator().report());
    for tablet in cluster.rpc().tablets() {
        info!("Tablet: {:?}", tablet.report());
    }
    info!("Garbage collected {} log entries", cluster.gc_log());
    cluster.shutdown().await;
    Ok(())
}
