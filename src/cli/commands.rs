use anyhow::Result;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::Core;
use crate::net::TcpConnection;
use crate::pool::{Connection, ConnectionFactory};

/// Outcome counters shared by the benchmark workers
#[derive(Debug, Default)]
struct BenchCounters {
    succeeded: AtomicU64,
    failed: AtomicU64,
    acquire_errors: AtomicU64,
}

/// Write `payload` and read the echo back
async fn exchange(conn: &mut TcpConnection, payload: &[u8], buf: &mut Vec<u8>) -> io::Result<()> {
    let stream = conn.stream_mut();
    stream.write_all(payload).await?;
    buf.resize(payload.len(), 0);
    stream.read_exact(buf).await?;
    if buf.as_slice() != payload {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "echo mismatch"));
    }
    Ok(())
}

/// One request through the pool; failed connections are marked unhealthy
async fn pooled_request(core: &Core, payload: &[u8], buf: &mut Vec<u8>, counters: &BenchCounters) {
    let mut conn = match core.pool.get().await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "Failed to acquire connection");
            counters.acquire_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match exchange(&mut conn, payload, buf).await {
        Ok(()) => {
            counters.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            debug!(error = %e, "Request failed, discarding connection");
            conn.mark_unhealthy();
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    if let Err(e) = conn.release() {
        warn!(error = %e, "Failed to release connection");
    }
}

/// One request on a freshly dialled connection
async fn dialled_request(core: &Core, payload: &[u8], buf: &mut Vec<u8>, counters: &BenchCounters) {
    let mut conn = match core.connector.connect(&CancellationToken::new()).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(error = %e, "Failed to dial connection");
            counters.acquire_errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match exchange(&mut conn, payload, buf).await {
        Ok(()) => counters.succeeded.fetch_add(1, Ordering::Relaxed),
        Err(e) => {
            debug!(error = %e, "Request failed");
            counters.failed.fetch_add(1, Ordering::Relaxed)
        }
    };

    if let Err(e) = conn.close() {
        debug!(error = %e, "Failed to close connection");
    }
}

/// Drive `requests` echo round-trips from `workers` concurrent tasks
///
/// With `no_pool` every request dials and closes its own connection, which is
/// the baseline the pool is measured against.
pub async fn cmd_bench(
    core: &Core,
    workers: usize,
    requests: usize,
    payload: &str,
    no_pool: bool,
) -> Result<()> {
    if payload.is_empty() {
        anyhow::bail!("Payload must not be empty");
    }
    let workers = workers.max(1);
    let payload = Arc::new(payload.as_bytes().to_vec());
    let counters = Arc::new(BenchCounters::default());

    println!(
        "Running {} requests with {} workers against {} ({})",
        requests,
        workers,
        core.config.target.address,
        if no_pool { "dial per request" } else { "pooled" }
    );

    let start = Instant::now();
    let mut handles = Vec::with_capacity(workers);

    for worker in 0..workers {
        // Spread the remainder over the first workers.
        let share = requests / workers + usize::from(worker < requests % workers);
        let core = core.clone();
        let payload = Arc::clone(&payload);
        let counters = Arc::clone(&counters);

        handles.push(tokio::spawn(async move {
            let mut buf = Vec::with_capacity(payload.len());
            for _ in 0..share {
                if no_pool {
                    dialled_request(&core, &payload, &mut buf, &counters).await;
                } else {
                    pooled_request(&core, &payload, &mut buf, &counters).await;
                }
            }
            debug!(worker, requests = share, "Worker finished");
        }));
    }

    for handle in handles {
        handle.await?;
    }

    let elapsed = start.elapsed();
    print_summary(core, &counters, elapsed, no_pool);
    Ok(())
}

fn print_summary(core: &Core, counters: &BenchCounters, elapsed: Duration, no_pool: bool) {
    let succeeded = counters.succeeded.load(Ordering::Relaxed);
    let failed = counters.failed.load(Ordering::Relaxed);
    let acquire_errors = counters.acquire_errors.load(Ordering::Relaxed);
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);

    println!();
    println!("Elapsed:        {:.3}s", elapsed.as_secs_f64());
    println!("Succeeded:      {}", succeeded);
    println!("Failed:         {}", failed);
    println!("Acquire errors: {}", acquire_errors);
    println!("Throughput:     {:.1} req/s", succeeded as f64 / secs);

    if !no_pool {
        let stats = core.pool.stats();
        println!();
        println!("Pool capacity:        {}", stats.capacity);
        println!("Pool available:       {}", stats.available);
        println!("Connections created:  {}", stats.total_created);
        println!("Connections reused:   {}", stats.total_reused);
        println!("Idle evicted:         {}", stats.idle_evicted);
        println!("Lifetime rotated:     {}", stats.lifetime_rotated);
        println!("Unhealthy discarded:  {}", stats.unhealthy_discarded);
        println!("Failed dials:         {}", stats.failed_attempts);
    }

    info!(succeeded, failed, acquire_errors, "Benchmark finished");
}

/// Run the echo server until Ctrl-C
pub async fn cmd_serve(listen: &str) -> Result<()> {
    let shutdown = CancellationToken::new();

    let signal = {
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    };
    tokio::spawn(signal);

    crate::net::run_echo_server(listen, shutdown).await
}
