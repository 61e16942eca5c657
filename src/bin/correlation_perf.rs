use std::fs;
use std::time::Instant;

use anyhow::{anyhow, Result};
use flowcorr::data::random_tensor;
use flowcorr::ops::{self, KernelPath};
use flowcorr::telemetry::jsonl_recorder_from_env;
use flowcorr::CorrelationConfig;

fn env_usize(var: &str, default: usize) -> usize {
    std::env::var(var)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn main() -> Result<()> {
    let batch = env_usize("CORRELATION_PERF_BATCH", 2);
    let height = env_usize("CORRELATION_PERF_HEIGHT", 48);
    let width = env_usize("CORRELATION_PERF_WIDTH", 64);
    let channels = env_usize("CORRELATION_PERF_CHANNELS", 32);
    let kernel_size = env_usize("CORRELATION_PERF_KERNEL", 1);
    let max_displacement = env_usize("CORRELATION_PERF_MAX_DISP", 4);
    let seed = env_usize("CORRELATION_PERF_SEED", 2025) as u64;

    let config = CorrelationConfig::new(
        max_displacement + kernel_size / 2,
        kernel_size,
        max_displacement,
        1,
        1,
    )
    .map_err(|err| anyhow!("invalid correlation config: {err}"))?;
    let shape = [batch, height, width, channels];
    let a = random_tensor(shape, seed);
    let b = random_tensor(shape, seed.wrapping_add(1));

    let telemetry = jsonl_recorder_from_env("CORRELATION_PERF_TELEMETRY")?;

    let start_mem = read_rss_bytes().unwrap_or(0);
    let start = Instant::now();
    let forward = ops::correlate_recorded(
        &a,
        &b,
        &config,
        KernelPath::Specialized,
        telemetry.as_ref(),
    )
    .map_err(|err| anyhow!("forward correlation failed: {err}"))?;
    let forward_elapsed = start.elapsed();

    let grad_out = random_tensor(forward.geometry.output_shape(), seed.wrapping_add(2));
    let start = Instant::now();
    forward
        .backward_recorded(&grad_out, telemetry.as_ref())
        .map_err(|err| anyhow!("backward correlation failed: {err}"))?;
    let backward_elapsed = start.elapsed();

    let end_mem = read_rss_bytes().unwrap_or(start_mem);
    let delta = end_mem.saturating_sub(start_mem);

    println!(
        "forward_ms={:.3} backward_ms={:.3} memory_delta_bytes={} input={:?} output={:?}",
        forward_elapsed.as_secs_f64() * 1000.0,
        backward_elapsed.as_secs_f64() * 1000.0,
        delta,
        shape,
        forward.geometry.output_shape()
    );

    Ok(())
}

fn read_rss_bytes() -> Result<u64> {
    let statm = fs::read_to_string("/proc/self/statm")?;
    let mut parts = statm.split_whitespace();
    let _size: u64 = parts
        .next()
        .ok_or_else(|| anyhow!("statm missing size"))?
        .parse()?;
    let resident: u64 = parts
        .next()
        .ok_or_else(|| anyhow!("statm missing resident"))?
        .parse()?;
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as u64;
    Ok(resident.saturating_mul(page_size))
}
