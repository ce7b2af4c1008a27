use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use kiln_engine::device::{ContextConfig, LogicalDevice};
use kiln_engine::logging::{init_logging, LoggingConfig};
use kiln_engine::native::{WgpuAdapter, WgpuAdapterConfig, WgpuEncoder};
use kiln_engine::task::{TaskId, TaskPool};

const DEFAULT_TASKS: usize = 16;

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let task_count = match std::env::args().nth(1) {
        Some(arg) => arg.parse().with_context(|| format!("invalid task count '{arg}'"))?,
        None => DEFAULT_TASKS,
    };

    let adapter = WgpuAdapter::request(WgpuAdapterConfig::default())?;
    let pool = Arc::new(TaskPool::new());
    let device = LogicalDevice::new(adapter, Arc::clone(&pool), ContextConfig::default());

    print_caps(&device)?;

    let context = device.init_d3d(None).context("failed to create device context")?;
    println!(
        "  context   {} (timestamp frequency {} Hz)",
        context.id(),
        context.timestamp_frequency()
    );

    let tasks: Vec<TaskId> = (0..task_count)
        .map(|i| pool.create_task(move |enc: &mut WgpuEncoder| {
            let label = format!("probe pass {i}");
            let _pass = enc.encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(&label),
                timestamp_writes: None,
            });
            Ok(())
        }))
        .collect();

    {
        let mut lock = pool.lock();
        for task in &tasks {
            context.submit_task(*task, &mut lock)?;
            context.ready_task(*task, &mut lock)?;
        }
        context.flush(&mut lock)?;
    }

    let mut failed = 0;
    for task in &tasks {
        match context.wait_timeout(*task, Duration::from_secs(10))? {
            Some(Ok(())) => {}
            Some(Err(failure)) => {
                log::error!("{task}: {failure}");
                failed += 1;
            }
            None => anyhow::bail!("{task} did not complete within 10s"),
        }
    }

    let total: Duration = tasks
        .iter()
        .filter_map(|t| pool.profile(*t).ok()?.total_time())
        .sum();
    println!(
        "  tasks     {} run, {} failed, mean queued-to-ended {:?}",
        tasks.len(),
        failed,
        total / tasks.len().max(1) as u32
    );

    for task in tasks {
        pool.release(task)?;
    }
    device.release_d3d(&context)?;
    Ok(())
}

fn print_caps(device: &LogicalDevice<WgpuAdapter>) -> Result<()> {
    let caps = device.caps().context("capability query failed")?;
    let (wave_min, wave_max) = caps.wave_sizes();

    println!();
    println!("  adapter   {} (luid {:#x})", device.device_name(), device.adapter_luid());
    println!(
        "  ids       vendor {:#06x} device {:#06x}",
        caps.hardware_ids.vendor_id, caps.hardware_ids.device_id
    );
    println!("  type      {:?}, uma {}", caps.device_type(), caps.architecture.uma);
    println!("  memory    {} MiB", caps.global_mem_size() >> 20);
    println!("  shaders   SM {}.{}", caps.shader_model.major, caps.shader_model.minor);
    println!(
        "  options   int16 {}, typed uav load {}, waves {wave_min}..{wave_max}",
        caps.options.native_16bit_ops, caps.options.typed_uav_load_additional_formats
    );
    Ok(())
}
