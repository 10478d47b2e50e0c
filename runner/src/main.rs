use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use clap::Parser;
use log::*;

use emutime_core::time::EmuDuration;
use emutime_runner::RunReport;
use emutime_runner::config::{MachineConfig, VideoStandard};
use emutime_runner::machine::Machine;

#[derive(Parser)]
#[command(about = "Runs demo machines on the emulated-time scheduler")]
struct Args {
    /// Machine configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emulated run time per machine
    #[arg(long)]
    run_msec: Option<u64>,

    #[arg(long)]
    cpu_freq: Option<u64>,

    #[arg(long)]
    baud: Option<u64>,

    #[arg(long)]
    sample_rate: Option<u64>,

    #[arg(long)]
    video: Option<VideoStandard>,

    /// Input events injected from a separate thread
    #[arg(long)]
    hotplug: Option<u32>,

    /// Number of machine instances
    #[arg(short('n'), default_value_t = 1)]
    instances: usize,

    #[arg(short('j'), default_value_t = 1)]
    parallel: usize,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn machine_config(&self) -> Result<MachineConfig> {
        let mut config = match &self.config {
            Some(path) => MachineConfig::load(path)?,
            None => MachineConfig::default(),
        };
        if let Some(v) = self.run_msec {
            config.run_msec = v;
        }
        if let Some(v) = self.cpu_freq {
            config.cpu_freq = v;
        }
        if let Some(v) = self.baud {
            config.baud = v;
        }
        if let Some(v) = self.sample_rate {
            config.sample_rate = v;
        }
        if let Some(v) = self.video {
            config.video = v;
        }
        if let Some(v) = self.hotplug {
            config.hotplug_events = v;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run_machine(name: &str, config: &MachineConfig) -> Result<emutime_runner::MachineReport> {
    let start = Instant::now();
    let mut machine = Machine::new(config)?;

    let events = config.hotplug_events;
    let input = machine.input();
    let feeder = thread::spawn(move || {
        for i in 0..events {
            input.inject(i as u8);
            thread::sleep(Duration::from_micros(50));
        }
    });

    machine.run_for(EmuDuration::msec(config.run_msec as i64))?;
    if feeder.join().is_err() {
        bail!("Input feeder for {} panicked", name);
    }
    machine.settle()?;

    Ok(machine.report(name.to_string(), start.elapsed().as_secs_f64()))
}

fn main() -> Result<()> {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();
    let args = Args::parse();
    let config = args.machine_config()?;

    info!(
        "Running {} machines ({} in parallel) for {} ms emulated",
        args.instances, args.parallel, config.run_msec
    );

    let report = Arc::new(Mutex::new(RunReport::default()));
    let errors = Arc::new(Mutex::new(vec![]));
    let pool = rusty_pool::ThreadPool::new(
        args.parallel.max(1),
        args.parallel.max(1),
        Duration::from_secs(60),
    );
    let start_time = Instant::now();

    for i in 0..args.instances {
        let t_report = Arc::clone(&report);
        let t_errors = Arc::clone(&errors);
        let t_config = config.clone();

        pool.execute(move || {
            let name = format!("machine-{}", i);
            match run_machine(&name, &t_config) {
                Ok(r) => {
                    info!("{} done in {:.3}s", name, r.wall_secs);
                    t_report.lock().unwrap().machines.push(r);
                }
                Err(e) => {
                    error!("{} failed: {:?}", name, e);
                    t_errors.lock().unwrap().push(name);
                }
            }
        });
    }
    pool.shutdown_join();
    info!("Completed in {:?}", start_time.elapsed());

    let report = report.lock().unwrap();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&*report)?);
    } else {
        println!("{}", report);
    }

    let errors = errors.lock().unwrap();
    if !errors.is_empty() {
        bail!("{} machine(s) failed", errors.len());
    }
    Ok(())
}
