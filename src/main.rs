use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use std::{ops::Deref, panic};

use sokbms_lib::bluest_async::BluestTransport;
use sokbms_lib::SokBms;

mod commandline;
mod daemon;
mod mqtt;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown>", 0, 0));
        let cause = panic_info
            .payload()
            .downcast_ref::<String>()
            .map(String::deref);
        let cause = cause.unwrap_or_else(|| {
            panic_info
                .payload()
                .downcast_ref::<&str>()
                .copied()
                .unwrap_or("<cause unknown>")
        });

        error!(
            "Thread '{}' panicked at {}:{}:{}: {}",
            std::thread::current().name().unwrap_or("<unknown>"),
            filename,
            line,
            column,
            cause
        );
    }));
    log_handle
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());

    let mut transport = BluestTransport::new(&args.device)
        .await
        .with_context(|| format!("Cannot find BLE device '{}'", args.device))?;
    transport.set_timeout(args.timeout);

    let mut bms = SokBms::new(transport);
    bms.set_connect_attempts(args.attempts);
    bms.set_retry_delay(args.retry_delay);

    match args.command {
        commandline::CliCommands::Telemetry => {
            let telemetry = bms.update().await.with_context(|| "Cannot poll battery")?;
            println!("Telemetry: {telemetry:?}");
            if let Some(derived) = bms.derived() {
                println!("Derived: {derived:?}");
            }
        }
        commandline::CliCommands::Soc => {
            let telemetry = bms.update().await.with_context(|| "Cannot poll battery")?;
            println!(
                "Voltage: {:.3} V, Current: {:.1} A, SOC: {} %",
                telemetry.voltage, telemetry.current, telemetry.soc
            );
        }
        commandline::CliCommands::Temperature => {
            let telemetry = bms.update().await.with_context(|| "Cannot poll battery")?;
            println!("Temperature: {:.1} °C", telemetry.temperature);
        }
        commandline::CliCommands::Capacity => {
            let telemetry = bms.update().await.with_context(|| "Cannot poll battery")?;
            println!(
                "Capacity: {:.2} Ah, Cycles: {}",
                telemetry.capacity, telemetry.num_cycles
            );
        }
        commandline::CliCommands::CellVoltages => {
            let telemetry = bms.update().await.with_context(|| "Cannot poll battery")?;
            println!("Cell voltages: {:?}", telemetry.cell_voltages);
        }
        commandline::CliCommands::Derived => {
            bms.update().await.with_context(|| "Cannot poll battery")?;
            let derived = bms
                .derived()
                .with_context(|| "No derived metrics after poll")?;
            println!("Power: {:.1} W", derived.power);
            match &derived.cells {
                Some(cells) => println!("Cells: {cells:?}"),
                None => println!("Cells: n/a"),
            }
        }
        commandline::CliCommands::Daemon { output, interval } => {
            daemon::run(bms, output, interval).await?
        }
    }

    Ok(())
}
