use eyre::{Result, WrapErr};

use scanjob::cli::{self, Cli, Command};
use scanjob::{JobId, LogTarget, ScanService, StartScan, Subscription, pretty};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    let log_target = if cli.log_stderr {
        LogTarget::Stderr
    } else {
        LogTarget::File(cli.log_file.clone())
    };
    if let Err(e) = scanjob::init_logging(log_target) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    log::info!("================================================================================");
    log::info!("🚀 NEW SCANJOB SESSION STARTING");
    log::info!("================================================================================");

    let service = ScanService::new(cli.config()).wrap_err("invalid configuration")?;

    match &cli.command {
        Command::Rules => {
            pretty::print_rules();
            Ok(())
        }
        Command::Scan { targets, ports, timeout, detection, output } => {
            let mut scan = StartScan::new(targets.clone()).detection(*detection);
            if let Some(ports) = ports {
                scan = scan.ports(ports.clone());
            }
            if let Some(timeout) = timeout {
                scan = scan.timeout_secs(*timeout);
            }
            if let Some(format) = output {
                scan = scan.format(*format);
            }

            let events = service.subscribe();
            let id = service.start_scan(scan).wrap_err("scan rejected")?;
            pretty::print_header(&format!("Scanning: {}", targets.join(", ")));
            follow(&service, &cli, events, id).await
        }
        Command::Discover { network, full } => {
            let events = service.subscribe();
            let id = service.discover(network, !full).wrap_err("discovery rejected")?;
            pretty::print_header(&format!("Discovering: {}", network));
            follow(&service, &cli, events, id).await
        }
    }
}

/// Print events for one job until it is terminal. Ctrl-C stops the job.
async fn follow(service: &ScanService, cli: &Cli, mut events: Subscription, id: JobId) -> Result<()> {
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    eyre::bail!("event stream closed before job {} finished", id);
                };
                if event.job_id() != id {
                    continue;
                }
                if cli.json {
                    println!("{}", event.to_json()?);
                } else {
                    pretty::print_event(&event);
                }
                if event.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                // A job that has not started yet cannot be stopped; wait for another Ctrl-C.
                interrupted = service.stop_scan(&id);
                log::info!("[main] interrupt: job_id={} stopped={}", id, interrupted);
            }
        }
    }

    service.unsubscribe(events.id());

    if cli.json {
        return Ok(());
    }

    let job = service.get_job(&id)?;
    pretty::print_separator();
    pretty::print_job(&job);
    if job.result.as_ref().and_then(|r| r.report()).is_some() {
        pretty::print_findings(&job.findings);
    }
    pretty::print_separator();
    pretty::print_history(&service.list_history(1));

    Ok(())
}
