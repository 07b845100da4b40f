use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use structopt::StructOpt;

use qrm_station::App;

#[derive(StructOpt, Debug)]
#[structopt(name = "qrm-station")]
struct Opt {
	/// Path to the main TOML configuration file.
	#[structopt(long, default_value = "config.toml")]
	config: PathBuf,

	/// Execute one capture batch with default parameters, then exit.
	#[structopt(long)]
	run_once: bool,
}

fn main() {
	env_logger::init();
	let opt = Opt::from_args();

	let app = match App::build(&opt.config) {
		Ok(app) => Arc::new(app),
		Err(e) => {
			log::error!("qrm-station: failed to build app from {}: {}", opt.config.display(), e);
			exit(1);
		}
	};

	if opt.run_once {
		match app.execute_capture_default() {
			Ok(Some(outcome)) if !outcome.cancelled => {
				log::info!("qrm-station: run-once batch {} completed", outcome.counter);
				exit(0);
			}
			Ok(Some(outcome)) => {
				log::warn!("qrm-station: run-once batch {} was cancelled", outcome.counter);
				exit(1);
			}
			Ok(None) => {
				log::warn!("qrm-station: run-once skipped, a batch was already running");
				exit(1);
			}
			Err(e) => {
				log::error!("qrm-station: run-once failed: {}", e);
				exit(1);
			}
		}
	}

	if let Err(e) = app.start_scheduler() {
		log::error!("qrm-station: failed to start scheduler: {}", e);
		exit(1);
	}

	loop {
		thread::sleep(Duration::from_secs(20));
	}
}
