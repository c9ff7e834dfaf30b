use std::process::ExitCode;

use clap::Parser;

use progressor::{Args, RunOptions, SensorRuntime, run};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let mut stdout = std::io::stdout();

    let run_result = async {
        let options = RunOptions::builder()
            .config(args.sensor_config())
            .maybe_log_level(args.log_level())
            .maybe_output_format(args.output_format())
            .build();
        let (command, maybe_fake_args) = args.into_command_and_fake_args()?;
        let runtime = match maybe_fake_args {
            Some(fake_args) => SensorRuntime::fake(fake_args),
            None => SensorRuntime::platform().await?,
        };

        run(command, &mut stdout, runtime, options).await
    }
    .await;

    match run_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::from(1)
        }
    }
}
