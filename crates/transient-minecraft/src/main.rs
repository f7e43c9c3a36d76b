//! `tmc` - CLI for transient-minecraft
//!
//! This binary launches server instances from a workstation and, on the
//! instance itself, runs the server between a save restore and a teardown.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use transient_minecraft::cli::{Cli, Command, ConfigCommand, SaveCommand};
use transient_minecraft::{cloud, init_logging, launch, Config, RunOptions, SaveOutcome, Server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Instances receive their settings through `.env` in the working directory
    dotenvy::dotenv().ok();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // `config path` and `config validate` must work with a broken configuration
    if let Command::Config(config_cmd) = &cli.command {
        if !matches!(config_cmd, ConfigCommand::Show { .. }) {
            return handle_config(None, config_cmd);
        }
    }

    let config = Config::load_from(cli.config.clone()).context("loading configuration")?;

    match cli.command {
        Command::Launch(cmd) => {
            let cloud = cloud::connect(cmd.target.cloud, &config)?;
            let instance = launch::launch(cloud.as_ref(), &config).await?;
            if cmd.json {
                println!("{}", serde_json::to_string_pretty(&instance)?);
            } else {
                println!("Instance:   {}", instance.id);
                println!("Cloud:      {}", instance.cloud);
                println!("Public IP:  {}", instance.public_ip);
            }
        }
        Command::Serve(cmd) => {
            let cloud = cloud::connect(cmd.target.cloud, &config)?;
            let options = RunOptions {
                keep_instance: cmd.keep_instance,
            };
            Server::new(&config, cloud).run(options).await?;
        }
        Command::Save(SaveCommand::Pull(target)) => {
            let server = Server::new(&config, cloud::connect(target.cloud, &config)?);
            match server.pull_only().await? {
                SaveOutcome::Restored { source } => {
                    println!("Restored {source} into {}", server.path().display());
                }
                SaveOutcome::Empty => {
                    println!("No save found; {} left as is", server.path().display());
                }
            }
        }
        Command::Save(SaveCommand::Push(target)) => {
            let server = Server::new(&config, cloud::connect(target.cloud, &config)?);
            let location = server.push_only().await?;
            println!("Uploaded {} to {location}", server.path().display());
        }
        Command::Config(config_cmd) => handle_config(Some(&config), &config_cmd)?,
    }

    Ok(())
}

fn handle_config(config: Option<&Config>, cmd: &ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            let config = config.context("configuration not loaded")?;
            if *json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                print_config(config);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.clone().unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}

fn print_config(config: &Config) {
    let unset = |value: &Option<String>| value.clone().unwrap_or_else(|| "(unset)".to_string());

    println!("Current Configuration");
    println!("=====================");
    println!();
    println!("[Server]");
    println!("  Path:               {}", config.server_path().display());
    println!("  RAM (MB):           {}", config.server.ram_mb);
    println!("  Version:            {}", config.server.version);
    println!("  Jars:               {}", config.server.jars_dir.display());
    println!("  Shutdown grace (s): {}", config.server.shutdown_grace_secs);
    println!();
    println!("[AWS]");
    println!("  Region:             {}", config.aws.region);
    println!("  S3 bucket:          {}", unset(&config.aws.s3_bucket));
    println!("  S3 save key:        {}", unset(&config.aws.s3_save_key));
    println!("  Instance type:      {}", config.aws.instance_type);
    println!();
    println!("[Google Cloud]");
    println!("  Project:            {}", unset(&config.gcloud.project_id));
    println!("  Zone:               {}", unset(&config.gcloud.zone));
    println!("  Machine type:       {}", unset(&config.gcloud.machine_type));
    println!("  Bucket:             {}", unset(&config.gcloud.bucket));
    println!();
    println!("[Launch]");
    match &config.launch.startup_script {
        Some(path) => println!("  Startup script:     {}", path.display()),
        None => println!("  Startup script:     (built-in)"),
    }
    println!("  Poll timeout (s):   {}", config.launch.poll_timeout_secs);
}
