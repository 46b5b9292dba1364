use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{Shell, generate};
use tracing_subscriber::EnvFilter;

use vivavoce::audio::device::{self, CpalDevices};
use vivavoce::config::Config;
use vivavoce::error::VivaError;
use vivavoce::live::LiveSessionManager;
use vivavoce::live::transport::GeminiConnector;
use vivavoce::profile::{self, Profile};
use vivavoce::viz::{Canvas, RenderLoop, TerminalSink};

#[derive(Parser)]
#[command(
    name = "vivavoce",
    about = "Talk to your resume",
    long_about = "Vivavoce opens a live voice conversation with a Gemini native-audio \
        model that speaks as the person described in a resume profile. Microphone \
        audio is streamed to the model and its spoken replies are played back \
        gaplessly, with a terminal visualizer showing the model's voice."
)]
struct Cli {
    /// Path to config file
    ///
    /// Defaults to ~/.config/vivavoce/config.yaml. Built-in defaults are used
    /// when that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    ///
    /// Sets the log level to debug for the vivavoce crate, showing per-chunk
    /// capture and playback scheduling detail.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a live voice session (foreground)
    ///
    /// Opens the microphone and speaker, connects to the live model with
    /// the persona built from the configured profile, and runs until the
    /// session ends or Ctrl+C is pressed.
    Talk {
        /// Disable the terminal visualizer
        #[arg(long)]
        no_visualizer: bool,
    },

    /// List available audio input and output devices
    Devices,

    /// Print the persona instruction sent to the model
    Persona,

    /// Generate shell completions
    ///
    /// Prints a completion script for the given shell to stdout.
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, elvish, powershell)
        shell: Shell,
    },
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("vivavoce=debug,info")
    } else {
        EnvFilter::new("vivavoce=info,warn")
    };

    // stdout belongs to the visualizer.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), VivaError> {
    match cli.command {
        Command::Devices => run_devices(),
        Command::Completions { shell } => {
            generate(shell, &mut Cli::command(), "vivavoce", &mut std::io::stdout());
            Ok(())
        }
        Command::Persona => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            let profile = Profile::from_config(&config.profile)?;
            println!("{}", profile::system_instruction(&profile, &config.profile));
            Ok(())
        }
        Command::Talk { no_visualizer } => {
            let mut config = Config::load_or_default(cli.config.as_deref())?;
            if no_visualizer {
                config.visualizer.enabled = false;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_talk(config))
        }
    }
}

fn print_device_list(devices: &[String], default_name: Option<&str>) {
    if devices.is_empty() {
        println!("  (none)");
    }
    for (i, name) in devices.iter().enumerate() {
        let marker = if default_name == Some(name.as_str()) {
            " (default)"
        } else {
            ""
        };
        println!("  {}: {name}{marker}", i + 1);
    }
}

fn run_devices() -> Result<(), VivaError> {
    println!("Input devices:");
    print_device_list(
        &device::list_input_devices()?,
        device::default_input_device_name().as_deref(),
    );
    println!();
    println!("Output devices:");
    print_device_list(
        &device::list_output_devices()?,
        device::default_output_device_name().as_deref(),
    );
    Ok(())
}

async fn run_talk(config: Config) -> Result<(), VivaError> {
    let profile = Profile::from_config(&config.profile)?;
    let instruction = profile::system_instruction(&profile, &config.profile);
    let connector = Arc::new(GeminiConnector::from_config(&config.live));

    let mut manager = LiveSessionManager::new(
        config.audio.clone(),
        config.live.clone(),
        instruction,
        Box::new(CpalDevices::new()),
        connector,
    );

    if let Err(e) = manager.connect() {
        return Err(VivaError::Other(e.user_message()));
    }
    tracing::info!("calling {}; press Ctrl+C to hang up", profile.name);

    let visualizer = config.visualizer.enabled.then(|| {
        RenderLoop::spawn(
            manager.output_amplitudes(),
            manager.subscribe(),
            Canvas::for_columns(config.visualizer.width),
            config.visualizer.fps,
            TerminalSink::stdout(config.visualizer.width),
        )
    });

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut was_connected = false;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::info!("hanging up");
                break;
            }
            active = manager.step() => {
                if !active {
                    break;
                }
            }
        }

        let connected = manager.status().connected;
        if connected && !was_connected {
            tracing::info!("connected, start talking");
        }
        was_connected = connected;
    }

    let error = manager.status().error;
    manager.disconnect();
    if let Some(render) = visualizer {
        render.stop().await;
    }

    match error {
        Some(message) => Err(VivaError::Other(message)),
        None => Ok(()),
    }
}
