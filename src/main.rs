// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use clap::{crate_version, Parser, Subcommand};

use cuebank::backend::mock;
use cuebank::util::gain_to_db;
use cuebank::{AudioContext, AudioEngine, RuntimeConfig, SoundBank, StopMode};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A runtime for XACT-style compiled audio projects."
)]
struct Cli {
    /// The path to an optional runtime config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Loads a compiled project and lists its categories, variables and cues.
    Inspect {
        /// The engine settings file (.xgs).
        settings: PathBuf,
        /// Wave banks to load (.xwb). May be given multiple times.
        #[arg(short, long)]
        wave_bank: Vec<PathBuf>,
        /// Sound banks to load (.xsb). May be given multiple times.
        #[arg(short, long)]
        sound_bank: Vec<PathBuf>,
    },
    /// Plays a cue through the mock backend (no audible output) and
    /// reports voice activity while it runs.
    Play {
        /// The engine settings file (.xgs).
        settings: PathBuf,
        /// Wave banks to load (.xwb). May be given multiple times.
        #[arg(short, long)]
        wave_bank: Vec<PathBuf>,
        /// Sound banks to load (.xsb). May be given multiple times.
        #[arg(short, long)]
        sound_bank: Vec<PathBuf>,
        /// The name of the cue to play.
        cue_name: String,
        /// How long to pump the engine, in milliseconds.
        #[arg(short, long, default_value_t = 2000)]
        duration_ms: u64,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Inspect {
            settings,
            wave_bank,
            sound_bank,
        } => {
            let (context, engine, sound_banks) =
                load_project(&config, &settings, &wave_bank, &sound_bank)?;

            println!("Categories (count: {}):", engine.categories().len());
            for category in engine.categories() {
                let limit = category
                    .max_instances()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| "unlimited".to_string());
                println!(
                    "- {} ({:+.1} dB, max instances: {}, behavior: {:?}, fade {:?}/{:?})",
                    category.name(),
                    gain_to_db(category.volume()),
                    limit,
                    category.behavior(),
                    category.fade_in(),
                    category.fade_out(),
                );
            }

            let variables = engine.variables();
            println!("\nVariables (count: {}):", variables.len());
            for variable in variables {
                let scope = if variable.global { "global" } else { "cue" };
                println!(
                    "- {} = {} ({}, [{}, {}])",
                    variable.name, variable.value, scope, variable.min, variable.max
                );
            }

            for bank in &sound_banks {
                let cues = bank.cue_names()?;
                println!("\nCues in {} (count: {}):", bank.name(), cues.len());
                for cue in cues {
                    println!("- {}", cue);
                }
            }

            context.shutdown();
        }
        Commands::Play {
            settings,
            wave_bank,
            sound_bank,
            cue_name,
            duration_ms,
        } => {
            let (context, engine, sound_banks) =
                load_project(&config, &settings, &wave_bank, &sound_bank)?;

            // Find the first bank that knows the cue.
            let mut cue = None;
            for bank in &sound_banks {
                match bank.get_cue(&cue_name) {
                    Ok(found) => {
                        cue = Some(found);
                        break;
                    }
                    Err(cuebank::AudioError::UnknownCue(_)) => continue,
                    Err(err) => return Err(err.into()),
                }
            }
            let mut cue = cue.ok_or_else(|| format!("no bank has a cue named {}", cue_name))?;

            println!("Playing {} for {}ms.", cue.name(), duration_ms);
            cue.play()?;

            let deadline = Instant::now() + Duration::from_millis(duration_ms);
            while Instant::now() < deadline && cue.is_playing() {
                engine.update();
                thread::sleep(Duration::from_millis(16));
            }

            cue.stop(StopMode::AsAuthored)?;
            engine.update();
            println!(
                "Done. Voices in use: {} of {}.",
                context.voice_capacity() - context.voices_available(),
                context.voice_capacity(),
            );
            context.shutdown();
        }
    }

    Ok(())
}

fn load_project(
    config: &RuntimeConfig,
    settings: &PathBuf,
    wave_banks: &[PathBuf],
    sound_banks: &[PathBuf],
) -> Result<(Arc<AudioContext>, AudioEngine, Vec<Arc<SoundBank>>), Box<dyn Error>> {
    let context = AudioContext::init(Box::new(mock::Backend::new(64)), config)?;
    let engine = AudioEngine::load(context.clone(), settings)?;
    for path in wave_banks {
        let bank = engine.load_wave_bank(path)?;
        println!(
            "Loaded wave bank {} ({} entries{}).",
            bank.name(),
            bank.len(),
            if bank.is_streaming() { ", streaming" } else { "" },
        );
    }
    let mut banks = Vec::with_capacity(sound_banks.len());
    for path in sound_banks {
        banks.push(engine.load_sound_bank(path)?);
    }
    Ok((context, engine, banks))
}
