//! Akkado CLI - compile, check, dump, play and render

use akkado::buffer_pool::BLOCK_SIZE;
use akkado::bytecode::{dump_listing, BytecodeFile};
use akkado::diagnostics::{format_diagnostic, format_diagnostic_json, Diagnostic};
use akkado::engine::AudioEngine;
use akkado::env_map::EnvMap;
use akkado::swap_controller::SwapController;
use akkado::CompileResult;
use clap::{Parser, Subcommand};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "akkado")]
#[command(about = "Akkado livecoding compiler and Cedar VM", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a source file to Cedar bytecode
    Compile {
        /// Input .akk source file
        input: PathBuf,

        /// Output bytecode file (default: <input>.cedar)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Emit diagnostics as JSON (for LSP/tooling)
        #[arg(long)]
        json: bool,

        /// List required samples
        #[arg(long)]
        samples: bool,
    },

    /// Check a source file, emitting diagnostics only
    Check {
        /// Input .akk source file
        input: PathBuf,

        /// Emit diagnostics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print a human-readable instruction listing for a bytecode file
    Dump {
        /// Input .cedar bytecode file
        input: PathBuf,
    },

    /// Compile (or load bytecode) and play until interrupted
    Play {
        /// Source file or .cedar bytecode
        input: PathBuf,

        /// Stop after this many seconds (default: run until Ctrl-C)
        #[arg(short, long)]
        duration: Option<f32>,

        /// Tempo in BPM (default: 120)
        #[arg(short, long, default_value = "120")]
        bpm: f32,
    },

    /// Render a source file offline to WAV
    Render {
        /// Input .akk source file
        input: PathBuf,

        /// Output WAV file path
        output: PathBuf,

        /// Duration in seconds (default: 8.0)
        #[arg(short, long, default_value = "8.0")]
        duration: f32,

        /// Tempo in BPM (default: 120)
        #[arg(short, long, default_value = "120")]
        bpm: f32,

        /// Sample rate in Hz (default: 48000)
        #[arg(short, long, default_value = "48000")]
        sample_rate: u32,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Compile {
            input,
            output,
            json,
            samples,
        } => cmd_compile(&input, output, json, samples),
        Commands::Check { input, json } => cmd_check(&input, json),
        Commands::Dump { input } => cmd_dump(&input),
        Commands::Play {
            input,
            duration,
            bpm,
        } => cmd_play(&input, duration, bpm),
        Commands::Render {
            input,
            output,
            duration,
            bpm,
            sample_rate,
        } => cmd_render(&input, &output, duration, bpm, sample_rate),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn print_diagnostics(diagnostics: &[Diagnostic], source: &str, json: bool) {
    for diag in diagnostics {
        if json {
            println!("{}", format_diagnostic_json(diag));
        } else {
            eprint!("{}", format_diagnostic(diag, source));
        }
    }
}

fn compile_source(path: &Path, json: bool) -> Result<CompileResult, Box<dyn std::error::Error>> {
    let source = std::fs::read_to_string(path)?;
    let result = akkado::compile(&source, &path.to_string_lossy());
    print_diagnostics(&result.diagnostics, &source, json);
    Ok(result)
}

fn cmd_compile(
    input: &Path,
    output: Option<PathBuf>,
    json: bool,
    samples: bool,
) -> CliResult {
    let result = compile_source(input, json)?;
    if !result.success {
        return Err("compilation failed".into());
    }

    if samples && !result.required_samples.is_empty() {
        println!("Required samples:");
        for name in &result.required_samples {
            println!("  {}", name);
        }
    }

    let output = output.unwrap_or_else(|| input.with_extension("cedar"));
    let file = BytecodeFile {
        instructions: result.instructions,
        state_inits: result.state_inits,
        required_samples: result.required_samples,
    };
    let bytes = file.encode();
    std::fs::write(&output, &bytes)?;
    println!("Wrote {} bytes to {}", bytes.len(), output.display());

    Ok(())
}

fn cmd_check(input: &Path, json: bool) -> CliResult {
    let result = compile_source(input, json)?;
    if !result.success {
        return Err("check failed".into());
    }
    println!(
        "ok: {} instruction(s), {} pattern(s), {} parameter(s)",
        result.instructions.len(),
        result.state_inits.len(),
        result.param_decls.len()
    );
    Ok(())
}

fn cmd_dump(input: &Path) -> CliResult {
    let bytes = std::fs::read(input)?;
    let file = BytecodeFile::decode(&bytes)?;
    print!("{}", dump_listing(&file));
    Ok(())
}

/// Load either a source file or a pre-compiled container
fn load_program(input: &Path) -> Result<BytecodeFile, Box<dyn std::error::Error>> {
    if input.extension().and_then(|e| e.to_str()) == Some("cedar") {
        let bytes = std::fs::read(input)?;
        return Ok(BytecodeFile::decode(&bytes)?);
    }

    let result = compile_source(input, false)?;
    if !result.success {
        return Err("compilation failed".into());
    }

    Ok(BytecodeFile {
        instructions: result.instructions,
        state_inits: result.state_inits,
        required_samples: result.required_samples,
    })
}

fn cmd_play(input: &Path, duration: Option<f32>, bpm: f32) -> CliResult {
    let program = load_program(input)?;

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or("no audio output device available")?;
    let config = device.default_output_config()?;
    let sample_rate = config.sample_rate().0 as f32;
    let channels = config.channels() as usize;

    let swap = Arc::new(SwapController::new());
    let env = Arc::new(EnvMap::new(sample_rate));
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut engine = AudioEngine::new(
        sample_rate,
        Arc::clone(&swap),
        Arc::clone(&env),
        Arc::clone(&shutdown),
    );
    engine.set_bpm(bpm);

    // Publish before the stream starts; the first callback swaps it in
    if !swap.load_program(&program.instructions, &program.state_inits) {
        return Err("failed to publish program".into());
    }

    info!(
        instructions = program.instructions.len(),
        sample_rate, "starting playback"
    );

    // Block-sized rendering into the variable-size cpal callback
    let mut block_l = [0.0f32; BLOCK_SIZE];
    let mut block_r = [0.0f32; BLOCK_SIZE];
    let mut block_pos = BLOCK_SIZE;

    let stream = device.build_output_stream(
        &config.config(),
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for frame in data.chunks_mut(channels) {
                if block_pos >= BLOCK_SIZE {
                    engine.process_block(&mut block_l, &mut block_r);
                    block_pos = 0;
                }
                frame[0] = block_l[block_pos];
                if channels > 1 {
                    frame[1] = block_r[block_pos];
                }
                block_pos += 1;
            }
        },
        |err| eprintln!("audio stream error: {}", err),
        None,
    )?;

    stream.play()?;

    match duration {
        Some(secs) => std::thread::sleep(std::time::Duration::from_secs_f32(secs)),
        None => loop {
            std::thread::sleep(std::time::Duration::from_millis(250));
        },
    }

    shutdown.store(true, Ordering::Release);
    Ok(())
}

fn cmd_render(
    input: &Path,
    output: &Path,
    duration: f32,
    bpm: f32,
    sample_rate: u32,
) -> CliResult {
    let program = load_program(input)?;

    let swap = Arc::new(SwapController::new());
    let env = Arc::new(EnvMap::new(sample_rate as f32));
    let shutdown = Arc::new(AtomicBool::new(false));

    let mut engine = AudioEngine::new(
        sample_rate as f32,
        Arc::clone(&swap),
        Arc::clone(&env),
        shutdown,
    );
    engine.set_bpm(bpm);

    if !swap.load_program(&program.instructions, &program.state_inits) {
        return Err("failed to publish program".into());
    }

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(output, spec)?;

    let total_blocks = ((duration * sample_rate as f32) as usize).div_ceil(BLOCK_SIZE);
    let mut block_l = [0.0f32; BLOCK_SIZE];
    let mut block_r = [0.0f32; BLOCK_SIZE];

    for _ in 0..total_blocks {
        engine.process_block(&mut block_l, &mut block_r);
        for i in 0..BLOCK_SIZE {
            writer.write_sample(block_l[i])?;
            writer.write_sample(block_r[i])?;
        }
    }

    writer.finalize()?;
    println!("Rendered {:.1}s to {}", duration, output.display());
    Ok(())
}
