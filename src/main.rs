//! sau CLI (spec.md §6.1).

use std::path::PathBuf;

use clap::Parser as ClapParser;

use sau::config::RenderOptions;
use sau::diagnostics::DiagnosticSink;
use sau::generator::{Generator, BLOCK_SIZE};
use sau::lower::lower;
use sau::parser::Parser as SauParser;
use sau::sink::{AudioSink, DeviceSink, WavSink};
use sau::symtab::SymTab;

#[derive(ClapParser)]
#[command(name = "sau")]
#[command(about = "Scriptable AUdio synthesizer", long_about = None)]
struct Cli {
    /// Force audio-device output on; incompatible with -m or -c.
    #[arg(short = 'a')]
    audio_on: bool,

    /// Force audio-device output off; incompatible with -a or -c.
    #[arg(short = 'm')]
    audio_off: bool,

    /// Request sample rate in Hz.
    #[arg(short = 'r', value_name = "N", default_value_t = 44100)]
    sample_rate: u32,

    /// Write 16-bit PCM WAV to this path; disables device output unless -a is given.
    #[arg(short = 'o', value_name = "path")]
    wav_out: Option<PathBuf>,

    /// Interpret the trailing arguments as inline scripts, not paths.
    #[arg(short = 'e')]
    inline: bool,

    /// Print program info after build.
    #[arg(short = 'p')]
    print_info: bool,

    /// Check only: parse and build, do not render.
    #[arg(short = 'c')]
    check_only: bool,

    /// Print version and exit.
    #[arg(short = 'v')]
    version: bool,

    /// Script file paths, or inline scripts with -e.
    scripts: Vec<String>,
}

fn main() {
    let cli = Cli::parse();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    if cli.version {
        println!("sau {}", env!("CARGO_PKG_VERSION"));
        std::process::exit(0);
    }

    if (cli.audio_on && cli.audio_off)
        || (cli.check_only && (cli.audio_on || cli.audio_off))
    {
        eprintln!("sau: -a, -m and -c are mutually exclusive");
        std::process::exit(0);
    }

    if cli.scripts.is_empty() {
        std::process::exit(0);
    }

    let play_device = if cli.check_only {
        false
    } else if cli.audio_on {
        true
    } else if cli.audio_off {
        false
    } else {
        cli.wav_out.is_none()
    };

    let opts = RenderOptions {
        sample_rate: cli.sample_rate,
        wav_path: cli.wav_out.clone(),
        play_device,
        check_only: cli.check_only,
        print_info: cli.print_info,
    };

    let mut any_error = false;
    for (idx, arg) in cli.scripts.iter().enumerate() {
        let (name, src) = if cli.inline {
            (format!("script{idx}"), arg.clone())
        } else {
            match std::fs::read_to_string(arg) {
                Ok(s) => (arg.clone(), s),
                Err(e) => {
                    eprintln!("sau: failed to open {arg}: {e}");
                    any_error = true;
                    continue;
                }
            }
        };
        if let Err(e) = run_script(&name, &src, &opts) {
            eprintln!("sau: {e}");
            any_error = true;
        }
    }

    std::process::exit(if any_error { 1 } else { 0 });
}

fn run_script(name: &str, src: &str, opts: &RenderOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut syms = SymTab::new();
    let mut diags = DiagnosticSink::new();
    let (graph, defaults) = SauParser::new(src, &mut syms, &mut diags).parse();
    let program = lower(graph, defaults, name.to_string(), &mut diags)?;
    diags.print_to_stderr(name);

    if opts.print_info {
        print_program_info(name, &program);
    }
    if opts.check_only {
        return Ok(());
    }

    let mut sinks: Vec<Box<dyn AudioSink>> = Vec::new();
    if let Some(path) = &opts.wav_path {
        sinks.push(Box::new(WavSink::create(path, opts.sample_rate)?));
    }
    if opts.play_device {
        sinks.push(Box::new(DeviceSink::open(opts.sample_rate)?));
    }
    if sinks.is_empty() {
        return Ok(());
    }

    let mut by_rate: std::collections::BTreeMap<u32, Vec<Box<dyn AudioSink>>> = Default::default();
    for sink in sinks {
        by_rate.entry(sink.sample_rate()).or_default().push(sink);
    }
    if by_rate.len() > 1 {
        tracing::warn!(
            "sinks negotiated different sample rates {:?}; rendering {name} once per rate",
            by_rate.keys().collect::<Vec<_>>()
        );
    }

    for (rate, mut group) in by_rate {
        let mut gen = Generator::new(&program, rate);
        let mut buf = [0i16; BLOCK_SIZE * 2];
        loop {
            let (written, eof) = gen.run(&mut buf);
            if written > 0 {
                let frames = &buf[..written * 2];
                for sink in group.iter_mut() {
                    sink.write(frames)?;
                }
            }
            if eof {
                break;
            }
        }
        for sink in group.iter_mut() {
            sink.close()?;
        }
    }

    Ok(())
}

fn print_program_info(name: &str, program: &sau::program::Program) {
    println!(
        "{name}: {} events, {} operators, {} voices, {:.1} ms nominal duration",
        program.events.len(),
        program.op_count,
        program.voice_count,
        program.total_wait_ms()
    );
}
