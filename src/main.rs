use std::io;
use std::process;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use log::debug;
use rulec::{compile_with, CompileOptions, SearchLimits, Syntax};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SyntaxArg {
    Perl5,
    Perl6,
}

impl From<SyntaxArg> for Syntax {
    fn from(arg: SyntaxArg) -> Self {
        match arg {
            SyntaxArg::Perl5 => Syntax::Perl5,
            SyntaxArg::Perl6 => Syntax::Perl6,
        }
    }
}

/// Match a line read from stdin against a rule pattern.
///
/// Exits with 0 when the pattern matches and 1 when it does not.
#[derive(Parser, Debug)]
#[command(name = "rulec", version)]
struct Cli {
    /// Pattern to match.
    #[arg(short = 'E', long = "pattern")]
    pattern: String,

    /// Surface syntax of the pattern.
    #[arg(long, value_enum, default_value = "perl5")]
    syntax: SyntaxArg,

    /// Print the compiled program instead of matching.
    #[arg(long)]
    emit: bool,

    /// Print the span of every match, one per line.
    #[arg(long)]
    all: bool,

    /// Log every node entered during matching (at trace level).
    #[arg(long)]
    trace: bool,

    /// Leave `# line N` markers out of the emitted program.
    #[arg(long)]
    no_line_markers: bool,

    /// Step budget for finding each match (unlimited by default).
    #[arg(long)]
    fuel: Option<u32>,
}

// Usage: echo <input_text> | rulec -E <pattern>
fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let options = CompileOptions::new()
        .trace(cli.trace)
        .line_markers(!cli.no_line_markers);
    let program = compile_with(&cli.pattern, cli.syntax.into(), &options)
        .with_context(|| format!("failed to compile `{}`", cli.pattern))?;

    if cli.emit {
        print!("{program}");
        return Ok(());
    }

    let mut input_line = String::new();
    io::stdin()
        .read_line(&mut input_line)
        .context("failed to read stdin")?;
    // Trim trailing newline for correct '$' anchor matching
    let input = input_line.trim_end_matches('\n');
    debug!("matching {} bytes", input.len());

    let mut limits = SearchLimits::new();
    if let Some(fuel) = cli.fuel {
        limits = limits.exec_fuel(fuel);
    }
    let mut search = program.search(input.as_bytes()).limits(limits);

    let mut matched = false;
    while let Some(found) = search.next_match()? {
        matched = true;
        if !cli.all {
            break;
        }
        println!("{}..{}", found.start(), found.end());
    }

    process::exit(if matched { 0 } else { 1 })
}
