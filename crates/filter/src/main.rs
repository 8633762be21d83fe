//! Stream filter demo for Calculon.
//!
//! Reads whitespace-separated numbers from stdin, runs each datum (or each
//! row, in vector mode) through a compiled Calculon script, and writes the
//! results to stdout.
//!
//! Try: `echo 1 | filter --script 'sin(n)'`

use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::process;
use std::str::FromStr;

use calculon::{CompiledProgram, Compiler, Precision, SymbolTable};
use clap::{Parser, ValueEnum};

#[derive(Parser)]
#[command(name = "filter")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a stream of numbers through a Calculon script", long_about = None)]
#[command(disable_version_flag = true)]
struct Cli {
    /// Input Calculon script file
    #[arg(short, long, conflicts_with = "script")]
    file: Option<PathBuf>,

    /// Literal Calculon script
    #[arg(short, long, allow_hyphen_values = true)]
    script: Option<String>,

    /// Floating-point precision of the compiled code
    #[arg(short, long, value_enum, default_value = "double")]
    precision: PrecisionArg,

    /// Dump generated IR after compilation
    #[arg(short, long)]
    dump: bool,

    /// Define a global real variable (NAME=REAL)
    #[arg(short = 'D', long = "define", value_name = "NAME=REAL")]
    defines: Vec<String>,

    /// Define a global vector variable (NAME=R,R,...)
    #[arg(short = 'V', long = "vector", value_name = "NAME=R,R,...")]
    vectors: Vec<String>,

    /// Define a type alias (NAME=TYPE)
    #[arg(short = 'T', long = "type", value_name = "NAME=TYPE")]
    type_aliases: Vec<String>,

    /// Read each row of input values as a vector this big
    #[arg(short = 'i', long)]
    ivector: Option<u32>,

    /// Write each result as a vector this big
    #[arg(short = 'o', long)]
    ovector: Option<u32>,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PrecisionArg {
    Double,
    Float,
}

/// The two marshallable element types, for monomorphising the I/O loop.
trait Real: Copy + Default + FromStr {
    const PRECISION: Precision;
    fn to_f64(self) -> f64;
}

impl Real for f64 {
    const PRECISION: Precision = Precision::Double;
    fn to_f64(self) -> f64 {
        self
    }
}

impl Real for f32 {
    const PRECISION: Precision = Precision::Float;
    fn to_f64(self) -> f64 {
        self as f64
    }
}

fn fail(message: &str) -> ! {
    eprintln!("filter: {}", message);
    eprintln!("(try --help)");
    process::exit(1);
}

fn render(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.is_infinite() {
        if value < 0.0 { "-inf".to_string() } else { "+inf".to_string() }
    } else {
        format!("{}", value)
    }
}

/// Parse repeated `NAME=...` definitions.
fn split_definition<'a>(definition: &'a str, what: &str) -> (&'a str, &'a str) {
    match definition.split_once('=') {
        Some((name, value)) => (name, value),
        None => fail(&format!("malformed {} definition (use NAME=...)", what)),
    }
}

fn build_globals(cli: &Cli) -> SymbolTable {
    let mut globals = SymbolTable::standard();

    for definition in &cli.defines {
        let (name, value) = split_definition(definition, "variable");
        let value: f64 = value
            .parse()
            .unwrap_or_else(|_| fail("malformed real in -D definition"));
        globals.add_real(name, value);
    }

    for definition in &cli.vectors {
        let (name, value) = split_definition(definition, "vector");
        let elements: Vec<f64> = value
            .split(',')
            .map(|e| {
                e.trim()
                    .parse()
                    .unwrap_or_else(|_| fail("malformed real in -V definition"))
            })
            .collect();
        globals.add_vector(name, elements);
    }

    globals
}

fn compile_script<R: Real>(cli: &Cli, signature: &str) -> CompiledProgram {
    let source = match (&cli.file, &cli.script) {
        (Some(path), None) => fs::read_to_string(path)
            .unwrap_or_else(|e| fail(&format!("cannot read '{}': {}", path.display(), e))),
        (None, Some(script)) => script.clone(),
        _ => fail("you must specify the Calculon script to use, with --script or --file"),
    };

    let mut compiler = Compiler::new(R::PRECISION);
    for definition in &cli.type_aliases {
        let (name, target) = split_definition(definition, "type alias");
        if let Err(e) = compiler.define_alias(name, target) {
            fail(&format!("bad type alias: {}", e.message));
        }
    }

    let globals = build_globals(cli);
    match compiler.compile(signature, &source, &globals) {
        Ok(program) => program,
        Err(e) => {
            eprintln!("filter: compilation error: {}", e);
            process::exit(1);
        }
    }
}

fn read_input_numbers<R: Real>() -> Vec<R> {
    let mut input = String::new();
    if std::io::stdin().read_to_string(&mut input).is_err() {
        fail("cannot read stdin");
    }
    input
        .split_whitespace()
        .map(|token| {
            token
                .parse()
                .unwrap_or_else(|_| fail("malformed number in input data"))
        })
        .collect()
}

/// Data is a simple stream of numbers: `Entrypoint(Real, Real*)`.
fn process_data<R: Real>(cli: &Cli) {
    let program = compile_script::<R>(cli, "(n: real) : (out: real)");
    if cli.dump {
        program.dump();
    }

    let entry: extern "C" fn(R, *mut R) =
        unsafe { std::mem::transmute(program.entry_ptr()) };

    for number in read_input_numbers::<R>() {
        let mut out = R::default();
        entry(number, &mut out);
        println!("{}", render(out.to_f64()));
    }
}

/// Data is a stream of rows: `Entrypoint(Real*, Real*)`.
fn process_data_rows<R: Real>(cli: &Cli, ivsize: u32, ovsize: u32) {
    let signature = format!("(n: vector*{}) : (out: vector*{})", ivsize, ovsize);
    let program = compile_script::<R>(cli, &signature);
    if cli.dump {
        program.dump();
    }

    let entry: extern "C" fn(*const R, *mut R) =
        unsafe { std::mem::transmute(program.entry_ptr()) };

    let numbers = read_input_numbers::<R>();
    if numbers.len() % ivsize as usize != 0 {
        fail("found partial row, aborting");
    }

    let mut out = vec![R::default(); ovsize as usize];
    for row in numbers.chunks_exact(ivsize as usize) {
        entry(row.as_ptr(), out.as_mut_ptr());
        let rendered: Vec<String> = out.iter().map(|o| render(o.to_f64())).collect();
        println!("{}", rendered.join(" "));
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match (cli.ivector, cli.ovector) {
        (None, None) => match cli.precision {
            PrecisionArg::Double => process_data::<f64>(&cli),
            PrecisionArg::Float => process_data::<f32>(&cli),
        },
        (Some(ivsize), Some(ovsize)) => {
            if ivsize == 0 || ovsize == 0 {
                fail("vector sizes must be at least 1");
            }
            match cli.precision {
                PrecisionArg::Double => process_data_rows::<f64>(&cli, ivsize, ovsize),
                PrecisionArg::Float => process_data_rows::<f32>(&cli, ivsize, ovsize),
            }
        }
        _ => fail("if the input is a vector, the output must be too (and vice versa)"),
    }
}
