use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};

use rox::ast_printer::AstPrinter;
use rox::interpreter::Interpreter;
use rox::scanner::{ScanMode, Scanner};
use rox::{Location, Reporter};

#[derive(ClapParser, Debug)]
#[command(version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,

    /// Maximum number of nested calls before a stack overflow is reported
    #[arg(long, global = true, default_value_t = CLI_MAX_CALL_DEPTH)]
    max_depth: usize,
}

/// The CLI runs programs on its own thread sized for this many nested calls.
const CLI_MAX_CALL_DEPTH: usize = 1000;

/// Native stack reserved per nested Lox call on the interpreter thread.
const STACK_PER_CALL: usize = 64 * 1024;

/// Stack left over for scanning, parsing and the driver itself.
const STACK_HEADROOM: usize = 4 * 1024 * 1024;

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize {
        filename: PathBuf,

        /// Emit `//` comments as COMMENT tokens
        #[arg(long)]
        comments: bool,

        /// Print the tokens as a JSON array
        #[arg(long)]
        json: bool,
    },

    /// Parses a file and prints each statement's AST
    Parse { filename: PathBuf },

    /// Runs a file as a Lox program, or starts a REPL when no file is given
    Run { filename: Option<PathBuf> },
}

/// Writes diagnostics to stderr in the classic `[line N] Error…` format.
struct ConsoleReporter;

impl Reporter for ConsoleReporter {
    fn error(&mut self, line: usize, location: &Location, message: &str) {
        eprintln!("[line {}] Error{}: {}", line, location, message);
    }

    fn runtime_error(&mut self, line: usize, message: &str) {
        eprintln!("{}\n[line {}]", message, line);
    }
}

/// Reads the contents of a file into a String
fn read_file(filename: &PathBuf) -> Result<String> {
    info!("Reading file: {:?}", filename);

    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;
    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();

    let bytes = reader
        .read_to_end(&mut buf)
        .context(format!("Failed to read file {:?}", filename))?;

    info!("Read {} bytes from {:?}", bytes, filename);

    String::from_utf8(buf).context(format!("File {:?} is not valid UTF-8", filename))
}

fn init_logger() -> Result<()> {
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            let module = module.strip_prefix("rox::").unwrap_or(module);

            writeln!(
                buf,
                "[{} {}:{}] - {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_default_env()
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

fn tokenize(filename: &PathBuf, comments: bool, json: bool) -> Result<i32> {
    let source = read_file(filename)?;
    let mode = if comments {
        ScanMode::EmitComments
    } else {
        ScanMode::SkipComments
    };

    let mut tokens = Vec::new();
    let mut tokenized = true;

    for result in Scanner::with_mode(&source, mode) {
        match result {
            Ok(token) if json => tokens.push(token),
            Ok(token) => println!("{}", token),
            Err(e) => {
                tokenized = false;
                eprintln!("{}", e);
            }
        }
    }

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&tokens).context("Failed to serialize tokens")?
        );
    }

    Ok(if tokenized { 0 } else { 65 })
}

fn parse(filename: &PathBuf) -> Result<i32> {
    let source = read_file(filename)?;
    let mut reporter = ConsoleReporter;

    let (tokens, lex_errors) = rox::scanner::scan(&source);
    let (statements, parse_errors) = rox::parser::parse(tokens);

    for err in lex_errors.iter().chain(parse_errors.iter()) {
        reporter.report(err);
    }

    if !lex_errors.is_empty() || !parse_errors.is_empty() {
        return Ok(65);
    }

    for stmt in &statements {
        println!("{}", AstPrinter::print_stmt(stmt));
    }

    Ok(0)
}

fn new_interpreter(max_depth: usize) -> Interpreter<io::Stdout> {
    let interpreter = Interpreter::new(io::stdout())
        .with_max_depth(max_depth)
        .with_stack_budget(max_depth.saturating_mul(STACK_PER_CALL));

    info!(
        "Interpreter allows {} nested call(s)",
        interpreter.max_call_depth()
    );
    interpreter
}

fn run_file(filename: &PathBuf, max_depth: usize) -> Result<i32> {
    let source = read_file(filename)?;
    debug!("Provided input:\n {}", source);

    let mut interpreter = new_interpreter(max_depth);
    let status = rox::run(&source, &mut interpreter, &mut ConsoleReporter);

    info!("Run finished with {:?}", status);
    Ok(status.exit_code())
}

fn run_prompt(max_depth: usize) -> Result<i32> {
    let mut interpreter = new_interpreter(max_depth);
    let stdin = io::stdin();
    let mut line = String::new();

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush prompt")?;

        line.clear();
        let read = stdin
            .lock()
            .read_line(&mut line)
            .context("Failed to read from stdin")?;

        if read == 0 {
            break;
        }

        // Errors are reported and the session carries on.
        let status = rox::run(&line, &mut interpreter, &mut ConsoleReporter);
        debug!("REPL line finished with {:?}", status);
    }

    Ok(0)
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    // Lox calls recurse on the native stack, so programs run on a thread
    // sized for `--max-depth`.
    let stack_size: usize = args
        .max_depth
        .saturating_mul(STACK_PER_CALL)
        .saturating_add(STACK_HEADROOM);
    debug!("Spawning interpreter thread with {} byte stack", stack_size);

    let code: i32 = thread::Builder::new()
        .name("interpreter".into())
        .stack_size(stack_size)
        .spawn(move || dispatch(&args))
        .context("Failed to spawn interpreter thread")?
        .join()
        .map_err(|_| anyhow!("Interpreter thread panicked"))??;

    if code != 0 {
        debug!("Exiting with code {}", code);
        std::process::exit(code);
    }

    Ok(())
}

fn dispatch(args: &Cli) -> Result<i32> {
    match &args.commands {
        Commands::Tokenize {
            filename,
            comments,
            json,
        } => tokenize(filename, *comments, *json),

        Commands::Parse { filename } => parse(filename),

        Commands::Run {
            filename: Some(filename),
        } => run_file(filename, args.max_depth),

        Commands::Run { filename: None } => run_prompt(args.max_depth),
    }
}
