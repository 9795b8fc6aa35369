//
// main.rs
//
// Command-line entry point for kestrel.
//

use std::env;

use kestrel::cli;

fn print_usage() {
    println!(
        "kestrel {}, incremental R source model and signature help.",
        env!("CARGO_PKG_VERSION")
    );
    print!(
        r#"
Usage: kestrel <COMMAND> [OPTIONS]

Commands:

signature <file> --offset <n>    Show signature help at a byte offset
    --lib-path <dir>             Add an R library root (repeatable)
    --partial-match              Allow unambiguous partial argument names
    --json                       Print the result as JSON
    --config <file>              Read settings from a JSON file
tokens <file>                    Dump the token stream
    --trivia                     Include whitespace and comments
    --ast                        Also dump the syntax tree
packages                         List packages in the library roots
    --lib-path <dir>             Add an R library root (repeatable)
    --functions                  List exported function signatures
    --config <file>              Read settings from a JSON file
analysis-stats <path>            Time each analysis phase over a directory
    --csv                        Print results as CSV
    --only <phase>               Run a single phase
    --lib-path <dir>             Add an R library root (repeatable)

--version                        Print the version
--help                           Print this help message

Set KESTREL_PERF=1 to log phase timings, RUST_LOG to control logging.

"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut argv = env::args();
    argv.next(); // skip executable name

    let Some(command) = argv.next() else {
        print_usage();
        return Ok(());
    };

    env_logger::init();

    match command.as_str() {
        "--version" => {
            println!("kestrel {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "--help" => {
            print_usage();
            Ok(())
        }
        "signature" => {
            let args = cli::signature::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            cli::signature::run(&args).await
        }
        "tokens" => {
            let args = cli::tokens::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            cli::tokens::run(&args)
        }
        "packages" => {
            let args = cli::packages::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            cli::packages::run(&args).await
        }
        "analysis-stats" => {
            let args = cli::analysis_stats::parse_args(&mut argv).map_err(anyhow::Error::msg)?;
            let results = cli::analysis_stats::run_analysis_stats(&args).await;
            if args.csv {
                cli::analysis_stats::print_results_csv(&results);
            } else {
                cli::analysis_stats::print_results(&results);
            }
            Ok(())
        }
        other => Err(anyhow::anyhow!("Unknown argument: '{other}'")),
    }
}
