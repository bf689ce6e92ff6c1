//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// scrun - run scripts that declare their own npm dependencies
///
/// Dependencies come from an inline `<package>` block in the script and from
/// `--with`. Installs are cached by dependency set and node version.
#[derive(Parser, Debug)]
#[command(name = "scrun")]
#[command(author, version, about, long_about = None)]
#[command(after_help = EXAMPLES)]
pub struct Cli {
    /// Add a dependency: `name` prefers a local copy, `name@range` is pinned
    #[arg(long = "with", value_name = "DEP")]
    pub with: Vec<String>,

    /// Node version, e.g. "node:18" or "node@>=18 <20"
    #[arg(long = "engine", value_name = "SPEC")]
    pub engine: Vec<String>,

    /// Allow install scripts of dependencies to run
    #[arg(long)]
    pub run_postinstall: bool,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(long, env = "SCRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Node flags, then the target, then arguments for the target
    #[arg(
        value_name = "ARGS",
        trailing_var_arg = true,
        allow_hyphen_values = true,
        num_args = 0..
    )]
    pub rest: Vec<String>,
}

const EXAMPLES: &str = "Examples:
  scrun -e 'console.log(1)'             forward to node
  scrun ./script.js                     run a local file
  scrun cowsay hi                       run an npm package
  scrun --with=typescript tsc           run tsc from typescript
  scrun --with=tsx --import tsx ./a.ts  typescript
  curl ... | scrun -                    run from stdin";

/// Node flags whose value is the following argument
const VALUE_FLAGS: &[&str] = &[
    "-e",
    "--eval",
    "-p",
    "--print",
    "-r",
    "--require",
    "--import",
    "--loader",
    "--experimental-loader",
    "--input-type",
    "-C",
    "--conditions",
    "--env-file",
    "--inspect-port",
    "--title",
];

/// Flags that make node evaluate code instead of running a file
const EVAL_FLAGS: &[&str] = &["-e", "--eval", "-p", "--print"];

/// `rest` split into its three parts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitArgs {
    pub node_args: Vec<String>,
    pub target: Option<String>,
    pub target_args: Vec<String>,
}

impl Cli {
    /// Split trailing arguments into node flags, target and target arguments
    pub fn split_rest(&self) -> SplitArgs {
        split_args(&self.rest)
    }

    /// `--engine` values keyed by engine name; later flags win
    pub fn engines(&self) -> BTreeMap<String, String> {
        parse_engines(&self.engine)
    }
}

/// Leading flags go to node; a known value flag consumes the next argument.
/// With `-e`/`-p` there is no target and everything else goes to node.
pub fn split_args(rest: &[String]) -> SplitArgs {
    let mut split = SplitArgs::default();
    let mut iter = rest.iter().peekable();
    let mut evaluating = false;

    while let Some(arg) = iter.next() {
        if !arg.starts_with('-') || arg == "-" {
            if evaluating {
                split.target_args.push(arg.clone());
                split.target_args.extend(iter.cloned());
            } else {
                split.target = Some(arg.clone());
                split.target_args = iter.cloned().collect();
            }
            return split;
        }

        split.node_args.push(arg.clone());
        if arg == "--" {
            split.target_args = iter.cloned().collect();
            return split;
        }
        if EVAL_FLAGS.contains(&arg.as_str()) {
            evaluating = true;
        }
        if VALUE_FLAGS.contains(&arg.as_str()) {
            if let Some(value) = iter.next() {
                split.node_args.push(value.clone());
            }
        }
    }
    split
}

/// Parse `node:X`, `node@X` (or a bare `X`, meaning node), comma separated
pub fn parse_engines(specs: &[String]) -> BTreeMap<String, String> {
    let mut engines = BTreeMap::new();
    for spec in specs.iter().flat_map(|s| s.split(',')) {
        let spec = spec.trim();
        if spec.is_empty() {
            continue;
        }
        let (name, constraint) = match spec.find([':', '@']) {
            Some(at) => (&spec[..at], &spec[at + 1..]),
            None => ("node", spec),
        };
        engines.insert(name.trim().to_string(), constraint.trim().to_string());
    }
    engines
}
