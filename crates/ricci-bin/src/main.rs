use clap::Parser;
use ricci::table::TensorValue;
use ricci::{Config, Context, Document, Value};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

fn main() {
    init_tracing();
    if let Err(err) = Cli::parse().run() {
        if !err.is_empty() {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }
}

/// Log events go to standard error, filtered by `RUST_LOG`.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);
    Registry::default().with(filter).with(fmt_layer).init();
}

/// Expand tensor equations written in LaTeX Ricci-calculus notation.
///
/// The input document interleaves `%` directives with equations.
/// Every name the document defines is printed together with its fully expanded value,
///     one line per name in the order the names were last updated.
///
/// A directive starts with `%` and ends at a semicolon or at the end of the line:
///
/// % def metric gDD (4), sym01 hDD, const k;
///
/// % coord [t, r, \theta, \phi];
///
/// Any other line is an equation, such as `T^\mu_\nu = \nabla_\nu v^\mu`.
#[derive(Debug, Parser)]
#[command(
    name = "ricci",
    author = "The Ricci Project",
    version = "0.1",
    about,
    long_about,
    max_term_width(100)
)]
struct Cli {
    /// Path to the LaTeX document to compile.
    path: PathBuf,

    /// Dimension of tensors whose declarations do not fix one.
    #[arg(short, long)]
    dim: Option<usize>,

    /// Path to a JSON file with the configuration of the parse context.
    ///
    /// Flags given on the command line take precedence over the file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Do not warn when `% def` re-declares an existing name.
    #[arg(long)]
    no_override_warnings: bool,

    /// Output format.
    #[arg(short, long, default_value = "text")]
    format: Format,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
enum Format {
    /// One `name = value` line per defined name.
    Text,
    /// A JSON object with the list of names and the value of each.
    Json,
}

impl Cli {
    fn config(&self) -> Result<Config, String> {
        let mut config = match &self.config {
            None => Config::default(),
            Some(path) => {
                let raw = read(path)?;
                serde_json::from_str(&raw)
                    .map_err(|err| format!["Failed to parse configuration {path:?}: {err}"])?
            }
        };
        if let Some(dim) = self.dim {
            if dim == 0 {
                return Err("the dimension must be at least 1".to_string());
            }
            config.default_dimension = dim;
        }
        if self.no_override_warnings {
            config.warn_on_override = false;
        }
        Ok(config)
    }

    fn run(self) -> Result<(), String> {
        let config = self.config()?;
        let source = read(&self.path)?;
        let file_name = format!["{}", self.path.display()];
        tracing::debug!(path = %file_name, ?config, "compiling document");

        let mut ctx = Context::new(config);
        let result = ctx.parse(&source);
        for warning in ctx.take_warnings() {
            warning
                .ariadne_report(&file_name)
                .eprint((file_name.as_str(), ariadne::Source::from(source.as_str())))
                .map_err(|err| format!["Failed to write warning: {err}"])?;
        }
        if let Err(err) = result {
            err.ariadne_report(&file_name)
                .eprint((file_name.as_str(), ariadne::Source::from(source.as_str())))
                .map_err(|err| format!["Failed to write error: {err}"])?;
            return Err("".into());
        }

        let document = ctx.into_document();
        match self.format {
            Format::Text => {
                for (name, value) in document.iter() {
                    println!["{name} = {value}"];
                }
            }
            Format::Json => {
                let json = to_json(&document);
                let pretty = serde_json::to_string_pretty(&json)
                    .map_err(|err| format!["Failed to serialize the output: {err}"])?;
                println!["{pretty}"];
            }
        }
        Ok(())
    }
}

fn read(path: &PathBuf) -> Result<String, String> {
    std::fs::read_to_string(path).map_err(|err| format!["Failed to read {path:?}: {err}"])
}

fn to_json(document: &Document) -> serde_json::Value {
    let values: serde_json::Map<String, serde_json::Value> = document
        .iter()
        .map(|(name, value)| {
            let json = match value {
                Value::Scalar(expr) => serde_json::Value::String(expr.to_string()),
                Value::Tensor(tensor) => tensor_to_json(tensor, &mut Vec::new()),
            };
            (name.to_string(), json)
        })
        .collect();
    serde_json::json!({
        "symbols": document.symbols(),
        "values": values,
    })
}

/// Nested arrays of component strings, one level per index.
fn tensor_to_json(tensor: &TensorValue, prefix: &mut Vec<usize>) -> serde_json::Value {
    if prefix.len() == tensor.rank() {
        return match tensor.get(prefix) {
            Some(expr) => serde_json::Value::String(expr.to_string()),
            None => serde_json::Value::Null,
        };
    }
    let mut items = Vec::with_capacity(tensor.dimension());
    for i in 0..tensor.dimension() {
        prefix.push(i);
        items.push(tensor_to_json(tensor, prefix));
        prefix.pop();
    }
    serde_json::Value::Array(items)
}
