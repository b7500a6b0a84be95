use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use hapistream::format::{write_stream, OutputFormat};
use hapistream::parse::cef::{CefReaderConfig, CefStream};
use hapistream::parse::das2::{Das2ReaderConfig, Das2Stream};
use hapistream::record::{ProjectedStream, RecordStream};
use hapistream::schema::Schema;
use hapistream::source::{open_input, AggregatingStream, FileSource, FileSourceConfig};
use hapistream::time::TimeRange;

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    Cef,
    Das2,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputArg {
    Csv,
    Binary,
}

impl From<OutputArg> for OutputFormat {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::Csv => OutputFormat::Csv,
            OutputArg::Binary => OutputFormat::Binary,
        }
    }
}

#[derive(Parser)]
#[command(name = "hapistream-convert")]
#[command(about = "Convert CEF or Das2Stream data to HAPI csv or binary records")]
struct Cli {
    /// Input stream file (.gz is decompressed)
    #[arg(long, conflicts_with = "source")]
    input: Option<PathBuf>,

    /// Input stream format
    #[arg(long, value_enum, default_value = "cef")]
    format: InputFormat,

    /// File source configuration (JSON); reads granules between --start and --stop
    #[arg(long, requires_all = ["start", "stop", "schema"])]
    source: Option<PathBuf>,

    /// Range start, ISO-8601
    #[arg(long)]
    start: Option<String>,

    /// Range stop (exclusive), ISO-8601
    #[arg(long)]
    stop: Option<String>,

    /// Schema document (JSON). Derived from the stream header if omitted.
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Comma separated parameters to keep, in output order
    #[arg(long, value_delimiter = ',')]
    parameters: Vec<String>,

    /// Output encoding
    #[arg(long, value_enum, default_value = "csv")]
    output_format: OutputArg,

    /// Output file (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Print the schema as JSON instead of converting
    #[arg(long)]
    print_schema: bool,

    /// CEF work buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let out: Box<dyn Write> = match &cli.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };
    let mut out = BufWriter::new(out);

    let written = match (&cli.input, &cli.source) {
        (Some(input), None) => convert_file(&cli, input, &mut out)?,
        (None, Some(source)) => convert_source(&cli, source, &mut out)?,
        _ => bail!("one of --input or --source is required"),
    };
    out.flush().context("flush output")?;
    log::info!("wrote {written} records");
    Ok(())
}

fn convert_file(cli: &Cli, input: &Path, out: &mut dyn Write) -> Result<u64> {
    let reader = open_input(input).with_context(|| format!("open {}", input.display()))?;
    let (stream, derived): (Box<dyn RecordStream>, Schema) = match cli.format {
        InputFormat::Cef => {
            let mut config = CefReaderConfig::default();
            if let Some(size) = cli.buffer_size {
                config.buffer_size = size;
            }
            let stream = CefStream::with_config(reader, &config)
                .with_context(|| format!("read CEF header of {}", input.display()))?;
            let schema = stream.schema();
            (Box::new(stream), schema)
        }
        InputFormat::Das2 => {
            let stream = Das2Stream::with_config(reader, &Das2ReaderConfig::default())
                .with_context(|| format!("read das2 descriptors of {}", input.display()))?;
            let schema = stream.schema();
            (Box::new(stream), schema)
        }
    };
    let schema = match &cli.schema {
        Some(path) => load_schema(path)?,
        None => derived,
    };
    finish(cli, stream, schema, out)
}

fn convert_source(cli: &Cli, source: &Path, out: &mut dyn Write) -> Result<u64> {
    let config = FileSourceConfig::from_json_file(source)
        .with_context(|| format!("load source configuration {}", source.display()))?;
    let (Some(start), Some(stop), Some(schema)) = (&cli.start, &cli.stop, &cli.schema) else {
        bail!("--source needs --start, --stop and --schema");
    };
    let range = TimeRange::parse_iso(start, stop).context("parse time range")?;
    let schema = load_schema(schema)?;
    let mut source = FileSource::new(config)?;
    let stream = AggregatingStream::new(&mut source, &range, None)
        .with_context(|| format!("open granules for {range}"))?;
    finish(cli, stream, schema, out)
}

fn finish<S: RecordStream>(cli: &Cli, stream: S, schema: Schema, out: &mut dyn Write) -> Result<u64> {
    let (mut stream, schema) = if cli.parameters.is_empty() {
        (ProjectedStream::new(stream, (0..schema.len()).collect()), schema)
    } else {
        let projected = ProjectedStream::by_name(stream, &schema.names(), &cli.parameters)?;
        (projected, schema.subset(&cli.parameters)?)
    };
    if cli.print_schema {
        writeln!(out, "{}", schema.to_json_pretty()?)?;
        return Ok(0);
    }
    let written = write_stream(&mut stream, &schema, cli.output_format.into(), out)?;
    stream.close()?;
    Ok(written)
}

fn load_schema(path: &Path) -> Result<Schema> {
    let file = File::open(path).with_context(|| format!("open schema {}", path.display()))?;
    Schema::from_reader(io::BufReader::new(file))
        .with_context(|| format!("parse schema {}", path.display()))
}
